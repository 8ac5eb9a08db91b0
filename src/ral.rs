//! RP2040 register layouts for the DMA controller and the PIO blocks
//!
//! Register blocks are `#[repr(C)]` overlays built from `ral_registers`
//! types. They're never instantiated by this crate; they only fix the bus
//! address of every register we touch. Field modules follow the RAL
//! convention of an `offset` and a `mask` per field.

#![allow(non_snake_case, non_upper_case_globals, clippy::identity_op)]

use core::mem::offset_of;

/// Base address of the DMA controller
pub const DMA_BASE: u32 = 0x5000_0000;
/// Base address of PIO block 0
pub const PIO0_BASE: u32 = 0x5020_0000;
/// Base address of PIO block 1
pub const PIO1_BASE: u32 = 0x5030_0000;
/// Base address of the striped SRAM
pub const SRAM_BASE: u32 = 0x2000_0000;

/// Number of DMA channels
pub const CHANNEL_COUNT: usize = 12;
/// Number of state machines per PIO block
pub const STATE_MACHINE_COUNT: usize = 4;
/// Size of each PIO block's instruction memory
pub const INSTRUCTION_COUNT: usize = 32;
/// Number of user GPIOs in bank 0
pub const GPIO_COUNT: u8 = 30;

pub mod dma {
    use ral_registers::{RORegister, RWRegister};

    /// One channel's registers, including the three alias groups
    ///
    /// The last register of each group is a trigger: writing a non-null
    /// value to it starts the channel.
    #[repr(C)]
    pub struct ChannelBlock {
        pub READ_ADDR: RWRegister<u32>,
        pub WRITE_ADDR: RWRegister<u32>,
        pub TRANS_COUNT: RWRegister<u32>,
        pub CTRL_TRIG: RWRegister<u32>,
        pub AL1_CTRL: RWRegister<u32>,
        pub AL1_READ_ADDR: RWRegister<u32>,
        pub AL1_WRITE_ADDR: RWRegister<u32>,
        pub AL1_TRANS_COUNT_TRIG: RWRegister<u32>,
        pub AL2_CTRL: RWRegister<u32>,
        pub AL2_TRANS_COUNT: RWRegister<u32>,
        pub AL2_READ_ADDR: RWRegister<u32>,
        pub AL2_WRITE_ADDR_TRIG: RWRegister<u32>,
        pub AL3_CTRL: RWRegister<u32>,
        pub AL3_WRITE_ADDR: RWRegister<u32>,
        pub AL3_TRANS_COUNT: RWRegister<u32>,
        pub AL3_READ_ADDR_TRIG: RWRegister<u32>,
    }

    #[repr(C)]
    pub struct RegisterBlock {
        pub CH: [ChannelBlock; super::CHANNEL_COUNT],
        _reserved0: [u32; 64],
        pub INTR: RWRegister<u32>,
        pub INTE0: RWRegister<u32>,
        pub INTF0: RWRegister<u32>,
        pub INTS0: RWRegister<u32>,
        _reserved1: u32,
        pub INTE1: RWRegister<u32>,
        pub INTF1: RWRegister<u32>,
        pub INTS1: RWRegister<u32>,
        pub TIMER: [RWRegister<u32>; 4],
        pub MULTI_CHAN_TRIGGER: RWRegister<u32>,
        pub SNIFF_CTRL: RWRegister<u32>,
        pub SNIFF_DATA: RWRegister<u32>,
        _reserved2: u32,
        pub FIFO_LEVELS: RORegister<u32>,
        pub CHAN_ABORT: RWRegister<u32>,
        pub N_CHANNELS: RORegister<u32>,
    }

    /// Channel control register fields
    pub mod CTRL {
        pub mod EN {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod HIGH_PRIORITY {
            pub const offset: u32 = 1;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod DATA_SIZE {
            pub const offset: u32 = 2;
            pub const mask: u32 = 0x3 << offset;
        }
        pub mod INCR_READ {
            pub const offset: u32 = 4;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod INCR_WRITE {
            pub const offset: u32 = 5;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod RING_SIZE {
            pub const offset: u32 = 6;
            pub const mask: u32 = 0xF << offset;
        }
        pub mod RING_SEL {
            pub const offset: u32 = 10;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod CHAIN_TO {
            pub const offset: u32 = 11;
            pub const mask: u32 = 0xF << offset;
        }
        pub mod TREQ_SEL {
            pub const offset: u32 = 15;
            pub const mask: u32 = 0x3F << offset;
        }
        pub mod IRQ_QUIET {
            pub const offset: u32 = 21;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod BSWAP {
            pub const offset: u32 = 22;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod SNIFF_EN {
            pub const offset: u32 = 23;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod BUSY {
            pub const offset: u32 = 24;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod WRITE_ERROR {
            pub const offset: u32 = 29;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod READ_ERROR {
            pub const offset: u32 = 30;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod AHB_ERROR {
            pub const offset: u32 = 31;
            pub const mask: u32 = 0x1 << offset;
        }

        /// Bits that software may write. BUSY and AHB_ERROR are read-only;
        /// the two bus error flags are write-one-to-clear.
        pub const WRITABLE: u32 = EN::mask
            | HIGH_PRIORITY::mask
            | DATA_SIZE::mask
            | INCR_READ::mask
            | INCR_WRITE::mask
            | RING_SIZE::mask
            | RING_SEL::mask
            | CHAIN_TO::mask
            | TREQ_SEL::mask
            | IRQ_QUIET::mask
            | BSWAP::mask
            | SNIFF_EN::mask;
    }
}

pub mod pio {
    use ral_registers::{RORegister, RWRegister, WORegister};

    #[repr(C)]
    pub struct StateMachineBlock {
        pub CLKDIV: RWRegister<u32>,
        pub EXECCTRL: RWRegister<u32>,
        pub SHIFTCTRL: RWRegister<u32>,
        pub ADDR: RORegister<u32>,
        pub INSTR: RWRegister<u32>,
        pub PINCTRL: RWRegister<u32>,
    }

    #[repr(C)]
    pub struct RegisterBlock {
        pub CTRL: RWRegister<u32>,
        pub FSTAT: RORegister<u32>,
        pub FDEBUG: RWRegister<u32>,
        pub FLEVEL: RORegister<u32>,
        pub TXF: [WORegister<u32>; super::STATE_MACHINE_COUNT],
        pub RXF: [RORegister<u32>; super::STATE_MACHINE_COUNT],
        pub IRQ: RWRegister<u32>,
        pub IRQ_FORCE: WORegister<u32>,
        pub INPUT_SYNC_BYPASS: RWRegister<u32>,
        pub DBG_PADOUT: RORegister<u32>,
        pub DBG_PADOE: RORegister<u32>,
        pub DBG_CFGINFO: RORegister<u32>,
        pub INSTR_MEM: [WORegister<u32>; super::INSTRUCTION_COUNT],
        pub SM: [StateMachineBlock; super::STATE_MACHINE_COUNT],
    }

    pub mod CTRL {
        pub mod SM_ENABLE {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0xF << offset;
        }
        pub mod SM_RESTART {
            pub const offset: u32 = 4;
            pub const mask: u32 = 0xF << offset;
        }
        pub mod CLKDIV_RESTART {
            pub const offset: u32 = 8;
            pub const mask: u32 = 0xF << offset;
        }
    }

    pub mod FSTAT {
        pub mod RXFULL {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0xF << offset;
        }
        pub mod RXEMPTY {
            pub const offset: u32 = 8;
            pub const mask: u32 = 0xF << offset;
        }
        pub mod TXFULL {
            pub const offset: u32 = 16;
            pub const mask: u32 = 0xF << offset;
        }
        pub mod TXEMPTY {
            pub const offset: u32 = 24;
            pub const mask: u32 = 0xF << offset;
        }
    }

    pub mod FDEBUG {
        pub mod RXSTALL {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0xF << offset;
        }
        pub mod RXUNDER {
            pub const offset: u32 = 8;
            pub const mask: u32 = 0xF << offset;
        }
    }

    pub mod CLKDIV {
        pub mod FRAC {
            pub const offset: u32 = 8;
            pub const mask: u32 = 0xFF << offset;
        }
        pub mod INT {
            pub const offset: u32 = 16;
            pub const mask: u32 = 0xFFFF << offset;
        }
    }

    pub mod EXECCTRL {
        pub mod WRAP_BOTTOM {
            pub const offset: u32 = 7;
            pub const mask: u32 = 0x1F << offset;
        }
        pub mod WRAP_TOP {
            pub const offset: u32 = 12;
            pub const mask: u32 = 0x1F << offset;
        }
        pub mod JMP_PIN {
            pub const offset: u32 = 24;
            pub const mask: u32 = 0x1F << offset;
        }
        pub mod SIDE_PINDIR {
            pub const offset: u32 = 29;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod SIDE_EN {
            pub const offset: u32 = 30;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod EXEC_STALLED {
            pub const offset: u32 = 31;
            pub const mask: u32 = 0x1 << offset;
        }
    }

    pub mod SHIFTCTRL {
        pub mod AUTOPUSH {
            pub const offset: u32 = 16;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod AUTOPULL {
            pub const offset: u32 = 17;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod IN_SHIFTDIR {
            pub const offset: u32 = 18;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod OUT_SHIFTDIR {
            pub const offset: u32 = 19;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod PUSH_THRESH {
            pub const offset: u32 = 20;
            pub const mask: u32 = 0x1F << offset;
        }
        pub mod PULL_THRESH {
            pub const offset: u32 = 25;
            pub const mask: u32 = 0x1F << offset;
        }
        pub mod FJOIN_TX {
            pub const offset: u32 = 30;
            pub const mask: u32 = 0x1 << offset;
        }
        pub mod FJOIN_RX {
            pub const offset: u32 = 31;
            pub const mask: u32 = 0x1 << offset;
        }
    }

    pub mod PINCTRL {
        pub mod OUT_BASE {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0x1F << offset;
        }
        pub mod SET_BASE {
            pub const offset: u32 = 5;
            pub const mask: u32 = 0x1F << offset;
        }
        pub mod SIDESET_BASE {
            pub const offset: u32 = 10;
            pub const mask: u32 = 0x1F << offset;
        }
        pub mod IN_BASE {
            pub const offset: u32 = 15;
            pub const mask: u32 = 0x1F << offset;
        }
        pub mod OUT_COUNT {
            pub const offset: u32 = 20;
            pub const mask: u32 = 0x3F << offset;
        }
        pub mod SET_COUNT {
            pub const offset: u32 = 26;
            pub const mask: u32 = 0x7 << offset;
        }
        pub mod SIDESET_COUNT {
            pub const offset: u32 = 29;
            pub const mask: u32 = 0x7 << offset;
        }
    }
}

/// Place `value` into the field described by a RAL field module
macro_rules! field {
    ($($seg:ident)::+, $value:expr) => {
        ((($value) as u32) << $($seg)::+::offset) & $($seg)::+::mask
    };
}

/// Extract the field described by a RAL field module from `value`
macro_rules! get_field {
    ($($seg:ident)::+, $value:expr) => {
        (($value) & $($seg)::+::mask) >> $($seg)::+::offset
    };
}

pub(crate) use {field, get_field};

/// Stride between two DMA channel register blocks
pub const CHANNEL_STRIDE: u32 = core::mem::size_of::<dma::ChannelBlock>() as u32;
/// Stride between two PIO state machine register blocks
pub const SM_STRIDE: u32 = core::mem::size_of::<pio::StateMachineBlock>() as u32;

/// Offsets into a DMA channel block
pub mod channel_offset {
    use super::{dma::ChannelBlock, offset_of};
    pub const READ_ADDR: u32 = offset_of!(ChannelBlock, READ_ADDR) as u32;
    pub const WRITE_ADDR: u32 = offset_of!(ChannelBlock, WRITE_ADDR) as u32;
    pub const TRANS_COUNT: u32 = offset_of!(ChannelBlock, TRANS_COUNT) as u32;
    pub const CTRL_TRIG: u32 = offset_of!(ChannelBlock, CTRL_TRIG) as u32;
    pub const AL1_CTRL: u32 = offset_of!(ChannelBlock, AL1_CTRL) as u32;
}

/// Bus address of a register within `channel`'s block
pub const fn channel_register(channel: u8, offset: u32) -> u32 {
    DMA_BASE + channel as u32 * CHANNEL_STRIDE + offset
}

/// Bus addresses of the DMA controller's shared registers
pub mod dma_register {
    use super::{dma::RegisterBlock, offset_of, DMA_BASE};
    pub const INTR: u32 = DMA_BASE + offset_of!(RegisterBlock, INTR) as u32;
    pub const INTE0: u32 = DMA_BASE + offset_of!(RegisterBlock, INTE0) as u32;
    pub const INTF0: u32 = DMA_BASE + offset_of!(RegisterBlock, INTF0) as u32;
    pub const INTS0: u32 = DMA_BASE + offset_of!(RegisterBlock, INTS0) as u32;
    pub const MULTI_CHAN_TRIGGER: u32 =
        DMA_BASE + offset_of!(RegisterBlock, MULTI_CHAN_TRIGGER) as u32;
    pub const CHAN_ABORT: u32 = DMA_BASE + offset_of!(RegisterBlock, CHAN_ABORT) as u32;
    pub const N_CHANNELS: u32 = DMA_BASE + offset_of!(RegisterBlock, N_CHANNELS) as u32;
}

/// Offsets into a PIO block
pub mod pio_offset {
    use super::{
        offset_of,
        pio::{RegisterBlock, StateMachineBlock},
    };
    pub const CTRL: u32 = offset_of!(RegisterBlock, CTRL) as u32;
    pub const FSTAT: u32 = offset_of!(RegisterBlock, FSTAT) as u32;
    pub const FDEBUG: u32 = offset_of!(RegisterBlock, FDEBUG) as u32;
    pub const FLEVEL: u32 = offset_of!(RegisterBlock, FLEVEL) as u32;
    pub const TXF: u32 = offset_of!(RegisterBlock, TXF) as u32;
    pub const RXF: u32 = offset_of!(RegisterBlock, RXF) as u32;
    pub const INSTR_MEM: u32 = offset_of!(RegisterBlock, INSTR_MEM) as u32;
    pub const SM: u32 = offset_of!(RegisterBlock, SM) as u32;

    pub const SM_CLKDIV: u32 = offset_of!(StateMachineBlock, CLKDIV) as u32;
    pub const SM_EXECCTRL: u32 = offset_of!(StateMachineBlock, EXECCTRL) as u32;
    pub const SM_SHIFTCTRL: u32 = offset_of!(StateMachineBlock, SHIFTCTRL) as u32;
    pub const SM_ADDR: u32 = offset_of!(StateMachineBlock, ADDR) as u32;
    pub const SM_INSTR: u32 = offset_of!(StateMachineBlock, INSTR) as u32;
    pub const SM_PINCTRL: u32 = offset_of!(StateMachineBlock, PINCTRL) as u32;
}

/// Bus address of a register within state machine `sm`'s block
pub const fn sm_register(pio_base: u32, sm: u8, offset: u32) -> u32 {
    pio_base + pio_offset::SM + sm as u32 * SM_STRIDE + offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dma_layout_matches_datasheet() {
        assert_eq!(CHANNEL_STRIDE, 0x40);
        assert_eq!(channel_register(0, channel_offset::WRITE_ADDR), 0x5000_0004);
        assert_eq!(channel_register(0, channel_offset::CTRL_TRIG), 0x5000_000C);
        assert_eq!(channel_register(1, channel_offset::READ_ADDR), 0x5000_0040);
        assert_eq!(channel_register(1, channel_offset::AL1_CTRL), 0x5000_0050);
        assert_eq!(dma_register::INTR, 0x5000_0400);
        assert_eq!(dma_register::INTS0, 0x5000_040C);
        assert_eq!(dma_register::MULTI_CHAN_TRIGGER, 0x5000_0430);
        assert_eq!(dma_register::CHAN_ABORT, 0x5000_0444);
        assert_eq!(dma_register::N_CHANNELS, 0x5000_0448);
    }

    #[test]
    fn pio_layout_matches_datasheet() {
        assert_eq!(PIO0_BASE + pio_offset::RXF, 0x5020_0020);
        assert_eq!(pio_offset::INSTR_MEM, 0x48);
        assert_eq!(SM_STRIDE, 0x18);
        assert_eq!(sm_register(PIO0_BASE, 0, pio_offset::SM_CLKDIV), 0x5020_00C8);
        assert_eq!(sm_register(PIO0_BASE, 1, pio_offset::SM_CLKDIV), 0x5020_00E0);
        assert_eq!(sm_register(PIO1_BASE, 3, pio_offset::SM_PINCTRL), 0x5030_0124);
    }

    #[test]
    fn field_macros_mask_out_of_range_values() {
        assert_eq!(field!(dma::CTRL::CHAIN_TO, 0x1F), 0xF << 11);
        assert_eq!(get_field!(dma::CTRL::TREQ_SEL, 0x3F << 15), 0x3F);
    }
}
