//! DMA channel

use crate::{
    control::{self, ChannelId, ControlWord},
    ral::{channel_offset, channel_register, dma::CTRL, dma_register},
    register::RegisterFile,
};

/// A DMA channel
///
/// A `Channel` names one channel of the DMA controller and provides named
/// operations on its registers. Creating a `Channel` doesn't touch the
/// hardware.
///
/// Register writes that could start a transfer are `unsafe`; everything
/// else only changes configuration that takes effect on the next trigger.
pub struct Channel<'r, R: RegisterFile> {
    id: ChannelId,
    regs: &'r R,
}

impl<'r, R: RegisterFile> Channel<'r, R> {
    /// Creates a handle to channel `id` on the bus `regs`
    pub const fn new(regs: &'r R, id: ChannelId) -> Self {
        Channel { id, regs }
    }

    /// Returns the DMA channel number
    pub const fn id(&self) -> ChannelId {
        self.id
    }

    /// The bus this channel lives on
    pub const fn regs(&self) -> &'r R {
        self.regs
    }

    fn register(&self, offset: u32) -> u32 {
        channel_register(self.id.index(), offset)
    }

    /// Bus address of this channel's WRITE_ADDR register
    ///
    /// Another channel writing to this address redirects this channel's
    /// next transfer.
    pub fn write_address_register(&self) -> u32 {
        self.register(channel_offset::WRITE_ADDR)
    }

    /// The address of the next read
    pub fn read_address(&self) -> u32 {
        self.regs.read(self.register(channel_offset::READ_ADDR))
    }

    /// Set the source address for the next transfer
    pub fn set_read_address(&self, address: u32) {
        self.regs.write(self.register(channel_offset::READ_ADDR), address);
    }

    /// The address of the next write
    pub fn write_address(&self) -> u32 {
        self.regs.read(self.write_address_register())
    }

    /// Set the destination address for the next transfer
    pub fn set_write_address(&self, address: u32) {
        self.regs.write(self.write_address_register(), address);
    }

    /// Transfers remaining in the current sequence
    pub fn transfer_count(&self) -> u32 {
        self.regs.read(self.register(channel_offset::TRANS_COUNT))
    }

    /// Set the number of transfers loaded on every trigger
    pub fn set_transfer_count(&self, count: u32) {
        self.regs
            .write(self.register(channel_offset::TRANS_COUNT), count);
    }

    /// Raw CTRL register value, including status bits
    pub fn control_bits(&self) -> u32 {
        self.regs.read(self.register(channel_offset::AL1_CTRL))
    }

    /// Decoded CTRL register
    pub fn control(&self) -> Option<ControlWord> {
        ControlWord::from_bits(self.control_bits())
    }

    /// Write the control register through its non-triggering alias
    ///
    /// An enabled channel becomes armed. It starts once something triggers
    /// it, like a chained channel or [`trigger`](Channel::trigger).
    pub fn set_control(&self, ctrl: ControlWord) {
        self.regs
            .write(self.register(channel_offset::AL1_CTRL), ctrl.bits());
    }

    /// Write the control register and trigger the channel
    ///
    /// # Safety
    ///
    /// This could initiate a DMA transaction that uses an invalid source or
    /// destination. Caller must ensure that the addresses and count set in
    /// the channel are valid for the lifetime of the transfer.
    pub unsafe fn set_control_and_trigger(&self, ctrl: ControlWord) {
        self.regs
            .write(self.register(channel_offset::CTRL_TRIG), ctrl.bits());
    }

    /// Start the channel with its current configuration
    ///
    /// Has no effect if the channel is disabled or already busy.
    ///
    /// # Safety
    ///
    /// Same as [`set_control_and_trigger`](Channel::set_control_and_trigger).
    pub unsafe fn trigger(&self) {
        self.regs
            .write(dma_register::MULTI_CHAN_TRIGGER, self.id.bit());
    }

    /// Indicates if this DMA channel is actively transferring data
    pub fn is_busy(&self) -> bool {
        self.control_bits() & CTRL::BUSY::mask != 0
    }

    /// Indicates if this DMA channel responds to triggers
    pub fn is_enabled(&self) -> bool {
        self.control_bits() & CTRL::EN::mask != 0
    }

    /// Indicates if the channel saw a bus error
    pub fn is_error(&self) -> bool {
        self.control_bits() & CTRL::AHB_ERROR::mask != 0
    }

    /// Clear EN, leaving every other field as it is
    ///
    /// A busy channel pauses; an idle one ignores triggers.
    pub fn disable(&self) {
        critical_section::with(|_| {
            let bits = control::writable(self.control_bits()) & !CTRL::EN::mask;
            self.regs
                .write(self.register(channel_offset::AL1_CTRL), bits);
        });
    }

    /// Returns `true` if this channel raised DMA_IRQ_0
    pub fn is_interrupt(&self) -> bool {
        self.regs.read(dma_register::INTS0) & self.id.bit() != 0
    }

    /// Clear this channel's interrupt flag
    pub fn clear_interrupt(&self) {
        // INTS0 is write-one-to-clear; other channels are unaffected.
        self.regs.write(dma_register::INTS0, self.id.bit());
    }

    /// Route this channel's completion interrupt to DMA_IRQ_0
    pub fn set_interrupt_enable(&self, enable: bool) {
        critical_section::with(|_| {
            let inte = self.regs.read(dma_register::INTE0);
            let inte = if enable {
                inte | self.id.bit()
            } else {
                inte & !self.id.bit()
            };
            self.regs.write(dma_register::INTE0, inte);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{control::TransferRequest, sim::Simulator};

    fn ch(index: u8) -> ChannelId {
        ChannelId::new(index).unwrap()
    }

    #[test]
    fn named_registers_round_trip() {
        let sim = Simulator::new();
        let channel = Channel::new(&sim, ch(5));
        channel.set_read_address(0x2000_0100);
        channel.set_write_address(0x2000_0200);
        channel.set_transfer_count(17);
        assert_eq!(channel.read_address(), 0x2000_0100);
        assert_eq!(channel.write_address(), 0x2000_0200);
        assert_eq!(channel.transfer_count(), 17);
        assert_eq!(channel.write_address_register(), 0x5000_0144);
    }

    #[test]
    fn set_control_arms_without_starting() {
        let sim = Simulator::new();
        let channel = Channel::new(&sim, ch(2));
        let ctrl = ControlWord {
            en: true,
            treq_sel: TransferRequest::UNPACED,
            ..ControlWord::new(ch(2))
        };
        channel.set_control(ctrl);
        assert!(channel.is_enabled());
        assert!(!channel.is_busy());
        assert_eq!(channel.control(), Some(ctrl));
    }

    #[test]
    fn disable_keeps_other_fields() {
        let sim = Simulator::new();
        let channel = Channel::new(&sim, ch(0));
        let ctrl = ControlWord {
            en: true,
            incr_write: true,
            irq_quiet: true,
            chain_to: ch(1),
            ..ControlWord::new(ch(0))
        };
        channel.set_control(ctrl);
        channel.disable();
        assert_eq!(channel.control(), Some(ControlWord { en: false, ..ctrl }));
    }

    #[test]
    fn interrupt_enable_is_per_channel() {
        let sim = Simulator::new();
        let a = Channel::new(&sim, ch(0));
        let b = Channel::new(&sim, ch(7));
        a.set_interrupt_enable(true);
        b.set_interrupt_enable(true);
        a.set_interrupt_enable(false);
        assert_eq!(sim.read(dma_register::INTE0), ch(7).bit());
    }
}
