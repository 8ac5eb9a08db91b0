//! A software model of the capture hardware
//!
//! [`Simulator`] implements [`RegisterFile`] over a model of the RP2040
//! pieces this crate drives: the DMA controller, both PIO blocks, the GPIO
//! bank and a slice of SRAM. Time advances only through
//! [`step`](Simulator::step), one system clock cycle per call, so tests
//! decide exactly when the hardware moves.
//!
//! The model covers what the capture pipeline relies on:
//!
//! - register aliases, including the four trigger aliases and null triggers;
//! - reload versus live transfer counts, and chain triggers that fire on
//!   completion only if the target is enabled;
//! - DREQ pacing from PIO RX FIFOs, one bus transfer per cycle, round-robin
//!   between ready channels;
//! - CHAN_ABORT with a configurable completion latency;
//! - INTR, INTE0, INTF0 and INTS0;
//! - PIO fractional clock dividers, side-set, delays, wrapping, autopush
//!   with backpressure, FIFO joining and `SM_INSTR` execution;
//! - the rest of the instruction set except IRQ: WAIT, conditional JMP,
//!   OUT, PULL from the TX FIFO, and MOV with invert or bit reversal, plus
//!   the FLEVEL, FSTAT and FDEBUG status registers.
//!
//! Two simplifications: an idle channel reports its reload value from
//! TRANS_COUNT, and write-only PIO instruction memory reads back what was
//! written.

use crate::{
    buffer::CaptureBuffer,
    control::{ChannelId, DataSize},
    ral::{
        dma::CTRL::{
            self, AHB_ERROR, BUSY, CHAIN_TO, DATA_SIZE, EN, INCR_READ, INCR_WRITE, IRQ_QUIET,
            READ_ERROR, TREQ_SEL, WRITE_ERROR,
        },
        dma_register, field, get_field,
        pio::{
            CLKDIV::{FRAC, INT},
            CTRL::{CLKDIV_RESTART, SM_ENABLE, SM_RESTART},
            EXECCTRL::{JMP_PIN, SIDE_EN, SIDE_PINDIR, WRAP_BOTTOM, WRAP_TOP},
            FDEBUG::{RXSTALL, RXUNDER},
            FSTAT::{RXEMPTY, RXFULL, TXEMPTY, TXFULL},
            PINCTRL::{
                IN_BASE, OUT_BASE, OUT_COUNT, SET_BASE, SET_COUNT, SIDESET_BASE, SIDESET_COUNT,
            },
            SHIFTCTRL::{AUTOPUSH, FJOIN_RX, FJOIN_TX, IN_SHIFTDIR, OUT_SHIFTDIR, PUSH_THRESH},
        },
        pio_offset, CHANNEL_COUNT, CHANNEL_STRIDE, DMA_BASE, GPIO_COUNT, INSTRUCTION_COUNT,
        PIO0_BASE, PIO1_BASE, SM_STRIDE, SRAM_BASE, STATE_MACHINE_COUNT,
    },
    register::RegisterFile,
    restart::RestartDescriptor,
};
use core::cell::RefCell;
use heapless::Deque;

/// Words of simulated SRAM, starting at [`SRAM_BASE`]
pub const SRAM_WORDS: usize = 4096;

const DMA_SPAN: u32 = 0x800;
const PIO_SPAN: u32 = 0x1000;
const FIFO_DEPTH: usize = 4;
const JOINED_FIFO_DEPTH: usize = 8;
const GPIO_MASK: u32 = (1 << GPIO_COUNT) - 1;

/// What the hardware did during one or more cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Activity {
    /// Channels whose transfer counter reached zero
    pub completed: u32,
    /// Channels that started a transfer sequence
    pub triggered: u32,
}

impl Activity {
    pub const fn completed(&self, channel: ChannelId) -> bool {
        self.completed & channel.bit() != 0
    }

    pub const fn triggered(&self, channel: ChannelId) -> bool {
        self.triggered & channel.bit() != 0
    }

    fn merge(&mut self, other: Activity) {
        self.completed |= other.completed;
        self.triggered |= other.triggered;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DmaChannel {
    read_addr: u32,
    write_addr: u32,
    reload: u32,
    remaining: u32,
    ctrl: u32,
    busy: bool,
    errors: u32,
}

impl DmaChannel {
    fn ctrl_bits(&self) -> u32 {
        let mut bits = self.ctrl | self.errors;
        if self.errors != 0 {
            bits |= AHB_ERROR::mask;
        }
        if self.busy {
            bits |= BUSY::mask;
        }
        bits
    }

    fn enabled(&self) -> bool {
        self.ctrl & EN::mask != 0
    }
}

#[derive(Debug, Default)]
struct StateMachine {
    clkdiv: u32,
    execctrl: u32,
    shiftctrl: u32,
    pinctrl: u32,
    pc: u8,
    x: u32,
    y: u32,
    isr: u32,
    isr_count: u8,
    osr: u32,
    delay: u8,
    accumulator: u32,
    push_pending: bool,
    rx: Deque<u32, JOINED_FIFO_DEPTH>,
    tx: Deque<u32, JOINED_FIFO_DEPTH>,
}

impl StateMachine {
    fn rx_depth(&self) -> usize {
        if self.shiftctrl & FJOIN_RX::mask != 0 {
            JOINED_FIFO_DEPTH
        } else if self.shiftctrl & FJOIN_TX::mask != 0 {
            0
        } else {
            FIFO_DEPTH
        }
    }

    fn tx_depth(&self) -> usize {
        if self.shiftctrl & FJOIN_TX::mask != 0 {
            JOINED_FIFO_DEPTH
        } else if self.shiftctrl & FJOIN_RX::mask != 0 {
            0
        } else {
            FIFO_DEPTH
        }
    }

    fn rx_full(&self) -> bool {
        self.rx.len() >= self.rx_depth()
    }

    fn tx_full(&self) -> bool {
        self.tx.len() >= self.tx_depth()
    }

    /// Divider in 1/256 cycle units; an integer part of zero means 65536
    fn divider(&self) -> u32 {
        let int = get_field!(INT, self.clkdiv);
        let int = if int == 0 { 0x1_0000 } else { int };
        (int << 8) | get_field!(FRAC, self.clkdiv)
    }

    fn restart(&mut self) {
        self.isr = 0;
        self.isr_count = 0;
        self.osr = 0;
        self.delay = 0;
        self.push_pending = false;
    }

    fn advance(&mut self) {
        let top = get_field!(WRAP_TOP, self.execctrl) as u8;
        self.pc = if self.pc == top {
            get_field!(WRAP_BOTTOM, self.execctrl) as u8
        } else {
            (self.pc + 1) % INSTRUCTION_COUNT as u8
        };
    }

    fn push_threshold(&self) -> u8 {
        match get_field!(PUSH_THRESH, self.shiftctrl) {
            0 => 32,
            bits => bits as u8,
        }
    }

    fn shift_in(&mut self, data: u32, count: u8) {
        let data = if count >= 32 {
            data
        } else {
            data & ((1 << count) - 1)
        };
        if self.shiftctrl & IN_SHIFTDIR::mask != 0 {
            self.isr = if count >= 32 {
                data
            } else {
                (self.isr >> count) | (data << (32 - count))
            };
        } else {
            self.isr = if count >= 32 {
                data
            } else {
                (self.isr << count) | data
            };
        }
        self.isr_count = (self.isr_count + count).min(32);
    }

    fn shift_out(&mut self, count: u8) -> u32 {
        let count = count.min(32);
        let data;
        if self.shiftctrl & OUT_SHIFTDIR::mask != 0 {
            data = if count >= 32 {
                self.osr
            } else {
                self.osr & ((1 << count) - 1)
            };
            self.osr = self.osr.checked_shr(count as u32).unwrap_or(0);
        } else {
            data = self.osr.checked_shr(32 - count as u32).unwrap_or(0);
            self.osr = self.osr.checked_shl(count as u32).unwrap_or(0);
        }
        data
    }
}

#[derive(Debug, Default)]
struct PioBlockModel {
    enabled: u32,
    fdebug: u32,
    instructions: [u16; INSTRUCTION_COUNT],
    sm: [StateMachine; STATE_MACHINE_COUNT],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Instr {
    Jmp { condition: u8, address: u8 },
    Wait { polarity: bool, source: u8, index: u8 },
    In { source: u8, count: u8 },
    Out { destination: u8, count: u8 },
    Push { block: bool },
    Pull { block: bool },
    Mov { destination: u8, op: u8, source: u8 },
    Irq,
    Set { destination: u8, data: u8 },
}

fn decode(instruction: u16) -> Instr {
    let bits_7_5 = ((instruction >> 5) & 0x7) as u8;
    let bits_4_0 = (instruction & 0x1F) as u8;
    let count = if bits_4_0 == 0 { 32 } else { bits_4_0 };
    match instruction >> 13 {
        0b000 => Instr::Jmp {
            condition: bits_7_5,
            address: bits_4_0,
        },
        0b001 => Instr::Wait {
            polarity: instruction & 0x80 != 0,
            source: ((instruction >> 5) & 0x3) as u8,
            index: bits_4_0,
        },
        0b010 => Instr::In {
            source: bits_7_5,
            count,
        },
        0b011 => Instr::Out {
            destination: bits_7_5,
            count,
        },
        0b100 if instruction & 0x80 == 0 => Instr::Push {
            block: instruction & 0x20 != 0,
        },
        0b100 => Instr::Pull {
            block: instruction & 0x20 != 0,
        },
        0b101 => Instr::Mov {
            destination: bits_7_5,
            op: ((instruction >> 3) & 0x3) as u8,
            source: (instruction & 0x7) as u8,
        },
        0b110 => Instr::Irq,
        _ => Instr::Set {
            destination: bits_7_5,
            data: bits_4_0,
        },
    }
}

struct State {
    cycle: u64,
    sram: [u32; SRAM_WORDS],
    next_free: usize,
    dma: [DmaChannel; CHANNEL_COUNT],
    intr: u32,
    inte0: u32,
    intf0: u32,
    abort_pending: u32,
    abort_countdown: u32,
    abort_latency: u32,
    next_channel: usize,
    completions: [u64; CHANNEL_COUNT],
    triggers: [u64; CHANNEL_COUNT],
    bus_errors: u32,
    pio: [PioBlockModel; 2],
    gpio_out: u32,
    gpio_oe: u32,
    inputs: fn(u64) -> u32,
}

fn no_inputs(_: u64) -> u32 {
    0
}

enum Region {
    Sram(usize),
    DmaChannel(usize, u32),
    Dma(u32),
    Pio(usize, u32),
    Unmapped,
}

fn region(address: u32) -> Region {
    let sram_end = SRAM_BASE + 4 * SRAM_WORDS as u32;
    if (SRAM_BASE..sram_end).contains(&address) {
        Region::Sram(((address - SRAM_BASE) / 4) as usize)
    } else if (DMA_BASE..DMA_BASE + CHANNEL_STRIDE * CHANNEL_COUNT as u32).contains(&address) {
        let offset = address - DMA_BASE;
        Region::DmaChannel(
            (offset / CHANNEL_STRIDE) as usize,
            (offset % CHANNEL_STRIDE) & !3,
        )
    } else if (DMA_BASE..DMA_BASE + DMA_SPAN).contains(&address) {
        Region::Dma(address & !3)
    } else if (PIO0_BASE..PIO0_BASE + PIO_SPAN).contains(&address) {
        Region::Pio(0, (address - PIO0_BASE) & !3)
    } else if (PIO1_BASE..PIO1_BASE + PIO_SPAN).contains(&address) {
        Region::Pio(1, (address - PIO1_BASE) & !3)
    } else {
        Region::Unmapped
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ChannelField {
    ReadAddr,
    WriteAddr,
    TransCount,
    Ctrl,
}

/// Which register an offset within a channel block aliases, and whether
/// writing it triggers the channel
fn channel_field(offset: u32) -> (ChannelField, bool) {
    use ChannelField::*;
    match offset {
        0x00 => (ReadAddr, false),
        0x04 => (WriteAddr, false),
        0x08 => (TransCount, false),
        0x0C => (Ctrl, true),
        0x10 => (Ctrl, false),
        0x14 => (ReadAddr, false),
        0x18 => (WriteAddr, false),
        0x1C => (TransCount, true),
        0x20 => (Ctrl, false),
        0x24 => (TransCount, false),
        0x28 => (ReadAddr, false),
        0x2C => (WriteAddr, true),
        0x30 => (Ctrl, false),
        0x34 => (WriteAddr, false),
        0x38 => (TransCount, false),
        _ => (ReadAddr, true),
    }
}

impl State {
    fn new() -> Self {
        State {
            cycle: 0,
            sram: [0; SRAM_WORDS],
            next_free: 0,
            dma: [DmaChannel::default(); CHANNEL_COUNT],
            intr: 0,
            inte0: 0,
            intf0: 0,
            abort_pending: 0,
            abort_countdown: 0,
            abort_latency: 0,
            next_channel: 0,
            completions: [0; CHANNEL_COUNT],
            triggers: [0; CHANNEL_COUNT],
            bus_errors: 0,
            pio: Default::default(),
            gpio_out: 0,
            gpio_oe: 0,
            inputs: no_inputs,
        }
    }

    fn gpio_in(&self) -> u32 {
        let external = (self.inputs)(self.cycle) & GPIO_MASK;
        (external & !self.gpio_oe) | (self.gpio_out & self.gpio_oe)
    }

    fn read(&mut self, address: u32) -> Option<u32> {
        match region(address) {
            Region::Sram(index) => Some(self.sram[index]),
            Region::DmaChannel(channel, offset) => {
                let ch = &self.dma[channel];
                Some(match channel_field(offset).0 {
                    ChannelField::ReadAddr => ch.read_addr,
                    ChannelField::WriteAddr => ch.write_addr,
                    ChannelField::TransCount if ch.busy => ch.remaining,
                    ChannelField::TransCount => ch.reload,
                    ChannelField::Ctrl => ch.ctrl_bits(),
                })
            }
            Region::Dma(address) => self.read_dma(address),
            Region::Pio(block, offset) => self.read_pio(block, offset),
            Region::Unmapped => None,
        }
    }

    fn write(&mut self, address: u32, value: u32) -> Option<Activity> {
        match region(address) {
            Region::Sram(index) => {
                self.sram[index] = value;
                Some(Activity::default())
            }
            Region::DmaChannel(channel, offset) => {
                let (field, trigger) = channel_field(offset);
                let ch = &mut self.dma[channel];
                match field {
                    ChannelField::ReadAddr => ch.read_addr = value,
                    ChannelField::WriteAddr => ch.write_addr = value,
                    ChannelField::TransCount => ch.reload = value,
                    ChannelField::Ctrl => {
                        ch.errors &= !(value & (READ_ERROR::mask | WRITE_ERROR::mask));
                        ch.ctrl = value & CTRL::WRITABLE;
                    }
                }
                let mut activity = Activity::default();
                // A write of zero to a trigger alias is a null trigger.
                if trigger && value != 0 {
                    self.trigger(channel, &mut activity);
                }
                Some(activity)
            }
            Region::Dma(address) => self.write_dma(address, value),
            Region::Pio(block, offset) => {
                self.write_pio(block, offset, value);
                Some(Activity::default())
            }
            Region::Unmapped => None,
        }
    }

    fn read_dma(&mut self, address: u32) -> Option<u32> {
        Some(match address {
            dma_register::INTR => self.intr,
            dma_register::INTE0 => self.inte0,
            dma_register::INTF0 => self.intf0,
            dma_register::INTS0 => (self.intr | self.intf0) & self.inte0,
            dma_register::MULTI_CHAN_TRIGGER => 0,
            dma_register::CHAN_ABORT => {
                self.progress_abort();
                self.abort_pending
            }
            dma_register::N_CHANNELS => CHANNEL_COUNT as u32,
            _ => return None,
        })
    }

    fn write_dma(&mut self, address: u32, value: u32) -> Option<Activity> {
        let mut activity = Activity::default();
        match address {
            dma_register::INTR | dma_register::INTS0 => self.intr &= !value,
            dma_register::INTE0 => self.inte0 = value & channel_bits(),
            dma_register::INTF0 => self.intf0 = value & channel_bits(),
            dma_register::MULTI_CHAN_TRIGGER => {
                for channel in 0..CHANNEL_COUNT {
                    if value & (1 << channel) != 0 {
                        self.trigger(channel, &mut activity);
                    }
                }
            }
            dma_register::CHAN_ABORT => {
                self.abort_pending |= value & channel_bits();
                self.abort_countdown = self.abort_latency;
                self.progress_abort();
            }
            _ => return None,
        }
        Some(activity)
    }

    fn progress_abort(&mut self) {
        if self.abort_pending == 0 {
            return;
        }
        if self.abort_countdown > 0 {
            if self.abort_countdown != u32::MAX {
                self.abort_countdown -= 1;
            }
            return;
        }
        for (index, ch) in self.dma.iter_mut().enumerate() {
            if self.abort_pending & (1 << index) != 0 {
                ch.busy = false;
                ch.remaining = 0;
            }
        }
        self.abort_pending = 0;
    }

    fn trigger(&mut self, channel: usize, activity: &mut Activity) {
        let ch = &mut self.dma[channel];
        if !ch.enabled() || ch.busy {
            return;
        }
        ch.busy = true;
        ch.remaining = ch.reload;
        self.triggers[channel] += 1;
        activity.triggered |= 1 << channel;
    }

    fn complete(&mut self, channel: usize, activity: &mut Activity) {
        let ch = &mut self.dma[channel];
        ch.busy = false;
        let ctrl = ch.ctrl;
        self.completions[channel] += 1;
        activity.completed |= 1 << channel;
        if ctrl & IRQ_QUIET::mask == 0 {
            self.intr |= 1 << channel;
        }
        let chain_to = get_field!(CHAIN_TO, ctrl) as usize;
        if chain_to != channel && chain_to < CHANNEL_COUNT {
            self.trigger(chain_to, activity);
        }
    }

    fn dreq_ready(&self, treq: u32) -> bool {
        match treq {
            0x3F => true,
            0..=15 => {
                let block = &self.pio[(treq / 8) as usize];
                let sm = &block.sm[(treq % 4) as usize];
                if treq % 8 >= 4 {
                    !sm.rx.is_empty()
                } else {
                    !sm.tx_full()
                }
            }
            _ => false,
        }
    }

    fn step_dma(&mut self) -> Activity {
        let mut activity = Activity::default();
        let ready = (0..CHANNEL_COUNT)
            .map(|n| (self.next_channel + n) % CHANNEL_COUNT)
            .find(|&channel| {
                let ch = &self.dma[channel];
                ch.busy && ch.enabled() && self.dreq_ready(get_field!(TREQ_SEL, ch.ctrl))
            });
        let Some(channel) = ready else {
            return activity;
        };
        self.next_channel = (channel + 1) % CHANNEL_COUNT;

        let ch = self.dma[channel];
        if ch.remaining == 0 {
            self.complete(channel, &mut activity);
            return activity;
        }

        let size = match get_field!(DATA_SIZE, ch.ctrl) {
            0 => DataSize::Byte,
            1 => DataSize::HalfWord,
            _ => DataSize::Word,
        };
        let bytes = size.bytes();
        if ch.read_addr % bytes != 0 {
            self.bus_error(channel, READ_ERROR::mask);
            return activity;
        }
        if ch.write_addr % bytes != 0 {
            self.bus_error(channel, WRITE_ERROR::mask);
            return activity;
        }
        let Some(word) = self.read(ch.read_addr & !3) else {
            self.bus_error(channel, READ_ERROR::mask);
            return activity;
        };
        let lane = (ch.read_addr & 3) * 8;
        let data = match size {
            DataSize::Byte => (word >> lane) & 0xFF,
            DataSize::HalfWord => (word >> lane) & 0xFFFF,
            DataSize::Word => word,
        };
        let write = self.write_sized(ch.write_addr, data, size);
        let Some(written) = write else {
            self.bus_error(channel, WRITE_ERROR::mask);
            return activity;
        };
        activity.merge(written);

        let ch = &mut self.dma[channel];
        if ch.ctrl & INCR_READ::mask != 0 {
            ch.read_addr = ch.read_addr.wrapping_add(bytes);
        }
        if ch.ctrl & INCR_WRITE::mask != 0 {
            ch.write_addr = ch.write_addr.wrapping_add(bytes);
        }
        ch.remaining -= 1;
        if ch.remaining == 0 {
            self.complete(channel, &mut activity);
        }
        activity
    }

    fn write_sized(&mut self, address: u32, data: u32, size: DataSize) -> Option<Activity> {
        match (size, region(address)) {
            (DataSize::Word, _) => self.write(address, data),
            (_, Region::Sram(index)) => {
                let lane = (address & 3) * 8;
                let mask = (if size == DataSize::Byte { 0xFF } else { 0xFFFF }) << lane;
                self.sram[index] = (self.sram[index] & !mask) | ((data << lane) & mask);
                Some(Activity::default())
            }
            // Narrow writes are replicated across the bus.
            (DataSize::Byte, _) => self.write(address & !3, data * 0x0101_0101),
            (DataSize::HalfWord, _) => self.write(address & !3, data * 0x0001_0001),
        }
    }

    fn bus_error(&mut self, channel: usize, kind: u32) {
        let ch = &mut self.dma[channel];
        ch.errors |= kind;
        ch.busy = false;
        self.bus_errors += 1;
    }

    fn read_pio(&mut self, block: usize, offset: u32) -> Option<u32> {
        let pio = &mut self.pio[block];
        let sm_end = pio_offset::SM + SM_STRIDE * STATE_MACHINE_COUNT as u32;
        Some(match offset {
            pio_offset::CTRL => field!(SM_ENABLE, pio.enabled),
            pio_offset::FSTAT => {
                let mut fstat = 0;
                for (index, sm) in pio.sm.iter().enumerate() {
                    let bit = 1 << index;
                    if sm.rx_full() {
                        fstat |= field!(RXFULL, bit);
                    }
                    if sm.rx.is_empty() {
                        fstat |= field!(RXEMPTY, bit);
                    }
                    if sm.tx_full() {
                        fstat |= field!(TXFULL, bit);
                    }
                    if sm.tx.is_empty() {
                        fstat |= field!(TXEMPTY, bit);
                    }
                }
                fstat
            }
            pio_offset::FDEBUG => pio.fdebug,
            pio_offset::FLEVEL => pio.sm.iter().enumerate().fold(0, |level, (index, sm)| {
                level
                    | (sm.tx.len() as u32) << (8 * index)
                    | (sm.rx.len() as u32) << (8 * index + 4)
            }),
            offset if (pio_offset::RXF..pio_offset::RXF + 16).contains(&offset) => {
                let index = ((offset - pio_offset::RXF) / 4) as usize;
                match pio.sm[index].rx.pop_front() {
                    Some(word) => word,
                    None => {
                        pio.fdebug |= field!(RXUNDER, 1 << index);
                        0
                    }
                }
            }
            offset
                if (pio_offset::INSTR_MEM..pio_offset::INSTR_MEM + 4 * INSTRUCTION_COUNT as u32)
                    .contains(&offset) =>
            {
                pio.instructions[((offset - pio_offset::INSTR_MEM) / 4) as usize] as u32
            }
            offset if (pio_offset::SM..sm_end).contains(&offset) => {
                let sm = &pio.sm[((offset - pio_offset::SM) / SM_STRIDE) as usize];
                match (offset - pio_offset::SM) % SM_STRIDE {
                    pio_offset::SM_CLKDIV => sm.clkdiv,
                    pio_offset::SM_EXECCTRL => sm.execctrl,
                    pio_offset::SM_SHIFTCTRL => sm.shiftctrl,
                    pio_offset::SM_ADDR => sm.pc as u32,
                    pio_offset::SM_INSTR => pio.instructions[sm.pc as usize] as u32,
                    _ => sm.pinctrl,
                }
            }
            _ => 0,
        })
    }

    fn write_pio(&mut self, block: usize, offset: u32, value: u32) {
        let sm_end = pio_offset::SM + SM_STRIDE * STATE_MACHINE_COUNT as u32;
        let pio = &mut self.pio[block];
        match offset {
            pio_offset::CTRL => {
                pio.enabled = get_field!(SM_ENABLE, value);
                for (index, sm) in pio.sm.iter_mut().enumerate() {
                    if get_field!(SM_RESTART, value) & (1 << index) != 0 {
                        sm.restart();
                    }
                    if get_field!(CLKDIV_RESTART, value) & (1 << index) != 0 {
                        sm.accumulator = 0;
                    }
                }
            }
            pio_offset::FDEBUG => pio.fdebug &= !value,
            offset if (pio_offset::TXF..pio_offset::TXF + 16).contains(&offset) => {
                let sm = &mut pio.sm[((offset - pio_offset::TXF) / 4) as usize];
                if !sm.tx_full() {
                    // Capacity is the joined depth, so this can't fail.
                    let _ = sm.tx.push_back(value);
                }
            }
            offset
                if (pio_offset::INSTR_MEM..pio_offset::INSTR_MEM + 4 * INSTRUCTION_COUNT as u32)
                    .contains(&offset) =>
            {
                pio.instructions[((offset - pio_offset::INSTR_MEM) / 4) as usize] = value as u16;
            }
            offset if (pio_offset::SM..sm_end).contains(&offset) => {
                let index = ((offset - pio_offset::SM) / SM_STRIDE) as usize;
                let sm = &mut pio.sm[index];
                match (offset - pio_offset::SM) % SM_STRIDE {
                    pio_offset::SM_CLKDIV => sm.clkdiv = value,
                    pio_offset::SM_EXECCTRL => sm.execctrl = value,
                    pio_offset::SM_SHIFTCTRL => {
                        let joins = FJOIN_RX::mask | FJOIN_TX::mask;
                        if (sm.shiftctrl ^ value) & joins != 0 {
                            sm.rx.clear();
                            sm.tx.clear();
                        }
                        sm.shiftctrl = value;
                    }
                    pio_offset::SM_INSTR => self.execute(block, index, value as u16, true),
                    pio_offset::SM_PINCTRL => sm.pinctrl = value,
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn step_pio(&mut self) {
        for block in 0..self.pio.len() {
            for index in 0..STATE_MACHINE_COUNT {
                if self.pio[block].enabled & (1 << index) == 0 {
                    continue;
                }
                let sm = &mut self.pio[block].sm[index];
                sm.accumulator += 1 << 8;
                let divider = sm.divider();
                if sm.accumulator < divider {
                    continue;
                }
                sm.accumulator -= divider;
                if sm.delay > 0 {
                    sm.delay -= 1;
                    continue;
                }
                let pc = sm.pc as usize;
                let instruction = self.pio[block].instructions[pc];
                self.execute(block, index, instruction, false);
            }
        }
    }

    /// Drive `count` pins starting at `base` to `value`, wrapping at 32
    fn drive(&mut self, base: u32, count: u32, value: u32, directions: bool) {
        for bit in 0..count.min(32) {
            let pin = (base + bit) % 32;
            if pin >= GPIO_COUNT as u32 {
                continue;
            }
            let target = if directions {
                &mut self.gpio_oe
            } else {
                &mut self.gpio_out
            };
            if value & (1 << bit) != 0 {
                *target |= 1 << pin;
            } else {
                *target &= !(1 << pin);
            }
        }
    }

    /// Run one instruction on a state machine
    ///
    /// `forced` instructions come from SM_INSTR; they run whether or not
    /// the state machine is enabled and don't advance its program counter.
    fn execute(&mut self, block: usize, index: usize, instruction: u16, forced: bool) {
        let (pinctrl, execctrl) = {
            let sm = &self.pio[block].sm[index];
            (sm.pinctrl, sm.execctrl)
        };

        let side_count = get_field!(SIDESET_COUNT, pinctrl).min(5);
        let side_enabled = execctrl & SIDE_EN::mask != 0;
        let field = ((instruction >> 8) & 0x1F) as u32;
        let delay = field & ((1 << (5 - side_count)) - 1);
        if side_count > 0 {
            let value_bits = side_count - side_enabled as u32;
            let enable = !side_enabled || field & 0x10 != 0;
            if enable && value_bits > 0 {
                let value = (field >> (5 - side_count)) & ((1 << value_bits) - 1);
                self.drive(
                    get_field!(SIDESET_BASE, pinctrl),
                    value_bits,
                    value,
                    execctrl & SIDE_PINDIR::mask != 0,
                );
            }
        }

        let gpio = self.gpio_in();
        let pins = gpio.rotate_right(get_field!(IN_BASE, pinctrl));
        let out_pins = (get_field!(OUT_BASE, pinctrl), get_field!(OUT_COUNT, pinctrl));
        let mut jump = None;
        let mut stalled = false;
        // (base, count, value, directions)
        let mut pin_write = None;

        let pio = &mut self.pio[block];
        let sm = &mut pio.sm[index];
        match decode(instruction) {
            Instr::Jmp { condition, address } => {
                let taken = match condition {
                    0 => true,
                    1 => sm.x == 0,
                    2 => {
                        let taken = sm.x != 0;
                        sm.x = sm.x.wrapping_sub(1);
                        taken
                    }
                    3 => sm.y == 0,
                    4 => {
                        let taken = sm.y != 0;
                        sm.y = sm.y.wrapping_sub(1);
                        taken
                    }
                    5 => sm.x != sm.y,
                    6 => gpio & (1 << get_field!(JMP_PIN, execctrl)) != 0,
                    _ => false,
                };
                if taken {
                    jump = Some(address);
                }
            }
            Instr::Wait {
                polarity,
                source,
                index: pin,
            } => {
                let level = match source {
                    0 => gpio & (1 << pin) != 0,
                    1 => pins & (1 << pin) != 0,
                    _ => polarity,
                };
                stalled = level != polarity && !forced;
            }
            Instr::In { source, count } => {
                if sm.push_pending {
                    if sm.rx_full() {
                        stalled = true;
                    } else {
                        let _ = sm.rx.push_back(sm.isr);
                        sm.isr = 0;
                        sm.isr_count = 0;
                        sm.push_pending = false;
                    }
                } else {
                    let data = match source {
                        0 => pins,
                        1 => sm.x,
                        2 => sm.y,
                        6 => sm.isr,
                        7 => sm.osr,
                        _ => 0,
                    };
                    sm.shift_in(data, count);
                    if sm.shiftctrl & AUTOPUSH::mask != 0 && sm.isr_count >= sm.push_threshold() {
                        if sm.rx_full() {
                            sm.push_pending = true;
                            stalled = true;
                        } else {
                            let _ = sm.rx.push_back(sm.isr);
                            sm.isr = 0;
                            sm.isr_count = 0;
                        }
                    }
                }
            }
            Instr::Out { destination, count } => {
                let data = sm.shift_out(count);
                match destination {
                    0 => pin_write = Some((out_pins.0, out_pins.1, data, false)),
                    1 => sm.x = data,
                    2 => sm.y = data,
                    4 => pin_write = Some((out_pins.0, out_pins.1, data, true)),
                    5 => jump = Some(data as u8 & 0x1F),
                    6 => sm.isr = data,
                    _ => {}
                }
            }
            Instr::Push { block: blocking } => {
                if !sm.rx_full() {
                    let _ = sm.rx.push_back(sm.isr);
                    sm.isr = 0;
                    sm.isr_count = 0;
                } else if blocking && !forced {
                    stalled = true;
                } else {
                    sm.isr = 0;
                    sm.isr_count = 0;
                }
            }
            Instr::Pull { block: blocking } => match sm.tx.pop_front() {
                Some(word) => sm.osr = word,
                None if blocking && !forced => stalled = true,
                None => sm.osr = sm.x,
            },
            Instr::Mov {
                destination,
                op,
                source,
            } => {
                let data = match source {
                    0 => pins,
                    1 => sm.x,
                    2 => sm.y,
                    6 => sm.isr,
                    7 => sm.osr,
                    _ => 0,
                };
                let data = match op {
                    1 => !data,
                    2 => data.reverse_bits(),
                    _ => data,
                };
                match destination {
                    0 => pin_write = Some((out_pins.0, out_pins.1, data, false)),
                    1 => sm.x = data,
                    2 => sm.y = data,
                    5 => jump = Some(data as u8 & 0x1F),
                    6 => {
                        sm.isr = data;
                        sm.isr_count = 0;
                    }
                    7 => sm.osr = data,
                    _ => {}
                }
            }
            Instr::Irq => {}
            Instr::Set { destination, data } => {
                let set_pins = (get_field!(SET_BASE, pinctrl), get_field!(SET_COUNT, pinctrl));
                match destination {
                    0 => pin_write = Some((set_pins.0, set_pins.1, data as u32, false)),
                    1 => sm.x = data as u32,
                    2 => sm.y = data as u32,
                    4 => pin_write = Some((set_pins.0, set_pins.1, data as u32, true)),
                    _ => {}
                }
            }
        }

        if stalled {
            if matches!(decode(instruction), Instr::In { .. } | Instr::Push { .. }) {
                pio.fdebug |= field!(RXSTALL, 1 << index);
            }
            return;
        }
        sm.delay = delay as u8;
        match jump {
            Some(address) => sm.pc = address,
            None if forced => {}
            None => sm.advance(),
        }
        if let Some((base, count, value, directions)) = pin_write {
            self.drive(base, count, value, directions);
        }
    }
}

fn channel_bits() -> u32 {
    (1 << CHANNEL_COUNT) - 1
}

/// The simulated bus
///
/// See the [module documentation](self) for what's modelled.
pub struct Simulator {
    state: RefCell<State>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// Everything at reset, SRAM zeroed, inputs low
    pub fn new() -> Self {
        Simulator {
            state: RefCell::new(State::new()),
        }
    }

    /// Reserve `words` words of SRAM for a capture buffer
    pub fn allocate_buffer(&self, words: usize) -> Option<CaptureBuffer> {
        let origin = self.allocate(words)?;
        // Safety: the bump allocator never hands out the same words twice.
        Some(unsafe { CaptureBuffer::from_raw_parts(origin, words) })
    }

    /// Reserve one word of SRAM for a restart descriptor
    pub fn allocate_descriptor(&self) -> Option<RestartDescriptor> {
        let address = self.allocate(1)?;
        // Safety: as above.
        Some(unsafe { RestartDescriptor::from_raw(address) })
    }

    fn allocate(&self, words: usize) -> Option<u32> {
        let mut state = self.state.borrow_mut();
        let start = state.next_free;
        let end = start.checked_add(words)?;
        if end > SRAM_WORDS {
            return None;
        }
        state.next_free = end;
        Some(SRAM_BASE + 4 * start as u32)
    }

    /// Set every word of `buffer` to `value`
    pub fn fill(&self, buffer: &CaptureBuffer, value: u32) {
        for index in 0..buffer.len() {
            if let Some(address) = buffer.address_of(index) {
                self.poke(address, value);
            }
        }
    }

    /// Read SRAM without side effects
    ///
    /// # Panics
    ///
    /// Panics if `address` isn't simulated SRAM.
    pub fn peek(&self, address: u32) -> u32 {
        match region(address) {
            Region::Sram(index) => self.state.borrow().sram[index],
            _ => panic!("{address:#010X} is not simulated SRAM"),
        }
    }

    /// Write SRAM without side effects
    ///
    /// # Panics
    ///
    /// Panics if `address` isn't simulated SRAM.
    pub fn poke(&self, address: u32, value: u32) {
        match region(address) {
            Region::Sram(index) => self.state.borrow_mut().sram[index] = value,
            _ => panic!("{address:#010X} is not simulated SRAM"),
        }
    }

    /// Drive the external GPIO inputs from a function of the cycle count
    pub fn set_inputs(&self, inputs: fn(u64) -> u32) {
        self.state.borrow_mut().inputs = inputs;
    }

    /// CHAN_ABORT reads that pass before a requested abort completes
    ///
    /// `u32::MAX` models a controller that never completes the abort.
    pub fn set_abort_latency(&self, reads: u32) {
        self.state.borrow_mut().abort_latency = reads;
    }

    /// Advance one system clock cycle
    pub fn step(&self) -> Activity {
        let mut state = self.state.borrow_mut();
        state.step_pio();
        let activity = state.step_dma();
        state.cycle += 1;
        activity
    }

    /// Advance `cycles` cycles
    pub fn run(&self, cycles: u64) -> Activity {
        let mut activity = Activity::default();
        for _ in 0..cycles {
            activity.merge(self.step());
        }
        activity
    }

    /// Step until `done` returns `true`, at most `limit` cycles
    ///
    /// Returns `false` if the limit was reached first.
    pub fn run_until(&self, limit: u64, mut done: impl FnMut(&Self) -> bool) -> bool {
        for _ in 0..limit {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    /// Cycles simulated so far
    pub fn cycle(&self) -> u64 {
        self.state.borrow().cycle
    }

    /// Number of times `channel` finished a transfer sequence
    pub fn completions(&self, channel: ChannelId) -> u64 {
        self.state.borrow().completions[channel.index() as usize]
    }

    /// Number of times `channel` was triggered while enabled and idle
    pub fn triggers(&self, channel: ChannelId) -> u64 {
        self.state.borrow().triggers[channel.index() as usize]
    }

    /// Level of GPIO `pin`, whoever drives it
    pub fn gpio_level(&self, pin: u8) -> bool {
        self.state.borrow().gpio_in() & (1 << pin) != 0
    }

    /// Returns `true` if `pin` is an output
    pub fn gpio_is_output(&self, pin: u8) -> bool {
        self.state.borrow().gpio_oe & (1 << pin) != 0
    }

    /// Accesses that hit no simulated device
    pub fn bus_errors(&self) -> u32 {
        self.state.borrow().bus_errors
    }
}

impl RegisterFile for Simulator {
    fn read(&self, address: u32) -> u32 {
        let mut state = self.state.borrow_mut();
        state.read(address).unwrap_or_else(|| {
            state.bus_errors += 1;
            0
        })
    }

    fn write(&self, address: u32, value: u32) {
        let mut state = self.state.borrow_mut();
        if state.write(address, value).is_none() {
            state.bus_errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ral::{channel_register, sm_register};

    fn ch(index: u8) -> ChannelId {
        ChannelId::new(index).unwrap()
    }

    const UNPACED_WORD_COPY: u32 = (0x3F << 15) | (2 << 2) | 1;

    #[test]
    fn trigger_aliases_start_enabled_channels() {
        let sim = Simulator::new();
        let src = sim.allocate_buffer(1).unwrap();
        let dst = sim.allocate_buffer(1).unwrap();
        sim.poke(src.origin(), 0x1234_5678);

        sim.write(channel_register(2, 0x00), src.origin());
        sim.write(channel_register(2, 0x04), dst.origin());
        sim.write(channel_register(2, 0x08), 1);
        // Non-triggering alias arms only.
        sim.write(channel_register(2, 0x10), UNPACED_WORD_COPY);
        assert_eq!(sim.run(4), Activity::default());

        sim.write(channel_register(2, 0x0C), UNPACED_WORD_COPY);
        assert_eq!(sim.triggers(ch(2)), 1);
        assert!(sim.run(2).completed(ch(2)));
        assert_eq!(sim.peek(dst.origin()), 0x1234_5678);
    }

    #[test]
    fn null_trigger_does_nothing() {
        let sim = Simulator::new();
        sim.write(channel_register(0, 0x10), UNPACED_WORD_COPY);
        sim.write(channel_register(0, 0x3C), 0);
        assert_eq!(sim.triggers(ch(0)), 0);
    }

    #[test]
    fn disabled_channels_ignore_triggers() {
        let sim = Simulator::new();
        sim.write(channel_register(0, 0x08), 1);
        sim.write(dma_register::MULTI_CHAN_TRIGGER, 1);
        assert_eq!(sim.triggers(ch(0)), 0);
        assert_eq!(sim.read(channel_register(0, 0x10)) & BUSY::mask, 0);
    }

    #[test]
    fn completion_raises_interrupt_unless_quiet() {
        let sim = Simulator::new();
        let word = sim.allocate_buffer(1).unwrap();
        for (channel, quiet) in [(0u8, false), (1, true)] {
            sim.write(channel_register(channel, 0x00), word.origin());
            sim.write(channel_register(channel, 0x04), word.origin());
            sim.write(channel_register(channel, 0x08), 1);
            sim.write(
                channel_register(channel, 0x10),
                UNPACED_WORD_COPY | field!(IRQ_QUIET, quiet) | field!(CHAIN_TO, channel),
            );
        }
        sim.write(dma_register::INTE0, 0b11);
        sim.write(dma_register::MULTI_CHAN_TRIGGER, 0b11);
        sim.run(4);
        assert_eq!(sim.read(dma_register::INTR), 0b01);
        assert_eq!(sim.read(dma_register::INTS0), 0b01);
        sim.write(dma_register::INTS0, 0b01);
        assert_eq!(sim.read(dma_register::INTS0), 0);
    }

    #[test]
    fn unmapped_accesses_are_counted() {
        let sim = Simulator::new();
        assert_eq!(sim.read(0x4000_0000), 0);
        sim.write(0x4000_0000, 1);
        assert_eq!(sim.bus_errors(), 2);
    }

    #[test]
    fn sram_is_exhausted_eventually() {
        let sim = Simulator::new();
        assert!(sim.allocate_buffer(SRAM_WORDS - 1).is_some());
        assert!(sim.allocate_descriptor().is_some());
        assert!(sim.allocate_descriptor().is_none());
    }

    /// Load `program` into PIO0 and point SM0 at it, one instruction per cycle
    fn load(sim: &Simulator, program: &[u16], execctrl: u32, shiftctrl: u32, pinctrl: u32) {
        let sm = |offset| sm_register(PIO0_BASE, 0, offset);
        for (slot, &instruction) in program.iter().enumerate() {
            sim.write(
                PIO0_BASE + pio_offset::INSTR_MEM + 4 * slot as u32,
                instruction as u32,
            );
        }
        sim.write(sm(pio_offset::SM_CLKDIV), field!(INT, 1));
        sim.write(
            sm(pio_offset::SM_EXECCTRL),
            execctrl | field!(WRAP_TOP, program.len() as u32 - 1) | field!(WRAP_BOTTOM, 0),
        );
        sim.write(sm(pio_offset::SM_SHIFTCTRL), shiftctrl);
        sim.write(sm(pio_offset::SM_PINCTRL), pinctrl);
    }

    fn exec(sim: &Simulator, instruction: u16) {
        sim.write(
            sm_register(PIO0_BASE, 0, pio_offset::SM_INSTR),
            instruction as u32,
        );
    }

    fn enable_sm0(sim: &Simulator, enable: bool) {
        sim.write(PIO0_BASE + pio_offset::CTRL, field!(SM_ENABLE, enable));
    }

    #[test]
    fn tx_fifo_feeds_out_pins() {
        const PULL_BLOCK: u16 = 0x80A0;
        const OUT_PINS_8: u16 = 0x6008;
        const OUT_PINDIRS_8: u16 = 0x6088;
        let sim = Simulator::new();
        load(
            &sim,
            &[PULL_BLOCK, OUT_PINS_8],
            0,
            field!(OUT_SHIFTDIR, 1),
            field!(OUT_BASE, 12) | field!(OUT_COUNT, 8),
        );
        let txf = PIO0_BASE + pio_offset::TXF;
        sim.write(txf, 0xFF);
        exec(&sim, PULL_BLOCK);
        exec(&sim, OUT_PINDIRS_8);
        assert!((12..20).all(|pin| sim.gpio_is_output(pin)));

        sim.write(txf, 0xA5);
        assert_eq!(sim.read(PIO0_BASE + pio_offset::FLEVEL) & 0xF, 1);
        assert_eq!(sim.read(PIO0_BASE + pio_offset::FSTAT) & field!(TXEMPTY, 1), 0);

        enable_sm0(&sim, true);
        sim.run(2);
        for bit in 0..8 {
            assert_eq!(sim.gpio_level(12 + bit), 0xA5 & (1 << bit) != 0);
        }
        assert_ne!(sim.read(PIO0_BASE + pio_offset::FSTAT) & field!(TXEMPTY, 1), 0);

        // An empty TX FIFO stalls the blocking pull.
        sim.run(5);
        assert_eq!(sim.read(sm_register(PIO0_BASE, 0, pio_offset::SM_ADDR)), 0);
    }

    #[test]
    fn counted_loop_and_mov_operations() {
        let sim = Simulator::new();
        load(
            &sim,
            &[
                0xE023, // set x, 3
                0x0041, // jmp x-- 1
                0xE046, // set y, 6
                0xA02A, // mov x, ~y
                0xA0D1, // mov isr, ::x
                0x8020, // push block
            ],
            0,
            0,
            0,
        );
        enable_sm0(&sim, true);
        // The jmp runs four times: three taken, one falling through.
        sim.run(9);
        enable_sm0(&sim, false);

        let flevel = sim.read(PIO0_BASE + pio_offset::FLEVEL);
        assert_eq!((flevel >> 4) & 0xF, 1);
        assert_eq!(sim.read(PIO0_BASE + pio_offset::RXF), 0x9FFF_FFFF);
        assert_ne!(sim.read(PIO0_BASE + pio_offset::FSTAT) & field!(RXEMPTY, 1), 0);

        assert_eq!(sim.read(PIO0_BASE + pio_offset::RXF), 0);
        assert_ne!(sim.read(PIO0_BASE + pio_offset::FDEBUG) & field!(RXUNDER, 1), 0);
    }

    #[test]
    fn wait_and_jmp_pin_follow_gpio() {
        const IN_X_32: u16 = 0x4020;
        const PUSH_NOBLOCK: u16 = 0x8000;
        let sim = Simulator::new();
        sim.set_inputs(|cycle| if cycle >= 10 { 1 << 5 } else { 0 });
        load(
            &sim,
            &[
                0x2085, // wait 1 gpio 5
                0x00C3, // jmp pin 3
                0xE021, // set x, 1
                0xE022, // set x, 2
            ],
            field!(JMP_PIN, 5),
            0,
            0,
        );
        enable_sm0(&sim, true);
        sim.run(5);
        assert_eq!(sim.read(sm_register(PIO0_BASE, 0, pio_offset::SM_ADDR)), 0);

        sim.run(20);
        enable_sm0(&sim, false);
        exec(&sim, IN_X_32);
        exec(&sim, PUSH_NOBLOCK);
        assert_eq!(sim.read(PIO0_BASE + pio_offset::RXF), 2);
    }

    #[test]
    fn decodes_pio_instructions() {
        assert_eq!(
            decode(0x400A),
            Instr::In {
                source: 0,
                count: 10
            }
        );
        assert_eq!(
            decode(0xA042),
            Instr::Mov {
                destination: 2,
                op: 0,
                source: 2
            }
        );
        assert_eq!(
            decode(0xE081),
            Instr::Set {
                destination: 4,
                data: 1
            }
        );
        assert_eq!(
            decode(0x0005),
            Instr::Jmp {
                condition: 0,
                address: 5
            }
        );
    }
}
