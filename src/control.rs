//! DMA channel control words

use crate::ral::{
    dma::CTRL::{
        self, CHAIN_TO, DATA_SIZE, EN, HIGH_PRIORITY, INCR_READ, INCR_WRITE, IRQ_QUIET, RING_SEL,
        RING_SIZE, TREQ_SEL,
    },
    field, get_field, CHANNEL_COUNT,
};
use core::fmt;

/// A DMA channel number
///
/// Always within the half-open range `[0, CHANNEL_COUNT)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u8);

impl ChannelId {
    /// Returns `None` if `index` doesn't name one of the twelve channels
    pub const fn new(index: u8) -> Option<Self> {
        if (index as usize) < CHANNEL_COUNT {
            Some(ChannelId(index))
        } else {
            None
        }
    }

    /// The channel number
    pub const fn index(self) -> u8 {
        self.0
    }

    /// This channel's bit in per-channel registers like CHAN_ABORT or INTE0
    pub const fn bit(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DMA{}", self.0)
    }
}

/// Transfer request signal that paces a channel (TREQ_SEL)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest(u8);

impl TransferRequest {
    /// Permanent request, for unpaced transfers
    pub const UNPACED: TransferRequest = TransferRequest(0x3F);

    /// Returns `None` for values that don't fit the six-bit selector
    pub const fn new(raw: u8) -> Option<Self> {
        if raw <= 0x3F {
            Some(TransferRequest(raw))
        } else {
            None
        }
    }

    /// DREQ raised while state machine `sm` of PIO `block` has RX data
    pub const fn pio_rx(block: u8, sm: u8) -> Self {
        TransferRequest((block & 1) * 8 + 4 + (sm & 3))
    }

    /// DREQ raised while state machine `sm` of PIO `block` has TX space
    pub const fn pio_tx(block: u8, sm: u8) -> Self {
        TransferRequest((block & 1) * 8 + (sm & 3))
    }

    /// The raw selector value
    pub const fn raw(self) -> u8 {
        self.0
    }
}

/// Size of each bus transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataSize {
    Byte = 0,
    HalfWord = 1,
    Word = 2,
}

impl DataSize {
    /// Number of bytes moved per transfer
    pub const fn bytes(self) -> u32 {
        1 << self as u32
    }

    const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => DataSize::Byte,
            1 => DataSize::HalfWord,
            // 3 is reserved; the controller treats it as a word transfer.
            _ => DataSize::Word,
        }
    }
}

/// The named fields of a channel's CTRL register
///
/// [`bits`](ControlWord::bits) is the only place that packs these fields
/// into a register value. Each field is masked to its documented width, so
/// no field can spill into a neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord {
    /// Suppress the completion interrupt
    pub irq_quiet: bool,
    /// Pacing signal
    pub treq_sel: TransferRequest,
    /// Channel to trigger on completion. Chaining to itself disables chaining.
    pub chain_to: ChannelId,
    /// Apply the address ring to the write address instead of the read address
    pub ring_sel: bool,
    /// log2 of the ring size in bytes; 0 disables wrapping
    pub ring_size: u8,
    /// Advance the write address after each transfer
    pub incr_write: bool,
    /// Advance the read address after each transfer
    pub incr_read: bool,
    /// Transfer unit
    pub data_size: DataSize,
    /// Prefer this channel during arbitration
    pub high_priority: bool,
    /// Respond to triggers
    pub en: bool,
}

impl ControlWord {
    /// A disabled, unpaced, unchained word-transfer configuration for `channel`
    pub const fn new(channel: ChannelId) -> Self {
        ControlWord {
            irq_quiet: false,
            treq_sel: TransferRequest::UNPACED,
            chain_to: channel,
            ring_sel: false,
            ring_size: 0,
            incr_write: false,
            incr_read: false,
            data_size: DataSize::Word,
            high_priority: false,
            en: false,
        }
    }

    /// Pack the fields into a CTRL register value
    pub const fn bits(&self) -> u32 {
        field!(IRQ_QUIET, self.irq_quiet)
            | field!(TREQ_SEL, self.treq_sel.raw())
            | field!(CHAIN_TO, self.chain_to.index())
            | field!(RING_SEL, self.ring_sel)
            | field!(RING_SIZE, self.ring_size)
            | field!(INCR_WRITE, self.incr_write)
            | field!(INCR_READ, self.incr_read)
            | field!(DATA_SIZE, self.data_size as u8)
            | field!(HIGH_PRIORITY, self.high_priority)
            | field!(EN, self.en)
    }

    /// Decode the writable fields of a CTRL register value
    ///
    /// Status bits (BUSY, the error flags) are ignored. A CHAIN_TO value
    /// naming a channel that doesn't exist decodes as `None`.
    pub const fn from_bits(bits: u32) -> Option<Self> {
        let chain_to = match ChannelId::new(get_field!(CHAIN_TO, bits) as u8) {
            Some(id) => id,
            None => return None,
        };
        Some(ControlWord {
            irq_quiet: get_field!(IRQ_QUIET, bits) != 0,
            treq_sel: TransferRequest(get_field!(TREQ_SEL, bits) as u8),
            chain_to,
            ring_sel: get_field!(RING_SEL, bits) != 0,
            ring_size: get_field!(RING_SIZE, bits) as u8,
            incr_write: get_field!(INCR_WRITE, bits) != 0,
            incr_read: get_field!(INCR_READ, bits) != 0,
            data_size: DataSize::from_raw(get_field!(DATA_SIZE, bits)),
            high_priority: get_field!(HIGH_PRIORITY, bits) != 0,
            en: get_field!(EN, bits) != 0,
        })
    }

    /// Returns `true` if completing this channel triggers another one
    pub const fn chains(&self, own: ChannelId) -> bool {
        self.chain_to.index() != own.index()
    }
}

/// Returns `bits` with only the software-writable CTRL fields kept
pub(crate) const fn writable(bits: u32) -> u32 {
    bits & CTRL::WRITABLE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(index: u8) -> ChannelId {
        ChannelId::new(index).unwrap()
    }

    #[test]
    fn encodes_the_capture_configuration() {
        let ctrl = ControlWord {
            irq_quiet: true,
            treq_sel: TransferRequest::new(4).unwrap(),
            chain_to: ch(1),
            ring_sel: false,
            ring_size: 0,
            incr_write: true,
            incr_read: false,
            data_size: DataSize::Word,
            high_priority: true,
            en: true,
        };
        assert_eq!(ctrl.bits(), 0x0022_082B);
    }

    #[test]
    fn encodes_the_restart_configuration() {
        let ctrl = ControlWord {
            irq_quiet: true,
            treq_sel: TransferRequest::UNPACED,
            chain_to: ch(0),
            incr_write: false,
            incr_read: false,
            data_size: DataSize::Word,
            high_priority: true,
            en: true,
            ..ControlWord::new(ch(1))
        };
        assert_eq!(ctrl.bits(), (1 << 21) | (0x3F << 15) | (2 << 2) | 0b11);
    }

    #[test]
    fn each_field_lands_on_its_own_bits() {
        let base = ControlWord::new(ch(0));
        assert_eq!(base.bits(), 0x3F << 15 | 2 << 2);

        let cases = [
            (ControlWord { en: true, ..base }, 1 << 0),
            (ControlWord { high_priority: true, ..base }, 1 << 1),
            (ControlWord { incr_read: true, ..base }, 1 << 4),
            (ControlWord { incr_write: true, ..base }, 1 << 5),
            (ControlWord { ring_size: 0xF, ..base }, 0xF << 6),
            (ControlWord { ring_sel: true, ..base }, 1 << 10),
            (ControlWord { chain_to: ch(11), ..base }, 11 << 11),
            (ControlWord { irq_quiet: true, ..base }, 1 << 21),
        ];
        for (ctrl, bits) in cases {
            assert_eq!(ctrl.bits() ^ base.bits(), bits, "{ctrl:?}");
        }
    }

    #[test]
    fn oversized_ring_does_not_reach_ring_sel() {
        let ctrl = ControlWord { ring_size: 0xFF, ..ControlWord::new(ch(0)) };
        assert_eq!(ctrl.bits() & (1 << 10), 0);
    }

    #[test]
    fn decode_ignores_status_bits() {
        let ctrl = ControlWord {
            irq_quiet: true,
            treq_sel: TransferRequest::pio_rx(0, 0),
            incr_write: true,
            en: true,
            ..ControlWord::new(ch(3))
        };
        let busy = ctrl.bits() | (1 << 24) | (1 << 31);
        assert_eq!(ControlWord::from_bits(busy), Some(ctrl));
        assert_eq!(writable(busy), ctrl.bits());
    }

    #[test]
    fn decode_rejects_missing_chain_target() {
        assert_eq!(ControlWord::from_bits(15 << 11), None);
    }

    #[test]
    fn pio_dreqs() {
        assert_eq!(TransferRequest::pio_rx(0, 0).raw(), 4);
        assert_eq!(TransferRequest::pio_rx(1, 3).raw(), 15);
        assert_eq!(TransferRequest::pio_tx(1, 0).raw(), 8);
        assert_eq!(TransferRequest::new(0x40), None);
    }

    #[test]
    fn channel_ids_are_bounded() {
        assert!(ChannelId::new(11).is_some());
        assert!(ChannelId::new(12).is_none());
        assert_eq!(ch(3).bit(), 0b1000);
    }
}
