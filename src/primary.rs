//! The primary transfer channel
//!
//! The primary channel moves words from a PIO RX FIFO into the capture
//! buffer, paced by the FIFO's DREQ. It's configured once per session;
//! the restart channel takes care of every later pass.

use crate::{
    buffer::CaptureBuffer,
    channel::Channel,
    control::{ChannelId, ControlWord, DataSize},
    pio::RxFifo,
    register::RegisterFile,
    Error, Result,
};

/// Control word for a primary channel draining `source`
///
/// `chain_to` is the restart channel. Pass the primary's own id to stop
/// after one pass.
pub const fn control_word(source: RxFifo, chain_to: ChannelId) -> ControlWord {
    ControlWord {
        irq_quiet: true,
        treq_sel: source.dreq(),
        chain_to,
        ring_sel: false,
        ring_size: 0,
        incr_write: true,
        incr_read: false,
        data_size: DataSize::Word,
        high_priority: true,
        en: true,
    }
}

/// Check that `word_count` words fit in `buffer`
pub fn validate(buffer: &CaptureBuffer, word_count: usize) -> Result<()> {
    if word_count == 0 {
        return Err(Error::EmptyTransfer);
    }
    if buffer.len() < word_count {
        return Err(Error::BufferTooSmall {
            capacity: buffer.len(),
            requested: word_count,
        });
    }
    if buffer.origin() % DataSize::Word.bytes() != 0 {
        return Err(Error::Misaligned {
            address: buffer.origin(),
        });
    }
    Ok(())
}

/// Prepare `channel` to copy `word_count` words from `source` into `buffer`
///
/// The channel ends up enabled but not triggered. Nothing is written if the
/// transfer doesn't fit the buffer.
pub fn configure<R: RegisterFile>(
    channel: &Channel<'_, R>,
    source: RxFifo,
    buffer: &CaptureBuffer,
    word_count: usize,
    chain_to: ChannelId,
) -> Result<()> {
    validate(buffer, word_count)?;

    channel.set_read_address(source.address());
    channel.set_write_address(buffer.origin());
    channel.set_transfer_count(word_count as u32);
    channel.set_control(control_word(source, chain_to));
    log::debug!(
        "{} configured: {} words {:#010X} -> {:#010X}, chain to {}",
        channel.id(),
        word_count,
        source.address(),
        buffer.origin(),
        chain_to
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pio::{PioBlock, StateMachineId},
        sim::Simulator,
    };

    const SOURCE: RxFifo = RxFifo::new(PioBlock::Pio0, StateMachineId::SM0);

    fn ch(index: u8) -> ChannelId {
        ChannelId::new(index).unwrap()
    }

    #[test]
    fn control_word_matches_capture_configuration() {
        assert_eq!(control_word(SOURCE, ch(1)).bits(), 0x0022_082B);
    }

    #[test]
    fn configure_loads_registers_without_triggering() {
        let sim = Simulator::new();
        let buffer = sim.allocate_buffer(32).unwrap();
        let channel = Channel::new(&sim, ch(0));

        configure(&channel, SOURCE, &buffer, 16, ch(1)).unwrap();
        assert_eq!(channel.read_address(), 0x5020_0020);
        assert_eq!(channel.write_address(), buffer.origin());
        assert_eq!(channel.transfer_count(), 16);
        assert_eq!(channel.control(), Some(control_word(SOURCE, ch(1))));
        assert!(!channel.is_busy());
    }

    #[test]
    fn configure_rejects_before_writing() {
        let sim = Simulator::new();
        let buffer = sim.allocate_buffer(8).unwrap();
        let channel = Channel::new(&sim, ch(0));

        assert_eq!(
            configure(&channel, SOURCE, &buffer, 9, ch(1)),
            Err(Error::BufferTooSmall {
                capacity: 8,
                requested: 9
            })
        );
        assert_eq!(
            configure(&channel, SOURCE, &buffer, 0, ch(1)),
            Err(Error::EmptyTransfer)
        );
        let skewed = unsafe { CaptureBuffer::from_raw_parts(buffer.origin() + 2, 4) };
        assert_eq!(
            configure(&channel, SOURCE, &skewed, 4, ch(1)),
            Err(Error::Misaligned {
                address: buffer.origin() + 2
            })
        );
        assert_eq!(channel.control_bits(), 0);
        assert_eq!(channel.transfer_count(), 0);
    }
}
