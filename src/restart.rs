//! The restart channel
//!
//! The restart channel closes the capture loop. Each time the primary
//! channel exhausts its counter it triggers the restart channel, which
//! copies one word, the buffer origin, from the [`RestartDescriptor`] into
//! the primary's WRITE_ADDR register. Completing that copy chains back to
//! the primary, which starts its next pass from the origin.

use crate::{
    abort::{self, ChannelMask},
    channel::Channel,
    control::{ChannelId, ControlWord, DataSize, TransferRequest},
    ral::{channel_offset, channel_register},
    register::RegisterFile,
    Error, Result,
};

/// A word of memory holding the capture buffer's origin
///
/// The restart channel reads this word on every pass of the loop, so it
/// must stay valid, and unchanged, for the whole capture session.
#[derive(Debug, PartialEq, Eq)]
pub struct RestartDescriptor {
    address: u32,
}

impl RestartDescriptor {
    /// Use the word at bus address `address`
    ///
    /// # Safety
    ///
    /// `address` must be a word-aligned SRAM location that stays valid for
    /// the lifetime of every capture session it's used in, and nothing else
    /// may write it.
    pub const unsafe fn from_raw(address: u32) -> Self {
        RestartDescriptor { address }
    }

    /// Take over a static word
    #[cfg(target_pointer_width = "32")]
    pub fn from_static(word: &'static mut u32) -> Self {
        // Safety: the exclusive, 'static borrow is consumed here.
        unsafe { Self::from_raw(word as *mut u32 as u32) }
    }

    /// Bus address of the descriptor word
    pub const fn address(&self) -> u32 {
        self.address
    }

    /// Store `origin` in the descriptor
    pub fn store<R: RegisterFile>(&self, regs: &R, origin: u32) {
        regs.write(self.address, origin);
    }

    /// Read the descriptor back
    pub fn load<R: RegisterFile>(&self, regs: &R) -> u32 {
        regs.read(self.address)
    }
}

/// Control word for a restart channel that re-triggers `primary`
pub const fn control_word(primary: ChannelId) -> ControlWord {
    ControlWord {
        irq_quiet: true,
        treq_sel: TransferRequest::UNPACED,
        chain_to: primary,
        ring_sel: false,
        ring_size: 0,
        incr_write: false,
        incr_read: false,
        data_size: DataSize::Word,
        high_priority: true,
        en: true,
    }
}

/// Arm `channel` as the restart channel for `primary`
///
/// Points the channel at `descriptor` and at the register
/// `primary_write_address_register`, loads a count of one and enables it
/// through the non-triggering control alias. The channel then waits for
/// the primary's completion to trigger it; arming never starts it.
///
/// The descriptor must already hold the buffer origin, and the primary must
/// already be configured. [`Capture`](crate::Capture) checks both;
/// callers using this function directly are responsible for the order.
pub fn arm<R: RegisterFile>(
    channel: &Channel<'_, R>,
    descriptor: &RestartDescriptor,
    primary_write_address_register: u32,
    primary: ChannelId,
) -> Result<()> {
    if channel.id() == primary {
        return Err(Error::ChannelConflict(primary));
    }
    for address in [descriptor.address(), primary_write_address_register] {
        if address % 4 != 0 {
            return Err(Error::Misaligned { address });
        }
    }
    if primary_write_address_register
        != channel_register(primary.index(), channel_offset::WRITE_ADDR)
    {
        return Err(Error::OutOfOrder);
    }

    channel.set_read_address(descriptor.address());
    channel.set_write_address(primary_write_address_register);
    channel.set_transfer_count(1);
    channel.set_control(control_word(primary));
    log::debug!(
        "{} armed: {:#010X} -> {:#010X}, chain to {}",
        channel.id(),
        descriptor.address(),
        primary_write_address_register,
        primary
    );
    Ok(())
}

/// Stop `channel` from answering any further chain trigger
///
/// Clears EN first so that a trigger arriving now is ignored, then aborts
/// a copy that may already be in flight.
pub fn disarm<R: RegisterFile>(channel: &Channel<'_, R>, poll_limit: u32) -> Result<()> {
    channel.disable();
    abort::stop_capture(channel.regs(), ChannelMask::single(channel.id()), poll_limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Simulator;

    fn ch(index: u8) -> ChannelId {
        ChannelId::new(index).unwrap()
    }

    #[test]
    fn control_word_is_unpaced_single_word_chain() {
        let bits = control_word(ch(0)).bits();
        assert_eq!(bits, (1 << 21) | (0x3F << 15) | (0 << 11) | (2 << 2) | (1 << 1) | 1);
    }

    #[test]
    fn arm_loads_registers_without_triggering() {
        let sim = Simulator::new();
        let descriptor = sim.allocate_descriptor().unwrap();
        let primary = Channel::new(&sim, ch(0));
        let restart = Channel::new(&sim, ch(1));

        arm(&restart, &descriptor, primary.write_address_register(), ch(0)).unwrap();
        assert_eq!(restart.read_address(), descriptor.address());
        assert_eq!(restart.write_address(), 0x5000_0004);
        assert_eq!(restart.transfer_count(), 1);
        assert!(restart.is_enabled());
        assert!(!restart.is_busy());
    }

    #[test]
    fn arm_rejects_foreign_targets() {
        let sim = Simulator::new();
        let descriptor = sim.allocate_descriptor().unwrap();
        let restart = Channel::new(&sim, ch(1));
        let other = Channel::new(&sim, ch(4));

        assert_eq!(
            arm(&restart, &descriptor, other.write_address_register(), ch(0)),
            Err(Error::OutOfOrder)
        );
        assert_eq!(
            arm(&restart, &descriptor, 0x5000_0004, ch(1)),
            Err(Error::ChannelConflict(ch(1)))
        );
        assert!(!restart.is_enabled());
    }

    #[test]
    fn disarm_clears_enable() {
        let sim = Simulator::new();
        let descriptor = sim.allocate_descriptor().unwrap();
        let restart = Channel::new(&sim, ch(1));
        arm(&restart, &descriptor, 0x5000_0004, ch(0)).unwrap();
        disarm(&restart, 10).unwrap();
        assert!(!restart.is_enabled());
    }
}
