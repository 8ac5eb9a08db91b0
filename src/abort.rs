//! Abort and quiesce
//!
//! Before software may rewrite a channel's registers, any transfer in
//! flight has to be cancelled and the controller has to confirm it. The
//! controller confirms by clearing the channel's CHAN_ABORT bit. Waiting
//! for that is bounded: a controller that never answers shows up as
//! [`Error::AbortTimeout`] instead of a hung caller.

use crate::{
    channel::Channel,
    control::ChannelId,
    ral::{dma_register, CHANNEL_COUNT},
    register::RegisterFile,
    Error, Result,
};

/// Default number of CHAN_ABORT reads before giving up
///
/// An abort completes within a handful of bus cycles. This leaves plenty
/// of margin at any system clock.
pub const DEFAULT_POLL_LIMIT: u32 = 10_000;

/// A set of DMA channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMask(u32);

impl ChannelMask {
    pub const EMPTY: ChannelMask = ChannelMask(0);

    /// A mask holding a single channel
    pub const fn single(channel: ChannelId) -> Self {
        ChannelMask(channel.bit())
    }

    /// A mask holding both `a` and `b`
    pub const fn pair(a: ChannelId, b: ChannelId) -> Self {
        ChannelMask(a.bit() | b.bit())
    }

    /// Add `channel` to the set
    pub const fn with(self, channel: ChannelId) -> Self {
        ChannelMask(self.0 | channel.bit())
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, channel: ChannelId) -> bool {
        self.0 & channel.bit() != 0
    }

    /// The channels in the set, lowest first
    pub fn iter(self) -> impl Iterator<Item = ChannelId> {
        (0..CHANNEL_COUNT as u8)
            .filter_map(ChannelId::new)
            .filter(move |channel| self.contains(*channel))
    }
}

/// Cancel every transfer on the channels in `mask`, then disable them
///
/// Writes the abort request, polls CHAN_ABORT until the controller reports
/// all requested aborts complete, and only then clears each channel's EN
/// bit. Reads CHAN_ABORT at most `poll_limit` times; if it hasn't cleared
/// by then, the channels are left untouched and the outstanding bits are
/// returned in [`Error::AbortTimeout`].
///
/// Calling this on channels that are already stopped is harmless, and
/// calling it twice has the same effect as calling it once.
pub fn stop_capture<R: RegisterFile>(regs: &R, mask: ChannelMask, poll_limit: u32) -> Result<()> {
    if mask.is_empty() {
        return Ok(());
    }

    regs.write(dma_register::CHAN_ABORT, mask.bits());
    wait_for_abort(regs, mask, poll_limit)?;

    for channel in mask.iter() {
        Channel::new(regs, channel).disable();
    }
    log::debug!("quiesced DMA channels {:#05X}", mask.bits());
    Ok(())
}

fn wait_for_abort<R: RegisterFile>(regs: &R, mask: ChannelMask, poll_limit: u32) -> Result<()> {
    let mut pending = mask.bits();
    for _ in 0..poll_limit {
        pending = regs.read(dma_register::CHAN_ABORT) & mask.bits();
        if pending == 0 {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    log::warn!(
        "DMA abort of {:#05X} unconfirmed after {} polls (pending {:#05X})",
        mask.bits(),
        poll_limit,
        pending
    );
    Err(Error::AbortTimeout { pending })
}
