//! Capture errors

use crate::{
    control::ChannelId,
    state::{Event, Phase},
};
use core::fmt::{self, Display};

/// Everything that can go wrong while configuring the capture pipeline
///
/// All checks run before the first register write of an operation, with
/// the exception of [`AbortTimeout`](Error::AbortTimeout), which reports
/// a controller that never confirmed an abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The buffer holds fewer words than the transfer would write
    BufferTooSmall { capacity: usize, requested: usize },
    /// A transfer count of zero
    EmptyTransfer,
    /// An address that isn't aligned to the transfer size
    Misaligned { address: u32 },
    /// Two roles were assigned the same DMA channel
    ChannelConflict(ChannelId),
    /// The operation needs an idle channel pair
    Active,
    /// The restart channel would be armed before the primary channel and
    /// its descriptor are ready
    OutOfOrder,
    /// CHAN_ABORT still reported these channels after the poll budget ran out
    AbortTimeout { pending: u32 },
    /// The channel pair can't take this event in its current phase
    InvalidTransition { from: Phase, event: Event },
    /// A PIO program or its parameters are malformed
    InvalidProgram,
    /// No contiguous run of instruction memory is large enough
    NoProgramSpace { length: usize },
    /// The requested state machine frequency can't be produced from the system clock
    ClockDivider { system_hz: u32, target_hz: u32 },
    /// The GPIO doesn't exist
    InvalidPin(u8),
    /// The configuration is internally inconsistent
    InvalidConfig(&'static str),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BufferTooSmall {
                capacity,
                requested,
            } => write!(
                f,
                "buffer of {capacity} words can't hold a {requested} word transfer"
            ),
            Error::EmptyTransfer => f.write_str("transfer count is zero"),
            Error::Misaligned { address } => write!(f, "address {address:#010X} is not word aligned"),
            Error::ChannelConflict(channel) => write!(f, "{channel} assigned twice"),
            Error::Active => f.write_str("capture is active"),
            Error::OutOfOrder => {
                f.write_str("restart channel armed before the primary channel was configured")
            }
            Error::AbortTimeout { pending } => {
                write!(f, "CHAN_ABORT({pending:#06X}) did not clear")
            }
            Error::InvalidTransition { from, event } => {
                write!(f, "{event:?} is not valid while {from:?}")
            }
            Error::InvalidProgram => f.write_str("invalid PIO program"),
            Error::NoProgramSpace { length } => {
                write!(f, "no room for a {length} instruction program")
            }
            Error::ClockDivider {
                system_hz,
                target_hz,
            } => write!(f, "can't divide {system_hz} Hz down to {target_hz} Hz"),
            Error::InvalidPin(pin) => write!(f, "GPIO{pin} does not exist"),
            Error::InvalidConfig(what) => write!(f, "invalid configuration: {what}"),
        }
    }
}
