//! Chained-DMA continuous capture for the RP2040
//!
//! `rp-dma-capture` streams samples from a PIO state machine into a fixed
//! buffer, forever, without CPU involvement. It provides
//!
//! - named, unsafe-where-it-matters operations on DMA [`Channel`]s and an
//!   exact encoder for their control words ([`ControlWord`])
//! - the primary/restart channel pair that keeps refilling the buffer: the
//!   primary channel drains a PIO RX FIFO, and when its counter runs out
//!   the restart channel rewrites the primary's write address and triggers
//!   it again
//! - a safe [`Capture`] session that orders every register write, with a
//!   [`Burst`] future for stopping after one last pass
//! - the PIO sampling and waveform programs, and a small PIO driver
//! - a software [`Simulator`](sim::Simulator) of the DMA controller, PIO
//!   blocks and SRAM, for tests that run on the host
//!
//! All hardware access goes through a [`RegisterFile`]. On the chip, that's
//! [`Mmio`]. The crate doesn't configure clocks or GPIO function selects;
//! the system clock frequency is an input, and the pins must already be
//! routed to the PIO block.
//!
//! ### License
//!
//! Licensed under either of
//!
//! - [Apache License, Version 2.0](http://www.apache.org/licenses/LICENSE-2.0) ([LICENSE-APACHE](./LICENSE-APACHE))
//! - [MIT License](http://opensource.org/licenses/MIT) ([LICENSE-MIT](./LICENSE-MIT))
//!
//! at your option.
//!
//! Unless you explicitly state otherwise, any contribution intentionally submitted
//! for inclusion in the work by you, as defined in the Apache-2.0 license, shall be
//! dual licensed as above, without any additional terms or conditions.

#![no_std]

pub mod abort;
mod acquisition;
mod buffer;
mod capture;
mod channel;
pub mod config;
mod control;
mod error;
mod interrupt;
pub mod pio;
pub mod primary;
pub mod ral;
mod register;
pub mod restart;
pub mod sim;
pub mod state;

pub use acquisition::Acquisition;
pub use buffer::CaptureBuffer;
pub use capture::Capture;
pub use channel::Channel;
pub use config::Config;
pub use control::{ChannelId, ControlWord, DataSize, TransferRequest};
pub use error::Error;
pub use interrupt::{on_interrupt, Burst};
pub use register::{Mmio, RegisterFile};
pub use restart::RestartDescriptor;

/// A capture result
pub type Result<T> = core::result::Result<T, Error>;

use core::{future::Future, pin::Pin, task::Poll};

/// Poll a future with a dummy waker.
///
/// Use `poll_no_wake` when you want to drive a future to completion, but you
/// don't care about the future waking an executor. It may be used to check
/// on a [`Burst`] that will later be awaited with [`block`].
///
/// Do not use `poll_no_wake` if you want an executor to be woken when the
/// burst completes.
pub fn poll_no_wake<F>(future: Pin<&mut F>) -> Poll<F::Output>
where
    F: Future,
{
    use core::task::{Context, RawWaker, RawWakerVTable, Waker};
    const VTABLE: RawWakerVTable = RawWakerVTable::new(|_| RAW_WAKER, |_| {}, |_| {}, |_| {});

    const RAW_WAKER: RawWaker = RawWaker::new(core::ptr::null(), &VTABLE);
    // Safety: raw waker meets documented requirements.
    let waker = unsafe { Waker::from_raw(RAW_WAKER) };
    let mut context = Context::from_waker(&waker);
    future.poll(&mut context)
}

/// Block until the future returns a result.
///
/// `block` invokes [`poll_no_wake`] in a loop until the future
/// returns a result. On hardware, the DMA controller makes progress while
/// this spins; a [`Simulator`](sim::Simulator) doesn't, so step it between
/// calls to [`poll_no_wake`] instead.
pub fn block<F>(mut future: Pin<&mut F>) -> F::Output
where
    F: Future,
{
    loop {
        match poll_no_wake(future.as_mut()) {
            Poll::Ready(result) => return result,
            Poll::Pending => core::hint::spin_loop(),
        }
    }
}
