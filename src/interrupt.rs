//! DMA interrupt support

use crate::{
    capture::Capture, channel::Channel, control::ChannelId, ral::CHANNEL_COUNT,
    register::RegisterFile, Result,
};
use core::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};

use critical_section::Mutex;

/// Handle a DMA_IRQ_0 interrupt for `channel`
///
/// If the channel raised the interrupt, `on_interrupt` clears it and wakes
/// the [`Burst`] waiting on that channel.
///
/// Consider calling `on_interrupt` from the DMA_IRQ_0 handler:
///
/// ```no_run
/// use rp_dma_capture::{on_interrupt, ChannelId, Mmio};
///
/// // #[interrupt]
/// fn DMA_IRQ_0() {
///     // Safety: we're on an RP2040.
///     let regs = unsafe { Mmio::new() };
///     on_interrupt(&regs, ChannelId::new(0).unwrap());
/// }
/// ```
#[inline(always)]
pub fn on_interrupt<R: RegisterFile>(regs: &R, channel: ChannelId) {
    let channel = Channel::new(regs, channel);
    if channel.is_interrupt() {
        channel.clear_interrupt();
        critical_section::with(|cs| {
            let waker = WAKERS[channel.id().index() as usize].borrow_ref_mut(cs).take();
            if let Some(waker) = waker {
                waker.wake();
            }
        });
    }
}

type SharedWaker = Mutex<RefCell<Option<Waker>>>;
#[allow(clippy::declare_interior_mutable_const)]
const NO_WAKER: SharedWaker = Mutex::new(RefCell::new(None));
static WAKERS: [SharedWaker; CHANNEL_COUNT] = [NO_WAKER; CHANNEL_COUNT];

/// The end of a single burst
///
/// Returned by [`Capture::finish`]. Resolves once both channels of the
/// session are idle. `Burst` is woken by [`on_interrupt`] when the primary
/// channel completes.
pub struct Burst<'c, 'r, R: RegisterFile> {
    capture: &'c mut Capture<'r, R>,
}

impl<'c, 'r, R: RegisterFile> Burst<'c, 'r, R> {
    pub(crate) fn new(capture: &'c mut Capture<'r, R>) -> Self {
        Burst { capture }
    }

    fn slot(&self) -> usize {
        self.capture.primary().id().index() as usize
    }
}

impl<R: RegisterFile> Future for Burst<'_, '_, R> {
    type Output = Result<()>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        critical_section::with(|cs| {
            *WAKERS[this.slot()].borrow_ref_mut(cs) = Some(cx.waker().clone());
        });

        match this.capture.poll_burst() {
            Ok(true) => Poll::Ready(Ok(())),
            Ok(false) => Poll::Pending,
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl<R: RegisterFile> Drop for Burst<'_, '_, R> {
    fn drop(&mut self) {
        critical_section::with(|cs| {
            *WAKERS[self.slot()].borrow_ref_mut(cs) = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pio::{PioBlock, RxFifo, StateMachineId},
        poll_no_wake,
        ral::dma_register,
        sim::Simulator,
    };

    fn ch(index: u8) -> ChannelId {
        ChannelId::new(index).unwrap()
    }

    #[test]
    fn on_interrupt_clears_only_raised_flags() {
        let sim = Simulator::new();
        Channel::new(&sim, ch(4)).set_interrupt_enable(true);
        on_interrupt(&sim, ch(4));
        assert_eq!(sim.read(dma_register::INTS0), 0);
    }

    #[test]
    fn burst_on_an_idle_session_resolves_at_once() {
        let sim = Simulator::new();
        let buffer = sim.allocate_buffer(4).unwrap();
        let descriptor = sim.allocate_descriptor().unwrap();
        let mut capture = Capture::new(
            &sim,
            ch(2),
            ch(3),
            RxFifo::new(PioBlock::Pio0, StateMachineId::SM0),
            buffer,
            descriptor,
        )
        .unwrap();
        // Finishing a session that never started is an error, not a hang.
        assert!(capture.finish().is_err());

        let mut burst = Burst::new(&mut capture);
        assert_eq!(poll_no_wake(Pin::new(&mut burst)), Poll::Ready(Ok(())));
    }
}
