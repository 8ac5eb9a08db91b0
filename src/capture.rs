//! Capture sessions
//!
//! A [`Capture`] owns the two DMA channels, the buffer and the restart
//! descriptor for as long as the capture loop may run. It checks every
//! precondition before touching a register, and it's the only code that
//! moves its [`PairState`] forward.

use crate::{
    abort::{self, ChannelMask, DEFAULT_POLL_LIMIT},
    buffer::CaptureBuffer,
    channel::Channel,
    control::{ChannelId, ControlWord},
    interrupt::Burst,
    pio::RxFifo,
    primary,
    register::RegisterFile,
    restart::{self, RestartDescriptor},
    state::{Event, Mode, PairState, Phase},
    Error, Result,
};

/// A continuous capture from a PIO RX FIFO into a buffer
///
/// ```no_run
/// use rp_dma_capture::{
///     pio::{PioBlock, RxFifo, StateMachineId},
///     CaptureBuffer, ChannelId, Capture, Mmio, RestartDescriptor,
/// };
///
/// static mut SAMPLES: [u32; 256] = [0; 256];
/// static mut ORIGIN: u32 = 0;
///
/// // Safety: we're on an RP2040, and nothing else uses DMA channels 0 and 1.
/// let regs = unsafe { Mmio::new() };
/// // Safety: these statics are only used here.
/// let (buffer, descriptor) = unsafe {
///     (
///         CaptureBuffer::from_raw_parts(core::ptr::addr_of_mut!(SAMPLES) as u32, 256),
///         RestartDescriptor::from_raw(core::ptr::addr_of_mut!(ORIGIN) as u32),
///     )
/// };
/// let mut capture = Capture::new(
///     &regs,
///     ChannelId::new(0).unwrap(),
///     ChannelId::new(1).unwrap(),
///     RxFifo::new(PioBlock::Pio0, StateMachineId::SM0),
///     buffer,
///     descriptor,
/// )?;
/// capture.start(256)?;
/// // ... the buffer refills forever, with no CPU involvement ...
/// capture.stop()?;
/// # Ok::<(), rp_dma_capture::Error>(())
/// ```
pub struct Capture<'r, R: RegisterFile> {
    regs: &'r R,
    primary: Channel<'r, R>,
    restart: Channel<'r, R>,
    source: RxFifo,
    buffer: CaptureBuffer,
    descriptor: RestartDescriptor,
    state: PairState,
    word_count: usize,
    poll_limit: u32,
}

impl<'r, R: RegisterFile> Capture<'r, R> {
    /// Prepare a capture session; no registers are touched
    pub fn new(
        regs: &'r R,
        primary: ChannelId,
        restart: ChannelId,
        source: RxFifo,
        buffer: CaptureBuffer,
        descriptor: RestartDescriptor,
    ) -> Result<Self> {
        if primary == restart {
            return Err(Error::ChannelConflict(primary));
        }
        Ok(Capture {
            regs,
            primary: Channel::new(regs, primary),
            restart: Channel::new(regs, restart),
            source,
            buffer,
            descriptor,
            state: PairState::new(),
            word_count: 0,
            poll_limit: DEFAULT_POLL_LIMIT,
        })
    }

    /// Read CHAN_ABORT at most `poll_limit` times when stopping
    pub fn with_abort_poll_limit(mut self, poll_limit: u32) -> Self {
        self.poll_limit = poll_limit;
        self
    }

    pub fn primary(&self) -> &Channel<'r, R> {
        &self.primary
    }

    pub fn restart(&self) -> &Channel<'r, R> {
        &self.restart
    }

    pub fn buffer(&self) -> &CaptureBuffer {
        &self.buffer
    }

    pub fn descriptor(&self) -> &RestartDescriptor {
        &self.descriptor
    }

    /// Words written per pass, as of the last [`start`](Capture::start)
    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn state(&self) -> PairState {
        self.state
    }

    fn channels(&self) -> ChannelMask {
        ChannelMask::pair(self.primary.id(), self.restart.id())
    }

    /// Start the capture loop
    ///
    /// Every pass writes `word_count` words in order from the buffer origin.
    /// When the primary channel's counter runs out, the restart channel
    /// points it back at the origin and triggers it again, with no CPU
    /// involvement.
    ///
    /// Fails without touching any register if the session is already
    /// running or the buffer is too small. The restart channel is only
    /// armed once the primary channel is configured and the descriptor
    /// reads back as the buffer origin; if either isn't true, the primary
    /// channel is disabled again and the result is [`Error::OutOfOrder`].
    pub fn start(&mut self, word_count: usize) -> Result<()> {
        if self.state.is_active() {
            return Err(Error::Active);
        }
        primary::validate(&self.buffer, word_count)?;
        if self.descriptor.address() % 4 != 0 {
            return Err(Error::Misaligned {
                address: self.descriptor.address(),
            });
        }

        abort::stop_capture(self.regs, self.channels(), self.poll_limit)?;
        self.primary.clear_interrupt();
        self.primary.set_interrupt_enable(false);

        primary::configure(
            &self.primary,
            self.source,
            &self.buffer,
            word_count,
            self.restart.id(),
        )?;
        self.state.apply(Event::Configured)?;

        let origin = self.buffer.origin();
        self.descriptor.store(self.regs, origin);
        self.regs.barrier();
        let expected = primary::control_word(self.source, self.restart.id());
        if self.descriptor.load(self.regs) != origin || self.primary.control() != Some(expected) {
            return Err(self.abandon(Error::OutOfOrder));
        }

        if let Err(err) = restart::arm(
            &self.restart,
            &self.descriptor,
            self.primary.write_address_register(),
            self.primary.id(),
        ) {
            return Err(self.abandon(err));
        }

        self.regs.barrier();
        // Safety: the buffer and descriptor are owned by this session and
        // outlive it; the primary channel was configured above.
        unsafe { self.primary.trigger() };
        self.state.apply(Event::Triggered)?;
        self.word_count = word_count;
        log::info!(
            "capture started: {} words at {:#010X} ({} -> {})",
            word_count,
            origin,
            self.primary.id(),
            self.restart.id()
        );
        Ok(())
    }

    /// Undo a partly completed start
    fn abandon(&mut self, err: Error) -> Error {
        self.primary.disable();
        self.restart.disable();
        self.state = PairState::new();
        log::warn!("capture start abandoned: {}", err);
        err
    }

    /// Stop both channels
    ///
    /// After this returns `Ok`, neither channel writes memory or responds
    /// to a chain trigger. Stopping an idle session is harmless. If the
    /// controller never confirms the abort, the session stays in
    /// [`Phase::Aborting`] and `stop` may be called again.
    pub fn stop(&mut self) -> Result<()> {
        self.state.apply(Event::AbortRequested)?;
        abort::stop_capture(self.regs, self.channels(), self.poll_limit)?;
        self.primary.set_interrupt_enable(false);
        self.primary.clear_interrupt();
        if self.state.phase() == Phase::Aborting {
            self.state.apply(Event::AbortConfirmed)?;
            log::info!("capture stopped");
        }
        Ok(())
    }

    /// End the loop after the pass in progress
    ///
    /// Disarms the restart channel first, then rewrites the primary channel
    /// so that its completion raises DMA_IRQ_0 instead of chaining. The
    /// returned future resolves once both channels are idle; call
    /// [`on_interrupt`](crate::on_interrupt) from the DMA_IRQ_0 handler to
    /// wake it.
    pub fn finish(&mut self) -> Result<Burst<'_, 'r, R>> {
        let next = self.state.next(Event::BurstRequested)?;
        if let Err(err) = restart::disarm(&self.restart, self.poll_limit) {
            // The restart channel is disabled and may still be mid-copy, so
            // the loop can't be trusted to continue; only stop() recovers.
            self.state.apply(Event::AbortRequested)?;
            return Err(err);
        }

        let ctrl = ControlWord {
            chain_to: self.primary.id(),
            irq_quiet: false,
            ..primary::control_word(self.source, self.restart.id())
        };
        self.primary.clear_interrupt();
        self.primary.set_interrupt_enable(true);
        self.primary.set_control(ctrl);
        self.state = next;
        log::debug!("{} finishing after the current pass", self.primary.id());
        Ok(Burst::new(self))
    }

    /// Returns `true` once a single burst has completed
    ///
    /// While the session loops, this is always `false`.
    pub fn poll_burst(&mut self) -> Result<bool> {
        if self.state.phase() == Phase::Idle {
            return Ok(true);
        }
        if self.state.mode() != Mode::SingleBurst
            || self.primary.is_busy()
            || self.restart.is_busy()
        {
            return Ok(false);
        }

        // The hardware ran without us; catch the state up to where it is.
        while self.state.phase() != Phase::Idle {
            let event = match self.state.phase() {
                Phase::Armed => Event::Triggered,
                Phase::ChainTrigger => Event::Restarted,
                _ => Event::Exhausted,
            };
            self.state.apply(event)?;
        }
        self.primary.disable();
        self.primary.set_interrupt_enable(false);
        self.primary.clear_interrupt();
        log::debug!("{} burst complete", self.primary.id());
        Ok(true)
    }

    /// Copy the last captured pass into `out`
    ///
    /// Only allowed while the session is idle, when nothing can change the
    /// buffer underneath the copy. Returns the number of words copied.
    pub fn snapshot(&self, out: &mut [u32]) -> Result<usize> {
        if self.state.is_active() {
            return Err(Error::Active);
        }
        let count = out.len().min(self.word_count);
        for (index, word) in out.iter_mut().take(count).enumerate() {
            if let Some(address) = self.buffer.address_of(index) {
                *word = self.regs.read(address);
            }
        }
        Ok(count)
    }

    /// Swap in a different buffer while idle, returning the old one
    pub fn replace_buffer(&mut self, buffer: CaptureBuffer) -> Result<CaptureBuffer> {
        if self.state.is_active() {
            return Err(Error::Active);
        }
        self.word_count = 0;
        Ok(core::mem::replace(&mut self.buffer, buffer))
    }
}

impl<R: RegisterFile> Drop for Capture<'_, R> {
    fn drop(&mut self) {
        if self.state.is_active() {
            // Best effort; there's nobody left to report a timeout to.
            let _ = self.stop();
        }
    }
}
