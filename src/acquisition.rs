//! Bring-up and shutdown of the whole pipeline

use crate::{
    buffer::CaptureBuffer,
    capture::Capture,
    config::Config,
    pio::{self, InstalledProgram, Pio, PioBlock},
    register::RegisterFile,
    restart::RestartDescriptor,
    Result,
};

/// The running acquisition: waveform, sampler and capture loop
pub struct Acquisition<'r, R: RegisterFile> {
    config: Config,
    blocks: [Pio<'r, R>; 2],
    capture: Capture<'r, R>,
    programs: [(PioBlock, InstalledProgram); 2],
}

impl<'r, R: RegisterFile> Acquisition<'r, R> {
    /// Start everything described by `config`
    ///
    /// Resets both PIO blocks, starts the waveform generator and then the
    /// sampler, and finally starts the capture loop into `buffer`. If a
    /// step fails, the state machines started so far are stopped again.
    pub fn bring_up(
        regs: &'r R,
        config: &Config,
        buffer: CaptureBuffer,
        descriptor: RestartDescriptor,
    ) -> Result<Self> {
        config.validate()?;
        let mut blocks = [Pio::new(regs, PioBlock::Pio0), Pio::new(regs, PioBlock::Pio1)];
        for block in blocks.iter_mut() {
            block.reset();
        }

        let waveform = &config.waveform;
        let waveform_program = pio::start_waveform(
            &mut blocks[waveform.block.index() as usize],
            waveform.state_machine,
            waveform.pattern,
            waveform.pin,
            waveform.frequency_hz,
            config.system_clock_hz,
        )?;

        let sampler = &config.sampler;
        let source = pio::start_sampler(
            &mut blocks[sampler.block.index() as usize],
            sampler.state_machine,
            &sampler.sampling,
            config.system_clock_hz,
        );
        let (sampler_program, source) = match source {
            Ok(started) => started,
            Err(err) => {
                blocks[waveform.block.index() as usize].stop(waveform.state_machine);
                return Err(err);
            }
        };

        let capture = Capture::new(
            regs,
            config.capture.primary,
            config.capture.restart,
            source,
            buffer,
            descriptor,
        );
        let capture = match capture {
            Ok(capture) => capture.with_abort_poll_limit(config.capture.abort_poll_limit),
            Err(err) => {
                blocks[sampler.block.index() as usize].stop(sampler.state_machine);
                blocks[waveform.block.index() as usize].stop(waveform.state_machine);
                return Err(err);
            }
        };

        let mut acquisition = Acquisition {
            config: *config,
            capture,
            blocks,
            programs: [
                (waveform.block, waveform_program),
                (sampler.block, sampler_program),
            ],
        };
        if let Err(err) = acquisition.capture.start(config.capture.word_count) {
            acquisition.stop_state_machines();
            return Err(err);
        }
        log::info!("acquisition running");
        Ok(acquisition)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn capture(&self) -> &Capture<'r, R> {
        &self.capture
    }

    /// The capture session, for single bursts and snapshots
    pub fn capture_mut(&mut self) -> &mut Capture<'r, R> {
        &mut self.capture
    }

    /// The driver of PIO `block`
    pub fn pio(&self, block: PioBlock) -> &Pio<'r, R> {
        &self.blocks[block.index() as usize]
    }

    fn stop_state_machines(&mut self) {
        let sampler = self.config.sampler;
        let waveform = self.config.waveform;
        self.blocks[sampler.block.index() as usize].stop(sampler.state_machine);
        self.blocks[waveform.block.index() as usize].stop(waveform.state_machine);
    }

    /// Stop the capture loop, then both state machines
    ///
    /// The programs are removed from instruction memory. If the DMA abort
    /// isn't confirmed, the state machines keep running and the error is
    /// returned; calling `shutdown` again retries.
    pub fn shutdown(&mut self) -> Result<()> {
        self.capture.stop()?;
        self.stop_state_machines();
        for (block, program) in self.programs {
            self.blocks[block.index() as usize].uninstall(program);
        }
        log::info!("acquisition shut down");
        Ok(())
    }
}
