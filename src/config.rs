//! Acquisition configuration

use crate::{
    abort::DEFAULT_POLL_LIMIT,
    control::ChannelId,
    pio::{ClockDivider, PioBlock, Sampling, StateMachineId, REFERENCE_PATTERN},
    ral::GPIO_COUNT,
    Error, Result,
};

/// Where the sampling program runs and how it reads the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    pub block: PioBlock,
    pub state_machine: StateMachineId,
    pub sampling: Sampling,
}

/// Where the waveform program runs and what it drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveformConfig {
    pub block: PioBlock,
    pub state_machine: StateMachineId,
    pub pattern: &'static [bool],
    pub pin: u8,
    pub frequency_hz: u32,
}

/// The DMA side of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub primary: ChannelId,
    pub restart: ChannelId,
    /// Words per pass
    pub word_count: usize,
    /// CHAN_ABORT reads before an abort is reported as hung
    pub abort_poll_limit: u32,
}

/// Everything [`Acquisition::bring_up`](crate::Acquisition::bring_up) needs
///
/// Supply it once. [`Config::DEFAULT`] is the reference setup: a 192 MHz
/// system clock, three 10-bit samples per word from GPIO0 on PIO0 SM0 with
/// its clock on GPIO11, the reference pattern at 32 MHz on GPIO10 from
/// PIO0 SM1, and 256-word passes on DMA channels 0 and 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub system_clock_hz: u32,
    pub sampler: SamplerConfig,
    pub waveform: WaveformConfig,
    pub capture: CaptureConfig,
}

const fn channel(index: u8) -> ChannelId {
    match ChannelId::new(index) {
        Some(id) => id,
        None => panic!("no such DMA channel"),
    }
}

impl Config {
    pub const DEFAULT: Config = Config {
        system_clock_hz: 192_000_000,
        sampler: SamplerConfig {
            block: PioBlock::Pio0,
            state_machine: StateMachineId::SM0,
            sampling: Sampling {
                in_base: 0,
                clock_pin: 11,
                bus_width: 10,
                samples_per_word: 3,
                frequency_hz: 192_000_000,
            },
        },
        waveform: WaveformConfig {
            block: PioBlock::Pio0,
            state_machine: StateMachineId::SM1,
            pattern: &REFERENCE_PATTERN,
            pin: 10,
            frequency_hz: 32_000_000,
        },
        capture: CaptureConfig {
            primary: channel(0),
            restart: channel(1),
            word_count: 256,
            abort_poll_limit: DEFAULT_POLL_LIMIT,
        },
    };

    /// Check that the settings can work together
    ///
    /// Catches shared state machines, DMA channels and pins, clocks that
    /// can't be divided down, and malformed programs.
    pub fn validate(&self) -> Result<()> {
        let sampler = &self.sampler;
        let waveform = &self.waveform;
        let sampling = &sampler.sampling;

        if sampler.block == waveform.block && sampler.state_machine == waveform.state_machine {
            return Err(Error::InvalidConfig(
                "sampler and waveform share a state machine",
            ));
        }
        if self.capture.primary == self.capture.restart {
            return Err(Error::ChannelConflict(self.capture.primary));
        }
        if self.capture.word_count == 0 {
            return Err(Error::EmptyTransfer);
        }
        if self.capture.abort_poll_limit == 0 {
            return Err(Error::InvalidConfig("abort poll limit is zero"));
        }

        let bits = sampling.bus_width as u32 * sampling.samples_per_word as u32;
        if sampling.bus_width == 0 || sampling.samples_per_word == 0 || bits > 32 {
            return Err(Error::InvalidProgram);
        }
        if waveform.pattern.is_empty() || waveform.pattern.len() > 32 {
            return Err(Error::InvalidProgram);
        }
        let bus_end = sampling.in_base as u32 + sampling.bus_width as u32;
        if bus_end > GPIO_COUNT as u32 {
            return Err(Error::InvalidPin((bus_end - 1) as u8));
        }
        for pin in [sampling.clock_pin, waveform.pin] {
            if pin >= GPIO_COUNT {
                return Err(Error::InvalidPin(pin));
            }
            if (sampling.in_base as u32..bus_end).contains(&(pin as u32)) {
                return Err(Error::InvalidConfig("output pin overlaps the sample bus"));
            }
        }
        if sampling.clock_pin == waveform.pin {
            return Err(Error::InvalidConfig("sampler clock and waveform share a pin"));
        }

        ClockDivider::new(self.system_clock_hz, sampling.frequency_hz)?;
        ClockDivider::new(self.system_clock_hz, waveform.frequency_hz)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(Config::DEFAULT.validate(), Ok(()));
    }

    #[test]
    fn catches_conflicts() {
        let mut config = Config::DEFAULT;
        config.waveform.state_machine = StateMachineId::SM0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::DEFAULT;
        config.capture.restart = config.capture.primary;
        assert!(matches!(config.validate(), Err(Error::ChannelConflict(_))));

        let mut config = Config::DEFAULT;
        config.waveform.pin = 4;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = Config::DEFAULT;
        config.sampler.sampling.in_base = 25;
        assert_eq!(config.validate(), Err(Error::InvalidPin(34)));
    }

    #[test]
    fn catches_impossible_clocks() {
        let mut config = Config::DEFAULT;
        config.waveform.frequency_hz = 250_000_000;
        assert_eq!(
            config.validate(),
            Err(Error::ClockDivider {
                system_hz: 192_000_000,
                target_hz: 250_000_000
            })
        );
    }
}
