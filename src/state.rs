//! Channel pair state machine
//!
//! The DMA controller runs the capture loop on its own; nothing in the
//! hardware tells software which step of the loop it's in. [`PairState`]
//! makes that state explicit so that every configuration operation can be
//! checked against it. Events come from software (configure, trigger,
//! abort) and, in tests, from the simulator's view of the hardware
//! (counter exhausted, restart written).

use crate::{Error, Result};

/// Where a primary/restart channel pair is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Neither channel will transfer or respond to a chain trigger
    Idle,
    /// The primary is configured and enabled, waiting for a trigger
    Armed,
    /// The primary is moving samples into the buffer
    Running,
    /// The primary exhausted its counter and triggered the restart channel
    ChainTrigger,
    /// An abort was requested and hasn't been confirmed
    Aborting,
}

/// What happens when the primary exhausts its counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Chain into the restart channel, forever
    Loop,
    /// Stop after the current pass
    SingleBurst,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Software finished writing the primary's registers
    Configured,
    /// The primary was triggered, by software or by the restart chain
    Triggered,
    /// The primary's transfer counter reached zero
    Exhausted,
    /// The restart channel rewrote the primary's write address
    Restarted,
    /// Software asked for the loop to end after the current pass
    BurstRequested,
    /// Software wrote the abort request
    AbortRequested,
    /// The controller reported the abort complete
    AbortConfirmed,
}

/// Phase and mode of a channel pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairState {
    phase: Phase,
    mode: Mode,
}

impl Default for PairState {
    fn default() -> Self {
        Self::new()
    }
}

impl PairState {
    /// An idle pair in looping mode
    pub const fn new() -> Self {
        PairState {
            phase: Phase::Idle,
            mode: Mode::Loop,
        }
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns `true` while either channel may still write to memory
    pub const fn is_active(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// Compute the state that follows `event`, without changing `self`
    pub fn next(&self, event: Event) -> Result<PairState> {
        use Event::*;
        use Phase::*;

        let phase = match (self.phase, event) {
            (Idle, Configured) => Armed,
            (Armed, Triggered) => Running,
            (Running, Exhausted) => match self.mode {
                Mode::Loop => ChainTrigger,
                Mode::SingleBurst => Idle,
            },
            (ChainTrigger, Restarted) => Armed,
            (Armed | Running | ChainTrigger, BurstRequested) => {
                return Ok(PairState {
                    phase: self.phase,
                    mode: Mode::SingleBurst,
                })
            }
            (Idle, AbortRequested) => Idle,
            (_, AbortRequested) => Aborting,
            (Aborting, AbortConfirmed) => Idle,
            (from, event) => return Err(Error::InvalidTransition { from, event }),
        };
        let mode = if phase == Idle { Mode::Loop } else { self.mode };
        Ok(PairState { phase, mode })
    }

    /// Apply `event`, leaving the state untouched if it's illegal
    pub fn apply(&mut self, event: Event) -> Result<Phase> {
        *self = self.next(event).map_err(|err| {
            log::warn!("rejected {:?} in {:?}", event, self.phase);
            err
        })?;
        Ok(self.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(state: &mut PairState, events: &[Event]) -> Phase {
        for event in events {
            state.apply(*event).unwrap();
        }
        state.phase()
    }

    #[test]
    fn loop_cycles_through_chain_trigger() {
        let mut state = PairState::new();
        assert_eq!(drive(&mut state, &[Event::Configured, Event::Triggered]), Phase::Running);
        for _ in 0..1000 {
            assert_eq!(state.apply(Event::Exhausted), Ok(Phase::ChainTrigger));
            assert_eq!(state.apply(Event::Restarted), Ok(Phase::Armed));
            assert_eq!(state.apply(Event::Triggered), Ok(Phase::Running));
        }
        assert_eq!(state.mode(), Mode::Loop);
    }

    #[test]
    fn single_burst_returns_to_idle() {
        let mut state = PairState::new();
        drive(&mut state, &[Event::Configured, Event::Triggered, Event::BurstRequested]);
        assert_eq!(state.mode(), Mode::SingleBurst);
        assert_eq!(state.apply(Event::Exhausted), Ok(Phase::Idle));
        assert_eq!(state.mode(), Mode::Loop);
    }

    #[test]
    fn burst_requested_mid_restart_finishes_one_more_pass() {
        let mut state = PairState::new();
        drive(
            &mut state,
            &[Event::Configured, Event::Triggered, Event::Exhausted, Event::BurstRequested],
        );
        assert_eq!(state.phase(), Phase::ChainTrigger);
        assert_eq!(
            drive(&mut state, &[Event::Restarted, Event::Triggered, Event::Exhausted]),
            Phase::Idle
        );
    }

    #[test]
    fn abort_is_reachable_from_every_active_phase() {
        let prefixes: [&[Event]; 3] = [
            &[Event::Configured],
            &[Event::Configured, Event::Triggered],
            &[Event::Configured, Event::Triggered, Event::Exhausted],
        ];
        for prefix in prefixes {
            let mut state = PairState::new();
            drive(&mut state, prefix);
            assert_eq!(state.apply(Event::AbortRequested), Ok(Phase::Aborting));
            // A second request while the first is outstanding is fine.
            assert_eq!(state.apply(Event::AbortRequested), Ok(Phase::Aborting));
            assert_eq!(state.apply(Event::AbortConfirmed), Ok(Phase::Idle));
        }
    }

    #[test]
    fn abort_while_idle_stays_idle() {
        let mut state = PairState::new();
        assert_eq!(state.apply(Event::AbortRequested), Ok(Phase::Idle));
        assert_eq!(state.apply(Event::AbortRequested), Ok(Phase::Idle));
    }

    #[test]
    fn illegal_events_leave_state_alone() {
        let mut state = PairState::new();
        assert_eq!(
            state.apply(Event::Triggered),
            Err(Error::InvalidTransition {
                from: Phase::Idle,
                event: Event::Triggered
            })
        );
        assert_eq!(state, PairState::new());

        drive(&mut state, &[Event::Configured, Event::Triggered]);
        assert!(state.apply(Event::Configured).is_err());
        assert!(state.apply(Event::Restarted).is_err());
        assert_eq!(state.phase(), Phase::Running);
    }
}
