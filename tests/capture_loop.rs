//! The capture loop, run against the simulated bus

use core::{pin::Pin, task::Poll};

use rp_dma_capture::{
    pio::{self, Pio, PioBlock, RxFifo, Sampling, StateMachineId},
    poll_no_wake,
    ral::dma_register,
    sim::Simulator,
    state::{Event, Phase},
    Capture, Channel, ChannelId, Error, RegisterFile,
};

const SYSTEM_CLOCK_HZ: u32 = 192_000_000;
const GUARD: u32 = 0xDEAD_BEEF;
const SENTINEL: u32 = 0xFFFF_FFFF;
/// Three samples of all-ones on a 10-bit bus
const ALL_HIGH: u32 = 0x3FFF_FFFF;

fn ch(index: u8) -> ChannelId {
    ChannelId::new(index).unwrap()
}

/// Start the sampler on PIO0 SM0, reading GPIO0..9 high
fn sampler(sim: &Simulator) -> RxFifo {
    sim.set_inputs(|_| 0x3FF);
    let mut pio = Pio::new(sim, PioBlock::Pio0);
    pio.reset();
    let sampling = Sampling {
        in_base: 0,
        clock_pin: 11,
        bus_width: 10,
        samples_per_word: 3,
        frequency_hz: SYSTEM_CLOCK_HZ,
    };
    let (_, fifo) =
        pio::start_sampler(&mut pio, StateMachineId::SM0, &sampling, SYSTEM_CLOCK_HZ).unwrap();
    fifo
}

/// A session on channels 0 and 1 whose buffer has `spare` guard words
/// after the `words` it captures
fn session(sim: &Simulator, words: usize, spare: usize) -> Capture<'_, Simulator> {
    let source = sampler(sim);
    let buffer = sim.allocate_buffer(words + spare).unwrap();
    sim.fill(&buffer, GUARD);
    let descriptor = sim.allocate_descriptor().unwrap();
    Capture::new(sim, ch(0), ch(1), source, buffer, descriptor).unwrap()
}

fn words(sim: &Simulator, capture: &Capture<'_, Simulator>, count: usize) -> Vec<u32> {
    (0..count)
        .map(|index| sim.peek(capture.buffer().address_of(index).unwrap()))
        .collect()
}

#[test]
fn one_pass_fills_exactly_the_requested_words() {
    const N: usize = 16;
    let sim = Simulator::new();
    let mut capture = session(&sim, N, 4);
    capture.start(N).unwrap();

    assert!(sim.run_until(10_000, |sim| sim.completions(ch(0)) >= 1));
    let captured = words(&sim, &capture, N + 4);
    assert_eq!(&captured[..N], &[ALL_HIGH; N]);
    assert_eq!(&captured[N..], &[GUARD; 4]);
    assert_eq!(sim.bus_errors(), 0);
}

#[test]
fn every_pass_of_a_long_run_restarts_at_the_origin() {
    const N: usize = 16;
    const PASSES: u64 = 1000;
    let sim = Simulator::new();
    let mut capture = session(&sim, N, 4);
    capture.start(N).unwrap();
    let origin = capture.buffer().origin();
    let mut state = capture.state();

    let mut restarts = 0;
    let mut cycles = 0;
    while restarts < PASSES {
        let activity = sim.step();
        cycles += 1;
        assert!(cycles < PASSES * 200, "capture loop stalled");

        if activity.completed(ch(0)) {
            assert_eq!(state.apply(Event::Exhausted), Ok(Phase::ChainTrigger));
            assert_eq!(capture.primary().write_address(), origin + 4 * N as u32);
        }
        if activity.completed(ch(1)) {
            assert_eq!(state.apply(Event::Restarted), Ok(Phase::Armed));
            assert_eq!(capture.primary().write_address(), origin);
            restarts += 1;
        }
        if activity.triggered(ch(0)) {
            assert_eq!(state.apply(Event::Triggered), Ok(Phase::Running));
        }
    }

    assert_eq!(sim.completions(ch(1)), PASSES);
    assert!(sim.completions(ch(0)) >= PASSES);
    let captured = words(&sim, &capture, N + 4);
    assert_eq!(&captured[..N], &[ALL_HIGH; N]);
    assert_eq!(&captured[N..], &[GUARD; 4]);
    assert_eq!(sim.bus_errors(), 0);
}

#[test]
fn full_buffer_replaces_every_sentinel() {
    const N: usize = 256;
    let sim = Simulator::new();
    let mut capture = session(&sim, N, 0);
    sim.fill(capture.buffer(), SENTINEL);
    capture.start(N).unwrap();

    assert!(sim.run_until(10_000, |sim| sim.completions(ch(0)) >= 1));
    assert!(words(&sim, &capture, N).iter().all(|&word| word != SENTINEL));
}

#[test]
fn stop_halts_all_writes_and_is_idempotent() {
    const N: usize = 16;
    let sim = Simulator::new();
    let mut capture = session(&sim, N, 0);
    capture.start(N).unwrap();
    sim.run(250);

    capture.stop().unwrap();
    capture.stop().unwrap();
    assert_eq!(capture.state().phase(), Phase::Idle);

    sim.fill(capture.buffer(), SENTINEL);
    let completions = (sim.completions(ch(0)), sim.completions(ch(1)));
    sim.run(1_000);
    assert_eq!(words(&sim, &capture, N), [SENTINEL; N]);
    assert_eq!(
        (sim.completions(ch(0)), sim.completions(ch(1))),
        completions
    );
}

#[test]
fn restart_after_stop_begins_at_the_origin() {
    const N: usize = 16;
    let sim = Simulator::new();
    let mut capture = session(&sim, N, 0);
    capture.start(N).unwrap();
    // Somewhere in the middle of the second pass.
    sim.run(150);
    capture.stop().unwrap();

    sim.fill(capture.buffer(), SENTINEL);
    capture.start(N).unwrap();
    assert_eq!(capture.primary().write_address(), capture.buffer().origin());
    assert_eq!(capture.primary().transfer_count(), N as u32);

    let first_pass = sim.completions(ch(0)) + 1;
    assert!(sim.run_until(10_000, |sim| sim.completions(ch(0)) >= first_pass));
    assert_eq!(words(&sim, &capture, N), [ALL_HIGH; N]);
}

#[test]
fn single_burst_ends_after_the_current_pass() {
    const N: usize = 16;
    let sim = Simulator::new();
    let mut capture = session(&sim, N, 0);
    capture.start(N).unwrap();
    sim.run(30);

    let mut burst = capture.finish().unwrap();
    let mut cycles = 0;
    let result = loop {
        if let Poll::Ready(result) = poll_no_wake(Pin::new(&mut burst)) {
            break result;
        }
        sim.step();
        cycles += 1;
        assert!(cycles < 10_000, "burst never completed");
    };
    drop(burst);
    assert_eq!(result, Ok(()));

    assert_eq!(sim.completions(ch(0)), 1);
    assert_eq!(sim.completions(ch(1)), 0);
    assert_eq!(capture.state().phase(), Phase::Idle);
    assert!(!capture.primary().is_busy());

    // Nothing restarts the primary any more.
    sim.fill(capture.buffer(), SENTINEL);
    sim.run(1_000);
    assert_eq!(words(&sim, &capture, N), [SENTINEL; N]);
}

#[test]
fn single_burst_completion_raises_the_interrupt() {
    const N: usize = 8;
    let sim = Simulator::new();
    let mut capture = session(&sim, N, 0);
    capture.start(N).unwrap();

    let mut burst = capture.finish().unwrap();
    assert_eq!(poll_no_wake(Pin::new(&mut burst)), Poll::Pending);
    assert!(sim.run_until(10_000, |sim| sim.read(dma_register::INTS0) & 1 != 0));

    rp_dma_capture::on_interrupt(&sim, ch(0));
    assert_eq!(sim.read(dma_register::INTS0), 0);
    assert_eq!(poll_no_wake(Pin::new(&mut burst)), Poll::Ready(Ok(())));
}

#[test]
fn looping_session_never_reports_a_finished_burst() {
    let sim = Simulator::new();
    let mut capture = session(&sim, 8, 0);
    capture.start(8).unwrap();
    for _ in 0..500 {
        sim.step();
        assert_eq!(capture.poll_burst(), Ok(false));
    }
}

#[test]
fn hung_abort_is_reported_and_can_be_retried() {
    let sim = Simulator::new();
    let mut capture = session(&sim, 16, 0).with_abort_poll_limit(100);
    capture.start(16).unwrap();
    sim.run(50);

    sim.set_abort_latency(u32::MAX);
    assert_eq!(capture.stop(), Err(Error::AbortTimeout { pending: 0b11 }));
    assert_eq!(capture.state().phase(), Phase::Aborting);

    sim.set_abort_latency(3);
    assert_eq!(capture.stop(), Ok(()));
    assert_eq!(capture.state().phase(), Phase::Idle);
    assert!(!capture.primary().is_enabled());
    assert!(!capture.restart().is_enabled());
}

#[test]
fn dropping_an_active_session_stops_it() {
    let sim = Simulator::new();
    {
        let mut capture = session(&sim, 16, 0);
        capture.start(16).unwrap();
        sim.run(20);
    }
    let completions = sim.completions(ch(0));
    sim.run(1_000);
    assert_eq!(sim.completions(ch(0)), completions);
    assert!(!Channel::new(&sim, ch(0)).is_enabled());
    assert!(!Channel::new(&sim, ch(1)).is_enabled());
}
