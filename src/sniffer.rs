/// Sniffer engine — ties break detection, capture, decoding, loop tracking
/// and frame memory into one acquisition cycle.
///
/// Two execution contexts share the [`BusMonitor`]: the edge interrupt
/// (break detector) and the main loop, which calls [`Sniffer::run_cycle`]
/// over and over. A cycle spins until the ISR reports a finished break,
/// captures one byte window, classifies it and reports it to an
/// [`EventSink`].
use core::fmt;

use embedded_hal::delay::DelayNs;

use crate::bus::{BitTiming, BusMonitor, BusState};
use crate::capture::{capture_window, Capture, LinUart};
use crate::frame::{decode, Frame, Identifier};
use crate::memory::{Classification, FrameMemory};
use crate::schedule::LoopTracker;

/// Receiver of sniffer events.
///
/// Exactly one of `new_frame`, `changed_frame` or `unchanged_frame` is
/// called per decoded frame. `new_loop` is called independently, before the
/// frame report, whenever the frame's identifier closes a schedule loop.
pub trait EventSink {
    fn new_loop(&mut self, previous_loop_frames: u8);
    fn new_frame(&mut self, frame: &Frame);
    fn changed_frame(&mut self, frame: &Frame, previous: &Frame);
    fn unchanged_frame(&mut self, frame: &Frame);
}

/// Control over the both-edges interrupt on the bus pin.
///
/// The handler itself is installed by the platform and must forward to
/// [`BusMonitor::on_edge`], disarming when it returns `EdgeAction::Disarm`.
pub trait BusLine {
    fn arm(&mut self);
    fn disarm(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Configuration change attempted while the sniffer is running
    InvalidState,
    /// A bit rate of zero
    InvalidBitRate,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidState => write!(f, "sniffer must be stopped"),
            Error::InvalidBitRate => write!(f, "bit rate must be greater than zero"),
        }
    }
}

impl Error {
    pub fn as_str(&self) -> &'static str {
        match self {
            Error::InvalidState => "not_stopped",
            Error::InvalidBitRate => "invalid_bit_rate",
        }
    }
}

/// What one call to [`Sniffer::run_cycle`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Stopped, either before or during the cycle. Nothing was reported.
    Idle,
    /// The captured window was unusable and was dropped
    Discarded,
    /// A frame with this identifier was decoded and reported
    Decoded(Identifier),
}

pub struct Sniffer<'m, L, U, D> {
    monitor: &'m BusMonitor,
    line: L,
    uart: U,
    delay: D,
    timing: BitTiming,
    loops: LoopTracker,
    memory: FrameMemory,
}

impl<'m, L, U, D> Sniffer<'m, L, U, D>
where
    L: BusLine,
    U: LinUart,
    D: DelayNs,
{
    /// Build a stopped sniffer at the default bit rate with empty memory.
    pub fn new(monitor: &'m BusMonitor, line: L, uart: U, delay: D) -> Self {
        let timing = BitTiming::default();
        monitor.set_min_break_us(timing.min_break_us);
        Self {
            monitor,
            line,
            uart,
            delay,
            timing,
            loops: LoopTracker::new(),
            memory: FrameMemory::new(),
        }
    }

    pub fn state(&self) -> BusState {
        self.monitor.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() != BusState::Stopped
    }

    pub fn timing(&self) -> &BitTiming {
        &self.timing
    }

    pub fn bit_rate(&self) -> u32 {
        self.timing.bit_rate
    }

    pub fn memory(&self) -> &FrameMemory {
        &self.memory
    }

    pub fn loop_tracker(&self) -> &LoopTracker {
        &self.loops
    }

    /// Begin listening for breaks. No-op while already running.
    /// Loop and frame memory are kept.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.monitor.set_min_break_us(self.timing.min_break_us);
        // State first: the interrupt may fire as soon as the line is armed
        self.monitor.arm();
        self.line.arm();
        log::info!("Sniffer started at {} bit/s", self.timing.bit_rate);
    }

    /// Stop listening. Safe at any point; an in-flight capture is dropped.
    pub fn stop(&mut self) {
        self.line.disarm();
        if self.monitor.halt() != BusState::Stopped {
            log::info!("Sniffer stopped");
        }
    }

    /// Change the bit rate. Only allowed while stopped.
    pub fn set_bit_rate(&mut self, bit_rate: u32) -> Result<(), Error> {
        if self.is_running() {
            return Err(Error::InvalidState);
        }
        let timing = BitTiming::from_bit_rate(bit_rate).ok_or(Error::InvalidBitRate)?;
        self.timing = timing;
        self.monitor.set_min_break_us(timing.min_break_us);
        log::info!(
            "Bit rate set to {} (break >= {} us, window {} us)",
            timing.bit_rate,
            timing.min_break_us,
            timing.max_frame_us
        );
        Ok(())
    }

    /// Forget all loop and frame history. Independent of start/stop.
    pub fn reset(&mut self) {
        self.loops.clear();
        self.memory.clear();
        log::info!("Frame memory cleared");
    }

    /// Run one acquisition cycle: wait for a break, capture, decode,
    /// classify and report.
    ///
    /// Blocks until a break is seen or the bus monitor is halted. Returns
    /// immediately when stopped.
    pub fn run_cycle<S: EventSink>(&mut self, sink: &mut S) -> CycleOutcome {
        loop {
            match self.monitor.state() {
                BusState::Stopped => return CycleOutcome::Idle,
                BusState::ReadingBytes => break,
                _ => core::hint::spin_loop(),
            }
        }

        let capture = capture_window(&mut self.uart, &mut self.delay, &self.timing);

        if self.monitor.state() != BusState::ReadingBytes {
            // Stopped while the window was open
            return CycleOutcome::Idle;
        }

        let outcome = match capture {
            Capture::Valid(window) => match decode(&window) {
                Some(frame) => {
                    self.report(&frame, sink);
                    CycleOutcome::Decoded(frame.id)
                }
                None => CycleOutcome::Discarded,
            },
            Capture::Invalid { available, read } => {
                log::debug!("Dropped window: {} available, {} read", available, read);
                CycleOutcome::Discarded
            }
        };

        self.resume();
        outcome
    }

    fn report<S: EventSink>(&mut self, frame: &Frame, sink: &mut S) {
        if let Some(frames) = self.loops.observe(frame.id) {
            log::debug!("Schedule loop closed after {} frames", frames);
            sink.new_loop(frames);
        }

        match self.memory.classify(frame) {
            Classification::New => sink.new_frame(frame),
            Classification::Changed { previous } => sink.changed_frame(frame, &previous),
            Classification::Unchanged => sink.unchanged_frame(frame),
        }
    }

    /// Listen for the next break unless a stop came in meanwhile.
    fn resume(&mut self) {
        if self.monitor.rearm() {
            self.line.arm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use crate::bus::EdgeAction;

    /// Replays scripted pin edges into the monitor whenever the line is
    /// armed, the way a real pin would interrupt right after attachment.
    struct ScriptedLine<'m> {
        monitor: &'m BusMonitor,
        edges: VecDeque<(bool, u32)>,
        armed: bool,
        arm_count: usize,
    }

    impl<'m> ScriptedLine<'m> {
        fn new(monitor: &'m BusMonitor, edges: Vec<(bool, u32)>) -> Self {
            Self {
                monitor,
                edges: edges.into(),
                armed: false,
                arm_count: 0,
            }
        }
    }

    impl BusLine for ScriptedLine<'_> {
        fn arm(&mut self) {
            self.armed = true;
            self.arm_count += 1;
            while let Some((high, now)) = self.edges.pop_front() {
                if self.monitor.on_level(high, now) == EdgeAction::Disarm {
                    self.armed = false;
                    break;
                }
            }
        }
        fn disarm(&mut self) {
            self.armed = false;
        }
    }

    struct IdleLine;

    impl BusLine for IdleLine {
        fn arm(&mut self) {}
        fn disarm(&mut self) {}
    }

    /// Delivers one scripted window per enable.
    #[derive(Default)]
    struct ScriptedUart {
        windows: VecDeque<Vec<u8>>,
        rx: VecDeque<u8>,
        enabled_rates: Vec<u32>,
    }

    impl ScriptedUart {
        fn with_windows(windows: &[&[u8]]) -> Self {
            Self {
                windows: windows.iter().map(|w| w.to_vec()).collect(),
                ..Default::default()
            }
        }
    }

    impl LinUart for ScriptedUart {
        fn enable(&mut self, bit_rate: u32) {
            self.enabled_rates.push(bit_rate);
            self.rx = self.windows.pop_front().unwrap_or_default().into();
        }
        fn available(&mut self) -> usize {
            self.rx.len()
        }
        fn read(&mut self, buf: &mut [u8]) -> usize {
            let n = buf.len().min(self.rx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.rx.pop_front().unwrap();
            }
            n
        }
        fn disable(&mut self) {
            self.rx.clear();
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Loop(u8),
        New(Frame),
        Changed(Frame, Frame),
        Unchanged(Frame),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<Event>,
    }

    impl EventSink for RecordingSink {
        fn new_loop(&mut self, previous_loop_frames: u8) {
            self.events.push(Event::Loop(previous_loop_frames));
        }
        fn new_frame(&mut self, frame: &Frame) {
            self.events.push(Event::New(frame.clone()));
        }
        fn changed_frame(&mut self, frame: &Frame, previous: &Frame) {
            self.events.push(Event::Changed(frame.clone(), previous.clone()));
        }
        fn unchanged_frame(&mut self, frame: &Frame) {
            self.events.push(Event::Unchanged(frame.clone()));
        }
    }

    /// `count` valid 9600 bit/s breaks, 20 ms apart, preceded by a glitch.
    fn breaks(count: u32) -> Vec<(bool, u32)> {
        let mut edges = vec![(false, 0), (true, 50)];
        for i in 0..count {
            let t = 1000 + i * 20_000;
            edges.push((false, t));
            edges.push((true, t + 1300));
        }
        edges
    }

    fn frame(window: &[u8]) -> Frame {
        decode(window).unwrap()
    }

    const WINDOW_A: &[u8] = &[0x55, 0x01, 0x11, 0x22, 0x9A];
    const WINDOW_A2: &[u8] = &[0x55, 0x01, 0x11, 0x23, 0x9A];

    #[test]
    fn concrete_scenario_new_unchanged_changed() {
        let monitor = BusMonitor::new();
        let line = ScriptedLine::new(&monitor, breaks(3));
        let uart = ScriptedUart::with_windows(&[WINDOW_A, WINDOW_A, WINDOW_A2]);
        let mut sniffer = Sniffer::new(&monitor, line, uart, NoDelay);
        let mut sink = RecordingSink::default();

        sniffer.start();
        for _ in 0..3 {
            assert_eq!(
                sniffer.run_cycle(&mut sink),
                CycleOutcome::Decoded(Identifier::new(1).unwrap())
            );
        }

        assert_eq!(
            sink.events,
            vec![
                Event::New(frame(WINDOW_A)),
                Event::Loop(1),
                Event::Unchanged(frame(WINDOW_A)),
                Event::Loop(1),
                Event::Changed(frame(WINDOW_A2), frame(WINDOW_A)),
            ]
        );
        if let Event::Changed(_, previous) = &sink.events[4] {
            assert_eq!(previous.data.as_slice(), &[0x11, 0x22]);
        }
        assert_eq!(sniffer.uart.enabled_rates, vec![9600, 9600, 9600]);
    }

    #[test]
    fn loop_boundary_on_repeated_identifier() {
        let ids = [0x0A, 0x0B, 0x0C, 0x0A, 0x0D];
        let windows: Vec<[u8; 3]> = ids.iter().map(|&id| [0x55, id, 0x00]).collect();
        let window_refs: Vec<&[u8]> = windows.iter().map(|w| w.as_slice()).collect();

        let monitor = BusMonitor::new();
        let line = ScriptedLine::new(&monitor, breaks(5));
        let uart = ScriptedUart::with_windows(&window_refs);
        let mut sniffer = Sniffer::new(&monitor, line, uart, NoDelay);
        let mut sink = RecordingSink::default();

        sniffer.start();
        for _ in 0..4 {
            sniffer.run_cycle(&mut sink);
        }
        assert!(sniffer.loop_tracker().contains(Identifier::new(0x0A).unwrap()));
        assert_eq!(sniffer.loop_tracker().len(), 1);
        sniffer.run_cycle(&mut sink);

        let loops: Vec<&Event> = sink.events.iter().filter(|e| matches!(e, Event::Loop(_))).collect();
        assert_eq!(loops, vec![&Event::Loop(3)]);
        // Loop boundary is reported before the frame that closed it
        assert_eq!(sink.events[3], Event::Loop(3));
        assert_eq!(sink.events[4], Event::Unchanged(frame(&[0x55, 0x0A, 0x00])));
    }

    #[test]
    fn invalid_windows_are_dropped_silently() {
        let monitor = BusMonitor::new();
        // One scripted break; later breaks are fed by hand so the state can
        // be inspected between cycles.
        let line = ScriptedLine::new(&monitor, breaks(1));
        let uart = ScriptedUart::with_windows(&[&[0x55], &[], WINDOW_A]);
        let mut sniffer = Sniffer::new(&monitor, line, uart, NoDelay);
        let mut sink = RecordingSink::default();

        sniffer.start();
        assert_eq!(sniffer.run_cycle(&mut sink), CycleOutcome::Discarded);
        assert_eq!(sniffer.state(), BusState::WaitingForBreak);

        assert_eq!(monitor.on_level(false, 50_000), EdgeAction::Keep);
        assert_eq!(monitor.on_level(true, 51_300), EdgeAction::Disarm);
        assert_eq!(sniffer.run_cycle(&mut sink), CycleOutcome::Discarded);
        assert_eq!(sniffer.state(), BusState::WaitingForBreak);
        assert!(sink.events.is_empty());

        monitor.on_level(false, 70_000);
        monitor.on_level(true, 71_300);
        assert!(matches!(sniffer.run_cycle(&mut sink), CycleOutcome::Decoded(_)));
        assert_eq!(sink.events, vec![Event::New(frame(WINDOW_A))]);
    }

    #[test]
    fn stopped_cycle_is_noop() {
        let monitor = BusMonitor::new();
        let uart = ScriptedUart::with_windows(&[WINDOW_A]);
        let mut sniffer = Sniffer::new(&monitor, IdleLine, uart, NoDelay);
        let mut sink = RecordingSink::default();

        assert_eq!(sniffer.run_cycle(&mut sink), CycleOutcome::Idle);
        assert!(sniffer.uart.enabled_rates.is_empty());
        assert!(sink.events.is_empty());
    }

    #[test]
    fn stop_is_idempotent() {
        let monitor = BusMonitor::new();
        let line = ScriptedLine::new(&monitor, vec![]);
        let mut sniffer = Sniffer::new(&monitor, line, ScriptedUart::default(), NoDelay);
        let mut sink = RecordingSink::default();

        sniffer.start();
        assert_eq!(sniffer.state(), BusState::WaitingForBreak);
        sniffer.stop();
        sniffer.stop();
        assert_eq!(sniffer.state(), BusState::Stopped);
        assert!(!sniffer.line.armed);
        assert_eq!(sniffer.run_cycle(&mut sink), CycleOutcome::Idle);
        assert!(sink.events.is_empty());
    }

    #[test]
    fn start_twice_arms_once() {
        let monitor = BusMonitor::new();
        let line = ScriptedLine::new(&monitor, vec![]);
        let mut sniffer = Sniffer::new(&monitor, line, ScriptedUart::default(), NoDelay);
        sniffer.start();
        sniffer.start();
        assert_eq!(sniffer.line.arm_count, 1);
    }

    #[test]
    fn bit_rate_only_changes_while_stopped() {
        let monitor = BusMonitor::new();
        let mut sniffer = Sniffer::new(&monitor, IdleLine, ScriptedUart::default(), NoDelay);

        sniffer.start();
        assert_eq!(sniffer.set_bit_rate(19200), Err(Error::InvalidState));
        assert_eq!(sniffer.bit_rate(), 9600);
        assert_eq!(sniffer.state(), BusState::WaitingForBreak);

        sniffer.stop();
        assert_eq!(sniffer.set_bit_rate(0), Err(Error::InvalidBitRate));
        assert_eq!(sniffer.set_bit_rate(19200), Ok(()));
        assert_eq!(sniffer.timing().min_break_us, 11 * 52);
        assert_eq!(monitor.min_break_us(), 11 * 52);
        assert_eq!(sniffer.timing().max_frame_us, 154_000_000 / 19200);
    }

    #[test]
    fn new_rate_applies_to_break_and_uart() {
        let monitor = BusMonitor::new();
        // 700 us low: too short at 9600 (1144 us) but long enough at 19200 (572 us)
        let edges = vec![(false, 0), (true, 700)];
        let line = ScriptedLine::new(&monitor, edges);
        let uart = ScriptedUart::with_windows(&[WINDOW_A]);
        let mut sniffer = Sniffer::new(&monitor, line, uart, NoDelay);
        let mut sink = RecordingSink::default();

        sniffer.set_bit_rate(19200).unwrap();
        sniffer.start();
        assert_eq!(sniffer.state(), BusState::ReadingBytes);
        sniffer.run_cycle(&mut sink);
        assert_eq!(sniffer.uart.enabled_rates, vec![19200]);
    }

    #[test]
    fn memory_survives_stop_start_until_reset() {
        let monitor = BusMonitor::new();
        // The break armed right before stop() is lost, hence one spare
        let line = ScriptedLine::new(&monitor, breaks(4));
        let uart = ScriptedUart::with_windows(&[WINDOW_A, WINDOW_A, WINDOW_A]);
        let mut sniffer = Sniffer::new(&monitor, line, uart, NoDelay);
        let mut sink = RecordingSink::default();

        sniffer.start();
        sniffer.run_cycle(&mut sink);
        sniffer.stop();
        sniffer.start();
        sniffer.run_cycle(&mut sink);
        assert_eq!(sink.events.last(), Some(&Event::Unchanged(frame(WINDOW_A))));

        sniffer.reset();
        assert!(sniffer.memory().is_empty());
        assert!(sniffer.loop_tracker().is_empty());
        sniffer.run_cycle(&mut sink);
        assert_eq!(sink.events.last(), Some(&Event::New(frame(WINDOW_A))));
    }

    #[test]
    fn halt_during_capture_abandons_window() {
        struct HaltingDelay<'m>(&'m BusMonitor);

        impl DelayNs for HaltingDelay<'_> {
            fn delay_ns(&mut self, _ns: u32) {
                self.0.halt();
            }
            fn delay_us(&mut self, _us: u32) {
                self.0.halt();
            }
        }

        let monitor = BusMonitor::new();
        let line = ScriptedLine::new(&monitor, breaks(1));
        let uart = ScriptedUart::with_windows(&[WINDOW_A]);
        let mut sniffer = Sniffer::new(&monitor, line, uart, HaltingDelay(&monitor));
        let mut sink = RecordingSink::default();

        sniffer.start();
        assert_eq!(sniffer.run_cycle(&mut sink), CycleOutcome::Idle);
        assert_eq!(sniffer.state(), BusState::Stopped);
        assert!(sink.events.is_empty());
        assert!(sniffer.memory().is_empty());
        // The line is not re-armed after an abandoned capture
        assert_eq!(sniffer.line.arm_count, 1);
    }

    #[test]
    fn break_from_interrupt_thread_releases_main_loop() {
        let monitor = BusMonitor::new();
        let uart = ScriptedUart::with_windows(&[WINDOW_A]);
        let mut sniffer = Sniffer::new(&monitor, IdleLine, uart, NoDelay);
        let mut sink = RecordingSink::default();

        sniffer.start();
        let outcome = std::thread::scope(|s| {
            s.spawn(|| {
                monitor.on_level(false, 10_000);
                monitor.on_level(true, 12_000)
            });
            sniffer.run_cycle(&mut sink)
        });

        assert_eq!(outcome, CycleOutcome::Decoded(Identifier::new(1).unwrap()));
        assert_eq!(sink.events, vec![Event::New(frame(WINDOW_A))]);
        assert_eq!(sniffer.state(), BusState::WaitingForBreak);
    }

    #[test]
    fn halt_from_other_context_ends_wait() {
        let monitor = BusMonitor::new();
        let mut sniffer = Sniffer::new(&monitor, IdleLine, ScriptedUart::default(), NoDelay);
        let mut sink = RecordingSink::default();

        sniffer.start();
        let outcome = std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(std::time::Duration::from_millis(10));
                monitor.halt();
            });
            sniffer.run_cycle(&mut sink)
        });

        assert_eq!(outcome, CycleOutcome::Idle);
        assert!(sink.events.is_empty());
        assert!(!sniffer.is_running());
    }

    #[test]
    fn error_display() {
        assert_eq!(Error::InvalidState.to_string(), "sniffer must be stopped");
        assert_eq!(Error::InvalidState.as_str(), "not_stopped");
    }
}
