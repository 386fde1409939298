/// Bus timing state shared between the edge interrupt and the main loop.
///
/// The break detector runs in interrupt context: it only reads the pin
/// level and the microsecond clock and moves the [`BusState`] along. All
/// shared fields are atomics with acquire/release ordering, so the main loop
/// can spin on [`BusMonitor::state`] while the ISR writes it.
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use embedded_hal::digital::InputPin;

/// A LIN break is a dominant pulse of at least this many bit times
pub const BREAK_BITS: u32 = 11;

/// Worst-case frame duration in bit times after the break:
/// header 1.4 × 20 bits + response 1.4 × 10 × (8 + 1) bits = 154 bits
pub const FRAME_WINDOW_BITS: u32 = 154;

/// Default LIN bit rate
pub const DEFAULT_BIT_RATE: u32 = 9600;

/// Monotonic microsecond clock. Allowed to wrap at `u32::MAX`.
pub trait MicrosClock {
    fn now_us(&self) -> u32;
}

/// Acquisition state of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BusState {
    Stopped = 0,
    WaitingForBreak = 1,
    MeasuringBreak = 2,
    ReadingBytes = 3,
}

impl BusState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => BusState::WaitingForBreak,
            2 => BusState::MeasuringBreak,
            3 => BusState::ReadingBytes,
            _ => BusState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BusState::Stopped => "stopped",
            BusState::WaitingForBreak => "waiting_for_break",
            BusState::MeasuringBreak => "measuring_break",
            BusState::ReadingBytes => "reading_bytes",
        }
    }
}

/// Durations derived from the configured bit rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    pub bit_rate: u32,
    /// Shortest low pulse accepted as a break field
    pub min_break_us: u32,
    /// How long the UART listens after a break
    pub max_frame_us: u32,
}

impl BitTiming {
    /// Returns `None` for a zero bit rate.
    pub const fn from_bit_rate(bit_rate: u32) -> Option<Self> {
        if bit_rate == 0 {
            return None;
        }
        let bit_time_us = 1_000_000 / bit_rate;
        Some(Self {
            bit_rate,
            min_break_us: BREAK_BITS * bit_time_us,
            max_frame_us: (FRAME_WINDOW_BITS as u64 * 1_000_000 / bit_rate as u64) as u32,
        })
    }
}

impl Default for BitTiming {
    fn default() -> Self {
        // 9600 bit/s: 1144 us break, 16041 us window
        Self {
            bit_rate: DEFAULT_BIT_RATE,
            min_break_us: BREAK_BITS * (1_000_000 / DEFAULT_BIT_RATE),
            max_frame_us: FRAME_WINDOW_BITS * 1_000_000 / DEFAULT_BIT_RATE,
        }
    }
}

/// What the ISR glue must do after an edge was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAction {
    /// Keep the edge interrupt attached
    Keep,
    /// A valid break ended; detach the edge interrupt
    Disarm,
}

/// Bus state cell, break timestamp and break threshold.
///
/// Meant to live in a `static` so the interrupt handler can reach it.
pub struct BusMonitor {
    state: AtomicU8,
    break_start_us: AtomicU32,
    min_break_us: AtomicU32,
}

impl BusMonitor {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(BusState::Stopped as u8),
            break_start_us: AtomicU32::new(0),
            min_break_us: AtomicU32::new(BREAK_BITS * (1_000_000 / DEFAULT_BIT_RATE)),
        }
    }

    #[inline]
    pub fn state(&self) -> BusState {
        BusState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Timestamp of the falling edge of the current break candidate.
    /// Only meaningful while measuring.
    pub fn break_start_us(&self) -> u32 {
        self.break_start_us.load(Ordering::Acquire)
    }

    pub fn min_break_us(&self) -> u32 {
        self.min_break_us.load(Ordering::Acquire)
    }

    pub(crate) fn set_min_break_us(&self, us: u32) {
        self.min_break_us.store(us, Ordering::Release);
    }

    /// Atomically move `from` → `to`. Fails if another context changed the
    /// state first (e.g. a stop that raced an edge).
    fn transition(&self, from: BusState, to: BusState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter `WaitingForBreak` unconditionally.
    pub(crate) fn arm(&self) {
        self.state
            .store(BusState::WaitingForBreak as u8, Ordering::Release);
    }

    /// Return to `WaitingForBreak` after a capture. Returns `false` if the
    /// bus was stopped in the meantime.
    pub(crate) fn rearm(&self) -> bool {
        self.transition(BusState::ReadingBytes, BusState::WaitingForBreak)
    }

    /// Force `Stopped` from any state. Safe to call from any context;
    /// returns the state that was interrupted.
    pub fn halt(&self) -> BusState {
        BusState::from_u8(self.state.swap(BusState::Stopped as u8, Ordering::AcqRel))
    }

    /// Break detector: handle one pin change with the line at `high` and
    /// the clock at `now_us`.
    ///
    /// Interrupt-safe: no blocking, no allocation, no logging.
    pub fn on_level(&self, high: bool, now_us: u32) -> EdgeAction {
        match self.state() {
            BusState::WaitingForBreak if !high => {
                self.break_start_us.store(now_us, Ordering::Release);
                self.transition(BusState::WaitingForBreak, BusState::MeasuringBreak);
                EdgeAction::Keep
            }
            BusState::MeasuringBreak if high => {
                let elapsed = now_us.wrapping_sub(self.break_start_us());
                if elapsed >= self.min_break_us() {
                    if self.transition(BusState::MeasuringBreak, BusState::ReadingBytes) {
                        return EdgeAction::Disarm;
                    }
                } else {
                    // Too short — glitch or a dominant data bit. Listen again.
                    self.transition(BusState::MeasuringBreak, BusState::WaitingForBreak);
                }
                EdgeAction::Keep
            }
            _ => EdgeAction::Keep,
        }
    }

    /// Interrupt handler entry point: samples the clock and the bus pin.
    /// A failed pin read is treated as no edge.
    pub fn on_edge<P: InputPin, C: MicrosClock>(&self, pin: &mut P, clock: &C) -> EdgeAction {
        let now_us = clock.now_us();
        match pin.is_high() {
            Ok(high) => self.on_level(high, now_us),
            Err(_) => EdgeAction::Keep,
        }
    }
}

impl Default for BusMonitor {
    fn default() -> Self {
        Self::new()
    }
}
