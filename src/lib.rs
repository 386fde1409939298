//! linsniff library — passive LIN bus sniffing engine.
//!
//! This crate contains the break detector, byte-window capture, frame
//! decoding, schedule-loop tracking and frame memory, plus the NDJSON
//! protocol spoken with a host terminal. It has no platform dependencies
//! and is testable on any host with `cargo test`. The ESP32 firmware binary
//! is a thin consumer that provides the bus pin interrupt, the LIN UART, a
//! microsecond clock and a console.
//!
//! Data flow for one acquisition cycle:
//! `bus` (ISR: break seen) → `capture` (UART window) → `frame` (decode) →
//! `schedule` + `memory` (classify) → `sniffer::EventSink`.
//!
//! `no_std`, no allocator.

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod bus;
pub mod capture;
pub mod comm;
pub mod frame;
pub mod memory;
pub mod protocol;
pub mod schedule;
pub mod sniffer;

pub use bus::{BitTiming, BusMonitor, BusState, EdgeAction, MicrosClock};
pub use frame::{Frame, Identifier};
pub use sniffer::{BusLine, CycleOutcome, Error, EventSink, Sniffer};
