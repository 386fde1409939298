/// Host communication — NDJSON event stream out, NDJSON commands in.
///
/// [`MessageSink`] turns engine events into JSON lines; [`parse_command`]
/// and [`handle_command`] map incoming lines onto sniffer configuration.
use embedded_hal::delay::DelayNs;

use crate::board;
use crate::capture::LinUart;
use crate::frame::Frame;
use crate::protocol::{DeviceMessage, HostCommand, RawCommand, MAX_MSG_LEN, VERSION};
use crate::sniffer::{BusLine, EventSink, Sniffer};

/// Console baud rate
pub const SERIAL_BAUD: u32 = 115200;

/// LIN bit rates accepted from the host
pub const MIN_BIT_RATE: u32 = 1000;
pub const MAX_BIT_RATE: u32 = 20000;

/// Presentation options for the event stream. Classification and frame
/// memory are not affected by these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportConfig {
    /// Suppress reports for the diagnostic identifiers 0x3C/0x3D
    pub ignore_diagnostic: bool,
    /// Report unchanged frames in full rather than as `seen` markers
    pub show_unchanged: bool,
}

impl ReportConfig {
    pub const fn new() -> Self {
        Self {
            ignore_diagnostic: false,
            show_unchanged: false,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a DeviceMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message(msg: &DeviceMessage, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) => {
            // Append newline for NDJSON
            if len < buf.len() {
                buf[len] = b'\n';
                Some(len + 1)
            } else {
                Some(len)
            }
        }
        Err(_) => None,
    }
}

/// Deserialize a HostCommand from a JSON byte slice.
pub fn parse_command(data: &[u8]) -> Option<HostCommand> {
    let trimmed = data.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }
    serde_json_core::from_slice::<RawCommand>(trimmed)
        .ok()
        .and_then(|(raw, _)| raw.into_command())
}

/// Apply a host command to the sniffer and report options.
///
/// Returns the reply to send back, if the command produces one.
pub fn handle_command<L, U, D>(
    cmd: HostCommand,
    sniffer: &mut Sniffer<'_, L, U, D>,
    config: &mut ReportConfig,
) -> Option<DeviceMessage<'static>>
where
    L: BusLine,
    U: LinUart,
    D: DelayNs,
{
    match cmd {
        HostCommand::Start => {
            sniffer.start();
            None
        }
        HostCommand::Stop => {
            sniffer.stop();
            None
        }
        HostCommand::Reset => {
            sniffer.reset();
            None
        }
        HostCommand::GetStatus => Some(status_message(sniffer)),
        HostCommand::SetBaud { baud } => {
            if !(MIN_BIT_RATE..=MAX_BIT_RATE).contains(&baud) {
                log::warn!("Rejected bit rate {}", baud);
                return Some(DeviceMessage::Error {
                    reason: "baud_out_of_range",
                });
            }
            match sniffer.set_bit_rate(baud) {
                Ok(()) => None,
                Err(e) => {
                    log::warn!("Bit rate change refused: {}", e);
                    Some(DeviceMessage::Error { reason: e.as_str() })
                }
            }
        }
        HostCommand::SetIgnoreDiag { enabled } => {
            config.ignore_diagnostic = enabled;
            log::info!("Ignore diagnostic frames: {}", enabled);
            None
        }
        HostCommand::SetShowUnchanged { enabled } => {
            config.show_unchanged = enabled;
            log::info!("Show unchanged frames: {}", enabled);
            None
        }
    }
}

/// Build a status report for the current sniffer state.
pub fn status_message<L, U, D>(sniffer: &Sniffer<'_, L, U, D>) -> DeviceMessage<'static>
where
    L: BusLine,
    U: LinUart,
    D: DelayNs,
{
    DeviceMessage::Status {
        running: sniffer.is_running(),
        state: sniffer.state().as_str(),
        baud: sniffer.bit_rate(),
        frames: sniffer.memory().len() as u8,
        board: board::BOARD_NAME,
        version: VERSION,
    }
}

// ── Event stream ───────────────────────────────────────────────────────

/// [`EventSink`] that writes each event as one NDJSON line through `write`.
pub struct MessageSink<W: FnMut(&[u8])> {
    pub config: ReportConfig,
    write: W,
}

impl<W: FnMut(&[u8])> MessageSink<W> {
    pub fn new(config: ReportConfig, write: W) -> Self {
        Self { config, write }
    }

    /// Serialize and emit any message (events, status, errors).
    pub fn send(&mut self, msg: &DeviceMessage) {
        let mut buf = [0u8; MAX_MSG_LEN];
        if let Some(len) = serialize_message(msg, &mut buf) {
            (self.write)(&buf[..len]);
        }
    }

    fn hidden(&self, frame: &Frame) -> bool {
        self.config.ignore_diagnostic && frame.id.is_diagnostic()
    }

    fn send_frame(&mut self, kind: &'static str, frame: &Frame, previous: Option<&Frame>) {
        if self.hidden(frame) {
            return;
        }
        let msg = DeviceMessage::Frame {
            kind,
            id: frame.id.value(),
            data: &frame.data,
            chk: frame.checksum,
            prev: previous.map(|p| p.data.as_slice()),
        };
        self.send(&msg);
    }
}

impl<W: FnMut(&[u8])> EventSink for MessageSink<W> {
    fn new_loop(&mut self, previous_loop_frames: u8) {
        self.send(&DeviceMessage::Loop {
            frames: previous_loop_frames,
        });
    }

    fn new_frame(&mut self, frame: &Frame) {
        self.send_frame("new", frame, None);
    }

    fn changed_frame(&mut self, frame: &Frame, previous: &Frame) {
        self.send_frame("changed", frame, Some(previous));
    }

    fn unchanged_frame(&mut self, frame: &Frame) {
        if self.config.show_unchanged {
            self.send_frame("unchanged", frame, None);
        } else if !self.hidden(frame) {
            self.send(&DeviceMessage::Seen {
                id: frame.id.value(),
            });
        }
    }
}

// ── Serial NDJSON reader ───────────────────────────────────────────────

/// Serial NDJSON reader state machine.
/// Accumulates bytes until a newline is found, then yields the line.
pub struct LineReader {
    buf: [u8; MAX_MSG_LEN],
    pos: usize,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_MSG_LEN],
            pos: 0,
        }
    }

    /// Feed a byte into the reader. Returns a complete line (without newline)
    /// when one is detected.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if byte == b'\n' || byte == b'\r' {
            if self.pos > 0 {
                let line = &self.buf[..self.pos];
                self.pos = 0;
                Some(line)
            } else {
                None
            }
        } else if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
            None
        } else {
            // Overflow — discard and reset
            self.pos = 0;
            None
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}
