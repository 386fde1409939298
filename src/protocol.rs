/// JSON message protocol between the sniffer and a host terminal.
///
/// All messages are newline-delimited JSON (NDJSON).
/// Uses `heapless` types for no_std/no-alloc operation.
use serde::{Deserialize, Serialize};

/// Messages sent from the device to the host
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum DeviceMessage<'a> {
    /// The schedule wrapped around
    #[serde(rename = "loop")]
    Loop {
        /// Distinct identifiers seen in the loop that just ended
        frames: u8,
    },
    /// A decoded frame
    #[serde(rename = "frame")]
    Frame {
        /// "new", "changed" or "unchanged"
        kind: &'static str,
        id: u8,
        data: &'a [u8],
        /// Omitted when the window carried no checksum byte
        #[serde(skip_serializing_if = "Option::is_none")]
        chk: Option<u8>,
        /// Data bytes this frame replaced (changed frames only)
        #[serde(skip_serializing_if = "Option::is_none")]
        prev: Option<&'a [u8]>,
    },
    /// Compact marker for an unchanged frame
    #[serde(rename = "seen")]
    Seen { id: u8 },
    /// Sniffer status report
    #[serde(rename = "status")]
    Status {
        running: bool,
        /// Bus acquisition state
        state: &'static str,
        baud: u32,
        /// Number of identifiers held in frame memory
        frames: u8,
        /// Board identifier
        board: &'static str,
        /// Firmware version
        version: &'static str,
    },
    /// A host command was rejected
    #[serde(rename = "error")]
    Error { reason: &'static str },
}

/// Commands sent from the host to the device.
///
/// Deserialized manually via [`RawCommand`] in `comm::parse_command()` because
/// `serde_json_core` does not support internally tagged enums (`deserialize_any`).
#[derive(Debug, PartialEq)]
pub enum HostCommand {
    /// Start sniffing
    Start,
    /// Stop sniffing
    Stop,
    /// Clear loop and frame memory
    Reset,
    /// Request current status
    GetStatus,
    /// Change the LIN bit rate (only while stopped)
    SetBaud { baud: u32 },
    /// Hide diagnostic frames (0x3C/0x3D) from the report
    SetIgnoreDiag { enabled: bool },
    /// Report unchanged frames in full instead of as `seen` markers
    SetShowUnchanged { enabled: bool },
}

/// Wire format for host commands — flat struct that `serde_json_core` can
/// deserialize without `deserialize_any`. Converted to [`HostCommand`] in
/// `comm::parse_command()`.
#[derive(Deserialize)]
pub(crate) struct RawCommand {
    pub cmd: heapless::String<24>,
    #[serde(default)]
    pub baud: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl RawCommand {
    pub(crate) fn into_command(self) -> Option<HostCommand> {
        match self.cmd.as_str() {
            "start" => Some(HostCommand::Start),
            "stop" => Some(HostCommand::Stop),
            "reset" => Some(HostCommand::Reset),
            "status" => Some(HostCommand::GetStatus),
            "set_baud" => self.baud.map(|baud| HostCommand::SetBaud { baud }),
            "set_ignore_diag" => self
                .enabled
                .map(|enabled| HostCommand::SetIgnoreDiag { enabled }),
            "set_show_unchanged" => self
                .enabled
                .map(|enabled| HostCommand::SetShowUnchanged { enabled }),
            _ => None,
        }
    }
}

/// Firmware version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 256;
