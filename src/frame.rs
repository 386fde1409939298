/// LIN frame model and the raw-window decoder.
///
/// A captured window is laid out exactly as it appeared on the wire:
/// `[sync] [PID] [data 0..8] [checksum]`. Neither the sync value, the PID
/// parity bits nor the checksum are validated — the sniffer is receive-only
/// and reports what it saw.
use heapless::Vec;

/// Maximum number of data bytes in a LIN frame
pub const MAX_DATA_LEN: usize = 8;

/// Longest possible window: sync + PID + 8 data + checksum
pub const MAX_WINDOW_LEN: usize = 11;

/// Shortest window that still carries an identifier: sync + PID
pub const MIN_WINDOW_LEN: usize = 2;

/// Mask selecting the identifier bits of a protected identifier byte
pub const PID_ID_MASK: u8 = 0x3F;

/// Diagnostic master request identifier
pub const DIAG_MASTER_REQUEST: u8 = 0x3C;

/// Diagnostic slave response identifier
pub const DIAG_SLAVE_RESPONSE: u8 = 0x3D;

/// Data bytes of a frame, bounded by the protocol's 8-byte limit
pub type FrameData = Vec<u8, MAX_DATA_LEN>;

/// A 6-bit LIN frame identifier (0..=63).
///
/// The only way to build one is by masking or range-checking, so any
/// `Identifier` is a valid index into a 64-entry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(u8);

impl Identifier {
    /// Size of the identifier space
    pub const COUNT: usize = 64;

    /// Range-checked constructor.
    pub const fn new(raw: u8) -> Option<Self> {
        if raw <= PID_ID_MASK {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Strip the two parity bits off a protected identifier byte.
    pub const fn from_pid(pid: u8) -> Self {
        Self(pid & PID_ID_MASK)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// True for the diagnostic request/response identifiers (0x3C, 0x3D).
    pub const fn is_diagnostic(self) -> bool {
        self.0 == DIAG_MASTER_REQUEST || self.0 == DIAG_SLAVE_RESPONSE
    }
}

/// One decoded LIN frame.
///
/// Equality covers the identifier, every data byte (and therefore the data
/// count) and the checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: Identifier,
    pub data: FrameData,
    /// Present only if the window had at least 3 bytes
    pub checksum: Option<u8>,
}

impl Frame {
    pub fn data_count(&self) -> u8 {
        self.data.len() as u8
    }
}

/// Decode a raw byte window into a [`Frame`].
///
/// - 2 bytes: identifier only
/// - 3 bytes: identifier + checksum, no data
/// - 4..=11 bytes: identifier + `n - 3` data bytes + checksum
///
/// Returns `None` for windows outside `MIN_WINDOW_LEN..=MAX_WINDOW_LEN`.
pub fn decode(window: &[u8]) -> Option<Frame> {
    let n = window.len();
    if !(MIN_WINDOW_LEN..=MAX_WINDOW_LEN).contains(&n) {
        return None;
    }

    let id = Identifier::from_pid(window[1]);
    let checksum = if n >= 3 { Some(window[n - 1]) } else { None };

    let mut data = FrameData::new();
    if n >= 4 {
        // At most 8 bytes fit between PID and checksum of an 11-byte window
        let _ = data.extend_from_slice(&window[2..n - 1]);
    }

    Some(Frame { id, data, checksum })
}
