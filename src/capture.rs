/// Byte-window capture after a detected break.
///
/// The UART is only switched on once the break has ended, so the first byte
/// it sees is the sync field. It then listens for the worst-case frame
/// duration and the receive buffer is drained in one go.
use embedded_hal::delay::DelayNs;
use heapless::Vec;

use crate::bus::BitTiming;
use crate::frame::{MAX_WINDOW_LEN, MIN_WINDOW_LEN};

/// Raw bytes captured for one frame
pub type RawWindow = Vec<u8, MAX_WINDOW_LEN>;

/// UART receiver used for the LIN data bytes. 8N1 framing, non-blocking.
pub trait LinUart {
    /// Start receiving at `bit_rate`. Anything buffered before this call
    /// must not show up in the next window.
    fn enable(&mut self, bit_rate: u32);

    /// Number of bytes waiting in the receive buffer.
    fn available(&mut self) -> usize;

    /// Copy up to `buf.len()` buffered bytes into `buf` without blocking.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Stop receiving.
    fn disable(&mut self);
}

/// Outcome of one capture attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// A window with at least sync + PID that was read completely
    Valid(RawWindow),
    /// Bytes were lost or not enough arrived
    Invalid { available: usize, read: usize },
}

/// A window is usable when the read drained everything that arrived and
/// at least sync + PID are present.
pub fn is_valid_window(available: usize, read: usize) -> bool {
    read == available && available >= MIN_WINDOW_LEN
}

/// Enable the UART, wait one frame window, drain it and disable it again.
pub fn capture_window<U: LinUart, D: DelayNs>(
    uart: &mut U,
    delay: &mut D,
    timing: &BitTiming,
) -> Capture {
    uart.enable(timing.bit_rate);
    delay.delay_us(timing.max_frame_us);

    let available = uart.available();
    let mut buf = [0u8; MAX_WINDOW_LEN];
    let want = available.min(MAX_WINDOW_LEN);
    let read = uart.read(&mut buf[..want]);
    uart.disable();

    if !is_valid_window(available, read) {
        return Capture::Invalid { available, read };
    }

    let mut window = RawWindow::new();
    // read <= MAX_WINDOW_LEN, always fits
    let _ = window.extend_from_slice(&buf[..read]);
    Capture::Valid(window)
}

/// Receive errors tolerated by one [`drain_fifo`] call
pub const MAX_RX_ERRORS: usize = 8;

/// Empty a non-blocking receive FIFO, handing each chunk to `keep`.
///
/// A break reaches the UART as a framing error, so a failed read does not
/// mean the FIFO is empty. Reads continue through errors until one returns
/// zero bytes or more than [`MAX_RX_ERRORS`] errors were seen. Returns the
/// number of bytes drained.
pub fn drain_fifo<E>(
    mut read: impl FnMut(&mut [u8]) -> Result<usize, E>,
    mut keep: impl FnMut(&[u8]),
) -> usize {
    let mut total = 0;
    let mut errors = 0;
    let mut chunk = [0u8; 16];
    loop {
        match read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                keep(&chunk[..n]);
            }
            Err(_) => {
                errors += 1;
                if errors > MAX_RX_ERRORS {
                    break;
                }
            }
        }
    }
    total
}
