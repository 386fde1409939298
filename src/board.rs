/// Hardware abstraction for supported boards.
///
/// Each board module defines pin assignments and capabilities
/// selected at compile time via feature flags. The LIN transceiver's RXD
/// output goes to `LIN_RX_PIN`; the same pin feeds both the edge interrupt
/// and the LIN UART receiver.

#[cfg(feature = "board-xiao")]
mod hw {
    pub const LIN_RX_PIN: u8 = 2; // D1
    pub const CONSOLE_RX_PIN: u8 = 44;
    pub const CONSOLE_TX_PIN: u8 = 43;
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(feature = "board-devkitc")]
mod hw {
    pub const LIN_RX_PIN: u8 = 16;
    pub const CONSOLE_RX_PIN: u8 = 3;
    pub const CONSOLE_TX_PIN: u8 = 1;
    pub const BOARD_NAME: &str = "esp32_devkitc";
}

#[cfg(not(any(feature = "board-xiao", feature = "board-devkitc")))]
mod hw {
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;

/// LIN bit rate used until the host configures another one
pub const DEFAULT_BIT_RATE: u32 = crate::bus::DEFAULT_BIT_RATE;
