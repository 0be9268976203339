use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when working with SunnyFit accessories
#[derive(Error, Debug)]
pub enum SunnyFitError {
    /// Bluetooth Low Energy related errors
    #[cfg(feature = "btleplug")]
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// The Bluetooth radio is missing or powered off
    #[error("Bluetooth is unavailable")]
    BluetoothUnavailable,

    /// The accessory was never identified by a scan
    #[error("Unknown accessory: {0}")]
    UnknownAccessory(String),

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// The connected peer does not expose the accessory service
    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    /// A required characteristic is missing from the connected peer
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    /// Device disconnected
    #[error("Device disconnected")]
    Disconnected,

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Transport layer failure reported by the BLE backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// A buffer was shorter than the width being decoded
    #[error("Buffer too short: {actual} bytes, expected at least {expected}")]
    InvalidLength {
        /// Required number of bytes
        expected: usize,
        /// Number of bytes available
        actual: usize,
    },

    /// Frame or advertisement parsing failed
    #[error("Failed to parse frame: {0}")]
    ParseError(String),
}

/// Result type for SunnyFit operations
pub type Result<T> = std::result::Result<T, SunnyFitError>;

impl SunnyFitError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        match self {
            #[cfg(feature = "btleplug")]
            Self::Ble(_) => true,
            Self::ConnectionFailed(_)
            | Self::Disconnected
            | Self::Transport(_)
            | Self::BluetoothUnavailable => true,
            _ => false,
        }
    }

    /// Check if this error is recoverable by retrying the same operation
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Disconnected | Self::ConnectionFailed(_)
        )
    }

    /// Check if this error means the connected peer is not a usable accessory
    #[must_use]
    pub const fn is_incompatible_peripheral(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound(_) | Self::CharacteristicNotFound(_)
        )
    }
}
