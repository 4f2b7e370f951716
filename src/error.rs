use thiserror::Error;

/// Frame kinds the codec decodes, used in decode failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Polled monitor telemetry frame
    Monitor,
    /// Rep notification frame
    RepNotification,
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Monitor => write!(f, "monitor"),
            Self::RepNotification => write!(f, "rep notification"),
        }
    }
}

/// Errors that can occur when working with Vitruvian trainers
#[derive(Error, Debug)]
pub enum TrainerError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// No Bluetooth adapter or no device matched the requested id
    #[error("Trainer device not found")]
    DeviceNotFound,

    /// Scan finished without any peripheral matching the name prefix
    #[error("No device matching '{prefix}' found within {timeout_ms}ms")]
    ScanTimeout {
        /// Name prefix that was searched for
        prefix: String,
        /// Scan duration in milliseconds
        timeout_ms: u64,
    },

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Device disconnected, or no connection is established
    #[error("Device disconnected")]
    Disconnected,

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// A required GATT characteristic could not be resolved
    #[error("Required characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// Post-connect initialization handshake failed
    #[error("Initialization handshake failed: {0}")]
    HandshakeFailed(String),

    /// Inbound frame shorter than its kind requires
    #[error("{kind} frame too short: {len} bytes, expected at least {min}")]
    FrameTooShort {
        /// Which decoder rejected the frame
        kind: FrameKind,
        /// Received length
        len: usize,
        /// Minimum accepted length
        min: usize,
    },

    /// Invalid command parameters
    #[error("Invalid command parameters: {0}")]
    InvalidParameters(String),

    /// Requested operation is not allowed in the current state
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Device is not ready for commands
    #[error("Device not ready: {reason}")]
    NotReady {
        /// Reason why device is not ready
        reason: String,
    },

    /// Capability not offered by the platform backend
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Background session task is gone
    #[error("Session task stopped")]
    SessionClosed,
}

/// Result type for trainer operations
pub type Result<T> = std::result::Result<T, TrainerError>;

impl TrainerError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::ConnectionFailed(_)
                | Self::Disconnected
                | Self::DeviceNotFound
                | Self::ScanTimeout { .. }
                | Self::CharacteristicNotFound(_)
        )
    }

    /// Check if this error is recoverable by retrying the same call
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::NotReady { .. } | Self::FrameTooShort { .. }
        )
    }

    /// Check if this error is a dropped inbound frame
    #[must_use]
    pub const fn is_decode_error(&self) -> bool {
        matches!(self, Self::FrameTooShort { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = TrainerError::ConnectionFailed("test".to_string());
        assert!(connection_error.is_connection_error());
        assert!(!connection_error.is_recoverable());

        let timeout_error = TrainerError::Timeout { timeout_ms: 15_000 };
        assert!(!timeout_error.is_connection_error());
        assert!(timeout_error.is_recoverable());

        let decode_error = TrainerError::FrameTooShort {
            kind: FrameKind::Monitor,
            len: 10,
            min: 16,
        };
        assert!(decode_error.is_decode_error());
        assert!(decode_error.is_recoverable());
        assert!(!decode_error.is_connection_error());
    }

    #[test]
    fn test_error_display() {
        let error = TrainerError::InvalidParameters("weight out of range".to_string());
        let error_string = format!("{error}");
        assert!(error_string.contains("Invalid command parameters"));
        assert!(error_string.contains("weight out of range"));

        let error = TrainerError::FrameTooShort {
            kind: FrameKind::RepNotification,
            len: 4,
            min: 6,
        };
        assert_eq!(
            error.to_string(),
            "rep notification frame too short: 4 bytes, expected at least 6"
        );
    }
}
