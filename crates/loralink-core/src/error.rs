//! Error types for the link layer.

use thiserror::Error;

/// Link layer error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Station is not idle; retry once the current operation completes
    #[error("station busy: an operation is already in progress")]
    Busy,

    /// Reliable sends require a concrete destination
    #[error("broadcast is not allowed for reliable sends")]
    BroadcastNotAllowed,

    /// Reliable sends to an addressed destination require a station address
    #[error("station address is not set; assign an address on both nodes first")]
    AddressRequired,

    /// Address outside the 0-999 range
    #[error("invalid address {0}: must be 0-999")]
    InvalidAddress(u16),

    /// Sequence id outside the 1-99 range
    #[error("invalid sequence id {0}: must be 1-99")]
    InvalidSequence(u8),

    /// Failure reported by the radio transport
    #[error("transport error: {0}")]
    Transport(String),
}

impl LinkError {
    /// Whether the caller can simply retry later.
    ///
    /// Only `Busy` is flow control; everything else is a configuration or
    /// transport fault that a retry will not fix.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LinkError::Busy)
    }
}

/// Result type alias for link operations
pub type LinkResult<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_is_recoverable() {
        assert!(LinkError::Busy.is_recoverable());
        assert!(!LinkError::BroadcastNotAllowed.is_recoverable());
        assert!(!LinkError::AddressRequired.is_recoverable());
        assert!(!LinkError::InvalidAddress(1000).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = LinkError::InvalidAddress(1234);
        assert!(err.to_string().contains("1234"));
    }
}
