//! Core types for the CAN to MQTT bridge
//!
//! This module defines the frame and error types shared by the bus
//! transport, the decode worker, and the engine.

use chrono::{DateTime, Utc};
use std::fmt;

/// Timestamp type used throughout the bridge
pub type Timestamp = DateTime<Utc>;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// A single CAN data frame as received from the bus transport
///
/// This is the transient per-frame representation consumed by the decode
/// worker. It carries no decoded signal state of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct CanDataFrame {
    /// Timestamp in nanoseconds since epoch
    pub timestamp_ns: u64,
    /// CAN message ID (11-bit or 29-bit, without the extended flag)
    pub can_id: u32,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
    /// Frame data bytes (0-8 bytes for classic CAN, up to 64 for CAN-FD)
    pub data: Vec<u8>,
}

impl CanDataFrame {
    /// Convert timestamp from nanoseconds to DateTime<Utc>
    pub fn timestamp(&self) -> Timestamp {
        let secs = (self.timestamp_ns / 1_000_000_000) as i64;
        let nsecs = (self.timestamp_ns % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nsecs).unwrap_or_else(Utc::now)
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Display for CanDataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X} [{}]", self.can_id, self.dlc())
    }
}

/// Errors that can occur in the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse DBC file: {0}")]
    DbcParse(String),

    #[error("Bus transport error: {0}")]
    BusTransport(String),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_timestamp_conversion() {
        let frame = CanDataFrame {
            timestamp_ns: 1_500_000_000,
            can_id: 0x123,
            is_extended: false,
            data: vec![0x01, 0x02],
        };
        let ts = frame.timestamp();
        assert_eq!(ts.timestamp(), 1);
        assert_eq!(ts.timestamp_subsec_nanos(), 500_000_000);
        assert_eq!(frame.dlc(), 2);
    }

    #[test]
    fn test_frame_display() {
        let frame = CanDataFrame {
            timestamp_ns: 0,
            can_id: 0x1A0,
            is_extended: false,
            data: vec![0; 8],
        };
        assert_eq!(format!("{}", frame), "0x1A0 [8]");
    }
}
