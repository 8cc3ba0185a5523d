use std::io;
use thiserror::Error;

use super::types::{LogicalAddress, PhysicalId};

/// Custom error types for the HeadUnit mesh engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(String),

    #[error("truncated frame: {0} bytes (header is 9)")]
    TruncatedFrame(usize),

    #[error("bad magic byte: 0x{0:02x}")]
    BadMagic(u8),

    #[error("payload length mismatch: header declares {declared}, {actual} bytes follow")]
    LengthMismatch {
        /// Length from the header
        declared: usize,
        /// Bytes actually present after the header
        actual: usize,
    },

    #[error("payload too large: {0} > 230")]
    PayloadTooLarge(usize),

    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("malformed payload for type 0x{msg_type:02x}: {reason}")]
    MalformedPayload {
        /// Message type code
        msg_type: u8,
        /// What was wrong
        reason: String,
    },

    #[error("element budget exceeded: {count} elements, at most {max} fit")]
    ElementBudgetExceeded {
        /// Requested element count
        count: usize,
        /// Largest count that fits
        max: usize,
    },

    #[error("value out of range for {field}: {value}")]
    ValueOutOfRange {
        /// Field name
        field: &'static str,
        /// Offending physical value
        value: f32,
    },

    #[error("profile chunk out of order: offset {offset_ms} ms after {last_ms} ms")]
    OutOfOrderChunk {
        /// First offset of the rejected chunk
        offset_ms: u16,
        /// Last accepted offset
        last_ms: u16,
    },

    #[error("profile node {index} at {offset_ms} ms does not follow {previous_ms} ms")]
    UnsortedProfile {
        /// Index of the offending node
        index: usize,
        offset_ms: u16,
        /// Offset of the node before it
        previous_ms: u16,
    },

    #[error("identity mismatch: expected {expected}, got {actual}")]
    IdentityMismatch {
        /// Identity the check expected
        expected: PhysicalId,
        /// Identity actually presented
        actual: PhysicalId,
    },

    #[error("address {address} already held by {holder}")]
    AddressCollision {
        /// Contended address
        address: LogicalAddress,
        /// Identity currently holding it
        holder: PhysicalId,
    },

    #[error("address {0} is outside the dynamic range")]
    InvalidAddress(LogicalAddress),

    #[error("dynamic address space exhausted")]
    AddressSpaceExhausted,

    #[error("no known device at {0}")]
    UnknownDestination(LogicalAddress),

    #[error("no record for device {0}")]
    UnknownDevice(PhysicalId),

    #[error("delivery of seq {seq} to {dst} failed after {attempts} attempts")]
    DeliveryFailed {
        /// Destination address
        dst: LogicalAddress,
        /// Sequence number of the frame
        seq: u16,
        /// Transmissions made
        attempts: u32,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error taxonomy used for diagnostics and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad bytes from the air; drop the frame
    Malformed,
    /// Identity or address conflicts; retry or reselect
    ProtocolState,
    /// Caller tried to build something that cannot be sent
    Resource,
    /// Peer never acknowledged
    Delivery,
    /// Local runtime problems (channels, config, IO)
    Runtime,
}

impl Error {
    /// Creates a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new malformed payload error
    pub fn malformed(msg_type: u8, reason: impl Into<String>) -> Self {
        Error::MalformedPayload {
            msg_type,
            reason: reason.into(),
        }
    }

    /// Classifies the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::TruncatedFrame(_)
            | Error::BadMagic(_)
            | Error::LengthMismatch { .. }
            | Error::UnknownMessageType(_)
            | Error::MalformedPayload { .. }
            | Error::OutOfOrderChunk { .. } => ErrorCategory::Malformed,
            Error::IdentityMismatch { .. }
            | Error::AddressCollision { .. }
            | Error::AddressSpaceExhausted => ErrorCategory::ProtocolState,
            Error::PayloadTooLarge(_)
            | Error::ElementBudgetExceeded { .. }
            | Error::ValueOutOfRange { .. }
            | Error::UnsortedProfile { .. }
            | Error::InvalidAddress(_)
            | Error::UnknownDestination(_)
            | Error::UnknownDevice(_) => ErrorCategory::Resource,
            Error::DeliveryFailed { .. } | Error::Cancelled => ErrorCategory::Delivery,
            Error::Io(_) | Error::Network(_) | Error::Config(_) => ErrorCategory::Runtime,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
