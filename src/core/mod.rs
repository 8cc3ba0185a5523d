//! Core types and traits for the HeadUnit mesh protocol
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, ErrorCategory, Result};
pub use self::types::{
    AddressClass,
    DeviceType,
    EngineConfig,
    FirmwareVersion,
    LogicalAddress,
    PhysicalId,
};

/// First byte of every frame
pub const PROTOCOL_MAGIC: u8 = 0xA5;

/// Transport header size in bytes
pub const HEADER_SIZE: usize = 9;

/// Largest payload a frame may carry (ESP-NOW limit minus headers)
pub const MAX_PAYLOAD_SIZE: usize = 230;

/// Largest frame on the air
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;
