use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Class a logical address belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressClass {
    /// The single coordinator
    Coordinator,
    /// Every node
    Broadcast,
    /// Held by nodes that have not been enrolled yet
    Unassigned,
    /// Coordinator-allocated node identities
    Dynamic,
    /// Everything else, including the legacy fixed device IDs
    Reserved,
}

/// Protocol-level device address (one byte on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogicalAddress(pub u8);

impl LogicalAddress {
    /// The coordinator (USB dongle / gateway)
    pub const COORDINATOR: Self = LogicalAddress(0x01);
    /// All nodes
    pub const BROADCAST: Self = LogicalAddress(0xFF);
    /// Address of a node that has not been assigned one
    pub const UNASSIGNED: Self = LogicalAddress(0xFE);
    /// First allocatable address
    pub const DYNAMIC_FIRST: Self = LogicalAddress(0x40);
    /// Last allocatable address
    pub const DYNAMIC_LAST: Self = LogicalAddress(0xFD);

    // Legacy fixed IDs from the 0.2 header, kept for fixed-wired installations
    /// Main boiler
    pub const BOILER_MAIN: Self = LogicalAddress(0x10);
    /// Steam boiler
    pub const BOILER_STEAM: Self = LogicalAddress(0x11);
    /// Group head
    pub const GROUP_HEAD: Self = LogicalAddress(0x12);
    /// Main pump
    pub const PUMP_MAIN: Self = LogicalAddress(0x13);
    /// Scales
    pub const SCALES: Self = LogicalAddress(0x20);
    /// Left haptic knob
    pub const HAPTIC_KNOB_L: Self = LogicalAddress(0x30);
    /// Right haptic knob
    pub const HAPTIC_KNOB_R: Self = LogicalAddress(0x31);
    /// Steam lever
    pub const STEAM_LEVER: Self = LogicalAddress(0x32);
    /// Button pad
    pub const BUTTON_PAD: Self = LogicalAddress(0x33);

    /// Returns the class of this address
    pub fn class(&self) -> AddressClass {
        match *self {
            Self::COORDINATOR => AddressClass::Coordinator,
            Self::BROADCAST => AddressClass::Broadcast,
            Self::UNASSIGNED => AddressClass::Unassigned,
            a if a >= Self::DYNAMIC_FIRST && a <= Self::DYNAMIC_LAST => AddressClass::Dynamic,
            _ => AddressClass::Reserved,
        }
    }

    /// Whether the coordinator may hand this address out
    pub fn is_dynamic(&self) -> bool {
        self.class() == AddressClass::Dynamic
    }

    /// Iterates the dynamic range in ascending order
    pub fn dynamic_range() -> impl Iterator<Item = LogicalAddress> {
        (Self::DYNAMIC_FIRST.0..=Self::DYNAMIC_LAST.0).map(LogicalAddress)
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Link-layer identity of a radio (ESP-NOW MAC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhysicalId(pub [u8; 6]);

impl fmt::Display for PhysicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Class of peripheral reported during discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Boiler,
    Pump,
    Valve,
    GroupHead,
    Scale,
    HapticKnob,
    SteamLever,
    ButtonPad,
    SensorHub,
    Grinder,
    /// A code this build does not know
    Other(u8),
}

impl DeviceType {
    /// Decodes the wire code; never fails
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => DeviceType::Boiler,
            0x02 => DeviceType::Pump,
            0x03 => DeviceType::Valve,
            0x04 => DeviceType::GroupHead,
            0x05 => DeviceType::Scale,
            0x06 => DeviceType::HapticKnob,
            0x07 => DeviceType::SteamLever,
            0x08 => DeviceType::ButtonPad,
            0x09 => DeviceType::SensorHub,
            0x0A => DeviceType::Grinder,
            other => DeviceType::Other(other),
        }
    }

    /// Wire code
    pub fn to_byte(self) -> u8 {
        match self {
            DeviceType::Boiler => 0x01,
            DeviceType::Pump => 0x02,
            DeviceType::Valve => 0x03,
            DeviceType::GroupHead => 0x04,
            DeviceType::Scale => 0x05,
            DeviceType::HapticKnob => 0x06,
            DeviceType::SteamLever => 0x07,
            DeviceType::ButtonPad => 0x08,
            DeviceType::SensorHub => 0x09,
            DeviceType::Grinder => 0x0A,
            DeviceType::Other(b) => b,
        }
    }
}

/// Firmware version as major.minor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Timing and retry policy for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long to wait for an Ack before retransmitting
    #[serde(with = "super::serde::duration_ms")]
    pub ack_timeout: Duration,
    /// Retransmissions after the first attempt
    pub max_retries: u32,
    /// How long a pending assignment waits for traffic from the new address
    #[serde(with = "super::serde::duration_ms")]
    pub assign_timeout: Duration,
    /// AssignId transmissions before giving up and rediscovering
    pub max_assign_attempts: u32,
    /// Period between discovery broadcasts in the async driver
    #[serde(with = "super::serde::duration_ms")]
    pub discovery_interval: Duration,
    /// Idle time after which a source's sequence state is forgotten
    #[serde(with = "super::serde::duration_ms")]
    pub sequence_ttl: Duration,
    /// Number of recent sequence numbers remembered per source
    pub dedup_window: usize,
    /// Silence after which an assigned device falls back to Discovered
    #[serde(with = "super::serde::opt_duration_ms")]
    pub device_timeout: Option<Duration>,
    /// Driver timer resolution
    #[serde(with = "super::serde::duration_ms")]
    pub tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            ack_timeout: Duration::from_millis(200),
            max_retries: 3,
            assign_timeout: Duration::from_secs(1),
            max_assign_attempts: 3,
            discovery_interval: Duration::from_secs(30),
            sequence_ttl: Duration::from_secs(30),
            dedup_window: 16,
            device_timeout: Some(Duration::from_secs(60)),
            tick_interval: Duration::from_millis(20),
        }
    }
}

impl EngineConfig {
    /// Rejects settings that would make waits unbounded or zero
    pub fn validate(&self) -> Result<()> {
        if self.ack_timeout.is_zero() {
            return Err(Error::config("ack_timeout must be non-zero"));
        }
        if self.assign_timeout.is_zero() {
            return Err(Error::config("assign_timeout must be non-zero"));
        }
        if self.max_assign_attempts == 0 {
            return Err(Error::config("max_assign_attempts must be at least 1"));
        }
        if self.dedup_window == 0 {
            return Err(Error::config("dedup_window must be at least 1"));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::config("tick_interval must be non-zero"));
        }
        Ok(())
    }
}
