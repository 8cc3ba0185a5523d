use crate::core::{DeviceType, Error, FirmwareVersion, LogicalAddress, PhysicalId, Result};
use super::profile::ProfileLoad;

/// Message type codes carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    // System (0x01-0x0F)
    Ping = 0x01,
    Ack = 0x02,
    Error = 0x03,
    DiscoveryRequest = 0x04,
    DiscoveryResponse = 0x05,
    AssignId = 0x06,
    Reboot = 0x07,

    // Control, coordinator -> node (0x10-0x1F)
    SetState = 0x10,
    /// Deprecated non-compact profile step, kept for legacy nodes
    ProfileStep = 0x11,
    HapticConfig = 0x12,
    UiWidget = 0x13,
    UiMenu = 0x14,
    ProfileLoad = 0x15,

    // Events, node -> coordinator (0x20-0x2F)
    UiInput = 0x20,
    Critical = 0x21,
    FlowStart = 0x22,

    // Telemetry, node -> coordinator (0x30-0x3F)
    Sensor = 0x30,
    Multi = 0x31,
    Scale = 0x32,
}

impl MsgType {
    /// Convert from raw byte value. Unknown codes are rejected, never guessed.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x01 => Ok(Self::Ping),
            0x02 => Ok(Self::Ack),
            0x03 => Ok(Self::Error),
            0x04 => Ok(Self::DiscoveryRequest),
            0x05 => Ok(Self::DiscoveryResponse),
            0x06 => Ok(Self::AssignId),
            0x07 => Ok(Self::Reboot),
            0x10 => Ok(Self::SetState),
            0x11 => Ok(Self::ProfileStep),
            0x12 => Ok(Self::HapticConfig),
            0x13 => Ok(Self::UiWidget),
            0x14 => Ok(Self::UiMenu),
            0x15 => Ok(Self::ProfileLoad),
            0x20 => Ok(Self::UiInput),
            0x21 => Ok(Self::Critical),
            0x22 => Ok(Self::FlowStart),
            0x30 => Ok(Self::Sensor),
            0x31 => Ok(Self::Multi),
            0x32 => Ok(Self::Scale),
            _ => Err(Error::UnknownMessageType(b)),
        }
    }

    /// Wire code
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// System messages are handled by the engine, not delivered to the application
    pub fn is_system(self) -> bool {
        self.as_byte() < 0x10
    }
}

/// Acknowledges one received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPayload {
    /// Sequence number of the frame being acknowledged
    pub acked_seq: u16,
    /// Message type of the frame being acknowledged
    pub acked_type: u8,
}

/// Error report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: u8,
    pub detail: u8,
    /// Sequence number of the frame that caused the error, if any
    pub ref_seq: u16,
}

/// Coordinator asks nodes to identify themselves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoveryRequest {
    /// Only nodes still holding the unassigned sentinel should answer
    pub only_unassigned: bool,
}

/// A node identifies itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryResponse {
    pub identity: PhysicalId,
    pub device_type: DeviceType,
    pub hw_revision: u8,
    pub firmware: FirmwareVersion,
    /// Address the node currently uses, `UNASSIGNED` if none
    pub address: LogicalAddress,
}

/// Coordinator hands a logical address to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignId {
    /// Identity of the intended node; others must ignore the message
    pub identity: PhysicalId,
    pub address: LogicalAddress,
}

/// Asks a node to restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reboot {
    pub delay_ms: u16,
}

/// Simple on/off control of a valve or relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetState {
    pub channel: u8,
    pub on: bool,
}

/// Legacy vector profile step, all physical values x100
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileStep {
    /// How long to hold this state
    pub duration_ms: u16,
    /// 9350 = 93.5 C
    pub target_temp_c: i16,
    /// ml/s
    pub target_flow_ml: i16,
    /// 900 = 9.0 bar
    pub target_press_bar: i16,
    pub priority: u8,
    pub flags: u8,
}

/// Haptic knob behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapticMode {
    /// Free spinning
    Free,
    /// Menu clicks
    Detents,
    /// Return to centre
    Spring,
    /// Hard stops at min/max
    Barrier,
    /// Motor drives the knob
    Servo,
    Other(u8),
}

impl HapticMode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => HapticMode::Free,
            1 => HapticMode::Detents,
            2 => HapticMode::Spring,
            3 => HapticMode::Barrier,
            4 => HapticMode::Servo,
            other => HapticMode::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            HapticMode::Free => 0,
            HapticMode::Detents => 1,
            HapticMode::Spring => 2,
            HapticMode::Barrier => 3,
            HapticMode::Servo => 4,
            HapticMode::Other(b) => b,
        }
    }
}

/// Motor physics for a haptic knob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HapticConfig {
    pub mode: HapticMode,
    /// Force, 0-100 %
    pub strength: u8,
    /// Steps count / spring centre / min angle, depending on mode
    pub param_1: i16,
    /// Snap strength / stiffness / max angle, depending on mode
    pub param_2: i16,
}

/// Draws a single widget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiWidget {
    pub widget_id: u8,
    pub kind: u8,
    pub value: i16,
    /// Label, at most 24 bytes of UTF-8; longer labels are truncated
    pub text: String,
}

/// One entry of a menu page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    /// Sent back on click
    pub item_id: u8,
    pub icon_id: u8,
    /// 1=Selected, 2=Disabled, 4=IsBack, 8=IsNext
    pub flags: u8,
    /// Label, at most 24 bytes of UTF-8; longer labels are truncated
    pub text: String,
}

/// A page of menu items
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiMenu {
    pub list_id: u8,
    /// Items in the whole list, for the scrollbar
    pub total_items: u8,
    /// Index of the first item in this page
    pub start_index: u8,
    pub items: Vec<MenuItem>,
}

/// Kind of input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    ClickShort,
    ClickLong,
    HoldStart,
    HoldEnd,
    /// Value carries the encoder delta
    Rotate,
    Touch,
    Other(u8),
}

impl InputEvent {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => InputEvent::ClickShort,
            1 => InputEvent::ClickLong,
            2 => InputEvent::HoldStart,
            3 => InputEvent::HoldEnd,
            4 => InputEvent::Rotate,
            5 => InputEvent::Touch,
            other => InputEvent::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            InputEvent::ClickShort => 0,
            InputEvent::ClickLong => 1,
            InputEvent::HoldStart => 2,
            InputEvent::HoldEnd => 3,
            InputEvent::Rotate => 4,
            InputEvent::Touch => 5,
            InputEvent::Other(b) => b,
        }
    }
}

/// Button click or knob turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiInput {
    /// Which button or encoder on the board
    pub source_index: u8,
    pub event: InputEvent,
    /// Duration (ms), encoder delta or absolute position
    pub value: i32,
}

/// Stop everything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Critical {
    pub code: u8,
    pub severity: u8,
    pub value: i16,
}

/// Scale detected the first drop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowStart {
    pub timestamp_ms: u32,
    pub weight_mg: i32,
}

/// Single sensor reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensor {
    pub sensor_id: u8,
    pub value: f32,
}

/// Compact array of consecutive sensor channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multi {
    /// Channel id of `values[0]`
    pub base_id: u8,
    pub values: Vec<i16>,
}

/// Scale telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    pub timestamp_ms: u32,
    pub weight_mg: i32,
    /// Output flow (derivative of weight)
    pub flow_mg_s: i16,
    /// 1=Stable, 2=TareDone
    pub status: u8,
}

/// Typed payload of a frame, keyed by message type
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Ping,
    Ack(AckPayload),
    Error(ErrorPayload),
    DiscoveryRequest(DiscoveryRequest),
    DiscoveryResponse(DiscoveryResponse),
    AssignId(AssignId),
    Reboot(Reboot),
    SetState(SetState),
    ProfileStep(ProfileStep),
    HapticConfig(HapticConfig),
    UiWidget(UiWidget),
    UiMenu(UiMenu),
    ProfileLoad(ProfileLoad),
    UiInput(UiInput),
    Critical(Critical),
    FlowStart(FlowStart),
    Sensor(Sensor),
    Multi(Multi),
    Scale(Scale),
}

impl Message {
    /// Message type code this payload travels under
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Ping => MsgType::Ping,
            Message::Ack(_) => MsgType::Ack,
            Message::Error(_) => MsgType::Error,
            Message::DiscoveryRequest(_) => MsgType::DiscoveryRequest,
            Message::DiscoveryResponse(_) => MsgType::DiscoveryResponse,
            Message::AssignId(_) => MsgType::AssignId,
            Message::Reboot(_) => MsgType::Reboot,
            Message::SetState(_) => MsgType::SetState,
            Message::ProfileStep(_) => MsgType::ProfileStep,
            Message::HapticConfig(_) => MsgType::HapticConfig,
            Message::UiWidget(_) => MsgType::UiWidget,
            Message::UiMenu(_) => MsgType::UiMenu,
            Message::ProfileLoad(_) => MsgType::ProfileLoad,
            Message::UiInput(_) => MsgType::UiInput,
            Message::Critical(_) => MsgType::Critical,
            Message::FlowStart(_) => MsgType::FlowStart,
            Message::Sensor(_) => MsgType::Sensor,
            Message::Multi(_) => MsgType::Multi,
            Message::Scale(_) => MsgType::Scale,
        }
    }
}
