//! Payload codec registry.
//!
//! Every message type maps to a [`PayloadShape`]. Decoding checks the shape
//! before touching any field, so the field readers below never run past the
//! end of a buffer. All integers are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::{
    DeviceType, Error, FirmwareVersion, LogicalAddress, PhysicalId, Result, MAX_PAYLOAD_SIZE,
};
use crate::util::{decode_text, encode_text};

use super::message::*;
use super::profile::{ProfileLoad, ProfileNode, LOAD_HEADER_SIZE, NODE_SIZE};

/// Width of text fields in menu items and widgets
pub const TEXT_WIDTH: usize = 24;

const MENU_HEADER_SIZE: usize = 4;
const MENU_ITEM_SIZE: usize = 3 + TEXT_WIDTH;
const MULTI_HEADER_SIZE: usize = 2;
const MULTI_ELEMENT_SIZE: usize = 2;

/// Layout class of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// Exactly this many bytes
    Fixed(usize),
    /// A fixed header followed by `n` equally sized elements
    Variable {
        header: usize,
        element: usize,
        /// Offset of a header byte that must equal `n`, if the shape has one
        count_at: Option<usize>,
    },
}

impl PayloadShape {
    /// Largest element count that fits in one payload
    pub fn max_elements(&self) -> usize {
        match *self {
            PayloadShape::Fixed(_) => 0,
            PayloadShape::Variable { header, element, .. } => {
                (MAX_PAYLOAD_SIZE - header) / element
            }
        }
    }

    /// Validates `payload` against this shape and returns the element count
    fn check(&self, msg_type: MsgType, payload: &[u8]) -> Result<usize> {
        let code = msg_type.as_byte();
        match *self {
            PayloadShape::Fixed(size) => {
                if payload.len() != size {
                    return Err(Error::malformed(
                        code,
                        format!("expected {} bytes, got {}", size, payload.len()),
                    ));
                }
                Ok(0)
            }
            PayloadShape::Variable {
                header,
                element,
                count_at,
            } => {
                if payload.len() < header {
                    return Err(Error::malformed(
                        code,
                        format!("{} bytes is shorter than the {}-byte header", payload.len(), header),
                    ));
                }
                let body = payload.len() - header;
                if body % element != 0 {
                    return Err(Error::malformed(
                        code,
                        format!("{} trailing bytes are not a multiple of {}", body, element),
                    ));
                }
                let count = body / element;
                if let Some(at) = count_at {
                    if payload[at] as usize != count {
                        return Err(Error::malformed(
                            code,
                            format!("count field says {}, payload holds {}", payload[at], count),
                        ));
                    }
                }
                Ok(count)
            }
        }
    }
}

/// Registry lookup
pub fn shape_of(msg_type: MsgType) -> PayloadShape {
    use PayloadShape::*;
    match msg_type {
        MsgType::Ping => Fixed(0),
        MsgType::Ack => Fixed(3),
        MsgType::Error => Fixed(4),
        MsgType::DiscoveryRequest => Fixed(1),
        MsgType::DiscoveryResponse => Fixed(11),
        MsgType::AssignId => Fixed(7),
        MsgType::Reboot => Fixed(2),
        MsgType::SetState => Fixed(2),
        MsgType::ProfileStep => Fixed(10),
        MsgType::HapticConfig => Fixed(6),
        MsgType::UiWidget => Fixed(4 + TEXT_WIDTH),
        MsgType::UiMenu => Variable {
            header: MENU_HEADER_SIZE,
            element: MENU_ITEM_SIZE,
            count_at: Some(3),
        },
        MsgType::ProfileLoad => Variable {
            header: LOAD_HEADER_SIZE,
            element: NODE_SIZE,
            count_at: None,
        },
        MsgType::UiInput => Fixed(6),
        MsgType::Critical => Fixed(4),
        MsgType::FlowStart => Fixed(8),
        MsgType::Sensor => Fixed(5),
        MsgType::Multi => Variable {
            header: MULTI_HEADER_SIZE,
            element: MULTI_ELEMENT_SIZE,
            count_at: Some(1),
        },
        MsgType::Scale => Fixed(11),
    }
}

/// Maximum elements per packet for a variable-length type, 0 for fixed ones
pub fn max_elements(msg_type: MsgType) -> usize {
    shape_of(msg_type).max_elements()
}

fn check_budget(msg_type: MsgType, count: usize) -> Result<()> {
    let max = max_elements(msg_type);
    if count > max {
        return Err(Error::ElementBudgetExceeded { count, max });
    }
    Ok(())
}

/// Serializes a typed payload. Fails before producing bytes that could not
/// be sent.
pub fn encode(message: &Message) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(32);
    match message {
        Message::Ping => {}
        Message::Ack(ack) => {
            buf.put_u16_le(ack.acked_seq);
            buf.put_u8(ack.acked_type);
        }
        Message::Error(err) => {
            buf.put_u8(err.code);
            buf.put_u8(err.detail);
            buf.put_u16_le(err.ref_seq);
        }
        Message::DiscoveryRequest(req) => buf.put_u8(req.only_unassigned as u8),
        Message::DiscoveryResponse(res) => {
            buf.put_slice(&res.identity.0);
            buf.put_u8(res.device_type.to_byte());
            buf.put_u8(res.hw_revision);
            buf.put_u8(res.firmware.major);
            buf.put_u8(res.firmware.minor);
            buf.put_u8(res.address.0);
        }
        Message::AssignId(assign) => {
            buf.put_slice(&assign.identity.0);
            buf.put_u8(assign.address.0);
        }
        Message::Reboot(reboot) => buf.put_u16_le(reboot.delay_ms),
        Message::SetState(state) => {
            buf.put_u8(state.channel);
            buf.put_u8(state.on as u8);
        }
        Message::ProfileStep(step) => {
            buf.put_u16_le(step.duration_ms);
            buf.put_i16_le(step.target_temp_c);
            buf.put_i16_le(step.target_flow_ml);
            buf.put_i16_le(step.target_press_bar);
            buf.put_u8(step.priority);
            buf.put_u8(step.flags);
        }
        Message::HapticConfig(cfg) => {
            buf.put_u8(cfg.mode.to_byte());
            buf.put_u8(cfg.strength);
            buf.put_i16_le(cfg.param_1);
            buf.put_i16_le(cfg.param_2);
        }
        Message::UiWidget(widget) => {
            buf.put_u8(widget.widget_id);
            buf.put_u8(widget.kind);
            buf.put_i16_le(widget.value);
            buf.put_slice(&encode_text(&widget.text, TEXT_WIDTH));
        }
        Message::UiMenu(menu) => {
            check_budget(MsgType::UiMenu, menu.items.len())?;
            buf.put_u8(menu.list_id);
            buf.put_u8(menu.total_items);
            buf.put_u8(menu.start_index);
            buf.put_u8(menu.items.len() as u8);
            for item in &menu.items {
                buf.put_u8(item.item_id);
                buf.put_u8(item.icon_id);
                buf.put_u8(item.flags);
                buf.put_slice(&encode_text(&item.text, TEXT_WIDTH));
            }
        }
        Message::ProfileLoad(load) => {
            check_budget(MsgType::ProfileLoad, load.nodes.len())?;
            buf.put_u8(load.profile_id);
            buf.put_u8(load.total_nodes);
            for node in &load.nodes {
                node.write(&mut buf);
            }
        }
        Message::UiInput(input) => {
            buf.put_u8(input.source_index);
            buf.put_u8(input.event.to_byte());
            buf.put_i32_le(input.value);
        }
        Message::Critical(critical) => {
            buf.put_u8(critical.code);
            buf.put_u8(critical.severity);
            buf.put_i16_le(critical.value);
        }
        Message::FlowStart(flow) => {
            buf.put_u32_le(flow.timestamp_ms);
            buf.put_i32_le(flow.weight_mg);
        }
        Message::Sensor(sensor) => {
            buf.put_u8(sensor.sensor_id);
            buf.put_f32_le(sensor.value);
        }
        Message::Multi(multi) => {
            check_budget(MsgType::Multi, multi.values.len())?;
            buf.put_u8(multi.base_id);
            buf.put_u8(multi.values.len() as u8);
            for value in &multi.values {
                buf.put_i16_le(*value);
            }
        }
        Message::Scale(scale) => {
            buf.put_u32_le(scale.timestamp_ms);
            buf.put_i32_le(scale.weight_mg);
            buf.put_i16_le(scale.flow_mg_s);
            buf.put_u8(scale.status);
        }
    }

    debug_assert!(buf.len() <= MAX_PAYLOAD_SIZE);
    Ok(buf.freeze())
}

/// Parses a payload for the given raw message type code
pub fn decode(msg_type: u8, payload: &[u8]) -> Result<Message> {
    let msg_type = MsgType::from_byte(msg_type)?;
    let count = shape_of(msg_type).check(msg_type, payload)?;
    let mut src = payload;

    let message = match msg_type {
        MsgType::Ping => Message::Ping,
        MsgType::Ack => Message::Ack(AckPayload {
            acked_seq: src.get_u16_le(),
            acked_type: src.get_u8(),
        }),
        MsgType::Error => Message::Error(ErrorPayload {
            code: src.get_u8(),
            detail: src.get_u8(),
            ref_seq: src.get_u16_le(),
        }),
        MsgType::DiscoveryRequest => Message::DiscoveryRequest(DiscoveryRequest {
            only_unassigned: src.get_u8() & 0x01 != 0,
        }),
        MsgType::DiscoveryResponse => Message::DiscoveryResponse(DiscoveryResponse {
            identity: read_identity(&mut src),
            device_type: DeviceType::from_byte(src.get_u8()),
            hw_revision: src.get_u8(),
            firmware: FirmwareVersion {
                major: src.get_u8(),
                minor: src.get_u8(),
            },
            address: LogicalAddress(src.get_u8()),
        }),
        MsgType::AssignId => Message::AssignId(AssignId {
            identity: read_identity(&mut src),
            address: LogicalAddress(src.get_u8()),
        }),
        MsgType::Reboot => Message::Reboot(Reboot {
            delay_ms: src.get_u16_le(),
        }),
        MsgType::SetState => Message::SetState(SetState {
            channel: src.get_u8(),
            on: src.get_u8() != 0,
        }),
        MsgType::ProfileStep => Message::ProfileStep(ProfileStep {
            duration_ms: src.get_u16_le(),
            target_temp_c: src.get_i16_le(),
            target_flow_ml: src.get_i16_le(),
            target_press_bar: src.get_i16_le(),
            priority: src.get_u8(),
            flags: src.get_u8(),
        }),
        MsgType::HapticConfig => Message::HapticConfig(HapticConfig {
            mode: HapticMode::from_byte(src.get_u8()),
            strength: src.get_u8(),
            param_1: src.get_i16_le(),
            param_2: src.get_i16_le(),
        }),
        MsgType::UiWidget => Message::UiWidget(UiWidget {
            widget_id: src.get_u8(),
            kind: src.get_u8(),
            value: src.get_i16_le(),
            text: read_text(&mut src),
        }),
        MsgType::UiMenu => {
            let list_id = src.get_u8();
            let total_items = src.get_u8();
            let start_index = src.get_u8();
            src.advance(1); // items_count, already checked
            let items = (0..count)
                .map(|_| MenuItem {
                    item_id: src.get_u8(),
                    icon_id: src.get_u8(),
                    flags: src.get_u8(),
                    text: read_text(&mut src),
                })
                .collect();
            Message::UiMenu(UiMenu {
                list_id,
                total_items,
                start_index,
                items,
            })
        }
        MsgType::ProfileLoad => {
            let profile_id = src.get_u8();
            let total_nodes = src.get_u8();
            let nodes = (0..count).map(|_| ProfileNode::read(&mut src)).collect();
            Message::ProfileLoad(ProfileLoad {
                profile_id,
                total_nodes,
                nodes,
            })
        }
        MsgType::UiInput => Message::UiInput(UiInput {
            source_index: src.get_u8(),
            event: InputEvent::from_byte(src.get_u8()),
            value: src.get_i32_le(),
        }),
        MsgType::Critical => Message::Critical(Critical {
            code: src.get_u8(),
            severity: src.get_u8(),
            value: src.get_i16_le(),
        }),
        MsgType::FlowStart => Message::FlowStart(FlowStart {
            timestamp_ms: src.get_u32_le(),
            weight_mg: src.get_i32_le(),
        }),
        MsgType::Sensor => Message::Sensor(Sensor {
            sensor_id: src.get_u8(),
            value: src.get_f32_le(),
        }),
        MsgType::Multi => {
            let base_id = src.get_u8();
            src.advance(1); // count, already checked
            let values = (0..count).map(|_| src.get_i16_le()).collect();
            Message::Multi(Multi { base_id, values })
        }
        MsgType::Scale => Message::Scale(Scale {
            timestamp_ms: src.get_u32_le(),
            weight_mg: src.get_i32_le(),
            flow_mg_s: src.get_i16_le(),
            status: src.get_u8(),
        }),
    };

    Ok(message)
}

fn read_identity(src: &mut &[u8]) -> PhysicalId {
    let mut mac = [0u8; 6];
    src.copy_to_slice(&mut mac);
    PhysicalId(mac)
}

fn read_text(src: &mut &[u8]) -> String {
    let text = decode_text(&src[..TEXT_WIDTH]);
    src.advance(TEXT_WIDTH);
    text
}
