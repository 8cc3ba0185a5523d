//! Compact profile nodes and profile-load batching.
//!
//! A node is 13 bytes on the wire:
//!
//! ```text
//! time_offset_ms u16 | config u8 | 5 x (target u8, tolerance u8)
//! ```
//!
//! Channel order is temperature, pressure, inbound flow, outbound flow,
//! energy. The config byte packs interpolation in bits 0-1 and priority in
//! bits 2-3; bits 4-7 are reserved, written as zero and ignored on read.

use bytes::{Buf, BufMut, BytesMut};

use crate::core::{Error, Result, MAX_PAYLOAD_SIZE};
use crate::util::{dequantize_u8, quantize_u8};

/// Encoded node size
pub const NODE_SIZE: usize = 13;

/// ProfileLoad sub-header: profile_id, total_nodes
pub const LOAD_HEADER_SIZE: usize = 2;

/// Nodes that fit in one ProfileLoad packet
pub const MAX_NODES_PER_PACKET: usize = (MAX_PAYLOAD_SIZE - LOAD_HEADER_SIZE) / NODE_SIZE;

const MODE_MASK: u8 = 0x03;
const PRIORITY_SHIFT: u8 = 2;

/// How the executor moves from this node to the next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Step,
    Linear,
    Smooth,
    Reserved,
}

impl Interpolation {
    fn from_bits(bits: u8) -> Self {
        match bits & MODE_MASK {
            0 => Interpolation::Step,
            1 => Interpolation::Linear,
            2 => Interpolation::Smooth,
            _ => Interpolation::Reserved,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Interpolation::Step => 0,
            Interpolation::Linear => 1,
            Interpolation::Smooth => 2,
            Interpolation::Reserved => 3,
        }
    }
}

/// Which target wins when pressure and flow conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Keep flow, ignore pressure
    #[default]
    Flow,
    /// Keep pressure, sacrifice flow
    Pressure,
    /// Energy / experimental
    Hybrid,
    Reserved,
}

impl Priority {
    fn from_bits(bits: u8) -> Self {
        match bits & MODE_MASK {
            0 => Priority::Flow,
            1 => Priority::Pressure,
            2 => Priority::Hybrid,
            _ => Priority::Reserved,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Priority::Flow => 0,
            Priority::Pressure => 1,
            Priority::Hybrid => 2,
            Priority::Reserved => 3,
        }
    }
}

/// Structured view of the packed config byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeConfig {
    pub interpolation: Interpolation,
    pub priority: Priority,
}

impl NodeConfig {
    /// Reserved high nibble is ignored
    pub fn from_byte(b: u8) -> Self {
        NodeConfig {
            interpolation: Interpolation::from_bits(b),
            priority: Priority::from_bits(b >> PRIORITY_SHIFT),
        }
    }

    /// High nibble is always zero
    pub fn to_byte(self) -> u8 {
        self.interpolation.bits() | (self.priority.bits() << PRIORITY_SHIFT)
    }
}

/// Controlled quantity of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Temperature,
    Pressure,
    FlowIn,
    FlowOut,
    Energy,
}

impl Channel {
    /// Wire order
    pub const ALL: [Channel; 5] = [
        Channel::Temperature,
        Channel::Pressure,
        Channel::FlowIn,
        Channel::FlowOut,
        Channel::Energy,
    ];

    /// Physical units per LSB
    pub fn scale(self) -> f32 {
        match self {
            Channel::Temperature => 0.5,
            Channel::Pressure | Channel::FlowIn | Channel::FlowOut => 0.1,
            Channel::Energy => 1.0,
        }
    }

    fn target_name(self) -> &'static str {
        match self {
            Channel::Temperature => "temperature.target",
            Channel::Pressure => "pressure.target",
            Channel::FlowIn => "flow_in.target",
            Channel::FlowOut => "flow_out.target",
            Channel::Energy => "energy.target",
        }
    }

    fn tolerance_name(self) -> &'static str {
        match self {
            Channel::Temperature => "temperature.tolerance",
            Channel::Pressure => "pressure.tolerance",
            Channel::FlowIn => "flow_in.tolerance",
            Channel::FlowOut => "flow_out.tolerance",
            Channel::Energy => "energy.tolerance",
        }
    }
}

/// Target and tolerance in fixed-point steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Setpoint {
    pub target: u8,
    pub tolerance: u8,
}

/// Target and tolerance in physical units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhysicalSetpoint {
    pub target: f32,
    pub tolerance: f32,
}

impl PhysicalSetpoint {
    pub fn new(target: f32, tolerance: f32) -> Self {
        PhysicalSetpoint { target, tolerance }
    }
}

/// One point of a control trajectory, kept in the fixed-point domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileNode {
    /// Offset from profile start
    pub time_offset_ms: u16,
    pub config: NodeConfig,
    /// Indexed by [`Channel`] wire order
    pub setpoints: [Setpoint; 5],
}

/// A profile node expressed in physical units, for the application boundary
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhysicalNode {
    pub time_offset_ms: u16,
    pub config: NodeConfig,
    /// degrees C, 0.5 per step
    pub temperature: PhysicalSetpoint,
    /// bar, 0.1 per step
    pub pressure: PhysicalSetpoint,
    /// ml/s, 0.1 per step
    pub flow_in: PhysicalSetpoint,
    /// ml/s, 0.1 per step
    pub flow_out: PhysicalSetpoint,
    /// unitless index, 1 per step
    pub energy: PhysicalSetpoint,
}

impl PhysicalNode {
    fn channel(&self, channel: Channel) -> PhysicalSetpoint {
        match channel {
            Channel::Temperature => self.temperature,
            Channel::Pressure => self.pressure,
            Channel::FlowIn => self.flow_in,
            Channel::FlowOut => self.flow_out,
            Channel::Energy => self.energy,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut PhysicalSetpoint {
        match channel {
            Channel::Temperature => &mut self.temperature,
            Channel::Pressure => &mut self.pressure,
            Channel::FlowIn => &mut self.flow_in,
            Channel::FlowOut => &mut self.flow_out,
            Channel::Energy => &mut self.energy,
        }
    }
}

impl ProfileNode {
    /// Quantises physical values. Anything that does not fit in 0..=255
    /// steps is rejected rather than clamped.
    pub fn from_physical(node: &PhysicalNode) -> Result<Self> {
        let mut setpoints = [Setpoint::default(); 5];
        for (slot, channel) in setpoints.iter_mut().zip(Channel::ALL) {
            let physical = node.channel(channel);
            *slot = Setpoint {
                target: quantize_u8(channel.target_name(), physical.target, channel.scale())?,
                tolerance: quantize_u8(
                    channel.tolerance_name(),
                    physical.tolerance,
                    channel.scale(),
                )?,
            };
        }

        Ok(ProfileNode {
            time_offset_ms: node.time_offset_ms,
            config: node.config,
            setpoints,
        })
    }

    /// Converts back to physical units
    pub fn to_physical(&self) -> PhysicalNode {
        let mut node = PhysicalNode {
            time_offset_ms: self.time_offset_ms,
            config: self.config,
            ..Default::default()
        };
        for (setpoint, channel) in self.setpoints.iter().zip(Channel::ALL) {
            *node.channel_mut(channel) = PhysicalSetpoint {
                target: dequantize_u8(setpoint.target, channel.scale()),
                tolerance: dequantize_u8(setpoint.tolerance, channel.scale()),
            };
        }
        node
    }

    /// Fixed-point setpoint of one channel
    pub fn setpoint(&self, channel: Channel) -> Setpoint {
        self.setpoints[channel as usize]
    }

    pub(crate) fn write(&self, dst: &mut BytesMut) {
        dst.put_u16_le(self.time_offset_ms);
        dst.put_u8(self.config.to_byte());
        for setpoint in &self.setpoints {
            dst.put_u8(setpoint.target);
            dst.put_u8(setpoint.tolerance);
        }
    }

    /// Reads one node; the caller guarantees `NODE_SIZE` bytes remain
    pub(crate) fn read(src: &mut &[u8]) -> Self {
        let time_offset_ms = src.get_u16_le();
        let config = NodeConfig::from_byte(src.get_u8());
        let mut setpoints = [Setpoint::default(); 5];
        for setpoint in setpoints.iter_mut() {
            setpoint.target = src.get_u8();
            setpoint.tolerance = src.get_u8();
        }
        ProfileNode {
            time_offset_ms,
            config,
            setpoints,
        }
    }
}

/// One ProfileLoad packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLoad {
    pub profile_id: u8,
    /// Nodes in the whole profile, across all packets
    pub total_nodes: u8,
    pub nodes: Vec<ProfileNode>,
}

/// A fully reassembled profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub profile_id: u8,
    pub nodes: Vec<ProfileNode>,
}

/// Splits a profile into packets of at most [`MAX_NODES_PER_PACKET`] nodes.
/// Node offsets must be strictly ascending, since the receiver relies on
/// that order to reassemble; packets must be sent in the returned order.
pub fn split_profile(profile_id: u8, nodes: &[ProfileNode]) -> Result<Vec<ProfileLoad>> {
    if nodes.len() > u8::MAX as usize {
        return Err(Error::ElementBudgetExceeded {
            count: nodes.len(),
            max: u8::MAX as usize,
        });
    }
    if let Some(i) = nodes
        .windows(2)
        .position(|pair| pair[1].time_offset_ms <= pair[0].time_offset_ms)
    {
        return Err(Error::UnsortedProfile {
            index: i + 1,
            offset_ms: nodes[i + 1].time_offset_ms,
            previous_ms: nodes[i].time_offset_ms,
        });
    }
    let total_nodes = nodes.len() as u8;

    if nodes.is_empty() {
        return Ok(vec![ProfileLoad {
            profile_id,
            total_nodes,
            nodes: Vec::new(),
        }]);
    }

    Ok(nodes
        .chunks(MAX_NODES_PER_PACKET)
        .map(|chunk| ProfileLoad {
            profile_id,
            total_nodes,
            nodes: chunk.to_vec(),
        })
        .collect())
}

#[derive(Debug)]
struct Partial {
    profile_id: u8,
    total_nodes: u8,
    nodes: Vec<ProfileNode>,
}

/// Rebuilds profiles from ProfileLoad packets.
///
/// The wire format has no chunk index, so packets are accepted only when
/// their nodes continue the strictly ascending time order of what has been
/// collected so far. Anything else discards the partial profile.
#[derive(Debug, Default)]
pub struct ProfileAssembler {
    partial: Option<Partial>,
}

impl ProfileAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one packet; returns the profile once all nodes have arrived
    pub fn push(&mut self, load: ProfileLoad) -> Result<Option<Profile>> {
        let restart = match &self.partial {
            Some(p) => p.profile_id != load.profile_id || p.total_nodes != load.total_nodes,
            None => true,
        };
        if restart {
            self.partial = Some(Partial {
                profile_id: load.profile_id,
                total_nodes: load.total_nodes,
                nodes: Vec::with_capacity(load.total_nodes as usize),
            });
        }

        if let Err(e) = self.extend(&load) {
            self.partial = None;
            return Err(e);
        }

        let complete = match &self.partial {
            Some(p) => p.nodes.len() == p.total_nodes as usize,
            None => false,
        };
        if !complete {
            return Ok(None);
        }

        Ok(self.partial.take().map(|p| Profile {
            profile_id: p.profile_id,
            nodes: p.nodes,
        }))
    }

    /// Drops any partially collected profile
    pub fn reset(&mut self) {
        self.partial = None;
    }

    /// Nodes collected for the profile in progress
    pub fn pending_nodes(&self) -> usize {
        self.partial.as_ref().map_or(0, |p| p.nodes.len())
    }

    fn extend(&mut self, load: &ProfileLoad) -> Result<()> {
        let partial = match self.partial.as_mut() {
            Some(p) => p,
            None => return Ok(()),
        };

        let mut last = partial.nodes.last().map(|n| n.time_offset_ms);
        for node in &load.nodes {
            if let Some(last_ms) = last {
                if node.time_offset_ms <= last_ms {
                    return Err(Error::OutOfOrderChunk {
                        offset_ms: node.time_offset_ms,
                        last_ms,
                    });
                }
            }
            last = Some(node.time_offset_ms);
        }

        if partial.nodes.len() + load.nodes.len() > partial.total_nodes as usize {
            return Err(Error::malformed(
                super::MsgType::ProfileLoad.as_byte(),
                format!(
                    "profile {} overflows {} declared nodes",
                    partial.profile_id, partial.total_nodes
                ),
            ));
        }

        partial.nodes.extend_from_slice(&load.nodes);
        Ok(())
    }
}
