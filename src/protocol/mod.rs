//! Protocol implementation module
//!
//! This module defines the HeadUnit wire format: the transport frame, the
//! typed messages it carries, the per-type payload codecs and the compact
//! profile-node encoding.

pub mod codec;
pub mod frame;
pub mod message;
pub mod payload;
pub mod profile;

pub use self::codec::FrameCodec;
pub use self::frame::{Frame, FrameFlags, FrameHeader};
pub use self::message::{Message, MsgType};
pub use self::payload::PayloadShape;
pub use self::profile::{
    NodeConfig,
    PhysicalNode,
    Profile,
    ProfileAssembler,
    ProfileLoad,
    ProfileNode,
};
