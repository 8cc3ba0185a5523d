//! Mesh management module
//!
//! This module holds everything above the wire format: duplicate
//! suppression, acknowledgment tracking, address enrollment, the sans-IO
//! coordinator engine and the tokio task that drives it.

pub mod ack;
pub mod coordinator;
pub mod dedup;
pub mod driver;
pub mod enrollment;
pub mod node;

pub use self::ack::{PendingAcks, RetryAction};
pub use self::coordinator::{Coordinator, Delivery, LinkTarget, Output};
pub use self::dedup::{SequenceTable, Verdict};
pub use self::driver::{spawn, CoordinatorHandle, DeliveryReport, Inbound, Link, LinkPeer, Outbound};
pub use self::enrollment::{DeviceRecord, EnrollmentState, Registry};
pub use self::node::{NodeOutput, NodeSession};
