//! HeadUnit mesh: wire protocol engine for a modular espresso machine
//!
//! A head unit (the coordinator) talks to boiler, pump, scale and UI
//! peripherals over a lossy broadcast radio link. This library implements
//! the frame codec, the typed payload registry, compact profile encoding,
//! address enrollment and the dedup/ack layer, plus an async driver.
pub mod core;
pub mod network;
pub mod protocol;
pub mod util;

// Re-export commonly used items
pub use crate::core::{EngineConfig, Error, LogicalAddress, PhysicalId, Result};
pub use crate::network::{Coordinator, CoordinatorHandle, NodeSession};
pub use crate::protocol::Message;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
