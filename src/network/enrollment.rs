//! Coordinator-side addressing and enrollment.
//!
//! ```text
//! (no record) --discovery--> Discovered --AssignId--> Pending --traffic from new addr--> Assigned
//!                                ^                      |                                  |
//!                                +------ retries out ---+                                  |
//!                                +------------------ reboot / silence ---------------------+
//! ```
//!
//! The registry owns both the device records and the address index, and
//! every transition updates them together inside one `&mut self` call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::{
    DeviceType, EngineConfig, Error, FirmwareVersion, LogicalAddress, PhysicalId, Result,
};
use crate::protocol::message::{AssignId, DiscoveryResponse};

/// Enrollment state of a known device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentState {
    /// Identity known, no address
    Discovered,
    /// AssignId sent; the address is reserved but not confirmed
    Pending {
        address: LogicalAddress,
        attempts: u32,
        deadline: Instant,
    },
    /// Node confirmed by sending from its new address
    Assigned { address: LogicalAddress },
}

/// What the coordinator knows about one radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub identity: PhysicalId,
    pub device_type: DeviceType,
    pub hw_revision: u8,
    pub firmware: FirmwareVersion,
    pub state: EnrollmentState,
    /// Last frame of any kind from this radio
    pub last_seen: Instant,
}

impl DeviceRecord {
    /// Confirmed logical address
    pub fn address(&self) -> Option<LogicalAddress> {
        match self.state {
            EnrollmentState::Assigned { address } => Some(address),
            _ => None,
        }
    }

    /// Confirmed or reserved address
    fn held_address(&self) -> Option<LogicalAddress> {
        match self.state {
            EnrollmentState::Assigned { address } | EnrollmentState::Pending { address, .. } => {
                Some(address)
            }
            EnrollmentState::Discovered => None,
        }
    }
}

/// Side effects requested by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentAction {
    /// Transmit an AssignId to this radio
    SendAssign(AssignId),
    /// A device now holds a confirmed address
    Enrolled {
        identity: PhysicalId,
        address: LogicalAddress,
    },
    /// A device lost its address
    Released {
        identity: PhysicalId,
        address: LogicalAddress,
    },
    /// Broadcast a fresh discovery request
    Rediscover,
}

/// Device registry and address allocator
#[derive(Debug)]
pub struct Registry {
    devices: HashMap<PhysicalId, DeviceRecord>,
    /// Every Pending or Assigned address and who holds it
    holders: HashMap<LogicalAddress, PhysicalId>,
    assign_timeout: Duration,
    max_assign_attempts: u32,
    device_timeout: Option<Duration>,
}

impl Registry {
    pub fn new(config: &EngineConfig) -> Self {
        Registry {
            devices: HashMap::new(),
            holders: HashMap::new(),
            assign_timeout: config.assign_timeout,
            max_assign_attempts: config.max_assign_attempts,
            device_timeout: config.device_timeout,
        }
    }

    /// Handles a discovery response that arrived from radio `link`
    pub fn on_discovery(
        &mut self,
        link: PhysicalId,
        response: &DiscoveryResponse,
        now: Instant,
    ) -> Result<Vec<EnrollmentAction>> {
        if response.identity != link {
            return Err(Error::IdentityMismatch {
                expected: link,
                actual: response.identity,
            });
        }

        let record = self.devices.entry(link).or_insert_with(|| {
            info!(identity = %link, device_type = ?response.device_type, "new device discovered");
            DeviceRecord {
                identity: link,
                device_type: response.device_type,
                hw_revision: response.hw_revision,
                firmware: response.firmware,
                state: EnrollmentState::Discovered,
                last_seen: now,
            }
        });
        record.device_type = response.device_type;
        record.hw_revision = response.hw_revision;
        record.firmware = response.firmware;
        record.last_seen = now;

        let reported = response.address;
        let state = record.state;
        match state {
            EnrollmentState::Assigned { address } if address == reported => Ok(Vec::new()),
            EnrollmentState::Pending { address, .. } if address == reported => {
                Ok(self.confirm(link, address).into_iter().collect())
            }
            // still on the old address; the retry timer resends AssignId
            EnrollmentState::Pending { .. } => Ok(Vec::new()),
            EnrollmentState::Assigned { address } => {
                // node forgot its address (reboot) or is using another one
                let mut actions = vec![self.release(link, address)];
                actions.extend(self.adopt_or_allocate(link, reported, now)?);
                Ok(actions)
            }
            EnrollmentState::Discovered => self.adopt_or_allocate(link, reported, now),
        }
    }

    /// Notes traffic from `link` sourced at `src`; commits a pending
    /// assignment when the node speaks from its new address.
    pub fn on_traffic(
        &mut self,
        link: PhysicalId,
        src: LogicalAddress,
        now: Instant,
    ) -> Option<EnrollmentAction> {
        let record = self.devices.get_mut(&link)?;
        record.last_seen = now;
        match record.state {
            EnrollmentState::Pending { address, .. } if address == src => self.confirm(link, address),
            _ => None,
        }
    }

    /// Moves a device to a specific address chosen by the caller
    pub fn assign_address(
        &mut self,
        identity: PhysicalId,
        address: LogicalAddress,
        now: Instant,
    ) -> Result<EnrollmentAction> {
        if !address.is_dynamic() {
            return Err(Error::InvalidAddress(address));
        }
        if let Some(&holder) = self.holders.get(&address) {
            if holder != identity {
                return Err(Error::AddressCollision { address, holder });
            }
        }
        let previous = match self.devices.get(&identity) {
            Some(record) => record.held_address(),
            None => return Err(Error::UnknownDevice(identity)),
        };

        if let Some(old) = previous {
            self.holders.remove(&old);
        }
        Ok(self.reserve(identity, address, now))
    }

    /// Retry and liveness timers
    pub fn poll(&mut self, now: Instant) -> Vec<EnrollmentAction> {
        let mut actions = Vec::new();
        let mut rediscover = false;
        let identities: Vec<PhysicalId> = self.devices.keys().copied().collect();

        for identity in identities {
            let (state, last_seen) = match self.devices.get(&identity) {
                Some(r) => (r.state, r.last_seen),
                None => continue,
            };

            match state {
                EnrollmentState::Pending {
                    address,
                    attempts,
                    deadline,
                } if now >= deadline => {
                    if attempts < self.max_assign_attempts {
                        debug!(identity = %identity, address = %address, attempt = attempts + 1, "resending AssignId");
                        self.set_state(
                            identity,
                            EnrollmentState::Pending {
                                address,
                                attempts: attempts + 1,
                                deadline: now + self.assign_timeout,
                            },
                        );
                        actions.push(EnrollmentAction::SendAssign(AssignId { identity, address }));
                    } else {
                        warn!(identity = %identity, address = %address, "assignment unconfirmed, rediscovering");
                        self.holders.remove(&address);
                        self.set_state(identity, EnrollmentState::Discovered);
                        rediscover = true;
                    }
                }
                EnrollmentState::Assigned { address } => {
                    if let Some(timeout) = self.device_timeout {
                        if now.saturating_duration_since(last_seen) > timeout {
                            warn!(identity = %identity, address = %address, "device silent, releasing address");
                            actions.push(self.release(identity, address));
                        }
                    }
                }
                _ => {}
            }
        }

        if rediscover {
            actions.push(EnrollmentAction::Rediscover);
        }
        actions
    }

    /// The coordinator told a device to reboot; it will come back unassigned
    pub fn on_reboot_sent(&mut self, identity: PhysicalId) -> Option<EnrollmentAction> {
        let address = self.devices.get(&identity)?.held_address()?;
        Some(self.release(identity, address))
    }

    /// Forgets a device entirely
    pub fn reset(&mut self, identity: PhysicalId) -> Option<DeviceRecord> {
        let record = self.devices.remove(&identity)?;
        if let Some(address) = record.held_address() {
            self.holders.remove(&address);
        }
        info!(identity = %identity, "device record reset");
        Some(record)
    }

    /// Forgets every device
    pub fn reset_all(&mut self) {
        self.devices.clear();
        self.holders.clear();
    }

    /// All known devices, ordered by identity
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<_> = self.devices.values().cloned().collect();
        devices.sort_by_key(|d| d.identity);
        devices
    }

    pub fn get(&self, identity: &PhysicalId) -> Option<&DeviceRecord> {
        self.devices.get(identity)
    }

    /// Confirmed address of a radio
    pub fn address_of(&self, identity: &PhysicalId) -> Option<LogicalAddress> {
        self.devices.get(identity)?.address()
    }

    /// Radio holding a confirmed address
    pub fn identity_of(&self, address: LogicalAddress) -> Option<PhysicalId> {
        let identity = self.holders.get(&address)?;
        self.devices
            .get(identity)
            .filter(|r| r.address() == Some(address))
            .map(|r| r.identity)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn adopt_or_allocate(
        &mut self,
        identity: PhysicalId,
        reported: LogicalAddress,
        now: Instant,
    ) -> Result<Vec<EnrollmentAction>> {
        if reported.is_dynamic() {
            match self.holders.get(&reported) {
                None => {
                    // node kept an address from before a coordinator restart
                    self.holders.insert(reported, identity);
                    self.set_state(identity, EnrollmentState::Assigned { address: reported });
                    info!(identity = %identity, address = %reported, "adopted existing address");
                    return Ok(vec![EnrollmentAction::Enrolled {
                        identity,
                        address: reported,
                    }]);
                }
                Some(&holder) if holder != identity => {
                    warn!(identity = %identity, address = %reported, holder = %holder, "reported address collides");
                }
                Some(_) => {}
            }
        }

        let address = self.allocate()?;
        Ok(vec![self.reserve(identity, address, now)])
    }

    /// Lowest dynamic address nobody holds or has reserved
    fn allocate(&self) -> Result<LogicalAddress> {
        LogicalAddress::dynamic_range()
            .find(|a| !self.holders.contains_key(a))
            .ok_or(Error::AddressSpaceExhausted)
    }

    fn reserve(&mut self, identity: PhysicalId, address: LogicalAddress, now: Instant) -> EnrollmentAction {
        self.holders.insert(address, identity);
        self.set_state(
            identity,
            EnrollmentState::Pending {
                address,
                attempts: 1,
                deadline: now + self.assign_timeout,
            },
        );
        debug!(identity = %identity, address = %address, "address reserved");
        EnrollmentAction::SendAssign(AssignId { identity, address })
    }

    fn confirm(&mut self, identity: PhysicalId, address: LogicalAddress) -> Option<EnrollmentAction> {
        self.set_state(identity, EnrollmentState::Assigned { address });
        info!(identity = %identity, address = %address, "device enrolled");
        Some(EnrollmentAction::Enrolled { identity, address })
    }

    fn release(&mut self, identity: PhysicalId, address: LogicalAddress) -> EnrollmentAction {
        if self.holders.get(&address) == Some(&identity) {
            self.holders.remove(&address);
        }
        self.set_state(identity, EnrollmentState::Discovered);
        EnrollmentAction::Released { identity, address }
    }

    fn set_state(&mut self, identity: PhysicalId, state: EnrollmentState) {
        if let Some(record) = self.devices.get_mut(&identity) {
            record.state = state;
        }
    }
}
