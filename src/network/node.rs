//! Peripheral side of the protocol.
//!
//! `NodeSession` is what firmware (or a simulator) runs: it answers
//! discovery, adopts the address handed out by the coordinator, acks what
//! asks to be acked and reassembles profiles.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::core::{DeviceType, Error, FirmwareVersion, LogicalAddress, PhysicalId, Result};
use crate::protocol::frame::{self, FrameFlags, FrameHeader};
use crate::protocol::message::{AckPayload, AssignId, DiscoveryRequest, DiscoveryResponse, Message, MsgType};
use crate::protocol::payload;
use crate::protocol::profile::{Profile, ProfileAssembler};

use super::dedup::{SequenceTable, Verdict};

/// Results of feeding one frame to a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// Bytes to send back to the coordinator
    Transmit(Bytes),
    /// Application payload for the node firmware
    Deliver(Message),
    /// A complete profile was reassembled
    Profile(Profile),
    /// The coordinator asked for a restart; the address is already dropped
    Reboot { delay_ms: u16 },
    /// Frame rejected
    Dropped(Error),
}

/// Protocol state of one peripheral
#[derive(Debug)]
pub struct NodeSession {
    identity: PhysicalId,
    device_type: DeviceType,
    hw_revision: u8,
    firmware: FirmwareVersion,
    address: LogicalAddress,
    next_seq: u16,
    sequences: SequenceTable,
    profiles: ProfileAssembler,
}

impl NodeSession {
    pub fn new(
        identity: PhysicalId,
        device_type: DeviceType,
        hw_revision: u8,
        firmware: FirmwareVersion,
    ) -> Self {
        NodeSession {
            identity,
            device_type,
            hw_revision,
            firmware,
            address: LogicalAddress::UNASSIGNED,
            next_seq: rand::random(),
            sequences: SequenceTable::new(16, Duration::from_secs(30)),
            profiles: ProfileAssembler::new(),
        }
    }

    /// Starts the outgoing sequence counter at `seq`
    pub fn with_seed(mut self, seq: u16) -> Self {
        self.next_seq = seq;
        self
    }

    /// Starts with an address kept from an earlier session
    pub fn with_address(mut self, address: LogicalAddress) -> Self {
        self.address = address;
        self
    }

    pub fn identity(&self) -> PhysicalId {
        self.identity
    }

    pub fn address(&self) -> LogicalAddress {
        self.address
    }

    pub fn is_assigned(&self) -> bool {
        self.address != LogicalAddress::UNASSIGNED
    }

    /// Discovery reply, or `None` when the request excludes this node
    pub fn on_discovery_request(&self, request: &DiscoveryRequest) -> Option<DiscoveryResponse> {
        if request.only_unassigned && self.is_assigned() {
            return None;
        }
        Some(DiscoveryResponse {
            identity: self.identity,
            device_type: self.device_type,
            hw_revision: self.hw_revision,
            firmware: self.firmware,
            address: self.address,
        })
    }

    /// Adopts the address if the assignment names this node. Returns whether
    /// the address changed.
    pub fn on_assign(&mut self, assign: &AssignId) -> Result<bool> {
        if assign.identity != self.identity {
            return Err(Error::IdentityMismatch {
                expected: self.identity,
                actual: assign.identity,
            });
        }
        if self.address == assign.address {
            return Ok(false);
        }
        info!(identity = %self.identity, address = %assign.address, "address assigned");
        self.address = assign.address;
        Ok(true)
    }

    /// Builds a frame to the coordinator from the current address
    pub fn send(&mut self, message: &Message, need_ack: bool) -> Result<Bytes> {
        let body = payload::encode(message)?;
        let mut header = FrameHeader::direct(
            self.address,
            LogicalAddress::COORDINATOR,
            message.msg_type().as_byte(),
            self.take_seq(),
        );
        if need_ack {
            header.flags = FrameFlags::NEED_ACK;
        }
        frame::encode(&header, &body)
    }

    /// Processes one frame received from radio `link`
    pub fn handle(&mut self, link: PhysicalId, data: &[u8], now: Instant) -> Vec<NodeOutput> {
        let mut out = Vec::new();

        let (header, body) = match frame::decode(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(error = %e, "dropping undecodable frame");
                out.push(NodeOutput::Dropped(e));
                return out;
            }
        };

        let for_us = header.dst == self.address
            || header.dst == LogicalAddress::BROADCAST
            || header.msg_type == MsgType::AssignId.as_byte();
        if !for_us || header.msg_type == MsgType::Ack.as_byte() {
            return out;
        }

        // a payload we cannot parse is neither acked nor remembered
        let message = match payload::decode(header.msg_type, body) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping malformed payload");
                out.push(NodeOutput::Dropped(e));
                return out;
            }
        };

        let verdict = self.sequences.check((link, header.src), header.seq, header.flags, now);
        if header.flags.need_ack() && header.dst != LogicalAddress::BROADCAST {
            let ack = Message::Ack(AckPayload {
                acked_seq: header.seq,
                acked_type: header.msg_type,
            });
            match self.reply(header.src, &ack) {
                Ok(bytes) => out.push(NodeOutput::Transmit(bytes)),
                Err(e) => out.push(NodeOutput::Dropped(e)),
            }
        }
        if verdict == Verdict::Duplicate {
            return out;
        }

        match message {
            Message::DiscoveryRequest(request) => {
                if let Some(response) = self.on_discovery_request(&request) {
                    match self.reply(header.src, &Message::DiscoveryResponse(response)) {
                        Ok(bytes) => out.push(NodeOutput::Transmit(bytes)),
                        Err(e) => out.push(NodeOutput::Dropped(e)),
                    }
                }
            }
            Message::AssignId(assign) => match self.on_assign(&assign) {
                // announce from the new address so the coordinator can commit
                Ok(_) => match self.reply(header.src, &Message::Ping) {
                    Ok(bytes) => out.push(NodeOutput::Transmit(bytes)),
                    Err(e) => out.push(NodeOutput::Dropped(e)),
                },
                Err(e) => {
                    debug!(error = %e, "ignoring assignment for another node");
                    out.push(NodeOutput::Dropped(e));
                }
            },
            Message::Reboot(reboot) => {
                self.address = LogicalAddress::UNASSIGNED;
                self.sequences.forget(link);
                self.profiles.reset();
                out.push(NodeOutput::Reboot {
                    delay_ms: reboot.delay_ms,
                });
            }
            Message::Ping => {}
            Message::ProfileLoad(load) => match self.profiles.push(load) {
                Ok(Some(profile)) => out.push(NodeOutput::Profile(profile)),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "profile reassembly failed");
                    out.push(NodeOutput::Dropped(e));
                }
            },
            other => out.push(NodeOutput::Deliver(other)),
        }
        out
    }

    fn reply(&mut self, dst: LogicalAddress, message: &Message) -> Result<Bytes> {
        let body = payload::encode(message)?;
        let header = FrameHeader::direct(self.address, dst, message.msg_type().as_byte(), self.take_seq());
        frame::encode(&header, &body)
    }

    fn take_seq(&mut self) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }
}
