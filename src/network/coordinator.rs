//! Sans-IO coordinator engine.
//!
//! The coordinator owns every piece of mutable protocol state (device
//! registry, per-source sequence table, pending acks, outgoing sequence
//! counter). Callers feed it received bytes and clock ticks and carry out
//! the returned [`Output`]s; it never touches a socket or a timer itself.

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::core::{EngineConfig, Error, LogicalAddress, PhysicalId, Result};
use crate::protocol::frame::{self, FrameFlags, FrameHeader};
use crate::protocol::message::{AckPayload, DiscoveryRequest, Message, MsgType};
use crate::protocol::payload;

use super::ack::{PendingAcks, RetryAction};
use super::dedup::{SequenceTable, Verdict};
use super::enrollment::{DeviceRecord, EnrollmentAction, Registry};

/// Link-layer destination of an outgoing frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkTarget {
    Broadcast,
    Device(PhysicalId),
}

/// Application message received from a node
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Radio the frame arrived from
    pub identity: PhysicalId,
    pub src: LogicalAddress,
    pub seq: u16,
    pub flags: FrameFlags,
    pub message: Message,
}

/// Work for the caller produced by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Put these bytes on the air
    Transmit { target: LinkTarget, frame: Bytes },
    /// Hand a message to the application
    Deliver(Delivery),
    /// A frame sent with NEED_ACK was acknowledged
    Acked { dst: LogicalAddress, seq: u16 },
    /// A frame sent with NEED_ACK will never be acknowledged
    DeliveryFailed {
        dst: LogicalAddress,
        seq: u16,
        msg_type: u8,
        reason: Error,
    },
    /// A device confirmed its address
    Enrolled {
        identity: PhysicalId,
        address: LogicalAddress,
    },
    /// A device lost its address
    Released {
        identity: PhysicalId,
        address: LogicalAddress,
    },
    /// Input rejected; diagnostics only
    Dropped(Error),
}

/// Coordinator protocol engine
#[derive(Debug)]
pub struct Coordinator {
    config: EngineConfig,
    registry: Registry,
    sequences: SequenceTable,
    acks: PendingAcks,
    next_seq: u16,
}

impl Coordinator {
    /// Creates an engine with a randomly seeded sequence counter
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_seed(config, rand::random())
    }

    /// Creates an engine whose first outgoing frame uses `seq`
    pub fn with_seed(config: EngineConfig, seq: u16) -> Result<Self> {
        config.validate()?;
        Ok(Coordinator {
            registry: Registry::new(&config),
            sequences: SequenceTable::new(config.dedup_window, config.sequence_ttl),
            acks: PendingAcks::new(config.ack_timeout, config.max_retries),
            next_seq: seq,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handles bytes received from radio `link`
    pub fn ingest(&mut self, link: PhysicalId, data: &[u8], now: Instant) -> Vec<Output> {
        let mut out = Vec::new();

        let (header, body) = match frame::decode(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(identity = %link, error = %e, "dropping undecodable frame");
                out.push(Output::Dropped(e));
                return out;
            }
        };

        if header.dst != LogicalAddress::COORDINATOR && header.dst != LogicalAddress::BROADCAST {
            debug!(dst = %header.dst, "frame not for us");
            return out;
        }

        if let Some(action) = self.registry.on_traffic(link, header.src, now) {
            self.apply(action, now, &mut out);
        }

        if header.msg_type == MsgType::Ack.as_byte() {
            self.on_ack(&header, body, &mut out);
            return out;
        }

        // a payload we cannot parse is neither acked nor remembered
        let message = match payload::decode(header.msg_type, body) {
            Ok(m) => m,
            Err(e) => {
                warn!(src = %header.src, error = %e, "dropping malformed payload");
                out.push(Output::Dropped(e));
                return out;
            }
        };

        let verdict = self.sequences.check((link, header.src), header.seq, header.flags, now);
        if header.flags.need_ack() {
            let ack = Message::Ack(AckPayload {
                acked_seq: header.seq,
                acked_type: header.msg_type,
            });
            match self.build(header.src, &ack, FrameFlags::empty()) {
                Ok((_, frame)) => out.push(Output::Transmit {
                    target: LinkTarget::Device(link),
                    frame,
                }),
                Err(e) => out.push(Output::Dropped(e)),
            }
        }
        if verdict == Verdict::Duplicate {
            debug!(src = %header.src, seq = header.seq, "duplicate suppressed");
            return out;
        }
        debug!(src = %header.src, seq = header.seq, msg_type = header.msg_type, "accepted");

        match message {
            Message::DiscoveryResponse(response) => {
                match self.registry.on_discovery(link, &response, now) {
                    Ok(actions) => {
                        for action in actions {
                            self.apply(action, now, &mut out);
                        }
                    }
                    Err(e) => {
                        warn!(identity = %link, error = %e, "discovery response rejected");
                        out.push(Output::Dropped(e));
                    }
                }
            }
            // engine-level chatter, already accounted for as traffic
            Message::Ping
            | Message::DiscoveryRequest(_)
            | Message::AssignId(_)
            | Message::Reboot(_) => {}
            message => out.push(Output::Deliver(Delivery {
                identity: link,
                src: header.src,
                seq: header.seq,
                flags: header.flags,
                message,
            })),
        }
        out
    }

    /// Sends `message` to a logical address. Broadcasts never request acks.
    /// Returns the sequence number used.
    pub fn send(
        &mut self,
        dst: LogicalAddress,
        message: &Message,
        need_ack: bool,
        now: Instant,
    ) -> Result<(u16, Vec<Output>)> {
        let target = match dst {
            LogicalAddress::BROADCAST => LinkTarget::Broadcast,
            _ => LinkTarget::Device(
                self.registry
                    .identity_of(dst)
                    .ok_or(Error::UnknownDestination(dst))?,
            ),
        };
        let need_ack = need_ack && target != LinkTarget::Broadcast;
        let flags = if need_ack { FrameFlags::NEED_ACK } else { FrameFlags::empty() };

        let (seq, frame) = self.build(dst, message, flags)?;
        let mut out = vec![Output::Transmit { target, frame: frame.clone() }];

        // release first so the reboot's own ack survives the cancellation;
        // the node acks from its old address before restarting
        if let (Message::Reboot(_), LinkTarget::Device(identity)) = (message, target) {
            if let Some(action) = self.registry.on_reboot_sent(identity) {
                self.apply(action, now, &mut out);
            }
        }
        if let (true, LinkTarget::Device(link)) = (need_ack, target) {
            self.acks
                .track(dst, seq, message.msg_type().as_byte(), link, frame, now);
        }
        Ok((seq, out))
    }

    /// Broadcasts a discovery request to every node
    pub fn discover(&mut self, now: Instant) -> Vec<Output> {
        self.discover_with(false, now)
    }

    /// Broadcasts a discovery request only unassigned nodes answer
    pub fn discover_unassigned(&mut self, now: Instant) -> Vec<Output> {
        self.discover_with(true, now)
    }

    /// Moves a known device to a chosen address
    pub fn assign_address(
        &mut self,
        identity: PhysicalId,
        address: LogicalAddress,
        now: Instant,
    ) -> Result<Vec<Output>> {
        let previous = self.registry.address_of(&identity);
        let action = self.registry.assign_address(identity, address, now)?;

        let mut out = Vec::new();
        if let Some(old) = previous.filter(|old| *old != address) {
            self.cancel_acks(old, &mut out);
        }
        self.apply(action, now, &mut out);
        Ok(out)
    }

    /// Drives retransmissions and enrollment timers
    pub fn poll(&mut self, now: Instant) -> Vec<Output> {
        let mut out = Vec::new();

        for action in self.acks.poll(now) {
            match action {
                RetryAction::Resend { link, frame, .. } => out.push(Output::Transmit {
                    target: LinkTarget::Device(link),
                    frame,
                }),
                RetryAction::GiveUp {
                    dst,
                    seq,
                    msg_type,
                    attempts,
                } => out.push(Output::DeliveryFailed {
                    dst,
                    seq,
                    msg_type,
                    reason: Error::DeliveryFailed { dst, seq, attempts },
                }),
            }
        }

        for action in self.registry.poll(now) {
            self.apply(action, now, &mut out);
        }
        self.sequences.expire(now);
        out
    }

    /// Forgets one device and fails everything still waiting on it
    pub fn reset(&mut self, identity: PhysicalId) -> Vec<Output> {
        let mut out = Vec::new();
        if let Some(record) = self.registry.reset(identity) {
            if let Some(address) = record.address() {
                self.cancel_acks(address, &mut out);
            }
        }
        self.sequences.forget(identity);
        out
    }

    /// Forgets every device
    pub fn reset_all(&mut self) -> Vec<Output> {
        let out = self.shutdown();
        self.registry.reset_all();
        out
    }

    /// Fails every pending send with `Cancelled`; no timers remain afterwards
    pub fn shutdown(&mut self) -> Vec<Output> {
        self.acks
            .cancel_all()
            .into_iter()
            .map(|(dst, seq, msg_type)| Output::DeliveryFailed {
                dst,
                seq,
                msg_type,
                reason: Error::Cancelled,
            })
            .collect()
    }

    /// Known devices ordered by identity
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.registry.devices()
    }

    pub fn address_of(&self, identity: &PhysicalId) -> Option<LogicalAddress> {
        self.registry.address_of(identity)
    }

    pub fn identity_of(&self, address: LogicalAddress) -> Option<PhysicalId> {
        self.registry.identity_of(address)
    }

    /// Frames still waiting for an ack
    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    fn discover_with(&mut self, only_unassigned: bool, _now: Instant) -> Vec<Output> {
        let request = Message::DiscoveryRequest(DiscoveryRequest { only_unassigned });
        match self.build(LogicalAddress::BROADCAST, &request, FrameFlags::empty()) {
            Ok((_, frame)) => vec![Output::Transmit {
                target: LinkTarget::Broadcast,
                frame,
            }],
            Err(e) => vec![Output::Dropped(e)],
        }
    }

    fn on_ack(&mut self, header: &FrameHeader, body: &[u8], out: &mut Vec<Output>) {
        match payload::decode(header.msg_type, body) {
            Ok(Message::Ack(ack)) => {
                if self.acks.acknowledge(header.src, ack.acked_seq) {
                    out.push(Output::Acked {
                        dst: header.src,
                        seq: ack.acked_seq,
                    });
                } else {
                    debug!(src = %header.src, seq = ack.acked_seq, "unmatched ack");
                }
            }
            Ok(_) => {}
            Err(e) => out.push(Output::Dropped(e)),
        }
    }

    fn apply(&mut self, action: EnrollmentAction, now: Instant, out: &mut Vec<Output>) {
        match action {
            EnrollmentAction::SendAssign(assign) => {
                let message = Message::AssignId(assign);
                // the node may still sit on a stale address, so address the sentinel
                // and let the embedded identity select the receiver
                match self.build(LogicalAddress::UNASSIGNED, &message, FrameFlags::empty()) {
                    Ok((_, frame)) => out.push(Output::Transmit {
                        target: LinkTarget::Device(assign.identity),
                        frame,
                    }),
                    Err(e) => out.push(Output::Dropped(e)),
                }
            }
            EnrollmentAction::Enrolled { identity, address } => {
                out.push(Output::Enrolled { identity, address });
            }
            EnrollmentAction::Released { identity, address } => {
                info!(identity = %identity, address = %address, "address released");
                self.cancel_acks(address, out);
                out.push(Output::Released { identity, address });
            }
            EnrollmentAction::Rediscover => out.extend(self.discover(now)),
        }
    }

    fn cancel_acks(&mut self, dst: LogicalAddress, out: &mut Vec<Output>) {
        for (seq, msg_type) in self.acks.cancel(dst) {
            out.push(Output::DeliveryFailed {
                dst,
                seq,
                msg_type,
                reason: Error::Cancelled,
            });
        }
    }

    fn build(&mut self, dst: LogicalAddress, message: &Message, flags: FrameFlags) -> Result<(u16, Bytes)> {
        let body = payload::encode(message)?;
        let mut header = FrameHeader::direct(
            LogicalAddress::COORDINATOR,
            dst,
            message.msg_type().as_byte(),
            self.next_seq,
        );
        header.flags = flags;
        let frame = frame::encode(&header, &body)?;
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok((header.seq, frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::core::{DeviceType, FirmwareVersion};
    use crate::network::node::{NodeOutput, NodeSession};
    use crate::protocol::message::{Reboot, Scale, Sensor, SetState};

    const HUB: PhysicalId = PhysicalId([0; 6]);
    const A: PhysicalId = PhysicalId([0xA0, 0, 0, 0, 0, 1]);
    const B: PhysicalId = PhysicalId([0xB0, 0, 0, 0, 0, 2]);

    fn coordinator() -> Coordinator {
        Coordinator::with_seed(EngineConfig::default(), 1000).unwrap()
    }

    fn session(identity: PhysicalId) -> NodeSession {
        NodeSession::new(identity, DeviceType::Scale, 1, FirmwareVersion { major: 1, minor: 4 }).with_seed(1)
    }

    /// Carries coordinator transmissions to the nodes and their replies back
    /// until the air is quiet
    fn pump(coord: &mut Coordinator, nodes: &mut [NodeSession], mut outputs: Vec<Output>, now: Instant) -> Vec<Output> {
        let mut seen = Vec::new();
        while !outputs.is_empty() {
            let mut next = Vec::new();
            for output in outputs {
                if let Output::Transmit { target, frame } = &output {
                    for node in nodes.iter_mut() {
                        let hit = match target {
                            LinkTarget::Broadcast => true,
                            LinkTarget::Device(id) => *id == node.identity(),
                        };
                        if !hit {
                            continue;
                        }
                        for reply in node.handle(HUB, frame, now) {
                            if let NodeOutput::Transmit(bytes) = reply {
                                next.extend(coord.ingest(node.identity(), &bytes, now));
                            }
                        }
                    }
                }
                seen.push(output);
            }
            outputs = next;
        }
        seen
    }

    fn node_frame(src: LogicalAddress, seq: u16, flags: FrameFlags, message: &Message) -> Bytes {
        let mut header = FrameHeader::direct(src, LogicalAddress::COORDINATOR, message.msg_type().as_byte(), seq);
        header.flags = flags;
        frame::encode(&header, &payload::encode(message).unwrap()).unwrap()
    }

    fn enrolled(coord: &mut Coordinator, identity: PhysicalId, address: LogicalAddress) {
        let response = Message::DiscoveryResponse(crate::protocol::message::DiscoveryResponse {
            identity,
            device_type: DeviceType::Boiler,
            hw_revision: 1,
            firmware: FirmwareVersion { major: 1, minor: 0 },
            address,
        });
        coord.ingest(identity, &node_frame(address, 1, FrameFlags::empty(), &response), Instant::now());
        assert_eq!(coord.address_of(&identity), Some(address));
    }

    #[test]
    fn test_enrollment_end_to_end() {
        let mut coord = coordinator();
        let mut nodes = vec![session(A), session(B)];
        let now = Instant::now();

        let start = coord.discover(now);
        let outputs = pump(&mut coord, &mut nodes, start, now);

        let enrolled: Vec<_> = outputs
            .iter()
            .filter_map(|o| match o {
                Output::Enrolled { identity, address } => Some((*identity, *address)),
                _ => None,
            })
            .collect();
        assert_eq!(enrolled.len(), 2);
        assert_ne!(enrolled[0].1, enrolled[1].1);

        for node in &nodes {
            assert_eq!(coord.address_of(&node.identity()), Some(node.address()));
            assert_eq!(coord.identity_of(node.address()), Some(node.identity()));
        }
    }

    #[test]
    fn test_duplicate_scenario_delivers_twice_acks_four_times() {
        let mut coord = coordinator();
        let src = LogicalAddress(0x40);
        enrolled(&mut coord, A, src);
        let now = Instant::now();

        let reading = Message::Sensor(Sensor { sensor_id: 1, value: 93.5 });
        let ack = FrameFlags::NEED_ACK;
        let rt = FrameFlags::NEED_ACK.with(FrameFlags::RETRANSMITTED);
        let frames = [
            node_frame(src, 5, ack, &reading),
            node_frame(src, 5, rt, &reading),
            node_frame(src, 6, ack, &reading),
            node_frame(src, 5, rt, &reading),
        ];

        let mut deliveries = Vec::new();
        let mut acks = Vec::new();
        for frame in &frames {
            let outputs = coord.ingest(A, frame, now);
            let mut acks_here = 0;
            for output in outputs {
                match output {
                    Output::Deliver(d) => deliveries.push(d.seq),
                    Output::Transmit { target, frame } => {
                        assert_eq!(target, LinkTarget::Device(A));
                        let (header, body) = frame::decode(&frame).unwrap();
                        assert_eq!(header.dst, src);
                        assert!(!header.flags.need_ack());
                        if let Message::Ack(a) = payload::decode(header.msg_type, body).unwrap() {
                            acks.push(a.acked_seq);
                            acks_here += 1;
                        }
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            assert_eq!(acks_here, 1);
        }

        assert_eq!(deliveries, vec![5, 6]);
        assert_eq!(acks, vec![5, 5, 6, 5]);
    }

    #[test]
    fn test_send_retries_then_fails() {
        let config = EngineConfig {
            ack_timeout: Duration::from_millis(100),
            max_retries: 2,
            ..EngineConfig::default()
        };
        let mut coord = Coordinator::with_seed(config, 7).unwrap();
        let dst = LogicalAddress(0x40);
        enrolled(&mut coord, A, dst);
        let start = Instant::now();

        let set = Message::SetState(SetState { channel: 1, on: true });
        let (seq, outputs) = coord.send(dst, &set, true, start).unwrap();
        assert_eq!(outputs.len(), 1);

        let mut resends = Vec::new();
        let mut failure = None;
        for step in 1..=5u64 {
            for output in coord.poll(start + Duration::from_millis(100 * step)) {
                match output {
                    Output::Transmit { frame, .. } => {
                        let (header, _) = frame::decode(&frame).unwrap();
                        assert_eq!(header.seq, seq);
                        assert!(header.flags.retransmitted());
                        resends.push(header.seq);
                    }
                    Output::DeliveryFailed { reason, msg_type, .. } => {
                        assert_eq!(msg_type, 0x10);
                        failure = Some(reason);
                    }
                    _ => {}
                }
            }
        }
        assert_eq!(resends.len(), 2);
        assert_eq!(failure, Some(Error::DeliveryFailed { dst, seq, attempts: 3 }));
        assert_eq!(coord.pending_acks(), 0);
    }

    #[test]
    fn test_ack_resolves_send() {
        let mut coord = coordinator();
        let mut nodes = vec![session(A)];
        let now = Instant::now();
        let start = coord.discover(now);
        pump(&mut coord, &mut nodes, start, now);
        let dst = nodes[0].address();

        let set = Message::SetState(SetState { channel: 3, on: false });
        let (seq, outputs) = coord.send(dst, &set, true, now).unwrap();
        let outputs = pump(&mut coord, &mut nodes, outputs, now);

        assert!(outputs.contains(&Output::Acked { dst, seq }));
        assert_eq!(coord.pending_acks(), 0);
        assert!(coord.poll(now + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn test_send_fails_fast() {
        let mut coord = coordinator();
        let set = Message::SetState(SetState { channel: 1, on: true });
        assert_eq!(
            coord.send(LogicalAddress(0x40), &set, true, Instant::now()).unwrap_err(),
            Error::UnknownDestination(LogicalAddress(0x40))
        );

        let (_, outputs) = coord.send(LogicalAddress::BROADCAST, &set, true, Instant::now()).unwrap();
        match &outputs[0] {
            Output::Transmit { target, frame } => {
                assert_eq!(*target, LinkTarget::Broadcast);
                assert!(!frame::decode(frame).unwrap().0.flags.need_ack());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(coord.pending_acks(), 0);
    }

    #[test]
    fn test_malformed_input_is_dropped() {
        let mut coord = coordinator();
        let now = Instant::now();

        assert_eq!(
            coord.ingest(A, &[0xA5; 8], now),
            vec![Output::Dropped(Error::TruncatedFrame(8))]
        );

        let mut header = FrameHeader::direct(LogicalAddress(0x40), LogicalAddress::COORDINATOR, 0x32, 1);
        header.flags = FrameFlags::NEED_ACK;
        let short_scale = frame::encode(&header, &[0; 4]).unwrap();
        let outputs = coord.ingest(A, &short_scale, now);
        assert_eq!(outputs.len(), 1);
        assert!(matches!(outputs[0], Output::Dropped(Error::MalformedPayload { .. })));
    }

    #[test]
    fn test_unknown_type_is_not_acked() {
        let mut coord = coordinator();
        let src = LogicalAddress(0x40);
        enrolled(&mut coord, A, src);
        let now = Instant::now();

        let mut header = FrameHeader::direct(src, LogicalAddress::COORDINATOR, 0x7E, 9);
        header.flags = FrameFlags::NEED_ACK;
        let unknown = frame::encode(&header, &[1, 2, 3]).unwrap();
        assert_eq!(
            coord.ingest(A, &unknown, now),
            vec![Output::Dropped(Error::UnknownMessageType(0x7E))]
        );

        // a valid retransmission reusing the sequence is still fresh
        let reading = Message::Sensor(Sensor { sensor_id: 2, value: 1.5 });
        let retry = node_frame(src, 9, FrameFlags::NEED_ACK.with(FrameFlags::RETRANSMITTED), &reading);
        let outputs = coord.ingest(A, &retry, now);
        assert!(outputs.iter().any(|o| matches!(o, Output::Deliver(d) if d.seq == 9)));
    }

    #[test]
    fn test_spoofed_discovery_is_rejected() {
        let mut coord = coordinator();
        let response = Message::DiscoveryResponse(crate::protocol::message::DiscoveryResponse {
            identity: B,
            device_type: DeviceType::Boiler,
            hw_revision: 1,
            firmware: FirmwareVersion { major: 1, minor: 0 },
            address: LogicalAddress::UNASSIGNED,
        });
        let outputs = coord.ingest(
            A,
            &node_frame(LogicalAddress::UNASSIGNED, 1, FrameFlags::empty(), &response),
            Instant::now(),
        );
        assert!(matches!(outputs[0], Output::Dropped(Error::IdentityMismatch { .. })));
        assert!(coord.devices().is_empty());
    }

    #[test]
    fn test_reboot_releases_and_cancels() {
        let mut coord = coordinator();
        let dst = LogicalAddress(0x40);
        enrolled(&mut coord, A, dst);
        let now = Instant::now();

        let scale = Message::Scale(Scale { timestamp_ms: 0, weight_mg: 0, flow_mg_s: 0, status: 1 });
        // telemetry types are legal to send, the node simply ignores them
        let (pending, _) = coord.send(dst, &scale, true, now).unwrap();

        let (_, outputs) = coord.send(dst, &Message::Reboot(Reboot { delay_ms: 0 }), false, now).unwrap();
        assert!(outputs.contains(&Output::DeliveryFailed {
            dst,
            seq: pending,
            msg_type: 0x32,
            reason: Error::Cancelled,
        }));
        assert!(outputs.contains(&Output::Released { identity: A, address: dst }));
        assert_eq!(coord.address_of(&A), None);
    }

    #[test]
    fn test_acked_reboot_resolves() {
        let mut coord = coordinator();
        let mut nodes = vec![session(A)];
        let now = Instant::now();
        let start = coord.discover(now);
        pump(&mut coord, &mut nodes, start, now);
        let dst = nodes[0].address();

        let set = Message::SetState(SetState { channel: 1, on: true });
        let (pending, _) = coord.send(dst, &set, true, now).unwrap();

        let reboot = Message::Reboot(Reboot { delay_ms: 0 });
        let (seq, outputs) = coord.send(dst, &reboot, true, now).unwrap();
        assert!(outputs.contains(&Output::DeliveryFailed {
            dst,
            seq: pending,
            msg_type: 0x10,
            reason: Error::Cancelled,
        }));
        assert!(!outputs
            .iter()
            .any(|o| matches!(o, Output::DeliveryFailed { seq: s, .. } if *s == seq)));
        assert_eq!(coord.pending_acks(), 1);

        // only deliver the reboot frame itself, the node acks from its old address
        let outputs = pump(&mut coord, &mut nodes, outputs[..1].to_vec(), now);
        assert!(outputs.contains(&Output::Acked { dst, seq }));
        assert_eq!(coord.pending_acks(), 0);
        assert!(!nodes[0].is_assigned());
    }

    #[test]
    fn test_reboot_retries_reach_released_device() {
        let config = EngineConfig {
            ack_timeout: Duration::from_millis(100),
            max_retries: 1,
            ..EngineConfig::default()
        };
        let mut coord = Coordinator::with_seed(config, 50).unwrap();
        let dst = LogicalAddress(0x40);
        enrolled(&mut coord, A, dst);
        let now = Instant::now();

        let (seq, _) = coord.send(dst, &Message::Reboot(Reboot { delay_ms: 0 }), true, now).unwrap();
        let outputs = coord.poll(now + Duration::from_millis(100));
        assert!(outputs.iter().any(|o| matches!(
            o,
            Output::Transmit { target: LinkTarget::Device(id), .. } if *id == A
        )));
        let outputs = coord.poll(now + Duration::from_millis(200));
        assert!(outputs.iter().any(|o| matches!(
            o,
            Output::DeliveryFailed { seq: s, reason: Error::DeliveryFailed { .. }, .. } if *s == seq
        )));
    }

    #[test]
    fn test_shutdown_cancels_everything() {
        let mut coord = coordinator();
        enrolled(&mut coord, A, LogicalAddress(0x40));
        enrolled(&mut coord, B, LogicalAddress(0x41));
        let now = Instant::now();
        let set = Message::SetState(SetState { channel: 1, on: true });
        coord.send(LogicalAddress(0x40), &set, true, now).unwrap();
        coord.send(LogicalAddress(0x41), &set, true, now).unwrap();

        let outputs = coord.shutdown();
        assert_eq!(outputs.len(), 2);
        assert!(outputs
            .iter()
            .all(|o| matches!(o, Output::DeliveryFailed { reason: Error::Cancelled, .. })));
        assert!(coord.poll(now + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_reset_forgets_device() {
        let mut coord = coordinator();
        enrolled(&mut coord, A, LogicalAddress(0x40));
        let now = Instant::now();
        let set = Message::SetState(SetState { channel: 1, on: true });
        coord.send(LogicalAddress(0x40), &set, true, now).unwrap();

        let outputs = coord.reset(A);
        assert_eq!(outputs.len(), 1);
        assert!(coord.devices().is_empty());
        assert_eq!(coord.identity_of(LogicalAddress(0x40)), None);
    }

    #[test]
    fn test_independent_instances() {
        let mut first = coordinator();
        let second = coordinator();
        enrolled(&mut first, A, LogicalAddress(0x40));
        assert!(second.devices().is_empty());
    }
}
