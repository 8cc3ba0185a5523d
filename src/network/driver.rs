//! Async driver for the coordinator engine.
//!
//! A single task owns the [`Coordinator`] and selects over inbound radio
//! traffic, caller commands, the retry tick and the discovery timer. All
//! state changes happen on that task, so ingestion for any one source is
//! strictly ordered.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{Error, LogicalAddress, PhysicalId, Result};
use crate::protocol::Message;

use super::coordinator::{Coordinator, Delivery, LinkTarget, Output};
use super::enrollment::DeviceRecord;

const COMMAND_QUEUE: usize = 64;
const DELIVERY_QUEUE: usize = 256;

/// Bytes received by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub link: PhysicalId,
    pub data: Bytes,
}

/// Bytes for the radio to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub target: LinkTarget,
    pub frame: Bytes,
}

/// Engine side of the transport
#[derive(Debug)]
pub struct Link {
    pub inbound: mpsc::Receiver<Inbound>,
    pub outbound: mpsc::Sender<Outbound>,
}

/// Radio side of the transport
#[derive(Debug)]
pub struct LinkPeer {
    pub inbound: mpsc::Sender<Inbound>,
    pub outbound: mpsc::Receiver<Outbound>,
}

impl Link {
    /// Creates a connected pair of channel endpoints
    pub fn channel(capacity: usize) -> (Link, LinkPeer) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        (
            Link {
                inbound: in_rx,
                outbound: out_tx,
            },
            LinkPeer {
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }
}

/// Successful outcome of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub dst: LogicalAddress,
    pub seq: u16,
    /// False when no ack was requested
    pub acked: bool,
}

enum Command {
    Send {
        dst: LogicalAddress,
        message: Message,
        need_ack: bool,
        reply: oneshot::Sender<Result<DeliveryReport>>,
    },
    Discover {
        only_unassigned: bool,
    },
    Assign {
        identity: PhysicalId,
        address: LogicalAddress,
        reply: oneshot::Sender<Result<()>>,
    },
    Devices(oneshot::Sender<Vec<DeviceRecord>>),
    AddressOf(PhysicalId, oneshot::Sender<Option<LogicalAddress>>),
    Reset(PhysicalId, oneshot::Sender<()>),
}

/// Cloneable handle to a running coordinator task
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl CoordinatorHandle {
    /// Sends with NEED_ACK and waits for the ack, the retry limit or shutdown
    pub async fn send(&self, dst: LogicalAddress, message: Message) -> Result<DeliveryReport> {
        self.request(|reply| Command::Send {
            dst,
            message,
            need_ack: true,
            reply,
        })
        .await?
    }

    /// Sends without requesting an ack; resolves once queued on the link
    pub async fn send_unacked(&self, dst: LogicalAddress, message: Message) -> Result<DeliveryReport> {
        self.request(|reply| Command::Send {
            dst,
            message,
            need_ack: false,
            reply,
        })
        .await?
    }

    /// Broadcasts a discovery request now
    pub async fn discover(&self, only_unassigned: bool) -> Result<()> {
        self.commands
            .send(Command::Discover { only_unassigned })
            .await
            .map_err(|_| Error::Cancelled)
    }

    /// Moves a device to a chosen address
    pub async fn assign(&self, identity: PhysicalId, address: LogicalAddress) -> Result<()> {
        self.request(|reply| Command::Assign {
            identity,
            address,
            reply,
        })
        .await?
    }

    pub async fn devices(&self) -> Result<Vec<DeviceRecord>> {
        self.request(Command::Devices).await
    }

    pub async fn address_of(&self, identity: PhysicalId) -> Result<Option<LogicalAddress>> {
        self.request(|reply| Command::AddressOf(identity, reply)).await
    }

    /// Forgets a device; its pending sends fail with `Cancelled`
    pub async fn reset(&self, identity: PhysicalId) -> Result<()> {
        self.request(|reply| Command::Reset(identity, reply)).await
    }

    /// Stops the task. Outstanding sends resolve with `Cancelled`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.commands.is_closed()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| Error::Cancelled)?;
        rx.await.map_err(|_| Error::Cancelled)
    }
}

/// Runs `coordinator` on a new task.
///
/// Returns the command handle, the stream of application deliveries and the
/// task handle, which yields an error only if the link's outbound side closed.
pub fn spawn(
    coordinator: Coordinator,
    link: Link,
) -> (CoordinatorHandle, mpsc::Receiver<Delivery>, JoinHandle<Result<()>>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_QUEUE);
    let cancel = CancellationToken::new();

    let driver = Driver {
        coordinator,
        link,
        commands: command_rx,
        deliveries: delivery_tx,
        waiters: HashMap::new(),
        cancel: cancel.clone(),
    };
    let task = tokio::spawn(driver.run());

    (
        CoordinatorHandle {
            commands: command_tx,
            cancel,
        },
        delivery_rx,
        task,
    )
}

struct Driver {
    coordinator: Coordinator,
    link: Link,
    commands: mpsc::Receiver<Command>,
    deliveries: mpsc::Sender<Delivery>,
    /// Callers waiting on an ack, keyed by (dst, seq)
    waiters: HashMap<(LogicalAddress, u16), oneshot::Sender<Result<DeliveryReport>>>,
    cancel: CancellationToken,
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

impl Driver {
    async fn run(mut self) -> Result<()> {
        let mut tick = interval(self.coordinator.config().tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut discovery = interval(self.coordinator.config().discovery_interval);
        discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),

                inbound = self.link.inbound.recv() => match inbound {
                    Some(Inbound { link, data }) => {
                        let outputs = self.coordinator.ingest(link, &data, now());
                        if let Err(e) = self.dispatch(outputs).await {
                            break Err(e);
                        }
                    }
                    None => {
                        info!("inbound link closed");
                        break Ok(());
                    }
                },

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Err(e) = self.handle_command(command).await {
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                },

                _ = tick.tick() => {
                    let outputs = self.coordinator.poll(now());
                    if let Err(e) = self.dispatch(outputs).await {
                        break Err(e);
                    }
                }

                _ = discovery.tick() => {
                    let outputs = self.coordinator.discover(now());
                    if let Err(e) = self.dispatch(outputs).await {
                        break Err(e);
                    }
                }
            }
        };

        let outputs = self.coordinator.shutdown();
        if let Err(e) = self.dispatch(outputs).await {
            warn!(error = %e, "error while draining on shutdown");
        }
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(Error::Cancelled));
        }
        info!("coordinator stopped");
        result
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Send {
                dst,
                message,
                need_ack,
                reply,
            } => match self.coordinator.send(dst, &message, need_ack, now()) {
                Ok((seq, outputs)) => {
                    if need_ack && dst != LogicalAddress::BROADCAST {
                        self.waiters.insert((dst, seq), reply);
                    } else {
                        let _ = reply.send(Ok(DeliveryReport {
                            dst,
                            seq,
                            acked: false,
                        }));
                    }
                    self.dispatch(outputs).await?;
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Discover { only_unassigned } => {
                let outputs = if only_unassigned {
                    self.coordinator.discover_unassigned(now())
                } else {
                    self.coordinator.discover(now())
                };
                self.dispatch(outputs).await?;
            }
            Command::Assign {
                identity,
                address,
                reply,
            } => match self.coordinator.assign_address(identity, address, now()) {
                Ok(outputs) => {
                    let _ = reply.send(Ok(()));
                    self.dispatch(outputs).await?;
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Devices(reply) => {
                let _ = reply.send(self.coordinator.devices());
            }
            Command::AddressOf(identity, reply) => {
                let _ = reply.send(self.coordinator.address_of(&identity));
            }
            Command::Reset(identity, reply) => {
                let outputs = self.coordinator.reset(identity);
                self.dispatch(outputs).await?;
                let _ = reply.send(());
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, outputs: Vec<Output>) -> Result<()> {
        for output in outputs {
            match output {
                Output::Transmit { target, frame } => {
                    self.link
                        .outbound
                        .send(Outbound { target, frame })
                        .await
                        .map_err(|_| Error::network("outbound link closed"))?;
                }
                Output::Deliver(delivery) => {
                    // a full queue holds up ingestion until the application
                    // catches up or the task is cancelled
                    tokio::select! {
                        sent = self.deliveries.send(delivery) => {
                            if sent.is_err() {
                                debug!("delivery receiver dropped");
                            }
                        }
                        _ = self.cancel.cancelled() => {
                            debug!("cancelled while waiting on the delivery queue");
                        }
                    }
                }
                Output::Acked { dst, seq } => {
                    if let Some(waiter) = self.waiters.remove(&(dst, seq)) {
                        let _ = waiter.send(Ok(DeliveryReport {
                            dst,
                            seq,
                            acked: true,
                        }));
                    }
                }
                Output::DeliveryFailed { dst, seq, reason, .. } => {
                    if let Some(waiter) = self.waiters.remove(&(dst, seq)) {
                        let _ = waiter.send(Err(reason));
                    }
                }
                Output::Enrolled { .. } | Output::Released { .. } => {}
                Output::Dropped(e) => debug!(error = %e, "input dropped"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    use crate::core::{DeviceType, EngineConfig, FirmwareVersion};
    use crate::network::node::{NodeOutput, NodeSession};
    use crate::protocol::frame::{self, FrameHeader};
    use crate::protocol::message::{DiscoveryResponse, Reboot, Sensor, SetState};
    use crate::protocol::payload;

    const HUB: PhysicalId = PhysicalId([0; 6]);
    const A: PhysicalId = PhysicalId([0xA0, 0, 0, 0, 0, 1]);

    fn config() -> EngineConfig {
        EngineConfig {
            ack_timeout: Duration::from_millis(100),
            max_retries: 2,
            ..EngineConfig::default()
        }
    }

    /// Answers the coordinator the way firmware would
    fn simulate(mut node: NodeSession, mut peer: LinkPeer) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(Outbound { target, frame }) = peer.outbound.recv().await {
                let hit = match target {
                    LinkTarget::Broadcast => true,
                    LinkTarget::Device(id) => id == node.identity(),
                };
                if !hit {
                    continue;
                }
                for output in node.handle(HUB, &frame, now()) {
                    if let NodeOutput::Transmit(data) = output {
                        let inbound = Inbound { link: node.identity(), data };
                        if peer.inbound.send(inbound).await.is_err() {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Coordinator that already knows A at 0x40
    fn primed(config: EngineConfig) -> Coordinator {
        let mut coordinator = Coordinator::with_seed(config, 10).unwrap();
        let response = payload::encode(&Message::DiscoveryResponse(DiscoveryResponse {
            identity: A,
            device_type: DeviceType::Valve,
            hw_revision: 1,
            firmware: FirmwareVersion { major: 0, minor: 9 },
            address: LogicalAddress(0x40),
        }))
        .unwrap();
        let header = FrameHeader::direct(LogicalAddress(0x40), LogicalAddress::COORDINATOR, 0x05, 1);
        coordinator.ingest(A, &frame::encode(&header, &response).unwrap(), now());
        coordinator
    }

    async fn wait_for_address(handle: &CoordinatorHandle, identity: PhysicalId) -> LogicalAddress {
        for _ in 0..100 {
            if let Some(address) = handle.address_of(identity).await.unwrap() {
                return address;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never enrolled", identity);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrolls_and_delivers() {
        let (link, peer) = Link::channel(16);
        let inject = peer.inbound.clone();
        let coordinator = Coordinator::with_seed(config(), 1).unwrap();
        let (handle, mut deliveries, task) = spawn(coordinator, link);
        let node = NodeSession::new(A, DeviceType::Scale, 2, FirmwareVersion { major: 1, minor: 0 });
        let _sim = simulate(node, peer);

        // the discovery timer fires immediately on start
        let address = wait_for_address(&handle, A).await;
        assert!(address.is_dynamic());

        let report = assert_ok!(handle.send(address, Message::SetState(SetState { channel: 1, on: true })).await);
        assert!(report.acked);
        assert_eq!(report.dst, address);

        let reading = Message::Sensor(Sensor { sensor_id: 4, value: 9.0 });
        let header = FrameHeader::direct(address, LogicalAddress::COORDINATOR, 0x30, 77);
        let data = frame::encode(&header, &payload::encode(&reading).unwrap()).unwrap();
        inject.send(Inbound { link: A, data }).await.unwrap();

        let delivery = deliveries.recv().await.unwrap();
        assert_eq!(delivery.identity, A);
        assert_eq!(delivery.src, address);
        assert_eq!(delivery.message, reading);

        handle.shutdown();
        assert_ok!(task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_node_fails_after_retries() {
        let (link, mut peer) = Link::channel(16);
        let (handle, _deliveries, _task) = spawn(primed(config()), link);

        let err = assert_err!(handle.send(LogicalAddress(0x40), Message::Ping).await);
        let seq = match err {
            Error::DeliveryFailed { dst, seq, attempts } => {
                assert_eq!(dst, LogicalAddress(0x40));
                assert_eq!(attempts, 3);
                seq
            }
            other => panic!("unexpected {:?}", other),
        };

        let mut copies = Vec::new();
        while let Ok(Outbound { frame, .. }) = peer.outbound.try_recv() {
            let (header, _) = frame::decode(&frame).unwrap();
            if header.msg_type == 0x01 {
                copies.push((header.seq, header.flags));
            }
        }
        assert_eq!(copies.len(), 3);
        assert!(copies.iter().all(|(s, _)| *s == seq));
        assert!(copies[0].1.need_ack() && !copies[0].1.retransmitted());
        assert!(copies[1..].iter().all(|(_, f)| f.retransmitted() && f.need_ack()));
        drop(handle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_sends() {
        let (link, _peer) = Link::channel(16);
        let mut config = config();
        config.ack_timeout = Duration::from_secs(10);
        let coordinator = primed(config);
        let (handle, _deliveries, task) = spawn(coordinator, link);

        let sender = handle.clone();
        let pending = tokio::spawn(async move { sender.send(LogicalAddress(0x40), Message::Ping).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.shutdown();
        assert_eq!(pending.await.unwrap(), Err(Error::Cancelled));
        assert_ok!(task.await.unwrap());
        assert!(handle.is_closed());
        assert_eq!(handle.devices().await, Err(Error::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_destination_fails_fast() {
        let (link, _peer) = Link::channel(16);
        let (handle, _deliveries, _task) = spawn(Coordinator::with_seed(config(), 1).unwrap(), link);

        let err = assert_err!(handle.send(LogicalAddress(0x77), Message::Ping).await);
        assert_eq!(err, Error::UnknownDestination(LogicalAddress(0x77)));

        let report = assert_ok!(handle.send_unacked(LogicalAddress::BROADCAST, Message::Ping).await);
        assert!(!report.acked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_and_forgets() {
        let (link, _peer) = Link::channel(16);
        let (handle, _deliveries, _task) = spawn(primed(config()), link);

        let sender = handle.clone();
        let pending = tokio::spawn(async move { sender.send(LogicalAddress(0x40), Message::Ping).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_ok!(handle.reset(A).await);
        assert_eq!(pending.await.unwrap(), Err(Error::Cancelled));
        assert!(handle.devices().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliveries_wait_for_slow_reader() {
        let (link, mut peer) = Link::channel(16);
        let inject = peer.inbound.clone();
        let (handle, mut deliveries, _task) = spawn(Coordinator::with_seed(config(), 1).unwrap(), link);
        let _drain = tokio::spawn(async move { while peer.outbound.recv().await.is_some() {} });

        let total = DELIVERY_QUEUE as u16 + 40;
        let _feeder = tokio::spawn(async move {
            for seq in 0..total {
                let reading = Message::Sensor(Sensor { sensor_id: 1, value: f32::from(seq) });
                let header = FrameHeader::direct(LogicalAddress(0x40), LogicalAddress::COORDINATOR, 0x30, seq);
                let data = frame::encode(&header, &payload::encode(&reading).unwrap()).unwrap();
                if inject.send(Inbound { link: A, data }).await.is_err() {
                    return;
                }
            }
        });

        // let the queue fill before reading anything
        tokio::time::sleep(Duration::from_millis(50)).await;
        for expected in 0..total {
            let delivery = deliveries.recv().await.unwrap();
            assert_eq!(delivery.seq, expected);
        }
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_acked_reboot_resolves() {
        let (link, peer) = Link::channel(16);
        let (handle, _deliveries, _task) = spawn(Coordinator::with_seed(config(), 1).unwrap(), link);
        let node = NodeSession::new(A, DeviceType::Boiler, 1, FirmwareVersion { major: 1, minor: 0 });
        let _sim = simulate(node, peer);
        let address = wait_for_address(&handle, A).await;

        let report = assert_ok!(handle.send(address, Message::Reboot(Reboot { delay_ms: 0 })).await);
        assert!(report.acked);
        assert_eq!(report.dst, address);
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_senders() {
        let (link, peer) = Link::channel(64);
        let (handle, _deliveries, _task) = spawn(Coordinator::with_seed(config(), 1).unwrap(), link);
        let node = NodeSession::new(A, DeviceType::Pump, 1, FirmwareVersion { major: 1, minor: 0 });
        let _sim = simulate(node, peer);
        let address = wait_for_address(&handle, A).await;

        let sends = (0..4u8).map(|channel| {
            let handle = handle.clone();
            async move { handle.send(address, Message::SetState(SetState { channel, on: true })).await }
        });
        let reports = futures::future::join_all(sends).await;

        let mut seqs: Vec<u16> = reports.into_iter().map(|r| r.unwrap().seq).collect();
        seqs.sort();
        seqs.dedup();
        assert_eq!(seqs.len(), 4);
    }
}
