use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::{LogicalAddress, PhysicalId};
use crate::protocol::frame::mark_retransmitted;

/// Frames awaiting acknowledgement, keyed by destination and sequence
#[derive(Debug)]
struct Pending {
    /// Radio the frame was unicast to
    link: PhysicalId,
    frame: Bytes,
    msg_type: u8,
    attempts: u32,
    deadline: Instant,
}

/// What the retry timer decided for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Send this copy (RETRANSMITTED set, same sequence number)
    Resend {
        dst: LogicalAddress,
        seq: u16,
        link: PhysicalId,
        frame: Bytes,
    },
    /// Out of retries
    GiveUp {
        dst: LogicalAddress,
        seq: u16,
        msg_type: u8,
        attempts: u32,
    },
}

/// Sender-side acknowledgement tracking with bounded retries
#[derive(Debug)]
pub struct PendingAcks {
    pending: HashMap<(LogicalAddress, u16), Pending>,
    timeout: Duration,
    max_retries: u32,
}

impl PendingAcks {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        PendingAcks {
            pending: HashMap::new(),
            timeout,
            max_retries,
        }
    }

    /// Starts tracking a frame that has just been unicast to `link` for the
    /// first time. Retransmissions go to the same radio even if `dst` is
    /// released in the meantime.
    pub fn track(
        &mut self,
        dst: LogicalAddress,
        seq: u16,
        msg_type: u8,
        link: PhysicalId,
        frame: Bytes,
        now: Instant,
    ) {
        self.pending.insert(
            (dst, seq),
            Pending {
                link,
                frame,
                msg_type,
                attempts: 1,
                deadline: now + self.timeout,
            },
        );
    }

    /// Resolves a frame when its ack arrives. Returns false for acks that
    /// match nothing (late, duplicated or forged).
    pub fn acknowledge(&mut self, from: LogicalAddress, seq: u16) -> bool {
        match self.pending.remove(&(from, seq)) {
            Some(p) => {
                debug!(dst = %from, seq, attempts = p.attempts, "acknowledged");
                true
            }
            None => false,
        }
    }

    /// Walks expired deadlines
    pub fn poll(&mut self, now: Instant) -> Vec<RetryAction> {
        let mut actions = Vec::new();
        let mut exhausted = Vec::new();

        for (&(dst, seq), p) in self.pending.iter_mut() {
            if now < p.deadline {
                continue;
            }
            if p.attempts > self.max_retries {
                exhausted.push((dst, seq));
                continue;
            }
            p.attempts += 1;
            p.deadline = now + self.timeout;
            p.frame = mark_retransmitted(&p.frame);
            debug!(dst = %dst, seq, attempt = p.attempts, "retransmitting");
            actions.push(RetryAction::Resend {
                dst,
                seq,
                link: p.link,
                frame: p.frame.clone(),
            });
        }

        for key in exhausted {
            if let Some(p) = self.pending.remove(&key) {
                warn!(dst = %key.0, seq = key.1, attempts = p.attempts, "delivery failed");
                actions.push(RetryAction::GiveUp {
                    dst: key.0,
                    seq: key.1,
                    msg_type: p.msg_type,
                    attempts: p.attempts,
                });
            }
        }
        actions
    }

    /// Stops tracking everything addressed to `dst`; returns (seq, msg_type)
    /// of each dropped frame
    pub fn cancel(&mut self, dst: LogicalAddress) -> Vec<(u16, u8)> {
        let keys: Vec<_> = self.pending.keys().filter(|(d, _)| *d == dst).copied().collect();
        keys.into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|p| (key.1, p.msg_type)))
            .collect()
    }

    /// Stops tracking everything; returns (dst, seq, msg_type) of each dropped frame
    pub fn cancel_all(&mut self) -> Vec<(LogicalAddress, u16, u8)> {
        self.pending
            .drain()
            .map(|((dst, seq), p)| (dst, seq, p.msg_type))
            .collect()
    }

    /// Earliest retry deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
