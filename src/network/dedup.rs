use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::core::{LogicalAddress, PhysicalId};
use crate::protocol::FrameFlags;

/// Frames are tracked per radio and logical source address. Unassigned
/// nodes all share the sentinel address, so the logical address alone
/// cannot tell them apart.
pub type SourceKey = (PhysicalId, LogicalAddress);

/// Outcome of checking a frame against the sequence table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Deliver the payload
    New,
    /// Already delivered; only the ack (if requested) goes out again
    Duplicate,
}

/// Sequence state of one source
#[derive(Debug, Clone)]
pub struct SequenceState {
    /// Last accepted sequence number
    pub last_seq: u16,
    /// Time of the last frame, accepted or duplicate
    pub last_seen: Instant,
    /// Recently accepted sequence numbers, oldest first
    recent: VecDeque<u16>,
}

impl SequenceState {
    fn new(seq: u16, now: Instant, window: usize) -> Self {
        let mut recent = VecDeque::with_capacity(window);
        recent.push_back(seq);
        SequenceState {
            last_seq: seq,
            last_seen: now,
            recent,
        }
    }

    fn seen(&self, seq: u16) -> bool {
        self.last_seq == seq || self.recent.contains(&seq)
    }

    fn accept(&mut self, seq: u16, now: Instant, window: usize) {
        self.last_seq = seq;
        self.last_seen = now;
        if self.recent.len() == window {
            self.recent.pop_front();
        }
        self.recent.push_back(seq);
    }
}

/// Per-source duplicate detection.
///
/// A frame is a duplicate only when it carries RETRANSMITTED and its
/// sequence number is one we accepted recently. Anything else is new,
/// including a reordered older number without the flag.
#[derive(Debug)]
pub struct SequenceTable {
    sources: HashMap<SourceKey, SequenceState>,
    window: usize,
    ttl: Duration,
}

impl SequenceTable {
    /// Creates a table remembering `window` numbers per source for `ttl`
    pub fn new(window: usize, ttl: Duration) -> Self {
        SequenceTable {
            sources: HashMap::new(),
            window: window.max(1),
            ttl,
        }
    }

    /// Classifies a frame and updates the source's state
    pub fn check(&mut self, key: SourceKey, seq: u16, flags: FrameFlags, now: Instant) -> Verdict {
        let stale = self
            .sources
            .get(&key)
            .map_or(false, |s| now.saturating_duration_since(s.last_seen) > self.ttl);
        if stale {
            debug!(src = %key.1, "sequence state expired");
            self.sources.remove(&key);
        }

        let window = self.window;
        match self.sources.get_mut(&key) {
            Some(state) if flags.retransmitted() && state.seen(seq) => {
                state.last_seen = now;
                Verdict::Duplicate
            }
            Some(state) => {
                state.accept(seq, now, window);
                Verdict::New
            }
            None => {
                self.sources.insert(key, SequenceState::new(seq, now, window));
                Verdict::New
            }
        }
    }

    /// State of a source, if any frame has been seen from it
    pub fn state(&self, key: &SourceKey) -> Option<&SequenceState> {
        self.sources.get(key)
    }

    /// Drops all state for a radio
    pub fn forget(&mut self, link: PhysicalId) {
        self.sources.retain(|(id, _), _| *id != link);
    }

    /// Drops sources idle for longer than the ttl
    pub fn expire(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.sources
            .retain(|_, s| now.saturating_duration_since(s.last_seen) <= ttl);
    }

    /// Number of tracked sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
