//! The in-memory queue of serialized log entries.
//!
//! Entries only leave the queue in two ways: an explicit `clear`, or an
//! acknowledgement of a delivered [`Snapshot`]. A failed delivery never
//! removes anything, so entries are retried on the next flush.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, warn};

/// A point-in-time copy of the queue, sent as one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<String>,
    /// Sequence number of the newest entry captured, if any.
    last_seq: Option<u64>,
}

impl Snapshot {
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newline-delimited JSON body for the batch.
    pub fn body(&self) -> String {
        self.entries.join("\n")
    }
}

/// Statistics about queue operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Total number of entries appended
    pub entries_received: u64,

    /// Total number of entries removed by acknowledged deliveries
    pub entries_delivered: u64,

    /// Total number of entries dropped because the queue was full
    pub entries_dropped: u64,

    /// Total number of entries discarded by `clear`
    pub entries_cleared: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<(u64, String)>,
    next_seq: u64,
    stats: QueueStats,
}

/// Ordered, thread-safe queue of serialized entries.
///
/// Every entry carries a sequence number so that acknowledging a snapshot
/// removes exactly the entries it captured, even when more were appended
/// while the batch was in flight.
#[derive(Debug, Default)]
pub struct LogQueue {
    state: Mutex<QueueState>,
    /// Maximum number of entries held; `None` means unbounded.
    max_entries: Option<usize>,
}

impl LogQueue {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that drops its oldest entries beyond `max_entries`.
    pub fn bounded(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_entries: Some(max_entries.max(1)),
        }
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        // Every mutation below leaves the state consistent, so a poisoned
        // lock is safe to keep using.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append entries in order.
    pub fn append<I>(&self, entries: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.state();

        for entry in entries {
            if let Some(max) = self.max_entries {
                if state.entries.len() >= max {
                    // Drop 10% to avoid dropping on every append
                    let drop_count = (state.entries.len() / 10).max(1);
                    warn!(
                        queue_size = state.entries.len(),
                        drop_count = drop_count,
                        max_entries = max,
                        "Queue full: dropping oldest entries"
                    );
                    state.entries.drain(0..drop_count);
                    state.stats.entries_dropped += drop_count as u64;
                }
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.push_back((seq, entry));
            state.stats.entries_received += 1;
        }
    }

    /// Copy the current contents without removing anything.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state();
        Snapshot {
            entries: state.entries.iter().map(|(_, e)| e.clone()).collect(),
            last_seq: state.entries.back().map(|(seq, _)| *seq),
        }
    }

    /// Remove the entries captured by a delivered snapshot.
    ///
    /// Returns the number of entries removed. Entries appended after the
    /// snapshot was taken are kept.
    pub fn acknowledge(&self, snapshot: &Snapshot) -> usize {
        let Some(last_seq) = snapshot.last_seq else {
            return 0;
        };
        let mut state = self.state();

        let delivered = state
            .entries
            .iter()
            .take_while(|(seq, _)| *seq <= last_seq)
            .count();
        state.entries.drain(0..delivered);
        state.stats.entries_delivered += delivered as u64;

        debug!(
            delivered = delivered,
            remaining = state.entries.len(),
            "Acknowledged delivered entries"
        );
        delivered
    }

    /// Discard everything currently queued.
    pub fn clear(&self) {
        let mut state = self.state();
        let cleared = state.entries.len() as u64;
        state.entries.clear();
        state.stats.entries_cleared += cleared;
    }

    /// The queued entries, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.snapshot().entries
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get current queue statistics.
    pub fn stats(&self) -> QueueStats {
        self.state().stats.clone()
    }
}
