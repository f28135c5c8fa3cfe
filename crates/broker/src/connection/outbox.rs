// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection outbound queue with eviction and batch draining.
//!
//! Pure bookkeeping: no I/O and no timers. The owning connection decides when
//! to flush and hands batches to its writer task.

use std::collections::VecDeque;

use crate::config::ConnectionOptions;
use crate::protocol::encode_batch;

/// Queue thresholds for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxLimits {
    pub items_limit: usize,
    pub size_limit: usize,
    pub flush_size: usize,
    pub in_flight_limit: usize,
}

impl From<&ConnectionOptions> for OutboxLimits {
    fn from(opts: &ConnectionOptions) -> Self {
        Self {
            items_limit: opts.socket_queue_items_limit,
            size_limit: opts.socket_queue_size_limit,
            flush_size: opts.socket_queue_size_flush,
            in_flight_limit: opts.socket_send_in_progress_limit,
        }
    }
}

#[derive(Debug)]
struct Entry {
    text: String,
    evictable: bool,
}

/// A drained slice of the queue, encoded as one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub payload: String,
    pub count: usize,
    /// Sum of the serialized item sizes, as accounted by the queue.
    pub size: usize,
}

/// Point-in-time counters, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub queued: usize,
    pub size: usize,
    pub discarded: usize,
    pub in_flight: usize,
    pub in_flight_size: usize,
}

#[derive(Debug)]
pub struct Outbox {
    limits: OutboxLimits,
    entries: VecDeque<Entry>,
    size: usize,
    discarded: usize,
    in_flight: usize,
    in_flight_size: usize,
}

impl Outbox {
    pub fn new(limits: OutboxLimits) -> Self {
        Self {
            limits,
            entries: VecDeque::new(),
            size: 0,
            discarded: 0,
            in_flight: 0,
            in_flight_size: 0,
        }
    }

    /// Append a serialized response. Returns how many entries were evicted
    /// to bring the queue back under its limits.
    pub fn push(&mut self, text: String, evictable: bool) -> usize {
        self.size += text.len();
        self.entries.push_back(Entry { text, evictable });
        self.evict()
    }

    fn over_limits(&self) -> bool {
        self.size > self.limits.size_limit || self.entries.len() > self.limits.items_limit
    }

    // Oldest evictable entries go first; command replies are never dropped.
    fn evict(&mut self) -> usize {
        let mut evicted = 0;
        while self.over_limits() {
            let Some(pos) = self.entries.iter().position(|e| e.evictable) else {
                break;
            };
            if let Some(entry) = self.entries.remove(pos) {
                self.size -= entry.text.len();
                self.discarded += entry.text.len();
                evicted += 1;
            }
        }
        evicted
    }

    /// Whether a new command may be accepted from this client. Evicts what it
    /// can first; a queue still over its limits refuses more work.
    pub fn admits_command(&mut self) -> bool {
        self.evict();
        !self.over_limits()
    }

    pub fn needs_immediate_flush(&self) -> bool {
        self.size >= self.limits.flush_size
    }

    pub fn can_send(&self) -> bool {
        self.in_flight < self.limits.in_flight_limit
    }

    /// Drain up to one flush budget of entries into a batch and count it as
    /// in flight. `None` when the queue is empty.
    pub fn take_batch(&mut self) -> Option<Batch> {
        let mut items = Vec::new();
        let mut size = 0;
        while size < self.limits.flush_size {
            let Some(entry) = self.entries.pop_front() else {
                break;
            };
            self.size -= entry.text.len();
            size += entry.text.len();
            items.push(entry.text);
        }
        if items.is_empty() {
            return None;
        }
        self.in_flight += 1;
        self.in_flight_size += size;
        Some(Batch { payload: encode_batch(&items), count: items.len(), size })
    }

    /// Account for a finished send of a batch of `size` bytes.
    pub fn complete_send(&mut self, size: usize) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.in_flight_size = self.in_flight_size.saturating_sub(size);
        self.discarded = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> OutboxStats {
        OutboxStats {
            queued: self.entries.len(),
            size: self.size,
            discarded: self.discarded,
            in_flight: self.in_flight,
            in_flight_size: self.in_flight_size,
        }
    }

    /// Queued texts in send order.
    pub fn pending(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.text.clone()).collect()
    }
}

#[cfg(test)]
#[path = "outbox_tests.rs"]
mod tests;
