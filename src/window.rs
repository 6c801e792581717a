//! Send-side sliding window.
//!
//! [`SendWindow`] holds every segment that has been transmitted but not yet
//! covered by a cumulative ACK, in sequence order.  Flow control is counted
//! in payload bytes: a new segment may go out only while
//! `outstanding + len <= peer_window`.
//!
//! ```text
//!  send_una            next_seq
//!      │                  │
//!  ────┼──────────────────┼──────────────────▶ seq space
//!      │ <── in flight ──▶│ <── sendable ───▶
//! ```
//!
//! This module only manages state; all channel I/O belongs to
//! [`crate::connection`].

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::packet::Packet;
use crate::seq::{seq_le, seq_lt};

/// A single in-flight segment.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub packet: Packet,
    /// Number of times this segment has been transmitted (1 = first send).
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
}

/// Result of applying one cumulative ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AckOutcome {
    /// Segments removed from the window.
    pub segments: usize,
    /// Payload bytes those segments carried.
    pub bytes: usize,
    /// Round trip of the newest retired segment, if it was sent only once.
    pub rtt_sample: Option<std::time::Duration>,
}

impl AckOutcome {
    pub fn advanced(&self) -> bool {
        self.segments > 0
    }
}

#[derive(Debug)]
pub struct SendWindow {
    /// Oldest unacknowledged sequence number; equals the highest cumulative
    /// ACK accepted so far.
    send_una: u32,
    /// Sequence number for the next new segment.
    next_seq: u32,
    /// Payload bytes currently in flight.
    outstanding: usize,
    queue: VecDeque<InFlight>,
}

impl SendWindow {
    /// `seq_start` is the first sequence number after the SYN.
    pub fn new(seq_start: u32) -> Self {
        Self {
            send_una: seq_start,
            next_seq: seq_start,
            outstanding: 0,
            queue: VecDeque::new(),
        }
    }

    pub fn send_una(&self) -> u32 {
        self.send_una
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Payload bytes sent but not yet acknowledged.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    pub fn has_unacked(&self) -> bool {
        !self.queue.is_empty()
    }

    /// `true` when `len` more payload bytes fit inside `peer_window`.
    pub fn fits(&self, len: usize, peer_window: u16) -> bool {
        self.outstanding + len <= usize::from(peer_window)
    }

    /// Place a just-transmitted segment into the window and advance
    /// `next_seq` past it.
    pub fn record_sent(&mut self, packet: Packet) {
        debug_assert_eq!(packet.header.seq, self.next_seq, "segment out of order");
        self.next_seq = packet.seq_end();
        self.outstanding += packet.payload.len();
        self.queue.push_back(InFlight {
            packet,
            tx_count: 1,
            sent_at: Instant::now(),
        });
    }

    /// Process a cumulative ACK.
    ///
    /// Retires every segment whose data ends at or before `ack_num` and
    /// advances `send_una`.  ACKs at or behind `send_una` (duplicates, stale
    /// reorderings) and ACKs beyond `next_seq` (for data never sent) change
    /// nothing.
    pub fn on_ack(&mut self, ack_num: u32) -> AckOutcome {
        let mut outcome = AckOutcome::default();
        if !seq_lt(self.send_una, ack_num) || !seq_le(ack_num, self.next_seq) {
            return outcome;
        }

        let now = Instant::now();
        while let Some(front) = self.queue.front() {
            if !seq_le(front.packet.seq_end(), ack_num) {
                break;
            }
            let Some(entry) = self.queue.pop_front() else {
                break;
            };
            self.send_una = entry.packet.seq_end();
            self.outstanding -= entry.packet.payload.len();
            outcome.segments += 1;
            outcome.bytes += entry.packet.payload.len();
            // Karn: a retransmitted segment gives an ambiguous sample.
            outcome.rtt_sample = (entry.tx_count == 1).then(|| now - entry.sent_at);
        }
        outcome
    }

    /// All in-flight segments, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &InFlight> {
        self.queue.iter()
    }

    /// Bump the transmission count of the first `count` segments.
    ///
    /// Call right after retransmitting them.
    pub fn on_retransmit(&mut self, count: usize) {
        let now = Instant::now();
        for entry in self.queue.iter_mut().take(count) {
            entry.tx_count += 1;
            entry.sent_at = now;
        }
    }
}
