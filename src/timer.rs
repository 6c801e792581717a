//! Retransmission timer.
//!
//! One [`RetransmitTimer`] per connection governs the oldest unacknowledged
//! segment.  It is a plain deadline: the connection asks how long it may wait
//! for input ([`RetransmitTimer::remaining`]) and treats a receive timeout as
//! expiry.  Only transmissions, acks that make progress and the start of a
//! zero-window wait move the deadline, so junk arriving on the channel cannot
//! postpone a retransmission or a window probe.
//!
//! RTO follows RFC 6298:
//!   `RTO = SRTT + 4 × RTTVAR`
//! clamped to `[min_rto, max_rto]`, and is multiplied by the backoff factor on
//! each consecutive expiry.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::Config;

#[derive(Debug)]
pub struct RetransmitTimer {
    initial_rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    backoff: u32,
    adaptive: bool,
    /// RTO in effect, including any backoff.
    current_rto: Duration,
    /// Smoothed RTT estimate (SRTT).
    srtt: Option<Duration>,
    /// RTT variance estimate (RTTVAR).
    rttvar: Option<Duration>,
    /// When the timer fires; `None` while disarmed.
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    pub fn new(config: &Config) -> Self {
        Self {
            initial_rto: config.initial_rto,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
            backoff: config.backoff,
            adaptive: config.adaptive_rto,
            current_rto: config.initial_rto,
            srtt: None,
            rttvar: None,
            deadline: None,
        }
    }

    /// RTO currently in effect.
    pub fn rto(&self) -> Duration {
        self.current_rto
    }

    fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// (Re)start the timer for one full RTO from now.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.current_rto);
    }

    /// Start the timer only if it is not already running.
    pub fn arm_if_idle(&mut self) {
        if !self.is_armed() {
            self.arm();
        }
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// How long the caller may block before the timer fires.
    ///
    /// The connection arms the timer before every wait that expects an
    /// answer; a disarmed timer only bounds a wait by one RTO.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => self.current_rto,
        }
    }

    /// Record a new RTT sample and update SRTT / RTTVAR / RTO (RFC 6298 §2).
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    ///
    /// Ignored in fixed-RTO mode.
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        if !self.adaptive {
            return;
        }
        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = Some(rttvar * 3 / 4 + diff / 4);
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
            _ => {
                self.srtt = Some(sample);
                self.rttvar = Some(sample / 2);
            }
        }
        log::trace!("[stcp] rtt sample {sample:?} srtt={:?}", self.srtt);
    }

    /// Multiply the RTO by the backoff factor (RFC 6298 §5.5), capped at
    /// `max_rto`.
    pub fn back_off(&mut self) {
        self.current_rto = self
            .current_rto
            .saturating_mul(self.backoff)
            .min(self.max_rto);
    }

    /// Drop any backoff and recompute the RTO from the current estimates.
    ///
    /// Falls back to `initial_rto` before the first RTT sample is available.
    pub fn reset(&mut self) {
        self.current_rto = match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => (srtt + rttvar * 4).clamp(self.min_rto, self.max_rto),
            _ => self.initial_rto,
        };
    }
}
