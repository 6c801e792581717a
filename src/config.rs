//! Tunable protocol parameters.
//!
//! A [`Config`] is passed to [`crate::connection::Connection::open`] and
//! stays fixed for the connection's lifetime.  The defaults reproduce the
//! classic STCP constants; the CLI maps its flags onto the same fields.

use std::time::Duration;

use crate::error::StcpError;
use crate::packet::{DEFAULT_MSS, MAX_MSS, MAX_WINDOW};

/// Initial retransmission timeout, also the bound on the SYN-ACK wait.
pub const INITIAL_RTO: Duration = Duration::from_millis(150);
/// Floor for the adaptive RTO.
pub const MIN_RTO: Duration = Duration::from_millis(50);
/// Ceiling for the RTO after backoff.
pub const MAX_RTO: Duration = Duration::from_secs(60);
/// Consecutive expiries tolerated before the transfer is declared dead.
pub const MAX_RETRIES: u32 = 6;

/// Which segments are resent when the retransmission timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetransmitPolicy {
    /// Resend every unacknowledged segment (Go-Back-N).
    #[default]
    GoBackN,
    /// Resend only the oldest unacknowledged segment.
    Oldest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Largest payload per segment.
    pub mss: usize,
    /// Window advertised in outgoing segments.
    pub advertised_window: u16,
    pub initial_rto: Duration,
    pub min_rto: Duration,
    pub max_rto: Duration,
    /// RTO multiplier applied on every expiry; `1` keeps it fixed.
    pub backoff: u32,
    /// Derive the RTO from measured round trips (RFC 6298).
    pub adaptive_rto: bool,
    /// Retry ceiling; exceeding it is a fatal transport error.
    pub max_retries: u32,
    pub retransmit: RetransmitPolicy,
    /// Report an unacknowledged FIN as a `close` failure.
    pub strict_close: bool,
    /// Fixed initial sequence number instead of a random one.
    pub isn: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mss: DEFAULT_MSS,
            advertised_window: MAX_WINDOW,
            initial_rto: INITIAL_RTO,
            min_rto: MIN_RTO,
            max_rto: MAX_RTO,
            backoff: 2,
            adaptive_rto: true,
            max_retries: MAX_RETRIES,
            retransmit: RetransmitPolicy::GoBackN,
            strict_close: true,
            isn: None,
        }
    }
}

impl Config {
    /// Reject parameter combinations the engine cannot run with.
    pub fn validate(&self) -> Result<(), StcpError> {
        if self.mss == 0 || self.mss > MAX_MSS {
            return Err(StcpError::InvalidConfig(format!(
                "mss must be in 1..={MAX_MSS}, got {}",
                self.mss
            )));
        }
        if self.backoff == 0 {
            return Err(StcpError::InvalidConfig("backoff multiplier must be >= 1".into()));
        }
        if self.min_rto > self.max_rto {
            return Err(StcpError::InvalidConfig(format!(
                "min_rto {:?} exceeds max_rto {:?}",
                self.min_rto, self.max_rto
            )));
        }
        if self.initial_rto.is_zero() {
            return Err(StcpError::InvalidConfig("initial_rto must be non-zero".into()));
        }
        Ok(())
    }
}
