//! Error taxonomy for the sender.
//!
//! Transient loss never shows up here: it is absorbed by retransmission
//! until the retry ceiling turns it into [`StcpError::MaxRetriesExceeded`].
//! Corrupt inbound segments are dropped silently and never become errors.

use std::io;

use thiserror::Error;

use crate::packet::PacketError;
use crate::state::ConnectionState;

#[derive(Debug, Error)]
pub enum StcpError {
    /// The datagram channel could not be acquired.
    #[error("could not open datagram channel: {0}")]
    Open(#[source] io::Error),

    #[error("no SYN-ACK within the initial timeout")]
    HandshakeTimeout,

    /// The handshake response was unflagged, mis-acked or corrupt.
    #[error("invalid handshake response: {0}")]
    InvalidHandshake(String),

    /// An outgoing segment could not be built.
    #[error("segment error: {0}")]
    Packet(#[from] PacketError),

    /// The channel failed while sending or receiving.
    #[error("channel error: {0}")]
    Channel(#[from] io::Error),

    #[error("gave up after {retries} retransmissions")]
    MaxRetriesExceeded { retries: u32 },

    #[error("connection reset by peer")]
    Reset,

    #[error("FIN was never acknowledged")]
    FinNotAcked,

    /// Operation invoked in a state that does not permit it.
    #[error("operation not permitted in state {0}")]
    BadState(ConnectionState),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, StcpError>;
