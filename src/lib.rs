//! `stcp`: the sender side of STCP, a simplified TCP-like reliable byte
//! stream over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────────────────────────────┐
//!  │            Connection              │  open / send / close
//!  │  (state machine, seq/ack counters) │
//!  └────┬──────────────┬────────────────┘
//!       │              │
//!  ┌────▼─────┐   ┌────▼────────────┐
//!  │SendWindow│   │ RetransmitTimer │
//!  └──────────┘   └─────────────────┘
//!       │ segments (packet codec)
//!  ┌────▼──────────────────────────────┐
//!  │  Channel  (UdpChannel / Simulator)│  send, bounded-wait receive
//!  └───────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     - wire format, flags, Internet checksum
//! - [`seq`]        - sequence-number comparison mod 2^32
//! - [`channel`]    - datagram channel trait and its UDP implementation
//! - [`simulator`]  - fault-injecting channel wrapper
//! - [`state`]      - finite-state-machine types
//! - [`timer`]      - retransmission timeout and backoff
//! - [`window`]     - in-flight segments and cumulative-ACK retirement
//! - [`config`]     - tunable protocol parameters
//! - [`error`]      - error taxonomy
//! - [`connection`] - handshake, reliable send engine, teardown

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod packet;
pub mod seq;
pub mod simulator;
pub mod state;
pub mod timer;
pub mod window;

pub use channel::{Channel, UdpChannel};
pub use config::{Config, RetransmitPolicy};
pub use connection::{Connection, TransferStats};
pub use error::{Result, StcpError};
pub use state::ConnectionState;
