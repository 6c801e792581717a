//! Connection finite-state machine (FSM) types.
//!
//! The sender side of STCP walks a single path:
//!
//! ```text
//!  CLOSED ──open()──▶ SYN_SENT ──valid SYN-ACK──▶ ESTABLISHED
//!                                                     │
//!                                          close()    │
//!                                                     ▼
//!               CLOSED_FINAL ◀──FIN acked── FIN_WAIT
//!
//!  any state ──unrecoverable error──▶ CLOSED_FINAL
//! ```
//!
//! Transitions are driven by [`crate::connection`]; this module only
//! defines the states and which edges are legal.

/// All possible states of the sender FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial state.
    #[default]
    Closed,
    /// SYN has been sent; waiting for SYN-ACK.
    SynSent,
    /// Handshake complete; data transfer in progress.
    Established,
    /// FIN sent; waiting for it to be acknowledged.
    FinWait,
    /// Terminal state, reached by a clean close or an abort.
    ClosedFinal,
}

impl ConnectionState {
    /// `true` when `self -> next` is an edge of the state diagram.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Closed, SynSent)
                | (SynSent, Established)
                | (Established, FinWait)
                | (FinWait, ClosedFinal)
        ) || (next == ClosedFinal && self != ClosedFinal)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::SynSent => "SYN_SENT",
            Self::Established => "ESTABLISHED",
            Self::FinWait => "FIN_WAIT",
            Self::ClosedFinal => "CLOSED_FINAL",
        };
        f.write_str(name)
    }
}
