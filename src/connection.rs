//! Sender-side connection: handshake, reliable send, teardown.
//!
//! A [`Connection`] is the whole state of one STCP sender.  It is created by
//! [`Connection::open`] (three-way handshake), driven by repeated
//! [`Connection::send`] calls, and consumed by [`Connection::close`], which
//! releases the channel whether or not the peer acknowledges the FIN.
//!
//! ```text
//!  open()                       send(data)                      close()
//!    │                              │                              │
//!    ▼                              ▼                              ▼
//!  SYN ──▶ SYN-ACK ──▶ ACK     fill window ◀──┐              flush window
//!                                  │          │                    │
//!                                  ▼          │                 FIN ──▶ ACK
//!                           wait(RTO) ──ACK───┘
//!                                  │
//!                            timeout: retransmit, back off
//! ```
//!
//! Everything runs on the caller's task.  The only suspension point is
//! [`Channel::recv_timeout`]; the retransmission timer is evaluated each
//! time it returns.

use rand::Rng;

use crate::channel::{Channel, UdpChannel, MAX_DATAGRAM};
use crate::config::{Config, RetransmitPolicy};
use crate::error::{Result, StcpError};
use crate::packet::{flags, Packet, MAX_WINDOW};
use crate::seq::{seq_between, seq_gt};
use crate::state::ConnectionState;
use crate::timer::RetransmitTimer;
use crate::window::SendWindow;

/// Running totals for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Segments transmitted, retransmissions included.
    pub segments_sent: u64,
    pub retransmissions: u64,
    /// Payload bytes covered by cumulative ACKs.
    pub bytes_acked: u64,
    /// Inbound datagrams that failed validation.
    pub discarded: u64,
}

pub struct Connection<C> {
    channel: C,
    state: ConnectionState,
    local_port: u16,
    remote_port: u16,
    initial_seq: u32,
    /// Next sequence number expected from the peer.
    ack_seq: u32,
    /// Most recent window advertised by the peer.
    peer_window: u16,
    window: SendWindow,
    timer: RetransmitTimer,
    /// Consecutive expiries without progress.
    retries: u32,
    config: Config,
    stats: TransferStats,
    buf: Vec<u8>,
}

impl Connection<UdpChannel> {
    /// Open a UDP channel to `destination:remote_port` from `local_port` and
    /// run the three-way handshake over it.
    pub async fn open(
        destination: &str,
        local_port: u16,
        remote_port: u16,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        log::info!("[stcp] sending from port {local_port} to <{destination}, {remote_port}>");
        let channel = UdpChannel::open(destination, remote_port, local_port)
            .await
            .map_err(StcpError::Open)?;
        let local_port = channel.local_addr.port();
        Self::open_with(channel, local_port, remote_port, config).await
    }
}

impl<C: Channel> Connection<C> {
    /// Run the three-way handshake over an already acquired channel.
    ///
    /// Exactly one SYN is sent and exactly one response is awaited, bounded
    /// by the initial RTO.  A missing, corrupt or mis-acked response aborts
    /// the attempt and drops the channel.
    pub async fn open_with(
        channel: C,
        local_port: u16,
        remote_port: u16,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        let isn = config
            .isn
            .unwrap_or_else(|| rand::rng().random_range(0..u32::from(MAX_WINDOW)));

        let mut conn = Self {
            channel,
            state: ConnectionState::Closed,
            local_port,
            remote_port,
            initial_seq: isn,
            ack_seq: 0,
            peer_window: 0,
            window: SendWindow::new(isn),
            timer: RetransmitTimer::new(&config),
            retries: 0,
            config,
            stats: TransferStats::default(),
            buf: vec![0u8; MAX_DATAGRAM],
        };

        match conn.handshake().await {
            Ok(()) => Ok(conn),
            Err(e) => Err(conn.abort(e)),
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        self.transition(ConnectionState::SynSent);
        let isn = self.initial_seq;
        let syn = self.segment(flags::SYN, isn, Vec::new());
        let sent_at = tokio::time::Instant::now();
        self.transmit(&syn).await?;

        let n = self
            .channel
            .recv_timeout(&mut self.buf, self.config.initial_rto)
            .await?
            .ok_or(StcpError::HandshakeTimeout)?;
        let reply = Packet::decode(&self.buf[..n])
            .map_err(|e| StcpError::InvalidHandshake(e.to_string()))?;
        log::debug!("[stcp] ← {reply}");

        let h = reply.header;
        if !(h.is_syn() && h.is_ack() && h.ack == isn.wrapping_add(1)) {
            return Err(StcpError::InvalidHandshake(format!(
                "expected SYN|ACK with ack={}, got {reply}",
                isn.wrapping_add(1)
            )));
        }

        self.window = SendWindow::new(isn.wrapping_add(1));
        self.ack_seq = h.seq.wrapping_add(1);
        self.peer_window = h.window;
        self.timer.record_rtt_sample(sent_at.elapsed());
        self.timer.reset();
        self.transition(ConnectionState::Established);

        let ack = self.segment(flags::ACK, self.window.next_seq(), Vec::new());
        self.transmit(&ack).await?;
        log::info!(
            "[stcp] established: seq={} ack={} peer_window={}",
            self.send_seq(),
            self.ack_seq,
            self.peer_window
        );
        Ok(())
    }

    /// Reliably deliver `data`.
    ///
    /// Returns once every byte has been transmitted and acknowledged.  Any
    /// error is fatal: the connection moves to `CLOSED_FINAL` and later
    /// calls fail with [`StcpError::BadState`].
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.state != ConnectionState::Established {
            return Err(StcpError::BadState(self.state));
        }
        match self.send_all(data).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.abort(e)),
        }
    }

    async fn send_all(&mut self, data: &[u8]) -> Result<()> {
        let mut pending = data;
        loop {
            while let Some(len) = self.next_segment_len(pending.len()) {
                let (chunk, rest) = pending.split_at(len);
                self.send_segment(chunk.to_vec()).await?;
                pending = rest;
            }
            if !self.window.has_unacked() {
                if pending.is_empty() {
                    return Ok(());
                }
                // Window closed with nothing in flight: the wait for a window
                // update runs against the timer like any other.
                self.timer.arm_if_idle();
            }
            self.await_progress().await?;
        }
    }

    /// Size of the next segment, or `None` while the window is closed.
    fn next_segment_len(&self, remaining: usize) -> Option<usize> {
        if remaining == 0 {
            return None;
        }
        let len = remaining.min(self.config.mss);
        if self.window.fits(len, self.peer_window) {
            Some(len)
        } else if !self.window.has_unacked() && self.peer_window > 0 {
            // Window smaller than one segment: shrink rather than stall.
            Some(len.min(usize::from(self.peer_window)))
        } else {
            None
        }
    }

    async fn send_segment(&mut self, payload: Vec<u8>) -> Result<()> {
        let pkt = self.segment(flags::ACK, self.window.next_seq(), payload);
        self.transmit(&pkt).await?;
        self.window.record_sent(pkt);
        self.timer.arm_if_idle();
        log::trace!(
            "[stcp] outstanding={}/{} next_seq={}",
            self.window.outstanding(),
            self.peer_window,
            self.window.next_seq()
        );
        Ok(())
    }

    /// Block until every in-flight segment is acknowledged.
    async fn flush(&mut self) -> Result<()> {
        while self.window.has_unacked() {
            self.await_progress().await?;
        }
        Ok(())
    }

    /// Wait once for input, bounded by the retransmission timer, and react to
    /// whatever happened.
    async fn await_progress(&mut self) -> Result<()> {
        let wait = self.timer.remaining();
        match self.channel.recv_timeout(&mut self.buf, wait).await? {
            None => self.on_timeout().await,
            Some(n) => match Packet::decode(&self.buf[..n]) {
                Ok(pkt) => self.on_segment(pkt).await,
                Err(e) => {
                    self.stats.discarded += 1;
                    log::warn!("[stcp] discarding invalid segment: {e}");
                    Ok(())
                }
            },
        }
    }

    async fn on_timeout(&mut self) -> Result<()> {
        self.retries += 1;
        if self.retries > self.config.max_retries {
            return Err(StcpError::MaxRetriesExceeded {
                retries: self.config.max_retries,
            });
        }

        if !self.window.has_unacked() {
            // Zero window: probe so the peer re-advertises.
            log::debug!("[stcp] zero window, probing (attempt {})", self.retries);
            let probe = self.segment(flags::ACK, self.window.next_seq(), Vec::new());
            self.transmit(&probe).await?;
            self.timer.back_off();
            self.timer.arm();
            return Ok(());
        }

        let count = match self.config.retransmit {
            RetransmitPolicy::GoBackN => self.window.in_flight(),
            RetransmitPolicy::Oldest => 1,
        };
        let pkts: Vec<Packet> = self
            .window
            .entries()
            .take(count)
            .map(|e| e.packet.clone())
            .collect();
        log::warn!(
            "[stcp] timeout after {:?}: retransmitting {} segment(s) from seq={} (attempt {})",
            self.timer.rto(),
            pkts.len(),
            self.window.send_una(),
            self.retries
        );
        for pkt in &pkts {
            self.transmit(pkt).await?;
            self.stats.retransmissions += 1;
        }
        self.window.on_retransmit(count);
        self.timer.back_off();
        self.timer.arm();
        Ok(())
    }

    async fn on_segment(&mut self, pkt: Packet) -> Result<()> {
        log::debug!("[stcp] ← {pkt}");
        let h = pkt.header;

        if h.is_rst() {
            return Err(StcpError::Reset);
        }

        if h.is_fin() && self.state == ConnectionState::FinWait {
            self.ack_peer_fin(&pkt).await?;
        }

        if !h.is_ack() {
            return Ok(());
        }
        if !seq_between(self.window.send_una(), h.ack, self.window.next_seq()) {
            log::debug!(
                "[stcp] ignoring ack={} outside [{}, {}]",
                h.ack,
                self.window.send_una(),
                self.window.next_seq()
            );
            return Ok(());
        }

        self.peer_window = h.window;
        let outcome = self.window.on_ack(h.ack);
        if outcome.advanced() {
            self.retries = 0;
            self.stats.bytes_acked += outcome.bytes as u64;
            if let Some(rtt) = outcome.rtt_sample {
                self.timer.record_rtt_sample(rtt);
            }
            self.timer.reset();
            if self.window.has_unacked() {
                self.timer.arm();
            } else {
                self.timer.disarm();
            }
            log::debug!(
                "[stcp] ack={} retired {} segment(s), outstanding={}",
                h.ack,
                outcome.segments,
                self.window.outstanding()
            );
        } else if !self.window.has_unacked() {
            // Window update while idle answers a probe.  A window that is
            // still zero keeps the running deadline for the next probe.
            self.retries = 0;
            self.timer.reset();
            if self.peer_window > 0 {
                self.timer.disarm();
            }
        }
        Ok(())
    }

    async fn ack_peer_fin(&mut self, pkt: &Packet) -> Result<()> {
        let fin_end = pkt.seq_end();
        if seq_gt(fin_end, self.ack_seq) {
            self.ack_seq = fin_end;
        }
        let ack = self.segment(flags::ACK, self.window.next_seq(), Vec::new());
        self.transmit(&ack).await
    }

    /// Drain outstanding data, send FIN, wait for its ACK, release everything.
    ///
    /// The connection is consumed and the channel dropped on every path, so
    /// a failed close never leaks.
    pub async fn close(mut self) -> Result<()> {
        if self.state != ConnectionState::Established {
            let state = self.state;
            self.state = ConnectionState::ClosedFinal;
            return Err(StcpError::BadState(state));
        }

        let result = self.teardown().await;
        self.timer.disarm();
        self.transition(ConnectionState::ClosedFinal);
        match &result {
            Ok(()) => log::info!(
                "[stcp] closed: {} segments sent, {} retransmitted, {} bytes acked",
                self.stats.segments_sent,
                self.stats.retransmissions,
                self.stats.bytes_acked
            ),
            Err(e) => log::error!("[stcp] close failed: {e}"),
        }
        result
    }

    async fn teardown(&mut self) -> Result<()> {
        self.flush().await?;

        self.transition(ConnectionState::FinWait);
        let fin = self.segment(flags::FIN | flags::ACK, self.window.next_seq(), Vec::new());
        log::info!("[stcp] → FIN seq={}", fin.header.seq);
        self.transmit(&fin).await?;
        self.window.record_sent(fin);
        self.timer.arm();

        match self.flush().await {
            Ok(()) => Ok(()),
            Err(StcpError::MaxRetriesExceeded { .. }) if !self.config.strict_close => {
                log::warn!("[stcp] FIN not acknowledged; force-closing");
                Ok(())
            }
            Err(StcpError::MaxRetriesExceeded { .. }) => Err(StcpError::FinNotAcked),
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Build an outgoing segment stamped with ports, ack and window.
    fn segment(&self, bits: u8, seq: u32, payload: Vec<u8>) -> Packet {
        let ack = if bits & flags::ACK != 0 { self.ack_seq } else { 0 };
        Packet::new(bits, self.config.advertised_window, seq, ack, payload)
            .with_ports(self.local_port, self.remote_port)
    }

    async fn transmit(&mut self, pkt: &Packet) -> Result<()> {
        let bytes = pkt.encode()?;
        self.channel.send(&bytes).await?;
        self.stats.segments_sent += 1;
        log::debug!("[stcp] → {pkt}");
        Ok(())
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.state
        );
        log::trace!("[stcp] {} -> {next}", self.state);
        self.state = next;
    }

    /// Record a fatal error: move to `CLOSED_FINAL` and hand the error back.
    fn abort(&mut self, err: StcpError) -> StcpError {
        log::error!("[stcp] aborting in {}: {err}", self.state);
        if self.state != ConnectionState::ClosedFinal {
            self.transition(ConnectionState::ClosedFinal);
        }
        self.timer.disarm();
        err
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Next sequence number for new payload.
    pub fn send_seq(&self) -> u32 {
        self.window.next_seq()
    }

    /// Next sequence number expected from the peer.
    pub fn ack_seq(&self) -> u32 {
        self.ack_seq
    }

    /// Highest cumulative ACK received from the peer.
    pub fn send_una(&self) -> u32 {
        self.window.send_una()
    }

    pub fn initial_seq(&self) -> u32 {
        self.initial_seq
    }

    /// Current retransmission timeout.
    pub fn timeout(&self) -> std::time::Duration {
        self.timer.rto()
    }

    pub fn peer_window(&self) -> u16 {
        self.peer_window
    }

    /// Payload bytes sent but not yet acknowledged.
    pub fn outstanding(&self) -> usize {
        self.window.outstanding()
    }

    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
