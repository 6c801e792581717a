//! Shared test scaffolding: an in-memory peer that speaks STCP.
//!
//! [`ScriptedPeer`] implements [`Channel`] without any sockets.  Every
//! datagram the sender transmits is decoded, logged, and handed to a
//! responder closure whose replies are queued for the sender's next receive.
//! When nothing is queued, `recv_timeout` sleeps until the next scheduled
//! datagram or for the full timeout, so tests run under `start_paused = true`
//! and observe RTO timing on tokio's virtual clock.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use stcp::packet::{flags, Packet};
use stcp::Channel;

pub const LOCAL_PORT: u16 = 4001;
pub const REMOTE_PORT: u16 = 4000;
pub const PEER_ISN: u32 = 77_000;

/// What the peer observed, shared with the test after the connection is gone.
#[derive(Debug, Default)]
pub struct PeerLog {
    /// Every segment the sender transmitted, in order.
    pub sent: Vec<Packet>,
    /// Receive calls that ended in a timeout.
    pub timeouts: u32,
    /// Set when the channel is dropped.
    pub released: bool,
    /// Largest amount of payload in flight at any transmission, measured
    /// against the last ACK actually delivered to the sender.
    pub max_in_flight: u32,
    /// Make the next receive fail with an I/O error.
    pub fail_recv: bool,
    /// Datagrams delivered at fixed instants, independent of what is sent.
    pub scheduled: VecDeque<(Instant, Vec<u8>)>,
    /// Transmission time of each entry in `sent`.
    pub sent_at: Vec<Instant>,
    last_ack_delivered: Option<u32>,
}

impl PeerLog {
    pub fn data_segments(&self) -> Vec<&Packet> {
        self.sent.iter().filter(|p| !p.payload.is_empty()).collect()
    }

    pub fn count_flag(&self, flag: u8) -> usize {
        self.sent.iter().filter(|p| p.header.flags & flag != 0).count()
    }

    /// How many times the data segment starting at `seq` was sent.
    pub fn transmissions_of(&self, seq: u32) -> usize {
        self.data_segments()
            .iter()
            .filter(|p| p.header.seq == seq)
            .count()
    }
}

pub type Responder = Box<dyn FnMut(&Packet) -> Vec<Vec<u8>> + Send>;

pub struct ScriptedPeer {
    log: Arc<Mutex<PeerLog>>,
    responder: Responder,
    inbox: VecDeque<Vec<u8>>,
}

impl ScriptedPeer {
    pub fn new(responder: Responder) -> (Self, Arc<Mutex<PeerLog>>) {
        let log = Arc::new(Mutex::new(PeerLog::default()));
        let peer = Self {
            log: Arc::clone(&log),
            responder,
            inbox: VecDeque::new(),
        };
        (peer, log)
    }
}

impl Drop for ScriptedPeer {
    fn drop(&mut self) {
        self.log.lock().unwrap().released = true;
    }
}

#[async_trait]
impl Channel for ScriptedPeer {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let pkt = Packet::decode(bytes).expect("sender emitted an invalid segment");
        {
            let mut log = self.log.lock().unwrap();
            if !pkt.payload.is_empty() {
                let base = log.last_ack_delivered.unwrap_or(pkt.header.seq);
                let in_flight = pkt.seq_end().wrapping_sub(base);
                log.max_in_flight = log.max_in_flight.max(in_flight);
            }
            log.sent.push(pkt.clone());
            log.sent_at.push(Instant::now());
        }
        let replies = (self.responder)(&pkt);
        self.inbox.extend(replies);
        Ok(bytes.len())
    }

    async fn recv_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<usize>> {
        if std::mem::take(&mut self.log.lock().unwrap().fail_recv) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }
        if let Some(datagram) = self.inbox.pop_front() {
            if let Ok(pkt) = Packet::decode(&datagram) {
                if pkt.header.flags & flags::ACK != 0 {
                    let mut log = self.log.lock().unwrap();
                    let advances = log
                        .last_ack_delivered
                        .map_or(true, |last| stcp::seq::seq_gt(pkt.header.ack, last));
                    if advances {
                        log.last_ack_delivered = Some(pkt.header.ack);
                    }
                }
            }
            buf[..datagram.len()].copy_from_slice(&datagram);
            return Ok(Some(datagram.len()));
        }
        let deadline = Instant::now() + timeout;
        let due = {
            let mut log = self.log.lock().unwrap();
            match log.scheduled.front() {
                Some((at, _)) if *at <= deadline => log.scheduled.pop_front(),
                _ => None,
            }
        };
        if let Some((at, datagram)) = due {
            tokio::time::sleep_until(at).await;
            buf[..datagram.len()].copy_from_slice(&datagram);
            return Ok(Some(datagram.len()));
        }
        tokio::time::sleep_until(deadline).await;
        self.log.lock().unwrap().timeouts += 1;
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Segment builders for the peer side
// ---------------------------------------------------------------------------

pub fn encode(pkt: Packet) -> Vec<u8> {
    pkt.with_ports(REMOTE_PORT, LOCAL_PORT).encode().unwrap()
}

pub fn syn_ack(syn: &Packet, window: u16) -> Vec<u8> {
    encode(Packet::new(
        flags::SYN | flags::ACK,
        window,
        PEER_ISN,
        syn.header.seq.wrapping_add(1),
        vec![],
    ))
}

pub fn ack(ack: u32, window: u16) -> Vec<u8> {
    encode(Packet::new(
        flags::ACK,
        window,
        PEER_ISN.wrapping_add(1),
        ack,
        vec![],
    ))
}

/// Flip one bit of the checksum field.
pub fn corrupt(mut datagram: Vec<u8>) -> Vec<u8> {
    datagram[17] ^= 0x01;
    datagram
}

// ---------------------------------------------------------------------------
// A small receiver model
// ---------------------------------------------------------------------------

/// Cumulative-ACK receiver with optional scripted losses.
pub struct ReceiverModel {
    pub window: u16,
    expected: u32,
    /// Data segment start sequence numbers whose first transmission is lost.
    pub drop_first: HashSet<u32>,
    /// Drop every FIN instead of acknowledging it.
    pub ignore_fin: bool,
    /// Answer a FIN with FIN|ACK rather than a bare ACK.
    pub fin_ack: bool,
    /// Send each ACK this many times.
    pub ack_copies: usize,
    /// Keep out-of-order segments and ack them once the gap fills.
    pub buffer_out_of_order: bool,
    pending: Vec<(u32, Vec<u8>)>,
    handshake_acked: bool,
    pub received: Arc<Mutex<Vec<u8>>>,
}

impl ReceiverModel {
    pub fn new(window: u16) -> Self {
        Self {
            window,
            expected: 0,
            drop_first: HashSet::new(),
            ignore_fin: false,
            fin_ack: false,
            ack_copies: 1,
            buffer_out_of_order: false,
            pending: Vec::new(),
            handshake_acked: false,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn respond(&mut self, pkt: &Packet) -> Vec<Vec<u8>> {
        let h = pkt.header;
        if h.flags & flags::SYN != 0 {
            self.expected = h.seq.wrapping_add(1);
            return vec![syn_ack(pkt, self.window)];
        }
        if h.flags & flags::FIN != 0 {
            if self.ignore_fin || h.seq != self.expected {
                return vec![];
            }
            let end = pkt.seq_end();
            let bits = if self.fin_ack {
                flags::FIN | flags::ACK
            } else {
                flags::ACK
            };
            return vec![encode(Packet::new(
                bits,
                self.window,
                PEER_ISN.wrapping_add(1),
                end,
                vec![],
            ))];
        }
        if pkt.payload.is_empty() {
            // The first bare ACK completes the handshake; later ones are probes.
            if !self.handshake_acked {
                self.handshake_acked = true;
                return vec![];
            }
            return vec![ack(self.expected, self.window)];
        }

        if self.drop_first.remove(&h.seq) {
            return vec![];
        }

        if h.seq == self.expected {
            self.received.lock().unwrap().extend_from_slice(&pkt.payload);
            self.expected = pkt.seq_end();
            if self.buffer_out_of_order {
                self.drain_pending();
            }
        } else if self.buffer_out_of_order {
            self.pending.push((h.seq, pkt.payload.clone()));
        }
        vec![ack(self.expected, self.window); self.ack_copies]
    }

    fn drain_pending(&mut self) {
        loop {
            let Some(pos) = self.pending.iter().position(|(s, _)| *s == self.expected) else {
                return;
            };
            let (seq, payload) = self.pending.remove(pos);
            self.received.lock().unwrap().extend_from_slice(&payload);
            self.expected = seq.wrapping_add(payload.len() as u32);
        }
    }

    pub fn into_responder(mut self) -> Responder {
        responder(move |pkt| self.respond(pkt))
    }
}

pub fn test_config() -> stcp::Config {
    stcp::Config {
        adaptive_rto: false,
        ..stcp::Config::default()
    }
}

/// Box a closure as a [`Responder`].
pub fn responder(f: impl FnMut(&Packet) -> Vec<Vec<u8>> + Send + 'static) -> Responder {
    Box::new(f)
}

/// A peer that never answers.
pub fn silent() -> Responder {
    responder(|_| Vec::new())
}
