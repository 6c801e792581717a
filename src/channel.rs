//! Datagram channel abstraction.
//!
//! [`Channel`] is the only thing the protocol engine knows about the
//! network: send one datagram, or wait a bounded time for one.  The bounded
//! wait is the single suspension point of the engine; retransmission timing
//! is evaluated whenever it returns.
//!
//! [`UdpChannel`] implements it over a connected `tokio::net::UdpSocket`, so
//! only datagrams from the peer are ever delivered.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, UdpSocket};

/// Largest datagram the engine will ever read.
pub const MAX_DATAGRAM: usize = 65_535;

#[async_trait]
pub trait Channel: Send {
    /// Send `bytes` as a single datagram.
    async fn send(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Wait at most `timeout` for the next datagram.
    ///
    /// Returns `Ok(Some(n))` with `n` bytes written into `buf`, `Ok(None)` on
    /// timeout, or the channel's error.
    async fn recv_timeout(&mut self, buf: &mut [u8], timeout: Duration)
        -> io::Result<Option<usize>>;
}

#[async_trait]
impl<C: Channel + ?Sized> Channel for Box<C> {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).send(bytes).await
    }

    async fn recv_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<usize>> {
        (**self).recv_timeout(buf, timeout).await
    }
}

/// A UDP socket bound to a local port and connected to one peer.
///
/// Dropping it closes the socket.
#[derive(Debug)]
pub struct UdpChannel {
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    inner: UdpSocket,
}

impl UdpChannel {
    /// Bind `0.0.0.0:local_port` and connect to `destination:remote_port`.
    ///
    /// `destination` may be a host name or an IP literal.  Passing
    /// `local_port = 0` lets the OS choose an ephemeral port.
    pub async fn open(destination: &str, remote_port: u16, local_port: u16) -> io::Result<Self> {
        let peer_addr = lookup_host((destination, remote_port))
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no IPv4 address for {destination}"),
                )
            })?;
        let inner = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, local_port)).await?;
        inner.connect(peer_addr).await?;
        let local_addr = inner.local_addr()?;
        log::debug!("[stcp] channel {local_addr} -> {peer_addr}");
        Ok(Self {
            local_addr,
            peer_addr,
            inner,
        })
    }
}

#[async_trait]
impl Channel for UdpChannel {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.inner.send(bytes).await
    }

    async fn recv_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<usize>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.inner.recv(buf)).await {
                Ok(Ok(n)) => return Ok(Some(n)),
                // ICMP port unreachable from an earlier send; the peer may
                // simply not be listening yet, so keep waiting.
                Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    log::debug!("[stcp] peer port unreachable");
                }
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => return Ok(None),
            }
        }
    }
}
