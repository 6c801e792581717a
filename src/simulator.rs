//! Fault-injecting channel for exercising the reliability machinery.
//!
//! [`Simulator`] wraps any [`Channel`] and applies a configurable fault
//! model to the datagrams passing through it:
//!
//! | Fault       | Direction | Description                                  |
//! |-------------|-----------|----------------------------------------------|
//! | Loss        | both      | Drop the datagram with probability `loss`.   |
//! | Duplication | outbound  | Send the datagram twice.                     |
//! | Corruption  | both      | Flip one random bit.                         |
//!
//! Decisions come from a seeded [`SmallRng`] so a failing run can be
//! replayed with the same seed.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::channel::Channel;

/// Fault probabilities, each in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub loss: f64,
    pub duplicate: f64,
    pub corrupt: f64,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // Transparent pass-through.
        Self {
            loss: 0.0,
            duplicate: 0.0,
            corrupt: 0.0,
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    /// `true` when at least one fault can fire.
    pub fn is_active(&self) -> bool {
        self.loss > 0.0 || self.duplicate > 0.0 || self.corrupt > 0.0
    }

    fn clamped(mut self) -> Self {
        self.loss = self.loss.clamp(0.0, 1.0);
        self.duplicate = self.duplicate.clamp(0.0, 1.0);
        self.corrupt = self.corrupt.clamp(0.0, 1.0);
        self
    }
}

/// Counters of injected faults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub dropped: u64,
    pub duplicated: u64,
    pub corrupted: u64,
}

pub struct Simulator<C> {
    inner: C,
    config: SimulatorConfig,
    rng: SmallRng,
    stats: FaultStats,
}

impl<C: Channel> Simulator<C> {
    pub fn new(inner: C, config: SimulatorConfig) -> Self {
        let config = config.clamped();
        Self {
            rng: SmallRng::seed_from_u64(config.seed),
            inner,
            config,
            stats: FaultStats::default(),
        }
    }

    pub fn stats(&self) -> FaultStats {
        self.stats
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn roll(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.random_bool(p)
    }

    fn flip_bit(&mut self, bytes: &mut [u8]) {
        if bytes.is_empty() {
            return;
        }
        let idx = self.rng.random_range(0..bytes.len());
        let bit = self.rng.random_range(0..8u32);
        bytes[idx] ^= 1 << bit;
        self.stats.corrupted += 1;
    }
}

#[async_trait]
impl<C: Channel> Channel for Simulator<C> {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        if self.roll(self.config.loss) {
            self.stats.dropped += 1;
            log::debug!("[sim] dropped outbound datagram ({} bytes)", bytes.len());
            // The sender cannot tell a lost datagram from a delivered one.
            return Ok(bytes.len());
        }

        let mut out = bytes.to_vec();
        if self.roll(self.config.corrupt) {
            self.flip_bit(&mut out);
            log::debug!("[sim] corrupted outbound datagram");
        }
        let n = self.inner.send(&out).await?;

        if self.roll(self.config.duplicate) {
            self.stats.duplicated += 1;
            log::debug!("[sim] duplicated outbound datagram");
            self.inner.send(&out).await?;
        }
        Ok(n)
    }

    async fn recv_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<usize>> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let Some(n) = self.inner.recv_timeout(buf, left).await? else {
                return Ok(None);
            };
            if self.roll(self.config.loss) {
                self.stats.dropped += 1;
                log::debug!("[sim] dropped inbound datagram ({n} bytes)");
                continue;
            }
            if self.roll(self.config.corrupt) {
                self.flip_bit(&mut buf[..n]);
                log::debug!("[sim] corrupted inbound datagram");
            }
            return Ok(Some(n));
        }
    }
}
