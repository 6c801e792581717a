//! Entry point for `stcp-send`.
//!
//! Reads a file and pushes it through an STCP connection one window-sized
//! chunk at a time.  All protocol work is delegated to the library; `main.rs` owns
//! only process setup (logging, argument parsing, exit status).

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncReadExt;

use stcp::simulator::{Simulator, SimulatorConfig};
use stcp::{Channel, Config, Connection, RetransmitPolicy, UdpChannel};

/// Send a file to an STCP receiver over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// File whose contents are transferred.
    file: std::path::PathBuf,

    /// Receiver host name or address.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port the receiver listens on.
    #[arg(long, default_value_t = 9000)]
    receiver_port: u16,

    /// Local port to send from (defaults to receiver port + 1).
    #[arg(long)]
    sender_port: Option<u16>,

    /// Maximum payload per segment.
    #[arg(long, default_value_t = stcp::packet::DEFAULT_MSS)]
    mss: usize,

    /// Retransmissions tolerated before giving up.
    #[arg(long, default_value_t = stcp::config::MAX_RETRIES)]
    max_retries: u32,

    /// Initial retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 150)]
    initial_rto_ms: u64,

    /// Keep the RTO fixed instead of measuring round trips.
    #[arg(long)]
    fixed_rto: bool,

    /// RTO multiplier applied after each timeout (1 disables backoff).
    #[arg(long, default_value_t = 2)]
    backoff: u32,

    /// Resend only the oldest segment on timeout instead of the whole window.
    #[arg(long)]
    retransmit_oldest: bool,

    /// Succeed even if the FIN is never acknowledged.
    #[arg(long)]
    lenient_close: bool,

    /// Simulated datagram loss probability.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Simulated datagram duplication probability.
    #[arg(long, default_value_t = 0.0)]
    duplicate: f64,

    /// Simulated bit-corruption probability.
    #[arg(long, default_value_t = 0.0)]
    corrupt: f64,

    /// Seed for the fault simulator.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            mss: self.mss,
            initial_rto: Duration::from_millis(self.initial_rto_ms),
            backoff: self.backoff,
            adaptive_rto: !self.fixed_rto,
            max_retries: self.max_retries,
            retransmit: if self.retransmit_oldest {
                RetransmitPolicy::Oldest
            } else {
                RetransmitPolicy::GoBackN
            },
            strict_close: !self.lenient_close,
            ..Config::default()
        }
    }

    fn simulator(&self) -> SimulatorConfig {
        SimulatorConfig {
            loss: self.loss,
            duplicate: self.duplicate,
            corrupt: self.corrupt,
            seed: self.seed,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(bytes) => {
            log::info!("transferred {bytes} bytes from {}", cli.file.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("stcp-send: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<u64> {
    let config = cli.config();
    config.validate()?;

    let mut file = tokio::fs::File::open(&cli.file)
        .await
        .with_context(|| format!("cannot open {}", cli.file.display()))?;

    let sender_port = cli
        .sender_port
        .unwrap_or_else(|| cli.receiver_port.wrapping_add(1));
    log::info!(
        "sending from port {sender_port} to <{}, {}>",
        cli.host,
        cli.receiver_port
    );
    let udp = UdpChannel::open(&cli.host, cli.receiver_port, sender_port)
        .await
        .with_context(|| format!("could not open channel to {}:{}", cli.host, cli.receiver_port))?;
    let local_port = udp.local_addr.port();

    let sim = cli.simulator();
    let channel: Box<dyn Channel> = if sim.is_active() {
        log::info!("fault simulator enabled: {sim:?}");
        Box::new(Simulator::new(udp, sim))
    } else {
        Box::new(udp)
    };

    let mut conn = Connection::open_with(channel, local_port, cli.receiver_port, config)
        .await
        .with_context(|| format!("could not open connection to {}:{}", cli.host, cli.receiver_port))?;

    // One window's worth per `send`, so the whole window is kept in flight.
    let mut buf = vec![0u8; usize::from(stcp::packet::MAX_WINDOW)];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).await.context("read failed")?;
        if n == 0 {
            break;
        }
        conn.send(&buf[..n]).await.context("send failed")?;
        total += n as u64;
    }

    let stats = conn.stats();
    log::debug!("transfer stats before close: {stats:?}");
    conn.close().await.context("close failed")?;
    Ok(total)
}
