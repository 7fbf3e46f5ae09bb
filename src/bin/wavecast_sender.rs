use clap::Parser;
use clap_derive::Parser;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use wavecast::config::{SenderConfig, DEFAULT_CTRL_PORT, DEFAULT_DATA_PORT};
use wavecast::sender::radio_sender::RadioSender;

/// Broadcasts audio from stdin to a multicast group
#[derive(Parser)]
struct Args {
    /// multicast address to send audio to
    #[clap(short = 'a', long)]
    mcast_addr: Ipv4Addr,

    #[clap(short = 'P', long, default_value_t = DEFAULT_DATA_PORT)]
    data_port: u16,

    #[clap(short = 'C', long, default_value_t = DEFAULT_CTRL_PORT)]
    ctrl_port: u16,

    /// audio bytes per packet
    #[clap(short = 'p', long, default_value_t = 512)]
    packet_size: usize,

    /// bytes of audio kept for retransmission
    #[clap(short = 'f', long, default_value_t = 128 * 1024)]
    cache_size: usize,

    /// retransmission interval in milliseconds
    #[clap(short = 'R', long, default_value_t = 250)]
    rexmit_interval: u64,

    #[clap(short = 'n', long, default_value = "Unnamed Station")]
    name: String,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = SenderConfig::new(args.mcast_addr);
    config.data_port = args.data_port;
    config.ctrl_port = args.ctrl_port;
    config.packet_size = args.packet_size;
    config.cache_size = args.cache_size;
    config.rexmit_interval = Duration::from_millis(args.rexmit_interval);
    config.name = args.name;

    let sender = Arc::new(RadioSender::new(Arc::new(config))?);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted - shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    sender.run(tokio::io::stdin(), cancel).await
}
