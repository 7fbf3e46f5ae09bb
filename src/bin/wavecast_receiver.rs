use clap::Parser;
use clap_derive::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use wavecast::config::{ReceiverConfig, DEFAULT_CTRL_PORT, DEFAULT_UI_PORT};
use wavecast::receiver::radio_receiver::RadioReceiver;

/// Plays a station's audio to stdout, with a station menu on a telnet port
#[derive(Parser)]
struct Args {
    /// address that station lookups are sent to
    #[clap(short = 'd', long, default_value_t = Ipv4Addr::BROADCAST)]
    discover_addr: Ipv4Addr,

    #[clap(short = 'C', long, default_value_t = DEFAULT_CTRL_PORT)]
    ctrl_port: u16,

    #[clap(short = 'U', long, default_value_t = DEFAULT_UI_PORT)]
    ui_port: u16,

    /// bytes of audio buffered before playback starts
    #[clap(short = 'b', long, default_value_t = 64 * 1024)]
    buffer_size: usize,

    /// retransmission interval in milliseconds
    #[clap(short = 'R', long, default_value_t = 250)]
    rexmit_interval: u64,

    /// station to play as soon as it is found
    #[clap(short = 'n', long)]
    name: Option<String>,

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

    // stdout carries the audio
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = ReceiverConfig::new();
    config.discover_addr = args.discover_addr;
    config.ctrl_port = args.ctrl_port;
    config.ui_port = args.ui_port;
    config.buffer_size = args.buffer_size;
    config.rexmit_interval = Duration::from_millis(args.rexmit_interval);
    config.preferred_station = args.name;

    let ui_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.ui_port));
    let receiver = Arc::new(RadioReceiver::new(Arc::new(config))?);

    let ui_listener = TcpListener::bind(ui_addr).await?;
    info!("station menu on telnet port {}", ui_addr.port());

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted - shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    receiver.run(tokio::io::stdout(), Some(ui_listener), cancel).await
}
