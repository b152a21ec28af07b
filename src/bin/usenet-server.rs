//! usenet-server - controller side of the control plane

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use usenet_ctl::transport::{TcpServerTransport, UdpWakeOnLan, WakeOnLan};
use usenet_ctl::{Config, Result, Server, ServerSettings, logging, shutdown_on_signal};

#[derive(Parser)]
#[command(name = "usenet-server")]
#[command(about = "Wake the download machine and hand it jobs")]
struct Cli {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Request a single show instead of the job-descriptor contents
    #[arg(long)]
    job: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("usenet-server: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.logging)?;
    let shutdown = shutdown_on_signal();

    let addr = config.connection.address();
    let listener = TcpServerTransport::bind(&addr).await?;
    tracing::info!(%addr, "listening for the download machine");

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (transport, io) = TcpServerTransport::spawn(listener, events_tx, shutdown.clone());

    let wol: Arc<dyn WakeOnLan> = Arc::new(UdpWakeOnLan::new(config.server.broadcast_addr.clone()));
    let settings = ServerSettings::from_config(&config, cli.job)?;
    let result = Server::new(settings, Arc::new(transport), Some(wol))
        .run(events_rx, shutdown.clone())
        .await;

    shutdown.cancel();
    let _ = io.await;
    result
}
