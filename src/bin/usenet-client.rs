//! usenet-client - download-machine side of the control plane

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use usenet_ctl::daemon::{NzbGetClient, SystemProcessControl};
use usenet_ctl::search::RssSearcher;
use usenet_ctl::transport::TcpClientTransport;
use usenet_ctl::{
    Client, ClientSettings, Collaborators, Config, Result, logging, shutdown_on_signal, transfer,
};

#[derive(Parser)]
#[command(name = "usenet-client")]
#[command(about = "Fetch, download, rename and transfer jobs from the controller")]
struct Cli {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("usenet-client: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.logging)?;
    let shutdown = shutdown_on_signal();

    let collab = Collaborators {
        search: Arc::new(RssSearcher::new(config.search.clone(), config.retry.clone())?),
        daemon: Arc::new(NzbGetClient::new(config.daemon.clone(), config.retry.clone())?),
        process: Arc::new(SystemProcessControl::new(&config.daemon)),
        transfer: transfer::from_config(&config.transfer),
    };

    let addr = config.connection.address();
    tracing::info!(%addr, "connecting to controller");
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (transport, io) = TcpClientTransport::spawn(
        addr,
        config.connection.reconnect_interval,
        events_tx,
        shutdown.clone(),
    );

    let result = Client::new(ClientSettings::from_config(&config), collab, Arc::new(transport))
        .run(events_rx, shutdown.clone())
        .await;

    shutdown.cancel();
    let _ = io.await;
    result
}
