//! xlatd - 464xlat lifecycle coordinator over a stdin event feed.
//!
//! Reads JSON-lines connectivity and interface records from stdin, runs the
//! translation daemon accordingly, and writes every lifecycle announcement
//! to stdout as one JSON object per line.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;

use xlat_core::commbus::{CommBus, StateChangePublisher, STATE_CHANGED_EVENT};
use xlat_core::daemon::ClatdProcess;
use xlat_core::feed::run_feed;
use xlat_core::link::SharedLinkState;
use xlat_core::Config;

#[derive(Debug, Parser)]
#[command(name = "xlatd", version, about = "NAT64/CLAT lifecycle coordinator")]
struct Args {
    /// JSON config file.
    #[arg(long, env = "XLAT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the translation interface name.
    #[arg(long)]
    clat_interface: Option<String>,

    /// Override the daemon program.
    #[arg(long)]
    daemon: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(name) = args.clat_interface {
        config.clat.interface_name = name;
    }
    if let Some(program) = args.daemon {
        config.daemon.program = program;
    }
    config.validate()?;

    // Initialize observability
    xlat_core::observability::init_tracing_with(&config.observability);

    let link = Arc::new(SharedLinkState::new());
    let daemon = Arc::new(ClatdProcess::new(config.daemon.clone()));
    let bus = Arc::new(CommBus::new());
    let publisher = Arc::new(StateChangePublisher::new(bus.clone(), "xlatd"));

    let (_subscription, mut announcements) =
        bus.subscribe(vec![STATE_CHANGED_EVENT.to_string()]).await?;
    let printer = tokio::spawn(async move {
        while let Some(event) = announcements.recv().await {
            match event.state_change().and_then(|c| serde_json::to_string(&c).map_err(Into::into)) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "undecodable announcement"),
            }
        }
    });

    let (handle, worker) = xlat_core::spawn_from_config(&config, link.clone(), daemon, publisher)?;

    tracing::info!(
        clat = %handle.clat_interface(),
        daemon = %config.daemon.program,
        "xlatd reading events from stdin"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = run_feed(stdin, &link, &handle) => {
            let applied = result?;
            tracing::info!(applied, "event feed closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    handle.shutdown();
    let stats = worker.await?;
    // Last publisher reference went with the worker; closing the bus ends the printer.
    drop(bus);
    printer.await?;

    tracing::info!(?stats, "xlatd exiting");
    Ok(())
}
