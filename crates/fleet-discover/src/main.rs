//! CLI entry point for the fleet-discover inventory scanner.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use fleet_core::types::ConflictStatus;
use fleet_reconcile::ReconcileEngine;

use fleet_discover::batch::BatchRunner;
use fleet_discover::config::Settings;
use fleet_discover::request::{CredentialSets, ScanRequest};
use fleet_discover::scanner::NmapFingerprinter;
use fleet_discover::scheduler::{load_credentials, ScanScheduler};

#[derive(Parser)]
#[command(name = "fleet-discover")]
#[command(about = "Network device inventory scanner")]
struct Cli {
    /// Config file prefix (default: fleet).
    #[arg(short, long, default_value = "fleet", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one batch and print its report as JSON.
    Scan {
        /// Address, CIDR block, or dash range. Repeatable.
        #[arg(short, long = "target", required = true)]
        targets: Vec<String>,

        /// Credentials file (defaults to discover.credentials_file).
        #[arg(long)]
        credentials: Option<String>,

        /// Label recorded in the journal.
        #[arg(long, default_value = "adhoc")]
        label: String,
    },
    /// Run scheduled batches for every configured target group.
    Daemon,
    /// Print all asset records as JSON.
    Assets,
    /// Print open identity conflicts as JSON.
    Conflicts {
        /// Include resolved conflicts.
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;
    let store = settings.store.open().await?;
    tracing::info!(backend = ?settings.store.backend, "Asset store opened");

    match cli.command {
        Command::Scan {
            targets,
            credentials,
            label,
        } => {
            let runner = build_runner(&settings, store).await?;
            let credentials = match credentials.or(settings.discover.credentials_file.clone()) {
                Some(path) => load_credentials(&path)?,
                None => CredentialSets::default(),
            };
            let request = ScanRequest::new(targets).with_credentials(credentials);
            let report = runner.run(&label, &request).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Daemon => {
            let runner = Arc::new(build_runner(&settings, store).await?);
            let scheduler = ScanScheduler::new(&settings.discover, runner)?;
            scheduler.run().await?;
        }
        Command::Assets => {
            let assets = store.list_assets().await?;
            println!("{}", serde_json::to_string_pretty(&assets)?);
        }
        Command::Conflicts { all } => {
            let conflicts: Vec<_> = store
                .list_conflicts()
                .await?
                .into_iter()
                .filter(|c| all || c.status == ConflictStatus::Open)
                .collect();
            println!("{}", serde_json::to_string_pretty(&conflicts)?);
        }
    }

    Ok(())
}

async fn build_runner(
    settings: &Settings,
    store: Arc<dyn fleet_store::AssetStore>,
) -> anyhow::Result<BatchRunner> {
    if settings.discover.os_fingerprint {
        // Verify nmap installation.
        let nmap = NmapFingerprinter::new(
            &settings.discover.nmap_path,
            std::time::Duration::from_secs(settings.discover.fingerprint_timeout_secs),
        );
        let version = nmap.verify_installation().await?;
        tracing::info!(nmap_version = %version.lines().next().unwrap_or("").trim(), "Nmap verified");
    }
    let engine = ReconcileEngine::new(store, settings.reconcile.clone());
    Ok(BatchRunner::from_config(&settings.discover, engine))
}
