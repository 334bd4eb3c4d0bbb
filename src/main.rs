// src/main.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use netscan_rs::core::adapters::SystemRunner;
use netscan_rs::core::aggregate;
use netscan_rs::core::export;
use netscan_rs::core::importers;
use netscan_rs::core::pipeline::ScanContext;
use netscan_rs::core::progress::ProgressRegistry;
use netscan_rs::core::scheduler;
use netscan_rs::core::store::{SqliteStore, Store};
use netscan_rs::core::targets::expand_targets;
use netscan_rs::logging;

const RDAP_ENDPOINT: &str = "https://rdap.org/ip";

#[derive(Parser)]
#[command(name = "netscan-rs", about = "Concurrent network scan orchestrator", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the scan database. Defaults to scans.db under the data dir.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch scan against a target specification
    /// (IP, hostname, CIDR, or a comma-separated mix).
    Scan {
        target: String,

        /// Disable the safe-mode flag on the scan record.
        #[arg(long)]
        no_safe: bool,

        /// Worker pool size (1-32).
        #[arg(long, default_value_t = 8)]
        workers: usize,

        /// Directory for tool reports and the batch manifest.
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },
    /// Print the one-line assessment for a finished scan.
    Summary { scan_id: String },
    /// Import findings from a .nessus XML report into a scan.
    ImportNessus { scan_id: String, path: PathBuf },
    /// Import alerts from a ZAP JSON report, attached to one scan host.
    ImportZap {
        scan_id: String,
        path: PathBuf,
        host_ip: String,
    },
    /// Print all findings of a scan as JSON, grouped by host.
    ExportJson { scan_id: String },
    /// Print all findings of a scan as CSV, one row per finding.
    ExportCsv { scan_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::initialize_logging()?;

    let cli = Cli::parse();
    let db_path = cli
        .db
        .unwrap_or_else(|| logging::get_data_dir().join("scans.db"));
    let store = Arc::new(SqliteStore::open(&db_path)?);

    match cli.command {
        Commands::Scan {
            target,
            no_safe,
            workers,
            artifacts,
        } => {
            let targets = expand_targets(&target)?;

            let artifacts_dir =
                artifacts.unwrap_or_else(|| logging::get_data_dir().join("runs"));
            std::fs::create_dir_all(&artifacts_dir)?;

            let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
                Ok(r) => r,
                Err(_) => {
                    TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
                }
            };

            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .danger_accept_invalid_certs(true)
                .build()?;

            let ctx = ScanContext {
                store,
                runner: Arc::new(SystemRunner),
                resolver: Arc::new(resolver),
                http,
                artifacts_dir,
                safe_mode: !no_safe,
                rdap_endpoint: Some(RDAP_ENDPOINT.to_string()),
            };

            let registry = ProgressRegistry::new();
            let scan_id = uuid::Uuid::new_v4().to_string();
            let manifest =
                scheduler::run_batch(ctx, &registry, &scan_id, &target, targets, workers).await?;

            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        Commands::Summary { scan_id } => {
            let scan = store
                .get_scan(&scan_id)?
                .ok_or_else(|| eyre!("unknown scan: {}", scan_id))?;
            println!("{}", aggregate::assessment_line(&scan));
        }
        Commands::ImportNessus { scan_id, path } => {
            let xml = std::fs::read_to_string(&path)?;
            let count = importers::import_nessus(store.as_ref(), &scan_id, &xml)?;
            println!("Imported {count} findings from Nessus.");
        }
        Commands::ImportZap {
            scan_id,
            path,
            host_ip,
        } => {
            let json = std::fs::read_to_string(&path)?;
            let count = importers::import_zap(store.as_ref(), &scan_id, &host_ip, &json)?;
            println!("Imported {count} ZAP alerts.");
        }
        Commands::ExportJson { scan_id } => {
            let value = export::findings_json(store.as_ref(), &scan_id)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::ExportCsv { scan_id } => {
            print!("{}", export::findings_csv(store.as_ref(), &scan_id)?);
        }
    }

    Ok(())
}
