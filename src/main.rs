use anyhow::Result;
use clap::{Parser, Subcommand};
use report_archiver::config::{ArchiverConfig, LoggingConfig};
use report_archiver::storage::{MetadataPersistency, SqliteMetadataStore};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "report-archiver",
    about = "Archives finished execution reports from a remote reporting server",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file (else REPORT_ARCHIVER_CONFIG, then /etc)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (scheduler + health/info endpoints)
    Serve {
        /// Bind address, overriding the configuration
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a single archive cycle and wait for it to finish
    ArchiveOnce {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show which executions the next cycle would archive
    DryRun,

    /// List executions already archived locally
    Archived,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ArchiverConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting report-archiver daemon");
            report_archiver::serve(config).await?;
        }
        Commands::ArchiveOnce { json } => {
            let archiver = report_archiver::build_archiver(&config)?;
            if !archiver.is_enabled() {
                println!("Archiver is disabled (set archiver.enabled = true).");
                return Ok(());
            }
            match archiver.run_cycle().await? {
                None => {
                    println!("Archiver disabled itself; see the log for details.");
                }
                Some(report) if json => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                Some(report) => {
                    println!("\n=== Archive Cycle ===");
                    println!("Remote executions: {}", report.remote_executions);
                    println!("Selected:          {:?}", report.selected);
                    println!("Archived:          {:?}", report.archived);
                    for failure in &report.failures {
                        println!(" - execution {}: {}", failure.id, failure.reason);
                    }
                    println!("=====================\n");
                }
            }
        }
        Commands::DryRun => {
            let archiver = report_archiver::build_archiver(&config)?;
            let (remote, selected) = archiver.eligible_executions().await?;
            if selected.is_empty() {
                println!("Nothing to archive ({} remote executions).", remote);
            } else {
                println!("{:<8} | {:<12} | Tests", "Id", "Date");
                println!("{:-<8}-|-{:-<12}-|-{:-<6}", "", "", "");
                for e in selected {
                    println!("{:<8} | {:<12} | {}", e.id, e.date, e.num_of_tests);
                }
            }
        }
        Commands::Archived => {
            let store = SqliteMetadataStore::open(&config.storage.db_path)?;
            let executions = store.get_all()?;
            if executions.is_empty() {
                println!("No archived executions.");
            } else {
                println!("{:<8} | {:<12} | Dirty", "Id", "Date");
                println!("{:-<8}-|-{:-<12}-|-{:-<5}", "", "", "");
                for e in executions {
                    println!("{:<8} | {:<12} | {}", e.id, e.date, e.dirty);
                }
            }
        }
    }

    Ok(())
}
