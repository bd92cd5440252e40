//! # docsync CLI
//!
//! The `docsync` binary indexes a document directory into a content store
//! and keeps the local ledger consistent with it.
//!
//! ## Usage
//!
//! ```bash
//! docsync --config ./config/docsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsync scan` | Reconcile the ledger with the store, then index new files |
//! | `docsync reindex` | Clear the ledger, then scan |
//! | `docsync index <path>` | Index one file |
//! | `docsync delete <filename>` | Remove a document from the store and the ledger |
//! | `docsync check <filename>` | Report whether a document is in the store and the ledger |
//! | `docsync status` | List stored documents and the chunk count |
//! | `docsync ledger` | Print every ledger entry |
//! | `docsync reconcile` | Repair the ledger from the store without scanning |
//! | `docsync reset` | Delete every chunk and clear the ledger |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use docsync::config;
use docsync::models::ProcessOutcome;
use docsync::progress::ProgressMode;
use docsync::scan::CancelFlag;
use docsync::service::{IndexService, StartupReport};

/// docsync: keep a document directory, a content store, and a local ledger
/// in agreement.
#[derive(Parser)]
#[command(
    name = "docsync",
    about = "Document indexing and deduplication with a self-repairing ledger",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsync.toml")]
    config: PathBuf,

    /// Scan progress on stderr: `off`, `human`, or `json`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the ledger with the store, then index every new file.
    Scan,

    /// Clear the ledger, then scan.
    ///
    /// Documents already in the store are re-recorded from the store
    /// listing, not re-indexed.
    Reindex,

    /// Index a single file.
    Index {
        /// File to index.
        path: PathBuf,

        /// Delete the document's existing chunks and index it again.
        #[arg(long)]
        force: bool,
    },

    /// Delete a document from the store and the ledger.
    Delete {
        /// Document filename (basename).
        filename: String,

        /// Also delete the file from the scan root.
        #[arg(long)]
        delete_file: bool,
    },

    /// Report whether a document is in the store and in the ledger.
    Check {
        /// Document filename (basename).
        filename: String,
    },

    /// List stored documents and the total chunk count.
    Status,

    /// Print every ledger entry as JSON.
    Ledger,

    /// Repair the ledger from the store without scanning.
    Reconcile,

    /// Delete every chunk in the store and clear the ledger.
    Reset,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docsync=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_startup(label: &str, report: &StartupReport) {
    let scan = &report.scan;
    println!("{}", label);
    println!("  ledger repaired: {}", report.reconcile.repaired);
    println!("  store documents: {}", report.reconcile.store_sources);
    if !report.reconcile.orphaned.is_empty() {
        println!("  orphaned ledger entries: {}", report.reconcile.orphaned.len());
    }
    println!("  discovered: {}", scan.discovered);
    println!("  new: {}", scan.new);
    if scan.drifted > 0 {
        println!("  re-indexed (changed): {}", scan.drifted);
    }
    println!("  skipped (ledger): {}", scan.skipped_ledger);
    println!("  skipped (store): {}", scan.skipped_store);
    println!("  no text: {}", scan.no_text);
    println!("  failed: {}", scan.failed);
    println!("  unsupported: {}", scan.unsupported);
    if scan.collisions > 0 {
        println!("  filename collisions: {}", scan.collisions);
    }
    if scan.dropped_chunks > 0 {
        println!("  dropped chunks: {}", scan.dropped_chunks);
    }
    if scan.cancelled {
        println!("cancelled");
    } else if scan.aborted {
        println!("aborted");
    } else {
        println!("ok");
    }
}

fn spawn_interrupt_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current file");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    let service = IndexService::open(&cfg).await?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Scan => {
            let cancel = CancelFlag::new();
            spawn_interrupt_handler(cancel.clone());
            let reporter = progress.reporter();
            let report = service.startup_scan(&cancel, reporter.as_ref()).await?;
            print_startup("scan", &report);
        }
        Commands::Reindex => {
            let cancel = CancelFlag::new();
            spawn_interrupt_handler(cancel.clone());
            let reporter = progress.reporter();
            let report = service.reindex_all(&cancel, reporter.as_ref()).await?;
            print_startup("reindex", &report);
        }
        Commands::Index { path, force } => {
            let upload = service.index_path(&path, force).await?;
            println!("index {}", upload.filename);
            match &upload.outcome {
                ProcessOutcome::Indexed(report) => {
                    println!("  chunks created: {}", report.chunks_created);
                    println!("  total chunks: {}", report.total_chunks);
                    if report.chunks_deleted > 0 {
                        println!("  chunks replaced: {}", report.chunks_deleted);
                    }
                    if report.truncated_chunks > 0 {
                        println!("  truncated chunks: {}", report.truncated_chunks);
                    }
                    if report.is_partial() {
                        println!("  dropped chunks: {}", report.dropped_chunk_ids.join(", "));
                    }
                    if let Some(extraction) = &report.extraction {
                        println!(
                            "  entities: {}, relationships: {}",
                            extraction.entities, extraction.relationships
                        );
                    }
                    println!("  content hash: {}", report.fingerprint);
                }
                ProcessOutcome::Skipped(reason) => {
                    println!("  skipped: {}", reason.as_str());
                }
            }
            println!("ok");
        }
        Commands::Delete {
            filename,
            delete_file,
        } => {
            let report = service.delete_document(&filename, delete_file).await?;
            println!("delete {}", filename);
            println!("  chunks deleted: {}", report.chunks_deleted);
            println!("  ledger entries removed: {}", report.ledger_entries_removed);
            if delete_file {
                println!("  file deleted: {}", report.file_deleted);
            }
            println!("ok");
        }
        Commands::Check { filename } => {
            let status = service.check_indexed(&filename).await?;
            println!("check {}", status.filename);
            println!("  in store: {}", status.in_store);
            println!("  in ledger: {}", status.in_ledger);
        }
        Commands::Status => {
            let status = service.store_status().await?;
            println!("status");
            println!("  documents: {}", status.documents.len());
            println!("  total chunks: {}", status.total_chunks);
            if status.truncated {
                println!("  (listing truncated)");
            }
            for name in &status.documents {
                println!("  - {}", name);
            }
        }
        Commands::Ledger => {
            let entries = service.ledger_entries();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Reconcile => {
            let report = service.reconcile().await?;
            println!("reconcile");
            println!("  ledger repaired: {}", report.repaired);
            println!("  store documents: {}", report.store_sources);
            println!("  orphaned ledger entries: {}", report.orphaned.len());
            for key in &report.orphaned {
                println!("  - {}", key);
            }
            println!("ok");
        }
        Commands::Reset => {
            let report = service.reset().await?;
            println!("reset");
            println!("  chunks deleted: {}", report.chunks_deleted);
            println!("  ledger entries cleared: {}", report.ledger_entries_cleared);
            println!("ok");
        }
    }

    Ok(())
}
