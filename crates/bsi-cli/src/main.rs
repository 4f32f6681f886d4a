// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bulk-scan ingestion pipeline binary.
//!
//! Wires the filesystem blob store, the in-memory envelope store, and the
//! HTTP document client into the three scheduled drivers. `run` starts
//! everything; the per-driver subcommands execute a single tick (or their
//! own loop with `--loop`), which is handy for operations and debugging.

use anyhow::{Context, Result};
use bsi_blob::FsBlobStore;
use bsi_config::{IngestConfig, SignatureAlgorithm, load_config};
use bsi_docstore::HttpDocumentClient;
use bsi_notify::{ErrorNotifier, MemoryNotificationBus};
use bsi_runtime::drivers::{shutdown_channel, spawn_periodic};
use bsi_runtime::{CompletionSweeper, DocumentUploader, IngestionCoordinator};
use bsi_store::MemoryEnvelopeStore;
use bsi_verify::ZipVerifier;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "bsi", about = "Bulk-scan ingestion pipeline", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root directory holding one subdirectory per blob container.
    #[arg(long, global = true, default_value = "./containers")]
    blob_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run all scheduled drivers until interrupted.
    Run,
    /// Run the ingestion coordinator.
    Ingest {
        /// Keep running on the configured interval instead of one tick.
        #[arg(long = "loop")]
        run_loop: bool,
    },
    /// Run the document uploader.
    Upload {
        /// Keep running on the configured interval instead of one tick.
        #[arg(long = "loop")]
        run_loop: bool,
    },
    /// Run the completion sweeper.
    Sweep {
        /// Keep running on the configured interval instead of one tick.
        #[arg(long = "loop")]
        run_loop: bool,
    },
}

struct Pipeline {
    config: Arc<IngestConfig>,
    coordinator: Arc<IngestionCoordinator>,
    uploader: Option<Arc<DocumentUploader>>,
    sweeper: Arc<CompletionSweeper>,
}

fn init_tracing(config: &IngestConfig) {
    let default = config.log_level.as_deref().unwrap_or("info");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

fn build_verifier(config: &IngestConfig) -> Result<ZipVerifier> {
    match config.signature.algorithm {
        SignatureAlgorithm::None => {
            warn!(target: "bsi.cli", "signature verification disabled (test profile)");
            Ok(ZipVerifier::disabled())
        }
        SignatureAlgorithm::Sha256WithRsa => {
            let key = config
                .load_public_key()?
                .context("sha256withrsa requires a public key")?;
            ZipVerifier::sha256_with_rsa(&key).context("invalid signature public key")
        }
    }
}

fn build_pipeline(config: IngestConfig, blob_root: &PathBuf) -> Result<Pipeline> {
    let config = Arc::new(config);
    let containers: Vec<String> = config.containers.iter().map(|c| c.name.clone()).collect();

    let gateway = Arc::new(
        FsBlobStore::new(blob_root.clone(), containers).context("failed to open blob root")?,
    );
    let store = Arc::new(MemoryEnvelopeStore::new());
    let verifier = Arc::new(build_verifier(&config)?);
    let bus = Arc::new(MemoryNotificationBus::new());

    let coordinator = Arc::new(IngestionCoordinator::new(
        gateway.clone(),
        store.clone(),
        verifier.clone(),
        ErrorNotifier::new(bus),
        config.clone(),
    ));

    let uploader = match &config.document_store {
        Some(docs) => {
            let client = Arc::new(HttpDocumentClient::new(
                docs.url.clone(),
                Duration::from_millis(docs.timeout_ms),
            ));
            Some(Arc::new(DocumentUploader::new(
                gateway.clone(),
                store.clone(),
                verifier,
                client,
                config.clone(),
            )))
        }
        None => {
            warn!(target: "bsi.cli", "no document store configured; uploader disabled");
            None
        }
    };

    let sweeper = Arc::new(CompletionSweeper::new(gateway, store, config.clone()));

    Ok(Pipeline {
        config,
        coordinator,
        uploader,
        sweeper,
    })
}

/// Run the given driver handles until ctrl-c, then stop them cleanly.
async fn wait_for_interrupt(
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
) -> Result<()> {
    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!(target: "bsi.cli", "shutting down");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

fn spawn_driver<F, Fut>(
    name: &'static str,
    delay_ms: u64,
    shutdown: tokio::sync::watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    spawn_periodic(name, Duration::from_millis(delay_ms), shutdown, tick)
}

async fn run_all(pipeline: &Pipeline) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let scheduling = &pipeline.config.scheduling;
    let mut handles = Vec::new();

    let coordinator = pipeline.coordinator.clone();
    handles.push(spawn_driver(
        "ingest",
        scheduling.ingestion_interval_ms,
        shutdown_rx.clone(),
        move || {
            let coordinator = coordinator.clone();
            async move {
                coordinator.run_once().await;
            }
        },
    ));

    if let Some(uploader) = pipeline.uploader.clone() {
        handles.push(spawn_driver(
            "upload",
            scheduling.upload_interval_ms,
            shutdown_rx.clone(),
            move || {
                let uploader = uploader.clone();
                async move {
                    uploader.run_once().await;
                }
            },
        ));
    }

    let sweeper = pipeline.sweeper.clone();
    handles.push(spawn_driver(
        "sweep",
        scheduling.sweep_interval_ms,
        shutdown_rx,
        move || {
            let sweeper = sweeper.clone();
            async move {
                sweeper.run_once().await;
            }
        },
    ));

    wait_for_interrupt(shutdown_tx, handles).await
}

async fn run_single<F, Fut>(name: &'static str, delay_ms: u64, tick: F) -> Result<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let handle = spawn_driver(name, delay_ms, shutdown_rx, tick);
    wait_for_interrupt(shutdown_tx, vec![handle]).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    config.validate()?;
    init_tracing(&config);

    let pipeline = build_pipeline(config, &cli.blob_root)?;

    match cli.command {
        Command::Run => run_all(&pipeline).await?,
        Command::Ingest { run_loop } => {
            if run_loop {
                let coordinator = pipeline.coordinator.clone();
                run_single(
                    "ingest",
                    pipeline.config.scheduling.ingestion_interval_ms,
                    move || {
                        let coordinator = coordinator.clone();
                        async move {
                            coordinator.run_once().await;
                        }
                    },
                )
                .await?;
            } else {
                let summary = pipeline.coordinator.run_once().await;
                info!(target: "bsi.cli", ?summary, "ingestion finished");
            }
        }
        Command::Upload { run_loop } => {
            let uploader = pipeline
                .uploader
                .clone()
                .context("document_store must be configured for upload")?;
            if run_loop {
                run_single(
                    "upload",
                    pipeline.config.scheduling.upload_interval_ms,
                    move || {
                        let uploader = uploader.clone();
                        async move {
                            uploader.run_once().await;
                        }
                    },
                )
                .await?;
            } else {
                let summary = uploader.run_once().await;
                info!(target: "bsi.cli", ?summary, "upload finished");
            }
        }
        Command::Sweep { run_loop } => {
            if run_loop {
                let sweeper = pipeline.sweeper.clone();
                run_single(
                    "sweep",
                    pipeline.config.scheduling.sweep_interval_ms,
                    move || {
                        let sweeper = sweeper.clone();
                        async move {
                            sweeper.run_once().await;
                        }
                    },
                )
                .await?;
            } else {
                let summary = pipeline.sweeper.run_once().await;
                info!(target: "bsi.cli", ?summary, "sweep finished");
            }
        }
    }
    Ok(())
}
