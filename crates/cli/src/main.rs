mod args;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use verifier_engine::{
    BrokerConfig, ConfigError, Notifier, Publisher, ReconcilerConfig, ReconcilerError, RunError,
    RunLoop, RunOptions, SpoolPublisher, SpoolReconciler, VerifierConfig,
};
use verifier_storage::{
    ExistsFilter, ExistsStatus, InMemoryStorage, StorageError, StorageSeed, VerifierStorage,
};

use crate::args::Cli;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read fixtures {path}: {source}")]
    ReadFixtures {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid fixtures {path}: {source}")]
    ParseFixtures {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to open notification spool {path}: {source}")]
    Spool {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Reconciler(#[from] ReconcilerError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to start runtime: {0}")]
    Runtime(std::io::Error),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = match &cli.config {
        Some(path) => VerifierConfig::load(path)?,
        None => VerifierConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    rt.block_on(verify(cli, config))
}

async fn verify(cli: Cli, config: VerifierConfig) -> Result<(), CliError> {
    let storage = Arc::new(match &cli.fixtures {
        Some(path) => InMemoryStorage::from_seed(load_fixtures(path)?),
        None => InMemoryStorage::new(),
    });

    let mut run_loop = RunLoop::new(storage.clone(), RunOptions::from(&config));
    if config.reconcile {
        let reconciler_config = ReconcilerConfig::load(&config.reconciler_config).await?;
        info!(queue = %reconciler_config.queue_path.display(), "escalating failures to reconciler");
        run_loop = run_loop.with_reconciler(Arc::new(SpoolReconciler::new(reconciler_config)));
    }
    if let Some(broker) = config.broker.as_ref().filter(|_| config.enable_notifications) {
        run_loop = run_loop.with_notifier(notifier(broker).await?);
    }

    if config.run_once {
        let summary = run_loop.run_once().await?;
        println!(
            "queued: {}, succeeded: {}, errored: {}, escalated: {}",
            summary.queued, summary.succeeded, summary.errored, summary.escalated
        );
    } else {
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping");
                signal.cancel();
            }
        });
        run_loop.run(shutdown).await?;
    }

    if cli.report {
        report(storage.as_ref()).await?;
    }
    Ok(())
}

fn load_fixtures(path: &Path) -> Result<StorageSeed, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::ReadFixtures {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::ParseFixtures {
        path: path.to_path_buf(),
        source,
    })
}

async fn notifier(broker: &BrokerConfig) -> Result<Notifier, CliError> {
    let publisher: Box<dyn Publisher> = match &broker.spool_path {
        Some(path) => {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|source| CliError::Spool {
                    path: path.clone(),
                    source,
                })?;
            spool(file)
        }
        None => spool(tokio::io::stdout()),
    };
    info!(broker = %broker.display_url(), exchange = %broker.exchange_name, "publishing verified notifications");
    Ok(Notifier::new(
        publisher,
        broker.exchange(),
        broker.routing_keys.clone(),
    ))
}

fn spool<W: AsyncWrite + Unpin + Send + 'static>(writer: W) -> Box<dyn Publisher> {
    Box::new(SpoolPublisher::new(writer))
}

#[derive(Serialize)]
struct ReportLine<'a> {
    id: u64,
    instance: &'a str,
    status: ExistsStatus,
    fail_reason: Option<&'a str>,
}

/// Print the final status of every exists snapshot, one JSON line each.
async fn report(storage: &InMemoryStorage) -> Result<(), CliError> {
    let mut snapshot = storage.begin_snapshot().await?;
    let all = storage
        .list_exists(&mut snapshot, &ExistsFilter::default(), usize::MAX)
        .await?;
    storage.commit_snapshot(snapshot).await?;

    for exists in &all {
        let line = ReportLine {
            id: exists.id,
            instance: &exists.instance,
            status: exists.status,
            fail_reason: exists.fail_reason.as_deref(),
        };
        match serde_json::to_string(&line) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("error: failed to encode report line: {}", e),
        }
    }
    Ok(())
}
