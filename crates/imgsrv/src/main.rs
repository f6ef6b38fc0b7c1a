//! imgsrv: disk-image catalog server.
//!
//! Scans a directory tree of virtual-machine disk images on a timer,
//! reconciles a SQLite catalog with what it finds and serves the catalog
//! (and the image bytes themselves) over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use imgsrv::{logging, scanner, server, Config, Pipeline, Scanner, Synchronizer};
use imgsrv_db::CatalogDb;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "imgsrv", version, about = "Disk-image catalog server")]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "imgsrv.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = run(&args).await {
        eprintln!("imgsrv: {err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(args: &Args) -> Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("cannot load config {}", args.config.display()))?;

    logging::init(&config.log)?;

    let rules = config.driver_rules().context("invalid driver config")?;

    let db = match &config.store.database {
        Some(path) => CatalogDb::open(path).await?,
        None => CatalogDb::open_memory().await?,
    };

    let _pidfile = match &config.pidfile {
        Some(path) => Some(Pidfile::write(path)?),
        None => None,
    };

    let cancel = CancellationToken::new();
    let scanner = Arc::new(Scanner::new(
        config.store.root.clone(),
        rules,
        scanner::logging_sink(),
    ));
    let pipeline = Pipeline::new(
        scanner,
        Synchronizer::new(db.clone()),
        config.scan_interval(),
        cancel.clone(),
    );

    // Fill the catalog before the listener opens.
    pipeline.initial_load().await;
    let pipeline_task = tokio::spawn(pipeline.run());

    let listener = TcpListener::bind(config.net.listen)
        .await
        .with_context(|| format!("cannot listen on {}", config.net.listen))?;
    info!(addr = %config.net.listen, root = %config.store.root.display(), "imgsrv started");

    let server_task = tokio::spawn(server::serve(listener, db.clone(), cancel.clone()));

    shutdown_signal().await;
    info!("shutting down");
    cancel.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = server_task.await;
        let _ = pipeline_task.await;
    })
    .await;
    if drained.is_err() {
        warn!("shutdown timed out, exiting anyway");
    }

    db.close().await;
    Ok(())
}

/// Pidfile with startup write and drop-time removal.
struct Pidfile {
    path: PathBuf,
}

impl Pidfile {
    fn write(path: &Path) -> Result<Self> {
        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("cannot write pidfile {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for Pidfile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(error = %err, path = %self.path.display(), "pidfile removal failed");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
