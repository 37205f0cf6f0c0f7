// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! offsyncd - the offline-first sync daemon.
//!
//! Keeps a durable queue of local writes in `<state_dir>/offsync.db`, syncs
//! it with a WebSocket remote whenever the heartbeat says the remote is
//! reachable, and listens on a Unix socket for requests from the
//! application.
//!
//! Usage:
//!   offsyncd [--state-dir <path>] [--config <path>] [--verbose]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tokio::net::UnixListener;

use offsync_core::{ClockSource, SqliteStore, SyncEngine, SyncWorker, SystemClock};

mod config;
mod env;
mod error;
mod ipc;
mod probe;
mod remote;
#[cfg(test)]
mod test_helpers;
mod transport;

use config::{DaemonConfig, CONFIG_FILE_NAME};
use error::{Error, Result};
use remote::WebSocketRemote;

/// Socket filename within daemon directory.
const SOCKET_NAME: &str = "daemon.sock";
/// PID filename within daemon directory.
const PID_NAME: &str = "daemon.pid";
/// Lock filename for single instance guarantee.
const LOCK_NAME: &str = "daemon.lock";
/// Database filename within daemon directory.
const DB_NAME: &str = "offsync.db";

/// offsyncd: offline-first sync daemon
#[derive(Parser, Debug)]
#[command(name = "offsyncd", version)]
#[command(about = "Queues local writes durably and syncs them with a remote")]
struct Args {
    /// State directory (database, socket, logs)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Config file (default: <state-dir>/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let state_dir = args.state_dir.clone().unwrap_or_else(default_state_dir);

    if let Err(e) = fs::create_dir_all(&state_dir) {
        eprintln!("error: cannot create state directory {}: {}", state_dir.display(), e);
        std::process::exit(1);
    }
    setup_logging(&state_dir.join("daemon.log"), args.verbose);
    tracing::info!(state_dir = %state_dir.display(), "offsyncd starting");

    if let Err(e) = run(&args, &state_dir).await {
        tracing::error!(error = %e, "offsyncd failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
    tracing::info!("offsyncd stopped");
}

async fn run(args: &Args, state_dir: &Path) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(|| state_dir.join(CONFIG_FILE_NAME));
    let mut config = DaemonConfig::load(&config_path)?;
    if let Some(url) = env::remote_url() {
        config.remote.url = url;
    }
    config.validate()?;

    // Held for the life of the process
    let _lock = acquire_lock(&state_dir.join(LOCK_NAME))?;
    let pid_path = state_dir.join(PID_NAME);
    fs::write(&pid_path, std::process::id().to_string())?;
    let socket_path = state_dir.join(SOCKET_NAME);

    let result = serve(config, state_dir, &socket_path).await;
    cleanup(&pid_path, &socket_path);
    result
}

async fn serve(config: DaemonConfig, state_dir: &Path, socket_path: &Path) -> Result<()> {
    let store = Arc::new(SqliteStore::open(&state_dir.join(DB_NAME))?);
    let remote = Arc::new(WebSocketRemote::new(
        config.remote.url.clone(),
        config.remote.connect_timeout(),
        config.remote.heartbeat_timeout(),
    ));
    let clock: Arc<dyn ClockSource> = Arc::new(SystemClock);
    let engine =
        Arc::new(SyncEngine::open(store, Arc::clone(&remote), clock, config.engine.clone())?);
    let shutdown = engine.shutdown_token().child_token();

    // Remove stale socket if it exists
    let _ = fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    tracing::info!(socket = %socket_path.display(), remote = %config.remote.url, "listening");

    let worker = SyncWorker::spawn(Arc::clone(&engine));
    let probe = probe::spawn(
        Arc::clone(&remote),
        Arc::clone(&engine),
        config.remote.heartbeat_interval(),
        shutdown.clone(),
    );
    let info = Arc::new(ipc::DaemonInfo {
        started_at: Utc::now(),
        remote_url: config.remote.url.clone(),
    });
    let server = tokio::spawn(ipc::serve(listener, Arc::clone(&engine), info, shutdown.clone()));

    // Signal readiness to parent process
    println!("READY");
    let _ = std::io::stdout().flush();

    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = shutdown_signal() => {
            tracing::info!("signal received, shutting down");
            shutdown.cancel();
        }
    }

    if !worker.shutdown(config.engine.shutdown_grace()).await {
        tracing::warn!(
            pending = engine.queue_len(),
            "sync worker did not stop in time; unsettled operations resume on next start"
        );
    }
    let _ = probe.await;
    let _ = server.await;
    remote.disconnect().await;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = term.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

fn default_state_dir() -> PathBuf {
    if let Some(dir) = env::state_dir() {
        return dir;
    }
    if let Some(dir) = env::xdg_state_home() {
        return dir.join("offsync");
    }
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
        .map(|d| d.join("offsync"))
        .unwrap_or_else(|| PathBuf::from(".local/state/offsync"))
}

fn setup_logging(log_path: &Path, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Try to open log file, fall back to stderr
    if let Ok(file) = fs::OpenOptions::new().create(true).append(true).open(log_path) {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(file).with_ansi(false).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }
}

fn acquire_lock(lock_path: &Path) -> Result<fs::File> {
    use fs2::FileExt;

    let file = fs::OpenOptions::new().create(true).write(true).truncate(true).open(lock_path)?;
    file.try_lock_exclusive().map_err(|_| Error::AlreadyRunning)?;
    Ok(file)
}

fn cleanup(pid_path: &Path, socket_path: &Path) {
    let _ = fs::remove_file(pid_path);
    let _ = fs::remove_file(socket_path);
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
