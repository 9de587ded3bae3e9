// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! rayfarm render worker: listens on a Unix socket and computes column ranges.

use anyhow::{Context, Result};
use clap::Parser;
use rayfarm_app_core::config::ConfigService;
use rayfarm_app_core::prefs::{WorkerPrefs, WORKER_KEY};
use rayfarm_config_fs::FsConfigStore;
use rayfarm_proto::default_socket_path;
use rayfarm_worker::{serve, ProbeShader};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rayfarm-worker", about = "rayfarm render worker")]
struct Args {
    /// Unix socket to listen on (overrides saved prefs).
    #[arg(long)]
    socket: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset, e.g. `rayfarm_worker=debug`.
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config (best-effort)
    let config: Option<ConfigService<FsConfigStore>> =
        FsConfigStore::new().map(ConfigService::new).ok();
    let (prefs, provenance) = match &config {
        Some(cfg) => {
            let (prefs, provenance) = cfg.load_or_init::<WorkerPrefs>(WORKER_KEY);
            (prefs, Some(provenance))
        }
        None => (WorkerPrefs::default(), None),
    };

    let directive = args
        .log
        .or_else(|| prefs.log_filter.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&directive)
            .with_context(|| format!("invalid log filter `{directive}`"))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(?provenance, "worker prefs loaded");

    let socket_path = args
        .socket
        .or(prefs.socket_path)
        .unwrap_or_else(default_socket_path);

    // Remove stale socket if present
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;
    info!("render worker listening at {}", socket_path.display());

    serve(listener, Arc::new(ProbeShader)).await
}
