//! Daemon entry: build the client, store and engine, serve until signalled.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use meetsync_status::{
    HttpStatusClient, HttpStatusClientConfig, PresenceServiceClient, RecordingClient,
};

use crate::config::{ConfigStore, PresenceConfig, TOKEN_ENV};
use crate::engine::PresenceEngine;
use crate::server;
use crate::store::SqliteStore;

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub config_path: PathBuf,
    pub state_db: PathBuf,
    pub socket_path: String,
    /// Log status calls instead of sending them.
    pub dry_run: bool,
}

/// Pick the status client: HTTP when a service is configured, otherwise a
/// recording client that only logs.
pub fn build_client(
    config: &PresenceConfig,
    dry_run: bool,
) -> anyhow::Result<Arc<dyn PresenceServiceClient>> {
    let base_url = match (&config.service.base_url, dry_run) {
        (Some(url), false) => url.clone(),
        (_, true) => {
            tracing::info!("dry-run: status calls are logged, not sent");
            return Ok(Arc::new(RecordingClient::new()));
        }
        (None, false) => {
            tracing::warn!("no service.base_url configured; running in dry-run mode");
            return Ok(Arc::new(RecordingClient::new()));
        }
    };

    let mut http = HttpStatusClientConfig::new(base_url);
    http.timeout_ms = config.service.timeout_ms;
    match std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty()) {
        Some(token) => http = http.with_token(token),
        None => tracing::warn!("{TOKEN_ENV} is not set; requests will be unauthenticated"),
    }
    Ok(Arc::new(HttpStatusClient::new(http)?))
}

/// Run the daemon: engine plus UDS server, until ctrl-c or SIGTERM.
pub async fn run_daemon(opts: DaemonOptions) -> anyhow::Result<()> {
    let config = Arc::new(ConfigStore::load(&opts.config_path)?);
    let client = build_client(&config.current(), opts.dry_run)?;
    let store = Arc::new(SqliteStore::open(&opts.state_db)?);
    tracing::info!(
        config = %opts.config_path.display(),
        state_db = %opts.state_db.display(),
        "state loaded"
    );

    let engine = Arc::new(PresenceEngine::start(client, store, config).await);

    let server_engine = Arc::clone(&engine);
    let server_socket = opts.socket_path.clone();
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_engine).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
        Ok::<(), std::io::Error>(())
    };

    tokio::select! {
        result = shutdown => result?,
        _ = &mut server_handle => {
            tracing::warn!("UDS server exited unexpectedly");
        }
    }

    server_handle.abort();
    engine.shutdown().await;
    remove_socket(Path::new(&opts.socket_path));
    tracing::info!("daemon stopped");
    Ok(())
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("removed socket at {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("failed to remove socket at {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_wins_over_base_url() {
        let config = PresenceConfig {
            service: crate::config::ServiceConfig {
                base_url: Some("https://status.example.com".into()),
                ..Default::default()
            },
            ..PresenceConfig::default()
        };
        assert!(build_client(&config, true).is_ok());
    }

    #[test]
    fn missing_base_url_falls_back_to_dry_run() {
        assert!(build_client(&PresenceConfig::default(), false).is_ok());
    }
}
