//! UDS JSON-RPC server: the control surface for observer bridges and the CLI.
//! Connection-per-request, newline-delimited JSON.

use std::sync::Arc;

use meetsync_core::{EnvironmentSnapshot, ObserverId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use crate::engine::{EngineError, PresenceEngine};

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const ENGINE_ERROR: i64 = -32000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn invalid_params(e: impl std::fmt::Display) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: format!("invalid params: {e}"),
        }
    }

    fn from_serialize(e: &serde_json::Error) -> Self {
        Self {
            code: ENGINE_ERROR,
            message: format!("failed to encode result: {e}"),
        }
    }
}

impl From<EngineError> for RpcError {
    fn from(e: EngineError) -> Self {
        Self {
            code: ENGINE_ERROR,
            message: e.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ObserverParams {
    observer_id: ObserverId,
}

#[derive(Deserialize)]
struct SnapshotParams {
    observer_id: ObserverId,
    snapshot: EnvironmentSnapshot,
}

#[derive(Deserialize)]
struct HeartbeatParams {
    enabled: bool,
    #[serde(default)]
    interval_minutes: Option<u64>,
}

#[derive(Deserialize)]
struct IntegrationParams {
    enabled: bool,
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(RpcError::invalid_params)
}

/// Run the UDS JSON-RPC server.
pub async fn run_server(socket_path: &str, engine: Arc<PresenceEngine>) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");

    loop {
        let (stream, _) = listener.accept().await?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, engine).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    engine: Arc<PresenceEngine>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: Value = serde_json::from_str(line.trim())?;
    let method = request["method"].as_str().unwrap_or("").to_string();
    let id = request["id"].clone();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let response = match dispatch(&engine, &method, params).await {
        Ok(result) => json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id,
        }),
        Err(e) => {
            tracing::debug!(method = %method, code = e.code, "rpc error: {}", e.message);
            json!({
                "jsonrpc": "2.0",
                "error": {"code": e.code, "message": e.message},
                "id": id,
            })
        }
    };

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

/// Route one request to the engine.
pub async fn dispatch(
    engine: &PresenceEngine,
    method: &str,
    params: Value,
) -> Result<Value, RpcError> {
    let ok = || json!({"ok": true});
    match method {
        "register_observer" => {
            let id = engine.register_observer().await?;
            Ok(json!({"observer_id": id}))
        }
        "snapshot" => {
            let p: SnapshotParams = parse(params)?;
            engine.push_snapshot(p.observer_id, p.snapshot).await?;
            Ok(ok())
        }
        "mutation" => {
            let p: ObserverParams = parse(params)?;
            engine.notify_mutation(p.observer_id).await?;
            Ok(ok())
        }
        "unload" => {
            let p: ObserverParams = parse(params)?;
            engine.unload(p.observer_id).await?;
            Ok(ok())
        }
        "teardown_observer" => {
            let p: ObserverParams = parse(params)?;
            engine.teardown_observer(p.observer_id).await?;
            Ok(ok())
        }
        "set_heartbeat" => {
            let p: HeartbeatParams = parse(params)?;
            let status = engine.set_heartbeat(p.enabled, p.interval_minutes)?;
            serde_json::to_value(status).map_err(|e| RpcError::from_serialize(&e))
        }
        "set_integration" => {
            let p: IntegrationParams = parse(params)?;
            engine.set_integration(p.enabled)?;
            Ok(json!({"enabled": p.enabled}))
        }
        "retry_pending" => {
            engine.retry_pending();
            Ok(ok())
        }
        "status" => {
            let status = engine.status().await?;
            serde_json::to_value(status).map_err(|e| RpcError::from_serialize(&e))
        }
        _ => Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: "method not found".to_string(),
        }),
    }
}
