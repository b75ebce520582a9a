//! UDS JSON-RPC client for CLI subcommands.

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub(crate) async fn rpc_call(socket_path: &str, method: &str, params: Value) -> anyhow::Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// `meetsync status`: human-readable summary.
pub async fn cmd_status(socket_path: &str) -> anyhow::Result<()> {
    let status = rpc_call(socket_path, "status", json!({})).await?;
    print!("{}", format_status(&status));
    Ok(())
}

pub async fn cmd_heartbeat(
    socket_path: &str,
    enabled: bool,
    interval_minutes: Option<u64>,
) -> anyhow::Result<()> {
    let result = rpc_call(
        socket_path,
        "set_heartbeat",
        json!({"enabled": enabled, "interval_minutes": interval_minutes}),
    )
    .await?;
    if result["enabled"].as_bool() == Some(true) {
        println!("heartbeat on (every {} min)", result["interval_minutes"]);
    } else {
        println!("heartbeat off");
    }
    Ok(())
}

pub async fn cmd_integration(socket_path: &str, enabled: bool) -> anyhow::Result<()> {
    rpc_call(socket_path, "set_integration", json!({"enabled": enabled})).await?;
    println!("presence integration {}", if enabled { "on" } else { "off" });
    Ok(())
}

/// Pure formatting for `status`, separated for testability.
pub(crate) fn format_status(status: &Value) -> String {
    let mut out = String::new();
    let present = status["present_count"].as_u64().unwrap_or(0);
    out.push_str(&format!(
        "presence: {}\n",
        if present > 0 {
            format!("in a meeting ({present} observer(s))")
        } else {
            "idle".to_string()
        }
    ));

    if let Some(observers) = status["observers"].as_object() {
        for (id, entry) in observers {
            let state = if entry["present"].as_bool() == Some(true) {
                "present"
            } else {
                "idle"
            };
            let room = entry["room"].as_str().unwrap_or("-");
            let label = entry["label"]["text"].as_str().unwrap_or("");
            out.push_str(&format!("  obs-{id:<4} {state:<8} {room:<14} {label}\n"));
        }
    }

    let on_off = |v: &Value| if v.as_bool() == Some(true) { "on" } else { "off" };
    out.push_str(&format!(
        "integration: {}\n",
        on_off(&status["integration_enabled"])
    ));
    let heartbeat = &status["heartbeat"];
    out.push_str(&format!(
        "heartbeat: {} (every {} min)\n",
        on_off(&heartbeat["running"]),
        heartbeat["interval_minutes"]
    ));
    if status["credentials_valid"].as_bool() == Some(false) {
        out.push_str("credentials: rejected by status service\n");
    }
    if status["pending_clear"].as_bool() == Some(true) {
        out.push_str("pending: clear will be retried\n");
    }
    out
}
