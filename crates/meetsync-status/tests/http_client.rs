use meetsync_core::StatusValue;
use meetsync_status::{HttpStatusClient, HttpStatusClientConfig, PresenceServiceClient, StatusError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve exactly one HTTP exchange with a canned response; resolves to the raw request.
async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.expect("read");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + len {
                    break;
                }
            }
        }

        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        stream
            .write_all(response.as_bytes())
            .await
            .expect("write response");
        String::from_utf8_lossy(&buf).to_string()
    });

    (format!("http://{addr}"), handle)
}

fn client(base_url: &str) -> HttpStatusClient {
    HttpStatusClient::new(HttpStatusClientConfig::new(base_url).with_token("xoxp-test"))
        .expect("status client")
}

#[tokio::test]
async fn set_status_puts_json_with_bearer() {
    let (base, server) = serve_once("200 OK", r#"{"ok":true}"#).await;
    client(&base)
        .set_status(StatusValue::Dnd)
        .await
        .expect("set status");

    let request = server.await.expect("server task");
    assert!(request.starts_with("PUT /v1/status HTTP/1.1"), "{request}");
    assert!(
        request.to_ascii_lowercase().contains("authorization: bearer xoxp-test"),
        "{request}"
    );
    assert!(request.contains(r#"{"status":"dnd"}"#), "{request}");
}

#[tokio::test]
async fn custom_status_sends_normalized_emoji() {
    let (base, server) = serve_once("200 OK", r#"{"ok":true}"#).await;
    client(&base)
        .set_custom_status("In a meeting (Weekly Sync)", ":calendar:", 1800)
        .await
        .expect("set custom status");

    let request = server.await.expect("server task");
    assert!(request.starts_with("PUT /v1/custom-status"), "{request}");
    assert!(
        request.contains(
            r#"{"text":"In a meeting (Weekly Sync)","emoji":"calendar","duration_seconds":1800}"#
        ),
        "{request}"
    );
}

#[tokio::test]
async fn clear_sends_delete_and_accepts_empty_body() {
    let (base, server) = serve_once("204 No Content", "").await;
    client(&base)
        .clear_custom_status()
        .await
        .expect("clear custom status");

    let request = server.await.expect("server task");
    assert!(request.starts_with("DELETE /v1/custom-status"), "{request}");
}

#[tokio::test]
async fn unauthorized_surfaces_as_auth_error() {
    let (base, server) = serve_once("401 Unauthorized", r#"{"ok":false,"error":"invalid_auth"}"#).await;
    let err = client(&base)
        .set_status(StatusValue::Online)
        .await
        .expect_err("auth failure");
    server.await.expect("server task");

    assert!(err.is_auth_error(), "{err}");
}

#[tokio::test]
async fn revoked_token_in_envelope_is_auth_error() {
    let (base, server) = serve_once("200 OK", r#"{"ok":false,"error":"token_revoked"}"#).await;
    let err = client(&base)
        .clear_custom_status()
        .await
        .expect_err("revoked");
    server.await.expect("server task");

    assert!(matches!(err, StatusError::Auth { ref reason } if reason == "token_revoked"));
}
