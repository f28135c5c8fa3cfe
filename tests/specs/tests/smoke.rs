// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `switchyard` binary.

use std::io::Read;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use switchyard_specs::{http_get, BrokerProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

// -- HTTP ---------------------------------------------------------------------

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let broker = BrokerProcess::start(json!({}))?;
    broker.wait_healthy(TIMEOUT).await?;

    let (status, body) = http_get(broker.port(), "/api/v1/health").await?;
    assert!(status.contains("200"), "{status}");
    let resp: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(resp["status"], "running");
    assert_eq!(resp["agent"], "ws");
    assert_eq!(resp["connections"], 0);

    Ok(())
}

// -- WebSocket ----------------------------------------------------------------

#[tokio::test]
async fn ws_text_ping() -> anyhow::Result<()> {
    let broker = BrokerProcess::start(json!({}))?;
    broker.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(broker.ws_url()).await?;
    ws.send(Message::Text("PING".into())).await?;

    let msg = tokio::time::timeout(TIMEOUT, ws.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
    assert_eq!(msg, Message::Text("PONG".into()));

    Ok(())
}

#[tokio::test]
async fn ws_list_agents() -> anyhow::Result<()> {
    let broker = BrokerProcess::start(json!({"defaultAgent": "hub"}))?;
    broker.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(broker.ws_url()).await?;
    ws.send(Message::Text(r#"{"tag":"l1","cmd":"list","args":["agents"]}"#.into())).await?;

    let msg = tokio::time::timeout(TIMEOUT, ws.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
    let text = match msg {
        Message::Text(t) => t.to_string(),
        other => anyhow::bail!("expected text ws message, got: {other:?}"),
    };
    let batch: Vec<String> = serde_json::from_str(&text)?;
    let reply: serde_json::Value = serde_json::from_str(&batch[0])?;
    assert_eq!(reply, json!({"status": "ok", "tag": "l1", "result": {"hub": "broker", "ws": "socket"}}));

    Ok(())
}

// -- Lifecycle ----------------------------------------------------------------

#[tokio::test]
async fn interrupt_shuts_down_cleanly() -> anyhow::Result<()> {
    let mut broker = BrokerProcess::start(json!({}))?;
    broker.wait_healthy(TIMEOUT).await?;

    broker.interrupt()?;
    let status = broker.wait_exit(TIMEOUT).await?;
    assert!(status.success(), "{status}");

    Ok(())
}

#[test]
fn missing_config_file_is_fatal() -> anyhow::Result<()> {
    let mut child = BrokerProcess::spawn_raw(&["--config", "/nonexistent/switchyard.json"])?;
    let status = child.wait()?;
    assert!(!status.success());

    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        pipe.read_to_string(&mut stderr)?;
    }
    assert!(stderr.contains("/nonexistent/switchyard.json"), "{stderr}");
    Ok(())
}

#[test]
fn config_without_router_is_fatal() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("switchyard.json");
    std::fs::write(&path, r#"{"ws": {"type": "socket", "port": 0}}"#)?;
    let path = path.to_string_lossy().into_owned();

    let mut child = BrokerProcess::spawn_raw(&["--config", &path])?;
    let status = child.wait()?;
    assert!(!status.success());
    Ok(())
}
