// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `switchyard` binary with a generated agent configuration
//! and exercises it over HTTP and WebSocket.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Resolve the path to the compiled `switchyard` binary.
pub fn switchyard_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("switchyard")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Make a raw HTTP/1.1 GET request, returning the status line and body.
pub async fn http_get(port: u16, path: &str) -> anyhow::Result<(String, String)> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8(buf)?;

    let status = response.lines().next().unwrap_or_default().to_owned();
    let body = response.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("").to_owned();
    Ok((status, body))
}

/// A running `switchyard` process that is killed on drop.
pub struct BrokerProcess {
    child: Child,
    port: u16,
    _config_dir: tempfile::TempDir,
}

impl BrokerProcess {
    /// Spawn a broker with a router named `hub` and a socket agent named `ws`.
    ///
    /// `socket` is merged into the socket agent's options.
    pub fn start(socket: serde_json::Value) -> anyhow::Result<Self> {
        let binary = switchyard_binary();
        anyhow::ensure!(binary.exists(), "switchyard binary not found at {}", binary.display());

        let port = free_port()?;
        let mut ws = serde_json::json!({"type": "socket", "host": "127.0.0.1", "port": port, "batchIntervalMs": 5});
        if let (Some(base), serde_json::Value::Object(extra)) = (ws.as_object_mut(), socket) {
            base.extend(extra);
        }
        let config = serde_json::json!({"hub": {"type": "broker"}, "ws": ws});

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("switchyard.json");
        std::fs::write(&path, config.to_string())?;

        let child = Command::new(&binary)
            .arg("--config")
            .arg(&path)
            .arg("--log-format")
            .arg("json")
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, _config_dir: dir })
    }

    /// Spawn the binary with arbitrary arguments, e.g. to test startup failures.
    pub fn spawn_raw(args: &[&str]) -> anyhow::Result<Child> {
        let binary = switchyard_binary();
        anyhow::ensure!(binary.exists(), "switchyard binary not found at {}", binary.display());
        Ok(Command::new(&binary).args(args).stdout(Stdio::null()).stderr(Stdio::piped()).spawn()?)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// WebSocket URL for a client connection.
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/", self.port)
    }

    /// Poll health until responsive.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("switchyard did not become healthy within {timeout:?}");
            }
            if let Ok((status, body)) = http_get(self.port, "/api/v1/health").await {
                if status.contains("200") && body.contains("running") {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("switchyard did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Ask the process to shut down as an operator would.
    pub fn interrupt(&self) -> anyhow::Result<()> {
        let status = Command::new("kill").arg("-INT").arg(self.child.id().to_string()).status()?;
        anyhow::ensure!(status.success(), "kill -INT failed: {status}");
        Ok(())
    }
}

impl Drop for BrokerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
