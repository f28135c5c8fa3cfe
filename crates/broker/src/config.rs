// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use indexmap::IndexMap;
use serde::Deserialize;

/// Tagged-command message broker.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "switchyard", version, about)]
pub struct Cli {
    /// Path to the JSON agent configuration file.
    #[arg(long, short, env = "SWITCHYARD_CONFIG")]
    pub config: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text", env = "SWITCHYARD_LOG_FORMAT")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Options for one configured agent, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentOptions {
    Broker(RouterOptions),
    Socket(ConnectionOptions),
    Redis(BridgeOptions),
}

/// The router has no tunables; the struct exists so every agent type has one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RouterOptions {}

/// Client-facing WebSocket endpoint options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionOptions {
    /// Address to bind on.
    pub host: String,
    /// Port to listen on (0 picks an ephemeral port).
    pub port: u16,
    /// Debounce before a queued response is flushed.
    pub batch_interval_ms: u64,
    /// Queue length past which async deliveries are evicted.
    pub socket_queue_items_limit: usize,
    /// Queue byte size past which async deliveries are evicted.
    pub socket_queue_size_limit: usize,
    /// Queue byte size that triggers an immediate flush; also the per-batch budget.
    pub socket_queue_size_flush: usize,
    /// Maximum batches awaiting send completion per connection.
    pub socket_send_in_progress_limit: usize,
    /// Liveness probe interval.
    pub socket_monitoring_interval_ms: u64,
    /// Serve over TLS with these PEM files.
    pub https: Option<TlsOptions>,
    /// Agent used for commands that name none.
    pub default_agent: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3500,
            batch_interval_ms: 100,
            socket_queue_items_limit: 16 * 1024,
            socket_queue_size_limit: 1024 * 1024,
            socket_queue_size_flush: 128 * 1024,
            socket_send_in_progress_limit: 8,
            socket_monitoring_interval_ms: 30_000,
            https: None,
            default_agent: None,
        }
    }
}

impl ConnectionOptions {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.socket_monitoring_interval_ms)
    }

    fn validate(&self, name: &str) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.socket_send_in_progress_limit > 0,
            "agent {name}: socketSendInProgressLimit must be at least 1"
        );
        anyhow::ensure!(
            self.socket_queue_size_flush > 0,
            "agent {name}: socketQueueSizeFlush must be positive"
        );
        anyhow::ensure!(
            self.socket_monitoring_interval_ms > 0,
            "agent {name}: socketMonitoringIntervalMs must be positive"
        );
        Ok(())
    }
}

/// Certificate chain and private key, PEM encoded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TlsOptions {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Redis pub/sub bridge options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    pub host: String,
    pub port: u16,
    /// Password sent with AUTH on both backend connections.
    pub auth: Option<String>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self { host: "localhost".to_owned(), port: 6379, auth: None }
    }
}

/// Agent name → options, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    pub agents: IndexMap<String, AgentOptions>,
    /// Directory relative paths (TLS files) resolve against.
    pub base_dir: Option<PathBuf>,
}

impl BrokerConfig {
    /// Parse a configuration document. Unknown agent types are rejected here.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let agents: IndexMap<String, AgentOptions> =
            serde_json::from_str(text).context("invalid broker configuration")?;
        Ok(Self { agents, base_dir: None })
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config = Self::from_json(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Resolve a path from the configuration relative to the file's directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match self.base_dir {
            Some(ref base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Name of the single broker agent.
    ///
    /// Fails when none or several are configured, or when an agent's options
    /// are out of range.
    pub fn router_name(&self) -> anyhow::Result<&str> {
        let mut routers = self
            .agents
            .iter()
            .filter(|(_, opts)| matches!(opts, AgentOptions::Broker(_)))
            .map(|(name, _)| name.as_str());

        let Some(name) = routers.next() else {
            anyhow::bail!("configuration declares no broker agent");
        };
        if let Some(other) = routers.next() {
            anyhow::bail!("configuration declares more than one broker agent: {name}, {other}");
        }

        for (agent, opts) in &self.agents {
            if let AgentOptions::Socket(socket) = opts {
                socket.validate(agent)?;
            }
        }
        Ok(name)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
