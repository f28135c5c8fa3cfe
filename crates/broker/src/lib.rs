// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Switchyard: a tagged-command message broker bridging WebSocket clients to
//! backend agents through a central router.

pub mod agent;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod router;
pub mod subscription;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{error, info};

use crate::agent::{Agent, Registry};
use crate::bridge::BridgeAgent;
use crate::config::{AgentOptions, BrokerConfig};
use crate::connection::{ConnectionAgent, TlsPaths};
use crate::router::RouterAgent;

/// A configured set of agents around one router.
pub struct Broker {
    registry: Arc<Registry>,
    router: Arc<RouterAgent>,
}

impl Broker {
    /// Build every configured agent. Performs no I/O.
    pub fn from_config(config: &BrokerConfig) -> anyhow::Result<Self> {
        let router_name = config.router_name()?;
        let mut router_handle = None;
        let registry = Registry::build(router_name, |router| {
            router_handle = Some(Arc::clone(router));
            let mut agents = IndexMap::new();
            for (name, options) in &config.agents {
                let agent = match options {
                    AgentOptions::Broker(_) => Agent::Router(Arc::clone(router)),
                    AgentOptions::Socket(opts) => {
                        let tls = opts.https.as_ref().map(|tls| TlsPaths {
                            cert: config.resolve_path(&tls.cert),
                            key: config.resolve_path(&tls.key),
                        });
                        Agent::Connection(Arc::new(ConnectionAgent::new(
                            name.clone(),
                            opts.clone(),
                            tls,
                            Arc::clone(router),
                        )))
                    }
                    AgentOptions::Redis(opts) => Agent::Bridge(Arc::new(BridgeAgent::new(
                        name.clone(),
                        opts.clone(),
                        Arc::clone(router),
                    ))),
                };
                agents.insert(name.clone(), agent);
            }
            agents
        });
        let router = router_handle.ok_or_else(|| anyhow::anyhow!("router was not constructed"))?;
        Ok(Self { registry, router })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<RouterAgent> {
        &self.router
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.registry.get(name)
    }

    /// Start every agent in declaration order. The first failure is fatal.
    pub async fn start(&self) -> anyhow::Result<()> {
        for (name, agent) in self.registry.iter() {
            agent
                .start()
                .await
                .map_err(|e| e.context(format!("starting {} agent {name}", agent.kind())))?;
        }
        info!(router = %self.router.name(), agents = self.registry.len(), "broker started");
        Ok(())
    }

    /// Stop every agent in reverse order.
    pub async fn stop(&self) {
        let agents: Vec<&Agent> = self.registry.iter().map(|(_, agent)| agent).collect();
        for agent in agents.into_iter().rev() {
            agent.stop().await;
        }
        info!(router = %self.router.name(), "broker stopped");
    }
}

/// Run a broker until interrupted.
pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    let broker = Broker::from_config(&config)?;
    if let Err(e) = broker.start().await {
        broker.stop().await;
        return Err(e);
    }

    shutdown_signal().await;
    info!("shutting down");
    broker.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(err = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(err = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
