// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent contract and the name → agent registry.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use crate::bridge::BridgeAgent;
use crate::connection::ConnectionAgent;
use crate::protocol::{ClientRef, Command, Response};
use crate::router::RouterAgent;

/// Discriminant reported by `list agents` and used in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Broker,
    Socket,
    Redis,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broker => "broker",
            Self::Socket => "socket",
            Self::Redis => "redis",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered agent, one variant per concrete role.
#[derive(Clone)]
pub enum Agent {
    Router(Arc<RouterAgent>),
    Connection(Arc<ConnectionAgent>),
    Bridge(Arc<BridgeAgent>),
}

impl Agent {
    pub fn name(&self) -> &str {
        match self {
            Self::Router(a) => a.name(),
            Self::Connection(a) => a.name(),
            Self::Bridge(a) => a.name(),
        }
    }

    pub fn kind(&self) -> AgentKind {
        match self {
            Self::Router(_) => AgentKind::Broker,
            Self::Connection(_) => AgentKind::Socket,
            Self::Bridge(_) => AgentKind::Redis,
        }
    }

    /// Execute (or forward) a command. Every command eventually produces
    /// exactly one response routed back to its originating client.
    pub fn dispatch_command(&self, command: Command) {
        match self {
            Self::Router(a) => a.dispatch_command(command),
            Self::Connection(a) => a.dispatch_command(command),
            Self::Bridge(a) => a.dispatch_command(command),
        }
    }

    /// Deliver a command response to the client that issued `command`.
    pub fn dispatch_response(&self, command: &Command, response: Response) {
        match self {
            Self::Router(a) => a.dispatch_response(command, response),
            Self::Connection(a) => a.dispatch_response(command, response),
            Self::Bridge(a) => a.dispatch_response(command, response),
        }
    }

    /// Deliver a channel message to one subscribed client.
    pub fn dispatch_message(&self, client: &ClientRef, channel: &str, message: &Response) {
        match self {
            Self::Router(a) => a.dispatch_message(client, channel, message),
            Self::Connection(a) => a.dispatch_message(client, channel, message),
            Self::Bridge(a) => a.dispatch_message(client, channel, message),
        }
    }

    /// Deliver a pattern message to one subscribed client.
    pub fn dispatch_pmessage(
        &self,
        client: &ClientRef,
        pattern: &str,
        channel: &str,
        message: &Response,
    ) {
        match self {
            Self::Router(a) => a.dispatch_pmessage(client, pattern, channel, message),
            Self::Connection(a) => a.dispatch_pmessage(client, pattern, channel, message),
            Self::Bridge(a) => a.dispatch_pmessage(client, pattern, channel, message),
        }
    }

    /// Forget every piece of per-client state held for `client`.
    pub fn remove_client(&self, client: &ClientRef) {
        match self {
            Self::Router(_) | Self::Connection(_) => {}
            Self::Bridge(a) => a.remove_client(client),
        }
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        match self {
            Self::Router(_) => Ok(()),
            Self::Connection(a) => a.start().await,
            Self::Bridge(a) => a.start().await,
        }
    }

    pub async fn stop(&self) {
        match self {
            Self::Router(_) => {}
            Self::Connection(a) => a.stop().await,
            Self::Bridge(a) => a.stop().await,
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").field("name", &self.name()).field("kind", &self.kind()).finish()
    }
}

/// Name → agent map, built once and read-only afterwards.
#[derive(Debug)]
pub struct Registry {
    agents: IndexMap<String, Agent>,
}

impl Registry {
    /// Build a registry around a router.
    ///
    /// The router is created first with a weak back-reference to the registry
    /// under construction; `build_agents` then creates every agent against it
    /// and returns the full map (including the router if it should be listed).
    pub fn build<F>(router_name: &str, build_agents: F) -> Arc<Self>
    where
        F: FnOnce(&Arc<RouterAgent>) -> IndexMap<String, Agent>,
    {
        Arc::new_cyclic(|registry: &Weak<Registry>| {
            let router = Arc::new(RouterAgent::new(router_name, registry.clone()));
            Self { agents: build_agents(&router) }
        })
    }

    pub fn get(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Agent)> {
        self.agents.iter().map(|(name, agent)| (name.as_str(), agent))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
