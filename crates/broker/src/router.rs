// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router (broker) agent: forwards commands, responses and pub/sub deliveries
//! between agents by name, and answers broker-administration commands.
//!
//! The router holds no per-client state.

use std::sync::Weak;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::agent::{Agent, Registry};
use crate::error::ProtocolError;
use crate::protocol::{arg_to_string, ClientRef, Command, Response};

/// Commands the router handles itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdminVerb {
    List,
}

impl AdminVerb {
    const TABLE: [(&'static str, AdminVerb); 1] = [("list", AdminVerb::List)];

    fn from_cmd(cmd: &str) -> Option<Self> {
        Self::TABLE.iter().find(|(name, _)| name.eq_ignore_ascii_case(cmd)).map(|(_, verb)| *verb)
    }
}

pub struct RouterAgent {
    name: String,
    registry: Weak<Registry>,
}

impl RouterAgent {
    pub(crate) fn new(name: impl Into<String>, registry: Weak<Registry>) -> Self {
        Self { name: name.into(), registry }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Route a command to its target agent.
    ///
    /// An empty target or the router's own name selects an administration
    /// command; an unknown target is answered with an error on the target's
    /// behalf.
    pub fn dispatch_command(&self, command: Command) {
        if command.agent.is_empty() || command.agent == self.name {
            self.handle_admin(command);
            return;
        }

        let Some(registry) = self.registry.upgrade() else {
            debug!(router = %self.name, "registry dropped, discarding command");
            return;
        };
        match registry.get(&command.agent) {
            Some(agent) => agent.dispatch_command(command),
            None => {
                let err = ProtocolError::UnknownAgent(command.agent.clone());
                debug!(router = %self.name, target = %command.agent, tag = %command.tag, code = err.code(), "unknown agent");
                let response = Response::error(command.tag.clone(), err);
                self.dispatch_response(&command, response);
            }
        }
    }

    /// Route a response back to the agent hosting the originating client.
    pub fn dispatch_response(&self, command: &Command, response: Response) {
        self.with_client_agent(&command.client_agent, "response", |agent| {
            agent.dispatch_response(command, response)
        });
    }

    pub fn dispatch_message(&self, client: &ClientRef, channel: &str, message: &Response) {
        self.with_client_agent(&client.agent, "message", |agent| {
            agent.dispatch_message(client, channel, message)
        });
    }

    pub fn dispatch_pmessage(
        &self,
        client: &ClientRef,
        pattern: &str,
        channel: &str,
        message: &Response,
    ) {
        self.with_client_agent(&client.agent, "pmessage", |agent| {
            agent.dispatch_pmessage(client, pattern, channel, message)
        });
    }

    /// Tell every agent that `client` is gone so per-client state is released.
    pub fn remove_client(&self, client: &ClientRef) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        for (_, agent) in registry.iter() {
            agent.remove_client(client);
        }
    }

    fn with_client_agent(&self, name: &str, what: &str, deliver: impl FnOnce(&Agent)) {
        let Some(registry) = self.registry.upgrade() else {
            debug!(router = %self.name, "registry dropped, discarding {what}");
            return;
        };
        match registry.get(name) {
            // The router hosts no clients; routing to it would loop.
            Some(Agent::Router(_)) | None => {
                warn!(router = %self.name, client_agent = name, "no client agent for {what}, dropping");
            }
            Some(agent) => deliver(agent),
        }
    }

    fn handle_admin(&self, command: Command) {
        let outcome = match AdminVerb::from_cmd(&command.cmd) {
            Some(AdminVerb::List) => self.list(&command),
            None => Err(ProtocolError::UnknownCommand(command.cmd.clone())),
        };
        let response = Response::for_command(&command, outcome);
        self.dispatch_response(&command, response);
    }

    /// `list agents`: map every registered agent name to its type.
    fn list(&self, command: &Command) -> Result<Value, ProtocolError> {
        let [arg] = command.args.as_slice() else {
            return Err(ProtocolError::InvalidArgumentCount(command.args.len()));
        };
        let arg = arg_to_string(arg);
        match arg.as_str() {
            "agents" => {
                let registry = self.registry.upgrade().ok_or(ProtocolError::BackendUnavailable)?;
                let agents: Map<String, Value> = registry
                    .iter()
                    .map(|(name, agent)| (name.to_owned(), Value::from(agent.kind().as_str())))
                    .collect();
                Ok(Value::Object(agents))
            }
            _ => Err(ProtocolError::InvalidArgument(arg)),
        }
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
