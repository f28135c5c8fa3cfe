// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use crate::protocol::{ClientRef, TopicKind};

/// Failures reported to a client as an `error` response.
///
/// `Display` renders the exact `errorMsg` text put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    InvalidJson(String),
    MissingTag,
    DuplicateTag,
    MissingCommand,
    MissingAgent,
    TooBusy,
    UnknownAgent(String),
    UnknownCommand(String),
    InvalidArgumentCount(usize),
    InvalidArgument(String),
    MissingTopic(TopicKind),
    BackendUnavailable,
    Backend(String),
    Subscription(SubscriptionError),
}

impl ProtocolError {
    /// Machine-readable code, used in log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::MissingTag => "MISSING_TAG",
            Self::DuplicateTag => "DUPLICATE_TAG",
            Self::MissingCommand => "MISSING_COMMAND",
            Self::MissingAgent => "MISSING_AGENT",
            Self::TooBusy => "TOO_BUSY",
            Self::UnknownAgent(_) => "UNKNOWN_AGENT",
            Self::UnknownCommand(_) => "UNKNOWN_COMMAND",
            Self::InvalidArgumentCount(_) => "INVALID_ARGUMENT_COUNT",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::MissingTopic(_) => "MISSING_TOPIC",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::Backend(_) => "BACKEND_ERROR",
            Self::Subscription(_) => "SUBSCRIPTION",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson(msg) => write!(f, "Invalid command: {msg}"),
            Self::MissingTag => f.write_str("missing tag"),
            Self::DuplicateTag => f.write_str("duplicate tag"),
            Self::MissingCommand => f.write_str("missing command"),
            Self::MissingAgent => f.write_str("missing agent"),
            Self::TooBusy => f.write_str("server is too busy"),
            Self::UnknownAgent(name) => write!(f, "Unknown agent name: {name}"),
            Self::UnknownCommand(cmd) => write!(f, "Unknown command: {cmd}"),
            Self::InvalidArgumentCount(n) => write!(f, "Invalid number of arguments: {n}"),
            Self::InvalidArgument(arg) => write!(f, "Invalid argument: {arg}"),
            Self::MissingTopic(kind) => write!(f, "missing {kind}"),
            Self::BackendUnavailable => f.write_str("backend is not connected"),
            Self::Backend(msg) => f.write_str(msg),
            Self::Subscription(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<SubscriptionError> for ProtocolError {
    fn from(e: SubscriptionError) -> Self {
        Self::Subscription(e)
    }
}

/// Violations of the subscription index contract.
///
/// Every variant is raised before any mutation, so a failed call leaves both
/// indices untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    AlreadySubscribed { kind: TopicKind, topic: String, client: ClientRef },
    NotSubscribed { kind: TopicKind, topic: String },
    AgentNotSubscribed { kind: TopicKind, topic: String, agent: String },
    ClientNotSubscribed { kind: TopicKind, topic: String, client: ClientRef },
}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadySubscribed { kind, topic, client } => write!(
                f,
                "The {kind}: {topic} has already been subscribed by this client: {}, {}",
                client.agent, client.id
            ),
            Self::NotSubscribed { kind, topic } => {
                write!(f, "The {kind}: {topic} has not been subscribed")
            }
            Self::AgentNotSubscribed { kind, topic, agent } => {
                write!(f, "The {kind}: {topic} has not been subscribed by this agent: {agent}")
            }
            Self::ClientNotSubscribed { kind, topic, client } => write!(
                f,
                "The {kind}: {topic} has not been subscribed by this client: {}, {}",
                client.agent, client.id
            ),
        }
    }
}

impl std::error::Error for SubscriptionError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
