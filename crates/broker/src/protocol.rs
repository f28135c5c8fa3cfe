// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types shared by every agent: commands, responses and client handles.
//!
//! Inbound frames are single JSON command objects. Outbound frames are either
//! one serialized [`Response`] or, from a connection flush, a JSON array of
//! pre-serialized response strings (see [`encode_batch`]).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Literal text frame used by clients for application-level keepalive.
pub const PING_FRAME: &str = "PING";
/// Reply to [`PING_FRAME`].
pub const PONG_FRAME: &str = "PONG";

/// Numeric id of a client connection, unique within its connection agent.
pub type ClientId = u64;

/// Lightweight handle naming a client connection across agents.
///
/// Used as a map key and equality token; it never owns the connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientRef {
    #[serde(rename = "clientAgent")]
    pub agent: String,
    #[serde(rename = "clientId")]
    pub id: ClientId,
}

impl ClientRef {
    pub fn new(agent: impl Into<String>, id: ClientId) -> Self {
        Self { agent: agent.into(), id }
    }
}

impl fmt::Display for ClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent, self.id)
    }
}

/// Kind of pub/sub topic: a literal channel or a glob pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Channel,
    Pattern,
}

impl TopicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Pattern => "pattern",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged command travelling from a client connection to a target agent.
///
/// `client_agent`/`client_id` are always stamped by the receiving connection
/// agent; values sent by the client are overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub client_agent: String,
    pub client_id: ClientId,
    pub tag: String,
    #[serde(default)]
    pub agent: String,
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Command {
    /// Handle of the connection that issued this command.
    pub fn client(&self) -> ClientRef {
        ClientRef::new(self.client_agent.clone(), self.client_id)
    }

    /// First argument rendered as a string, if any.
    pub fn first_arg(&self) -> Option<String> {
        self.args.first().map(arg_to_string)
    }
}

/// Render a command argument the way a text protocol expects it.
///
/// Strings pass through verbatim; everything else uses its compact JSON text.
pub fn arg_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Outbound response, discriminated on the wire by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok {
        tag: String,
        result: Value,
    },
    Error {
        tag: Option<String>,
        #[serde(rename = "errorMsg")]
        error_msg: String,
    },
    Message {
        channel: String,
        message: String,
    },
    #[serde(rename = "pmessage")]
    PMessage {
        pattern: String,
        channel: String,
        message: String,
    },
}

impl Response {
    pub fn ok(tag: impl Into<String>, result: Value) -> Self {
        Self::Ok { tag: tag.into(), result }
    }

    pub fn error(tag: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Error { tag: Some(tag.into()), error_msg: err.to_string() }
    }

    pub fn untagged_error(err: impl fmt::Display) -> Self {
        Self::Error { tag: None, error_msg: err.to_string() }
    }

    /// Build the response for a command from a handler outcome.
    pub fn for_command(command: &Command, outcome: Result<Value, impl fmt::Display>) -> Self {
        match outcome {
            Ok(result) => Self::ok(command.tag.clone(), result),
            Err(e) => Self::error(command.tag.clone(), e),
        }
    }

    /// Correlation tag, absent for untagged errors and pub/sub deliveries.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Ok { tag, .. } => Some(tag),
            Self::Error { tag, .. } => tag.as_deref(),
            Self::Message { .. } | Self::PMessage { .. } => None,
        }
    }

    /// Asynchronous pub/sub deliveries may be evicted under backpressure;
    /// command replies may not.
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Message { .. } | Self::PMessage { .. })
    }

    /// Serialize to the JSON text sent over the wire.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(err = %e, "failed to encode response");
            r#"{"status":"error","tag":null,"errorMsg":"Internal error: response encoding failed"}"#
                .to_owned()
        })
    }
}

/// A syntactically valid inbound frame whose tag has been extracted.
///
/// Splitting tag extraction from command validation lets the connection check
/// its in-flight tag set between the two steps.
#[derive(Debug)]
pub struct InboundFrame {
    pub tag: String,
    body: Map<String, Value>,
}

/// Parse a text frame into an [`InboundFrame`].
///
/// Returns the error response to send back when the frame is not a JSON
/// object or carries no usable tag.
pub fn parse_frame(text: &str) -> Result<InboundFrame, Response> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Response::untagged_error(ProtocolError::InvalidJson(e.to_string())))?;
    let Value::Object(body) = value else {
        return Err(Response::untagged_error(ProtocolError::InvalidJson(
            "expected a JSON object".to_owned(),
        )));
    };

    let tag = match body.get("tag") {
        Some(Value::String(t)) if !t.is_empty() => t.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(Response::untagged_error(ProtocolError::MissingTag)),
    };

    Ok(InboundFrame { tag, body })
}

impl InboundFrame {
    /// Validate the remaining fields and stamp the originating client.
    pub fn into_command(self, client: &ClientRef) -> Result<Command, Response> {
        let cmd = match self.body.get("cmd") {
            Some(Value::String(c)) if !c.is_empty() => c.clone(),
            _ => return Err(Response::error(self.tag, ProtocolError::MissingCommand)),
        };

        let agent = self.body.get("agent").and_then(Value::as_str).unwrap_or_default().to_owned();

        let args = match self.body.get("args") {
            Some(Value::Array(items)) => items.clone(),
            None | Some(Value::Null) => Vec::new(),
            Some(single) => vec![single.clone()],
        };

        Ok(Command {
            client_agent: client.agent.clone(),
            client_id: client.id,
            tag: self.tag,
            agent,
            cmd,
            args,
        })
    }
}

/// Encode drained queue items as one batch frame: a JSON array of strings.
pub fn encode_batch(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_owned())
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
