// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis connections behind a bridge: a multiplexed command connection and a
//! dedicated subscription connection driven by one worker task.

use std::sync::Arc;

use anyhow::Context;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink, PubSubStream};
use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde_json::{Map, Number, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeOptions;
use crate::protocol::{arg_to_string, TopicKind};
use crate::subscription::SubscriptionEngine;

/// A change to the backend subscription set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOp {
    Subscribe(TopicKind, String),
    Unsubscribe(TopicKind, String),
}

/// One queued subscription change and where to report its outcome.
#[derive(Debug)]
pub struct SubscriptionRequest {
    pub op: SubscriptionOp,
    pub done: Option<oneshot::Sender<Result<(), String>>>,
}

/// Handles to a connected backend.
#[derive(Clone)]
pub struct Backend {
    commands: Option<ConnectionManager>,
    ops: mpsc::UnboundedSender<SubscriptionRequest>,
}

impl Backend {
    /// Queue a subscription change for the worker. `false` once the worker
    /// has exited.
    pub fn submit(&self, request: SubscriptionRequest) -> bool {
        self.ops.send(request).is_ok()
    }

    /// Whether the subscription worker is still running.
    pub fn is_connected(&self) -> bool {
        !self.ops.is_closed()
    }

    pub fn commands(&self) -> Option<ConnectionManager> {
        self.commands.clone()
    }

    /// Say goodbye on the command connection.
    pub async fn close(self) -> redis::RedisResult<()> {
        let Some(mut conn) = self.commands else {
            return Ok(());
        };
        let _: () = redis::cmd("QUIT").query_async(&mut conn).await?;
        Ok(())
    }

    /// A backend without Redis: subscription requests go to the receiver and
    /// passthrough commands report the backend as unavailable.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<SubscriptionRequest>) {
        let (ops, rx) = mpsc::unbounded_channel();
        (Self { commands: None, ops }, rx)
    }
}

fn connection_info(options: &BridgeOptions) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(options.host.clone(), options.port),
        redis: RedisConnectionInfo { password: options.auth.clone(), ..Default::default() },
    }
}

/// Connect both backend connections and spawn the subscription worker.
pub async fn connect(
    agent: &str,
    options: &BridgeOptions,
    engine: Arc<SubscriptionEngine>,
    shutdown: CancellationToken,
) -> anyhow::Result<(Backend, JoinHandle<()>)> {
    let addr = format!("{}:{}", options.host, options.port);
    let client = Client::open(connection_info(options)).context("invalid redis address")?;
    let commands = ConnectionManager::new(client.clone())
        .await
        .with_context(|| format!("connecting to redis at {addr}"))?;
    let (sink, stream) = client
        .get_async_pubsub()
        .await
        .with_context(|| format!("opening subscription connection to {addr}"))?
        .split();

    let (ops, ops_rx) = mpsc::unbounded_channel();
    let worker = tokio::spawn(run_subscriber(agent.to_owned(), engine, sink, stream, ops_rx, shutdown));
    Ok((Backend { commands: Some(commands), ops }, worker))
}

/// Apply subscription changes in order and feed deliveries to the engine.
async fn run_subscriber(
    agent: String,
    engine: Arc<SubscriptionEngine>,
    mut sink: PubSubSink,
    mut stream: PubSubStream,
    mut ops: mpsc::UnboundedReceiver<SubscriptionRequest>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            request = ops.recv() => {
                let Some(request) = request else { break };
                let result = apply(&mut sink, &request.op).await;
                if let Err(ref e) = result {
                    tracing::warn!(agent = %agent, op = ?request.op, err = %e, "subscription change failed");
                }
                if let Some(done) = request.done {
                    let _ = done.send(result.map_err(|e| e.to_string()));
                }
            }

            msg = stream.next() => {
                let Some(msg) = msg else {
                    tracing::warn!(agent = %agent, "subscription connection closed");
                    break;
                };
                deliver(&agent, &engine, &msg);
            }
        }
    }
    tracing::debug!(agent = %agent, "subscription worker exited");
}

async fn apply(sink: &mut PubSubSink, op: &SubscriptionOp) -> redis::RedisResult<()> {
    match op {
        SubscriptionOp::Subscribe(TopicKind::Channel, topic) => sink.subscribe(topic).await,
        SubscriptionOp::Subscribe(TopicKind::Pattern, topic) => sink.psubscribe(topic).await,
        SubscriptionOp::Unsubscribe(TopicKind::Channel, topic) => sink.unsubscribe(topic).await,
        SubscriptionOp::Unsubscribe(TopicKind::Pattern, topic) => sink.punsubscribe(topic).await,
    }
}

fn deliver(agent: &str, engine: &SubscriptionEngine, msg: &redis::Msg) {
    let channel = msg.get_channel_name();
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(agent, channel, err = %e, "undecodable pub/sub payload");
            return;
        }
    };
    if msg.from_pattern() {
        match msg.get_pattern::<String>() {
            Ok(pattern) => {
                engine.on_pmessage(&pattern, channel, &payload);
            }
            Err(e) => tracing::warn!(agent, channel, err = %e, "pmessage without pattern"),
        }
    } else {
        engine.on_message(channel, &payload);
    }
}

/// Run an arbitrary command on the command connection.
pub async fn execute(conn: &mut ConnectionManager, cmd: &str, args: &[Value]) -> redis::RedisResult<Value> {
    let mut request = redis::cmd(cmd);
    for arg in args {
        request.arg(arg_to_string(arg));
    }
    let reply: redis::Value = request.query_async(conn).await?;
    Ok(to_json(reply))
}

/// Convert a Redis reply to JSON. Nil becomes `null`; status replies become
/// their text.
pub fn to_json(value: redis::Value) -> Value {
    match value {
        redis::Value::Nil => Value::Null,
        redis::Value::Okay => Value::from("OK"),
        redis::Value::Int(n) => Value::from(n),
        redis::Value::BulkString(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        redis::Value::SimpleString(s) => Value::String(s),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Value::Array(items.into_iter().map(to_json).collect())
        }
        redis::Value::Map(pairs) => {
            let map: Map<String, Value> = pairs
                .into_iter()
                .map(|(k, v)| (json_key(to_json(k)), to_json(v)))
                .collect();
            Value::Object(map)
        }
        redis::Value::Double(d) => Number::from_f64(d).map_or(Value::Null, Value::Number),
        redis::Value::Boolean(b) => Value::Bool(b),
        redis::Value::VerbatimString { text, .. } => Value::String(text),
        other => Value::String(format!("{other:?}")),
    }
}

fn json_key(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
