// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redis bridge agent.
//!
//! Subscription verbs update the local [`SubscriptionEngine`] first; only a
//! state transition (first subscriber in, last subscriber out) reaches the
//! backend. Every other verb is passed through as a Redis command.

pub mod backend;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeOptions;
use crate::error::ProtocolError;
use crate::protocol::{ClientRef, Command, Response, TopicKind};
use crate::router::RouterAgent;
use crate::subscription::SubscriptionEngine;

use self::backend::{Backend, SubscriptionOp, SubscriptionRequest};

/// How a command verb is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Subscribe,
    PSubscribe,
    Unsubscribe,
    PUnsubscribe,
    Passthrough,
}

impl Verb {
    const TABLE: [(&'static str, Verb); 4] = [
        ("subscribe", Verb::Subscribe),
        ("psubscribe", Verb::PSubscribe),
        ("unsubscribe", Verb::Unsubscribe),
        ("punsubscribe", Verb::PUnsubscribe),
    ];

    pub fn from_cmd(cmd: &str) -> Self {
        Self::TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(cmd))
            .map_or(Verb::Passthrough, |(_, verb)| *verb)
    }

    fn topic_kind(self) -> Option<TopicKind> {
        match self {
            Self::Subscribe | Self::Unsubscribe => Some(TopicKind::Channel),
            Self::PSubscribe | Self::PUnsubscribe => Some(TopicKind::Pattern),
            Self::Passthrough => None,
        }
    }

    fn is_subscribe(self) -> bool {
        matches!(self, Self::Subscribe | Self::PSubscribe)
    }
}

pub struct BridgeAgent {
    name: String,
    options: BridgeOptions,
    router: Arc<RouterAgent>,
    engine: Arc<SubscriptionEngine>,
    backend: Mutex<Option<Backend>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl BridgeAgent {
    pub fn new(name: impl Into<String>, options: BridgeOptions, router: Arc<RouterAgent>) -> Self {
        let name = name.into();
        let engine = Arc::new(SubscriptionEngine::new(name.clone(), Arc::clone(&router)));
        Self {
            name,
            options,
            router,
            engine,
            backend: Mutex::new(None),
            worker: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Arc<SubscriptionEngine> {
        &self.engine
    }

    fn backend(&self) -> Option<Backend> {
        self.backend.lock().clone()
    }

    // A backend whose subscription worker has exited cannot apply changes.
    fn subscriber(&self) -> Option<Backend> {
        self.backend().filter(Backend::is_connected)
    }

    /// Open both backend connections and start the subscription worker.
    pub async fn start(&self) -> anyhow::Result<()> {
        let (backend, worker) =
            backend::connect(&self.name, &self.options, Arc::clone(&self.engine), self.shutdown.clone()).await?;
        *self.backend.lock() = Some(backend);
        *self.worker.lock() = Some(worker);
        info!(agent = %self.name, host = %self.options.host, port = self.options.port, "connected to redis");
        Ok(())
    }

    /// Close both backend connections. A failure on one does not prevent
    /// closing the other.
    pub async fn stop(&self) {
        let backend = self.backend.lock().take();
        self.shutdown.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(agent = %self.name, err = %e, "subscription worker failed");
            }
        }
        if let Some(backend) = backend {
            if let Err(e) = backend.close().await {
                warn!(agent = %self.name, err = %e, "closing command connection failed");
            }
        }
        info!(agent = %self.name, "stopped");
    }

    pub fn dispatch_command(&self, command: Command) {
        let verb = Verb::from_cmd(&command.cmd);
        match verb.topic_kind() {
            Some(kind) => self.dispatch_subscription(verb, kind, command),
            None => self.dispatch_passthrough(command),
        }
    }

    fn respond(&self, command: &Command, outcome: Result<Value, ProtocolError>) {
        self.router.dispatch_response(command, Response::for_command(command, outcome));
    }

    fn dispatch_subscription(&self, verb: Verb, kind: TopicKind, command: Command) {
        let Some(topic) = command.first_arg() else {
            return self.respond(&command, Err(ProtocolError::MissingTopic(kind)));
        };
        let Some(backend) = self.subscriber() else {
            return self.respond(&command, Err(ProtocolError::BackendUnavailable));
        };

        let client = command.client();
        let transition = if verb.is_subscribe() {
            self.engine.subscribe(kind, &topic, &client)
        } else {
            self.engine.unsubscribe(kind, &topic, &client)
        };
        match transition {
            Err(e) => self.respond(&command, Err(e.into())),
            Ok(false) => self.respond(&command, Ok(Value::from("ok"))),
            Ok(true) => {
                let op = if verb.is_subscribe() {
                    SubscriptionOp::Subscribe(kind, topic.clone())
                } else {
                    SubscriptionOp::Unsubscribe(kind, topic.clone())
                };
                debug!(agent = %self.name, ?op, %client, "forwarding subscription change");
                let (done_tx, done_rx) = oneshot::channel();
                if !backend.submit(SubscriptionRequest { op, done: Some(done_tx) }) {
                    if verb.is_subscribe() {
                        revert_subscribe(&self.name, &self.engine, kind, &topic, &client);
                    }
                    return self.respond(&command, Err(ProtocolError::BackendUnavailable));
                }
                let name = self.name.clone();
                let engine = Arc::clone(&self.engine);
                let router = Arc::clone(&self.router);
                tokio::spawn(async move {
                    let outcome = match done_rx.await {
                        Ok(Ok(())) => Ok(Value::from("ok")),
                        Ok(Err(msg)) => Err(ProtocolError::Backend(msg)),
                        Err(_) => Err(ProtocolError::BackendUnavailable),
                    };
                    if outcome.is_err() && verb.is_subscribe() {
                        revert_subscribe(&name, &engine, kind, &topic, &client);
                    }
                    router.dispatch_response(&command, Response::for_command(&command, outcome));
                });
            }
        }
    }

    fn dispatch_passthrough(&self, command: Command) {
        let Some(mut conn) = self.backend().and_then(|b| b.commands()) else {
            return self.respond(&command, Err(ProtocolError::BackendUnavailable));
        };
        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            let outcome = backend::execute(&mut conn, &command.cmd, &command.args)
                .await
                .map_err(|e| ProtocolError::Backend(e.to_string()));
            router.dispatch_response(&command, Response::for_command(&command, outcome));
        });
    }

    /// Drop every subscription of a departed client, unsubscribing upstream
    /// from topics it was the last holder of.
    pub fn remove_client(&self, client: &ClientRef) {
        let emptied = self.engine.remove_client(client);
        if emptied.is_empty() {
            return;
        }
        let Some(backend) = self.backend() else {
            return;
        };
        for (kind, topic) in emptied.into_topics() {
            debug!(agent = %self.name, %kind, topic = %topic, "last subscriber gone");
            backend.submit(SubscriptionRequest { op: SubscriptionOp::Unsubscribe(kind, topic), done: None });
        }
    }

    pub fn dispatch_response(&self, command: &Command, _response: Response) {
        debug!(agent = %self.name, tag = %command.tag, "bridge hosts no clients, dropping response");
    }

    pub fn dispatch_message(&self, client: &ClientRef, _channel: &str, _message: &Response) {
        debug!(agent = %self.name, %client, "bridge hosts no clients, dropping message");
    }

    pub fn dispatch_pmessage(&self, client: &ClientRef, _pattern: &str, _channel: &str, _message: &Response) {
        debug!(agent = %self.name, %client, "bridge hosts no clients, dropping pmessage");
    }

    /// Install a backend whose subscription requests land in the returned
    /// receiver instead of Redis.
    #[cfg(test)]
    pub(crate) fn attach_queue(&self) -> tokio::sync::mpsc::UnboundedReceiver<SubscriptionRequest> {
        let (backend, rx) = Backend::detached();
        *self.backend.lock() = Some(backend);
        rx
    }
}

/// Drop a local subscription the backend never took, so the client can retry.
///
/// A failed upstream unsubscribe is not reverted: the client asked to leave,
/// and deliveries on a topic with no local subscribers are discarded.
fn revert_subscribe(agent: &str, engine: &SubscriptionEngine, kind: TopicKind, topic: &str, client: &ClientRef) {
    if let Err(e) = engine.unsubscribe(kind, topic, client) {
        // The client may have disconnected in the meantime.
        debug!(agent, %client, err = %e, "subscription already gone");
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
