// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process broker fixtures for unit tests.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::agent::{Agent, Registry};
use crate::bridge::BridgeAgent;
use crate::config::{BridgeOptions, ConnectionOptions};
use crate::connection::{Connection, ConnectionAgent, Outbound};
use crate::router::RouterAgent;

pub const ROUTER: &str = "hub";
pub const SOCKET: &str = "ws";
pub const BRIDGE: &str = "cache";

/// A router, one unstarted connection agent and one unstarted bridge.
pub struct TestBroker {
    pub registry: Arc<Registry>,
    pub router: Arc<RouterAgent>,
    pub socket: Arc<ConnectionAgent>,
    pub bridge: Arc<BridgeAgent>,
}

impl TestBroker {
    pub fn new() -> Self {
        Self::with_options(test_options())
    }

    pub fn with_options(options: ConnectionOptions) -> Self {
        let mut parts = None;
        let registry = Registry::build(ROUTER, |router| {
            let socket = Arc::new(ConnectionAgent::new(SOCKET, options, None, Arc::clone(router)));
            let bridge = Arc::new(BridgeAgent::new(BRIDGE, BridgeOptions::default(), Arc::clone(router)));
            let mut agents = IndexMap::new();
            agents.insert(ROUTER.to_owned(), Agent::Router(Arc::clone(router)));
            agents.insert(SOCKET.to_owned(), Agent::Connection(Arc::clone(&socket)));
            agents.insert(BRIDGE.to_owned(), Agent::Bridge(Arc::clone(&bridge)));
            parts = Some((Arc::clone(router), socket, bridge));
            agents
        });
        let Some((router, socket, bridge)) = parts else {
            unreachable!("registry builder always runs");
        };
        Self { registry, router, socket, bridge }
    }

    /// Accept a client on the connection agent without a real socket.
    pub fn connect(&self) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = self.socket.accept(tx);
        TestClient { conn, frames: rx }
    }
}

/// Options with a long batch interval so tests read queues before any flush.
pub fn test_options() -> ConnectionOptions {
    ConnectionOptions { batch_interval_ms: 60_000, ..ConnectionOptions::default() }
}

/// Let spawned response tasks run to completion.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// A connection plus the frames its writer would have sent.
pub struct TestClient {
    pub conn: Arc<Connection>,
    pub frames: mpsc::UnboundedReceiver<Outbound>,
}

impl TestClient {
    /// Queued responses, parsed.
    pub fn pending(&self) -> Vec<Value> {
        self.conn.pending().iter().filter_map(|text| serde_json::from_str(text).ok()).collect()
    }

    /// Frames already handed to the writer.
    pub fn sent(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            out.push(frame);
        }
        out
    }
}
