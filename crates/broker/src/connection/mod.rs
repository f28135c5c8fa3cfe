// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-facing connection agent: a WebSocket endpoint that stamps inbound
//! commands with their origin, forwards them through the router, and batches
//! responses and pub/sub deliveries back to each client.

pub mod http;
pub mod liveness;
pub mod outbox;
pub mod tls;
pub mod ws;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectionOptions;
use crate::error::ProtocolError;
use crate::protocol::{parse_frame, ClientId, ClientRef, Command, Response, PING_FRAME, PONG_FRAME};
use crate::router::RouterAgent;

use self::outbox::{Outbox, OutboxLimits, OutboxStats};

/// Lifecycle of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Frames handed to a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A batch of queued responses; `size` is returned on send completion.
    Batch { payload: String, count: usize, size: usize },
    /// A bare text frame that bypasses the queue.
    Text(String),
    Ping,
    Close,
}

struct ConnectionState {
    phase: Phase,
    outbox: Outbox,
    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
}

/// One accepted client connection.
pub struct Connection {
    client: ClientRef,
    state: Mutex<ConnectionState>,
    alive: AtomicBool,
    tags: Mutex<HashSet<String>>,
    frames: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    batch_interval: Duration,
}

impl Connection {
    fn new(
        client: ClientRef,
        limits: OutboxLimits,
        batch_interval: Duration,
        frames: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            client,
            state: Mutex::new(ConnectionState {
                phase: Phase::Connecting,
                outbox: Outbox::new(limits),
                timer: None,
                timer_generation: 0,
            }),
            alive: AtomicBool::new(true),
            tags: Mutex::new(HashSet::new()),
            frames,
            cancel: CancellationToken::new(),
            batch_interval,
        }
    }

    pub fn id(&self) -> ClientId {
        self.client.id
    }

    pub fn client(&self) -> &ClientRef {
        &self.client
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn stats(&self) -> OutboxStats {
        self.state.lock().outbox.stats()
    }

    /// Queued (not yet flushed) response texts.
    pub fn pending(&self) -> Vec<String> {
        self.state.lock().outbox.pending()
    }

    /// Resolves once the connection has been terminated.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    fn open(&self) {
        self.state.lock().phase = Phase::Open;
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clear the liveness flag, returning whether it was set.
    fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    fn ping(&self) {
        let _ = self.frames.send(Outbound::Ping);
    }

    /// Send a text frame immediately, outside the batch queue.
    fn send_text(&self, text: &str) {
        let _ = self.frames.send(Outbound::Text(text.to_owned()));
    }

    /// Queue a response for batched delivery.
    pub fn send_response(self: &Arc<Self>, response: &Response) {
        self.enqueue(response.to_wire(), response.is_async());
    }

    fn enqueue(self: &Arc<Self>, text: String, evictable: bool) {
        let mut state = self.state.lock();
        if state.phase != Phase::Open {
            trace!(client = %self.client, "connection not open, dropping response");
            return;
        }
        let evicted = state.outbox.push(text, evictable);
        if evicted > 0 {
            let stats = state.outbox.stats();
            debug!(client = %self.client, evicted, discarded = stats.discarded, "queue over limits, evicted deliveries");
        }
        if state.outbox.needs_immediate_flush() {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            self.flush_locked(&mut state);
        }
        if state.timer.is_none() && !state.outbox.is_empty() {
            self.arm_timer(&mut state);
        }
    }

    fn admit_command(&self) -> bool {
        self.state.lock().outbox.admits_command()
    }

    fn arm_timer(self: &Arc<Self>, state: &mut ConnectionState) {
        state.timer_generation += 1;
        let generation = state.timer_generation;
        let conn = Arc::clone(self);
        let delay = self.batch_interval;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            conn.on_timer(generation);
        }));
    }

    fn on_timer(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.timer_generation == generation {
            state.timer = None;
        }
        self.flush_locked(&mut state);
    }

    // Send batches while the cap allows, stopping once the queue is back
    // under the flush threshold.
    fn flush_locked(&self, state: &mut ConnectionState) {
        while state.phase == Phase::Open && state.outbox.can_send() {
            let Some(batch) = state.outbox.take_batch() else {
                break;
            };
            let size = batch.size;
            let frame = Outbound::Batch { payload: batch.payload, count: batch.count, size };
            if self.frames.send(frame).is_err() {
                state.outbox.complete_send(size);
                break;
            }
            if !state.outbox.needs_immediate_flush() {
                break;
            }
        }
    }

    /// Called by the writer once a batch has been written (or failed).
    pub(crate) fn complete_send(self: &Arc<Self>, size: usize, count: usize, elapsed: Duration) {
        let mut state = self.state.lock();
        state.outbox.complete_send(size);
        let stats = state.outbox.stats();
        trace!(
            client = %self.client,
            count,
            size,
            elapsed_ms = elapsed.as_millis() as u64,
            queued = stats.queued,
            in_flight = stats.in_flight,
            "batch sent"
        );
        if state.phase == Phase::Open && state.timer.is_none() && !state.outbox.is_empty() {
            self.arm_timer(&mut state);
        }
    }

    /// Drain the whole queue now, ignoring the in-flight cap.
    fn force_flush(&self) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        while let Some(batch) = state.outbox.take_batch() {
            let frame = Outbound::Batch { payload: batch.payload, count: batch.count, size: batch.size };
            if self.frames.send(frame).is_err() {
                break;
            }
        }
    }

    /// Flush what is queued, then close the socket.
    fn close_gracefully(&self) {
        self.state.lock().phase = Phase::Closing;
        self.force_flush();
        let _ = self.frames.send(Outbound::Close);
        self.state.lock().phase = Phase::Closed;
    }

    /// Drop the connection immediately without flushing.
    fn terminate(&self) {
        {
            let mut state = self.state.lock();
            state.phase = Phase::Closed;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }
        self.cancel.cancel();
    }

    /// Reserve `tag` for a command in flight. `None` when it is already taken.
    fn track_tag(&self, tag: &str) -> Option<TagGuard<'_>> {
        if !self.tags.lock().insert(tag.to_owned()) {
            return None;
        }
        Some(TagGuard { conn: self, tag: tag.to_owned(), armed: true })
    }

    fn release_tag(&self, tag: &str) -> bool {
        self.tags.lock().remove(tag)
    }

    pub fn in_flight_tags(&self) -> usize {
        self.tags.lock().len()
    }
}

/// Releases an in-flight tag on drop unless the command was handed off, in
/// which case delivering its response releases the tag.
struct TagGuard<'a> {
    conn: &'a Connection,
    tag: String,
    armed: bool,
}

impl TagGuard<'_> {
    fn hand_off(mut self) {
        self.armed = false;
    }
}

impl Drop for TagGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.conn.release_tag(&self.tag);
        }
    }
}

/// Resolved TLS file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// The WebSocket-facing agent owning every client connection.
pub struct ConnectionAgent {
    name: String,
    options: ConnectionOptions,
    limits: OutboxLimits,
    tls: Option<TlsPaths>,
    router: Arc<RouterAgent>,
    next_id: AtomicU64,
    connections: Mutex<HashMap<ClientId, Arc<Connection>>>,
    monitor: CancellationToken,
    listener: CancellationToken,
    local_addr: OnceLock<SocketAddr>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionAgent {
    pub fn new(
        name: impl Into<String>,
        options: ConnectionOptions,
        tls: Option<TlsPaths>,
        router: Arc<RouterAgent>,
    ) -> Self {
        let limits = OutboxLimits::from(&options);
        Self {
            name: name.into(),
            options,
            limits,
            tls,
            router,
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
            monitor: CancellationToken::new(),
            listener: CancellationToken::new(),
            local_addr: OnceLock::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn tls_paths(&self) -> Option<&TlsPaths> {
        self.tls.as_ref()
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, id: ClientId) -> Option<Arc<Connection>> {
        self.connections.lock().get(&id).cloned()
    }

    /// Register a new connection whose frames go to `frames`.
    pub fn accept(&self, frames: mpsc::UnboundedSender<Outbound>) -> Arc<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = ClientRef::new(self.name.clone(), id);
        let conn = Arc::new(Connection::new(client, self.limits, self.options.batch_interval(), frames));
        conn.open();
        self.connections.lock().insert(id, Arc::clone(&conn));
        info!(agent = %self.name, client_id = id, "client connected");
        conn
    }

    fn remove_connection(&self, id: ClientId) -> Option<Arc<Connection>> {
        self.connections.lock().remove(&id)
    }

    /// Tear down a connection whose socket closed or failed.
    pub fn disconnect(&self, conn: &Connection) {
        conn.terminate();
        if self.remove_connection(conn.id()).is_some() {
            info!(agent = %self.name, client_id = conn.id(), "client disconnected");
            self.router.remove_client(conn.client());
        }
    }

    /// Handle one inbound text frame from `conn`.
    pub fn on_frame(&self, conn: &Arc<Connection>, text: &str) {
        if text == PING_FRAME {
            conn.send_text(PONG_FRAME);
            return;
        }
        debug!(agent = %self.name, client_id = conn.id(), "IN: {text}");

        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(response) => return conn.send_response(&response),
        };
        let Some(guard) = conn.track_tag(&frame.tag) else {
            let err = ProtocolError::DuplicateTag;
            debug!(agent = %self.name, client_id = conn.id(), tag = %frame.tag, code = err.code(), "tag already in flight");
            return conn.send_response(&Response::error(frame.tag, err));
        };
        let mut command = match frame.into_command(conn.client()) {
            Ok(command) => command,
            Err(response) => return conn.send_response(&response),
        };

        if command.agent.is_empty() {
            match self.options.default_agent {
                Some(ref agent) => command.agent = agent.clone(),
                None => {
                    return conn.send_response(&Response::error(command.tag, ProtocolError::MissingAgent));
                }
            }
        }
        if !conn.admit_command() {
            let err = ProtocolError::TooBusy;
            warn!(agent = %self.name, client_id = conn.id(), tag = %command.tag, code = err.code(), "queue over limits, refusing command");
            return conn.send_response(&Response::error(command.tag, err));
        }

        guard.hand_off();
        self.router.dispatch_command(command);
    }

    /// Commands addressed to a connection agent itself are not supported.
    pub fn dispatch_command(&self, command: Command) {
        let err = ProtocolError::UnknownCommand(command.cmd.clone());
        let response = Response::error(command.tag.clone(), err);
        self.router.dispatch_response(&command, response);
    }

    pub fn dispatch_response(&self, command: &Command, response: Response) {
        let Some(conn) = self.connection(command.client_id) else {
            debug!(agent = %self.name, client_id = command.client_id, "response for departed client");
            return;
        };
        conn.release_tag(&command.tag);
        debug!(agent = %self.name, client_id = command.client_id, tag = %command.tag, "OUT: response");
        conn.send_response(&response);
    }

    pub fn dispatch_message(&self, client: &ClientRef, _channel: &str, message: &Response) {
        if let Some(conn) = self.connection(client.id) {
            conn.send_response(message);
        }
    }

    pub fn dispatch_pmessage(&self, client: &ClientRef, _pattern: &str, _channel: &str, message: &Response) {
        if let Some(conn) = self.connection(client.id) {
            conn.send_response(message);
        }
    }

    /// One liveness pass: connections that never answered the previous probe
    /// are removed; the rest are marked pending and pinged.
    pub fn probe_connections(&self) -> usize {
        let snapshot: Vec<Arc<Connection>> = self.connections.lock().values().cloned().collect();
        let mut reaped = 0;
        for conn in snapshot {
            if conn.take_alive() {
                conn.ping();
                continue;
            }
            warn!(agent = %self.name, client_id = conn.id(), "client unresponsive, terminating");
            self.disconnect(&conn);
            reaped += 1;
        }
        reaped
    }

    /// Bind the listener and start serving.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let acceptor = self.tls.as_ref().map(tls::load_acceptor).transpose()?;
        let addr = format!("{}:{}", self.options.host, self.options.port);
        let tcp = TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
        let local = tcp.local_addr()?;
        let _ = self.local_addr.set(local);

        let app = http::build_router(Arc::clone(self));
        let shutdown = self.listener.clone();
        let name = self.name.clone();
        let server = match acceptor {
            Some(acceptor) => {
                let listener = tls::TlsListener::spawn(tcp, acceptor, shutdown.clone());
                tokio::spawn(async move {
                    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned()).await;
                    if let Err(e) = served {
                        tracing::error!(agent = %name, err = %e, "server error");
                    }
                })
            }
            None => tokio::spawn(async move {
                let served = axum::serve(tcp, app).with_graceful_shutdown(shutdown.cancelled_owned()).await;
                if let Err(e) = served {
                    tracing::error!(agent = %name, err = %e, "server error");
                }
            }),
        };
        let monitor = liveness::spawn_liveness_monitor(Arc::clone(self), self.monitor.clone());
        self.tasks.lock().extend([server, monitor]);

        info!(agent = %self.name, %local, tls = self.tls.is_some(), "listening");
        Ok(())
    }

    /// Flush and close every connection, then stop listening.
    pub async fn stop(&self) {
        self.monitor.cancel();
        let connections: Vec<Arc<Connection>> = self.connections.lock().drain().map(|(_, c)| c).collect();
        for conn in &connections {
            conn.close_gracefully();
        }
        self.listener.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(agent = %self.name, err = %e, "connection agent task failed");
            }
        }
        info!(agent = %self.name, closed = connections.len(), "stopped");
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
