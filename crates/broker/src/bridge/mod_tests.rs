// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;
use crate::test_support::{settle, TestBroker};

fn frame(tag: &str, cmd: &str, args: serde_json::Value) -> String {
    json!({"tag": tag, "agent": "cache", "cmd": cmd, "args": args}).to_string()
}

// ── verb table ────────────────────────────────────────────────────────

#[yare::parameterized(
    subscribe = { "subscribe", Verb::Subscribe },
    upper = { "SUBSCRIBE", Verb::Subscribe },
    psubscribe = { "PSubscribe", Verb::PSubscribe },
    unsubscribe = { "unsubscribe", Verb::Unsubscribe },
    punsubscribe = { "punsubscribe", Verb::PUnsubscribe },
    get = { "get", Verb::Passthrough },
    publish = { "publish", Verb::Passthrough },
)]
fn verbs(cmd: &str, expected: Verb) {
    assert_eq!(Verb::from_cmd(cmd), expected);
}

// ── local validation ──────────────────────────────────────────────────

#[yare::parameterized(
    channel = { "subscribe", "missing channel" },
    pattern = { "psubscribe", "missing pattern" },
    unsub_channel = { "unsubscribe", "missing channel" },
)]
#[test_macro(tokio::test)]
async fn subscription_verbs_require_a_topic(cmd: &str, expected: &str) {
    let broker = TestBroker::new();
    let client = broker.connect();

    broker.socket.on_frame(&client.conn, &frame("t1", cmd, json!([])));

    assert_eq!(client.pending(), vec![json!({"status": "error", "tag": "t1", "errorMsg": expected})]);
}

#[yare::parameterized(
    subscribe = { "subscribe" },
    passthrough = { "get" },
)]
#[test_macro(tokio::test)]
async fn unconnected_backend_is_reported(cmd: &str) {
    let broker = TestBroker::new();
    let client = broker.connect();

    broker.socket.on_frame(&client.conn, &frame("t1", cmd, json!(["news"])));

    assert_eq!(
        client.pending(),
        vec![json!({"status": "error", "tag": "t1", "errorMsg": "backend is not connected"})]
    );
    assert!(broker.bridge.engine().is_empty());
    assert_eq!(client.conn.in_flight_tags(), 0);
}

// ── backend transitions ───────────────────────────────────────────────

#[tokio::test]
async fn only_transitions_reach_the_backend() -> anyhow::Result<()> {
    let broker = TestBroker::new();
    let mut ops = broker.bridge.attach_queue();
    let a = broker.connect();
    let b = broker.connect();

    broker.socket.on_frame(&a.conn, &frame("s1", "subscribe", json!(["news"])));
    let request = ops.recv().await.ok_or_else(|| anyhow::anyhow!("no backend request"))?;
    assert_eq!(request.op, SubscriptionOp::Subscribe(TopicKind::Channel, "news".to_owned()));

    // Still waiting on the backend: the tag is in flight.
    assert!(a.pending().is_empty());
    broker.socket.on_frame(&a.conn, &frame("s1", "subscribe", json!(["other"])));
    assert_eq!(a.pending(), vec![json!({"status": "error", "tag": "s1", "errorMsg": "duplicate tag"})]);

    if let Some(done) = request.done {
        let _ = done.send(Ok(()));
    }
    settle().await;
    assert_eq!(a.pending()[1], json!({"status": "ok", "tag": "s1", "result": "ok"}));
    assert_eq!(a.conn.in_flight_tags(), 0);

    // A second subscriber is answered locally.
    broker.socket.on_frame(&b.conn, &frame("s2", "subscribe", json!(["news"])));
    assert_eq!(b.pending(), vec![json!({"status": "ok", "tag": "s2", "result": "ok"})]);
    assert!(ops.try_recv().is_err());

    // Only the last unsubscribe goes upstream.
    broker.socket.on_frame(&a.conn, &frame("u1", "unsubscribe", json!(["news"])));
    assert!(ops.try_recv().is_err());
    broker.socket.on_frame(&b.conn, &frame("u2", "unsubscribe", json!(["news"])));
    let request = ops.recv().await.ok_or_else(|| anyhow::anyhow!("no backend request"))?;
    assert_eq!(request.op, SubscriptionOp::Unsubscribe(TopicKind::Channel, "news".to_owned()));
    Ok(())
}

#[tokio::test]
async fn backend_failure_is_reported_to_the_client() -> anyhow::Result<()> {
    let broker = TestBroker::new();
    let mut ops = broker.bridge.attach_queue();
    let client = broker.connect();

    broker.socket.on_frame(&client.conn, &frame("p1", "psubscribe", json!(["news.*"])));
    let request = ops.recv().await.ok_or_else(|| anyhow::anyhow!("no backend request"))?;
    if let Some(done) = request.done {
        let _ = done.send(Err("connection reset".to_owned()));
    }
    settle().await;

    assert_eq!(
        client.pending(),
        vec![json!({"status": "error", "tag": "p1", "errorMsg": "connection reset"})]
    );
    assert!(broker.bridge.engine().is_empty());

    // The rejected subscription is forgotten, so a retry goes upstream again.
    broker.socket.on_frame(&client.conn, &frame("p2", "psubscribe", json!(["news.*"])));
    let retry = ops.recv().await.ok_or_else(|| anyhow::anyhow!("no backend request"))?;
    assert_eq!(retry.op, SubscriptionOp::Subscribe(TopicKind::Pattern, "news.*".to_owned()));
    Ok(())
}

#[tokio::test]
async fn exited_subscriber_leaves_local_state_untouched() {
    let broker = TestBroker::new();
    drop(broker.bridge.attach_queue());
    let client = broker.connect();

    broker.socket.on_frame(&client.conn, &frame("s1", "subscribe", json!(["news"])));
    broker.socket.on_frame(&client.conn, &frame("s2", "subscribe", json!(["news"])));

    let unavailable = |tag: &str| json!({"status": "error", "tag": tag, "errorMsg": "backend is not connected"});
    assert_eq!(client.pending(), vec![unavailable("s1"), unavailable("s2")]);
    assert!(broker.bridge.engine().is_empty());
    assert_eq!(client.conn.in_flight_tags(), 0);
}

#[tokio::test]
async fn unanswered_subscribe_is_rolled_back() -> anyhow::Result<()> {
    let broker = TestBroker::new();
    let mut ops = broker.bridge.attach_queue();
    let client = broker.connect();

    broker.socket.on_frame(&client.conn, &frame("s1", "subscribe", json!(["news"])));
    let request = ops.recv().await.ok_or_else(|| anyhow::anyhow!("no backend request"))?;
    // The worker went away without reporting an outcome.
    drop(request);
    settle().await;

    assert_eq!(
        client.pending(),
        vec![json!({"status": "error", "tag": "s1", "errorMsg": "backend is not connected"})]
    );
    assert!(broker.bridge.engine().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_upstream_unsubscribe_still_leaves_locally() -> anyhow::Result<()> {
    let broker = TestBroker::new();
    let mut ops = broker.bridge.attach_queue();
    let client = broker.connect();
    broker.bridge.engine().subscribe(TopicKind::Channel, "news", client.conn.client())?;

    broker.socket.on_frame(&client.conn, &frame("u1", "unsubscribe", json!(["news"])));
    let request = ops.recv().await.ok_or_else(|| anyhow::anyhow!("no backend request"))?;
    if let Some(done) = request.done {
        let _ = done.send(Err("connection reset".to_owned()));
    }
    settle().await;

    assert_eq!(
        client.pending(),
        vec![json!({"status": "error", "tag": "u1", "errorMsg": "connection reset"})]
    );
    assert!(broker.bridge.engine().is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_subscription_is_rejected() -> anyhow::Result<()> {
    let broker = TestBroker::new();
    let _ops = broker.bridge.attach_queue();
    let client = broker.connect();
    broker.bridge.engine().subscribe(TopicKind::Channel, "news", client.conn.client())?;

    broker.socket.on_frame(&client.conn, &frame("d1", "subscribe", json!(["news"])));

    assert_eq!(
        client.pending(),
        vec![json!({
            "status": "error",
            "tag": "d1",
            "errorMsg": "The channel: news has already been subscribed by this client: ws, 1"
        })]
    );
    Ok(())
}

#[tokio::test]
async fn disconnect_releases_upstream_subscriptions() -> anyhow::Result<()> {
    let broker = TestBroker::new();
    let mut ops = broker.bridge.attach_queue();
    let leaving = broker.connect();
    let staying = broker.connect();
    let engine = broker.bridge.engine();
    engine.subscribe(TopicKind::Channel, "solo", leaving.conn.client())?;
    engine.subscribe(TopicKind::Channel, "shared", leaving.conn.client())?;
    engine.subscribe(TopicKind::Channel, "shared", staying.conn.client())?;
    engine.subscribe(TopicKind::Pattern, "p*", leaving.conn.client())?;

    broker.socket.disconnect(&leaving.conn);

    let mut released = Vec::new();
    while let Ok(request) = ops.try_recv() {
        assert!(request.done.is_none());
        released.push(request.op);
    }
    assert_eq!(
        released,
        vec![
            SubscriptionOp::Unsubscribe(TopicKind::Channel, "solo".to_owned()),
            SubscriptionOp::Unsubscribe(TopicKind::Pattern, "p*".to_owned()),
        ]
    );
    assert_eq!(engine.subscribers(TopicKind::Channel, "shared"), vec![staying.conn.client().clone()]);
    Ok(())
}

#[tokio::test]
async fn backend_messages_reach_subscribers() -> anyhow::Result<()> {
    let broker = TestBroker::new();
    let client = broker.connect();
    broker.bridge.engine().subscribe(TopicKind::Channel, "news", client.conn.client())?;

    broker.bridge.engine().on_message("news", "hello");

    assert_eq!(
        client.pending(),
        vec![json!({"status": "message", "channel": "news", "message": "hello"})]
    );
    Ok(())
}

#[tokio::test]
async fn stop_without_start_is_harmless() {
    let broker = TestBroker::new();
    broker.bridge.stop().await;
    let client = broker.connect();
    broker.socket.on_frame(&client.conn, &frame("t1", "get", json!(["k"])));
    assert_eq!(
        client.pending(),
        vec![json!({"status": "error", "tag": "t1", "errorMsg": "backend is not connected"})]
    );
}
