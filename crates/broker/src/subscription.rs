// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription bookkeeping shared by pub/sub bridges.
//!
//! Each topic kind keeps a forward index (topic → clients) and a reverse
//! index (client → topics). Both are ordered sets of pairs queried by prefix
//! range, so a topic exists exactly while at least one client holds it.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::SubscriptionError;
use crate::protocol::{ClientRef, Response, TopicKind};
use crate::router::RouterAgent;

/// Bidirectional topic ↔ client index for one topic kind.
#[derive(Debug)]
pub struct TopicIndex {
    kind: TopicKind,
    forward: BTreeSet<(String, ClientRef)>,
    reverse: BTreeSet<(ClientRef, String)>,
}

impl TopicIndex {
    pub fn new(kind: TopicKind) -> Self {
        Self { kind, forward: BTreeSet::new(), reverse: BTreeSet::new() }
    }

    pub fn kind(&self) -> TopicKind {
        self.kind
    }

    /// Record `client` on `topic`. Returns whether the topic is new.
    pub fn subscribe(&mut self, topic: &str, client: &ClientRef) -> Result<bool, SubscriptionError> {
        let key = (topic.to_owned(), client.clone());
        if self.forward.contains(&key) {
            return Err(SubscriptionError::AlreadySubscribed {
                kind: self.kind,
                topic: topic.to_owned(),
                client: client.clone(),
            });
        }
        let is_new = !self.has_topic(topic);
        self.forward.insert(key);
        self.reverse.insert((client.clone(), topic.to_owned()));
        Ok(is_new)
    }

    /// Drop `client` from `topic`. Returns whether the topic is now empty.
    pub fn unsubscribe(&mut self, topic: &str, client: &ClientRef) -> Result<bool, SubscriptionError> {
        let key = (topic.to_owned(), client.clone());
        if !self.forward.contains(&key) {
            return Err(self.missing(topic, client));
        }
        self.forward.remove(&key);
        self.reverse.remove(&(client.clone(), topic.to_owned()));
        Ok(!self.has_topic(topic))
    }

    // Most specific explanation of why `client` is not on `topic`.
    fn missing(&self, topic: &str, client: &ClientRef) -> SubscriptionError {
        let kind = self.kind;
        let topic_owned = topic.to_owned();
        if !self.has_topic(topic) {
            SubscriptionError::NotSubscribed { kind, topic: topic_owned }
        } else if !self.clients_on(topic).any(|c| c.agent == client.agent) {
            SubscriptionError::AgentNotSubscribed { kind, topic: topic_owned, agent: client.agent.clone() }
        } else {
            SubscriptionError::ClientNotSubscribed { kind, topic: topic_owned, client: client.clone() }
        }
    }

    fn clients_on<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a ClientRef> + 'a {
        self.forward
            .range((topic.to_owned(), ClientRef::new(String::new(), 0))..)
            .take_while(move |(t, _)| t == topic)
            .map(|(_, client)| client)
    }

    fn topics_held<'a>(&'a self, client: &'a ClientRef) -> impl Iterator<Item = &'a String> + 'a {
        self.reverse
            .range((client.clone(), String::new())..)
            .take_while(move |(c, _)| c == client)
            .map(|(_, topic)| topic)
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.clients_on(topic).next().is_some()
    }

    /// Clients subscribed to `topic`, ordered by agent then id.
    pub fn subscribers(&self, topic: &str) -> Vec<ClientRef> {
        self.clients_on(topic).cloned().collect()
    }

    /// Topics held by `client`, in lexical order.
    pub fn topics_of(&self, client: &ClientRef) -> Vec<String> {
        self.topics_held(client).cloned().collect()
    }

    /// Number of distinct topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        let mut count = 0;
        let mut last: Option<&str> = None;
        for (topic, _) in &self.forward {
            if last != Some(topic.as_str()) {
                count += 1;
                last = Some(topic.as_str());
            }
        }
        count
    }

    /// Number of (topic, client) pairs.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Topics left without subscribers after a client was removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Emptied {
    pub channels: Vec<String>,
    pub patterns: Vec<String>,
}

impl Emptied {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.patterns.is_empty()
    }

    /// Every emptied topic tagged with its kind.
    pub fn into_topics(self) -> impl Iterator<Item = (TopicKind, String)> {
        let channels = self.channels.into_iter().map(|t| (TopicKind::Channel, t));
        let patterns = self.patterns.into_iter().map(|t| (TopicKind::Pattern, t));
        channels.chain(patterns)
    }
}

/// Channel and pattern indices plus fan-out of backend deliveries.
pub struct SubscriptionEngine {
    owner: String,
    router: Arc<RouterAgent>,
    channels: Mutex<TopicIndex>,
    patterns: Mutex<TopicIndex>,
}

impl SubscriptionEngine {
    pub fn new(owner: impl Into<String>, router: Arc<RouterAgent>) -> Self {
        Self {
            owner: owner.into(),
            router,
            channels: Mutex::new(TopicIndex::new(TopicKind::Channel)),
            patterns: Mutex::new(TopicIndex::new(TopicKind::Pattern)),
        }
    }

    fn index(&self, kind: TopicKind) -> &Mutex<TopicIndex> {
        match kind {
            TopicKind::Channel => &self.channels,
            TopicKind::Pattern => &self.patterns,
        }
    }

    /// Subscribe `client` to a topic. `Ok(true)` means the topic is new and
    /// the backend must be told.
    pub fn subscribe(&self, kind: TopicKind, topic: &str, client: &ClientRef) -> Result<bool, SubscriptionError> {
        let is_new = self.index(kind).lock().subscribe(topic, client)?;
        debug!(agent = %self.owner, %kind, topic, %client, is_new, "subscribed");
        Ok(is_new)
    }

    /// Unsubscribe `client` from a topic. `Ok(true)` means the topic is now
    /// empty and the backend must be told.
    pub fn unsubscribe(&self, kind: TopicKind, topic: &str, client: &ClientRef) -> Result<bool, SubscriptionError> {
        let emptied = self.index(kind).lock().unsubscribe(topic, client)?;
        debug!(agent = %self.owner, %kind, topic, %client, emptied, "unsubscribed");
        Ok(emptied)
    }

    /// Fan a channel message out to every subscriber. Returns the number of
    /// clients it was dispatched to.
    pub fn on_message(&self, channel: &str, message: &str) -> usize {
        let subscribers = self.channels.lock().subscribers(channel);
        if subscribers.is_empty() {
            trace!(agent = %self.owner, channel, "message for channel without subscribers");
            return 0;
        }
        let response = Response::Message { channel: channel.to_owned(), message: message.to_owned() };
        for client in &subscribers {
            self.router.dispatch_message(client, channel, &response);
        }
        subscribers.len()
    }

    /// Fan a pattern message out to every subscriber of `pattern`.
    pub fn on_pmessage(&self, pattern: &str, channel: &str, message: &str) -> usize {
        let subscribers = self.patterns.lock().subscribers(pattern);
        if subscribers.is_empty() {
            trace!(agent = %self.owner, pattern, channel, "pmessage for pattern without subscribers");
            return 0;
        }
        let response = Response::PMessage {
            pattern: pattern.to_owned(),
            channel: channel.to_owned(),
            message: message.to_owned(),
        };
        for client in &subscribers {
            self.router.dispatch_pmessage(client, pattern, channel, &response);
        }
        subscribers.len()
    }

    /// Drop every subscription held by `client`.
    ///
    /// Best effort: a failure on one topic is logged and the rest are still
    /// attempted. Returns the topics that lost their last subscriber.
    pub fn remove_client(&self, client: &ClientRef) -> Emptied {
        Emptied {
            channels: self.remove_from(TopicKind::Channel, client),
            patterns: self.remove_from(TopicKind::Pattern, client),
        }
    }

    fn remove_from(&self, kind: TopicKind, client: &ClientRef) -> Vec<String> {
        let mut index = self.index(kind).lock();
        let mut emptied = Vec::new();
        for topic in index.topics_of(client) {
            match index.unsubscribe(&topic, client) {
                Ok(true) => emptied.push(topic),
                Ok(false) => {}
                Err(e) => warn!(agent = %self.owner, %client, err = %e, "failed to drop subscription"),
            }
        }
        emptied
    }

    pub fn subscribers(&self, kind: TopicKind, topic: &str) -> Vec<ClientRef> {
        self.index(kind).lock().subscribers(topic)
    }

    pub fn topics_of(&self, kind: TopicKind, client: &ClientRef) -> Vec<String> {
        self.index(kind).lock().topics_of(client)
    }

    pub fn topic_count(&self, kind: TopicKind) -> usize {
        self.index(kind).lock().topic_count()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty() && self.patterns.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
