// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client subscription bookkeeping.
//!
//! The registry keeps three tables:
//!
//! ```text
//! client id  -> topic names         (what each client asked for)
//! topic name -> (topic, client ids) (who needs each topic)
//! pattern    -> MonitoredItem       (what the backend has been asked for)
//! ```
//!
//! A topic lives while at least one client references it. A backend item
//! lives while at least one live topic uses its pattern, so two topics that
//! differ only in format share one backend subscription.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::topic::Topic;

// =============================================================================
// MonitoredItem
// =============================================================================

/// Backend-side handle for one subscribed pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitoredItem {
    /// Backend-assigned identifier.
    pub id: u64,
    /// The node pattern this item monitors.
    pub pattern: String,
}

impl MonitoredItem {
    /// Creates a new item.
    pub fn new(id: u64, pattern: impl Into<String>) -> Self {
        Self {
            id,
            pattern: pattern.into(),
        }
    }
}

// =============================================================================
// SubscriptionRegistry
// =============================================================================

#[derive(Debug)]
struct TopicEntry {
    topic: Topic,
    clients: BTreeSet<String>,
}

/// Tracks which clients need which topics and which backend items back them.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    clients: HashMap<String, BTreeSet<String>>,
    topics: BTreeMap<String, TopicEntry>,
    items: BTreeMap<String, MonitoredItem>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `client_id` wants `topic`.
    ///
    /// Returns `true` if the topic was not live before this call.
    pub fn subscribe(&mut self, client_id: &str, topic: Topic) -> bool {
        let name = topic.topic_name();
        self.clients
            .entry(client_id.to_string())
            .or_default()
            .insert(name.clone());

        match self.topics.get_mut(&name) {
            Some(entry) => {
                entry.clients.insert(client_id.to_string());
                false
            }
            None => {
                let mut clients = BTreeSet::new();
                clients.insert(client_id.to_string());
                self.topics.insert(name, TopicEntry { topic, clients });
                true
            }
        }
    }

    /// Drops `client_id`'s reference to a topic.
    ///
    /// Returns the topic if no client references it anymore. Unknown clients
    /// and topics are ignored.
    pub fn unsubscribe(&mut self, client_id: &str, topic_name: &str) -> Option<Topic> {
        if let Some(names) = self.clients.get_mut(client_id) {
            names.remove(topic_name);
            if names.is_empty() {
                self.clients.remove(client_id);
            }
        }

        let entry = self.topics.get_mut(topic_name)?;
        entry.clients.remove(client_id);
        if entry.clients.is_empty() {
            return self.topics.remove(topic_name).map(|e| e.topic);
        }
        None
    }

    /// Drops every reference held by `client_id` and returns the topics that
    /// died as a result.
    pub fn unsubscribe_client(&mut self, client_id: &str) -> Vec<Topic> {
        let names = self.clients.get(client_id).cloned().unwrap_or_default();
        names
            .iter()
            .filter_map(|name| self.unsubscribe(client_id, name))
            .collect()
    }

    /// Returns `true` if the client references the topic.
    pub fn is_subscribed(&self, client_id: &str, topic_name: &str) -> bool {
        self.clients
            .get(client_id)
            .is_some_and(|names| names.contains(topic_name))
    }

    /// Returns the topic names referenced by a client.
    pub fn topics_of(&self, client_id: &str) -> Vec<String> {
        self.clients
            .get(client_id)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the clients referencing a topic.
    pub fn clients_of(&self, topic_name: &str) -> Vec<String> {
        self.topics
            .get(topic_name)
            .map(|e| e.clients.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of live topics.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Returns the number of clients with at least one topic.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Returns the live topics.
    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.values().map(|e| &e.topic)
    }

    // =========================================================================
    // Backend items
    // =========================================================================

    /// Returns every distinct pattern used by a live topic.
    pub fn patterns(&self) -> Vec<String> {
        self.topics
            .values()
            .map(|e| e.topic.node.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Returns the live patterns that have no backend item yet.
    pub fn unbacked_patterns(&self) -> Vec<String> {
        self.patterns()
            .into_iter()
            .filter(|p| !self.items.contains_key(p))
            .collect()
    }

    /// Records backend items returned by a driver.
    pub fn attach(&mut self, items: impl IntoIterator<Item = MonitoredItem>) {
        for item in items {
            self.items.insert(item.pattern.clone(), item);
        }
    }

    /// Removes and returns the items whose pattern no live topic uses.
    pub fn release_unreferenced(&mut self) -> Vec<MonitoredItem> {
        let live: BTreeSet<String> = self.patterns().into_iter().collect();
        let dead: Vec<String> = self
            .items
            .keys()
            .filter(|p| !live.contains(*p))
            .cloned()
            .collect();
        dead.iter().filter_map(|p| self.items.remove(p)).collect()
    }

    /// Forgets every backend item. Used when the backend connection is gone.
    pub fn detach_all(&mut self) -> Vec<MonitoredItem> {
        std::mem::take(&mut self.items).into_values().collect()
    }

    /// Returns the number of backend items.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Returns the item for a pattern.
    pub fn item(&self, pattern: &str) -> Option<&MonitoredItem> {
        self.items.get(pattern)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::{Format, SystemType};

    fn topic(node: &str, format: Format) -> Topic {
        Topic::new(SystemType::Opc, "plant", format, node)
    }

    #[test]
    fn test_second_client_does_not_create_topic() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.subscribe("c1", topic("n1", Format::Json)));
        assert!(!registry.subscribe("c2", topic("n1", Format::Json)));
        assert_eq!(registry.topic_count(), 1);
        assert_eq!(registry.clients_of("Opc/plant/node:json/n1"), vec!["c1", "c2"]);
    }

    #[test]
    fn test_pattern_shared_across_formats() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("c1", topic("n1", Format::Json));
        registry.subscribe("c1", topic("n1", Format::Value));
        assert_eq!(registry.unbacked_patterns(), vec!["n1"]);

        registry.attach([MonitoredItem::new(1, "n1")]);
        assert!(registry.unbacked_patterns().is_empty());

        registry.unsubscribe("c1", "Opc/plant/node:json/n1");
        assert!(registry.release_unreferenced().is_empty());

        let dropped = registry.unsubscribe("c1", "Opc/plant/node:value/n1");
        assert!(dropped.is_some());
        assert_eq!(registry.release_unreferenced(), vec![MonitoredItem::new(1, "n1")]);
        assert_eq!(registry.item_count(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("c1", topic("n1", Format::Json));

        assert!(registry.unsubscribe("c1", "Opc/plant/node:json/n1").is_some());
        assert!(registry.unsubscribe("c1", "Opc/plant/node:json/n1").is_none());
        assert!(registry.unsubscribe("ghost", "Opc/plant/node:json/zz").is_none());
        assert_eq!(registry.topic_count(), 0);
        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn test_topic_survives_until_last_client_leaves() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("c1", topic("n1", Format::Json));
        registry.subscribe("c2", topic("n1", Format::Json));

        assert!(registry.unsubscribe("c1", "Opc/plant/node:json/n1").is_none());
        assert!(registry.is_subscribed("c2", "Opc/plant/node:json/n1"));
        assert!(registry.unsubscribe("c2", "Opc/plant/node:json/n1").is_some());
    }

    #[test]
    fn test_unsubscribe_client_and_detach() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("c1", topic("n1", Format::Json));
        registry.subscribe("c1", topic("n2", Format::Json));
        registry.attach([MonitoredItem::new(1, "n1"), MonitoredItem::new(2, "n2")]);

        assert_eq!(registry.detach_all().len(), 2);
        assert_eq!(registry.unbacked_patterns(), vec!["n1", "n2"]);

        let dropped = registry.unsubscribe_client("c1");
        assert_eq!(dropped.len(), 2);
        assert!(registry.topics_of("c1").is_empty());
    }
}
