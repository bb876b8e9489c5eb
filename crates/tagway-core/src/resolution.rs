// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Address resolution cache.
//!
//! Maps a concrete wire address to the subscribed topics whose node pattern
//! matches it. Each driver runtime owns exactly one cache and is its only
//! writer, so the cache takes `&mut self` and carries no locks.
//!
//! Invalidation is precise: inserting or removing a topic drops only the
//! cached addresses matched by that topic's pattern. Every other cached
//! entry is unaffected by the change and stays valid.

use std::collections::HashMap;
use std::sync::Arc;

use crate::matcher::matches;
use crate::topic::Topic;

/// Hit/miss counters for a [`ResolutionCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that required a scan.
    pub misses: u64,
    /// Cache entries dropped by invalidation.
    pub invalidations: u64,
}

/// Subscribed topic set plus the `address -> topics` cache.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    topics: Vec<Topic>,
    cache: HashMap<String, Arc<[Topic]>>,
    stats: ResolutionStats,
}

impl ResolutionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the subscribed topics in subscription order.
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Returns the number of subscribed topics.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Returns `true` if no topic is subscribed.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Returns `true` if a topic with this name is subscribed.
    pub fn contains(&self, topic_name: &str) -> bool {
        self.topics.iter().any(|t| t.topic_name() == topic_name)
    }

    /// Returns the number of cached addresses.
    pub fn cached_addresses(&self) -> usize {
        self.cache.len()
    }

    /// Returns the counters.
    pub fn stats(&self) -> ResolutionStats {
        self.stats
    }

    /// Adds a topic. Returns `false` if it was already present.
    pub fn insert(&mut self, topic: Topic) -> bool {
        let name = topic.topic_name();
        if self.contains(&name) {
            return false;
        }
        self.invalidate(&topic.node);
        self.topics.push(topic);
        true
    }

    /// Removes a topic by name.
    pub fn remove(&mut self, topic_name: &str) -> Option<Topic> {
        let index = self.topics.iter().position(|t| t.topic_name() == topic_name)?;
        let topic = self.topics.remove(index);
        self.invalidate(&topic.node);
        Some(topic)
    }

    /// Returns every subscribed topic matching `address`, in subscription
    /// order, each bound to the address.
    pub fn resolve(&mut self, address: &str) -> Arc<[Topic]> {
        if let Some(hit) = self.cache.get(address) {
            self.stats.hits += 1;
            return hit.clone();
        }

        self.stats.misses += 1;
        let resolved: Arc<[Topic]> = self.scan(address).into();
        self.cache.insert(address.to_string(), resolved.clone());
        resolved
    }

    /// Resolves `address` against the topic set without touching the cache.
    pub fn scan(&self, address: &str) -> Vec<Topic> {
        self.topics
            .iter()
            .filter(|t| matches(&t.node, address))
            .map(|t| t.resolved(address))
            .collect()
    }

    fn invalidate(&mut self, pattern: &str) {
        let before = self.cache.len();
        self.cache.retain(|address, _| !matches(pattern, address));
        self.stats.invalidations += (before - self.cache.len()) as u64;
    }
}

// =============================================================================
// Tests
// =============================================================================
