// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-process broker.
//!
//! [`MemoryBroker`] routes publishes between [`MemoryTransport`] sessions
//! using the gateway's wildcard matcher. Tests use it to drive an
//! [`MqttDriver`](crate::MqttDriver) end to end without a network, and to
//! simulate outages with [`MemoryBroker::set_reachable`] and
//! [`MemoryBroker::drop_connections`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use tagway_core::matcher;

use super::transport::{ConnectOptions, MqttTransport, QoS, TransportEvent};
use crate::error::{MqttError, MqttResult};

// =============================================================================
// PublishedMessage
// =============================================================================

/// A message accepted by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic.
    pub topic: String,
    /// Payload.
    pub payload: Vec<u8>,
    /// Requested QoS.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
}

// =============================================================================
// MemoryBroker
// =============================================================================

struct Session {
    client_id: String,
    filters: BTreeSet<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Default)]
struct BrokerState {
    sessions: HashMap<u64, Session>,
    next_session: u64,
    unreachable: bool,
    credentials: Option<(String, String)>,
    rejected_filters: HashSet<String>,
    published: Vec<PublishedMessage>,
}

impl BrokerState {
    fn route(&mut self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        self.sessions.retain(|_, session| {
            if !session.filters.iter().any(|f| matcher::matches(f, topic)) {
                return true;
            }
            let sent = session
                .events
                .send(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .is_ok();
            if sent {
                delivered += 1;
            }
            sent
        });
        delivered
    }
}

/// A shared in-memory broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Creates an empty, reachable broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport bound to this broker.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
            session: None,
        }
    }

    /// Makes future connection attempts succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    /// Requires these credentials from every new session.
    pub fn require_credentials(&self, username: impl Into<String>, password: impl Into<String>) {
        self.state.lock().credentials = Some((username.into(), password.into()));
    }

    /// Makes the broker refuse subscriptions to `filter`.
    pub fn reject_filter(&self, filter: impl Into<String>) {
        self.state.lock().rejected_filters.insert(filter.into());
    }

    /// Publishes from outside any session. Returns the number of sessions
    /// the message was delivered to; each session gets it at most once.
    pub fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) -> usize {
        let payload = payload.as_ref();
        let mut state = self.state.lock();
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: QoS::AtMostOnce,
            retain: false,
        });
        state.route(topic, payload)
    }

    /// Ends every session, reporting `reason` to each.
    pub fn drop_connections(&self, reason: &str) {
        let sessions: Vec<Session> = self.state.lock().sessions.drain().map(|(_, s)| s).collect();
        for session in sessions {
            trace!(client_id = %session.client_id, reason, "Dropping session");
            let _ = session.events.send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Returns the number of open sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Returns the union of all session filters.
    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.state
            .lock()
            .sessions
            .values()
            .flat_map(|s| s.filters.iter().cloned())
            .collect()
    }

    /// Returns every message accepted so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }
}

// =============================================================================
// MemoryTransport
// =============================================================================

/// A session on a [`MemoryBroker`].
pub struct MemoryTransport {
    broker: MemoryBroker,
    session: Option<u64>,
}

impl MemoryTransport {
    fn session_id(&self) -> MqttResult<u64> {
        let id = self.session.ok_or(MqttError::NotConnected)?;
        if self.broker.state.lock().sessions.contains_key(&id) {
            Ok(id)
        } else {
            Err(MqttError::NotConnected)
        }
    }
}

#[async_trait]
impl MqttTransport for MemoryTransport {
    async fn connect(
        &mut self,
        options: &ConnectOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> MqttResult<()> {
        let mut state = self.broker.state.lock();
        if state.unreachable {
            return Err(MqttError::ConnectionRefused {
                endpoint: options.endpoint(),
            });
        }
        if let Some((username, password)) = &state.credentials {
            let presented = (options.username.as_deref(), options.password.as_deref());
            if presented != (Some(username.as_str()), Some(password.as_str())) {
                return Err(MqttError::NotAuthorized {
                    endpoint: options.endpoint(),
                });
            }
        }

        if let Some(previous) = self.session.take() {
            state.sessions.remove(&previous);
        }
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(
            id,
            Session {
                client_id: options.client_id.clone(),
                filters: BTreeSet::new(),
                events,
            },
        );
        self.session = Some(id);
        Ok(())
    }

    async fn disconnect(&mut self) -> MqttResult<()> {
        if let Some(id) = self.session.take() {
            self.broker.state.lock().sessions.remove(&id);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session_id().is_ok()
    }

    async fn subscribe(&mut self, filter: &str, _qos: QoS) -> MqttResult<()> {
        let id = self.session_id()?;
        let mut state = self.broker.state.lock();
        if state.rejected_filters.contains(filter) {
            return Err(MqttError::subscribe_rejected(filter, "not authorized"));
        }
        if let Some(session) = state.sessions.get_mut(&id) {
            session.filters.insert(filter.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, filter: &str) -> MqttResult<()> {
        let id = self.session_id()?;
        if let Some(session) = self.broker.state.lock().sessions.get_mut(&id) {
            session.filters.remove(filter);
        }
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> MqttResult<()> {
        self.session_id()?;
        let mut state = self.broker.state.lock();
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        state.route(topic, payload);
        Ok(())
    }

    fn display_name(&self) -> String {
        match self.session {
            Some(id) => format!("memory://session-{id}"),
            None => "memory://".to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
