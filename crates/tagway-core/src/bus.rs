// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Address-based message bus.
//!
//! The bus carries two kinds of traffic:
//!
//! - **Request/reply**: one handler per address. Each request gets a
//!   correlation id and a oneshot reply slot that is fulfilled exactly once.
//!   A request that gets no reply within the bound fails with
//!   [`BusError::Timeout`].
//! - **Publish**: fire-and-forget delivery to every consumer registered on an
//!   exact address. Consumer queues are unbounded so a publisher never waits
//!   on a slow consumer.
//!
//! # Architecture
//!
//! ```text
//!  Bridge ──request("Opc/plant/Read")──▶ ┌──────────┐ ──▶ RequestReceiver (driver runtime)
//!         ◀──────────── reply ────────── │MessageBus│ ◀── Request::reply()
//!                                        │          │
//!  Consumer("Opc/plant/node:json/n1") ◀──│          │ ◀── publish(topic_name, payload)
//!                                        └──────────┘
//! ```
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use tagway_core::bus::MessageBus;
//! use serde_json::json;
//!
//! let bus = MessageBus::new();
//! let mut handler = bus.register("Echo");
//! tokio::spawn(async move {
//!     while let Some(request) = handler.recv().await {
//!         let body = request.body().clone();
//!         request.reply(body);
//!     }
//! });
//!
//! let reply = bus.request("Echo", json!({"Ok": true})).await.unwrap();
//! assert_eq!(reply, json!({"Ok": true}));
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{BusError, BusResult, DriverError};

/// Default bound for a request/reply round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of a handler's request queue.
const HANDLER_QUEUE_CAPACITY: usize = 256;

type ReplySlot = oneshot::Sender<BusResult<serde_json::Value>>;

// =============================================================================
// Request
// =============================================================================

/// A request delivered to a handler.
///
/// Dropping a request without replying makes the caller see
/// [`BusError::Closed`].
pub struct Request {
    id: Uuid,
    address: String,
    body: serde_json::Value,
    reply: ReplySlot,
    received_at: Instant,
    timestamp: DateTime<Utc>,
}

impl Request {
    /// Returns the correlation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the address the request was sent to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the request body.
    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    /// Decodes the body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DriverError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| DriverError::invalid_request(format!("{}: {e}", self.address)))
    }

    /// Returns the time since the request was sent.
    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Returns when the request was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Replies with a JSON value.
    pub fn reply(self, body: serde_json::Value) {
        let _ = self.reply.send(Ok(body));
    }

    /// Replies with a serializable payload.
    pub fn reply_json<T: Serialize>(self, body: &T) {
        let result = serde_json::to_value(body).map_err(BusError::from);
        let _ = self.reply.send(result);
    }

    /// Replies with a failure.
    pub fn fail(self, code: i32, message: impl Into<String>) {
        let _ = self.reply.send(Err(BusError::failed(code, message)));
    }

    /// Replies with a driver error, mapped to a failure code.
    pub fn fail_with(self, error: &DriverError) {
        self.fail(error.failure_code(), error.to_string());
    }

    /// Replies with the outcome of a driver operation.
    pub fn respond<T: Serialize>(self, result: Result<T, DriverError>) {
        match result {
            Ok(body) => self.reply_json(&body),
            Err(error) => self.fail_with(&error),
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("body", &self.body)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Bus Statistics
// =============================================================================

/// Snapshot of bus counters.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Requests sent.
    pub requests_sent: u64,
    /// Requests that ended in a failure reply, no handler or closed slot.
    pub requests_failed: u64,
    /// Requests that timed out.
    pub requests_timed_out: u64,
    /// Publish calls.
    pub messages_published: u64,
    /// Payload copies handed to consumers.
    pub messages_delivered: u64,
    /// Registered handler addresses.
    pub handler_count: u64,
    /// Registered consumers.
    pub consumer_count: u64,
}

#[derive(Debug, Default)]
struct AtomicBusStats {
    requests_sent: AtomicU64,
    requests_failed: AtomicU64,
    requests_timed_out: AtomicU64,
    messages_published: AtomicU64,
    messages_delivered: AtomicU64,
}

// =============================================================================
// MessageBus
// =============================================================================

struct HandlerEntry {
    registration: u64,
    sender: mpsc::Sender<Request>,
}

struct ConsumerEntry {
    registration: u64,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

struct BusInner {
    handlers: DashMap<String, HandlerEntry>,
    consumers: DashMap<String, Vec<ConsumerEntry>>,
    request_timeout: Duration,
    next_registration: AtomicU64,
    stats: AtomicBusStats,
}

/// The gateway's internal message bus.
///
/// Cheap to clone; all clones share the same routing tables.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    /// Creates a bus with the default request timeout.
    pub fn new() -> Self {
        Self::with_request_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a bus with a custom request timeout.
    pub fn with_request_timeout(request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: DashMap::new(),
                consumers: DashMap::new(),
                request_timeout,
                next_registration: AtomicU64::new(1),
                stats: AtomicBusStats::default(),
            }),
        }
    }

    /// Returns the request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    fn next_registration(&self) -> u64 {
        self.inner.next_registration.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Registers the handler for one address.
    pub fn register(&self, address: impl Into<String>) -> RequestReceiver {
        self.register_many([address.into()])
    }

    /// Registers one handler for several addresses; all requests arrive on
    /// the same receiver.
    ///
    /// A later registration on the same address replaces the earlier one.
    pub fn register_many<I>(&self, addresses: I) -> RequestReceiver
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let (sender, receiver) = mpsc::channel(HANDLER_QUEUE_CAPACITY);
        let registration = self.next_registration();
        let addresses: Vec<String> = addresses.into_iter().map(Into::into).collect();

        for address in &addresses {
            let previous = self.inner.handlers.insert(
                address.clone(),
                HandlerEntry {
                    registration,
                    sender: sender.clone(),
                },
            );
            if previous.is_some() {
                tracing::warn!(address = %address, "Replacing existing request handler");
            }
        }

        tracing::debug!(addresses = ?addresses, "Registered request handler");

        RequestReceiver {
            receiver,
            addresses,
            registration,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Returns `true` if a handler is registered on the address.
    pub fn has_handler(&self, address: &str) -> bool {
        self.inner.handlers.contains_key(address)
    }

    // =========================================================================
    // Request / Reply
    // =========================================================================

    /// Sends a request and waits for the reply within the bus timeout.
    pub async fn request(&self, address: &str, body: serde_json::Value) -> BusResult<serde_json::Value> {
        self.request_with_timeout(address, body, self.inner.request_timeout)
            .await
    }

    /// Sends a request with an explicit timeout.
    pub async fn request_with_timeout(
        &self,
        address: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> BusResult<serde_json::Value> {
        let stats = &self.inner.stats;
        stats.requests_sent.fetch_add(1, Ordering::Relaxed);

        let Some(sender) = self.inner.handlers.get(address).map(|h| h.sender.clone()) else {
            stats.requests_failed.fetch_add(1, Ordering::Relaxed);
            return Err(BusError::no_handler(address));
        };

        let (reply, slot) = oneshot::channel();
        let request = Request {
            id: Uuid::now_v7(),
            address: address.to_string(),
            body,
            reply,
            received_at: Instant::now(),
            timestamp: Utc::now(),
        };
        let id = request.id;

        let exchange = async move {
            sender.send(request).await.map_err(|_| BusError::Closed)?;
            slot.await.map_err(|_| BusError::Closed)?
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(error)) => {
                stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(address = %address, request_id = %id, error = %error, "Request failed");
                Err(error)
            }
            Err(_) => {
                stats.requests_timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    address = %address,
                    request_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(BusError::timeout(address, timeout))
            }
        }
    }

    /// Sends a typed request and decodes the typed reply.
    pub async fn request_json<Req, Resp>(&self, address: &str, body: &Req) -> BusResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let reply = self.request(address, body).await?;
        Ok(serde_json::from_value(reply)?)
    }

    // =========================================================================
    // Publish / Consume
    // =========================================================================

    /// Registers a consumer on an exact address.
    pub fn consumer(&self, address: impl Into<String>) -> Consumer {
        let address = address.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let registration = self.next_registration();

        self.inner
            .consumers
            .entry(address.clone())
            .or_default()
            .push(ConsumerEntry { registration, sender });

        Consumer {
            receiver,
            address,
            registration,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers a payload to every consumer of the address.
    ///
    /// Returns the number of consumers reached.
    pub fn publish(&self, address: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.inner.stats.messages_published.fetch_add(1, Ordering::Relaxed);

        let Some(mut consumers) = self.inner.consumers.get_mut(address) else {
            return 0;
        };

        let payload = payload.into();
        consumers.retain(|c| !c.sender.is_closed());
        let delivered = consumers
            .iter()
            .filter(|c| c.sender.send(payload.clone()).is_ok())
            .count();

        self.inner
            .stats
            .messages_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Returns the number of consumers on an address.
    pub fn consumer_count(&self, address: &str) -> usize {
        self.inner.consumers.get(address).map(|c| c.len()).unwrap_or(0)
    }

    /// Returns current statistics.
    pub fn stats(&self) -> BusStats {
        let stats = &self.inner.stats;
        BusStats {
            requests_sent: stats.requests_sent.load(Ordering::Relaxed),
            requests_failed: stats.requests_failed.load(Ordering::Relaxed),
            requests_timed_out: stats.requests_timed_out.load(Ordering::Relaxed),
            messages_published: stats.messages_published.load(Ordering::Relaxed),
            messages_delivered: stats.messages_delivered.load(Ordering::Relaxed),
            handler_count: self.inner.handlers.len() as u64,
            consumer_count: self.inner.consumers.iter().map(|c| c.len() as u64).sum(),
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("request_timeout", &self.inner.request_timeout)
            .field("handlers", &self.inner.handlers.len())
            .field("consumer_addresses", &self.inner.consumers.len())
            .finish()
    }
}

// =============================================================================
// RequestReceiver
// =============================================================================

/// Receiving side of a handler registration.
///
/// Dropping the receiver (or calling [`RequestReceiver::unregister`]) removes
/// its addresses from the bus, unless they were re-registered since.
pub struct RequestReceiver {
    receiver: mpsc::Receiver<Request>,
    addresses: Vec<String>,
    registration: u64,
    bus: Weak<BusInner>,
}

impl RequestReceiver {
    /// Receives the next request.
    pub async fn recv(&mut self) -> Option<Request> {
        self.receiver.recv().await
    }

    /// Returns the addresses served.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Unregisters explicitly.
    pub fn unregister(self) {}
}

impl Drop for RequestReceiver {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            for address in &self.addresses {
                bus.handlers
                    .remove_if(address, |_, entry| entry.registration == self.registration);
            }
            tracing::debug!(addresses = ?self.addresses, "Unregistered request handler");
        }
    }
}

impl std::fmt::Debug for RequestReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestReceiver")
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Consumer
// =============================================================================

/// A registered consumer with its own unbounded queue.
pub struct Consumer {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    address: String,
    registration: u64,
    bus: Weak<BusInner>,
}

impl Consumer {
    /// Receives the next payload. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }

    /// Receives a payload if one is queued.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.try_recv().ok()
    }

    /// Returns the consumed address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Unregisters explicitly.
    pub fn unregister(self) {}
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let empty = match bus.consumers.get_mut(&self.address) {
            Some(mut consumers) => {
                consumers.retain(|c| c.registration != self.registration);
                consumers.is_empty()
            }
            None => false,
        };
        if empty {
            bus.consumers.remove_if(&self.address, |_, c| c.is_empty());
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_reply() {
        let bus = MessageBus::new();
        let mut handler = bus.register("Opc/plant/Read");

        tokio::spawn(async move {
            while let Some(request) = handler.recv().await {
                let node = request.body()["NodeId"].clone();
                request.reply(json!({ "Result": { "value": node } }));
            }
        });

        let reply = bus.request("Opc/plant/Read", json!({"NodeId": "n1"})).await.unwrap();
        assert_eq!(reply["Result"]["value"], "n1");
        assert_eq!(bus.stats().requests_sent, 1);
    }

    #[tokio::test]
    async fn test_no_handler() {
        let bus = MessageBus::new();
        let result = bus.request("Opc/none/Read", json!({})).await;
        assert!(matches!(result, Err(BusError::NoHandler { .. })));
    }

    #[tokio::test]
    async fn test_timeout() {
        let bus = MessageBus::with_request_timeout(Duration::from_millis(20));
        let mut handler = bus.register("slow");
        tokio::spawn(async move {
            let _held = handler.recv().await;
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let result = bus.request("slow", json!({})).await;
        assert!(matches!(result, Err(BusError::Timeout { .. })));
        assert_eq!(bus.stats().requests_timed_out, 1);
    }

    #[tokio::test]
    async fn test_dropped_request_is_closed() {
        let bus = MessageBus::new();
        let mut handler = bus.register("drop");
        tokio::spawn(async move {
            let request = handler.recv().await;
            drop(request);
        });

        let result = bus.request("drop", json!({})).await;
        assert!(matches!(result, Err(BusError::Closed)));
    }

    #[tokio::test]
    async fn test_failure_reply() {
        let bus = MessageBus::new();
        let mut handler = bus.register("fail");
        tokio::spawn(async move {
            if let Some(request) = handler.recv().await {
                request.fail_with(&DriverError::unsupported("browse"));
            }
        });

        match bus.request("fail", json!({})).await {
            Err(BusError::Failed { code, .. }) => assert_eq!(code, 501),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_many_and_unregister_on_drop() {
        let bus = MessageBus::new();
        let handler = bus.register_many(["a/Read", "a/Write"]);
        assert!(bus.has_handler("a/Read"));
        assert!(bus.has_handler("a/Write"));

        drop(handler);
        assert!(!bus.has_handler("a/Read"));
        assert!(!bus.has_handler("a/Write"));
    }

    #[tokio::test]
    async fn test_stale_receiver_does_not_remove_replacement() {
        let bus = MessageBus::new();
        let first = bus.register("x");
        let _second = bus.register("x");
        drop(first);
        assert!(bus.has_handler("x"));
    }

    #[tokio::test]
    async fn test_publish_fan_out_and_drop() {
        let bus = MessageBus::new();
        let mut c1 = bus.consumer("topic");
        let mut c2 = bus.consumer("topic");
        let _other = bus.consumer("other");

        assert_eq!(bus.publish("topic", b"v1".to_vec()), 2);
        assert_eq!(c1.recv().await.unwrap(), b"v1");
        assert_eq!(c2.recv().await.unwrap(), b"v1");

        drop(c2);
        assert_eq!(bus.consumer_count("topic"), 1);
        assert_eq!(bus.publish("topic", b"v2".to_vec()), 1);
        assert_eq!(c1.try_recv().unwrap(), b"v2");

        drop(c1);
        assert_eq!(bus.consumer_count("topic"), 0);
        assert_eq!(bus.publish("topic", b"v3".to_vec()), 0);
    }

    #[tokio::test]
    async fn test_request_json_typed() {
        #[derive(Serialize)]
        struct Ping {
            n: u32,
        }
        #[derive(Deserialize)]
        struct Pong {
            n: u32,
        }

        let bus = MessageBus::new();
        let mut handler = bus.register("ping");
        tokio::spawn(async move {
            while let Some(request) = handler.recv().await {
                let n = request.body()["n"].as_u64().unwrap_or(0) + 1;
                request.reply(json!({ "n": n }));
            }
        });

        let pong: Pong = bus.request_json("ping", &Ping { n: 1 }).await.unwrap();
        assert_eq!(pong.n, 2);
    }
}
