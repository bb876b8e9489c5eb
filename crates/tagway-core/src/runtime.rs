// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Driver runtime.
//!
//! One runtime per configured backend system. The runtime owns its
//! [`ProtocolDriver`], its [`ResolutionCache`] and its
//! [`SubscriptionRegistry`], and mutates them only from its own task:
//!
//! ```text
//!                     ┌───────────────────────── DriverRuntime task ─┐
//!  bus requests ────▶ │  Read/Write/Browse/Schema/ServerInfo         │
//!  ({T}/{S}/{Svc})    │  Subscribe/Unsubscribe/Publish               │
//!                     │                                              │
//!  DriverEvents ────▶ │  Value  ─▶ resolve ─▶ reader ─▶ publish      │ ───▶ bus consumers
//!                     │  ConnectionLost ─▶ backoff ─▶ reconnect      │      ({topic_name})
//!                     └──────────────────────────────────────────────┘
//! ```
//!
//! The runtime starts disconnected and connects immediately. When a
//! connection attempt fails or the connection drops, the next attempt is
//! scheduled with exponential backoff until shutdown. A non-zero
//! `max_attempts` or a connect error that is not retryable stops the attempts;
//! the runtime then keeps answering requests with `NotConnected`. After every
//! (re)connect all live patterns are subscribed again.

use std::pin::Pin;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::bus::{MessageBus, Request, RequestReceiver};
use crate::driver::{DriverEvent, DriverEvents, DriverState, ProtocolDriver};
use crate::error::{DriverError, DriverResult};
use crate::matcher::validate_pattern;
use crate::message::{
    BrowseReply, BrowseRequest, OkReply, OneOrMany, PublishRequest, ReadReply, ReadRequest,
    ServerInfoReply, ServiceKind, SubscribeRequest, TopicValue, WriteReply, WriteRequest,
};
use crate::registry::ServiceRegistry;
use crate::resolution::ResolutionCache;
use crate::retry::{ExponentialBackoff, RetryConfig, RetryDecision, RetryStrategy};
use crate::subscription::SubscriptionRegistry;
use crate::topic::{Format, SystemType, Topic};
use crate::transform::TransformPipeline;

// =============================================================================
// DriverHandle
// =============================================================================

/// Handle to a running driver runtime.
pub struct DriverHandle {
    system_type: SystemType,
    system: String,
    instance: String,
    state: watch::Receiver<DriverState>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DriverHandle {
    /// Returns the backend family.
    pub fn system_type(&self) -> SystemType {
        self.system_type
    }

    /// Returns the system name.
    pub fn system(&self) -> &str {
        &self.system
    }

    /// Returns the instance id advertised in the service registry.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Returns the current state.
    pub fn state(&self) -> DriverState {
        *self.state.borrow()
    }

    /// Waits until the runtime reaches `state`.
    ///
    /// Returns `false` on timeout or if the runtime stopped.
    pub async fn wait_for_state(&self, state: DriverState, timeout: Duration) -> bool {
        let mut receiver = self.state.clone();
        let reached = async move {
            let reached = receiver.wait_for(|s| *s == state).await.is_ok();
            reached
        };
        tokio::time::timeout(timeout, reached).await.unwrap_or(false)
    }

    /// Stops the runtime: releases backend subscriptions, disconnects,
    /// withdraws the service advertisement and unregisters the handlers.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(system = %self.system, error = %e, "Driver runtime task failed");
            }
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("system_type", &self.system_type)
            .field("system", &self.system)
            .field("instance", &self.instance)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// DriverRuntime
// =============================================================================

/// Single-writer event loop around a [`ProtocolDriver`].
pub struct DriverRuntime {
    driver: Box<dyn ProtocolDriver>,
    system_type: SystemType,
    system: String,
    instance: String,
    bus: MessageBus,
    registry: ServiceRegistry,
    backoff: ExponentialBackoff,
    transforms: TransformPipeline,
    cache: ResolutionCache,
    subscriptions: SubscriptionRegistry,
    state: watch::Sender<DriverState>,
    generation: u64,
    events: mpsc::UnboundedSender<(u64, DriverEvent)>,
    event_rx: Option<mpsc::UnboundedReceiver<(u64, DriverEvent)>>,
}

impl DriverRuntime {
    /// Creates a runtime for `driver` serving `system`.
    pub fn new(
        driver: Box<dyn ProtocolDriver>,
        system: impl Into<String>,
        bus: MessageBus,
        registry: ServiceRegistry,
    ) -> Self {
        let system_type = driver.system_type();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(DriverState::Disconnected);

        Self {
            driver,
            system_type,
            system: system.into(),
            instance: Uuid::new_v4().to_string(),
            bus,
            registry,
            backoff: ExponentialBackoff::new(RetryConfig::default()),
            transforms: TransformPipeline::default(),
            cache: ResolutionCache::new(),
            subscriptions: SubscriptionRegistry::new(),
            state,
            generation: 0,
            events,
            event_rx: Some(event_rx),
        }
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, config: RetryConfig) -> Self {
        self.backoff = ExponentialBackoff::new(config);
        self
    }

    /// Sets the reader/writer transforms.
    pub fn with_transforms(mut self, transforms: TransformPipeline) -> Self {
        self.transforms = transforms;
        self
    }

    /// Registers the bus handlers, advertises the service and spawns the
    /// event loop.
    pub fn start(mut self) -> DriverHandle {
        let addresses: Vec<String> = ServiceKind::ALL
            .iter()
            .map(|service| service.address(self.system_type, &self.system))
            .collect();
        let requests = self.bus.register_many(addresses);
        self.registry
            .advertise(self.system_type, &self.system, self.instance.clone());

        let shutdown = CancellationToken::new();
        let handle = DriverHandle {
            system_type: self.system_type,
            system: self.system.clone(),
            instance: self.instance.clone(),
            state: self.state.subscribe(),
            shutdown: shutdown.clone(),
            task: Mutex::new(None),
        };

        let events = self.event_rx.take();
        let task = tokio::spawn(async move {
            if let Some(events) = events {
                self.run(requests, events, shutdown).await;
            }
        });
        *handle.task.lock() = Some(task);
        handle
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    #[instrument(skip_all, name = "driver_runtime", fields(system_type = %self.system_type, system = %self.system))]
    async fn run(
        mut self,
        mut requests: RequestReceiver,
        mut events: mpsc::UnboundedReceiver<(u64, DriverEvent)>,
        shutdown: CancellationToken,
    ) {
        info!(driver = %self.driver.name(), "Driver runtime started");

        let mut attempt: u32 = 0;
        let mut reconnect_pending = true;
        let mut reconnect_timer: Pin<Box<Sleep>> = Box::pin(tokio::time::sleep(Duration::ZERO));

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Driver runtime received shutdown signal");
                    break;
                }

                _ = &mut reconnect_timer, if reconnect_pending => {
                    reconnect_pending = false;
                    match self.establish().await {
                        Ok(()) => attempt = 0,
                        Err(error) => {
                            attempt = attempt.saturating_add(1);
                            match self.backoff.should_retry(&error, attempt) {
                                RetryDecision::Retry(delay) => {
                                    warn!(
                                        attempt = attempt,
                                        delay_ms = delay.as_millis() as u64,
                                        error = %error,
                                        "Connect failed, retrying"
                                    );
                                    reconnect_timer.as_mut().reset(Instant::now() + delay);
                                    reconnect_pending = true;
                                }
                                RetryDecision::DoNotRetry => {
                                    error!(
                                        attempt = attempt,
                                        strategy = self.backoff.name(),
                                        error = %error,
                                        "Connect failed, giving up"
                                    );
                                }
                            }
                        }
                    }
                }

                Some((generation, event)) = events.recv() => {
                    if generation != self.generation {
                        debug!(generation, current = self.generation, "Ignoring event from stale connection");
                        continue;
                    }
                    if let Some(reason) = self.handle_event(event) {
                        self.connection_lost(&reason).await;
                        attempt = 1;
                        let delay = self.backoff.next_delay(attempt);
                        reconnect_timer.as_mut().reset(Instant::now() + delay);
                        reconnect_pending = true;
                    }
                }

                request = requests.recv() => {
                    match request {
                        Some(request) => self.handle_request(request).await,
                        None => {
                            info!("Request channel closed, runtime shutting down");
                            break;
                        }
                    }
                }
            }
        }

        self.stop(requests).await;
    }

    /// Connects and subscribes every live pattern.
    async fn establish(&mut self) -> DriverResult<()> {
        self.set_state(DriverState::Connecting);
        self.generation += 1;
        let events = DriverEvents::new(self.events.clone(), self.generation);

        if let Err(error) = self.driver.connect(events).await {
            self.set_state(DriverState::Disconnected);
            return Err(error);
        }

        info!(generation = self.generation, "Driver connected");
        self.set_state(DriverState::Connected);

        self.subscriptions.detach_all();
        if let Err(error) = self.subscribe_unbacked().await {
            warn!(error = %error, "Resubscribe after connect failed");
        }
        Ok(())
    }

    async fn connection_lost(&mut self, reason: &str) {
        warn!(reason = %reason, "Connection lost");
        self.generation += 1;
        self.subscriptions.detach_all();
        if let Err(error) = self.driver.disconnect().await {
            debug!(error = %error, "Disconnect after connection loss failed");
        }
        self.set_state(DriverState::Disconnected);
    }

    async fn stop(&mut self, requests: RequestReceiver) {
        self.registry
            .withdraw(self.system_type, &self.system, &self.instance);
        drop(requests);

        if self.is_connected() {
            let items = self.subscriptions.detach_all();
            if !items.is_empty() {
                if let Err(error) = self.driver.unsubscribe(&items).await {
                    debug!(error = %error, "Unsubscribe on shutdown failed");
                }
            }
            if let Err(error) = self.driver.disconnect().await {
                warn!(error = %error, "Disconnect on shutdown failed");
            }
        }
        self.generation += 1;
        self.set_state(DriverState::Disconnected);
        info!("Driver runtime stopped");
    }

    fn set_state(&self, state: DriverState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(from = %current, to = %state, "Driver state changed");
                *current = state;
                true
            }
        });
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Asks the backend for every live pattern that has no item yet.
    async fn subscribe_unbacked(&mut self) -> DriverResult<()> {
        let patterns = self.subscriptions.unbacked_patterns();
        if patterns.is_empty() {
            return Ok(());
        }

        self.set_state(DriverState::Subscribing);
        let result = self.driver.subscribe(&patterns).await;
        self.set_state(DriverState::Connected);

        let items = result?;
        debug!(patterns = patterns.len(), items = items.len(), "Backend subscribe complete");
        self.subscriptions.attach(items);
        Ok(())
    }

    /// Drops backend items no subscriber references any more.
    async fn release_unreferenced(&mut self) -> DriverResult<()> {
        let released = self.subscriptions.release_unreferenced();
        if released.is_empty() || !self.is_connected() {
            return Ok(());
        }

        self.set_state(DriverState::Unsubscribing);
        let result = self.driver.unsubscribe(&released).await;
        self.set_state(DriverState::Connected);
        result
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Handles a driver event. Returns the reason if the connection dropped.
    fn handle_event(&mut self, event: DriverEvent) -> Option<String> {
        match event {
            DriverEvent::Value { address, payload } => {
                self.dispatch_value(&address, &payload);
                None
            }
            DriverEvent::ConnectionLost { reason } => Some(reason),
        }
    }

    fn dispatch_value(&mut self, address: &str, payload: &[u8]) {
        let topics = self.cache.resolve(address);
        if topics.is_empty() {
            return;
        }

        let mut transformed: Option<serde_json::Value> = None;
        for topic in topics.iter() {
            let push = match topic.format {
                Format::Value => Some(payload.to_vec()),
                Format::Json | Format::Pretty => {
                    let value = transformed
                        .get_or_insert_with(|| decode_transformed(&self.transforms.read(payload)))
                        .clone();
                    encode_push(topic, value)
                }
            };
            if let Some(push) = push {
                self.bus.publish(&topic.topic_name(), push);
            }
        }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    async fn handle_request(&mut self, request: Request) {
        let Some(service) = ServiceKind::from_address(request.address()) else {
            request.fail_with(&DriverError::invalid_request("unknown service"));
            return;
        };

        match service {
            ServiceKind::Subscribe => self.on_subscribe(request).await,
            ServiceKind::Unsubscribe => self.on_unsubscribe(request).await,
            ServiceKind::Read => self.on_read(request).await,
            ServiceKind::Write => self.on_write(request).await,
            ServiceKind::Publish => self.on_publish(request).await,
            ServiceKind::Browse => {
                let result = match (request.decode::<BrowseRequest>(), self.connected_driver()) {
                    (Ok(body), Ok(())) => self
                        .driver
                        .browse(&body.node_id)
                        .await
                        .map(|result| BrowseReply { result }),
                    (Err(error), _) | (_, Err(error)) => Err(error),
                };
                request.respond(result);
            }
            ServiceKind::Schema => {
                let result = match self.connected_driver() {
                    Ok(()) => self.driver.schema().await,
                    Err(error) => Err(error),
                };
                request.respond(result);
            }
            ServiceKind::ServerInfo => {
                let result = match self.connected_driver() {
                    Ok(()) => self
                        .driver
                        .server_info()
                        .await
                        .map(|result| ServerInfoReply { result }),
                    Err(error) => Err(error),
                };
                request.respond(result);
            }
        }
    }

    fn connected_driver(&self) -> DriverResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(DriverError::NotConnected)
        }
    }

    async fn on_subscribe(&mut self, request: Request) {
        let body: SubscribeRequest = match request.decode() {
            Ok(body) => body,
            Err(error) => return request.fail_with(&error),
        };

        let topics = body.all_topics();
        if let Some(error) = topics.iter().find_map(|t| validate_pattern(&t.node).err()) {
            return request.fail_with(&DriverError::invalid_request(error.to_string()));
        }

        let mut added = Vec::new();
        for topic in topics {
            let name = topic.topic_name();
            if self.subscriptions.is_subscribed(&body.client_id, &name) {
                continue;
            }
            if self.subscriptions.subscribe(&body.client_id, topic.clone()) {
                self.cache.insert(topic);
            }
            added.push(name);
        }

        info!(client_id = %body.client_id, topics = added.len(), "Subscribe");

        if self.is_connected() {
            if let Err(error) = self.subscribe_unbacked().await {
                warn!(client_id = %body.client_id, error = %error, "Backend subscribe failed");
                for name in &added {
                    if self.subscriptions.unsubscribe(&body.client_id, name).is_some() {
                        self.cache.remove(name);
                    }
                }
                self.subscriptions.release_unreferenced();
                return match error {
                    DriverError::Subscription { .. } => request.reply_json(&OkReply::FAILED),
                    error => request.fail_with(&error),
                };
            }
        }

        request.reply_json(&OkReply::OK);
    }

    async fn on_unsubscribe(&mut self, request: Request) {
        let body: SubscribeRequest = match request.decode() {
            Ok(body) => body,
            Err(error) => return request.fail_with(&error),
        };

        for topic in body.all_topics() {
            let name = topic.topic_name();
            if self.subscriptions.unsubscribe(&body.client_id, &name).is_some() {
                self.cache.remove(&name);
            }
        }
        info!(client_id = %body.client_id, "Unsubscribe");

        match self.release_unreferenced().await {
            Ok(()) => request.reply_json(&OkReply::OK),
            Err(error) => {
                warn!(client_id = %body.client_id, error = %error, "Backend unsubscribe failed");
                request.reply_json(&OkReply::FAILED);
            }
        }
    }

    async fn on_read(&mut self, request: Request) {
        let body: ReadRequest = match request.decode() {
            Ok(body) => body,
            Err(error) => return request.fail_with(&error),
        };
        if let Err(error) = self.connected_driver() {
            return request.fail_with(&error);
        }

        let many = body.node_id.is_many();
        let node_ids = body.node_id.into_vec();
        let result = self.driver.read(&node_ids).await.map(|mut envelopes| {
            envelopes.resize(node_ids.len(), None);
            if many {
                ReadReply::batch(envelopes)
            } else {
                ReadReply::single(envelopes.into_iter().next().flatten())
            }
        });
        request.respond(result);
    }

    async fn on_write(&mut self, request: Request) {
        let body: WriteRequest = match request.decode() {
            Ok(body) => body,
            Err(error) => return request.fail_with(&error),
        };

        let reply = match (body.node_id, body.value) {
            (OneOrMany::One(node_id), OneOrMany::One(value)) => {
                WriteReply {
                    ok: OneOrMany::One(self.write_one(&node_id, &value).await),
                }
            }
            (OneOrMany::Many(node_ids), OneOrMany::Many(values)) if node_ids.len() == values.len() => {
                let mut flags = Vec::with_capacity(node_ids.len());
                for (node_id, value) in node_ids.iter().zip(values.iter()) {
                    flags.push(self.write_one(node_id, value).await);
                }
                WriteReply {
                    ok: OneOrMany::Many(flags),
                }
            }
            (node_ids, _) => {
                warn!("Write request with mismatched node ids and values");
                let flags = if node_ids.is_many() {
                    OneOrMany::Many(vec![false; node_ids.len()])
                } else {
                    OneOrMany::One(false)
                };
                WriteReply { ok: flags }
            }
        };
        request.reply_json(&reply);
    }

    async fn write_one(&mut self, node_id: &str, value: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        let payload = self.transforms.write(value.as_bytes());
        match self.driver.write(node_id, &payload).await {
            Ok(()) => true,
            Err(error) => {
                warn!(node_id = %node_id, error = %error, "Write failed");
                false
            }
        }
    }

    async fn on_publish(&mut self, request: Request) {
        let body: PublishRequest = match request.decode() {
            Ok(body) => body,
            Err(error) => return request.fail_with(&error),
        };
        if let Err(error) = self.connected_driver() {
            return request.fail_with(&error);
        }

        let payload = self.transforms.write(body.value.as_bytes());
        let result = self.driver.publish(&body.topic, &payload).await.map(|()| OkReply::OK);
        request.respond(result);
    }
}

// =============================================================================
// Push encoding
// =============================================================================

/// Interprets reader output as JSON, falling back to a JSON string.
fn decode_transformed(transformed: &[u8]) -> serde_json::Value {
    serde_json::from_slice(transformed).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(transformed).into_owned())
    })
}

fn encode_push(topic: &Topic, value: serde_json::Value) -> Option<Vec<u8>> {
    let push = TopicValue {
        topic: topic.clone(),
        value,
    };
    let encoded = match topic.format {
        Format::Pretty => serde_json::to_vec_pretty(&push),
        _ => serde_json::to_vec(&push),
    };
    match encoded {
        Ok(bytes) => Some(bytes),
        Err(error) => {
            warn!(topic = %topic, error = %error, "Failed to encode pushed value");
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
