// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Live value streams.
//!
//! ```text
//!  Driver ──publish──▶ Consumer (unbounded) ──forwarder──▶ mpsc (bounded) ──▶ NodeValueStream
//!                                                 ▲
//!                                   CancellationToken (per stream)
//! ```
//!
//! The forwarder awaits buffer space instead of dropping, so a slow client
//! stalls only its own stream. Teardown happens once: stop forwarding, send
//! `Unsubscribe` with the same client id and topics, release the channel.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use tagway_core::message::{OkReply, ServiceKind, SubscribeRequest, TopicValue, ValueEnvelope};
use tagway_core::topic::{Format, SystemType, Topic};
use tagway_core::{Consumer, MessageBus};

use crate::model::NodeValue;

// =============================================================================
// Teardown
// =============================================================================

struct Teardown {
    bus: MessageBus,
    client_id: String,
    system_type: SystemType,
    system: String,
    topics: Vec<Topic>,
    cancel: CancellationToken,
    fired: AtomicBool,
}

impl Teardown {
    /// Stops forwarding. Returns `true` only for the first caller.
    fn begin(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        true
    }

    async fn unsubscribe(&self) {
        if self.topics.is_empty() {
            return;
        }
        let request = match self.topics.as_slice() {
            [topic] => SubscribeRequest::single(&self.client_id, topic.clone()),
            topics => SubscribeRequest::many(&self.client_id, topics.to_vec()),
        };
        let address = ServiceKind::Unsubscribe.address(self.system_type, &self.system);
        match self.bus.request_json::<_, OkReply>(&address, &request).await {
            Ok(reply) if reply.ok => {
                debug!(client_id = %self.client_id, topics = self.topics.len(), "Unsubscribed");
            }
            Ok(_) => warn!(client_id = %self.client_id, "Unsubscribe rejected"),
            Err(e) => warn!(client_id = %self.client_id, error = %e, "Unsubscribe failed"),
        }
    }
}

/// Cancels a [`NodeValueStream`] from another task.
#[derive(Clone)]
pub struct CancelHandle {
    teardown: Arc<Teardown>,
}

impl CancelHandle {
    /// Tears the stream down. Later calls return immediately.
    pub async fn cancel(&self) {
        if self.teardown.begin() {
            self.teardown.unsubscribe().await;
        }
    }

    /// Returns `true` once teardown has started.
    pub fn is_cancelled(&self) -> bool {
        self.teardown.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("client_id", &self.teardown.client_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// =============================================================================
// NodeValueStream
// =============================================================================

/// A live stream of values for one or more nodes.
pub struct NodeValueStream {
    receiver: mpsc::Receiver<NodeValue>,
    handle: CancelHandle,
}

impl NodeValueStream {
    /// Subscribes every node and starts forwarding.
    ///
    /// Topics the driver rejects are left out; if all are rejected the
    /// stream ends immediately.
    pub(crate) async fn open(
        bus: &MessageBus,
        system_type: SystemType,
        system: &str,
        node_ids: &[String],
        buffer: usize,
    ) -> Self {
        let client_id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        let address = ServiceKind::Subscribe.address(system_type, system);

        let mut topics = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            let topic = Topic::new(system_type, system, Format::Json, node_id.as_str());
            // consumer first so nothing published after the reply is missed
            let consumer = bus.consumer(topic.topic_name());
            let request = SubscribeRequest::single(&client_id, topic.clone());

            match bus.request_json::<_, OkReply>(&address, &request).await {
                Ok(reply) if reply.ok => {
                    tokio::spawn(forward(
                        consumer,
                        sender.clone(),
                        cancel.clone(),
                        system_type,
                        system.to_string(),
                        node_id.clone(),
                    ));
                    topics.push(topic);
                }
                Ok(_) => warn!(client_id = %client_id, topic = %topic, "Subscribe rejected"),
                Err(e) => warn!(client_id = %client_id, topic = %topic, error = %e, "Subscribe failed"),
            }
        }
        debug!(client_id = %client_id, system, topics = topics.len(), "Stream opened");

        Self {
            receiver,
            handle: CancelHandle {
                teardown: Arc::new(Teardown {
                    bus: bus.clone(),
                    client_id,
                    system_type,
                    system: system.to_string(),
                    topics,
                    cancel,
                    fired: AtomicBool::new(false),
                }),
            },
        }
    }

    /// Returns the correlation id sent with subscribe requests.
    pub fn client_id(&self) -> &str {
        &self.handle.teardown.client_id
    }

    /// Returns the subscribed topics.
    pub fn topics(&self) -> &[Topic] {
        &self.handle.teardown.topics
    }

    /// Returns a handle that cancels this stream.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Tears the stream down. Idempotent.
    pub async fn cancel(&mut self) {
        self.handle.cancel().await;
        self.receiver.close();
    }
}

impl Stream for NodeValueStream {
    type Item = NodeValue;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.handle.is_cancelled() {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

impl Drop for NodeValueStream {
    fn drop(&mut self) {
        if !self.handle.teardown.begin() {
            return;
        }
        let teardown = self.handle.teardown.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { teardown.unsubscribe().await });
            }
            Err(_) => warn!(client_id = %teardown.client_id, "Stream dropped outside runtime, unsubscribe skipped"),
        }
    }
}

impl std::fmt::Debug for NodeValueStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeValueStream")
            .field("client_id", &self.client_id())
            .field("topics", &self.topics().len())
            .finish()
    }
}

// =============================================================================
// Forwarding
// =============================================================================

async fn forward(
    mut consumer: Consumer,
    sender: mpsc::Sender<NodeValue>,
    cancel: CancellationToken,
    system_type: SystemType,
    system: String,
    node_id: String,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            payload = consumer.recv() => payload,
        };
        let Some(payload) = payload else { break };

        let Some(value) = decode_push(system_type, &system, &node_id, &payload) else {
            trace!(address = %consumer.address(), "Dropping undecodable push");
            continue;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = sender.send(value) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    trace!(address = %consumer.address(), "Forwarder stopped");
}

/// Decodes a pushed `{Topic, Value}` record.
///
/// A value that is not an envelope is wrapped as a good-status value
/// without timestamps. The node id is the concrete address when the driver
/// resolved one.
pub(crate) fn decode_push(
    system_type: SystemType,
    system: &str,
    node_id: &str,
    payload: &[u8],
) -> Option<NodeValue> {
    let push: TopicValue = serde_json::from_slice(payload).ok()?;
    let envelope = ValueEnvelope::decode(&push.value).unwrap_or(ValueEnvelope {
        value: push.value,
        data_type_name: None,
        data_type_id: None,
        status_code: 0,
        source_time: None,
        server_time: None,
    });
    let node_id = push.topic.browse_path.as_deref().unwrap_or(node_id);
    Some(NodeValue::from_envelope(system_type, system, node_id, &envelope))
}
