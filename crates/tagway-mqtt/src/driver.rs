// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! MQTT protocol driver.
//!
//! [`MqttDriver`] implements [`ProtocolDriver`] for a broker: node patterns
//! are topic filters, writes and publishes go to the node as a topic.
//! Read, browse, schema and server info are not available on a broker and
//! keep the trait's `Unsupported` answer.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tagway_config::MqttSystemConfig;
use tagway_core::driver::{DriverEvents, ProtocolDriver};
use tagway_core::error::{DriverError, DriverResult, TransformError};
use tagway_core::matcher;
use tagway_core::retry::RetryConfig;
use tagway_core::runtime::{DriverHandle, DriverRuntime};
use tagway_core::subscription::MonitoredItem;
use tagway_core::topic::{SystemType, Topic};
use tagway_core::transform::TransformPipeline;
use tagway_core::{MessageBus, ServiceRegistry};

use crate::client::{ConnectOptions, MqttTransport, NetworkTransport, QoS, TransportEvent};
use crate::error::MqttError;

// =============================================================================
// MqttDriver
// =============================================================================

/// MQTT driver implementing `tagway_core::ProtocolDriver`.
///
/// # Example
///
/// ```rust,ignore
/// use tagway_config::MqttSystemConfig;
/// use tagway_mqtt::MqttDriver;
///
/// let config = MqttSystemConfig::new("broker");
/// let handle = MqttDriver::network(&config)
///     .spawn(&config, bus.clone(), registry.clone(), RetryConfig::default())?;
/// ```
pub struct MqttDriver {
    name: String,
    options: ConnectOptions,
    transport: Box<dyn MqttTransport>,
    subscribe_qos: QoS,
    write_qos: QoS,
    next_item: u64,
    forwarder: Option<JoinHandle<()>>,
}

impl MqttDriver {
    /// Creates a driver for `config` over `transport`.
    pub fn new(config: &MqttSystemConfig, transport: Box<dyn MqttTransport>) -> Self {
        let client_id = format!("tagway-{}", Uuid::new_v4().simple());
        Self {
            name: format!("mqtt:{}", config.system),
            options: ConnectOptions::from_config(config, client_id),
            transport,
            subscribe_qos: QoS::from_u8(config.qos),
            write_qos: QoS::from_u8(config.write_qos),
            next_item: 0,
            forwarder: None,
        }
    }

    /// Creates a driver talking to a real broker.
    pub fn network(config: &MqttSystemConfig) -> Self {
        Self::new(config, Box::new(NetworkTransport::new()))
    }

    /// Returns the session options.
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Wraps the driver in a [`DriverRuntime`] configured from `config` and
    /// starts it.
    ///
    /// # Errors
    ///
    /// Returns `TransformError` if the configured transforms do not build.
    pub fn spawn(
        self,
        config: &MqttSystemConfig,
        bus: MessageBus,
        registry: ServiceRegistry,
        reconnect: RetryConfig,
    ) -> Result<DriverHandle, TransformError> {
        let transforms = TransformPipeline::from_config(&config.value.reader, &config.value.writer)?;
        info!(
            system = %config.system,
            endpoint = %self.options.endpoint(),
            "Starting MQTT driver"
        );
        Ok(DriverRuntime::new(Box::new(self), config.system.clone(), bus, registry)
            .with_transforms(transforms)
            .with_reconnect(reconnect)
            .start())
    }

    fn stop_forwarder(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }

    /// Forwards transport events to the runtime, dropping oversize messages.
    async fn forward(
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        events: DriverEvents,
        limit: usize,
        name: String,
    ) {
        while let Some(event) = transport_events.recv().await {
            match event {
                TransportEvent::Message { topic, payload } => {
                    if payload.len() > limit {
                        warn!(
                            driver = %name,
                            topic = %topic,
                            size = payload.len(),
                            limit,
                            "Dropping oversize message"
                        );
                        continue;
                    }
                    if !events.value(topic, payload) {
                        return;
                    }
                }
                TransportEvent::Disconnected { reason } => {
                    events.connection_lost(reason);
                    return;
                }
            }
        }
    }

    async fn send(&mut self, topic: &str, payload: &[u8]) -> DriverResult<()> {
        if topic.is_empty() {
            return Err(MqttError::invalid_topic(topic, "empty topic").into());
        }
        if matcher::is_wildcard(topic) {
            return Err(MqttError::invalid_topic(topic, "cannot publish to a wildcard").into());
        }
        if payload.len() > self.options.max_message_size {
            return Err(MqttError::PayloadTooLarge {
                size: payload.len(),
                limit: self.options.max_message_size,
            }
            .into());
        }
        self.transport
            .publish(topic, payload, self.write_qos, false)
            .await
            .map_err(DriverError::from)
    }
}

impl Drop for MqttDriver {
    fn drop(&mut self) {
        self.stop_forwarder();
    }
}

#[async_trait]
impl ProtocolDriver for MqttDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn system_type(&self) -> SystemType {
        SystemType::Mqtt
    }

    async fn connect(&mut self, events: DriverEvents) -> DriverResult<()> {
        self.stop_forwarder();

        let (tx, rx) = mpsc::unbounded_channel();
        self.transport.connect(&self.options, tx).await?;

        self.forwarder = Some(tokio::spawn(Self::forward(
            rx,
            events,
            self.options.max_message_size,
            self.name.clone(),
        )));
        info!(
            driver = %self.name,
            transport = %self.transport.display_name(),
            "Connected to broker"
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        self.stop_forwarder();
        self.transport.disconnect().await?;
        debug!(driver = %self.name, "Disconnected from broker");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn subscribe(&mut self, patterns: &[String]) -> DriverResult<Vec<MonitoredItem>> {
        let mut items: Vec<MonitoredItem> = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            if let Err(e) = self.transport.subscribe(pattern, self.subscribe_qos).await {
                warn!(driver = %self.name, pattern = %pattern, error = %e, "Subscribe failed");
                for item in &items {
                    let _ = self.transport.unsubscribe(&item.pattern).await;
                }
                return Err(e.into());
            }
            items.push(MonitoredItem::new(self.next_item, pattern.clone()));
            self.next_item += 1;
        }
        debug!(driver = %self.name, count = items.len(), "Subscribed");
        Ok(items)
    }

    async fn unsubscribe(&mut self, items: &[MonitoredItem]) -> DriverResult<()> {
        for item in items {
            if let Err(e) = self.transport.unsubscribe(&item.pattern).await {
                warn!(driver = %self.name, pattern = %item.pattern, error = %e, "Unsubscribe failed");
            }
        }
        Ok(())
    }

    async fn publish(&mut self, topic: &Topic, payload: &[u8]) -> DriverResult<()> {
        self.send(&topic.node, payload).await
    }

    async fn write(&mut self, node_id: &str, payload: &[u8]) -> DriverResult<()> {
        self.send(node_id, payload).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBroker;
    use tagway_core::driver::DriverEvent;
    use tagway_core::topic::Format;

    fn driver(broker: &MemoryBroker) -> MqttDriver {
        MqttDriver::new(&MqttSystemConfig::new("broker"), Box::new(broker.transport()))
    }

    #[tokio::test]
    async fn test_values_reach_runtime_events() {
        let broker = MemoryBroker::new();
        let mut driver = driver(&broker);
        let (events, mut rx) = DriverEvents::channel();

        driver.connect(events).await.unwrap();
        let items = driver.subscribe(&["plant/+/temp".to_string()]).await.unwrap();
        assert_eq!(items, vec![MonitoredItem::new(0, "plant/+/temp")]);

        broker.publish("plant/line1/temp", "21.5");
        let (_, event) = rx.recv().await.unwrap();
        assert_eq!(
            event,
            DriverEvent::Value {
                address: "plant/line1/temp".into(),
                payload: b"21.5".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn test_oversize_messages_are_dropped() {
        let broker = MemoryBroker::new();
        let mut config = MqttSystemConfig::new("broker");
        config.max_message_size_kb = 1;
        let mut driver = MqttDriver::new(&config, Box::new(broker.transport()));
        let (events, mut rx) = DriverEvents::channel();

        driver.connect(events).await.unwrap();
        driver.subscribe(&["big/#".to_string()]).await.unwrap();

        broker.publish("big/blob", vec![0u8; 2048]);
        broker.publish("big/small", "ok");

        let (_, event) = rx.recv().await.unwrap();
        assert!(matches!(event, DriverEvent::Value { address, .. } if address == "big/small"));
    }

    #[tokio::test]
    async fn test_connection_loss_is_reported() {
        let broker = MemoryBroker::new();
        let mut driver = driver(&broker);
        let (events, mut rx) = DriverEvents::channel();
        driver.connect(events).await.unwrap();

        broker.drop_connections("keepalive timeout");
        let (_, event) = rx.recv().await.unwrap();
        assert_eq!(
            event,
            DriverEvent::ConnectionLost {
                reason: "keepalive timeout".into()
            }
        );
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn test_partial_subscribe_rolls_back() {
        let broker = MemoryBroker::new();
        broker.reject_filter("secret/#");
        let mut driver = driver(&broker);
        let (events, _rx) = DriverEvents::channel();
        driver.connect(events).await.unwrap();

        let result = driver
            .subscribe(&["plant/#".to_string(), "secret/#".to_string()])
            .await;
        assert!(matches!(result, Err(DriverError::Subscription { .. })));
        assert!(broker.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_write_and_publish_use_write_qos() {
        let broker = MemoryBroker::new();
        let mut driver = driver(&broker);
        let (events, _rx) = DriverEvents::channel();
        driver.connect(events).await.unwrap();

        driver.write("plant/valve/set", b"open").await.unwrap();
        let topic = Topic::new(SystemType::Mqtt, "broker", Format::Value, "plant/pump/set");
        driver.publish(&topic, b"on").await.unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].topic, "plant/valve/set");
        assert_eq!(published[1].topic, "plant/pump/set");
        assert!(published.iter().all(|m| m.qos == QoS::AtLeastOnce && !m.retain));
    }

    #[tokio::test]
    async fn test_write_rejects_wildcards() {
        let broker = MemoryBroker::new();
        let mut driver = driver(&broker);
        let (events, _rx) = DriverEvents::channel();
        driver.connect(events).await.unwrap();

        let error = driver.write("plant/+/set", b"1").await.unwrap_err();
        assert_eq!(error.failure_code(), 400);
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_read_and_browse_unsupported() {
        let broker = MemoryBroker::new();
        let mut driver = driver(&broker);
        assert!(matches!(
            driver.read(&["a".to_string()]).await,
            Err(DriverError::Unsupported { operation: "read" })
        ));
        assert!(matches!(driver.browse("i=85").await, Err(DriverError::Unsupported { .. })));
        assert!(matches!(driver.server_info().await, Err(DriverError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let mut driver = driver(&broker);
        let (events, _rx) = DriverEvents::channel();
        let error = driver.connect(events).await.unwrap_err();
        assert!(matches!(error, DriverError::ConnectionFailed { .. }));
        assert!(error.is_retryable());
    }
}
