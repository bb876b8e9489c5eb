// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Broker transport over TCP/TLS.
//!
//! Built on `rumqttc`. The event loop is polled by a background task that
//! forwards publishes and reports the first connection error as
//! [`TransportEvent::Disconnected`]. Reconnection is left to the driver
//! runtime, so the task stops after that error.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet,
    Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::transport::{ConnectOptions, MqttTransport, QoS, TransportEvent};
use crate::error::{MqttError, MqttResult};

/// Capacity of the client request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// NetworkTransport
// =============================================================================

struct ActiveSession {
    client: AsyncClient,
    cancel: CancellationToken,
    poller: JoinHandle<()>,
    endpoint: String,
}

/// Broker session over the network.
#[derive(Default)]
pub struct NetworkTransport {
    session: Option<ActiveSession>,
}

impl NetworkTransport {
    /// Creates a disconnected transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> MqttResult<&AsyncClient> {
        match &self.session {
            Some(session) if !session.poller.is_finished() => Ok(&session.client),
            _ => Err(MqttError::NotConnected),
        }
    }

    fn mqtt_options(options: &ConnectOptions) -> MqttOptions {
        let mut mqtt = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(options.clean_session);
        mqtt.set_max_packet_size(options.max_message_size, options.max_message_size);
        if let Some(username) = &options.username {
            mqtt.set_credentials(username, options.password.as_deref().unwrap_or_default());
        }
        if options.ssl {
            mqtt.set_transport(Transport::tls_with_default_config());
        }
        mqtt
    }

    async fn await_connack(event_loop: &mut EventLoop, endpoint: &str) -> MqttResult<()> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return match ack.code {
                        ConnectReturnCode::Success => Ok(()),
                        code => Err(map_return_code(code, endpoint)),
                    };
                }
                Ok(_) => continue,
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(map_return_code(code, endpoint));
                }
                Err(e) => {
                    debug!(endpoint, error = %e, "Broker connection failed");
                    return Err(MqttError::ConnectionRefused {
                        endpoint: endpoint.to_string(),
                    });
                }
            }
        }
    }

    async fn poll_loop(
        mut event_loop: EventLoop,
        events: mpsc::UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => return,
                polled = event_loop.poll() => polled,
            };

            match polled {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    trace!(topic = %publish.topic, size = publish.payload.len(), "Incoming publish");
                    let event = TransportEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    let _ = events.send(TransportEvent::Disconnected {
                        reason: "broker sent disconnect".to_string(),
                    });
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = events.send(TransportEvent::Disconnected { reason: e.to_string() });
                    return;
                }
            }
        }
    }
}

fn map_return_code(code: ConnectReturnCode, endpoint: &str) -> MqttError {
    let endpoint = endpoint.to_string();
    match code {
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            MqttError::NotAuthorized { endpoint }
        }
        _ => MqttError::ConnectionRefused { endpoint },
    }
}

fn to_rumqttc(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn client_error(error: rumqttc::ClientError) -> MqttError {
    MqttError::Closed {
        reason: error.to_string(),
    }
}

#[async_trait]
impl MqttTransport for NetworkTransport {
    async fn connect(
        &mut self,
        options: &ConnectOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> MqttResult<()> {
        self.disconnect().await?;

        let endpoint = options.endpoint();
        let (client, mut event_loop) =
            AsyncClient::new(Self::mqtt_options(options), REQUEST_CHANNEL_CAPACITY);

        match timeout(options.connect_timeout, Self::await_connack(&mut event_loop, &endpoint)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(MqttError::ConnectionRefused { endpoint });
            }
        }

        let cancel = CancellationToken::new();
        let poller = tokio::spawn(Self::poll_loop(event_loop, events, cancel.clone()));
        debug!(endpoint = %endpoint, client_id = %options.client_id, "Broker session open");

        self.session = Some(ActiveSession {
            client,
            cancel,
            poller,
            endpoint,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> MqttResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        if let Err(e) = session.client.disconnect().await {
            warn!(endpoint = %session.endpoint, error = %e, "Disconnect request failed");
        }
        session.cancel.cancel();
        let _ = session.poller.await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client().is_ok()
    }

    async fn subscribe(&mut self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.client()?
            .subscribe(filter, to_rumqttc(qos))
            .await
            .map_err(|e| MqttError::subscribe_rejected(filter, e.to_string()))
    }

    async fn unsubscribe(&mut self, filter: &str) -> MqttResult<()> {
        self.client()?.unsubscribe(filter).await.map_err(client_error)
    }

    async fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> MqttResult<()> {
        self.client()?
            .publish(topic, to_rumqttc(qos), retain, payload.to_vec())
            .await
            .map_err(client_error)
    }

    fn display_name(&self) -> String {
        match &self.session {
            Some(session) => format!("mqtt://{}", session.endpoint),
            None => "mqtt://".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagway_config::MqttSystemConfig;

    #[test]
    fn test_return_code_mapping() {
        assert!(matches!(
            map_return_code(ConnectReturnCode::BadUserNamePassword, "h:1"),
            MqttError::NotAuthorized { .. }
        ));
        assert!(matches!(
            map_return_code(ConnectReturnCode::ServiceUnavailable, "h:1"),
            MqttError::ConnectionRefused { .. }
        ));
    }

    #[tokio::test]
    async fn test_operations_require_session() {
        let mut transport = NetworkTransport::new();
        assert!(!transport.is_connected());
        assert_eq!(transport.display_name(), "mqtt://");
        assert!(matches!(
            transport.publish("a", b"1", QoS::AtMostOnce, false).await,
            Err(MqttError::NotConnected)
        ));
        assert!(transport.disconnect().await.is_ok());
    }

    #[test]
    fn test_mqtt_options() {
        let mut config = MqttSystemConfig::new("broker");
        config.username = Some("edge".into());
        let options = ConnectOptions::from_config(&config, "tagway-1");
        let mqtt = NetworkTransport::mqtt_options(&options);
        assert_eq!(mqtt.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(mqtt.client_id(), "tagway-1");
    }
}
