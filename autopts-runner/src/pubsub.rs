// Copyright (c) The autopts Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pub/sub transport for the implicit-send bridge.
//!
//! The bridge only needs to publish requests and to be handed responses. Publishing goes through
//! the [`Publisher`] trait. Responses are delivered by whoever owns the subscription: for MQTT,
//! that is the task spawned by [`MqttSubscription::spawn`].

use crate::{bridge::ImplicitSendBridge, config::ImplicitSendConfig, errors::PublishError};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::{
    sync::{Arc, mpsc},
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Publishes messages on a pub/sub topic.
///
/// `publish` is called from the engine's own thread, so it must not block on the network.
pub trait Publisher: Send + Sync + 'static {
    /// Publishes `payload` on `topic`.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// The capacity of the MQTT client's request queue.
const MQTT_QUEUE_CAPACITY: usize = 16;

/// How long to wait before polling the MQTT event loop again after a connection error.
const MQTT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Publishes implicit-send requests over MQTT.
#[derive(Clone, Debug)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|error| PublishError::new(topic, error))
    }
}

/// The receiving half of an MQTT connection.
///
/// Nothing is received until [`spawn`](Self::spawn) is called.
pub struct MqttSubscription {
    client: AsyncClient,
    event_loop: EventLoop,
    response_topic: String,
}

/// Creates an MQTT connection for the implicit-send relay.
///
/// The connection is established lazily, once the subscription is spawned.
pub fn mqtt_connect(config: &ImplicitSendConfig) -> (MqttPublisher, MqttSubscription) {
    let mut options = MqttOptions::new(
        config.client_id.clone(),
        config.broker_host.clone(),
        config.broker_port,
    );
    options.set_keep_alive(Duration::from_secs(30));

    let (client, event_loop) = AsyncClient::new(options, MQTT_QUEUE_CAPACITY);
    (
        MqttPublisher {
            client: client.clone(),
        },
        MqttSubscription {
            client,
            event_loop,
            response_topic: config.response_topic.clone(),
        },
    )
}

impl MqttSubscription {
    /// Spawns a task that drives the MQTT connection and hands responses to `bridge`.
    ///
    /// The task runs until `shutdown` is cancelled.
    pub fn spawn(
        self,
        bridge: Arc<ImplicitSendBridge>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let Self {
            client,
            mut event_loop,
            response_topic,
        } = self;

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = event_loop.poll() => event,
                };

                let event = match event {
                    Ok(event) => event,
                    Err(error) => {
                        tracing::warn!(%error, "MQTT connection error, retrying");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(MQTT_RECONNECT_DELAY) => continue,
                        }
                    }
                };

                match classify_event(&event, &response_topic) {
                    MqttAction::Subscribe => {
                        tracing::debug!(
                            topic = %response_topic,
                            "connected to broker, subscribing"
                        );
                        if let Err(error) =
                            client.try_subscribe(response_topic.as_str(), QoS::AtMostOnce)
                        {
                            tracing::warn!(%error, topic = %response_topic, "failed to subscribe");
                        }
                    }
                    MqttAction::Deliver(payload) => bridge.deliver_response(payload),
                    MqttAction::Ignore => {}
                }
            }

            if let Err(error) = client.try_disconnect() {
                tracing::debug!(%error, "failed to disconnect from broker");
            }
        })
    }
}

/// What to do with an event from the MQTT event loop.
#[derive(Debug, Eq, PartialEq)]
enum MqttAction<'a> {
    /// Subscribe to the response topic.
    Subscribe,

    /// Hand a response payload to the bridge.
    Deliver(&'a [u8]),

    /// Nothing to do.
    Ignore,
}

fn classify_event<'a>(event: &'a Event, response_topic: &str) -> MqttAction<'a> {
    match event {
        // Subscriptions don't survive a reconnect with a clean session, so every ConnAck
        // subscribes again.
        Event::Incoming(Packet::ConnAck(_)) => MqttAction::Subscribe,
        Event::Incoming(Packet::Publish(publish)) if publish.topic == response_topic => {
            MqttAction::Deliver(&publish.payload[..])
        }
        Event::Incoming(Packet::Publish(publish)) => {
            tracing::debug!(topic = %publish.topic, "ignoring message");
            MqttAction::Ignore
        }
        _ => MqttAction::Ignore,
    }
}

/// A [`Publisher`] that sends every message to an in-process channel.
///
/// Useful when the party answering implicit sends lives in the same process.
#[derive(Debug)]
pub struct ChannelPublisher {
    sender: mpsc::Sender<(String, Vec<u8>)>,
}

impl ChannelPublisher {
    /// Creates a new publisher, along with the receiver for published messages.
    pub fn new() -> (Self, mpsc::Receiver<(String, Vec<u8>)>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.sender
            .send((topic.to_owned(), payload))
            .map_err(|_| PublishError::new(topic, "receiver was dropped"))
    }
}
