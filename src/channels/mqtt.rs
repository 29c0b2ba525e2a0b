//! MQTT transport: inbound fan-in to the task engine, outbound actuator sink.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::RwLock;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::router::{CommandRouter, RouteError};
use crate::config::MqttConfig;
use crate::engine::dispatch::truncate;
use crate::engine::{ActuatorSink, TaskEngine};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Build client options from config. Credentials are only set when both
/// username and password are present.
pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(&config.client_id, config.broker_host(), config.broker_port());
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    if let (Some(ref user), Some(ref pass)) = (&config.username, &config.password) {
        mqtt_options.set_credentials(user, pass);
    }

    if config.use_tls {
        mqtt_options.set_transport(Transport::tls_with_default_config());
        info!("MQTT: TLS transport enabled");
    }
    mqtt_options
}

pub fn subscribe_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Publishes actuator commands through whichever client the listener has
/// attached. Fire-and-forget: QoS 0, no retry.
#[derive(Default)]
pub struct MqttActuatorSink {
    client: RwLock<Option<AsyncClient>>,
}

impl MqttActuatorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, client: AsyncClient) {
        *self.client.write() = Some(client);
    }

    pub fn detach(&self) {
        self.client.write().take();
    }

    pub fn is_attached(&self) -> bool {
        self.client.read().is_some()
    }
}

impl ActuatorSink for MqttActuatorSink {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let guard = self.client.read();
        let Some(client) = guard.as_ref() else {
            anyhow::bail!("MQTT client not connected");
        };
        client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| anyhow::anyhow!("MQTT publish request failed: {e}"))
    }
}

/// Run the MQTT listener until `shutdown` fires.
///
/// Creates a fresh client, attaches it to `sink`, subscribes to every routed
/// topic on each ConnAck and feeds publishes through `router` into `engine`.
pub async fn run_mqtt_listener(
    config: &MqttConfig,
    router: Arc<CommandRouter>,
    engine: Arc<TaskEngine>,
    sink: Arc<MqttActuatorSink>,
    shutdown: CancellationToken,
) -> Result<()> {
    config.validate()?;

    let (client, eventloop) = AsyncClient::new(mqtt_options(config), 64);
    sink.attach(client.clone());
    info!(
        broker = %config.broker_url,
        client_id = %config.client_id,
        "MQTT listener starting"
    );

    let result = poll_loop(
        config,
        &client,
        eventloop,
        &router,
        &engine,
        &shutdown,
    )
    .await;

    sink.detach();
    let _ = client.try_disconnect();
    result
}

async fn poll_loop(
    config: &MqttConfig,
    client: &AsyncClient,
    mut eventloop: EventLoop,
    router: &CommandRouter,
    engine: &TaskEngine,
    shutdown: &CancellationToken,
) -> Result<()> {
    let qos = subscribe_qos(config.qos);

    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => {
                info!("MQTT listener stopping");
                return Ok(());
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(msg))) => {
                debug!(
                    topic = %msg.topic,
                    "MQTT receive: {}",
                    truncate(&String::from_utf8_lossy(&msg.payload), 100)
                );
                handle_publish(router, engine, &msg.topic, &msg.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                crate::health::mark_component_ok("mqtt");
                info!("MQTT: connected to broker");
                // Clean sessions lose subscriptions across reconnects.
                for topic in router.topics() {
                    client.try_subscribe(topic, qos)?;
                    info!("MQTT: subscribed to '{topic}'");
                }
            }
            Ok(_) => {}
            Err(e) => {
                crate::health::mark_component_error("mqtt", e.to_string());
                warn!("MQTT: connection error: {e}");
                // The event loop reconnects on the next poll.
                tokio::select! {
                    () = shutdown.cancelled() => return Ok(()),
                    () = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}

fn handle_publish(router: &CommandRouter, engine: &TaskEngine, topic: &str, payload: &[u8]) {
    match router.route(engine, topic, payload) {
        Ok(_) => {}
        // Already logged by the queue.
        Err(RouteError::Queue(e)) => debug!(topic, "Command dropped: {e}"),
        Err(e) => warn!(topic, "Command rejected: {e}"),
    }
}
