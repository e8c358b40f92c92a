//! MQTT transport subscriber.
//!
//! Connects to the broker, (re)subscribes to the data and chunked topic
//! filters on every connection acknowledgement, and hands each inbound frame
//! to its own task. Connection errors are logged and retried with backoff;
//! they never stop the process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use tokio_util::sync::CancellationToken;

use crate::pipeline::{IngestPipeline, IngestReceipt};
use crate::reassembly::{PartOutcome, ReassemblyTable};
use crate::tasks::BackgroundTasks;

mod topics;

pub use topics::{Route, TopicLayout};

/// Requests queued between the client handle and the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

// ---

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Ingested(IngestReceipt),
    Buffered { received: u32, expected: u32 },
    /// Malformed topic, chunk parameters or payload, or a storage failure.
    /// Already logged.
    Dropped,
}

/// Routes frames to the reassembly table or straight to the pipeline.
pub struct FrameHandler {
    topics: TopicLayout,
    table: Arc<ReassemblyTable>,
    pipeline: Arc<IngestPipeline>,
}

impl FrameHandler {
    pub fn new(
        topics: TopicLayout,
        table: Arc<ReassemblyTable>,
        pipeline: Arc<IngestPipeline>,
    ) -> Self {
        Self {
            topics,
            table,
            pipeline,
        }
    }

    pub fn topics(&self) -> &TopicLayout {
        &self.topics
    }

    pub async fn handle(&self, topic: &str, payload: Bytes) -> FrameOutcome {
        // ---
        let route = match self.topics.route(topic) {
            Ok(route) => route,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping frame");
                return FrameOutcome::Dropped;
            }
        };

        let message = match route {
            Route::Single { serial } => {
                tracing::debug!(topic, serial = %serial, "Received reading");
                payload
            }
            Route::Chunk {
                serial,
                total,
                index,
            } => {
                tracing::debug!(topic, serial = %serial, total, index, "Received chunk");
                match self.table.accept_part(&serial, total, index, payload).await {
                    Ok(PartOutcome::Assembled(message)) => message,
                    Ok(PartOutcome::Buffered { received, expected }) => {
                        return FrameOutcome::Buffered { received, expected };
                    }
                    Err(e) => {
                        tracing::warn!(topic, error = %e, "Dropping chunk");
                        return FrameOutcome::Dropped;
                    }
                }
            }
        };

        // The pipeline logs its own failures.
        match self.pipeline.ingest(&message).await {
            Ok(receipt) => FrameOutcome::Ingested(receipt),
            Err(_) => FrameOutcome::Dropped,
        }
    }
}

/// Exponential backoff between failed connection attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Next delay after `current`, clamped to `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

/// Broker connection parameters.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub qos: QoS,
    pub keep_alive: Duration,
    /// Largest packet accepted from or sent to the broker.
    pub max_packet_size: usize,
}

impl MqttSettings {
    /// Client options for a clean session with these settings.
    pub fn options(&self) -> MqttOptions {
        // ---
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_max_packet_size(self.max_packet_size, self.max_packet_size);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username.clone(), password.clone());
        }
        options
    }
}

/// Split `tcp://host:port`, `mqtt://host:port` or `host:port` into parts.
pub fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    // ---
    let rest = match url.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some((scheme, _)) => bail!("Unsupported MQTT scheme '{scheme}' in '{url}'"),
        None => url,
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| anyhow!("Invalid MQTT port in '{url}': {e}"))?;
            (host, port)
        }
        None => (rest, 1883),
    };
    if host.is_empty() {
        bail!("Missing MQTT host in '{url}'");
    }
    Ok((host.to_string(), port))
}

pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => bail!("Invalid MQTT QoS level {other}"),
    }
}

pub struct MqttSubscriber {
    settings: MqttSettings,
    handler: Arc<FrameHandler>,
    handlers: BackgroundTasks,
    reconnect: ReconnectPolicy,
}

impl MqttSubscriber {
    pub fn new(settings: MqttSettings, handler: Arc<FrameHandler>) -> Self {
        Self {
            settings,
            handler,
            handlers: BackgroundTasks::new(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Poll the broker until `cancel` fires, then disconnect and wait for
    /// in-flight frame handlers, each bounded by `grace`.
    pub async fn run(self, cancel: CancellationToken, grace: Duration) {
        // ---
        let options = self.settings.options();
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let filters = self.handler.topics().filters();

        tracing::info!(
            host = %self.settings.host,
            port = self.settings.port,
            client_id = %self.settings.client_id,
            topic_root = %self.handler.topics().root(),
            max_packet_size = self.settings.max_packet_size,
            "Connecting to MQTT broker"
        );

        let mut delay = self.reconnect.initial_delay;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        tracing::info!(session_present = ack.session_present, "MQTT connected");
                        delay = self.reconnect.initial_delay;
                        // Clean sessions lose subscriptions on reconnect.
                        for filter in &filters {
                            match client.try_subscribe(filter.as_str(), self.settings.qos) {
                                Ok(()) => tracing::info!(filter = %filter, "Subscribed"),
                                Err(e) => {
                                    tracing::error!(filter = %filter, error = %e, "Subscribe failed")
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let handler = Arc::clone(&self.handler);
                        self.handlers.spawn(async move {
                            handler.handle(&publish.topic, publish.payload).await;
                        });
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        tracing::debug!(pkid = ack.pkid, "Subscription acknowledged");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "MQTT connection lost"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        delay = self.reconnect.next_delay(delay);
                    }
                },
            }
        }

        tracing::info!("MQTT subscriber stopping");
        if let Err(e) = client.try_disconnect() {
            tracing::warn!(error = %e, "Failed to queue MQTT disconnect");
        }
        let flushed = tokio::time::timeout(grace, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            tracing::warn!("Timed out sending MQTT disconnect");
        }

        self.handlers.shutdown(grace).await;
        tracing::info!("MQTT subscriber stopped");
    }
}
