//! Streaming MQTT device client
//!
//! ## Overview
//!
//! One long-lived session per device, authenticated by the device token as
//! the MQTT username. Three logical channels hang off the session, keyed by
//! the device identity in the topic and correlated by an integer id in the
//! topic suffix:
//!
//! | Direction | Topic | Meaning |
//! |-----------|-------|---------|
//! | out | `v1/devices/me/telemetry` | telemetry frames |
//! | out | `v1/devices/me/attributes` | client attribute publishes |
//! | out | `v1/devices/me/attributes/request/{id}` | attribute fetches |
//! | in  | `v1/devices/me/attributes/response/{id}` | attribute replies |
//! | in  | `v1/devices/me/rpc/request/{id}` | inbound RPC |
//! | out | `v1/devices/me/rpc/response/{id}` | replies to inbound RPC |
//! | out | `v1/devices/me/rpc/request/{id}` | outbound RPC |
//! | in  | `v1/devices/me/rpc/response/{id}` | outbound RPC replies |
//!
//! ## Session recovery
//!
//! `run` owns the driver's event loop on a background thread. On a
//! transport failure the client flips to disconnected, sleeps a fixed
//! backoff and lets the driver reconnect; on every successful (re)connect
//! the three inbound channels are re-subscribed. Nothing is buffered during
//! an outage - publishes in that window simply fail - and callers never see
//! the recovery beyond `is_connected()` dipping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet, QoS, Transport};

use tracknode_core::client::{
    attribute_request_body, telemetry_envelope, AttributeSet, DeviceClient, RpcHandler, RpcRequest,
};
use tracknode_core::telemetry::TelemetryFrame;
use tracknode_core::time::Timestamp;

use crate::correlate::ReplyWaiter;
use crate::ConfigError;

const TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";
const ATTRIBUTES_TOPIC: &str = "v1/devices/me/attributes";
const ATTRIBUTE_REQUEST_PREFIX: &str = "v1/devices/me/attributes/request/";
const ATTRIBUTE_RESPONSE_PREFIX: &str = "v1/devices/me/attributes/response/";
const RPC_REQUEST_PREFIX: &str = "v1/devices/me/rpc/request/";
const RPC_RESPONSE_PREFIX: &str = "v1/devices/me/rpc/response/";

// Outbound RPC ids start far above attribute ids so the two sequences can
// never be confused in server logs.
const FIRST_ATTRIBUTE_ID: u64 = 0;
const FIRST_RPC_ID: u64 = 10_001;

/// MQTT session configuration.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host, without scheme.
    pub host: String,
    /// Broker port; set by [`MqttConfig::tls`] unless overridden.
    pub port: u16,
    /// Device access token, sent as the MQTT username.
    pub device_token: String,
    /// MQTT client identifier.
    pub client_id: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// How long `connect` waits for the broker's acknowledgment.
    pub connect_timeout: Duration,
    /// Pause before the event loop retries after a transport failure.
    pub reconnect_backoff: Duration,
    /// Use TLS for the session.
    pub tls: bool,
}

impl MqttConfig {
    /// Plain-TCP configuration for `host` with the given device token.
    pub fn new(host: impl Into<String>, device_token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 1883,
            device_token: device_token.into(),
            client_id: "tracknode".into(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(10),
            tls: false,
        }
    }

    /// Switch to TLS (and the conventional port 8883).
    pub fn tls(mut self) -> Self {
        self.tls = true;
        self.port = 8883;
        self
    }

    /// Override the broker port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the MQTT client identifier.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }
}

/// The streaming device client.
pub struct MqttDeviceClient {
    config: MqttConfig,
    client: Client,
    connection: Option<Connection>,
    connected: Arc<AtomicBool>,
    attributes: Arc<ReplyWaiter>,
    rpc: Arc<ReplyWaiter>,
    handler: Arc<Mutex<Option<RpcHandler>>>,
}

impl MqttDeviceClient {
    /// Build the session state; nothing touches the network until
    /// [`DeviceClient::connect`].
    pub fn new(config: MqttConfig) -> Result<Self, ConfigError> {
        if config.host.contains("://") {
            return Err(ConfigError::SchemeInEndpoint(config.host));
        }
        if config.device_token.is_empty() {
            return Err(ConfigError::EmptyToken);
        }

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_credentials(&config.device_token, "");
        options.set_keep_alive(config.keep_alive);
        if config.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, 16);
        Ok(Self {
            config,
            client,
            connection: Some(connection),
            connected: Arc::new(AtomicBool::new(false)),
            attributes: Arc::new(ReplyWaiter::new(FIRST_ATTRIBUTE_ID)),
            rpc: Arc::new(ReplyWaiter::new(FIRST_RPC_ID)),
            handler: Arc::new(Mutex::new(None)),
        })
    }

    fn publish_json(&self, topic: &str, body: &Value) -> bool {
        // The driver would happily queue the publish and flush it after a
        // reconnect, but frames from an outage are stale by then. Fail fast
        // so the caller sees the loss instead of a silent late delivery.
        if !self.connected.load(Ordering::SeqCst) {
            debug!("dropping publish to {topic}: link down");
            return false;
        }
        let payload = match serde_json::to_vec(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("cannot encode payload for {topic}: {e}");
                return false;
            }
        };
        match self.client.publish(topic, QoS::AtLeastOnce, false, payload) {
            Ok(()) => true,
            Err(e) => {
                warn!("publish to {topic} failed: {e}");
                false
            }
        }
    }
}

/// (Re-)subscribe the three inbound channels. Runs after every ConnAck.
fn subscribe_channels(client: &Client) {
    for topic in [
        "v1/devices/me/attributes/response/+",
        "v1/devices/me/rpc/request/+",
        "v1/devices/me/rpc/response/+",
    ] {
        if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce) {
            warn!("subscribe to {topic} failed: {e}");
        }
    }
}

/// The id embedded as the topic suffix, if the topic is on `prefix`.
fn suffix_id(topic: &str, prefix: &str) -> Option<u64> {
    topic.strip_prefix(prefix)?.parse().ok()
}

#[derive(Deserialize)]
struct RpcEnvelope {
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

/// Route one inbound message to its channel. Malformed ids or bodies are
/// logged and dropped; an inbound message must never take down the loop.
fn dispatch(
    topic: &str,
    payload: &[u8],
    attributes: &ReplyWaiter,
    rpc: &ReplyWaiter,
    handler: &Mutex<Option<RpcHandler>>,
) {
    if let Some(id) = suffix_id(topic, ATTRIBUTE_RESPONSE_PREFIX) {
        match serde_json::from_slice(payload) {
            Ok(body) => {
                attributes.fulfil(id, body);
            }
            Err(e) => warn!("bad attribute response on {topic}: {e}"),
        }
    } else if let Some(id) = suffix_id(topic, RPC_REQUEST_PREFIX) {
        match serde_json::from_slice::<RpcEnvelope>(payload) {
            Ok(envelope) => {
                // A handler that panicked on an earlier request poisons the
                // lock; the slot itself is still usable.
                let guard = handler.lock().unwrap_or_else(|e| e.into_inner());
                match guard.as_ref() {
                    Some(callback) => callback(RpcRequest {
                        id,
                        method: envelope.method,
                        params: envelope.params,
                    }),
                    None => debug!("rpc request {id} dropped: no handler installed"),
                }
            }
            Err(e) => warn!("bad rpc request on {topic}: {e}"),
        }
    } else if let Some(id) = suffix_id(topic, RPC_RESPONSE_PREFIX) {
        match serde_json::from_slice(payload) {
            Ok(body) => {
                rpc.fulfil(id, body);
            }
            Err(e) => warn!("bad rpc response on {topic}: {e}"),
        }
    } else {
        debug!("message on unexpected topic {topic}");
    }
}

impl DeviceClient for MqttDeviceClient {
    /// Drive the connection until the broker acknowledges the session.
    ///
    /// After `run` has taken over the event loop, recovery is internal and
    /// this only reports the current state.
    fn connect(&mut self) -> bool {
        let Some(connection) = self.connection.as_mut() else {
            return self.connected.load(Ordering::SeqCst);
        };

        let deadline = Instant::now() + self.config.connect_timeout;
        let mut acknowledged = false;
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack)))
                    if ack.code == ConnectReturnCode::Success =>
                {
                    acknowledged = true;
                    break;
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    warn!("broker refused session: {:?}", ack.code);
                    return false;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("connect failed: {e}");
                    return false;
                }
            }
            if Instant::now() >= deadline {
                debug!("connect timed out");
                return false;
            }
        }

        if acknowledged {
            self.connected.store(true, Ordering::SeqCst);
            subscribe_channels(&self.client);
        }
        acknowledged
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Hand the event loop to a background thread.
    fn run(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            warn!("mqtt event loop already running");
            return;
        };

        let client = self.client.clone();
        let connected = Arc::clone(&self.connected);
        let attributes = Arc::clone(&self.attributes);
        let rpc = Arc::clone(&self.rpc);
        let handler = Arc::clone(&self.handler);
        let backoff = self.config.reconnect_backoff;

        let spawned = thread::Builder::new()
            .name("mqtt-client".into())
            .spawn(move || {
                for event in connection.iter() {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            if ack.code == ConnectReturnCode::Success {
                                info!("mqtt session established");
                                connected.store(true, Ordering::SeqCst);
                                subscribe_channels(&client);
                            } else {
                                warn!("broker refused session: {:?}", ack.code);
                                connected.store(false, Ordering::SeqCst);
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            dispatch(
                                &publish.topic,
                                &publish.payload,
                                &attributes,
                                &rpc,
                                &handler,
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if connected.swap(false, Ordering::SeqCst) {
                                warn!("mqtt link lost: {e}");
                            }
                            // The driver reconnects on the next iteration;
                            // pace it so a dead network is not hammered.
                            thread::sleep(backoff);
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            error!("failed to spawn mqtt event loop: {e}");
        }
    }

    fn set_rpc_handler(&mut self, handler: RpcHandler) {
        *self.handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    fn publish_telemetry(&self, frame: &TelemetryFrame, ts: Option<Timestamp>) -> bool {
        self.publish_json(TELEMETRY_TOPIC, &telemetry_envelope(frame, ts))
    }

    fn publish_attributes(&self, attributes: &Value) -> bool {
        self.publish_json(ATTRIBUTES_TOPIC, attributes)
    }

    fn get_attributes(
        &self,
        client_keys: Option<&str>,
        shared_keys: Option<&str>,
        timeout: Duration,
    ) -> Option<AttributeSet> {
        let id = self.attributes.issue();
        let topic = format!("{ATTRIBUTE_REQUEST_PREFIX}{id}");
        let body = attribute_request_body(client_keys, shared_keys);
        if !self.publish_json(&topic, &body) {
            return None;
        }
        self.attributes
            .wait(timeout)
            .map(AttributeSet::from_response)
    }

    fn send_rpc_reply(&self, id: u64, result: &Value) -> bool {
        self.publish_json(&format!("{RPC_RESPONSE_PREFIX}{id}"), result)
    }

    fn do_rpc_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Option<Value> {
        let id = self.rpc.issue();
        let topic = format!("{RPC_REQUEST_PREFIX}{id}");
        let body = json!({ "method": method, "params": params });
        debug!("rpc request {id}: {method}");
        if !self.publish_json(&topic, &body) {
            return None;
        }
        self.rpc.wait(timeout)
    }
}
