//! Long-polling HTTP device client
//!
//! Every operation is a standalone request against
//! `{scheme}://{endpoint}/api/v1/{token}/...`, so there is no session to
//! keep alive: `connect` is a reachability probe and nothing reconnects
//! automatically. Inbound RPC arrives through a background long-poll loop
//! on the `rpc` resource; outbound RPC has no representation on this
//! transport and always reports no reply.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};
use serde::Deserialize;
use serde_json::Value;

use tracknode_core::client::{
    telemetry_envelope, AttributeSet, DeviceClient, RpcHandler, RpcRequest,
};
use tracknode_core::telemetry::TelemetryFrame;
use tracknode_core::time::Timestamp;

use crate::ConfigError;

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Server host (optionally `host:port`), without scheme.
    pub endpoint: String,
    /// Device access token, embedded in every request path.
    pub device_token: String,
    /// Use HTTPS.
    pub tls: bool,
    /// Per-request timeout for ordinary calls.
    pub request_timeout: Duration,
    /// Server-side hold time for the RPC long poll.
    pub poll_timeout: Duration,
    /// Pause after a failed poll before the next attempt.
    pub error_backoff: Duration,
}

impl HttpConfig {
    /// Plain-HTTP configuration for `endpoint` with the given device token.
    pub fn new(endpoint: impl Into<String>, device_token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            device_token: device_token.into(),
            tls: false,
            request_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(20),
            error_backoff: Duration::from_secs(5),
        }
    }

    /// Switch to HTTPS.
    pub fn tls(mut self) -> Self {
        self.tls = true;
        self
    }
}

/// The request/response device client.
pub struct HttpDeviceClient {
    config: HttpConfig,
    agent: ureq::Agent,
    base: String,
    connected: Arc<AtomicBool>,
    handler: Arc<Mutex<Option<RpcHandler>>>,
}

fn api_base(config: &HttpConfig) -> String {
    let scheme = if config.tls { "https" } else { "http" };
    format!(
        "{scheme}://{}/api/v1/{}",
        config.endpoint, config.device_token
    )
}

#[derive(Deserialize)]
struct RpcWire {
    id: u64,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

impl HttpDeviceClient {
    /// Build the client; no request is made until [`DeviceClient::connect`].
    pub fn new(config: HttpConfig) -> Result<Self, ConfigError> {
        if config.endpoint.contains("://") {
            return Err(ConfigError::SchemeInEndpoint(config.endpoint));
        }
        if config.device_token.is_empty() {
            return Err(ConfigError::EmptyToken);
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout)
            .build();
        let base = api_base(&config);
        Ok(Self {
            config,
            agent,
            base,
            connected: Arc::new(AtomicBool::new(false)),
            handler: Arc::new(Mutex::new(None)),
        })
    }

    fn post_json(&self, url: &str, body: &Value) -> bool {
        let payload = match serde_json::to_string(body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("cannot encode payload for {url}: {e}");
                return false;
            }
        };
        match self
            .agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_string(&payload)
        {
            Ok(resp) if resp.status() == 200 => true,
            Ok(resp) => {
                warn!("POST {url} returned {}", resp.status());
                false
            }
            Err(e) => {
                warn!("POST {url} failed: {e}");
                false
            }
        }
    }
}

/// One iteration of the RPC long poll. Returns whether the server was
/// reachable; a delivered request is passed to `handler`.
fn poll_rpc(
    agent: &ureq::Agent,
    base: &str,
    poll_timeout: Duration,
    handler: &Mutex<Option<RpcHandler>>,
) -> bool {
    let url = format!("{base}/rpc");
    let timeout_ms = poll_timeout.as_millis().to_string();
    match agent.get(&url).query("timeout", &timeout_ms).call() {
        Ok(resp) => {
            match resp.into_json::<RpcWire>() {
                Ok(wire) => {
                    // A handler that panicked earlier poisons the lock; the
                    // slot itself is still usable.
                    let guard = handler.lock().unwrap_or_else(|e| e.into_inner());
                    match guard.as_ref() {
                        Some(callback) => callback(RpcRequest {
                            id: wire.id,
                            method: wire.method,
                            params: wire.params,
                        }),
                        None => debug!("rpc request {} dropped: no handler installed", wire.id),
                    }
                }
                Err(e) => warn!("bad rpc body: {e}"),
            }
            true
        }
        // The poll window closing empty is the normal case.
        Err(ureq::Error::Status(408, _)) => true,
        Err(e) => {
            debug!("rpc poll failed: {e}");
            false
        }
    }
}

impl DeviceClient for HttpDeviceClient {
    /// Probe the server with a minimal attribute-updates poll. A 408 is a
    /// healthy answer here: the server held the request and had nothing
    /// to say.
    fn connect(&mut self) -> bool {
        let url = format!("{}/attributes/updates", self.base);
        let up = match self.agent.get(&url).query("timeout", "1000").call() {
            Ok(_) => true,
            Err(ureq::Error::Status(408, _)) => true,
            Err(e) => {
                debug!("connect probe failed: {e}");
                false
            }
        };
        self.connected.store(up, Ordering::SeqCst);
        up
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Start the inbound RPC long-poll loop on a background thread.
    fn run(&mut self) {
        let agent = self.agent.clone();
        let base = self.base.clone();
        let connected = Arc::clone(&self.connected);
        let handler = Arc::clone(&self.handler);
        let poll_timeout = self.config.poll_timeout;
        let backoff = self.config.error_backoff;

        let spawned = thread::Builder::new().name("http-poll".into()).spawn(move || loop {
            if poll_rpc(&agent, &base, poll_timeout, &handler) {
                connected.store(true, Ordering::SeqCst);
            } else {
                connected.store(false, Ordering::SeqCst);
                thread::sleep(backoff);
            }
        });
        if let Err(e) = spawned {
            error!("failed to spawn rpc poll loop: {e}");
        }
    }

    fn set_rpc_handler(&mut self, handler: RpcHandler) {
        *self.handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    fn publish_telemetry(&self, frame: &TelemetryFrame, ts: Option<Timestamp>) -> bool {
        let url = format!("{}/telemetry", self.base);
        self.post_json(&url, &telemetry_envelope(frame, ts))
    }

    fn publish_attributes(&self, attributes: &Value) -> bool {
        let url = format!("{}/attributes", self.base);
        self.post_json(&url, attributes)
    }

    fn get_attributes(
        &self,
        client_keys: Option<&str>,
        shared_keys: Option<&str>,
        _timeout: Duration,
    ) -> Option<AttributeSet> {
        let url = format!("{}/attributes", self.base);
        let mut request = self.agent.get(&url);
        if let Some(keys) = client_keys {
            request = request.query("clientKeys", keys);
        }
        if let Some(keys) = shared_keys {
            request = request.query("sharedKeys", keys);
        }
        match request.call() {
            Ok(resp) if resp.status() == 200 => match resp.into_json() {
                Ok(body) => Some(AttributeSet::from_response(body)),
                Err(e) => {
                    warn!("bad attribute body: {e}");
                    None
                }
            },
            Ok(resp) => {
                warn!("GET {url} returned {}", resp.status());
                None
            }
            Err(e) => {
                warn!("GET {url} failed: {e}");
                None
            }
        }
    }

    fn send_rpc_reply(&self, id: u64, result: &Value) -> bool {
        let url = format!("{}/rpc/{id}", self.base);
        self.post_json(&url, result)
    }

    /// Device-originated RPC has no place in a poll-only transport.
    fn do_rpc_request(
        &self,
        method: &str,
        _params: Option<Value>,
        _timeout: Duration,
    ) -> Option<Value> {
        debug!("rpc request {method} unsupported over http");
        None
    }
}
