//! Cloud device-client contract
//!
//! One trait abstracts the two interchangeable transports (streaming MQTT
//! session vs. HTTP long-poll) behind the operations the scheduler and the
//! provisioning flow need. The contract is deliberately lossy about wire
//! errors: publishing reports plain success/failure, and a correlated
//! request that times out yields `None` - "unknown outcome", which is not
//! the same thing as a failure.
//!
//! Concurrency note: implementations support at most one in-flight
//! correlated request of each kind (attributes, RPC). Callers that might
//! overlap `get_attributes`/`do_rpc_request` must serialize externally.

use std::time::Duration;

use serde_json::{json, Value};

use crate::telemetry::TelemetryFrame;
use crate::time::Timestamp;

/// An inbound remote procedure call from the cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    /// Correlation id to echo in [`DeviceClient::send_rpc_reply`].
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Method arguments, when present.
    pub params: Option<Value>,
}

/// Callback invoked for each inbound RPC request.
pub type RpcHandler = Box<dyn Fn(RpcRequest) + Send + Sync + 'static>;

/// Result of an attributes fetch, split into the two server-side scopes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    /// Client-side attributes, when the response carried any.
    pub client: Option<Value>,
    /// Shared attributes, when the response carried any.
    pub shared: Option<Value>,
}

impl AttributeSet {
    /// Split a raw response body into its `client`/`shared` parts.
    pub fn from_response(mut body: Value) -> Self {
        let take = |body: &mut Value, key: &str| body.get_mut(key).map(Value::take);
        Self {
            client: take(&mut body, "client"),
            shared: take(&mut body, "shared"),
        }
    }
}

/// A device session with the cloud, over either transport.
pub trait DeviceClient {
    /// Establish the session. Returns `true` on success; callers retry with
    /// their own backoff on `false`.
    fn connect(&mut self) -> bool;

    /// Current link state. The streaming transport recovers on its own;
    /// the polling transport stays down until `connect` is called again.
    fn is_connected(&self) -> bool;

    /// Start the transport's background processing task (message loop or
    /// RPC long-poll loop). Call once, after the first successful connect.
    fn run(&mut self);

    /// Install the callback for inbound RPC requests. Replies go back
    /// through [`DeviceClient::send_rpc_reply`] with the request's id.
    fn set_rpc_handler(&mut self, handler: RpcHandler);

    /// Publish a telemetry frame, stamped with `ts` (epoch milliseconds)
    /// when available. `false` means the frame did not go out.
    fn publish_telemetry(&self, frame: &TelemetryFrame, ts: Option<Timestamp>) -> bool;

    /// Publish client-side attributes.
    fn publish_attributes(&self, attributes: &Value) -> bool;

    /// Fetch attributes by key lists (comma-separated). `None` means no
    /// reply arrived within `timeout` - the values are unknown, not absent.
    fn get_attributes(
        &self,
        client_keys: Option<&str>,
        shared_keys: Option<&str>,
        timeout: Duration,
    ) -> Option<AttributeSet>;

    /// Reply to an inbound RPC request.
    fn send_rpc_reply(&self, id: u64, result: &Value) -> bool;

    /// Issue an outbound RPC and wait up to `timeout` for the result.
    /// Only the streaming transport supports this; the polling transport
    /// always reports `None`.
    fn do_rpc_request(&self, method: &str, params: Option<Value>, timeout: Duration)
        -> Option<Value>;
}

/// Wrap a frame in the timestamped telemetry envelope understood by the
/// cloud: `{"values": {...}, "ts": ...}` when a timestamp exists, the bare
/// object otherwise.
pub fn telemetry_envelope(frame: &TelemetryFrame, ts: Option<Timestamp>) -> Value {
    match ts {
        Some(ts) => json!({ "values": frame.to_value(), "ts": ts }),
        None => frame.to_value(),
    }
}

/// Body of an attributes fetch request; absent scopes are omitted entirely.
pub fn attribute_request_body(client_keys: Option<&str>, shared_keys: Option<&str>) -> Value {
    let mut body = serde_json::Map::new();
    if let Some(keys) = client_keys {
        body.insert("clientKeys".to_owned(), Value::from(keys));
    }
    if let Some(keys) = shared_keys {
        body.insert("sharedKeys".to_owned(), Value::from(keys));
    }
    Value::Object(body)
}
