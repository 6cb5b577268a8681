//! Cloud device clients for Tracknode
//!
//! Two interchangeable implementations of the
//! [`tracknode_core::client::DeviceClient`] contract:
//!
//! - [`mqtt::MqttDeviceClient`] - one persistent session over `rumqttc`,
//!   with request/reply correlation on topic-suffix ids and transparent
//!   reconnection at a fixed backoff. The preferred transport.
//! - [`http::HttpDeviceClient`] - stateless requests over `ureq` with an
//!   RPC long-poll loop. Survives networks where only HTTP gets through;
//!   reconnection is the caller's job, and outbound RPC is unsupported.
//!
//! Both clients swallow wire-level errors at the contract boundary: a
//! failed publish is `false`, an unanswered request is `None`, and the
//! details go to the log.

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "http")]
pub mod http;

pub mod correlate;

#[cfg(feature = "http")]
pub use http::{HttpConfig, HttpDeviceClient};
#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttDeviceClient};

use thiserror::Error;

/// Client construction failures.
///
/// The only errors these crates ever return eagerly: once a client exists,
/// wire problems degrade to `false`/`None` results instead.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The endpoint must be a bare host, not a URL.
    #[error("endpoint must not embed a scheme: {0}")]
    SchemeInEndpoint(String),
    /// An empty device token can never authenticate.
    #[error("device token is empty")]
    EmptyToken,
}
