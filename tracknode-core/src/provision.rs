//! Cloud registration flow
//!
//! A fresh device must be claimed by its owner's email before telemetry is
//! associated with an account. Registration is a small handshake over the
//! generic [`DeviceClient`] contract: an RPC announces the token/email pair,
//! then a shared-attribute read confirms the cloud recorded it.

use std::thread;
use std::time::Duration;

use log::{debug, info};
use serde_json::{json, Value};

use crate::client::DeviceClient;
use crate::errors::ProvisionError;
use crate::time::TimeSource;

/// How long registration is retried before giving up.
pub const REGISTRATION_WINDOW: Duration = Duration::from_secs(60);

/// Pause between registration attempts.
pub const REGISTRATION_RETRY: Duration = Duration::from_secs(5);

const ATTRIBUTE_TIMEOUT: Duration = Duration::from_secs(10);
const RPC_TIMEOUT: Duration = Duration::from_secs(15);

/// Whether the cloud already associates this device with `email`.
///
/// `false` covers both "registered to someone else" and "could not ask";
/// callers that need the distinction should check the link first.
pub fn is_registered<C: DeviceClient + ?Sized>(client: &C, email: &str) -> bool {
    let Some(attributes) = client.get_attributes(None, Some("email"), ATTRIBUTE_TIMEOUT) else {
        return false;
    };
    attributes
        .shared
        .as_ref()
        .and_then(|shared| shared.get("email"))
        .and_then(Value::as_str)
        == Some(email)
}

/// One registration attempt: RPC `register` with the owner email and the
/// device token, accepted on an `"OK"` reply.
pub fn register<C: DeviceClient + ?Sized>(client: &C, email: &str, token: &str) -> bool {
    let params = json!({ "email": email, "token": token });
    info!("registering device");
    let reply = client.do_rpc_request("register", Some(params), RPC_TIMEOUT);
    reply
        .as_ref()
        .and_then(|r| r.get("reply"))
        .and_then(Value::as_str)
        == Some("OK")
}

/// Retry registration until confirmed, the link drops, or the retry window
/// closes. `clock` supplies the deadline so the window survives clock
/// sources other than wall time.
pub fn register_with_deadline<C, T>(
    client: &C,
    email: &str,
    token: &str,
    clock: &T,
) -> Result<(), ProvisionError>
where
    C: DeviceClient + ?Sized,
    T: TimeSource,
{
    register_with_pause(client, email, token, clock, thread::sleep)
}

/// [`register_with_deadline`] with the inter-attempt pause supplied by the
/// caller, so a bench on a fixed clock can step time instead of sleeping.
pub fn register_with_pause<C, T, P>(
    client: &C,
    email: &str,
    token: &str,
    clock: &T,
    mut pause: P,
) -> Result<(), ProvisionError>
where
    C: DeviceClient + ?Sized,
    T: TimeSource,
    P: FnMut(Duration),
{
    let start = clock.now();
    let window_ms = REGISTRATION_WINDOW.as_millis() as u64;

    while clock.now().saturating_sub(start) < window_ms {
        if register(client, email, token) && is_registered(client, email) {
            info!("device registered");
            return Ok(());
        }
        if !client.is_connected() {
            return Err(ProvisionError::Offline);
        }
        debug!("retrying device registration");
        pause(REGISTRATION_RETRY);
    }
    Err(ProvisionError::Timeout)
}
