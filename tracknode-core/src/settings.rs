//! Persisted device settings
//!
//! A single small JSON document `{apn, email, name}` lives at a fixed flash
//! offset, terminated by a newline sentinel. The flash driver itself is
//! board glue; this module only encodes and decodes the block, plus the two
//! validation predicates applied before a value is accepted.

use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;

/// Size of the flash block the settings document is read from.
pub const SETTINGS_BLOCK_LEN: usize = 128;

/// The persisted configuration document.
///
/// All fields are optional: a fresh device starts with an empty document
/// and acquires values through provisioning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Cellular APN for the data connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apn: Option<String>,
    /// Owner email, used for cloud registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Friendly device name shown on the dashboard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DeviceSettings {
    /// Decode the document from a raw flash block.
    ///
    /// Everything after the first newline is ignored; a block without a
    /// newline has never been written and is reported as such rather than
    /// parsed as garbage.
    pub fn from_flash_block(block: &[u8]) -> Result<Self, SettingsError> {
        let end = block
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(SettingsError::MissingTerminator)?;
        let text = std::str::from_utf8(&block[..end]).map_err(|_| SettingsError::NotUtf8)?;
        Ok(serde_json::from_str(text)?)
    }

    /// Encode the document as a newline-terminated flash block payload.
    pub fn to_flash_block(&self) -> Vec<u8> {
        let mut block = serde_json::to_vec(self).unwrap_or_else(|_| b"{}".to_vec());
        block.push(b'\n');
        block
    }
}

/// An APN may only contain ASCII letters, digits, `-` and `.`.
pub fn validate_apn(apn: &str) -> bool {
    apn.bytes()
        .all(|c| c.is_ascii_alphanumeric() || c == b'-' || c == b'.')
}

/// Minimal structural email check: an `@`, then a domain of letters,
/// digits, `-` and `.` containing at least one dot followed by a label.
pub fn validate_email(email: &str) -> bool {
    let mut domain: i32 = -1;
    for c in email.bytes() {
        if domain >= 0 {
            if !(c.is_ascii_alphanumeric() || c == b'-' || c == b'.') {
                return false;
            }
            domain += 1;
            if c == b'.' {
                domain = 255;
            }
        } else {
            if !c.is_ascii() {
                return false;
            }
            if c == b'@' {
                domain = 0;
            }
        }
    }
    email.len() > 2 && domain >= 256
}
