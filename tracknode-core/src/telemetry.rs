//! Telemetry frame assembly
//!
//! A [`TelemetryFrame`] is the field map accumulated during one scheduler
//! decision and handed to the device client in a single publish. Numeric
//! fields are rounded to a per-field decimal precision at insertion time so
//! the wire payload stays compact regardless of sensor noise.

use serde::Serialize;
use serde_json::{Map, Number, Value};

/// Round `value` to `decimals` decimal places.
fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

/// An accumulating map of telemetry field name to scalar value.
///
/// Built incrementally each scheduler tick and cleared after every publish
/// attempt; a failed publish drops the frame rather than re-queueing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryFrame {
    fields: Map<String, Value>,
}

impl TelemetryFrame {
    /// Empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a boolean field, encoded as `0`/`1` for the cloud side.
    pub fn set_flag(&mut self, key: &str, on: bool) {
        self.fields
            .insert(key.to_owned(), Value::from(i64::from(on)));
    }

    /// Set an integer field.
    pub fn set_int(&mut self, key: &str, value: i64) {
        self.fields.insert(key.to_owned(), Value::from(value));
    }

    /// Set a numeric field rounded to `decimals` places.
    ///
    /// Non-finite values are skipped outright; a NaN from a misbehaving
    /// sensor must never reach the wire.
    pub fn set(&mut self, key: &str, value: f64, decimals: u32) {
        let rounded = round_to(value, decimals);
        if let Some(number) = Number::from_f64(rounded) {
            self.fields.insert(key.to_owned(), Value::Number(number));
        }
    }

    /// Field value, if present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Whether the frame carries the given field.
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Number of fields accumulated so far.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Drop all accumulated fields.
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// The frame as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

impl Serialize for TelemetryFrame {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}
