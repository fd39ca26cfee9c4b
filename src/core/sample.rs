//! Inbound frame decoding and the canonical sample record.
//!
//! Frames arrive as JSON objects carrying three sensor triples:
//!
//! ```json
//! { "deviceId": "ESP1", "accel": [0.1, 0.0, 9.8], "gyro": [0, 0, 0], "mag": [12, -3, 40] }
//! ```
//!
//! Anything that does not match this shape is rejected as malformed and
//! never reaches the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Device id assigned to frames that omit `deviceId` or send it empty.
pub const UNKNOWN_DEVICE: &str = "unknown";

/// A three-axis reading.
pub type Vector3 = [f64; 3];

/// Raw wire shape of an inbound frame. Every field is optional here so that
/// missing fields produce a precise error instead of a serde message.
#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
    accel: Option<Vec<f64>>,
    gyro: Option<Vec<f64>>,
    mag: Option<Vec<f64>>,
}

/// A validated frame, not yet placed on the session timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub device_id: String,
    pub accel: Vector3,
    pub gyro: Vector3,
    pub mag: Vector3,
}

/// One reading from one device at one instant.
///
/// Samples are only ever built by the ingest pipeline and handed out by
/// shared reference, so they cannot change once stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub device_id: String,
    /// Monotonic receive instant, set by this process rather than the device.
    #[serde(skip)]
    pub received_at: Instant,
    /// Wall-clock receive time.
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the session reference instant.
    pub elapsed_ms: u64,
    pub accel: Vector3,
    pub gyro: Vector3,
    pub mag: Vector3,
}

impl Sample {
    /// Place a decoded frame on the session timeline.
    pub fn new(
        frame: DecodedFrame,
        received_at: Instant,
        timestamp: DateTime<Utc>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            device_id: frame.device_id,
            received_at,
            timestamp,
            elapsed_ms,
            accel: frame.accel,
            gyro: frame.gyro,
            mag: frame.mag,
        }
    }
}

/// Frame decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not parseable, or a required triple is missing or has the wrong shape.
    Malformed(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Malformed(reason) => write!(f, "Malformed frame: {reason}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode one raw frame.
pub fn decode(raw: &[u8]) -> Result<DecodedFrame, DecodeError> {
    let wire: WireFrame =
        serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let device_id = match wire.device_id {
        Some(id) if !id.is_empty() => id,
        _ => UNKNOWN_DEVICE.to_string(),
    };

    Ok(DecodedFrame {
        device_id,
        accel: triple("accel", wire.accel)?,
        gyro: triple("gyro", wire.gyro)?,
        mag: triple("mag", wire.mag)?,
    })
}

/// Decode one text frame.
pub fn decode_str(raw: &str) -> Result<DecodedFrame, DecodeError> {
    decode(raw.as_bytes())
}

fn triple(field: &str, values: Option<Vec<f64>>) -> Result<Vector3, DecodeError> {
    let values = values.ok_or_else(|| DecodeError::Malformed(format!("missing `{field}`")))?;
    let len = values.len();
    let triple: Vector3 = values.try_into().map_err(|_| {
        DecodeError::Malformed(format!("`{field}` has {len} elements, expected 3"))
    })?;

    if triple.iter().any(|v| !v.is_finite()) {
        return Err(DecodeError::Malformed(format!(
            "`{field}` contains a non-finite value"
        )));
    }

    Ok(triple)
}
