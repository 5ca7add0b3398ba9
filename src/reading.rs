//! Inbound sensor payload decoding.
//!
//! Payloads are JSON. The only field the pinger requires is `device_id`;
//! a message without one cannot be rate-limited and is rejected outright
//! rather than grouped under a default key.

use serde::Deserialize;
use thiserror::Error;

/// One decoded sensor reading.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceReading {
    pub device_id: String,
    #[serde(default)]
    pub pm25: Option<f64>,
    #[serde(default)]
    pub aqi: Option<f64>,
    /// Device uptime millis as published by the sensor; carried for logging only.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl DeviceReading {
    /// Decode a raw broker payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        let reading: DeviceReading = serde_json::from_slice(payload)?;
        if reading.device_id.trim().is_empty() {
            return Err(DecodeError::MissingDeviceId);
        }
        Ok(reading)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing or empty device_id")]
    MissingDeviceId,
}
