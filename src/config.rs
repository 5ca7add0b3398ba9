//! Pinger configuration loading.
//!
//! Environment variables are the sole config source; a `.env` file in the
//! working directory is honored when present. Every variable has a
//! documented default, so the binary starts with no configuration at all
//! (pointed at the placeholder broker).
//!
//! # Variables
//! - `MQTT_BROKER_URL`: `mqtt(s)://host[:port]` (default
//!   `mqtts://your-hivemq-cluster.s2.eu.hivemq.cloud:8883`)
//! - `MQTT_USERNAME` / `MQTT_PASSWORD`: optional broker credentials
//! - `MQTT_TOPIC`: subscription topic (default `smartpm25.sensor.data`)
//! - `BACKEND_URL`: base URL of the backend to wake (default
//!   `https://smartpm2-5.onrender.com`)
//! - `PING_ENDPOINT`: path appended to `BACKEND_URL` (default
//!   `/api/readings/latest`)
//! - `WAKE_TOKEN`: optional token sent as `X-Wake-Token`
//! - `DEBOUNCE_MS`: per-device debounce window (default `30000`)
//! - `MAX_PING_RETRIES`: attempts per notify sequence (default `3`)

use std::time::Duration;
use thiserror::Error;
use url::Url;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Resolved pinger configuration.
#[derive(Debug, Clone)]
pub struct PingerConfig {
    pub broker: BrokerEndpoint,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub backend_url: String,
    pub ping_path: String,
    pub wake_token: Option<String>,
    /// Minimum gap between two successful wake calls for the same device.
    pub debounce: Duration,
    pub max_ping_retries: u32,
    pub clean_session: bool,
    /// Fixed interval between broker reconnect attempts.
    pub reconnect_period: Duration,
    pub connect_timeout: Duration,
}

/// Broker endpoint parsed from `MQTT_BROKER_URL`.
#[derive(Debug, Clone)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    /// Parse `mqtt://`, `tcp://`, `mqtts://` or `ssl://` URLs. The secure
    /// schemes default to port 8883, the plain ones to 1883.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(raw)
            .map_err(|e| ConfigError::BrokerUrl(format!("'{}': {}", raw, e)))?;
        let (tls, default_port) = match url.scheme() {
            "mqtts" | "ssl" => (true, 8883),
            "mqtt" | "tcp" => (false, 1883),
            other => {
                return Err(ConfigError::BrokerUrl(format!(
                    "'{}': unsupported scheme '{}'",
                    raw, other
                )));
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::BrokerUrl(format!("'{}': missing host", raw)))?
            .to_owned();
        Ok(BrokerEndpoint {
            host,
            port: url.port().unwrap_or(default_port),
            tls,
        })
    }
}

impl std::fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

impl PingerConfig {
    /// The full wake-call target, `BACKEND_URL` with `PING_ENDPOINT` appended.
    pub fn ping_url(&self) -> String {
        format!("{}{}", self.backend_url.trim_end_matches('/'), self.ping_path)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load configuration from the process environment.
pub fn load() -> Result<PingerConfig, ConfigError> {
    load_from(|key| std::env::var(key).ok())
}

/// Load configuration through an arbitrary variable lookup.
///
/// Tests pass a map-backed closure here instead of mutating process env.
pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<PingerConfig, ConfigError> {
    let broker_raw = var_or(
        &lookup,
        "MQTT_BROKER_URL",
        "mqtts://your-hivemq-cluster.s2.eu.hivemq.cloud:8883",
    );
    let broker = BrokerEndpoint::parse(&broker_raw)?;

    let debounce_ms: u64 = var_parse(&lookup, "DEBOUNCE_MS", 30_000)?;
    let max_ping_retries: u32 = var_parse(&lookup, "MAX_PING_RETRIES", 3)?;

    Ok(PingerConfig {
        broker,
        username: var(&lookup, "MQTT_USERNAME"),
        password: var(&lookup, "MQTT_PASSWORD"),
        topic: var_or(&lookup, "MQTT_TOPIC", "smartpm25.sensor.data"),
        backend_url: var_or(&lookup, "BACKEND_URL", "https://smartpm2-5.onrender.com"),
        ping_path: var_or(&lookup, "PING_ENDPOINT", "/api/readings/latest"),
        wake_token: var(&lookup, "WAKE_TOKEN"),
        debounce: Duration::from_millis(debounce_ms),
        max_ping_retries,
        clean_session: true,
        reconnect_period: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(30),
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid broker URL {0}")]
    BrokerUrl(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

// ---------------------------------------------------------------------------
// Lookup helpers
// ---------------------------------------------------------------------------

/// A set but blank variable is treated the same as an unset one.
fn var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn var_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    var(lookup, key).unwrap_or_else(|| default.to_owned())
}

fn var_parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var(lookup, key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("{}='{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
