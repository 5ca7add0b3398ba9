//! Outbound wake call with bounded retry.
//!
//! A notify sequence issues up to `max_ping_retries` GETs against the
//! backend, backing off exponentially (capped at 5 s) between failures.
//! The first 2xx records the device's debounce timestamp and ends the
//! sequence. Exhaustion is logged and swallowed: the caller never sees an
//! error, and no retry survives past the sequence; the next inbound
//! reading starts a fresh one.
//!
//! The debounce timestamp is taken when the 2xx *response* arrives, not
//! when the triggering reading did, so retry delays count against the
//! window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::header::CACHE_CONTROL;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::PingerConfig;
use crate::rate_limit::RateLimiter;
use crate::reading::DeviceReading;

/// Header carrying the optional wake token.
pub const WAKE_TOKEN_HEADER: &str = "X-Wake-Token";

/// Per-attempt request timeout.
const PING_TIMEOUT: Duration = Duration::from_secs(10);

const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_CAP_MS: u64 = 5000;

// ---------------------------------------------------------------------------
// WakeClient
// ---------------------------------------------------------------------------

pub struct WakeClient {
    http: reqwest::Client,
    url: String,
    wake_token: Option<String>,
    max_attempts: u32,
    limiter: Arc<RateLimiter>,
}

impl WakeClient {
    pub fn new(cfg: &PingerConfig, limiter: Arc<RateLimiter>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(PING_TIMEOUT)
            .user_agent(concat!("mqtt-pinger/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(WakeClient {
            http,
            url: cfg.ping_url(),
            wake_token: cfg.wake_token.clone(),
            max_attempts: cfg.max_ping_retries.max(1),
            limiter,
        })
    }

    /// Run one full notify sequence for `reading`.
    ///
    /// Never returns an error; every outcome is reported through logs.
    pub async fn notify(&self, reading: &DeviceReading) {
        let device_id = reading.device_id.as_str();
        for number in 1..=self.max_attempts {
            let attempt = self.attempt(number).await;
            match attempt.outcome {
                Ok(status) => {
                    info!(
                        device_id,
                        status = status.as_u16(),
                        elapsed_ms = attempt.elapsed.as_millis() as u64,
                        "pinged backend"
                    );
                    self.limiter.record_success(device_id, Instant::now());
                    return;
                }
                Err(e) => {
                    warn!(
                        device_id,
                        attempt = attempt.number,
                        elapsed_ms = attempt.elapsed.as_millis() as u64,
                        error = %e,
                        "ping attempt failed"
                    );
                    if attempt.number < self.max_attempts {
                        tokio::time::sleep(backoff_delay(attempt.number)).await;
                    }
                }
            }
        }
        error!(
            device_id,
            attempts = self.max_attempts,
            "all ping attempts failed; next reading will retry"
        );
    }

    async fn attempt(&self, number: u32) -> PingAttempt {
        let started = Instant::now();
        let outcome = self.send_once().await;
        PingAttempt {
            number,
            elapsed: started.elapsed(),
            outcome,
        }
    }

    async fn send_once(&self) -> Result<StatusCode, AttemptError> {
        let mut request = self.http.get(&self.url).header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &self.wake_token {
            request = request.header(WAKE_TOKEN_HEADER, token.as_str());
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(status)
        } else {
            Err(AttemptError::Status(status))
        }
    }
}

// ---------------------------------------------------------------------------
// PingAttempt
// ---------------------------------------------------------------------------

/// Outcome of one wake-call attempt; lives only long enough to be logged
/// and to drive the backoff decision.
struct PingAttempt {
    number: u32,
    elapsed: Duration,
    outcome: Result<StatusCode, AttemptError>,
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(StatusCode),
}

/// Delay before the attempt after `attempt`: `min(1000ms * 2^(n-1), 5000ms)`.
fn backoff_delay(attempt: u32) -> Duration {
    let shift = (attempt.saturating_sub(1)).min(16);
    let ms = BACKOFF_BASE_MS.saturating_mul(1 << shift);
    Duration::from_millis(ms.min(BACKOFF_CAP_MS))
}
