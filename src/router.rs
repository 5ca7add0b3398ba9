//! Inbound message routing.
//!
//! One call per delivered broker message. Decode failures are logged with
//! the raw payload and dropped; nothing may panic past this boundary.
//! Admitted readings hand off to the notifier on a detached task so the
//! next inbound message is never blocked behind an in-flight wake call or
//! its retries. The task handle is dropped: spawn failures are not
//! observable here, matching the notifier's swallow-on-exhaustion contract.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::notifier::WakeClient;
use crate::rate_limit::RateLimiter;
use crate::reading::DeviceReading;

pub struct MessageRouter {
    limiter: Arc<RateLimiter>,
    notifier: Arc<WakeClient>,
}

impl MessageRouter {
    pub fn new(limiter: Arc<RateLimiter>, notifier: Arc<WakeClient>) -> Self {
        MessageRouter { limiter, notifier }
    }

    /// Handle one raw broker message. Never panics, never blocks on the
    /// outbound call.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) {
        let reading = match DeviceReading::from_payload(payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(
                    topic,
                    error = %e,
                    raw = %String::from_utf8_lossy(payload),
                    "discarding undecodable message"
                );
                return;
            }
        };

        info!(
            device_id = %reading.device_id,
            pm25 = ?reading.pm25,
            aqi = ?reading.aqi,
            "reading received"
        );

        let now = Instant::now();
        if self.limiter.should_ping(&reading.device_id, now) {
            let notifier = Arc::clone(&self.notifier);
            tokio::spawn(async move {
                notifier.notify(&reading).await;
            });
        } else {
            let remaining = self.limiter.remaining(&reading.device_id, now);
            info!(
                device_id = %reading.device_id,
                remaining_s = remaining.as_secs_f64().round() as u64,
                "skipping ping (debounce)"
            );
        }
    }
}
