//! MQTT broker connection lifecycle.
//!
//! Owns the connect/subscribe/reconnect state machine. rumqttc surfaces
//! transport errors, server-initiated closes and network loss as errors
//! from `EventLoop::poll`, and its next poll re-dials; the run loop turns
//! that into a fixed-interval reconnect (no exponential backoff here, only
//! the outbound wake call backs off) with a hard attempt cap. Past the cap
//! the loop returns a fatal error and the process exits non-zero, leaving
//! the restart to the host supervisor.
//!
//! The current state is a single authoritative variable published on a
//! watch channel; nothing outside this module mutates it.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, Transport};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PingerConfig;
use crate::router::MessageRouter;

/// Reconnect attempts allowed before giving up for good.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

// ---------------------------------------------------------------------------
// Reconnect accounting
// ---------------------------------------------------------------------------

/// Counts consecutive failed (re)connect attempts against the cap.
/// Reset on every successful connect.
#[derive(Debug)]
pub(crate) struct ReconnectPolicy {
    attempts: u32,
    cap: u32,
}

impl ReconnectPolicy {
    pub(crate) fn new(cap: u32) -> Self {
        ReconnectPolicy { attempts: 0, cap }
    }

    /// Register one failed attempt; returns its number, or the fatal error
    /// once the cap is exceeded.
    pub(crate) fn register_failure(&mut self) -> Result<u32, BrokerError> {
        self.attempts += 1;
        if self.attempts > self.cap {
            Err(BrokerError::ReconnectCapExceeded(self.attempts))
        } else {
            Ok(self.attempts)
        }
    }

    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }
}

// ---------------------------------------------------------------------------
// BrokerClient
// ---------------------------------------------------------------------------

pub struct BrokerClient {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    reconnect_period: Duration,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
}

impl BrokerClient {
    /// Build the client from resolved config. No I/O happens here; the
    /// connection is dialed by [`BrokerClient::run`].
    pub fn new(cfg: &PingerConfig) -> (Self, watch::Receiver<ConnectionState>) {
        let client_id = random_client_id();
        let mut opts = MqttOptions::new(client_id.clone(), cfg.broker.host.clone(), cfg.broker.port);
        opts.set_clean_session(cfg.clean_session);
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            opts.set_credentials(user, pass);
        }
        if cfg.broker.tls {
            // rustls with system roots; certificate verification stays on
            opts.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        eventloop
            .network_options
            .set_connection_timeout(cfg.connect_timeout.as_secs());

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        info!(broker = %cfg.broker, client_id = %client_id, "broker client configured");

        (
            BrokerClient {
                client,
                eventloop,
                topic: cfg.topic.clone(),
                reconnect_period: cfg.reconnect_period,
                policy: ReconnectPolicy::new(MAX_RECONNECT_ATTEMPTS),
                state_tx,
            },
            state_rx,
        )
    }

    /// Drive the connection until shutdown is signalled or the reconnect
    /// cap is exceeded. Delivered messages are handed to `router` one at a
    /// time in arrival order.
    pub async fn run(
        &mut self,
        router: &MessageRouter,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        self.set_state(ConnectionState::Connecting);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!(topic = %self.topic, "connected to broker");
                        self.policy.reset();
                        self.set_state(ConnectionState::Connected);
                        // clean session: the subscription must be re-established
                        // after every (re)connect
                        if let Err(e) = self.client.subscribe(&self.topic, QoS::AtMostOnce).await {
                            // non-fatal: the connection stays up, we just
                            // receive nothing until the next reconnect
                            warn!(topic = %self.topic, error = %e, "subscribe failed");
                        } else {
                            debug!(topic = %self.topic, "subscribed");
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        router.handle_message(&publish.topic, &publish.payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        self.set_state(ConnectionState::Reconnecting);
                        let attempt = self.policy.register_failure()?;
                        warn!(
                            attempt,
                            retry_in_s = self.reconnect_period.as_secs(),
                            error = %e,
                            "broker connection lost"
                        );
                        tokio::select! {
                            _ = sleep(self.reconnect_period) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                    }
                },
                _ = shutdown_rx.changed() => {}
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Close the connection gracefully, letting in-flight acknowledgments
    /// flush. Idempotent: repeated calls are no-ops.
    pub async fn stop(&mut self) {
        if *self.state_tx.borrow() == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Closed);
        match self.client.disconnect().await {
            Ok(()) => {
                // the DISCONNECT packet only goes out if the event loop keeps
                // turning; drive it until the transport drops or a short
                // deadline passes
                let _ = tokio::time::timeout(Duration::from_millis(500), async {
                    while self.eventloop.poll().await.is_ok() {}
                })
                .await;
            }
            Err(e) => {
                debug!(error = %e, "disconnect request not delivered");
            }
        }
        info!("broker connection closed");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

/// Randomized client id, `mqtt-pinger-` plus 8 hex chars, so concurrent
/// instances never collide on the broker.
fn random_client_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("mqtt-pinger-{}", &suffix[..8])
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("gave up reconnecting after {0} attempts")]
    ReconnectCapExceeded(u32),
}
