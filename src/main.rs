// mqtt-pinger: Bridges MQTT sensor readings to backend wake calls.
//
// Runtime wiring: resolves config, builds the rate limiter, wake client and
// router, then drives the broker connection until a termination signal or a
// fatal reconnect failure.

use std::sync::Arc;
use std::time::Duration;

use mqtt_pinger::broker::BrokerClient;
use mqtt_pinger::config;
use mqtt_pinger::notifier::WakeClient;
use mqtt_pinger::rate_limit::RateLimiter;
use mqtt_pinger::router::MessageRouter;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber for structured logging to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // A .env file is optional; real deployments set the environment directly.
    dotenvy::dotenv().ok();

    info!(version = env!("CARGO_PKG_VERSION"), "mqtt-pinger starting");

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        broker = %cfg.broker,
        topic = %cfg.topic,
        target = %cfg.ping_url(),
        debounce_ms = cfg.debounce.as_millis() as u64,
        "configuration resolved"
    );

    let limiter = Arc::new(RateLimiter::new(cfg.debounce));
    let notifier = match WakeClient::new(&cfg, Arc::clone(&limiter)) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("FATAL: failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    let router = MessageRouter::new(limiter, notifier);

    let (mut broker, mut state_rx) = BrokerClient::new(&cfg);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Connection-state observer: traces every state-machine transition.
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            debug!(state = ?*state_rx.borrow(), "connection state");
        }
    });

    let mut run_task = tokio::spawn(async move { broker.run(&router, shutdown_rx).await });

    // Wait for Ctrl-C, SIGTERM, or a fatal broker error. The select fires at
    // most one branch, so shutdown runs at most once even if signals race.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                tokio::signal::ctrl_c().await.ok();
                info!("shutdown: SIGINT received");
                shutdown_tx.send(true).ok();
                let _ = tokio::time::timeout(Duration::from_secs(2), run_task).await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown: SIGINT received");
            }
            _ = sigterm.recv() => {
                info!("shutdown: SIGTERM received");
            }
            result = &mut run_task => {
                exit_after_run(result);
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown: Ctrl-C received");
            }
            result = &mut run_task => {
                exit_after_run(result);
            }
        }
    }

    // Signal the broker loop to stop and let the close acknowledgment flush.
    shutdown_tx.send(true).ok();
    let _ = tokio::time::timeout(Duration::from_secs(2), run_task).await;

    info!("mqtt-pinger shutdown complete");
}

/// The broker loop only returns on its own for fatal conditions; map them to
/// exit codes. Never comes back.
fn exit_after_run(
    result: Result<Result<(), mqtt_pinger::broker::BrokerError>, tokio::task::JoinError>,
) -> ! {
    match result {
        Ok(Ok(())) => {
            info!("broker loop ended");
            std::process::exit(0);
        }
        Ok(Err(e)) => {
            error!(error = %e, "fatal broker failure");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "broker task panicked");
            std::process::exit(1);
        }
    }
}
