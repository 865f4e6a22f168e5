//! `briefing-watch` -- follows the backend's processing runs from a
//! terminal.
//!
//! Connects to the processing-status stream, logs every job state change
//! and notification, and optionally starts a run. Exits on Ctrl-C.
//!
//! Connection settings come from the `BRIEFING_*` variables documented on
//! [`SyncConfig::from_env`]; the start trigger from
//! [`briefing_watch::trigger`].

use briefing_realtime::{ProcessingSync, SyncConfig};
use briefing_watch::{render, trigger};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "briefing_watch=info,briefing_realtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });
    let start = trigger::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid start trigger");
        std::process::exit(1);
    });

    let sync = ProcessingSync::from_config(config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid backend address");
        std::process::exit(1);
    });
    tracing::info!(
        base_url = %sync.config().base_url,
        heartbeat_ms = sync.config().heartbeat_interval.as_millis() as u64,
        "Starting briefing-watch",
    );

    let mut states = sync.watch_state();
    let mut notifications = sync.notifications();
    let mut connection = sync.watch_connection();
    sync.connect();

    // Start goes over REST, so it does not wait for the stream.
    if let Some(options) = start {
        match sync.start(options).await {
            Ok(ack) => tracing::info!(message = %ack.message, "Start requested"),
            Err(e) => tracing::error!(error = %e, "Start failed"),
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = render::format_progress(&states.borrow_and_update());
                tracing::info!(job = %line, "Job state");
            }
            notification = notifications.recv() => match notification {
                Ok(n) => tracing::warn!("{}", render::format_notification(&n)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notification stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *connection.borrow_and_update();
                tracing::info!(%status, "Connection");
            }
        }
    }

    sync.shutdown().await;
}
