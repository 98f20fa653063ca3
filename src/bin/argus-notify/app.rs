use std::path::PathBuf;
use std::sync::Arc;

use argus_notify::Result;
use argus_notify::config::Config;
use argus_notify::forwarder::RefocusForwarder;
use argus_notify::history::History;
use argus_notify::telemetry::init_tracing;
use chrono::Utc;
use tokio::signal;
use tracing::{info, warn};

use super::cli::Cli;

const DEFAULT_CONFIG: &str = "config.toml";

/// History sink for samples queued from the command line: lines go to the
/// log instead of an alert record.
struct LogHistory;

impl History for LogHistory {
    fn append_message_and_update(&self, message: &str, cause: Option<&str>, code: i32) {
        match cause {
            Some(cause) => warn!(code, cause, "{message}"),
            None => info!(code, "{message}"),
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.log_filter.as_deref(), cli.json_logs)?;
    argus_notify::describe_metrics();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut config = Config::from_env_and_file(&config_path)?;
    if let Some(interval) = cli.interval {
        config.refocus.poll_interval = interval;
    }
    if !config.refocus.enabled {
        warn!("refocus is disabled; queued samples will be discarded");
    }

    let forwarder = RefocusForwarder::new(&config)?;
    let history: Arc<dyn History> = Arc::new(LogHistory);
    let now = Utc::now().timestamp_millis();
    for (name, value) in &cli.enqueue {
        forwarder.send_refocus_notification(
            name,
            value,
            "argus-notify",
            "",
            Arc::clone(&history),
            now,
        );
    }

    if cli.once {
        let delivered = forwarder.flush().await;
        info!(delivered, "single forwarding pass finished");
    } else {
        info!(
            poll_interval = ?config.refocus.poll_interval,
            endpoint = %config.refocus.endpoint,
            "forwarder started"
        );
        forwarder
            .run_until(async {
                if let Err(err) = signal::ctrl_c().await {
                    warn!(error = %err, "failed to listen for shutdown signal");
                }
            })
            .await;
        forwarder.close();
        let delivered = forwarder.flush().await;
        info!(delivered, "remaining samples flushed");
    }

    let counters = forwarder.counters();
    info!(
        enqueued = counters.enqueued(),
        delivered = counters.delivered(),
        discarded = counters.discarded(),
        max_queue_length = counters.max_queue_length(),
        "forwarder stopped"
    );
    Ok(())
}
