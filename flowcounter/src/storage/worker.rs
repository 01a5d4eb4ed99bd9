//! Background flush task for the event store.
//!
//! Runs on the Tokio runtime and hands every flush to the blocking pool,
//! since backend inserts and retry backoff block the calling thread.
//!
//! ```text
//! loop {
//!     select (biased) {
//!         shutdown cancelled  => exit
//!         flush interval tick => forced flush
//!         batch filled        => flush full batches
//!     }
//!     every metrics interval  => log metrics
//! }
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::metrics::StoreMetrics;
use super::store::StoreShared;

/// Run until `shutdown` is cancelled.
pub(crate) async fn run_flush_loop(shared: Arc<StoreShared>, shutdown: CancellationToken) {
    let flush_interval = shared.config().flush_interval;
    let metrics_interval = shared.config().metrics_log_interval;

    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    let mut last_metrics_log = Instant::now();
    debug!(
        flush_interval_ms = flush_interval.as_millis() as u64,
        "Flush worker started"
    );

    loop {
        let force = tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => true,
            _ = shared.flush_requested() => false,
        };

        let job = Arc::clone(&shared);
        let result = tokio::task::spawn_blocking(move || {
            if force {
                job.flush(true);
            } else {
                job.flush_ready();
            }
        })
        .await;
        if let Err(e) = result {
            error!(error = %e, "Flush task panicked");
        }

        if last_metrics_log.elapsed() >= metrics_interval {
            log_metrics(&shared.metrics());
            last_metrics_log = Instant::now();
        }
    }

    debug!("Flush worker stopped");
}

fn log_metrics(metrics: &StoreMetrics) {
    info!(
        buffer_size = metrics.buffer_size,
        buffer_utilization = format!("{:.1}%", metrics.buffer_utilization() * 100.0),
        enqueued = metrics.enqueued_events,
        flushed = metrics.flushed_events,
        dropped = metrics.dropped_events,
        flush_failures = metrics.flush_failure_count,
        retries = metrics.retry_attempts,
        "Event store metrics"
    );
}
