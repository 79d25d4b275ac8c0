//! Request, stage and batch metrics. Values go through the `metrics` facade
//! into whichever recorder is installed (the Prometheus recorder rendered at
//! `/metrics` in the service) and are mirrored as `arbitrage.metrics` trace
//! events.

use metrics::{counter, histogram};
use tracing::trace;

pub fn inc_requests(route: &'static str) {
    counter!("arbitrage_requests_total", "route" => route).increment(1);
    trace!(target = "arbitrage.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    histogram!("arbitrage_stage_duration_ms", "stage" => stage).record(elapsed_ms as f64);
    trace!(
        target = "arbitrage.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn batch_finished(total: usize, failed: usize, elapsed_ms: u64) {
    counter!("arbitrage_batch_tasks_total").increment(total as u64);
    counter!("arbitrage_batch_tasks_failed_total").increment(failed as u64);
    histogram!("arbitrage_batch_duration_ms").record(elapsed_ms as f64);
    trace!(
        target = "arbitrage.metrics",
        total = total as u64,
        failed = failed as u64,
        elapsed_ms = elapsed_ms,
        "batch_finished"
    );
}
