//! Observability hooks for the evaluation path.
//!
//! Uses the `metrics` facade: deployments install whichever recorder they
//! run (or none), and the processor only emits. The timer histogram spans
//! each evaluation up to completion of the engine future; streaming time
//! is not included.

use std::time::Duration;

use metrics::{counter, histogram};

/// Default metric scope when the processor is not given one.
pub const DEFAULT_METRIC_SCOPE: &str = "banyan";

/// Name of the per-request evaluation timer for `scope`.
#[must_use]
pub fn eval_timer_name(scope: &str) -> String { format!("{scope}.op.eval") }

/// Name of the evaluation error counter for `scope`.
#[must_use]
pub fn eval_error_counter_name(scope: &str) -> String { format!("{scope}.op.eval.errors") }

/// Record one evaluation span on the named timer.
pub(crate) fn record_eval_span(timer: &str, elapsed: Duration) {
    histogram!(timer.to_owned()).record(elapsed.as_secs_f64());
}

/// Count one evaluation failure on the named counter.
pub(crate) fn increment_eval_errors(counter_name: &str) {
    counter!(counter_name.to_owned()).increment(1);
}
