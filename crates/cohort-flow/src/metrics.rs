//! Observability metrics for orchestration.
//!
//! Metrics go through the `metrics` crate facade. No exporter is installed here;
//! the embedding process decides where they end up.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `cohort_flow_task_transitions_total` | Counter | `from_state`, `to_state` | Task status transitions |
//! | `cohort_flow_function_transitions_total` | Counter | `from_state`, `to_state` | Function status transitions |
//! | `cohort_flow_tasks_registered_total` | Counter | `status` | Tasks registered, by initial status |
//! | `cohort_flow_cascade_skipped_total` | Counter | `action` | Cascade attempts swallowed as illegal |
//! | `cohort_flow_request_duration_seconds` | Histogram | `operation`, `result` | Request processing time |
//!
//! ## Usage
//!
//! ```rust
//! use cohort_flow::metrics::FlowMetrics;
//!
//! let metrics = FlowMetrics::new();
//! metrics.record_task_transition("TODO", "DOING");
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Task status transitions.
    pub const TASK_TRANSITIONS_TOTAL: &str = "cohort_flow_task_transitions_total";
    /// Counter: Function status transitions.
    pub const FUNCTION_TRANSITIONS_TOTAL: &str = "cohort_flow_function_transitions_total";
    /// Counter: Registered tasks.
    pub const TASKS_REGISTERED_TOTAL: &str = "cohort_flow_tasks_registered_total";
    /// Counter: Cascade attempts swallowed as illegal transitions.
    pub const CASCADE_SKIPPED_TOTAL: &str = "cohort_flow_cascade_skipped_total";
    /// Histogram: Request processing time in seconds.
    pub const REQUEST_DURATION_SECONDS: &str = "cohort_flow_request_duration_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Previous status (for transitions).
    pub const FROM_STATE: &str = "from_state";
    /// Target status (for transitions).
    pub const TO_STATE: &str = "to_state";
    /// Status label.
    pub const STATUS: &str = "status";
    /// Action label.
    pub const ACTION: &str = "action";
    /// Operation name.
    pub const OPERATION: &str = "operation";
    /// Request outcome (`ok` or an error kind).
    pub const RESULT: &str = "result";
}

/// High-level interface for recording orchestration metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowMetrics;

impl FlowMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a task status transition.
    pub fn record_task_transition(&self, from_state: &str, to_state: &str) {
        counter!(
            names::TASK_TRANSITIONS_TOTAL,
            labels::FROM_STATE => from_state.to_string(),
            labels::TO_STATE => to_state.to_string(),
        )
        .increment(1);
    }

    /// Records a function status transition.
    pub fn record_function_transition(&self, from_state: &str, to_state: &str) {
        counter!(
            names::FUNCTION_TRANSITIONS_TOTAL,
            labels::FROM_STATE => from_state.to_string(),
            labels::TO_STATE => to_state.to_string(),
        )
        .increment(1);
    }

    /// Records a registered task by its initial status.
    pub fn record_task_registered(&self, status: &str) {
        counter!(names::TASKS_REGISTERED_TOTAL, labels::STATUS => status.to_string()).increment(1);
    }

    /// Records a cascade attempt that was swallowed.
    pub fn record_cascade_skipped(&self, action: &str) {
        counter!(names::CASCADE_SKIPPED_TOTAL, labels::ACTION => action.to_string()).increment(1);
    }

    /// Records how long a request took.
    pub fn observe_request_duration(&self, operation: &str, result: &str, duration: Duration) {
        histogram!(
            names::REQUEST_DURATION_SECONDS,
            labels::OPERATION => operation.to_string(),
            labels::RESULT => result.to_string(),
        )
        .record(duration.as_secs_f64());
    }
}

/// RAII guard that measures elapsed time and records it on drop.
///
/// ## Example
///
/// ```rust
/// use cohort_flow::metrics::TimingGuard;
///
/// {
///     let _guard = TimingGuard::new(|duration| {
///         assert!(duration.as_secs() < 60);
///     });
///     // Do work...
/// } // Duration recorded automatically on drop
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
