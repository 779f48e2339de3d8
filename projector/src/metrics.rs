//! Prometheus metrics for the projection pipeline

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

lazy_static! {
    /// Event records seen by the listener, by outcome
    pub static ref PROJECTOR_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "projector_events_total",
        "Ledger event records received by the listener",
        &["event_type", "outcome"]
    )
    .unwrap();

    /// Queue jobs processed, by outcome
    pub static ref PROJECTOR_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "projector_jobs_total",
        "Queue jobs processed",
        &["queue", "outcome"]
    )
    .unwrap();

    /// Job processing duration
    pub static ref PROJECTOR_JOB_DURATION: HistogramVec = register_histogram_vec!(
        "projector_job_duration_seconds",
        "Queue job processing duration in seconds",
        &["queue"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap();

    /// Error jobs that exhausted their retries
    pub static ref PROJECTOR_DEAD_LETTERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "projector_dead_letters_total",
        "Error queue jobs left failed after exhausting retries",
        &["queue"]
    )
    .unwrap();

    /// Last checkpointed cursor per source
    pub static ref PROJECTOR_LISTENER_CURSOR: IntGaugeVec = register_int_gauge_vec!(
        "projector_listener_cursor",
        "Cursor of the last fully dispatched notification",
        &["source"]
    )
    .unwrap();

    /// Subscriptions opened by the listener
    pub static ref PROJECTOR_SUBSCRIPTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "projector_subscriptions_total",
        "Notification subscriptions opened by the listener",
        &["source"]
    )
    .unwrap();
}
