//! Prometheus metrics for message bus

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, Histogram, IntCounterVec,
};

lazy_static! {
    /// Total notifications published to JetStream
    pub static ref NOTIFICATION_PUBLISH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "message_bus_publish_total",
        "Total notifications published",
        &["status"]
    )
    .unwrap();

    /// Notification publish duration, retries included
    pub static ref NOTIFICATION_PUBLISH_DURATION: Histogram = register_histogram!(
        "message_bus_publish_duration_seconds",
        "Notification publish duration in seconds"
    )
    .unwrap();

    /// Total notifications delivered to subscribers
    pub static ref NOTIFICATION_RECEIVE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "message_bus_receive_total",
        "Total notifications received",
        &["source", "phase"]
    )
    .unwrap();
}
