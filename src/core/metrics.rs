// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Server-wide Gauges ---
    /// The number of clients currently connected to the server.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("cmmd_connected_clients", "Number of currently connected clients.").unwrap();
    /// A boolean gauge indicating if the controller slot is held.
    pub static ref SLOT_BUSY: Gauge =
        register_gauge!("cmmd_slot_busy", "Controller slot held (1 for true, 0 for false).").unwrap();
    /// A boolean gauge indicating if the listener is accepting connections.
    pub static ref LISTENING: Gauge =
        register_gauge!("cmmd_listening", "Listener accepting connections (1 for true, 0 for false).").unwrap();


    // --- Server-wide Counters ---
    /// The total number of command lines processed by the server since startup.
    pub static ref COMMANDS_PROCESSED_TOTAL: Counter =
        register_counter!("cmmd_commands_processed_total", "Total number of commands processed.").unwrap();
    /// The total number of connections accepted by the server since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("cmmd_connections_received_total", "Total number of connections received.").unwrap();
    /// Script iterations by reported status tag.
    pub static ref RUNS_TOTAL: CounterVec =
        register_counter_vec!("cmmd_runs_total", "Total number of script iterations, labeled by status.", &["status"]).unwrap();
    /// Runs whose requester stopped waiting while the controller was still busy.
    pub static ref ABANDONED_RUNS_TOTAL: Counter =
        register_counter!("cmmd_abandoned_runs_total", "Total number of runs abandoned on timeout or disconnect.").unwrap();


    // --- Histograms ---
    /// How long the controller was busy per operation.
    pub static ref RUN_DURATION_SECONDS: Histogram =
        register_histogram!("cmmd_run_duration_seconds", "Duration of controller operations in seconds.",
            vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 35.0, 60.0, 120.0]).unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
