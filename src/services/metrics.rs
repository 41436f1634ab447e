//! Prometheus metrics for billing and capacity operations.

use crate::models::{CycleStatus, FailureReason};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter, register_histogram_vec, register_int_counter,
    register_int_counter_vec, Counter, Encoder, HistogramVec, IntCounter, IntCounterVec,
    TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Settled billing cycles by status and failure reason
static CYCLES_SETTLED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Total amount charged across all billed cycles
static CHARGE_AMOUNT_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Billing sweeps by outcome
static SWEEPS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Build slot claims by result
static SLOT_CLAIMS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Nodes forced offline by the heartbeat sweep
static NODES_MARKED_OFFLINE_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    CYCLES_SETTLED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "billing_cycles_settled_total",
                "Settled billing cycles by status and failure reason"
            ),
            &["status", "reason"]
        )
        .expect("Failed to register CYCLES_SETTLED_TOTAL")
    });

    CHARGE_AMOUNT_TOTAL.get_or_init(|| {
        register_counter!(opts!(
            "billing_charge_amount_total",
            "Total amount charged across billed cycles"
        ))
        .expect("Failed to register CHARGE_AMOUNT_TOTAL")
    });

    SWEEPS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("billing_sweeps_total", "Billing sweeps by outcome"),
            &["outcome"]
        )
        .expect("Failed to register SWEEPS_TOTAL")
    });

    SLOT_CLAIMS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "node_slot_claims_total",
                "Build slot claim attempts by result"
            ),
            &["result"]
        )
        .expect("Failed to register SLOT_CLAIMS_TOTAL")
    });

    NODES_MARKED_OFFLINE_TOTAL.get_or_init(|| {
        register_int_counter!(opts!(
            "node_marked_offline_total",
            "Nodes forced offline by the heartbeat sweep"
        ))
        .expect("Failed to register NODES_MARKED_OFFLINE_TOTAL")
    });
}

pub fn record_cycle_settled(status: CycleStatus, reason: Option<FailureReason>) {
    if let Some(counter) = CYCLES_SETTLED_TOTAL.get() {
        counter
            .with_label_values(&[status.as_str(), reason.map(|r| r.as_str()).unwrap_or("none")])
            .inc();
    }
}

pub fn record_charge_amount(amount: Decimal) {
    if let Some(counter) = CHARGE_AMOUNT_TOTAL.get() {
        counter.inc_by(amount.to_f64().unwrap_or(0.0));
    }
}

pub fn record_sweep(success: bool) {
    if let Some(counter) = SWEEPS_TOTAL.get() {
        counter
            .with_label_values(&[if success { "success" } else { "partial_failure" }])
            .inc();
    }
}

pub fn record_slot_claim(claimed: bool) {
    if let Some(counter) = SLOT_CLAIMS_TOTAL.get() {
        counter
            .with_label_values(&[if claimed { "claimed" } else { "rejected" }])
            .inc();
    }
}

pub fn record_nodes_marked_offline(count: usize) {
    if let Some(counter) = NODES_MARKED_OFFLINE_TOTAL.get() {
        counter.inc_by(count as u64);
    }
}

/// Render all registered metrics in the Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
