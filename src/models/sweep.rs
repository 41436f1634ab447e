//! Sweep run model and per-charge outcomes.

use crate::models::cycle::FailureReason;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Terminal status of a single charge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// Charge computed, debited and recorded.
    Billed,
    /// Less than one whole billable hour has elapsed. Not a failure.
    NothingDue,
    /// A terminal `failed` cycle was recorded; see the failure reason.
    Failed,
}

/// Result of driving one subject through the billing cycle engine.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeOutcome {
    pub status: ChargeStatus,
    pub failure_reason: Option<FailureReason>,
    pub cycle_id: Option<Uuid>,
    pub amount_charged: Decimal,
    pub hours_charged: i64,
}

impl ChargeOutcome {
    pub fn nothing_due() -> Self {
        Self {
            status: ChargeStatus::NothingDue,
            failure_reason: None,
            cycle_id: None,
            amount_charged: Decimal::ZERO,
            hours_charged: 0,
        }
    }
}

/// Aggregated result of one billing sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub success: bool,
    pub processed_count: i32,
    pub total_amount: Decimal,
    pub total_hours: i64,
    pub failed_subject_ids: Vec<Uuid>,
    pub errors: Vec<String>,
}

/// Durable audit record for one billing sweep.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SweepRun {
    pub run_id: Uuid,
    pub started_utc: DateTime<Utc>,
    pub completed_utc: Option<DateTime<Utc>>,
    pub subjects_processed: i32,
    pub subjects_failed: i32,
    pub total_amount: Decimal,
    pub total_hours: i64,
    pub error_message: Option<String>,
}
