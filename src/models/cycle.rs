//! Billing cycle model.
//!
//! One billing cycle is one attempted charge for one subject over one
//! half-open period `[period_start, period_end)`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Billing cycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Pending,
    Billed,
    Failed,
    Refunded,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Pending => "pending",
            CycleStatus::Billed => "billed",
            CycleStatus::Failed => "failed",
            CycleStatus::Refunded => "refunded",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "billed" => CycleStatus::Billed,
            "failed" => CycleStatus::Failed,
            "refunded" => CycleStatus::Refunded,
            _ => CycleStatus::Pending,
        }
    }
}

/// Why a cycle settled as `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InsufficientBalance,
    WalletDeductionFailed,
    MeteringUnavailable,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InsufficientBalance => "insufficient_balance",
            FailureReason::WalletDeductionFailed => "wallet_deduction_failed",
            FailureReason::MeteringUnavailable => "metering_unavailable",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "insufficient_balance" => Some(FailureReason::InsufficientBalance),
            "wallet_deduction_failed" => Some(FailureReason::WalletDeductionFailed),
            "metering_unavailable" => Some(FailureReason::MeteringUnavailable),
            _ => None,
        }
    }
}

/// Billing cycle row. Once the status leaves `pending` the row is immutable
/// except for the explicit `billed -> refunded` transition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingCycle {
    pub cycle_id: Uuid,
    pub subject_id: Uuid,
    pub organization_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub cpu_hours: Decimal,
    pub memory_gb_hours: Decimal,
    pub storage_gb_hours: Decimal,
    pub network_gb: Decimal,
    pub build_minutes: Decimal,
    pub total_amount: Decimal,
    pub status: String,
    pub failure_reason: Option<String>,
    pub payment_transaction_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

/// Everything the engine decided about one cycle, persisted in a single
/// transaction: the cycle row, the `last_billed_at` advance, and (for
/// subscriptions out of funds) the suspension.
///
/// `expected_last_billed_at` is the value the window was computed from;
/// the store only advances the period when it still matches, so two
/// overlapping charges can never both settle the same window.
#[derive(Debug, Clone)]
pub struct CycleSettlement {
    pub subject_id: Uuid,
    pub organization_id: Uuid,
    pub expected_last_billed_at: Option<DateTime<Utc>>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub cpu_hours: Decimal,
    pub memory_gb_hours: Decimal,
    pub storage_gb_hours: Decimal,
    pub network_gb: Decimal,
    pub build_minutes: Decimal,
    pub total_amount: Decimal,
    pub status: CycleStatus,
    pub failure_reason: Option<FailureReason>,
    pub payment_transaction_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub suspend_subject: bool,
}
