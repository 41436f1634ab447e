//! Metering source contract.
//!
//! Read-only aggregation over build/deploy usage events. The Postgres
//! implementation lives on [`super::database::Database`].

use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Metered usage for one subject over one half-open period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsagePeriod {
    pub network_gb: Decimal,
    pub build_minutes: Decimal,
}

/// Aggregates metered usage for a billing period. Returns zeroed usage
/// when no events exist for the window.
#[async_trait]
pub trait MeteringSource: Send + Sync {
    async fn query_usage(
        &self,
        subject_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<UsagePeriod, AppError>;
}
