//! Billable subject model.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// What kind of thing is being metered. Only subscriptions are suspended
/// when a charge fails for lack of funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Subscription,
    Service,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Subscription => "subscription",
            SubjectKind::Service => "service",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "service" => SubjectKind::Service,
            _ => SubjectKind::Subscription,
        }
    }
}

/// Subject status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    Active,
    Deploying,
    Suspended,
    Stopped,
}

impl SubjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectStatus::Active => "active",
            SubjectStatus::Deploying => "deploying",
            SubjectStatus::Suspended => "suspended",
            SubjectStatus::Stopped => "stopped",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "deploying" => SubjectStatus::Deploying,
            "suspended" => SubjectStatus::Suspended,
            "stopped" => SubjectStatus::Stopped,
            _ => SubjectStatus::Active,
        }
    }

    /// Whether a subject in this status accrues metered cost.
    pub fn is_billable(&self) -> bool {
        matches!(self, SubjectStatus::Active)
    }
}

/// Provisioned capacity of one subject. Quantities are capacities, not
/// utilization; time-based cost is capacity multiplied by elapsed hours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfile {
    pub cpu_cores: Decimal,
    pub memory_gb: Decimal,
    pub storage_gb: Decimal,
}

/// Billable subject row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillableSubject {
    pub subject_id: Uuid,
    pub organization_id: Uuid,
    pub kind: String,
    pub status: String,
    pub cpu_cores: Decimal,
    pub memory_gb: Decimal,
    pub storage_gb: Decimal,
    pub last_billed_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl BillableSubject {
    pub fn profile(&self) -> ResourceProfile {
        ResourceProfile {
            cpu_cores: self.cpu_cores,
            memory_gb: self.memory_gb,
            storage_gb: self.storage_gb,
        }
    }

    pub fn kind(&self) -> SubjectKind {
        SubjectKind::from_string(&self.kind)
    }

    pub fn status(&self) -> SubjectStatus {
        SubjectStatus::from_string(&self.status)
    }
}

/// Input for registering a billable subject.
#[derive(Debug, Clone)]
pub struct CreateSubject {
    pub organization_id: Uuid,
    pub kind: SubjectKind,
    pub profile: ResourceProfile,
}

impl CreateSubject {
    /// Reject malformed profiles before any I/O.
    pub fn validate(&self) -> Result<(), AppError> {
        let p = &self.profile;
        if p.cpu_cores <= Decimal::ZERO
            || p.memory_gb <= Decimal::ZERO
            || p.storage_gb < Decimal::ZERO
        {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "resource profile must have positive cpu and memory and non-negative storage"
            )));
        }
        Ok(())
    }
}
