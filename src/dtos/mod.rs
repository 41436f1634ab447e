//! Request/response payloads for the HTTP surface.

use crate::models::{SubjectKind, WorkerNode};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateSubjectRequest {
    pub organization_id: Uuid,
    pub kind: SubjectKind,
    pub cpu_cores: Decimal,
    pub memory_gb: Decimal,
    pub storage_gb: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    pub cpu_cores: Decimal,
    pub memory_gb: Decimal,
    pub storage_gb: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RecordUsageRequest {
    pub subject_id: Uuid,
    #[serde(default)]
    pub network_gb: Decimal,
    #[serde(default)]
    pub build_minutes: Decimal,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterNodeRequest {
    pub hostname: String,
    pub ip_address: String,
    pub max_concurrent_builds: i32,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct NodeSweepRequest {
    pub threshold_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub node: Option<WorkerNode>,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub claimed: bool,
}

#[derive(Debug, Serialize)]
pub struct NodeSweepResponse {
    pub marked_offline: usize,
}
