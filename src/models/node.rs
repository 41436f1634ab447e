//! Worker node model.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Worker node status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Busy,
    Offline,
    Maintenance,
    Error,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Busy => "busy",
            NodeStatus::Offline => "offline",
            NodeStatus::Maintenance => "maintenance",
            NodeStatus::Error => "error",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "online" => NodeStatus::Online,
            "busy" => NodeStatus::Busy,
            "maintenance" => NodeStatus::Maintenance,
            "error" => NodeStatus::Error,
            _ => NodeStatus::Offline,
        }
    }
}

/// Worker node row. `current_builds` and `status` are only ever mutated
/// through the atomic claim/release/sweep operations on the node store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkerNode {
    pub node_id: Uuid,
    pub hostname: String,
    pub ip_address: String,
    pub status: String,
    pub max_concurrent_builds: i32,
    pub current_builds: i32,
    pub capabilities: Vec<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl WorkerNode {
    pub fn status(&self) -> NodeStatus {
        NodeStatus::from_string(&self.status)
    }

    pub fn has_capacity(&self) -> bool {
        self.current_builds < self.max_concurrent_builds
    }

    pub fn has_capabilities(&self, required: &[String]) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }
}

/// Input for registering a worker node.
#[derive(Debug, Clone)]
pub struct RegisterNode {
    pub hostname: String,
    pub ip_address: String,
    pub max_concurrent_builds: i32,
    pub capabilities: Vec<String>,
}

impl RegisterNode {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.hostname.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "hostname must not be empty"
            )));
        }
        if self.max_concurrent_builds < 1 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "max_concurrent_builds must be at least 1"
            )));
        }
        Ok(())
    }
}
