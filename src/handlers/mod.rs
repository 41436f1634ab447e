//! HTTP handlers.
//!
//! Thin wrappers over the billing and capacity cores; no business logic
//! lives here.

use crate::dtos::{
    ClaimResponse, CreateSubjectRequest, DispatchRequest, EstimateRequest, NodeSweepRequest,
    NodeSweepResponse, RecordUsageRequest, RegisterNodeRequest, DispatchResponse,
};
use crate::error::AppError;
use crate::models::{CreateSubject, RegisterNode, ResourceProfile};
use crate::services::pricing;
use crate::services::get_metrics;
use crate::startup::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

/// Health check endpoint for liveness probes.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "compute-billing-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "compute-billing-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check for orchestrator probes.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Metrics endpoint for Prometheus scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

// =============================================================================
// Billing
// =============================================================================

pub async fn create_subject(
    State(state): State<AppState>,
    Json(request): Json<CreateSubjectRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = CreateSubject {
        organization_id: request.organization_id,
        kind: request.kind,
        profile: ResourceProfile {
            cpu_cores: request.cpu_cores,
            memory_gb: request.memory_gb,
            storage_gb: request.storage_gb,
        },
    };
    let subject = state.billing.create_subject(&input).await?;
    Ok((StatusCode::CREATED, Json(subject)))
}

pub async fn get_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let subject = state
        .billing
        .get_subject(subject_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subject {} not found", subject_id)))?;
    Ok(Json(subject))
}

pub async fn list_cycles(
    State(state): State<AppState>,
    Path(subject_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let cycles = state.billing.list_cycles(subject_id).await?;
    Ok(Json(cycles))
}

/// Charge one subject for its elapsed billable period.
pub async fn charge_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.engine.charge_subject(subject_id).await?;
    Ok(Json(outcome))
}

/// Run one billing sweep over all due subjects.
pub async fn run_sweep(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let result = state.sweep.run().await?;
    Ok(Json(result))
}

pub async fn list_sweep_runs(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let runs = state.db.list_sweep_runs(50).await?;
    Ok(Json(runs))
}

pub async fn refund_cycle(
    State(state): State<AppState>,
    Path(cycle_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let cycle = state.billing.refund_cycle(cycle_id).await?.ok_or_else(|| {
        AppError::Conflict(anyhow::anyhow!(
            "Cycle {} does not exist or is not refundable",
            cycle_id
        ))
    })?;
    Ok(Json(cycle))
}

/// Pre-purchase cost preview for a resource profile.
pub async fn estimate_cost(
    State(state): State<AppState>,
    Json(request): Json<EstimateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let profile = ResourceProfile {
        cpu_cores: request.cpu_cores,
        memory_gb: request.memory_gb,
        storage_gb: request.storage_gb,
    };
    let estimate = pricing::estimate(&state.config.pricing, &profile)?;
    Ok(Json(estimate))
}

/// Ingest one usage event from the build/deploy pipeline.
pub async fn record_usage(
    State(state): State<AppState>,
    Json(request): Json<RecordUsageRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .billing
        .record_usage(
            request.subject_id,
            request.network_gb,
            request.build_minutes,
            request.recorded_at.unwrap_or_else(Utc::now),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Worker nodes
// =============================================================================

pub async fn register_node(
    State(state): State<AppState>,
    Json(request): Json<RegisterNodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let input = RegisterNode {
        hostname: request.hostname,
        ip_address: request.ip_address,
        max_concurrent_builds: request.max_concurrent_builds,
        capabilities: request.capabilities,
    };
    let node = state.nodes.register_node(&input).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

pub async fn list_nodes(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let nodes = state.nodes.list_nodes().await?;
    Ok(Json(nodes))
}

pub async fn node_heartbeat(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let node = state
        .nodes
        .record_heartbeat(node_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Node {} not found", node_id)))?;
    Ok(Json(node))
}

/// Select and atomically claim a build slot in one call.
pub async fn dispatch_build(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    let node = state.capacity.dispatch_build(&request.capabilities).await?;
    Ok(Json(DispatchResponse { node }))
}

pub async fn claim_slot(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let claimed = state.capacity.claim_slot(node_id).await?;
    Ok(Json(ClaimResponse { claimed }))
}

pub async fn release_slot(
    State(state): State<AppState>,
    Path(node_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.capacity.release_slot(node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Force nodes with stale heartbeats offline.
pub async fn sweep_stale_nodes(
    State(state): State<AppState>,
    Json(request): Json<NodeSweepRequest>,
) -> Result<impl IntoResponse, AppError> {
    let threshold = request
        .threshold_minutes
        .unwrap_or(state.config.nodes.heartbeat_threshold_minutes);
    if threshold < 1 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "threshold_minutes must be at least 1"
        )));
    }
    let marked_offline = state.capacity.sweep_stale_nodes(threshold).await?;
    Ok(Json(NodeSweepResponse { marked_offline }))
}
