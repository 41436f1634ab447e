//! Persistence seams for the billing and capacity cores.
//!
//! The engine and schedulers are written against these traits so the
//! partial-failure logic is testable without a live database; the Postgres
//! implementation lives in [`super::database`].

use crate::error::AppError;
use crate::models::{
    BillableSubject, BillingCycle, CreateSubject, CycleSettlement, RegisterNode, SweepResult,
    WorkerNode,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Transactional storage for billable subjects and billing cycles.
#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn create_subject(&self, input: &CreateSubject) -> Result<BillableSubject, AppError>;

    async fn get_subject(&self, subject_id: Uuid) -> Result<Option<BillableSubject>, AppError>;

    /// Subjects in a billable status whose last billed period ended at
    /// least one whole hour ago (or that have never been billed).
    async fn list_due_subjects(&self, now: DateTime<Utc>)
        -> Result<Vec<BillableSubject>, AppError>;

    /// Persist one cycle outcome atomically: insert the cycle row, advance
    /// the subject's `last_billed_at` to the period end, and suspend the
    /// subject when the settlement says so. All writes in one transaction.
    async fn settle_cycle(&self, settlement: &CycleSettlement) -> Result<BillingCycle, AppError>;

    async fn list_cycles(&self, subject_id: Uuid) -> Result<Vec<BillingCycle>, AppError>;

    /// Conditional `billed -> refunded` transition. Returns `None` when the
    /// cycle does not exist or is not in `billed`.
    async fn refund_cycle(&self, cycle_id: Uuid) -> Result<Option<BillingCycle>, AppError>;

    /// Ingest one raw usage event from the build/deploy pipeline.
    async fn record_usage(
        &self,
        subject_id: Uuid,
        network_gb: Decimal,
        build_minutes: Decimal,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn record_sweep_run(&self, started: DateTime<Utc>) -> Result<Uuid, AppError>;

    async fn complete_sweep_run(
        &self,
        run_id: Uuid,
        result: &SweepResult,
    ) -> Result<(), AppError>;
}

/// Storage for worker nodes. Slot mutations are single atomic conditional
/// updates, never read-then-write.
#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn register_node(&self, input: &RegisterNode) -> Result<WorkerNode, AppError>;

    async fn get_node(&self, node_id: Uuid) -> Result<Option<WorkerNode>, AppError>;

    async fn list_nodes(&self) -> Result<Vec<WorkerNode>, AppError>;

    /// Online nodes with spare capacity and the required capabilities,
    /// least-loaded first, then most recently alive first.
    async fn list_claimable_nodes(
        &self,
        required_capabilities: &[String],
    ) -> Result<Vec<WorkerNode>, AppError>;

    /// Claim one build slot. Returns `false` without mutation when the node
    /// is missing, not online/busy, or already at capacity. Callers treat
    /// `false` as "no slot available" and move to the next candidate.
    async fn try_claim_slot(&self, node_id: Uuid) -> Result<bool, AppError>;

    /// Release one build slot, flooring at zero so a double-release in the
    /// caller cannot corrupt the counter. Recovers `busy -> online` when
    /// capacity is freed. Returns `None` when the node does not exist.
    async fn release_slot(&self, node_id: Uuid) -> Result<Option<WorkerNode>, AppError>;

    /// Record a heartbeat, bringing an offline node back online with zero
    /// builds. Returns `None` when the node does not exist.
    async fn record_heartbeat(&self, node_id: Uuid) -> Result<Option<WorkerNode>, AppError>;

    /// Force every online/busy node whose heartbeat is missing or older
    /// than `cutoff` to `offline` with zero builds. Returns the nodes that
    /// changed state in this call.
    async fn mark_stale_offline(&self, cutoff: DateTime<Utc>)
        -> Result<Vec<WorkerNode>, AppError>;
}
