//! Database service for compute-billing-service.
//!
//! Wraps the PgPool and implements the billing and node store traits. All
//! node slot mutations are single conditional `UPDATE`s so concurrent
//! claims resolve at the row, never in application code.

use crate::error::AppError;
use crate::models::{
    BillableSubject, BillingCycle, CreateSubject, CycleSettlement, CycleStatus, RegisterNode,
    SweepResult, SweepRun, WorkerNode,
};
use crate::services::metering::{MeteringSource, UsagePeriod};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{BillingStore, NodeStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};
use uuid::Uuid;

const SUBJECT_COLUMNS: &str = "subject_id, organization_id, kind, status, cpu_cores, memory_gb, \
     storage_gb, last_billed_at, created_utc, updated_utc";

const CYCLE_COLUMNS: &str = "cycle_id, subject_id, organization_id, period_start, period_end, \
     cpu_hours, memory_gb_hours, storage_gb_hours, network_gb, build_minutes, total_amount, \
     status, failure_reason, payment_transaction_id, metadata, created_utc";

const NODE_COLUMNS: &str = "node_id, hostname, ip_address, status, max_concurrent_builds, \
     current_builds, capabilities, last_heartbeat, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "compute-billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .idle_timeout(std::time::Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self, input), fields(organization_id = %input.organization_id))]
    async fn create_subject(&self, input: &CreateSubject) -> Result<BillableSubject, AppError> {
        input.validate()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subject"])
            .start_timer();

        let subject = sqlx::query_as::<_, BillableSubject>(&format!(
            r#"
            INSERT INTO billable_subjects (subject_id, organization_id, kind, status, cpu_cores, memory_gb, storage_gb)
            VALUES ($1, $2, $3, 'active', $4, $5, $6)
            RETURNING {SUBJECT_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(input.organization_id)
        .bind(input.kind.as_str())
        .bind(input.profile.cpu_cores)
        .bind(input.profile.memory_gb)
        .bind(input.profile.storage_gb)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create subject: {}", e)))?;

        timer.observe_duration();
        info!(subject_id = %subject.subject_id, kind = %subject.kind, "Subject registered");

        Ok(subject)
    }

    #[instrument(skip(self), fields(subject_id = %subject_id))]
    async fn get_subject(&self, subject_id: Uuid) -> Result<Option<BillableSubject>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subject"])
            .start_timer();

        let subject = sqlx::query_as::<_, BillableSubject>(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM billable_subjects WHERE subject_id = $1",
        ))
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get subject: {}", e)))?;

        timer.observe_duration();

        Ok(subject)
    }

    #[instrument(skip(self))]
    async fn list_due_subjects(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillableSubject>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_due_subjects"])
            .start_timer();

        let cutoff = now - Duration::hours(1);
        let subjects = sqlx::query_as::<_, BillableSubject>(&format!(
            r#"
            SELECT {SUBJECT_COLUMNS}
            FROM billable_subjects
            WHERE status = 'active'
              AND (last_billed_at IS NULL OR last_billed_at <= $1)
            ORDER BY created_utc
            "#,
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list due subjects: {}", e))
        })?;

        timer.observe_duration();

        Ok(subjects)
    }

    #[instrument(skip(self, settlement), fields(subject_id = %settlement.subject_id, status = settlement.status.as_str()))]
    async fn settle_cycle(&self, settlement: &CycleSettlement) -> Result<BillingCycle, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["settle_cycle"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let cycle = sqlx::query_as::<_, BillingCycle>(&format!(
            r#"
            INSERT INTO billing_cycles (cycle_id, subject_id, organization_id, period_start, period_end,
                cpu_hours, memory_gb_hours, storage_gb_hours, network_gb, build_minutes, total_amount,
                status, failure_reason, payment_transaction_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {CYCLE_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(settlement.subject_id)
        .bind(settlement.organization_id)
        .bind(settlement.period_start)
        .bind(settlement.period_end)
        .bind(settlement.cpu_hours)
        .bind(settlement.memory_gb_hours)
        .bind(settlement.storage_gb_hours)
        .bind(settlement.network_gb)
        .bind(settlement.build_minutes)
        .bind(settlement.total_amount)
        .bind(settlement.status.as_str())
        .bind(settlement.failure_reason.map(|r| r.as_str()))
        .bind(settlement.payment_transaction_id)
        .bind(&settlement.metadata)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert cycle: {}", e)))?;

        // Conditional advance: only the invocation whose window still
        // starts at the expected `last_billed_at` may settle it. The
        // transaction rolls back for everyone else.
        let updated = sqlx::query(
            r#"
            UPDATE billable_subjects
            SET last_billed_at = $2,
                status = CASE WHEN $3 THEN 'suspended' ELSE status END,
                updated_utc = NOW()
            WHERE subject_id = $1
              AND last_billed_at IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(settlement.subject_id)
        .bind(settlement.period_end)
        .bind(settlement.suspend_subject)
        .bind(settlement.expected_last_billed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to advance billing period: {}", e))
        })?;

        if updated.rows_affected() != 1 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Billing period for subject {} was advanced concurrently",
                settlement.subject_id
            )));
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit settlement: {}", e))
        })?;

        timer.observe_duration();

        Ok(cycle)
    }

    #[instrument(skip(self), fields(subject_id = %subject_id))]
    async fn list_cycles(&self, subject_id: Uuid) -> Result<Vec<BillingCycle>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_cycles"])
            .start_timer();

        let cycles = sqlx::query_as::<_, BillingCycle>(&format!(
            r#"
            SELECT {CYCLE_COLUMNS}
            FROM billing_cycles
            WHERE subject_id = $1
            ORDER BY period_start
            "#,
        ))
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list cycles: {}", e)))?;

        timer.observe_duration();

        Ok(cycles)
    }

    #[instrument(skip(self), fields(cycle_id = %cycle_id))]
    async fn refund_cycle(&self, cycle_id: Uuid) -> Result<Option<BillingCycle>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["refund_cycle"])
            .start_timer();

        let cycle = sqlx::query_as::<_, BillingCycle>(&format!(
            r#"
            UPDATE billing_cycles
            SET status = '{}'
            WHERE cycle_id = $1 AND status = '{}'
            RETURNING {CYCLE_COLUMNS}
            "#,
            CycleStatus::Refunded.as_str(),
            CycleStatus::Billed.as_str(),
        ))
        .bind(cycle_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to refund cycle: {}", e)))?;

        timer.observe_duration();

        if let Some(ref c) = cycle {
            info!(cycle_id = %c.cycle_id, amount = %c.total_amount, "Cycle refunded");
        }

        Ok(cycle)
    }

    #[instrument(skip(self), fields(subject_id = %subject_id))]
    async fn record_usage(
        &self,
        subject_id: Uuid,
        network_gb: Decimal,
        build_minutes: Decimal,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_usage"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO usage_events (event_id, subject_id, recorded_at, network_gb, build_minutes)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(subject_id)
        .bind(recorded_at)
        .bind(network_gb)
        .bind(build_minutes)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record usage: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self))]
    async fn record_sweep_run(&self, started: DateTime<Utc>) -> Result<Uuid, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_sweep_run"])
            .start_timer();

        let run_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO sweep_runs (run_id, started_utc)
            VALUES ($1, $2)
            "#,
        )
        .bind(run_id)
        .bind(started)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record sweep run: {}", e))
        })?;

        timer.observe_duration();

        Ok(run_id)
    }

    #[instrument(skip(self, result), fields(run_id = %run_id))]
    async fn complete_sweep_run(
        &self,
        run_id: Uuid,
        result: &SweepResult,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_sweep_run"])
            .start_timer();

        let error_message = if result.errors.is_empty() {
            None
        } else {
            Some(result.errors.join("; "))
        };

        sqlx::query(
            r#"
            UPDATE sweep_runs
            SET completed_utc = NOW(),
                subjects_processed = $2,
                subjects_failed = $3,
                total_amount = $4,
                total_hours = $5,
                error_message = $6
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .bind(result.processed_count)
        .bind(result.failed_subject_ids.len() as i32)
        .bind(result.total_amount)
        .bind(result.total_hours)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to complete sweep run: {}", e))
        })?;

        timer.observe_duration();

        Ok(())
    }
}

impl Database {
    /// List persisted sweep runs, newest first.
    #[instrument(skip(self))]
    pub async fn list_sweep_runs(&self, limit: i64) -> Result<Vec<SweepRun>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_sweep_runs"])
            .start_timer();

        let runs = sqlx::query_as::<_, SweepRun>(
            r#"
            SELECT run_id, started_utc, completed_utc, subjects_processed, subjects_failed,
                   total_amount, total_hours, error_message
            FROM sweep_runs
            ORDER BY started_utc DESC
            LIMIT $1
            "#,
        )
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list sweep runs: {}", e))
        })?;

        timer.observe_duration();

        Ok(runs)
    }
}

#[async_trait]
impl MeteringSource for Database {
    #[instrument(skip(self), fields(subject_id = %subject_id))]
    async fn query_usage(
        &self,
        subject_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<UsagePeriod, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["query_usage"])
            .start_timer();

        let (network_gb, build_minutes) = sqlx::query_as::<_, (Decimal, Decimal)>(
            r#"
            SELECT COALESCE(SUM(network_gb), 0), COALESCE(SUM(build_minutes), 0)
            FROM usage_events
            WHERE subject_id = $1 AND recorded_at >= $2 AND recorded_at < $3
            "#,
        )
        .bind(subject_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to query usage: {}", e)))?;

        timer.observe_duration();

        Ok(UsagePeriod {
            network_gb,
            build_minutes,
        })
    }
}

#[async_trait]
impl NodeStore for Database {
    #[instrument(skip(self, input), fields(hostname = %input.hostname))]
    async fn register_node(&self, input: &RegisterNode) -> Result<WorkerNode, AppError> {
        input.validate()?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["register_node"])
            .start_timer();

        let node = sqlx::query_as::<_, WorkerNode>(&format!(
            r#"
            INSERT INTO worker_nodes (node_id, hostname, ip_address, status, max_concurrent_builds, capabilities, last_heartbeat)
            VALUES ($1, $2, $3, 'online', $4, $5, NOW())
            RETURNING {NODE_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(&input.hostname)
        .bind(&input.ip_address)
        .bind(input.max_concurrent_builds)
        .bind(&input.capabilities)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to register node: {}", e)))?;

        timer.observe_duration();
        info!(node_id = %node.node_id, hostname = %node.hostname, "Worker node registered");

        Ok(node)
    }

    #[instrument(skip(self), fields(node_id = %node_id))]
    async fn get_node(&self, node_id: Uuid) -> Result<Option<WorkerNode>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_node"])
            .start_timer();

        let node = sqlx::query_as::<_, WorkerNode>(&format!(
            "SELECT {NODE_COLUMNS} FROM worker_nodes WHERE node_id = $1",
        ))
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get node: {}", e)))?;

        timer.observe_duration();

        Ok(node)
    }

    #[instrument(skip(self))]
    async fn list_nodes(&self) -> Result<Vec<WorkerNode>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_nodes"])
            .start_timer();

        let nodes = sqlx::query_as::<_, WorkerNode>(&format!(
            "SELECT {NODE_COLUMNS} FROM worker_nodes ORDER BY hostname",
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list nodes: {}", e)))?;

        timer.observe_duration();

        Ok(nodes)
    }

    #[instrument(skip(self, required_capabilities))]
    async fn list_claimable_nodes(
        &self,
        required_capabilities: &[String],
    ) -> Result<Vec<WorkerNode>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_claimable_nodes"])
            .start_timer();

        let nodes = sqlx::query_as::<_, WorkerNode>(&format!(
            r#"
            SELECT {NODE_COLUMNS}
            FROM worker_nodes
            WHERE status = 'online'
              AND current_builds < max_concurrent_builds
              AND capabilities @> $1
            ORDER BY current_builds ASC, last_heartbeat DESC NULLS LAST
            "#,
        ))
        .bind(required_capabilities)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list claimable nodes: {}", e))
        })?;

        timer.observe_duration();

        Ok(nodes)
    }

    #[instrument(skip(self), fields(node_id = %node_id))]
    async fn try_claim_slot(&self, node_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["try_claim_slot"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE worker_nodes
            SET current_builds = current_builds + 1,
                status = CASE WHEN current_builds + 1 >= max_concurrent_builds THEN 'busy' ELSE 'online' END,
                updated_utc = NOW()
            WHERE node_id = $1
              AND status IN ('online', 'busy')
              AND current_builds < max_concurrent_builds
            "#,
        )
        .bind(node_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to claim slot: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(node_id = %node_id))]
    async fn release_slot(&self, node_id: Uuid) -> Result<Option<WorkerNode>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["release_slot"])
            .start_timer();

        let node = sqlx::query_as::<_, WorkerNode>(&format!(
            r#"
            UPDATE worker_nodes
            SET current_builds = GREATEST(current_builds - 1, 0),
                status = CASE
                    WHEN status = 'busy' AND GREATEST(current_builds - 1, 0) < max_concurrent_builds
                        THEN 'online'
                    ELSE status
                END,
                updated_utc = NOW()
            WHERE node_id = $1
            RETURNING {NODE_COLUMNS}
            "#,
        ))
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to release slot: {}", e)))?;

        timer.observe_duration();

        Ok(node)
    }

    #[instrument(skip(self), fields(node_id = %node_id))]
    async fn record_heartbeat(&self, node_id: Uuid) -> Result<Option<WorkerNode>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_heartbeat"])
            .start_timer();

        let node = sqlx::query_as::<_, WorkerNode>(&format!(
            r#"
            UPDATE worker_nodes
            SET last_heartbeat = NOW(),
                current_builds = CASE WHEN status = 'offline' THEN 0 ELSE current_builds END,
                status = CASE WHEN status = 'offline' THEN 'online' ELSE status END,
                updated_utc = NOW()
            WHERE node_id = $1
            RETURNING {NODE_COLUMNS}
            "#,
        ))
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record heartbeat: {}", e))
        })?;

        timer.observe_duration();

        Ok(node)
    }

    #[instrument(skip(self))]
    async fn mark_stale_offline(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkerNode>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_stale_offline"])
            .start_timer();

        let nodes = sqlx::query_as::<_, WorkerNode>(&format!(
            r#"
            UPDATE worker_nodes
            SET status = 'offline',
                current_builds = 0,
                updated_utc = NOW()
            WHERE status IN ('online', 'busy')
              AND (last_heartbeat IS NULL OR last_heartbeat < $1)
            RETURNING {NODE_COLUMNS}
            "#,
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to sweep stale nodes: {}", e))
        })?;

        timer.observe_duration();

        Ok(nodes)
    }
}
