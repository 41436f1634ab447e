//! Test helper module: in-memory implementations of the persistence and
//! collaborator seams so the billing and capacity cores can be exercised
//! without a live database or external services.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use compute_billing_service::error::AppError;
use compute_billing_service::models::{
    BillableSubject, BillingCycle, CreateSubject, CycleSettlement, NodeStatus, RegisterNode,
    ResourceProfile, SubjectKind, SubjectStatus, SweepResult, SweepRun, WorkerNode,
};
use compute_billing_service::services::events::{ActivityEvent, ActivitySink};
use compute_billing_service::services::metering::{MeteringSource, UsagePeriod};
use compute_billing_service::services::pricing::PricingRates;
use compute_billing_service::services::store::{BillingStore, NodeStore};
use compute_billing_service::services::wallet::WalletLedger;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Rates where a 1 vCPU / 2 GB / 0 GB profile costs exactly $0.50 per hour.
pub fn test_rates() -> PricingRates {
    PricingRates {
        cpu_core_hour: Decimal::new(40, 2),    // 0.40
        memory_gb_hour: Decimal::new(5, 2),    // 0.05
        storage_gb_hour: Decimal::ZERO,
        network_gb: Decimal::new(1, 2),        // 0.01
        build_minute: Decimal::new(8, 3),      // 0.008
    }
}

pub fn test_profile() -> ResourceProfile {
    ResourceProfile {
        cpu_cores: Decimal::ONE,
        memory_gb: Decimal::TWO,
        storage_gb: Decimal::ZERO,
    }
}

#[derive(Default)]
struct StoreInner {
    subjects: HashMap<Uuid, BillableSubject>,
    cycles: Vec<BillingCycle>,
    nodes: HashMap<Uuid, WorkerNode>,
    sweep_runs: HashMap<Uuid, SweepRun>,
    usage_events: Vec<(Uuid, DateTime<Utc>, Decimal, Decimal)>,
}

/// In-memory store. Every operation takes the single mutex, which gives it
/// the same atomicity the Postgres implementation gets from conditional
/// updates and transactions.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
    fail_next_settle: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `settle_cycle` call fail, to exercise the
    /// commit-after-debit path.
    pub fn fail_next_settle(&self) {
        self.fail_next_settle.store(true, Ordering::SeqCst);
    }

    /// Seed a subject with explicit timestamps.
    pub fn seed_subject(
        &self,
        organization_id: Uuid,
        kind: SubjectKind,
        profile: ResourceProfile,
        created_utc: DateTime<Utc>,
        last_billed_at: Option<DateTime<Utc>>,
    ) -> BillableSubject {
        let subject = BillableSubject {
            subject_id: Uuid::new_v4(),
            organization_id,
            kind: kind.as_str().to_string(),
            status: SubjectStatus::Active.as_str().to_string(),
            cpu_cores: profile.cpu_cores,
            memory_gb: profile.memory_gb,
            storage_gb: profile.storage_gb,
            last_billed_at,
            created_utc,
            updated_utc: created_utc,
        };
        self.inner
            .lock()
            .unwrap()
            .subjects
            .insert(subject.subject_id, subject.clone());
        subject
    }

    /// Seed a node with explicit status and counters.
    pub fn seed_node(
        &self,
        hostname: &str,
        status: NodeStatus,
        current_builds: i32,
        max_concurrent_builds: i32,
        capabilities: &[&str],
        last_heartbeat: Option<DateTime<Utc>>,
    ) -> WorkerNode {
        let now = Utc::now();
        let node = WorkerNode {
            node_id: Uuid::new_v4(),
            hostname: hostname.to_string(),
            ip_address: "10.0.0.1".to_string(),
            status: status.as_str().to_string(),
            max_concurrent_builds,
            current_builds,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            last_heartbeat,
            created_utc: now,
            updated_utc: now,
        };
        self.inner
            .lock()
            .unwrap()
            .nodes
            .insert(node.node_id, node.clone());
        node
    }

    pub fn subject(&self, subject_id: Uuid) -> BillableSubject {
        self.inner.lock().unwrap().subjects[&subject_id].clone()
    }

    pub fn node(&self, node_id: Uuid) -> WorkerNode {
        self.inner.lock().unwrap().nodes[&node_id].clone()
    }

    pub fn cycles(&self) -> Vec<BillingCycle> {
        self.inner.lock().unwrap().cycles.clone()
    }

    pub fn sweep_runs(&self) -> Vec<SweepRun> {
        self.inner.lock().unwrap().sweep_runs.values().cloned().collect()
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn create_subject(&self, input: &CreateSubject) -> Result<BillableSubject, AppError> {
        input.validate()?;
        Ok(self.seed_subject(
            input.organization_id,
            input.kind,
            input.profile,
            Utc::now(),
            None,
        ))
    }

    async fn get_subject(&self, subject_id: Uuid) -> Result<Option<BillableSubject>, AppError> {
        Ok(self.inner.lock().unwrap().subjects.get(&subject_id).cloned())
    }

    async fn list_due_subjects(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillableSubject>, AppError> {
        let cutoff = now - Duration::hours(1);
        let inner = self.inner.lock().unwrap();
        let mut due: Vec<BillableSubject> = inner
            .subjects
            .values()
            .filter(|s| {
                s.status() == SubjectStatus::Active
                    && s.last_billed_at.map_or(true, |t| t <= cutoff)
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.created_utc);
        Ok(due)
    }

    async fn settle_cycle(&self, settlement: &CycleSettlement) -> Result<BillingCycle, AppError> {
        if self.fail_next_settle.swap(false, Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "injected settle failure"
            )));
        }

        let mut inner = self.inner.lock().unwrap();
        let subject = inner
            .subjects
            .get_mut(&settlement.subject_id)
            .ok_or_else(|| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Subject {} disappeared during settlement",
                    settlement.subject_id
                ))
            })?;

        // Same conditional advance as the SQL implementation: a stale
        // settlement loses and nothing is written.
        if subject.last_billed_at != settlement.expected_last_billed_at {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Billing period for subject {} was advanced concurrently",
                settlement.subject_id
            )));
        }

        subject.last_billed_at = Some(settlement.period_end);
        if settlement.suspend_subject {
            subject.status = SubjectStatus::Suspended.as_str().to_string();
        }

        let cycle = BillingCycle {
            cycle_id: Uuid::new_v4(),
            subject_id: settlement.subject_id,
            organization_id: settlement.organization_id,
            period_start: settlement.period_start,
            period_end: settlement.period_end,
            cpu_hours: settlement.cpu_hours,
            memory_gb_hours: settlement.memory_gb_hours,
            storage_gb_hours: settlement.storage_gb_hours,
            network_gb: settlement.network_gb,
            build_minutes: settlement.build_minutes,
            total_amount: settlement.total_amount,
            status: settlement.status.as_str().to_string(),
            failure_reason: settlement.failure_reason.map(|r| r.as_str().to_string()),
            payment_transaction_id: settlement.payment_transaction_id,
            metadata: settlement.metadata.clone(),
            created_utc: Utc::now(),
        };
        inner.cycles.push(cycle.clone());
        Ok(cycle)
    }

    async fn list_cycles(&self, subject_id: Uuid) -> Result<Vec<BillingCycle>, AppError> {
        let inner = self.inner.lock().unwrap();
        let mut cycles: Vec<BillingCycle> = inner
            .cycles
            .iter()
            .filter(|c| c.subject_id == subject_id)
            .cloned()
            .collect();
        cycles.sort_by_key(|c| c.period_start);
        Ok(cycles)
    }

    async fn refund_cycle(&self, cycle_id: Uuid) -> Result<Option<BillingCycle>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        for cycle in inner.cycles.iter_mut() {
            if cycle.cycle_id == cycle_id && cycle.status == "billed" {
                cycle.status = "refunded".to_string();
                return Ok(Some(cycle.clone()));
            }
        }
        Ok(None)
    }

    async fn record_usage(
        &self,
        subject_id: Uuid,
        network_gb: Decimal,
        build_minutes: Decimal,
        recorded_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inner
            .lock()
            .unwrap()
            .usage_events
            .push((subject_id, recorded_at, network_gb, build_minutes));
        Ok(())
    }

    async fn record_sweep_run(&self, started: DateTime<Utc>) -> Result<Uuid, AppError> {
        let run_id = Uuid::new_v4();
        self.inner.lock().unwrap().sweep_runs.insert(
            run_id,
            SweepRun {
                run_id,
                started_utc: started,
                completed_utc: None,
                subjects_processed: 0,
                subjects_failed: 0,
                total_amount: Decimal::ZERO,
                total_hours: 0,
                error_message: None,
            },
        );
        Ok(run_id)
    }

    async fn complete_sweep_run(
        &self,
        run_id: Uuid,
        result: &SweepResult,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(run) = inner.sweep_runs.get_mut(&run_id) {
            run.completed_utc = Some(Utc::now());
            run.subjects_processed = result.processed_count;
            run.subjects_failed = result.failed_subject_ids.len() as i32;
            run.total_amount = result.total_amount;
            run.total_hours = result.total_hours;
            run.error_message = if result.errors.is_empty() {
                None
            } else {
                Some(result.errors.join("; "))
            };
        }
        Ok(())
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn register_node(&self, input: &RegisterNode) -> Result<WorkerNode, AppError> {
        input.validate()?;
        let caps: Vec<&str> = input.capabilities.iter().map(|c| c.as_str()).collect();
        Ok(self.seed_node(
            &input.hostname,
            NodeStatus::Online,
            0,
            input.max_concurrent_builds,
            &caps,
            Some(Utc::now()),
        ))
    }

    async fn get_node(&self, node_id: Uuid) -> Result<Option<WorkerNode>, AppError> {
        Ok(self.inner.lock().unwrap().nodes.get(&node_id).cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<WorkerNode>, AppError> {
        let inner = self.inner.lock().unwrap();
        let mut nodes: Vec<WorkerNode> = inner.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        Ok(nodes)
    }

    async fn list_claimable_nodes(
        &self,
        required_capabilities: &[String],
    ) -> Result<Vec<WorkerNode>, AppError> {
        let inner = self.inner.lock().unwrap();
        let mut nodes: Vec<WorkerNode> = inner
            .nodes
            .values()
            .filter(|n| {
                n.status() == NodeStatus::Online
                    && n.has_capacity()
                    && n.has_capabilities(required_capabilities)
            })
            .cloned()
            .collect();
        nodes.sort_by(|a, b| {
            a.current_builds
                .cmp(&b.current_builds)
                .then(b.last_heartbeat.cmp(&a.last_heartbeat))
        });
        Ok(nodes)
    }

    async fn try_claim_slot(&self, node_id: Uuid) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(node) = inner.nodes.get_mut(&node_id) else {
            return Ok(false);
        };
        let claimable = matches!(node.status(), NodeStatus::Online | NodeStatus::Busy)
            && node.current_builds < node.max_concurrent_builds;
        if !claimable {
            return Ok(false);
        }
        node.current_builds += 1;
        node.status = if node.current_builds >= node.max_concurrent_builds {
            NodeStatus::Busy
        } else {
            NodeStatus::Online
        }
        .as_str()
        .to_string();
        node.updated_utc = Utc::now();
        Ok(true)
    }

    async fn release_slot(&self, node_id: Uuid) -> Result<Option<WorkerNode>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(node) = inner.nodes.get_mut(&node_id) else {
            return Ok(None);
        };
        node.current_builds = (node.current_builds - 1).max(0);
        if node.status() == NodeStatus::Busy && node.current_builds < node.max_concurrent_builds {
            node.status = NodeStatus::Online.as_str().to_string();
        }
        node.updated_utc = Utc::now();
        Ok(Some(node.clone()))
    }

    async fn record_heartbeat(&self, node_id: Uuid) -> Result<Option<WorkerNode>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(node) = inner.nodes.get_mut(&node_id) else {
            return Ok(None);
        };
        node.last_heartbeat = Some(Utc::now());
        if node.status() == NodeStatus::Offline {
            node.status = NodeStatus::Online.as_str().to_string();
            node.current_builds = 0;
        }
        node.updated_utc = Utc::now();
        Ok(Some(node.clone()))
    }

    async fn mark_stale_offline(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkerNode>, AppError> {
        let mut inner = self.inner.lock().unwrap();
        let mut marked = Vec::new();
        for node in inner.nodes.values_mut() {
            let active = matches!(node.status(), NodeStatus::Online | NodeStatus::Busy);
            let stale = node.last_heartbeat.map_or(true, |t| t < cutoff);
            if active && stale {
                node.status = NodeStatus::Offline.as_str().to_string();
                node.current_builds = 0;
                node.updated_utc = Utc::now();
                marked.push(node.clone());
            }
        }
        Ok(marked)
    }
}

/// Wallet fake with controllable failure modes.
#[derive(Default)]
pub struct FakeWallet {
    balances: Mutex<HashMap<Uuid, Decimal>>,
    debits: Mutex<Vec<(Uuid, Decimal, String)>>,
    decline_debits: AtomicBool,
    error_debits: AtomicBool,
    yield_on_balance: AtomicBool,
    error_balance_orgs: Mutex<HashSet<Uuid>>,
}

impl FakeWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, organization_id: Uuid, balance: Decimal) {
        self.balances
            .lock()
            .unwrap()
            .insert(organization_id, balance);
    }

    pub fn balance(&self, organization_id: Uuid) -> Decimal {
        self.balances
            .lock()
            .unwrap()
            .get(&organization_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// All debits made, as (organization, amount, memo).
    pub fn debits(&self) -> Vec<(Uuid, Decimal, String)> {
        self.debits.lock().unwrap().clone()
    }

    pub fn decline_debits(&self) {
        self.decline_debits.store(true, Ordering::SeqCst);
    }

    pub fn error_debits(&self) {
        self.error_debits.store(true, Ordering::SeqCst);
    }

    /// Suspend at the balance read so concurrently running charges can
    /// interleave there.
    pub fn yield_on_balance(&self) {
        self.yield_on_balance.store(true, Ordering::SeqCst);
    }

    pub fn error_balance_for(&self, organization_id: Uuid) {
        self.error_balance_orgs
            .lock()
            .unwrap()
            .insert(organization_id);
    }
}

#[async_trait]
impl WalletLedger for FakeWallet {
    async fn get_balance(&self, organization_id: Uuid) -> Result<Decimal, AppError> {
        if self.yield_on_balance.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        if self
            .error_balance_orgs
            .lock()
            .unwrap()
            .contains(&organization_id)
        {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "wallet unreachable"
            )));
        }
        Ok(self.balance(organization_id))
    }

    async fn debit(
        &self,
        organization_id: Uuid,
        amount: Decimal,
        memo: &str,
    ) -> Result<Option<Uuid>, AppError> {
        if self.error_debits.load(Ordering::SeqCst) {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "payment processor error"
            )));
        }
        if self.decline_debits.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(organization_id).or_insert(Decimal::ZERO);
        if *balance < amount {
            return Ok(None);
        }
        *balance -= amount;
        drop(balances);
        self.debits
            .lock()
            .unwrap()
            .push((organization_id, amount, memo.to_string()));
        Ok(Some(Uuid::new_v4()))
    }
}

/// Metering fake returning a fixed usage period.
#[derive(Default)]
pub struct FixedMetering {
    pub usage: UsagePeriod,
    fail: AtomicBool,
}

impl FixedMetering {
    pub fn new(network_gb: Decimal, build_minutes: Decimal) -> Self {
        Self {
            usage: UsagePeriod {
                network_gb,
                build_minutes,
            },
            fail: AtomicBool::new(false),
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MeteringSource for FixedMetering {
    async fn query_usage(
        &self,
        _subject_id: Uuid,
        _period_start: DateTime<Utc>,
        _period_end: DateTime<Utc>,
    ) -> Result<UsagePeriod, AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "metering source unavailable"
            )));
        }
        Ok(self.usage)
    }
}

/// Sink that records every event for assertions.
#[derive(Default)]
pub struct CapturingSink {
    events: Mutex<Vec<ActivityEvent>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<ActivityEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl ActivitySink for CapturingSink {
    async fn record(&self, event: ActivityEvent) {
        self.events.lock().unwrap().push(event);
    }
}
