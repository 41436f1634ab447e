//! Node capacity scheduling.
//!
//! Select-then-claim over the worker pool: selection is a ranked read,
//! the claim itself is an atomic conditional update on the node store, and
//! a claim failure just means "try the next candidate".

use crate::error::AppError;
use crate::models::WorkerNode;
use crate::services::events::{ActivityEvent, ActivitySink};
use crate::services::metrics::{record_nodes_marked_offline, record_slot_claim};
use crate::services::store::NodeStore;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct CapacityScheduler {
    store: Arc<dyn NodeStore>,
    events: Arc<dyn ActivitySink>,
}

impl CapacityScheduler {
    pub fn new(store: Arc<dyn NodeStore>, events: Arc<dyn ActivitySink>) -> Self {
        Self { store, events }
    }

    /// Best candidate for a new build: online, spare capacity, superset of
    /// the required capabilities; least-loaded first, then most recently
    /// alive. Greedy, not globally optimal — the claim is rechecked
    /// atomically afterwards.
    #[instrument(skip(self))]
    pub async fn find_available_node(
        &self,
        required_capabilities: &[String],
    ) -> Result<Option<WorkerNode>, AppError> {
        let candidates = self.store.list_claimable_nodes(required_capabilities).await?;
        Ok(candidates.into_iter().next())
    }

    /// Atomically claim one build slot on a specific node.
    #[instrument(skip(self), fields(node_id = %node_id))]
    pub async fn claim_slot(&self, node_id: Uuid) -> Result<bool, AppError> {
        let claimed = self.store.try_claim_slot(node_id).await?;
        record_slot_claim(claimed);
        Ok(claimed)
    }

    /// Release one previously claimed slot.
    #[instrument(skip(self), fields(node_id = %node_id))]
    pub async fn release_slot(&self, node_id: Uuid) -> Result<(), AppError> {
        if self.store.release_slot(node_id).await?.is_none() {
            warn!("Release for unknown node ignored");
        }
        Ok(())
    }

    /// Select and claim in one call, walking the ranked candidates until a
    /// claim lands. Concurrent dispatches racing for the same last slot are
    /// resolved by the atomic claim, not by locking the selection.
    #[instrument(skip(self))]
    pub async fn dispatch_build(
        &self,
        required_capabilities: &[String],
    ) -> Result<Option<WorkerNode>, AppError> {
        let candidates = self.store.list_claimable_nodes(required_capabilities).await?;
        for node in candidates {
            if self.store.try_claim_slot(node.node_id).await? {
                record_slot_claim(true);
                // Re-read so the caller sees the post-claim counters.
                return self.store.get_node(node.node_id).await;
            }
            record_slot_claim(false);
        }
        Ok(None)
    }

    /// Force nodes with stale or missing heartbeats offline, zeroing their
    /// build counters. Heartbeat silence is assumed to mean node death;
    /// reconciling any builds that were actually running is the build
    /// pipeline's concern. Idempotent: already-offline nodes are untouched.
    #[instrument(skip(self))]
    pub async fn sweep_stale_nodes(&self, threshold_minutes: i64) -> Result<usize, AppError> {
        let cutoff = Utc::now() - Duration::minutes(threshold_minutes);
        let marked = self.store.mark_stale_offline(cutoff).await?;
        record_nodes_marked_offline(marked.len());

        for node in &marked {
            info!(
                node_id = %node.node_id,
                hostname = %node.hostname,
                "Node marked offline: heartbeat older than {} minute(s)",
                threshold_minutes
            );
            self.events
                .record(ActivityEvent::new(
                    node.node_id,
                    "node.offline",
                    "offline",
                    format!(
                        "Worker {} marked offline after missed heartbeats",
                        node.hostname
                    ),
                ))
                .await;
        }

        Ok(marked.len())
    }
}
