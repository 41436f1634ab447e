//! Billing cycle engine.
//!
//! Executes exactly one metered charge against exactly one subject. Cycle
//! persistence, the `last_billed_at` advance and any suspension happen in a
//! single store transaction; the wallet debit is the one external side
//! effect and is performed last, immediately before that commit.

use crate::error::AppError;
use crate::models::{
    BillableSubject, ChargeOutcome, ChargeStatus, CycleSettlement, CycleStatus, FailureReason,
    SubjectKind,
};
use crate::services::events::{ActivityEvent, ActivitySink};
use crate::services::metering::{MeteringSource, UsagePeriod};
use crate::services::metrics::{record_charge_amount, record_cycle_settled};
use crate::services::pricing::{compute_cost, CostBreakdown, PricingRates};
use crate::services::store::BillingStore;
use crate::services::wallet::WalletLedger;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub struct BillingEngine {
    store: Arc<dyn BillingStore>,
    wallet: Arc<dyn WalletLedger>,
    metering: Arc<dyn MeteringSource>,
    events: Arc<dyn ActivitySink>,
    rates: PricingRates,
}

impl BillingEngine {
    pub fn new(
        store: Arc<dyn BillingStore>,
        wallet: Arc<dyn WalletLedger>,
        metering: Arc<dyn MeteringSource>,
        events: Arc<dyn ActivitySink>,
        rates: PricingRates,
    ) -> Self {
        Self {
            store,
            wallet,
            metering,
            events,
            rates,
        }
    }

    /// Charge one subject for all whole hours elapsed since its last billed
    /// period. Sub-hour remainders are left for the next invocation; they
    /// are never billed fractionally.
    #[instrument(skip(self), fields(subject_id = %subject_id))]
    pub async fn charge_subject(&self, subject_id: Uuid) -> Result<ChargeOutcome, AppError> {
        let subject = self
            .store
            .get_subject(subject_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subject {} not found", subject_id)))?;

        if !subject.status().is_billable() {
            tracing::debug!(status = %subject.status, "Subject not billable, skipping");
            return Ok(ChargeOutcome::nothing_due());
        }

        let now = Utc::now();
        let period_start = subject.last_billed_at.unwrap_or(subject.created_utc);
        let hours = (now - period_start).num_hours();
        if hours < 1 {
            return Ok(ChargeOutcome::nothing_due());
        }
        let period_end = period_start + Duration::hours(hours);

        // Metering failure is a terminal dependency failure: the period is
        // consumed so the window is never re-attempted.
        let usage = match self
            .metering
            .query_usage(subject_id, period_start, period_end)
            .await
        {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "Metering source unavailable, settling cycle as failed");
                let breakdown = compute_cost(
                    &self.rates,
                    &subject.profile(),
                    hours,
                    Decimal::ZERO,
                    Decimal::ZERO,
                )?;
                return self
                    .settle_failure(
                        &subject,
                        period_start,
                        period_end,
                        hours,
                        UsagePeriod::default(),
                        &breakdown,
                        FailureReason::MeteringUnavailable,
                    )
                    .await;
            }
        };

        let breakdown = compute_cost(
            &self.rates,
            &subject.profile(),
            hours,
            usage.network_gb,
            usage.build_minutes,
        )?;
        let total = breakdown.total_cost;

        // Zero-rate deployments settle without touching the wallet; the
        // ledger rejects zero-amount debits.
        if total.is_zero() {
            let settlement = self.settlement(
                &subject,
                period_start,
                period_end,
                hours,
                usage,
                &breakdown,
                CycleStatus::Billed,
                None,
                None,
                json!({ "breakdown": breakdown, "zero_amount": true }),
                false,
            );
            let cycle = match self.store.settle_cycle(&settlement).await {
                Ok(cycle) => cycle,
                Err(AppError::Conflict(_)) => return Ok(ChargeOutcome::nothing_due()),
                Err(e) => return Err(e),
            };
            record_cycle_settled(CycleStatus::Billed, None);
            self.events
                .record(
                    ActivityEvent::new(
                        subject.subject_id,
                        "billing.cycle",
                        "billed",
                        format!("Billed {} hour(s) at zero cost", hours),
                    )
                    .with_metadata(json!({ "cycle_id": cycle.cycle_id, "amount": Decimal::ZERO })),
                )
                .await;
            return Ok(ChargeOutcome {
                status: ChargeStatus::Billed,
                failure_reason: None,
                cycle_id: Some(cycle.cycle_id),
                amount_charged: Decimal::ZERO,
                hours_charged: hours,
            });
        }

        // Check-then-debit: the window between the two calls is an accepted
        // race; the ledger's own debit is atomic.
        let balance = self.wallet.get_balance(subject.organization_id).await?;
        if balance < total {
            info!(
                balance = %balance,
                amount = %total,
                "Insufficient balance, settling cycle as failed"
            );
            return self
                .settle_failure(
                    &subject,
                    period_start,
                    period_end,
                    hours,
                    usage,
                    &breakdown,
                    FailureReason::InsufficientBalance,
                )
                .await;
        }

        // The balance read awaited, so a concurrent invocation may have
        // settled this window in the meantime. Re-check before touching
        // money; the conditional advance in `settle_cycle` is the final
        // arbiter either way.
        let latest = self
            .store
            .get_subject(subject_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subject {} not found", subject_id)))?;
        if latest.last_billed_at != subject.last_billed_at || !latest.status().is_billable() {
            tracing::debug!("Billing window consumed concurrently, skipping debit");
            return Ok(ChargeOutcome::nothing_due());
        }

        let memo = format!(
            "Usage charge for subject {} ({} - {})",
            subject.subject_id, period_start, period_end
        );
        let transaction_id = match self
            .wallet
            .debit(subject.organization_id, total, &memo)
            .await
        {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!(amount = %total, "Wallet declined debit, settling cycle as failed");
                return self
                    .settle_failure(
                        &subject,
                        period_start,
                        period_end,
                        hours,
                        usage,
                        &breakdown,
                        FailureReason::WalletDeductionFailed,
                    )
                    .await;
            }
            Err(e) => {
                warn!(error = %e, amount = %total, "Wallet debit errored, settling cycle as failed");
                return self
                    .settle_failure(
                        &subject,
                        period_start,
                        period_end,
                        hours,
                        usage,
                        &breakdown,
                        FailureReason::WalletDeductionFailed,
                    )
                    .await;
            }
        };

        let settlement = self.settlement(
            &subject,
            period_start,
            period_end,
            hours,
            usage,
            &breakdown,
            CycleStatus::Billed,
            None,
            Some(transaction_id),
            json!({ "breakdown": breakdown }),
            false,
        );

        // The debit has already happened: a commit failure here leaves paid
        // money with no billed cycle and must go to an operator, not a
        // retry loop.
        let cycle = match self.store.settle_cycle(&settlement).await {
            Ok(cycle) => cycle,
            Err(e) => {
                error!(
                    subject_id = %subject.subject_id,
                    transaction_id = %transaction_id,
                    amount = %total,
                    error = %e,
                    "Cycle commit failed after successful wallet debit"
                );
                return Err(AppError::Reconciliation(anyhow::anyhow!(
                    "Debit {} for {} committed at the ledger but the cycle failed to persist: {}",
                    transaction_id,
                    total,
                    e
                )));
            }
        };

        record_cycle_settled(CycleStatus::Billed, None);
        record_charge_amount(total);
        info!(
            cycle_id = %cycle.cycle_id,
            amount = %total,
            hours = hours,
            "Cycle billed"
        );

        self.events
            .record(
                ActivityEvent::new(
                    subject.subject_id,
                    "billing.cycle",
                    "billed",
                    format!("Charged {} for {} hour(s) of usage", total, hours),
                )
                .with_metadata(json!({ "cycle_id": cycle.cycle_id, "amount": total })),
            )
            .await;

        Ok(ChargeOutcome {
            status: ChargeStatus::Billed,
            failure_reason: None,
            cycle_id: Some(cycle.cycle_id),
            amount_charged: total,
            hours_charged: hours,
        })
    }

    /// Settle a terminal failed cycle. The period is still consumed so the
    /// next sweep starts a fresh window instead of re-attempting this one.
    #[allow(clippy::too_many_arguments)]
    async fn settle_failure(
        &self,
        subject: &BillableSubject,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        hours: i64,
        usage: UsagePeriod,
        breakdown: &CostBreakdown,
        reason: FailureReason,
    ) -> Result<ChargeOutcome, AppError> {
        let suspend = reason == FailureReason::InsufficientBalance
            && subject.kind() == SubjectKind::Subscription;

        let settlement = self.settlement(
            subject,
            period_start,
            period_end,
            hours,
            usage,
            breakdown,
            CycleStatus::Failed,
            Some(reason),
            None,
            json!({ "breakdown": breakdown, "reason": reason.as_str() }),
            suspend,
        );
        let cycle = match self.store.settle_cycle(&settlement).await {
            Ok(cycle) => cycle,
            Err(AppError::Conflict(_)) => return Ok(ChargeOutcome::nothing_due()),
            Err(e) => return Err(e),
        };
        record_cycle_settled(CycleStatus::Failed, Some(reason));

        self.events
            .record(
                ActivityEvent::new(
                    subject.subject_id,
                    "billing.cycle",
                    "failed",
                    format!(
                        "Charge of {} for {} hour(s) failed: {}",
                        breakdown.total_cost,
                        hours,
                        reason.as_str()
                    ),
                )
                .with_metadata(json!({ "cycle_id": cycle.cycle_id, "reason": reason.as_str() })),
            )
            .await;

        if suspend {
            info!(subject_id = %subject.subject_id, "Subject suspended for insufficient balance");
            self.events
                .record(ActivityEvent::new(
                    subject.subject_id,
                    "billing.suspension",
                    "suspended",
                    "Subscription suspended: insufficient wallet balance".to_string(),
                ))
                .await;
        }

        Ok(ChargeOutcome {
            status: ChargeStatus::Failed,
            failure_reason: Some(reason),
            cycle_id: Some(cycle.cycle_id),
            amount_charged: Decimal::ZERO,
            hours_charged: hours,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn settlement(
        &self,
        subject: &BillableSubject,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        hours: i64,
        usage: UsagePeriod,
        breakdown: &CostBreakdown,
        status: CycleStatus,
        failure_reason: Option<FailureReason>,
        payment_transaction_id: Option<Uuid>,
        metadata: serde_json::Value,
        suspend_subject: bool,
    ) -> CycleSettlement {
        let hours_dec = Decimal::from(hours);
        CycleSettlement {
            subject_id: subject.subject_id,
            organization_id: subject.organization_id,
            expected_last_billed_at: subject.last_billed_at,
            period_start,
            period_end,
            cpu_hours: subject.cpu_cores * hours_dec,
            memory_gb_hours: subject.memory_gb * hours_dec,
            storage_gb_hours: subject.storage_gb * hours_dec,
            network_gb: usage.network_gb,
            build_minutes: usage.build_minutes,
            total_amount: breakdown.total_cost,
            status,
            failure_reason,
            payment_transaction_id,
            metadata: Some(metadata),
            suspend_subject,
        }
    }
}
