//! Billing sweep scheduler.
//!
//! Drives the billing cycle engine across every due subject in one
//! externally-triggered run. Subjects are independent: one subject's
//! failure is aggregated, never propagated.

use crate::error::AppError;
use crate::models::{ChargeStatus, SweepResult};
use crate::services::engine::BillingEngine;
use crate::services::metrics::record_sweep;
use crate::services::store::BillingStore;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct BillingSweep {
    store: Arc<dyn BillingStore>,
    engine: Arc<BillingEngine>,
}

impl BillingSweep {
    pub fn new(store: Arc<dyn BillingStore>, engine: Arc<BillingEngine>) -> Self {
        Self { store, engine }
    }

    /// Run one sweep over all currently-due subjects. Invoked by an
    /// external trigger; this core never schedules itself.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<SweepResult, AppError> {
        let started = Utc::now();
        let run_id = self.store.record_sweep_run(started).await?;
        let due = self.store.list_due_subjects(started).await?;

        info!(run_id = %run_id, due_subjects = due.len(), "Billing sweep started");

        let mut processed_count = 0;
        let mut total_amount = Decimal::ZERO;
        let mut total_hours = 0i64;
        let mut failed_subject_ids = Vec::new();
        let mut errors = Vec::new();

        for subject in &due {
            match self.engine.charge_subject(subject.subject_id).await {
                Ok(outcome) => {
                    processed_count += 1;
                    match outcome.status {
                        ChargeStatus::Billed => {
                            total_amount += outcome.amount_charged;
                            total_hours += outcome.hours_charged;
                        }
                        ChargeStatus::Failed => {
                            failed_subject_ids.push(subject.subject_id);
                            if let Some(reason) = outcome.failure_reason {
                                errors.push(format!(
                                    "{}: cycle failed ({})",
                                    subject.subject_id,
                                    reason.as_str()
                                ));
                            }
                        }
                        ChargeStatus::NothingDue => {}
                    }
                }
                Err(e) => {
                    warn!(subject_id = %subject.subject_id, error = %e, "Charge errored during sweep");
                    failed_subject_ids.push(subject.subject_id);
                    errors.push(format!("{}: {}", subject.subject_id, e));
                }
            }
        }

        let result = SweepResult {
            success: failed_subject_ids.is_empty(),
            processed_count,
            total_amount,
            total_hours,
            failed_subject_ids,
            errors,
        };

        self.store.complete_sweep_run(run_id, &result).await?;
        record_sweep(result.success);

        info!(
            run_id = %run_id,
            processed = result.processed_count,
            failed = result.failed_subject_ids.len(),
            total_amount = %result.total_amount,
            total_hours = result.total_hours,
            "Billing sweep completed"
        );

        Ok(result)
    }
}
