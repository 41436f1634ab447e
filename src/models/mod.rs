//! Domain models for compute-billing-service.

mod cycle;
mod node;
mod subject;
mod sweep;

pub use cycle::{BillingCycle, CycleSettlement, CycleStatus, FailureReason};
pub use node::{NodeStatus, RegisterNode, WorkerNode};
pub use subject::{
    BillableSubject, CreateSubject, ResourceProfile, SubjectKind, SubjectStatus,
};
pub use sweep::{ChargeOutcome, ChargeStatus, SweepResult, SweepRun};
