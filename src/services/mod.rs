//! Services module for compute-billing-service.

pub mod capacity;
pub mod database;
pub mod engine;
pub mod events;
pub mod metering;
pub mod metrics;
pub mod pricing;
pub mod store;
pub mod sweep;
pub mod wallet;

pub use capacity::CapacityScheduler;
pub use database::Database;
pub use engine::BillingEngine;
pub use events::{ActivityEvent, ActivitySink, HttpActivitySink};
pub use metering::{MeteringSource, UsagePeriod};
pub use metrics::{get_metrics, init_metrics};
pub use pricing::{compute_cost, estimate, CostBreakdown, CostEstimate, PricingRates};
pub use store::{BillingStore, NodeStore};
pub use sweep::BillingSweep;
pub use wallet::{HttpWalletClient, WalletLedger};
