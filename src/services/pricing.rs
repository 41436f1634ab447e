//! Resource cost calculation.
//!
//! Pure functions: no I/O, no state. All arithmetic is done in
//! `rust_decimal::Decimal` so penny-level drift cannot accumulate across
//! cycles the way binary floats would.

use crate::error::AppError;
use crate::models::ResourceProfile;
use rust_decimal::Decimal;

/// Decimal places for cost components and totals.
const COST_SCALE: u32 = 4;

/// Average hours per month used for monthly projections.
const HOURS_PER_MONTH: u32 = 730;

/// Per-unit prices. Injected via configuration, never read from ambient
/// global state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingRates {
    /// Cost per vCPU core per hour.
    pub cpu_core_hour: Decimal,
    /// Cost per GB of memory per hour.
    pub memory_gb_hour: Decimal,
    /// Cost per GB of storage per hour.
    pub storage_gb_hour: Decimal,
    /// Cost per GB of network transfer.
    pub network_gb: Decimal,
    /// Cost per build minute.
    pub build_minute: Decimal,
}

/// Itemized cost for one billing period.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CostBreakdown {
    pub cpu_cost: Decimal,
    pub memory_cost: Decimal,
    pub storage_cost: Decimal,
    pub network_cost: Decimal,
    pub build_cost: Decimal,
    pub total_cost: Decimal,
}

/// Projected cost for a profile, for pre-purchase previews.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CostEstimate {
    pub hourly: Decimal,
    pub daily: Decimal,
    pub monthly: Decimal,
}

fn require_non_negative(name: &str, value: Decimal) -> Result<(), AppError> {
    if value < Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "{} must be non-negative, got {}",
            name,
            value
        )));
    }
    Ok(())
}

/// Compute the cost of `hours` elapsed hours on `profile` plus the metered
/// network and build usage for the same period.
pub fn compute_cost(
    rates: &PricingRates,
    profile: &ResourceProfile,
    hours: i64,
    network_gb: Decimal,
    build_minutes: Decimal,
) -> Result<CostBreakdown, AppError> {
    if hours < 0 {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "elapsed hours must be non-negative, got {}",
            hours
        )));
    }
    require_non_negative("cpu_cores", profile.cpu_cores)?;
    require_non_negative("memory_gb", profile.memory_gb)?;
    require_non_negative("storage_gb", profile.storage_gb)?;
    require_non_negative("network_gb", network_gb)?;
    require_non_negative("build_minutes", build_minutes)?;

    let hours = Decimal::from(hours);
    let cpu_cost = (rates.cpu_core_hour * profile.cpu_cores * hours).round_dp(COST_SCALE);
    let memory_cost = (rates.memory_gb_hour * profile.memory_gb * hours).round_dp(COST_SCALE);
    let storage_cost = (rates.storage_gb_hour * profile.storage_gb * hours).round_dp(COST_SCALE);
    let network_cost = (rates.network_gb * network_gb).round_dp(COST_SCALE);
    let build_cost = (rates.build_minute * build_minutes).round_dp(COST_SCALE);

    let total_cost =
        (cpu_cost + memory_cost + storage_cost + network_cost + build_cost).round_dp(COST_SCALE);

    Ok(CostBreakdown {
        cpu_cost,
        memory_cost,
        storage_cost,
        network_cost,
        build_cost,
        total_cost,
    })
}

/// Project hourly, daily and monthly cost for a profile before purchase.
/// Monthly is hourly x 730; metered usage (network, builds) is excluded
/// since it cannot be known in advance.
pub fn estimate(rates: &PricingRates, profile: &ResourceProfile) -> Result<CostEstimate, AppError> {
    let per_hour = compute_cost(rates, profile, 1, Decimal::ZERO, Decimal::ZERO)?;
    let hourly = per_hour.total_cost;

    Ok(CostEstimate {
        hourly,
        daily: (hourly * Decimal::from(24u32)).round_dp(COST_SCALE),
        monthly: (hourly * Decimal::from(HOURS_PER_MONTH)).round_dp(COST_SCALE),
    })
}
