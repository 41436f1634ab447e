//! Cost calculator tests.

mod common;

use common::{test_profile, test_rates};
use compute_billing_service::error::AppError;
use compute_billing_service::models::ResourceProfile;
use compute_billing_service::services::pricing::{compute_cost, estimate};
use rust_decimal::Decimal;

#[test]
fn one_hour_of_reference_profile_costs_fifty_cents() {
    let breakdown = compute_cost(
        &test_rates(),
        &test_profile(),
        1,
        Decimal::ZERO,
        Decimal::ZERO,
    )
    .unwrap();

    assert_eq!(breakdown.cpu_cost, Decimal::new(4000, 4)); // 0.4000
    assert_eq!(breakdown.memory_cost, Decimal::new(1000, 4)); // 0.1000
    assert_eq!(breakdown.storage_cost, Decimal::ZERO.round_dp(4));
    assert_eq!(breakdown.total_cost, Decimal::new(5000, 4)); // 0.5000
}

#[test]
fn metered_usage_is_added_to_time_cost() {
    // 2 GB network at 0.01/GB, 10 build minutes at 0.008/min.
    let breakdown = compute_cost(
        &test_rates(),
        &test_profile(),
        1,
        Decimal::TWO,
        Decimal::TEN,
    )
    .unwrap();

    assert_eq!(breakdown.network_cost, Decimal::new(200, 4)); // 0.0200
    assert_eq!(breakdown.build_cost, Decimal::new(800, 4)); // 0.0800
    assert_eq!(breakdown.total_cost, Decimal::new(6000, 4)); // 0.6000
}

#[test]
fn cost_is_linear_in_elapsed_hours() {
    let rates = test_rates();
    let profile = test_profile();

    let one = compute_cost(&rates, &profile, 1, Decimal::ZERO, Decimal::ZERO).unwrap();
    for k in [2i64, 7, 24, 730] {
        let scaled = compute_cost(&rates, &profile, k, Decimal::ZERO, Decimal::ZERO).unwrap();
        assert_eq!(
            scaled.total_cost,
            one.total_cost * Decimal::from(k),
            "cost for {} hours is not linear",
            k
        );
    }
}

#[test]
fn zero_hours_costs_nothing_but_is_valid() {
    let breakdown = compute_cost(
        &test_rates(),
        &test_profile(),
        0,
        Decimal::ZERO,
        Decimal::ZERO,
    )
    .unwrap();
    assert_eq!(breakdown.total_cost, Decimal::ZERO);
}

#[test]
fn negative_quantities_are_rejected() {
    let rates = test_rates();
    let profile = test_profile();

    let negative_hours = compute_cost(&rates, &profile, -1, Decimal::ZERO, Decimal::ZERO);
    assert!(matches!(negative_hours, Err(AppError::BadRequest(_))));

    let negative_network =
        compute_cost(&rates, &profile, 1, Decimal::NEGATIVE_ONE, Decimal::ZERO);
    assert!(matches!(negative_network, Err(AppError::BadRequest(_))));

    let bad_profile = ResourceProfile {
        cpu_cores: Decimal::NEGATIVE_ONE,
        memory_gb: Decimal::TWO,
        storage_gb: Decimal::ZERO,
    };
    let negative_cpu = compute_cost(&rates, &bad_profile, 1, Decimal::ZERO, Decimal::ZERO);
    assert!(matches!(negative_cpu, Err(AppError::BadRequest(_))));
}

#[test]
fn components_round_to_four_decimal_places() {
    let rates = test_rates();
    let profile = ResourceProfile {
        cpu_cores: Decimal::new(333, 3), // 0.333 cores
        memory_gb: Decimal::ZERO,
        storage_gb: Decimal::ZERO,
    };

    // 0.40 * 0.333 = 0.1332, exactly four places after rounding.
    let breakdown = compute_cost(&rates, &profile, 1, Decimal::ZERO, Decimal::ZERO).unwrap();
    assert_eq!(breakdown.cpu_cost, Decimal::new(1332, 4));
    assert!(breakdown.total_cost.scale() <= 4);
}

#[test]
fn estimate_projects_hourly_daily_monthly() {
    let estimate = estimate(&test_rates(), &test_profile()).unwrap();

    assert_eq!(estimate.hourly, Decimal::new(5000, 4)); // 0.50
    assert_eq!(estimate.daily, Decimal::new(120_000, 4)); // 12.00
    assert_eq!(estimate.monthly, Decimal::new(3_650_000, 4)); // 365.00
}

#[test]
fn estimate_rejects_malformed_profiles() {
    let bad_profile = ResourceProfile {
        cpu_cores: Decimal::ONE,
        memory_gb: Decimal::NEGATIVE_ONE,
        storage_gb: Decimal::ZERO,
    };
    assert!(matches!(
        estimate(&test_rates(), &bad_profile),
        Err(AppError::BadRequest(_))
    ));
}
