//! Constraint sets used across integration tests.
use contract_term_utils::ConstraintSet;

/// Service contract with overlapping duration and payment ranges.
pub fn service_contract() -> (ConstraintSet, ConstraintSet) {
    let a = ConstraintSet::new("Party A")
        .with_range("duration", 12.0, 24.0, 1.0)
        .with_range("payment-amount", 4000.0, 5000.0, 1.0);
    let b = ConstraintSet::new("Party B")
        .with_range("duration", 12.0, 18.0, 1.0)
        .with_range("payment-amount", 4500.0, 6000.0, 1.0);
    (a, b)
}

/// Party A accepts only high security tier, which Party B refuses.
pub fn exclusive_security_tier() -> (ConstraintSet, ConstraintSet) {
    let (a, b) = service_contract();
    (
        a.with_one_of("security-tier", &["high"], 2.0),
        b.with_one_of("security-tier", &["standard", "basic"], 1.0),
    )
}

/// Ranges overlap on a small part only, which takes several rounds.
pub fn narrow_overlap() -> (ConstraintSet, ConstraintSet) {
    let a = ConstraintSet::new("Supplier")
        .with_range("duration", 12.0, 24.0, 1.0)
        .with_range("payment-amount", 4000.0, 5000.0, 2.0)
        .with_one_of("payment-cadence", &["monthly", "quarterly"], 1.0);
    let b = ConstraintSet::new("Customer")
        .with_range("duration", 6.0, 13.0, 1.0)
        .with_range("payment-amount", 4900.0, 7000.0, 1.0)
        .with_one_of("payment-cadence", &["quarterly", "yearly"], 1.0);
    (a, b)
}
