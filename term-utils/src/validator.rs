use serde::{Deserialize, Serialize};

use crate::constraints::ConstraintSet;
use crate::vector::TermVector;

/// Result of checking `TermVector` against one party's constraints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feasibility {
    pub feasible: bool,
    /// Dimensions that are missing or out of bounds, in name order.
    pub violations: Vec<String>,
}

/// Checks every dimension of `constraints` against `terms`. Dimensions
/// missing in `terms` are violations; dimensions not constrained by the
/// party are ignored.
pub fn validate(terms: &TermVector, constraints: &ConstraintSet) -> Feasibility {
    let violations = constraints
        .dimensions()
        .filter(|(name, spec)| {
            terms
                .get(name)
                .map(|value| !spec.constraint.accepts(value))
                .unwrap_or(true)
        })
        .map(|(name, _)| name.to_string())
        .collect::<Vec<_>>();

    Feasibility {
        feasible: violations.is_empty(),
        violations,
    }
}

/// Weighted fraction of satisfied dimensions, in range [0, 1].
/// Falls back to unweighted fraction, when all weights are zero.
pub fn score(terms: &TermVector, constraints: &ConstraintSet) -> f64 {
    let total = constraints.total_weight();
    let satisfied = |name: &str| {
        terms
            .get(name)
            .zip(constraints.constraint(name))
            .map(|(value, constraint)| constraint.accepts(value))
            .unwrap_or(false)
    };

    if constraints.is_empty() {
        return 0.0;
    }

    if total > 0.0 {
        let gained: f64 = constraints
            .dimensions()
            .filter(|(name, _)| satisfied(*name))
            .map(|(_, spec)| spec.weight)
            .sum();
        (gained / total).clamp(0.0, 1.0)
    } else {
        let count = constraints
            .dimensions()
            .filter(|(name, _)| satisfied(*name))
            .count();
        count as f64 / constraints.dimensions.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn party_a() -> ConstraintSet {
        ConstraintSet::new("Party A")
            .with_range("duration", 12.0, 24.0, 1.0)
            .with_range("payment-amount", 4000.0, 5000.0, 3.0)
    }

    #[test_case(18.0, 4500.0, &[]; "All satisfied")]
    #[test_case(12.0, 5000.0, &[]; "Bounds are inclusive")]
    #[test_case(30.0, 4500.0, &["duration"]; "Duration too long")]
    #[test_case(6.0, 6000.0, &["duration", "payment-amount"]; "Both violated")]
    fn test_validate(duration: f64, payment: f64, violations: &[&str]) {
        let terms = TermVector::new()
            .with("duration", duration)
            .with("payment-amount", payment);
        let result = validate(&terms, &party_a());

        assert_eq!(result.feasible, violations.is_empty());
        assert_eq!(result.violations, violations);
    }

    #[test]
    fn test_missing_dimension_is_violation() {
        let terms = TermVector::new().with("duration", 18.0);
        let result = validate(&terms, &party_a());

        assert!(!result.feasible);
        assert_eq!(result.violations, vec!["payment-amount".to_string()]);
    }

    #[test]
    fn test_unconstrained_dimension_is_ignored() {
        let terms = TermVector::new()
            .with("duration", 18.0)
            .with("payment-amount", 4500.0)
            .with("support-level", "24/7");

        assert!(validate(&terms, &party_a()).feasible);
    }

    #[test]
    fn test_wrong_value_kind_is_violation() {
        let terms = TermVector::new()
            .with("duration", "two years")
            .with("payment-amount", 4500.0);

        assert_eq!(validate(&terms, &party_a()).violations, vec!["duration"]);
    }

    #[test_case(18.0, 4500.0, 1.0; "Everything satisfied")]
    #[test_case(30.0, 4500.0, 0.75; "Only payment satisfied")]
    #[test_case(18.0, 9000.0, 0.25; "Only duration satisfied")]
    #[test_case(30.0, 9000.0, 0.0; "Nothing satisfied")]
    fn test_weighted_score(duration: f64, payment: f64, expected: f64) {
        let terms = TermVector::new()
            .with("duration", duration)
            .with("payment-amount", payment);

        assert!((score(&terms, &party_a()) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weights_use_unweighted_fraction() {
        let constraints = ConstraintSet::new("Party B")
            .with_range("duration", 12.0, 18.0, 0.0)
            .with_one_of("security-tier", &["standard"], 0.0);
        let terms = TermVector::new()
            .with("duration", 12.0)
            .with("security-tier", "high");

        assert_eq!(score(&terms, &constraints), 0.5);
    }
}
