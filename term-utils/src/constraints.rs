use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::vector::{TermValue, TermVector};

#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Constraint set must name the party it belongs to.")]
    MissingParty,
    #[error("Constraint set of party '{party}' has no dimensions.")]
    Empty { party: String },
    #[error("Party '{party}': weight of dimension '{dimension}' must be non-negative number, got {weight}.")]
    InvalidWeight {
        party: String,
        dimension: String,
        weight: f64,
    },
    #[error("Party '{party}': range of dimension '{dimension}' is inverted or not finite [{min}, {max}].")]
    InvertedRange {
        party: String,
        dimension: String,
        min: f64,
        max: f64,
    },
    #[error("Party '{party}': dimension '{dimension}' doesn't list any acceptable value.")]
    EmptyChoice { party: String, dimension: String },
    #[error("Party '{party}': dimension '{dimension}' lists value '{value}' more than once.")]
    DuplicateChoice {
        party: String,
        dimension: String,
        value: String,
    },
}

/// Acceptable values of single dimension from one party's point of view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DimensionConstraint {
    /// Inclusive numeric range.
    Range { min: f64, max: f64 },
    /// Discrete values, most preferred first.
    OneOf(Vec<String>),
}

impl DimensionConstraint {
    pub fn accepts(&self, value: &TermValue) -> bool {
        match (self, value) {
            (DimensionConstraint::Range { min, max }, TermValue::Number(number)) => {
                *min <= *number && *number <= *max
            }
            (DimensionConstraint::OneOf(values), TermValue::Label(label)) => {
                values.iter().any(|value| value == label)
            }
            _ => false,
        }
    }

    /// Value party would propose without any concession.
    pub fn preferred(&self) -> TermValue {
        match self {
            DimensionConstraint::Range { min, max } => TermValue::Number(min + (max - min) / 2.0),
            DimensionConstraint::OneOf(values) => {
                TermValue::Label(values.first().cloned().unwrap_or_default())
            }
        }
    }

    /// Checks if there is at least one value acceptable for both constraints.
    /// Ranges touching at single point still intersect.
    pub fn intersects(&self, other: &DimensionConstraint) -> bool {
        match (self, other) {
            (
                DimensionConstraint::Range { min, max },
                DimensionConstraint::Range {
                    min: other_min,
                    max: other_max,
                },
            ) => min.max(*other_min) <= max.min(*other_max),
            (DimensionConstraint::OneOf(values), DimensionConstraint::OneOf(other)) => {
                values.iter().any(|value| other.contains(value))
            }
            _ => false,
        }
    }

    /// Clamps numeric value into the range. Non numeric constraints return value unchanged.
    pub fn clamp(&self, value: f64) -> f64 {
        match self {
            DimensionConstraint::Range { min, max } => value.max(*min).min(*max),
            DimensionConstraint::OneOf(_) => value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DimensionSpec {
    /// Written as single entry map, e.g. `range: { min: 1, max: 2 }` or `one-of: [a, b]`.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub constraint: DimensionConstraint,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Party's acceptable ranges or values together with weights
/// used for scoring proposals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    pub party: String,
    #[serde(default)]
    pub dimensions: BTreeMap<String, DimensionSpec>,
}

impl ConstraintSet {
    pub fn new(party: impl ToString) -> ConstraintSet {
        ConstraintSet {
            party: party.to_string(),
            dimensions: BTreeMap::new(),
        }
    }

    pub fn with_range(self, dimension: impl ToString, min: f64, max: f64, weight: f64) -> Self {
        self.with(dimension, DimensionConstraint::Range { min, max }, weight)
    }

    pub fn with_one_of(self, dimension: impl ToString, values: &[&str], weight: f64) -> Self {
        let values = values.iter().map(|value| value.to_string()).collect();
        self.with(dimension, DimensionConstraint::OneOf(values), weight)
    }

    pub fn with(
        mut self,
        dimension: impl ToString,
        constraint: DimensionConstraint,
        weight: f64,
    ) -> Self {
        self.dimensions
            .insert(dimension.to_string(), DimensionSpec { constraint, weight });
        self
    }

    pub fn get(&self, dimension: &str) -> Option<&DimensionSpec> {
        self.dimensions.get(dimension)
    }

    pub fn constraint(&self, dimension: &str) -> Option<&DimensionConstraint> {
        self.get(dimension).map(|spec| &spec.constraint)
    }

    pub fn dimensions(&self) -> impl Iterator<Item = (&str, &DimensionSpec)> {
        self.dimensions
            .iter()
            .map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn total_weight(&self) -> f64 {
        self.dimensions.values().map(|spec| spec.weight).sum()
    }

    pub fn max_weight(&self) -> f64 {
        self.dimensions
            .values()
            .map(|spec| spec.weight)
            .fold(0.0, f64::max)
    }

    /// Seed vector: midpoint of every range and first listed discrete value.
    pub fn preferred(&self) -> TermVector {
        self.dimensions
            .iter()
            .map(|(name, spec)| (name.clone(), spec.constraint.preferred()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.party.trim().is_empty() {
            return Err(ValidationError::MissingParty);
        }
        if self.dimensions.is_empty() {
            return Err(ValidationError::Empty {
                party: self.party.clone(),
            });
        }

        for (dimension, spec) in &self.dimensions {
            if !spec.weight.is_finite() || spec.weight < 0.0 {
                return Err(ValidationError::InvalidWeight {
                    party: self.party.clone(),
                    dimension: dimension.clone(),
                    weight: spec.weight,
                });
            }

            match &spec.constraint {
                DimensionConstraint::Range { min, max } => {
                    if !min.is_finite() || !max.is_finite() || min > max {
                        return Err(ValidationError::InvertedRange {
                            party: self.party.clone(),
                            dimension: dimension.clone(),
                            min: *min,
                            max: *max,
                        });
                    }
                }
                DimensionConstraint::OneOf(values) => {
                    if values.is_empty() {
                        return Err(ValidationError::EmptyChoice {
                            party: self.party.clone(),
                            dimension: dimension.clone(),
                        });
                    }
                    let mut seen = HashSet::new();
                    if let Some(value) = values.iter().find(|value| !seen.insert(value.as_str())) {
                        return Err(ValidationError::DuplicateChoice {
                            party: self.party.clone(),
                            dimension: dimension.clone(),
                            value: value.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
