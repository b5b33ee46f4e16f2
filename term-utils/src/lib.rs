pub mod constraints;
mod validator;
mod vector;

pub use constraints::{ConstraintSet, DimensionConstraint, DimensionSpec, ValidationError};
pub use validator::{score, validate, Feasibility};
pub use vector::{TermValue, TermVector};
