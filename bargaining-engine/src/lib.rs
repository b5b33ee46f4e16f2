pub mod control;
pub mod engine;
pub mod proposal;
pub mod strategy;

pub use control::{cancel_pair, CancelHandle, CancelToken, RoundControl, DEFAULT_ROUND_TIMEOUT};
pub use engine::{
    Bargain, BargainingEngine, BargainingParams, Impasse, NegotiationReport, Outcome, RoundStep,
};
pub use proposal::{Party, Proposal};
pub use strategy::{Accelerating, ConcessionContext, ConcessionStrategy, FixedStep};
