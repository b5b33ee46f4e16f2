pub mod audit;
pub mod deployment;
mod driver;
mod error;
pub mod factory;
mod negotiators;
pub mod retry;
pub mod session;

pub use audit::{AuditEntry, AuditKind, AuditLog, AuditSink, JsonLinesSink, MemorySink};
pub use deployment::{
    ContractRecord, DeploymentCoordinator, DeploymentState, LedgerSink, SignatureOutcome,
    SignatureProvider, SignatureStatus,
};
pub use driver::run_negotiation;
pub use error::Error;
pub use factory::{create_negotiations, NegotiationConfig, Negotiations};
pub use negotiators::{generate_id, Deploy, GetProposals, Negotiate, SessionActor, SessionAddr};
pub use session::{NegotiationSession, SessionError, SessionState, SessionStatus};

pub mod engine {
    pub use contract_bargaining_engine::*;
}

pub mod terms {
    pub use contract_term_utils::*;
}
