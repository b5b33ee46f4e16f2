use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use contract_bargaining_engine::{Impasse, NegotiationReport, Outcome, Proposal};
use contract_term_utils::{ConstraintSet, TermVector, ValidationError};

use crate::audit::{AuditError, AuditKind, AuditLog};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[display(fmt = "created")]
    Created,
    #[display(fmt = "negotiating")]
    Negotiating,
    #[display(fmt = "approved")]
    Approved,
    #[display(fmt = "failed")]
    Failed,
    #[display(fmt = "deploying")]
    Deploying,
    #[display(fmt = "deployed")]
    Deployed,
    #[display(fmt = "deployment_failed")]
    DeploymentFailed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Failed | SessionState::Deployed | SessionState::DeploymentFailed
        )
    }

    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Created, Negotiating)
                | (Negotiating, Approved)
                | (Negotiating, Failed)
                | (Approved, Deploying)
                | (Deploying, Deployed)
                | (Deploying, DeploymentFailed)
        )
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Invalid session transition from '{from}' to '{to}'.")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
    #[error("Proposal of round {got} is out of order, expected round {expected}.")]
    OutOfOrderProposal { expected: u32, got: u32 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Failed to audit session change. {0}")]
    Audit(#[from] AuditError),
}

/// Read-only view of the session published to observers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionState,
    pub current_round: u32,
    pub final_terms: Option<TermVector>,
    pub contract_id: Option<String>,
    pub impasse: Option<Impasse>,
}

/// Lifecycle of negotiation between two parties. Every accepted change is
/// written to the audit log before it is applied.
pub struct NegotiationSession {
    id: String,
    party_a: ConstraintSet,
    party_b: ConstraintSet,
    proposals: Vec<Proposal>,
    state: SessionState,
    final_terms: Option<TermVector>,
    contract_id: Option<String>,
    impasse: Option<Impasse>,

    audit: Arc<AuditLog>,
    status: watch::Sender<SessionStatus>,
}

impl NegotiationSession {
    pub fn open(
        id: impl ToString,
        party_a: ConstraintSet,
        party_b: ConstraintSet,
        audit: Arc<AuditLog>,
    ) -> Result<NegotiationSession, SessionError> {
        party_a.validate()?;
        party_b.validate()?;

        let id = id.to_string();
        audit.record(
            &id,
            AuditKind::SessionOpened,
            serde_json::json!({
                "party_a": party_a,
                "party_b": party_b,
            }),
        )?;

        log::info!(
            "[{}] Negotiation session opened between '{}' and '{}'.",
            id,
            party_a.party,
            party_b.party
        );

        let (status, _) = watch::channel(SessionStatus {
            session_id: id.clone(),
            state: SessionState::Created,
            current_round: 0,
            final_terms: None,
            contract_id: None,
            impasse: None,
        });

        Ok(NegotiationSession {
            id,
            party_a,
            party_b,
            proposals: vec![],
            state: SessionState::Created,
            final_terms: None,
            contract_id: None,
            impasse: None,
            audit,
            status,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn party_a(&self) -> &ConstraintSet {
        &self.party_a
    }

    pub fn party_b(&self) -> &ConstraintSet {
        &self.party_b
    }

    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }

    pub fn final_terms(&self) -> Option<&TermVector> {
        self.final_terms.as_ref()
    }

    pub fn contract_id(&self) -> Option<&str> {
        self.contract_id.as_deref()
    }

    pub fn impasse(&self) -> Option<&Impasse> {
        self.impasse.as_ref()
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            state: self.state,
            current_round: self.proposals.last().map(|p| p.round).unwrap_or(0),
            final_terms: self.final_terms.clone(),
            contract_id: self.contract_id.clone(),
            impasse: self.impasse.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn begin_negotiation(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Negotiating, serde_json::Value::Null)
    }

    /// Appends proposal made in the current negotiation. Proposals already
    /// recorded are skipped, so the driver can record them as they come and
    /// then conclude with the full report.
    pub fn record_proposal(&mut self, proposal: &Proposal) -> Result<(), SessionError> {
        if self.state != SessionState::Negotiating {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::Negotiating,
            });
        }
        let expected = self.proposals.len() as u32 + 1;
        if proposal.round < expected {
            return Ok(());
        }
        if proposal.round > expected {
            return Err(SessionError::OutOfOrderProposal {
                expected,
                got: proposal.round,
            });
        }

        self.audit.record(
            &self.id,
            AuditKind::ProposalRecorded,
            serde_json::to_value(proposal).map_err(AuditError::from)?,
        )?;
        self.proposals.push(proposal.clone());
        self.publish();
        Ok(())
    }

    /// Records negotiation result. Converged negotiation approves the
    /// session, any impasse fails it.
    pub fn conclude(&mut self, report: &NegotiationReport) -> Result<(), SessionError> {
        let to = match &report.outcome {
            Outcome::Converged { .. } => SessionState::Approved,
            Outcome::Impasse(_) => SessionState::Failed,
        };
        self.check_transition(to)?;

        for proposal in &report.proposals {
            self.record_proposal(proposal)?;
        }

        match &report.outcome {
            Outcome::Converged { terms, round } => {
                self.transition(
                    SessionState::Approved,
                    serde_json::json!({
                        "round": round,
                        "terms": terms,
                        "digest": terms.digest(),
                    }),
                )?;
                self.final_terms = Some(terms.clone());
            }
            Outcome::Impasse(impasse) => {
                self.transition(
                    SessionState::Failed,
                    serde_json::json!({
                        "impasse": impasse,
                        "reason": impasse.to_string(),
                        "cancelled": matches!(impasse, Impasse::Cancelled { .. }),
                    }),
                )?;
                self.impasse = Some(impasse.clone());
            }
        }
        self.publish();
        Ok(())
    }

    pub fn begin_deployment(&mut self, contract_id: &str) -> Result<(), SessionError> {
        self.transition(
            SessionState::Deploying,
            serde_json::json!({ "contract_id": contract_id }),
        )?;
        self.contract_id = Some(contract_id.to_string());
        self.publish();
        Ok(())
    }

    pub fn complete_deployment(
        &mut self,
        contract_id: &str,
        ledger_ref: &str,
    ) -> Result<(), SessionError> {
        self.transition(
            SessionState::Deployed,
            serde_json::json!({
                "contract_id": contract_id,
                "ledger_ref": ledger_ref,
            }),
        )?;
        self.contract_id = Some(contract_id.to_string());
        self.publish();
        Ok(())
    }

    pub fn fail_deployment(&mut self, contract_id: &str, reason: &str) -> Result<(), SessionError> {
        self.transition(
            SessionState::DeploymentFailed,
            serde_json::json!({
                "contract_id": contract_id,
                "reason": reason,
            }),
        )?;
        self.contract_id = Some(contract_id.to_string());
        self.publish();
        Ok(())
    }

    fn check_transition(&self, to: SessionState) -> Result<(), SessionError> {
        match self.state.can_transition_to(to) {
            true => Ok(()),
            false => Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            }),
        }
    }

    fn transition(
        &mut self,
        to: SessionState,
        details: serde_json::Value,
    ) -> Result<(), SessionError> {
        self.check_transition(to)?;

        let from = self.state;
        self.audit.record(
            &self.id,
            AuditKind::StateTransition,
            serde_json::json!({
                "from": from,
                "to": to,
                "details": details,
            }),
        )?;

        self.state = to;
        log::info!("[{}] Session state changed: {} -> {}.", self.id, from, to);

        self.publish();
        Ok(())
    }

    fn publish(&self) {
        self.status.send_replace(self.status());
    }
}
