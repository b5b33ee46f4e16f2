use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use contract_term_utils::TermVector;

use crate::audit::{AuditKind, AuditLog};
use crate::retry::{retry, RetryPolicy};
use crate::session::{NegotiationSession, SessionError, SessionState};

pub const DEFAULT_SIGNATURE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureOutcome {
    Signed,
    Declined,
    Timeout,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Pending,
    Signed,
    Declined,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    #[display(fmt = "pending")]
    Pending,
    #[display(fmt = "committed")]
    Committed,
    #[display(fmt = "deployment_failed")]
    DeploymentFailed,
}

/// Collects signatures from contract signatories. `Err` means the provider
/// couldn't be reached, not that signatory refused.
#[async_trait(?Send)]
pub trait SignatureProvider {
    async fn acquire_signature(
        &self,
        contract_id: &str,
        signatory: &str,
    ) -> anyhow::Result<SignatureOutcome>;
}

/// Final destination of signed contracts. Contract id is idempotency key,
/// so committing the same record twice must return the same reference.
#[async_trait(?Send)]
pub trait LedgerSink {
    async fn commit(&self, record: &ContractRecord) -> anyhow::Result<String>;
}

#[derive(thiserror::Error, Debug)]
pub enum DeploymentError {
    #[error("Can't deploy session [{session_id}] in state '{state}'. {reason}")]
    PreconditionFailed {
        session_id: String,
        state: SessionState,
        reason: String,
    },
    #[error("Deployment of contract [{contract_id}] interrupted, record stays pending. {reason}")]
    Infrastructure { contract_id: String, reason: String },
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub id: String,
    pub session_id: String,
    pub terms: TermVector,
    pub signatories: Vec<String>,
    pub signatures: BTreeMap<String, SignatureStatus>,
    pub state: DeploymentState,
    pub ledger_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContractRecord {
    fn new(session_id: &str, terms: &TermVector, signatories: Vec<String>) -> ContractRecord {
        ContractRecord {
            id: contract_id(session_id, terms),
            session_id: session_id.to_string(),
            terms: terms.clone(),
            signatures: signatories
                .iter()
                .map(|signatory| (signatory.clone(), SignatureStatus::Pending))
                .collect(),
            signatories,
            state: DeploymentState::Pending,
            ledger_ref: None,
            created_at: Utc::now(),
        }
    }

    pub fn unsigned(&self) -> Vec<String> {
        self.signatories
            .iter()
            .filter(|signatory| self.signatures.get(*signatory) != Some(&SignatureStatus::Signed))
            .cloned()
            .collect()
    }

    pub fn declined_by(&self) -> Vec<String> {
        self.signatures
            .iter()
            .filter(|(_, status)| **status == SignatureStatus::Declined)
            .map(|(signatory, _)| signatory.clone())
            .collect()
    }
}

/// Content address of the contract: the same session and terms always
/// produce the same id.
pub fn contract_id(session_id: &str, terms: &TermVector) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(terms.digest().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    #[serde(with = "humantime_serde")]
    pub signature_timeout: Duration,
    /// Backoff applied to signature requests that timed out.
    pub signature_retry: RetryPolicy,
    /// Backoff applied to I/O failures of signature provider and ledger.
    pub io_retry: RetryPolicy,
    /// Signatories required in addition to both negotiating parties.
    pub additional_signatories: Vec<String>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        DeploymentConfig {
            signature_timeout: DEFAULT_SIGNATURE_TIMEOUT,
            signature_retry: RetryPolicy::default(),
            io_retry: RetryPolicy::default(),
            additional_signatories: vec![],
        }
    }
}

enum Collected {
    AllSigned,
    Declined(String),
}

/// Turns approved sessions into committed contracts. Each contract is
/// deployed at most once; repeated calls return the stored record.
pub struct DeploymentCoordinator {
    signatures: Arc<dyn SignatureProvider>,
    ledger: Arc<dyn LedgerSink>,
    audit: Arc<AuditLog>,
    config: DeploymentConfig,
    records: Mutex<HashMap<String, Arc<tokio::sync::Mutex<ContractRecord>>>>,
}

impl DeploymentCoordinator {
    pub fn new(
        signatures: Arc<dyn SignatureProvider>,
        ledger: Arc<dyn LedgerSink>,
        audit: Arc<AuditLog>,
        config: DeploymentConfig,
    ) -> DeploymentCoordinator {
        DeploymentCoordinator {
            signatures,
            ledger,
            audit,
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    pub async fn record(&self, contract_id: &str) -> Option<ContractRecord> {
        let slot = self.slot(contract_id).ok()??;
        let record = slot.lock().await;
        Some(record.clone())
    }

    pub async fn deploy(
        &self,
        session: &mut NegotiationSession,
    ) -> Result<ContractRecord, DeploymentError> {
        let terms = match session.final_terms() {
            Some(terms) => terms.clone(),
            None => {
                return Err(DeploymentError::PreconditionFailed {
                    session_id: session.id().to_string(),
                    state: session.state(),
                    reason: "Session has no agreed terms.".to_string(),
                })
            }
        };

        let id = contract_id(session.id(), &terms);
        let (slot, created) = self.slot_or_insert(session, &id, &terms)?;
        let mut record = slot.lock().await;

        match record.state {
            DeploymentState::Committed | DeploymentState::DeploymentFailed => {
                log::info!(
                    "[{}] Contract [{}] already {}. Returning stored record.",
                    session.id(),
                    id,
                    record.state
                );
                sync_session(session, &record)?;
                return Ok(record.clone());
            }
            DeploymentState::Pending => (),
        }

        if created {
            let created = self
                .append_audit(
                    &record.id,
                    AuditKind::ContractCreated,
                    serde_json::json!({
                        "session_id": record.session_id,
                        "terms": record.terms,
                        "signatories": record.signatories,
                    }),
                )
                .await;
            if let Err(e) = created {
                drop(record);
                self.forget(&id);
                return Err(e);
            }
        } else {
            log::info!(
                "[{}] Resuming deployment of contract [{}]. Unsigned: [{}].",
                session.id(),
                id,
                record.unsigned().join(", ")
            );
        }

        if session.state() == SessionState::Approved {
            session.begin_deployment(&id)?;
        }

        match self.collect_signatures(&mut record).await? {
            Collected::Declined(signatory) => {
                let reason = format!("Signatory '{signatory}' declined.");
                self.append_audit(
                    &record.id,
                    AuditKind::ContractFailed,
                    serde_json::json!({ "declined_by": signatory, "reason": reason }),
                )
                .await?;
                record.state = DeploymentState::DeploymentFailed;
                log::warn!("[{}] Contract [{}] deployment failed. {}", session.id(), id, reason);

                session.fail_deployment(&id, &reason)?;
                Ok(record.clone())
            }
            Collected::AllSigned => {
                let snapshot = record.clone();
                let ledger = self.ledger.clone();
                let ledger_ref = retry(&self.config.io_retry, "Ledger commit", || {
                    let ledger = ledger.clone();
                    let snapshot = snapshot.clone();
                    async move { ledger.commit(&snapshot).await }
                })
                .await
                .map_err(|e| DeploymentError::Infrastructure {
                    contract_id: id.clone(),
                    reason: format!("Ledger commit failed. {e}"),
                })?;

                self.append_audit(
                    &record.id,
                    AuditKind::ContractCommitted,
                    serde_json::json!({ "ledger_ref": ledger_ref }),
                )
                .await?;
                record.state = DeploymentState::Committed;
                record.ledger_ref = Some(ledger_ref.clone());
                log::info!(
                    "[{}] Contract [{}] committed to ledger as {}.",
                    session.id(),
                    id,
                    ledger_ref
                );

                session.complete_deployment(&id, &ledger_ref)?;
                Ok(record.clone())
            }
        }
    }

    fn slot(
        &self,
        id: &str,
    ) -> Result<Option<Arc<tokio::sync::Mutex<ContractRecord>>>, DeploymentError> {
        Ok(self.lock_records(id)?.get(id).cloned())
    }

    /// Returns record slot and information, if it was created by this call.
    fn slot_or_insert(
        &self,
        session: &NegotiationSession,
        id: &str,
        terms: &TermVector,
    ) -> Result<(Arc<tokio::sync::Mutex<ContractRecord>>, bool), DeploymentError> {
        let mut records = self.lock_records(id)?;
        if let Some(slot) = records.get(id) {
            return Ok((slot.clone(), false));
        }

        if session.state() != SessionState::Approved {
            return Err(DeploymentError::PreconditionFailed {
                session_id: session.id().to_string(),
                state: session.state(),
                reason: "Only approved sessions can be deployed.".to_string(),
            });
        }

        let record = ContractRecord::new(session.id(), terms, self.signatories(session));
        let slot = Arc::new(tokio::sync::Mutex::new(record));
        records.insert(id.to_string(), slot.clone());
        Ok((slot, true))
    }

    fn forget(&self, id: &str) {
        if let Ok(mut records) = self.lock_records(id) {
            records.remove(id);
        }
    }

    fn lock_records(
        &self,
        id: &str,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<ContractRecord>>>>, DeploymentError>
    {
        self.records
            .lock()
            .map_err(|_| DeploymentError::Infrastructure {
                contract_id: id.to_string(),
                reason: "Contract store lock poisoned.".to_string(),
            })
    }

    fn signatories(&self, session: &NegotiationSession) -> Vec<String> {
        let mut signatories = vec![session.party_a().party.clone(), session.party_b().party.clone()];
        for signatory in &self.config.additional_signatories {
            if !signatories.contains(signatory) {
                signatories.push(signatory.clone());
            }
        }
        signatories
    }

    /// Sink failures are retried with `io_retry`. Once exhausted, the contract
    /// stays as it was before the entry.
    async fn append_audit(
        &self,
        contract_id: &str,
        kind: AuditKind,
        payload: serde_json::Value,
    ) -> Result<(), DeploymentError> {
        retry(&self.config.io_retry, "Audit append", || {
            let payload = payload.clone();
            async move {
                self.audit.record(contract_id, kind, payload)?;
                Ok(())
            }
        })
        .await
        .map_err(|e| DeploymentError::Infrastructure {
            contract_id: contract_id.to_string(),
            reason: format!("Audit append of {kind} failed. {e}"),
        })
    }

    /// Requests all outstanding signatures concurrently. Stops at the first decline.
    async fn collect_signatures(
        &self,
        record: &mut ContractRecord,
    ) -> Result<Collected, DeploymentError> {
        // Decline recorded before interruption is final.
        if let Some(signatory) = record.declined_by().into_iter().next() {
            return Ok(Collected::Declined(signatory));
        }

        let mut requests = record
            .unsigned()
            .into_iter()
            .map(|signatory| {
                let id = record.id.clone();
                async move {
                    let result = self.request_signature(&id, &signatory).await;
                    (signatory, result)
                }
            })
            .collect::<FuturesUnordered<_>>();

        while let Some((signatory, result)) = requests.next().await {
            let status = result.map_err(|e| DeploymentError::Infrastructure {
                contract_id: record.id.clone(),
                reason: format!("Signature request for '{signatory}' failed. {e}"),
            })?;

            self.append_audit(
                &record.id,
                AuditKind::SignatureRecorded,
                serde_json::json!({ "signatory": signatory, "status": status }),
            )
            .await?;
            record.signatures.insert(signatory.clone(), status);
            log::debug!("[{}] Signature of '{}': {}.", record.id, signatory, status);

            if status == SignatureStatus::Declined {
                return Ok(Collected::Declined(signatory));
            }
        }
        Ok(Collected::AllSigned)
    }

    /// Timeouts are retried with `signature_retry` and, once exhausted,
    /// count as decline. I/O errors are retried with `io_retry`.
    async fn request_signature(
        &self,
        contract_id: &str,
        signatory: &str,
    ) -> anyhow::Result<SignatureStatus> {
        let mut timeouts = 0;
        let mut failures = 0;
        loop {
            let request = self.signatures.acquire_signature(contract_id, signatory);
            let outcome = match tokio::time::timeout(self.config.signature_timeout, request).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    failures += 1;
                    if failures >= self.config.io_retry.attempts() {
                        return Err(e);
                    }
                    let delay = self.config.io_retry.delay(failures);
                    log::warn!(
                        "[{contract_id}] Signature request for '{signatory}' failed. Retrying in {delay:?}. {e}"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(_) => SignatureOutcome::Timeout,
            };

            match outcome {
                SignatureOutcome::Signed => return Ok(SignatureStatus::Signed),
                SignatureOutcome::Declined => return Ok(SignatureStatus::Declined),
                SignatureOutcome::Timeout => {
                    timeouts += 1;
                    if timeouts >= self.config.signature_retry.attempts() {
                        log::warn!(
                            "[{contract_id}] Signature of '{signatory}' timed out {timeouts} time(s). Treating as declined."
                        );
                        return Ok(SignatureStatus::Declined);
                    }
                    tokio::time::sleep(self.config.signature_retry.delay(timeouts)).await;
                }
            }
        }
    }
}

/// Moves session to terminal state matching already finished contract.
fn sync_session(
    session: &mut NegotiationSession,
    record: &ContractRecord,
) -> Result<(), DeploymentError> {
    if session.state() == SessionState::Approved {
        session.begin_deployment(&record.id)?;
    }
    if session.state() != SessionState::Deploying {
        return Ok(());
    }

    match record.state {
        DeploymentState::Committed => {
            let ledger_ref = record.ledger_ref.clone().unwrap_or_default();
            session.complete_deployment(&record.id, &ledger_ref)?
        }
        DeploymentState::DeploymentFailed => session.fail_deployment(
            &record.id,
            &format!("Declined by [{}].", record.declined_by().join(", ")),
        )?,
        DeploymentState::Pending => (),
    }
    Ok(())
}
