use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use contract_negotiators::{SignatureOutcome, SignatureProvider};

/// Single scripted reaction of a signatory.
#[derive(Clone, Debug, PartialEq)]
pub enum SignatureScript {
    Sign,
    Decline,
    Timeout,
    /// Provider can't be reached.
    Fail(String),
    /// Never answers. Request ends only by coordinator's timeout.
    Hang,
}

/// Signature provider answering according to per signatory scripts.
/// Signatories without script, or with exhausted one, sign.
#[derive(Default)]
pub struct ScriptedSignatureProvider {
    scripts: Mutex<HashMap<String, VecDeque<SignatureScript>>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedSignatureProvider {
    pub fn new() -> ScriptedSignatureProvider {
        ScriptedSignatureProvider::default()
    }

    pub fn script(&self, signatory: &str, reactions: Vec<SignatureScript>) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(signatory.to_string())
            .or_default()
            .extend(reactions);
        self
    }

    /// Every answer is delayed, so concurrent requests overlap.
    pub fn with_delay(&self, delay: Duration) -> &Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// All requests as (contract id, signatory) pairs.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, signatory: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, name)| name == signatory)
            .count()
    }

    fn next(&self, signatory: &str) -> SignatureScript {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(signatory)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(SignatureScript::Sign)
    }
}

#[async_trait(?Send)]
impl SignatureProvider for ScriptedSignatureProvider {
    async fn acquire_signature(
        &self,
        contract_id: &str,
        signatory: &str,
    ) -> anyhow::Result<SignatureOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((contract_id.to_string(), signatory.to_string()));

        let reaction = self.next(signatory);
        log::debug!("Signatory '{signatory}' reacts to contract [{contract_id}] with {reaction:?}.");

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reaction {
            SignatureScript::Sign => Ok(SignatureOutcome::Signed),
            SignatureScript::Decline => Ok(SignatureOutcome::Declined),
            SignatureScript::Timeout => Ok(SignatureOutcome::Timeout),
            SignatureScript::Fail(reason) => anyhow::bail!(reason),
            SignatureScript::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(SignatureOutcome::Timeout)
            }
        }
    }
}
