use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use contract_negotiators::factory::{create_negotiations, AuditConfig};
use contract_negotiators::retry::RetryPolicy;
use contract_negotiators::{NegotiationConfig, Negotiations};

use crate::ledger::RecordingLedger;
use crate::prepare_test_dir;
use crate::signatures::ScriptedSignatureProvider;

/// Builds negotiation service with scripted collaborators, that tests can
/// inspect after running.
pub struct Framework {
    pub test_dir: PathBuf,
    pub config: NegotiationConfig,

    pub signatures: Arc<ScriptedSignatureProvider>,
    pub ledger: Arc<RecordingLedger>,
}

impl Framework {
    pub fn new(test_name: &str) -> anyhow::Result<Framework> {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut config = NegotiationConfig::default();
        config.bargaining.round_timeout = Duration::from_secs(2);
        config.deployment.signature_timeout = Duration::from_millis(200);
        config.deployment.signature_retry = RetryPolicy::immediate(2);
        config.deployment.io_retry = RetryPolicy::immediate(2);

        Ok(Framework {
            test_dir: prepare_test_dir(test_name)?,
            config,
            signatures: Arc::new(ScriptedSignatureProvider::new()),
            ledger: Arc::new(RecordingLedger::new()),
        })
    }

    pub fn with_config(mut self, config: NegotiationConfig) -> Self {
        self.config = config;
        self
    }

    /// Stores audit log in test directory instead of memory.
    pub fn with_file_audit(mut self) -> Self {
        self.config.audit = AuditConfig::JsonLines {
            path: self.audit_path(),
        };
        self
    }

    pub fn audit_path(&self) -> PathBuf {
        self.test_dir.join("audit.jsonl")
    }

    /// Creates service sharing collaborators with previously built ones.
    pub fn build(&self) -> anyhow::Result<Negotiations> {
        create_negotiations(
            self.config.clone(),
            self.signatures.clone(),
            self.ledger.clone(),
        )
    }
}
