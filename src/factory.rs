use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use contract_bargaining_engine::{
    Accelerating, BargainingEngine, BargainingParams, ConcessionStrategy, FixedStep,
    DEFAULT_ROUND_TIMEOUT,
};
use contract_term_utils::ConstraintSet;

use crate::audit::{AuditLog, JsonLinesSink};
use crate::deployment::{DeploymentConfig, DeploymentCoordinator, LedgerSink, SignatureProvider};
use crate::error::Error;
use crate::negotiators::{generate_id, SessionAddr};
use crate::session::NegotiationSession;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("BuiltIn concession strategy {0} doesn't exist.")]
    UnknownStrategy(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default)]
    pub params: serde_yaml::Value,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            name: "FixedStep".to_string(),
            params: serde_yaml::Value::Null,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BargainingConfig {
    pub max_rounds: u32,
    pub settle_ratio: f64,
    #[serde(with = "humantime_serde")]
    pub round_timeout: Duration,
    pub strategy: StrategyConfig,
}

impl Default for BargainingConfig {
    fn default() -> Self {
        let params = BargainingParams::default();
        BargainingConfig {
            max_rounds: params.max_rounds,
            settle_ratio: params.settle_ratio,
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            strategy: StrategyConfig::default(),
        }
    }
}

impl BargainingConfig {
    pub fn params(&self) -> BargainingParams {
        BargainingParams {
            max_rounds: self.max_rounds,
            settle_ratio: self.settle_ratio,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum AuditConfig {
    Memory,
    JsonLines { path: PathBuf },
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig::Memory
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NegotiationConfig {
    pub bargaining: BargainingConfig,
    pub deployment: DeploymentConfig,
    pub audit: AuditConfig,
}

impl NegotiationConfig {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<NegotiationConfig> {
        serde_yaml::from_str(yaml).context("Parsing negotiation config")
    }

    pub fn from_file(path: &Path) -> anyhow::Result<NegotiationConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Reading negotiation config: {}", path.display()))?;
        NegotiationConfig::from_yaml(&content)
            .with_context(|| format!("Loading negotiation config: {}", path.display()))
    }
}

pub fn create_builtin(
    name: &str,
    config: serde_yaml::Value,
) -> anyhow::Result<Arc<dyn ConcessionStrategy>> {
    let strategy = match name {
        "FixedStep" => Arc::new(FixedStep::new(config)?) as Arc<dyn ConcessionStrategy>,
        "Accelerating" => Arc::new(Accelerating::new(config)?) as Arc<dyn ConcessionStrategy>,
        _ => bail!(ConfigError::UnknownStrategy(name.to_string())),
    };
    Ok(strategy)
}

pub fn create_audit(config: &AuditConfig) -> anyhow::Result<Arc<AuditLog>> {
    let log = match config {
        AuditConfig::Memory => AuditLog::in_memory(),
        AuditConfig::JsonLines { path } => {
            let sink = JsonLinesSink::open(path)
                .with_context(|| format!("Opening audit log: {}", path.display()))?;
            AuditLog::new(Arc::new(sink))?
        }
    };
    Ok(Arc::new(log))
}

pub fn create_engine(config: &BargainingConfig) -> anyhow::Result<BargainingEngine> {
    let params = config.params();
    params.validate()?;

    let strategy = create_builtin(&config.strategy.name, config.strategy.params.clone())
        .with_context(|| format!("Creating concession strategy {}", config.strategy.name))?;
    Ok(BargainingEngine::new(strategy, params))
}

pub fn create_negotiations(
    config: NegotiationConfig,
    signatures: Arc<dyn SignatureProvider>,
    ledger: Arc<dyn LedgerSink>,
) -> anyhow::Result<Negotiations> {
    let engine = Arc::new(create_engine(&config.bargaining)?);
    let audit = create_audit(&config.audit)?;
    let coordinator = Arc::new(DeploymentCoordinator::new(
        signatures,
        ledger,
        audit.clone(),
        config.deployment,
    ));

    Ok(Negotiations {
        engine,
        coordinator,
        audit,
        round_timeout: config.bargaining.round_timeout,
    })
}

/// Entry point for opening negotiation sessions. All sessions share
/// bargaining engine, audit log and deployment coordinator.
pub struct Negotiations {
    engine: Arc<BargainingEngine>,
    coordinator: Arc<DeploymentCoordinator>,
    audit: Arc<AuditLog>,
    round_timeout: Duration,
}

impl Negotiations {
    pub fn open_session(&self, a: ConstraintSet, b: ConstraintSet) -> Result<SessionAddr, Error> {
        self.open_session_with_id(&generate_id(), a, b)
    }

    pub fn open_session_with_id(
        &self,
        session_id: &str,
        a: ConstraintSet,
        b: ConstraintSet,
    ) -> Result<SessionAddr, Error> {
        let session = NegotiationSession::open(session_id, a, b, self.audit.clone())?;
        Ok(SessionAddr::start(
            session,
            self.engine.clone(),
            self.coordinator.clone(),
            self.round_timeout,
        ))
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn engine(&self) -> &BargainingEngine {
        &self.engine
    }

    pub fn coordinator(&self) -> &Arc<DeploymentCoordinator> {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = NegotiationConfig::from_yaml("{}").unwrap();

        assert_eq!(config, NegotiationConfig::default());
        assert_eq!(config.bargaining.max_rounds, 30);
        assert_eq!(config.bargaining.round_timeout, Duration::from_secs(5));
        assert_eq!(config.deployment.signature_timeout, Duration::from_secs(10));
        assert_eq!(config.audit, AuditConfig::Memory);
    }

    #[test]
    fn test_full_config() {
        let config = NegotiationConfig::from_yaml(
            r#"
bargaining:
  max_rounds: 12
  settle_ratio: 0.1
  round_timeout: 300ms
  strategy:
    name: Accelerating
    params:
      step: 0.2
      growth: 2.0
deployment:
  signature_timeout: 2s
  signature_retry:
    attempts: 5
    initial_delay: 10ms
  additional_signatories: [Notary]
audit:
  type: JsonLines
  path: audit/negotiations.jsonl
"#,
        )
        .unwrap();

        assert_eq!(config.bargaining.max_rounds, 12);
        assert_eq!(config.bargaining.round_timeout, Duration::from_millis(300));
        assert_eq!(config.bargaining.strategy.name, "Accelerating");
        assert_eq!(config.deployment.signature_timeout, Duration::from_secs(2));
        assert_eq!(config.deployment.signature_retry.attempts, 5);
        assert_eq!(config.deployment.io_retry.attempts, 3);
        assert_eq!(config.deployment.additional_signatories, vec!["Notary"]);
        assert_eq!(
            config.audit,
            AuditConfig::JsonLines {
                path: PathBuf::from("audit/negotiations.jsonl")
            }
        );
        assert!(create_engine(&config.bargaining).is_ok());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = NegotiationConfig::default();
        let serialized = serde_yaml::to_string(&config).unwrap();
        println!("{}", serialized);

        assert_eq!(NegotiationConfig::from_yaml(&serialized).unwrap(), config);
    }

    #[test_case("FixedStep", "{ step: 0.5 }", true)]
    #[test_case("Accelerating", "~", true)]
    #[test_case("FixedStep", "{ step: 2.0 }", false)]
    #[test_case("Boulware", "~", false)]
    fn test_create_builtin(name: &str, params: &str, valid: bool) {
        let result = create_builtin(name, serde_yaml::from_str(params).unwrap());
        assert_eq!(result.is_ok(), valid);
    }

    #[test]
    fn test_unknown_strategy_error() {
        let error = create_builtin("Boulware", serde_yaml::Value::Null)
            .err()
            .unwrap();

        assert_eq!(
            error.downcast_ref::<ConfigError>(),
            Some(&ConfigError::UnknownStrategy("Boulware".to_string()))
        );
    }

    #[test]
    fn test_invalid_settle_ratio() {
        let config = BargainingConfig {
            settle_ratio: 0.0,
            ..Default::default()
        };
        assert!(create_engine(&config).is_err());
    }
}
