use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Information available to strategy, when proposer moves single dimension.
#[derive(Clone, Debug)]
pub struct ConcessionContext<'a> {
    pub round: u32,
    pub max_rounds: u32,
    pub dimension: &'a str,
    /// Proposer's weight of the dimension.
    pub weight: f64,
    /// Highest weight in proposer's constraint set.
    pub max_weight: f64,
}

/// Decides how far proposer moves toward counterparty's position.
///
/// Strategies are called from blocking thread pool, so they can't assume
/// anything about async runtime, but they should still return quickly,
/// because every round is limited by timeout.
pub trait ConcessionStrategy: Send + Sync {
    /// Fraction of the remaining gap on dimension, that proposer gives up
    /// in this round. Values are clamped to [0, 1] by the engine.
    fn fraction(&self, ctx: &ConcessionContext) -> f64;

    /// Lower bound of values returned by `fraction`. Engine uses it to
    /// compute maximal number of rounds needed for convergence.
    fn min_fraction(&self) -> f64;
}

fn asymmetry_factor(weight_asymmetry: f64, ctx: &ConcessionContext) -> f64 {
    if ctx.max_weight > 0.0 {
        1.0 - weight_asymmetry * (ctx.weight / ctx.max_weight)
    } else {
        1.0
    }
}

fn check_common(step: f64, weight_asymmetry: f64) -> anyhow::Result<()> {
    if !(step > 0.0 && step <= 1.0) {
        bail!("Concession step must be in range (0, 1], got {step}.");
    }
    if !(0.0..1.0).contains(&weight_asymmetry) {
        bail!("Weight asymmetry must be in range [0, 1), got {weight_asymmetry}.");
    }
    Ok(())
}

/// Concedes fixed fraction of the remaining gap in every round.
#[derive(Clone, Debug, PartialEq)]
pub struct FixedStep {
    config: FixedStepConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedStepConfig {
    pub step: f64,
    /// Party concedes `weight_asymmetry` less on its most important dimension.
    pub weight_asymmetry: f64,
}

impl Default for FixedStepConfig {
    fn default() -> Self {
        FixedStepConfig {
            step: 0.25,
            weight_asymmetry: 0.0,
        }
    }
}

impl FixedStep {
    pub fn new(config: serde_yaml::Value) -> anyhow::Result<FixedStep> {
        let config: FixedStepConfig = match config {
            serde_yaml::Value::Null => FixedStepConfig::default(),
            config => serde_yaml::from_value(config)?,
        };
        FixedStep::from_config(config)
    }

    pub fn from_config(config: FixedStepConfig) -> anyhow::Result<FixedStep> {
        check_common(config.step, config.weight_asymmetry)?;
        Ok(FixedStep { config })
    }

    pub fn with_step(step: f64) -> anyhow::Result<FixedStep> {
        FixedStep::from_config(FixedStepConfig {
            step,
            ..Default::default()
        })
    }
}

impl Default for FixedStep {
    fn default() -> Self {
        FixedStep {
            config: FixedStepConfig::default(),
        }
    }
}

impl ConcessionStrategy for FixedStep {
    fn fraction(&self, ctx: &ConcessionContext) -> f64 {
        self.config.step * asymmetry_factor(self.config.weight_asymmetry, ctx)
    }

    fn min_fraction(&self) -> f64 {
        self.config.step * (1.0 - self.config.weight_asymmetry)
    }
}

/// Concedes more with every round. Step grows linearly from `step`
/// in the first round to `step * (1 + growth)` in the last allowed round.
#[derive(Clone, Debug, PartialEq)]
pub struct Accelerating {
    config: AcceleratingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratingConfig {
    pub step: f64,
    pub growth: f64,
    pub weight_asymmetry: f64,
}

impl Default for AcceleratingConfig {
    fn default() -> Self {
        AcceleratingConfig {
            step: 0.1,
            growth: 4.0,
            weight_asymmetry: 0.0,
        }
    }
}

impl Accelerating {
    pub fn new(config: serde_yaml::Value) -> anyhow::Result<Accelerating> {
        let config: AcceleratingConfig = match config {
            serde_yaml::Value::Null => AcceleratingConfig::default(),
            config => serde_yaml::from_value(config)?,
        };
        check_common(config.step, config.weight_asymmetry)?;
        if !(config.growth >= 0.0 && config.growth.is_finite()) {
            bail!("Concession growth must be non-negative, got {}.", config.growth);
        }
        Ok(Accelerating { config })
    }
}

impl ConcessionStrategy for Accelerating {
    fn fraction(&self, ctx: &ConcessionContext) -> f64 {
        let progress = match ctx.max_rounds {
            0 | 1 => 0.0,
            max => (ctx.round.saturating_sub(1) as f64 / (max - 1) as f64).min(1.0),
        };
        let step = (self.config.step * (1.0 + self.config.growth * progress)).min(1.0);
        step * asymmetry_factor(self.config.weight_asymmetry, ctx)
    }

    fn min_fraction(&self) -> f64 {
        self.config.step * (1.0 - self.config.weight_asymmetry)
    }
}
