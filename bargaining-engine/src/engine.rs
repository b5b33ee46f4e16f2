use chrono::Utc;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use contract_term_utils::{
    score, validate, ConstraintSet, DimensionConstraint, TermValue, TermVector,
};

use crate::control::RoundControl;
use crate::proposal::{Party, Proposal};
use crate::strategy::{ConcessionContext, ConcessionStrategy, FixedStep};

pub const DEFAULT_MAX_ROUNDS: u32 = 30;
pub const DEFAULT_SETTLE_RATIO: f64 = 0.05;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BargainingParams {
    pub max_rounds: u32,
    /// When the gap between parties on numeric dimension drops to this
    /// fraction of the initial gap, proposer closes it completely.
    pub settle_ratio: f64,
}

impl Default for BargainingParams {
    fn default() -> Self {
        BargainingParams {
            max_rounds: DEFAULT_MAX_ROUNDS,
            settle_ratio: DEFAULT_SETTLE_RATIO,
        }
    }
}

impl BargainingParams {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.settle_ratio > 0.0 && self.settle_ratio < 1.0) {
            anyhow::bail!(
                "Settle ratio must be in range (0, 1), got {}.",
                self.settle_ratio
            );
        }
        Ok(())
    }
}

/// Reason why negotiation ended without agreement.
#[derive(Clone, Debug, Display, PartialEq, Serialize, Deserialize)]
pub enum Impasse {
    /// Parties' constraints can't be reconciled on these dimensions.
    #[display(fmt = "Structural impasse on [{}]", "dimensions.join(\", \")")]
    Structural { dimensions: Vec<String> },
    #[display(fmt = "No agreement after {} round(s)", rounds)]
    RoundLimit { rounds: u32 },
    #[display(fmt = "Round {} timed out", round)]
    RoundTimeout { round: u32 },
    #[display(fmt = "Cancelled after {} round(s)", round)]
    Cancelled { round: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Converged { terms: TermVector, round: u32 },
    Impasse(Impasse),
}

/// Outcome of negotiation together with full proposals history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NegotiationReport {
    pub outcome: Outcome,
    pub proposals: Vec<Proposal>,
}

impl NegotiationReport {
    pub fn impasse(impasse: Impasse, proposals: Vec<Proposal>) -> NegotiationReport {
        NegotiationReport {
            outcome: Outcome::Impasse(impasse),
            proposals,
        }
    }

    pub fn converged_terms(&self) -> Option<&TermVector> {
        match &self.outcome {
            Outcome::Converged { terms, .. } => Some(terms),
            Outcome::Impasse(_) => None,
        }
    }

    pub fn impasse_reason(&self) -> Option<&Impasse> {
        match &self.outcome {
            Outcome::Converged { .. } => None,
            Outcome::Impasse(impasse) => Some(impasse),
        }
    }

    pub fn rounds(&self) -> u32 {
        self.proposals.len() as u32
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RoundStep {
    Continue { round: u32 },
    Converged { round: u32, terms: TermVector },
}

/// Dimensions constrained by both parties, for which no value satisfies both.
pub fn structural_conflicts(a: &ConstraintSet, b: &ConstraintSet) -> Vec<String> {
    a.dimensions()
        .filter_map(|(name, spec)| {
            let other = b.constraint(name)?;
            match spec.constraint.intersects(other) {
                true => None,
                false => Some(name.to_string()),
            }
        })
        .collect()
}

/// Party's starting position. Dimensions the party doesn't care about
/// take counterparty's preference.
fn seed(own: &ConstraintSet, other: &ConstraintSet) -> TermVector {
    other
        .dimensions()
        .filter(|(name, _)| own.get(name).is_none())
        .fold(own.preferred(), |terms, (name, spec)| {
            terms.with(name, spec.constraint.preferred())
        })
}

/// Single negotiation between two parties, driven one round at a time.
pub struct Bargain {
    parties: [ConstraintSet; 2],
    /// Last proposal of each party, or its seed before it proposed anything.
    positions: [TermVector; 2],
    initial_gaps: BTreeMap<String, f64>,
    strategy: Arc<dyn ConcessionStrategy>,
    params: BargainingParams,
    round: u32,
    proposals: Vec<Proposal>,
}

impl Bargain {
    pub fn open(
        a: ConstraintSet,
        b: ConstraintSet,
        strategy: Arc<dyn ConcessionStrategy>,
        params: BargainingParams,
    ) -> Result<Bargain, Impasse> {
        let dimensions = structural_conflicts(&a, &b);
        if !dimensions.is_empty() {
            return Err(Impasse::Structural { dimensions });
        }

        let seed_a = seed(&a, &b);
        let seed_b = seed(&b, &a);
        let initial_gaps = seed_a
            .iter()
            .filter_map(|(name, value)| {
                let own = value.as_number()?;
                let other = seed_b.number(name)?;
                Some((name.to_string(), (own - other).abs()))
            })
            .collect();

        Ok(Bargain {
            parties: [a, b],
            positions: [seed_a, seed_b],
            initial_gaps,
            strategy,
            params,
            round: 0,
            proposals: vec![],
        })
    }

    /// Number of completed rounds.
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }

    pub fn constraints(&self, party: Party) -> &ConstraintSet {
        &self.parties[party.index()]
    }

    /// Runs next round. Proposer is chosen by round parity.
    pub fn step(&mut self) -> RoundStep {
        self.round += 1;
        let round = self.round;
        let proposer = Party::proposing_in(round);

        let terms = self.concede(proposer);
        let own = &self.parties[proposer.index()];
        let counter = &self.parties[proposer.other().index()];

        let own_check = validate(&terms, own);
        let counter_check = validate(&terms, counter);

        log::debug!(
            "Round {}: party {} ('{}') proposes {}. Counterparty violations: [{}].",
            round,
            proposer,
            own.party,
            terms,
            counter_check.violations.join(", ")
        );

        let proposal = Proposal {
            round,
            party: proposer,
            proposer: own.party.clone(),
            terms: terms.clone(),
            score: score(&terms, counter),
            timestamp: Utc::now(),
        };

        self.positions[proposer.index()] = terms.clone();
        self.proposals.push(proposal);

        match own_check.feasible && counter_check.feasible {
            true => RoundStep::Converged { round, terms },
            false => RoundStep::Continue { round },
        }
    }

    pub fn converged(self, terms: TermVector, round: u32) -> NegotiationReport {
        log::info!("Negotiation converged in round {round} on terms {terms}.");
        NegotiationReport {
            outcome: Outcome::Converged { terms, round },
            proposals: self.proposals,
        }
    }

    pub fn finish(self, impasse: Impasse) -> NegotiationReport {
        log::info!("Negotiation ended without agreement. {impasse}.");
        NegotiationReport::impasse(impasse, self.proposals)
    }

    fn concede(&self, proposer: Party) -> TermVector {
        let own = &self.parties[proposer.index()];
        let counter = &self.parties[proposer.other().index()];
        let current = &self.positions[proposer.index()];
        let target = &self.positions[proposer.other().index()];
        let max_weight = own.max_weight();

        current
            .iter()
            .map(|(name, value)| {
                let target_value = target.get(name).unwrap_or(value);
                let spec = match own.get(name) {
                    Some(spec) => spec,
                    // Proposer has no preference, so it takes counterparty's value.
                    None => return (name.to_string(), target_value.clone()),
                };

                let next = match (&spec.constraint, value, target_value) {
                    (
                        DimensionConstraint::Range { .. },
                        TermValue::Number(position),
                        TermValue::Number(goal),
                    ) => {
                        let gap = goal - position;
                        let initial = self.initial_gaps.get(name).copied().unwrap_or(0.0);

                        let moved = if gap.abs() <= self.params.settle_ratio * initial {
                            *goal
                        } else {
                            let ctx = ConcessionContext {
                                round: self.round,
                                max_rounds: self.params.max_rounds,
                                dimension: name,
                                weight: spec.weight,
                                max_weight,
                            };
                            let fraction = match self.strategy.fraction(&ctx) {
                                fraction if fraction.is_nan() => 0.0,
                                fraction => fraction.clamp(0.0, 1.0),
                            };
                            position + fraction * gap
                        };
                        // Never concede past own hard bound.
                        TermValue::Number(spec.constraint.clamp(moved))
                    }
                    (DimensionConstraint::OneOf(values), TermValue::Label(_), _) => {
                        let acceptable = |candidate: &TermValue| {
                            counter
                                .constraint(name)
                                .map(|constraint| constraint.accepts(candidate))
                                .unwrap_or(true)
                        };
                        if acceptable(value) {
                            value.clone()
                        } else {
                            values
                                .iter()
                                .map(|label| TermValue::Label(label.clone()))
                                .find(|candidate| acceptable(candidate))
                                .unwrap_or_else(|| value.clone())
                        }
                    }
                    _ => value.clone(),
                };
                (name.to_string(), next)
            })
            .collect()
    }
}

/// Runs negotiations between two constraint sets using configured
/// concession strategy.
#[derive(Clone)]
pub struct BargainingEngine {
    strategy: Arc<dyn ConcessionStrategy>,
    params: BargainingParams,
}

impl Default for BargainingEngine {
    fn default() -> Self {
        BargainingEngine::new(Arc::new(FixedStep::default()), BargainingParams::default())
    }
}

impl BargainingEngine {
    pub fn new(
        strategy: Arc<dyn ConcessionStrategy>,
        params: BargainingParams,
    ) -> BargainingEngine {
        BargainingEngine { strategy, params }
    }

    /// Copy of the engine using different strategy.
    pub fn with_strategy(&self, strategy: Arc<dyn ConcessionStrategy>) -> BargainingEngine {
        BargainingEngine {
            strategy,
            params: self.params.clone(),
        }
    }

    pub fn with_params(&self, params: BargainingParams) -> BargainingEngine {
        BargainingEngine {
            strategy: self.strategy.clone(),
            params,
        }
    }

    pub fn params(&self) -> &BargainingParams {
        &self.params
    }

    pub fn open(&self, a: &ConstraintSet, b: &ConstraintSet) -> Result<Bargain, Impasse> {
        Bargain::open(
            a.clone(),
            b.clone(),
            self.strategy.clone(),
            self.params.clone(),
        )
    }

    pub fn negotiate(
        &self,
        a: &ConstraintSet,
        b: &ConstraintSet,
        max_rounds: u32,
    ) -> NegotiationReport {
        let engine = self.with_params(BargainingParams {
            max_rounds,
            ..self.params.clone()
        });

        let mut bargain = match engine.open(a, b) {
            Ok(bargain) => bargain,
            Err(impasse) => {
                log::info!("Negotiation between '{}' and '{}' can't start. {impasse}.", a.party, b.party);
                return NegotiationReport::impasse(impasse, vec![]);
            }
        };

        while bargain.round() < max_rounds {
            if let RoundStep::Converged { round, terms } = bargain.step() {
                return bargain.converged(terms, round);
            }
        }

        let rounds = bargain.round();
        bargain.finish(Impasse::RoundLimit { rounds })
    }

    /// Runs rounds on blocking thread pool. Each round is limited by
    /// `control.round_timeout` and cancellation is checked before every round.
    /// `on_round` is called with the proposal of each completed round.
    pub async fn negotiate_async(
        &self,
        a: &ConstraintSet,
        b: &ConstraintSet,
        control: RoundControl,
        mut on_round: impl FnMut(&Proposal),
    ) -> NegotiationReport {
        let mut bargain = match self.open(a, b) {
            Ok(bargain) => bargain,
            Err(impasse) => {
                log::info!("Negotiation between '{}' and '{}' can't start. {impasse}.", a.party, b.party);
                return NegotiationReport::impasse(impasse, vec![]);
            }
        };

        loop {
            let completed = bargain.round();
            if control.cancel.is_cancelled() {
                return bargain.finish(Impasse::Cancelled { round: completed });
            }
            if completed >= self.params.max_rounds {
                return bargain.finish(Impasse::RoundLimit { rounds: completed });
            }

            let history = bargain.proposals().to_vec();
            let task = tokio::task::spawn_blocking(move || {
                let step = bargain.step();
                (bargain, step)
            });

            match tokio::time::timeout(control.round_timeout, task).await {
                Ok(Ok((returned, step))) => {
                    bargain = returned;
                    if let Some(proposal) = bargain.proposals().last() {
                        on_round(proposal);
                    }
                    if let RoundStep::Converged { round, terms } = step {
                        return bargain.converged(terms, round);
                    }
                }
                Ok(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Ok(Err(e)) => {
                    log::warn!("Negotiation round {} aborted. {e}", completed + 1);
                    return NegotiationReport::impasse(
                        Impasse::Cancelled { round: completed },
                        history,
                    );
                }
                Err(_) => {
                    let impasse = Impasse::RoundTimeout {
                        round: completed + 1,
                    };
                    log::warn!("Negotiation between '{}' and '{}' stopped. {impasse}.", a.party, b.party);
                    return NegotiationReport::impasse(impasse, history);
                }
            }
        }
    }

    /// Maximal number of rounds needed to converge, when constraints of both
    /// parties intersect on every dimension.
    pub fn convergence_bound(&self) -> u32 {
        let min_fraction = self.strategy.min_fraction();
        let settle_ratio = self.params.settle_ratio;

        if min_fraction >= 1.0 || settle_ratio >= 1.0 {
            return 2;
        }
        if min_fraction <= 0.0 || settle_ratio <= 0.0 {
            return u32::MAX;
        }

        let moves = (settle_ratio.ln() / (1.0 - min_fraction).ln()).ceil().max(0.0) as u32;
        moves.saturating_mul(2).saturating_add(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{cancel_pair, CancelToken};
    use std::time::Duration;
    use test_case::test_case;

    fn party_a() -> ConstraintSet {
        ConstraintSet::new("Party A")
            .with_range("duration", 12.0, 24.0, 1.0)
            .with_range("payment-amount", 4000.0, 5000.0, 1.0)
    }

    fn party_b() -> ConstraintSet {
        ConstraintSet::new("Party B")
            .with_range("duration", 12.0, 18.0, 1.0)
            .with_range("payment-amount", 4500.0, 6000.0, 1.0)
    }

    /// Duration ranges overlap only on [12, 13], so first rounds can't converge.
    fn short_term_party() -> ConstraintSet {
        ConstraintSet::new("Party B").with_range("duration", 6.0, 13.0, 1.0)
    }

    fn long_term_party() -> ConstraintSet {
        ConstraintSet::new("Party A").with_range("duration", 12.0, 24.0, 1.0)
    }

    fn fixed_step(step: f64) -> BargainingEngine {
        BargainingEngine::default().with_strategy(Arc::new(FixedStep::with_step(step).unwrap()))
    }

    #[test]
    fn test_service_contract_converges() {
        let report = BargainingEngine::default().negotiate(&party_a(), &party_b(), 30);
        let terms = report.converged_terms().expect("Expected convergence");

        let duration = terms.number("duration").unwrap();
        let payment = terms.number("payment-amount").unwrap();

        assert!((12.0..=18.0).contains(&duration), "duration {duration}");
        assert!((4500.0..=5000.0).contains(&payment), "payment {payment}");
        assert!(report.rounds() <= 5);
        assert!(validate(terms, &party_a()).feasible);
        assert!(validate(terms, &party_b()).feasible);
        assert_eq!(report.proposals[0].party, Party::A);
        assert_eq!(report.proposals[0].proposer, "Party A");
    }

    #[test]
    fn test_first_round_moves_quarter_of_gap() {
        let report = BargainingEngine::default().negotiate(&party_a(), &party_b(), 30);
        let first = &report.proposals[0].terms;

        // Party A starts at 18 and 4500, Party B at 15 and 5250.
        assert_eq!(first.number("duration"), Some(17.25));
        assert_eq!(first.number("payment-amount"), Some(4687.5));
        assert_eq!(report.proposals[0].score, 1.0);
    }

    #[test]
    fn test_exclusive_security_tier_is_structural_impasse() {
        let a = party_a().with_one_of("security-tier", &["high"], 2.0);
        let b = party_b().with_one_of("security-tier", &["standard", "basic"], 1.0);

        let report = BargainingEngine::default().negotiate(&a, &b, 30);

        assert_eq!(
            report.outcome,
            Outcome::Impasse(Impasse::Structural {
                dimensions: vec!["security-tier".to_string()]
            })
        );
        assert!(report.proposals.is_empty());
    }

    #[test]
    fn test_disjoint_range_and_kind_mismatch_are_structural() {
        let a = party_a()
            .with_range("penalty", 0.0, 5.0, 1.0)
            .with_range("support-level", 1.0, 3.0, 1.0);
        let b = party_b()
            .with_range("penalty", 10.0, 20.0, 1.0)
            .with_one_of("support-level", &["24/7"], 1.0);

        let report = BargainingEngine::default().negotiate(&a, &b, 100);

        assert_eq!(
            report.impasse_reason(),
            Some(&Impasse::Structural {
                dimensions: vec!["penalty".to_string(), "support-level".to_string()]
            })
        );
    }

    #[test]
    fn test_round_limit() {
        let report = BargainingEngine::default().negotiate(&long_term_party(), &short_term_party(), 1);

        assert_eq!(report.outcome, Outcome::Impasse(Impasse::RoundLimit { rounds: 1 }));
        assert_eq!(report.proposals.len(), 1);
        assert_eq!(report.proposals[0].terms.number("duration"), Some(15.875));
    }

    #[test]
    fn test_zero_rounds_allowed() {
        let report = BargainingEngine::default().negotiate(&party_a(), &party_b(), 0);

        assert_eq!(report.outcome, Outcome::Impasse(Impasse::RoundLimit { rounds: 0 }));
        assert!(report.proposals.is_empty());
    }

    #[test]
    fn test_parties_alternate_and_history_is_ordered() {
        let report = BargainingEngine::default().negotiate(&long_term_party(), &short_term_party(), 30);

        assert!(report.converged_terms().is_some());
        assert!(report.rounds() > 2);
        for (idx, proposal) in report.proposals.iter().enumerate() {
            let round = idx as u32 + 1;
            assert_eq!(proposal.round, round);
            assert_eq!(proposal.party, Party::proposing_in(round));
        }
        // Each party stays within its own bounds in every proposal.
        for proposal in &report.proposals {
            let own = match proposal.party {
                Party::A => long_term_party(),
                Party::B => short_term_party(),
            };
            assert!(validate(&proposal.terms, &own).feasible);
        }
    }

    #[test]
    fn test_negotiation_is_deterministic() {
        let engine = BargainingEngine::default();
        let first = engine.negotiate(&long_term_party(), &short_term_party(), 30);
        let second = engine.negotiate(&long_term_party(), &short_term_party(), 30);

        let terms = |report: &NegotiationReport| {
            report
                .proposals
                .iter()
                .map(|proposal| proposal.terms.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(terms(&first), terms(&second));
        assert_eq!(first.outcome, second.outcome);
    }

    #[test_case(0.0, 10.0, 10.0, 20.0; "Touching ranges")]
    #[test_case(12.0, 24.0, 6.0, 13.0; "Narrow overlap")]
    #[test_case(100.0, 200.0, 150.0, 400.0; "Wide overlap")]
    #[test_case(0.0, 1.0, 0.0, 1.0; "Identical ranges")]
    #[test_case(0.0, 100.0, 40.0, 41.0; "Nested narrow range")]
    #[test_case(40.0, 41.0, 0.0, 100.0; "Nested narrow range for Party A")]
    fn test_converges_within_bound(min_a: f64, max_a: f64, min_b: f64, max_b: f64) {
        let a = ConstraintSet::new("A")
            .with_range("price", min_a, max_a, 1.0)
            .with_range("volume", 0.0, 10.0, 2.0);
        let b = ConstraintSet::new("B")
            .with_range("price", min_b, max_b, 1.0)
            .with_range("volume", 8.0, 30.0, 1.0);

        for step in [0.05, 0.1, 0.25, 0.5, 0.9, 1.0] {
            let engine = fixed_step(step);
            let bound = engine.convergence_bound();
            let report = engine.negotiate(&a, &b, bound + 10);

            match report.outcome {
                Outcome::Converged { round, .. } => {
                    assert!(round <= bound, "step {step}: round {round} > bound {bound}")
                }
                outcome => panic!("step {step}: expected convergence, got {outcome:?}"),
            }
        }
    }

    #[test]
    fn test_convergence_bound_for_default_strategy() {
        // ceil(ln(0.05) / ln(0.75)) = 11
        assert_eq!(BargainingEngine::default().convergence_bound(), 24);
        assert_eq!(fixed_step(1.0).convergence_bound(), 2);
    }

    #[test]
    fn test_unconstrained_dimension_takes_counterparty_preference() {
        let a = party_a().with_one_of("support-level", &["24/7", "business-hours"], 1.0);
        let report = BargainingEngine::default().negotiate(&a, &party_b(), 30);

        let terms = report.converged_terms().unwrap();
        assert_eq!(terms.label("support-level"), Some("24/7"));
    }

    #[test]
    fn test_discrete_dimension_moves_to_shared_value() {
        let a = party_a().with_one_of("security-tier", &["high", "standard"], 1.0);
        let b = party_b().with_one_of("security-tier", &["basic", "standard"], 1.0);

        let report = BargainingEngine::default().negotiate(&a, &b, 30);

        assert_eq!(report.rounds(), 1);
        assert_eq!(
            report.converged_terms().unwrap().label("security-tier"),
            Some("standard")
        );
    }

    #[test]
    fn test_weight_asymmetry_slows_concession() {
        let strategy = FixedStep::new(
            serde_yaml::from_str("{ step: 0.4, weight_asymmetry: 0.5 }").unwrap(),
        )
        .unwrap();
        let a = ConstraintSet::new("Party A")
            .with_range("duration", 12.0, 24.0, 4.0)
            .with_range("payment-amount", 4000.0, 5000.0, 1.0);
        let b = ConstraintSet::new("Party B")
            .with_range("duration", 6.0, 13.0, 1.0)
            .with_range("payment-amount", 4800.0, 6000.0, 1.0);

        let engine = BargainingEngine::default().with_strategy(Arc::new(strategy));
        let report = engine.negotiate(&a, &b, 1);
        let first = &report.proposals[0].terms;

        // Duration: 18 - 0.2 * 8.5, payment: 4500 + 0.35 * 900.
        assert!((first.number("duration").unwrap() - 16.3).abs() < 1e-9);
        assert!((first.number("payment-amount").unwrap() - 4815.0).abs() < 1e-9);
        assert_eq!(report.proposals[0].score, 0.5);
    }

    #[test]
    fn test_per_call_strategy_override() {
        let default = BargainingEngine::default();
        let eager = fixed_step(1.0);

        let slow = default.negotiate(&long_term_party(), &short_term_party(), 30);
        let fast = eager.negotiate(&long_term_party(), &short_term_party(), 30);

        assert!(slow.rounds() > 1);
        assert_eq!(fast.rounds(), 1);
        assert_eq!(fast.converged_terms().unwrap().number("duration"), Some(12.0));
        // Original engine keeps its configuration.
        assert_eq!(default.convergence_bound(), 24);
    }

    #[tokio::test]
    async fn test_async_matches_sync_negotiation() {
        let engine = BargainingEngine::default();
        let sync = engine.negotiate(&long_term_party(), &short_term_party(), 30);

        let mut observed = vec![];
        let report = engine
            .negotiate_async(
                &long_term_party(),
                &short_term_party(),
                RoundControl::default(),
                |proposal| observed.push(proposal.round),
            )
            .await;

        assert_eq!(report.outcome, sync.outcome);
        assert_eq!(observed, (1..=sync.rounds()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_cancel_before_first_round() {
        let (handle, token) = cancel_pair();
        handle.cancel();

        let report = BargainingEngine::default()
            .negotiate_async(
                &party_a(),
                &party_b(),
                RoundControl::new(token, Duration::from_secs(1)),
                |_| {},
            )
            .await;

        assert_eq!(report.outcome, Outcome::Impasse(Impasse::Cancelled { round: 0 }));
        assert!(report.proposals.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_takes_effect_at_round_boundary() {
        let (handle, token) = cancel_pair();

        let report = BargainingEngine::default()
            .negotiate_async(
                &long_term_party(),
                &short_term_party(),
                RoundControl::new(token, Duration::from_secs(1)),
                |proposal| {
                    if proposal.round == 2 {
                        handle.cancel()
                    }
                },
            )
            .await;

        assert_eq!(report.outcome, Outcome::Impasse(Impasse::Cancelled { round: 2 }));
        assert_eq!(report.proposals.len(), 2);
    }

    struct SlowStrategy;

    impl ConcessionStrategy for SlowStrategy {
        fn fraction(&self, _ctx: &ConcessionContext) -> f64 {
            std::thread::sleep(Duration::from_millis(200));
            0.25
        }

        fn min_fraction(&self) -> f64 {
            0.25
        }
    }

    #[tokio::test]
    async fn test_round_timeout() {
        let engine = BargainingEngine::default().with_strategy(Arc::new(SlowStrategy));

        let report = engine
            .negotiate_async(
                &party_a(),
                &party_b(),
                RoundControl::new(CancelToken::never(), Duration::from_millis(20)),
                |_| {},
            )
            .await;

        assert_eq!(report.outcome, Outcome::Impasse(Impasse::RoundTimeout { round: 1 }));
        assert!(report.proposals.is_empty());
    }

    #[test]
    fn test_impasse_display() {
        let impasse = Impasse::Structural {
            dimensions: vec!["security-tier".to_string(), "penalty".to_string()],
        };
        assert_eq!(
            impasse.to_string(),
            "Structural impasse on [security-tier, penalty]"
        );
        assert_eq!(
            Impasse::RoundLimit { rounds: 3 }.to_string(),
            "No agreement after 3 round(s)"
        );
    }
}
