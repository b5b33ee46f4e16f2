use contract_negotiators::engine::{Impasse, Outcome};
use contract_negotiators::terms::validate;
use contract_negotiators::{DeploymentState, Error, SessionState};
use contract_negotiators_testing::{scenarios, Framework};

#[actix_rt::test]
async fn test_service_contract_end_to_end() {
    let framework = Framework::new("test_service_contract_end_to_end").unwrap();
    let negotiations = framework.build().unwrap();
    let (a, b) = scenarios::service_contract();

    let session = negotiations.open_session(a.clone(), b.clone()).unwrap();
    assert_eq!(session.status().state, SessionState::Created);

    let report = session.negotiate().await.unwrap();
    let terms = report.converged_terms().unwrap().clone();

    assert!(report.rounds() <= 5);
    assert!((12.0..=18.0).contains(&terms.number("duration").unwrap()));
    assert!((4500.0..=5000.0).contains(&terms.number("payment-amount").unwrap()));
    assert!(validate(&terms, &a).feasible);
    assert!(validate(&terms, &b).feasible);

    let status = session.status();
    assert_eq!(status.state, SessionState::Approved);
    assert_eq!(status.final_terms, Some(terms.clone()));
    assert_eq!(status.current_round, report.rounds());
    assert_eq!(session.proposals().await.unwrap(), report.proposals);

    let record = session.deploy().await.unwrap();

    assert_eq!(record.state, DeploymentState::Committed);
    assert_eq!(record.terms, terms);
    assert_eq!(record.ledger_ref, framework.ledger.reference(&record.id));
    assert_eq!(session.status().state, SessionState::Deployed);
    assert_eq!(session.status().contract_id, Some(record.id));
}

#[actix_rt::test]
async fn test_exclusive_security_tier_fails_session() {
    let framework = Framework::new("test_exclusive_security_tier_fails_session").unwrap();
    let negotiations = framework.build().unwrap();
    let (a, b) = scenarios::exclusive_security_tier();

    let session = negotiations.open_session(a, b).unwrap();
    let report = session.negotiate().await.unwrap();

    assert_eq!(
        report.outcome,
        Outcome::Impasse(Impasse::Structural {
            dimensions: vec!["security-tier".to_string()]
        })
    );
    assert!(report.proposals.is_empty());

    let status = session.status();
    assert_eq!(status.state, SessionState::Failed);
    assert!(status.final_terms.is_none());

    // Failed session can't be deployed, nor negotiated again.
    assert!(matches!(session.deploy().await, Err(Error::Deployment(_))));
    assert!(matches!(session.negotiate().await, Err(Error::Session(_))));
    assert_eq!(session.status().state, SessionState::Failed);
    assert_eq!(framework.signatures.calls_count(), 0);
}

#[actix_rt::test]
async fn test_multi_round_negotiation() {
    let framework = Framework::new("test_multi_round_negotiation").unwrap();
    let negotiations = framework.build().unwrap();
    let (a, b) = scenarios::narrow_overlap();
    let bound = negotiations.engine().convergence_bound();

    let session = negotiations.open_session(a.clone(), b.clone()).unwrap();
    let report = session.negotiate().await.unwrap();

    match &report.outcome {
        Outcome::Converged { terms, round } => {
            assert!(*round > 1);
            assert!(*round <= bound);
            assert_eq!(terms.label("payment-cadence"), Some("quarterly"));
            assert!(validate(terms, &a).feasible && validate(terms, &b).feasible);
        }
        outcome => panic!("Expected convergence, got {:?}", outcome),
    }

    let proposers = report
        .proposals
        .iter()
        .map(|proposal| proposal.proposer.as_str())
        .collect::<Vec<_>>();
    assert_eq!(proposers[0], "Supplier");
    assert_eq!(proposers[1], "Customer");
}

#[actix_rt::test]
async fn test_cancelled_session_fails() {
    let framework = Framework::new("test_cancelled_session_fails").unwrap();
    let negotiations = framework.build().unwrap();
    let (a, b) = scenarios::narrow_overlap();

    let session = negotiations.open_session(a, b).unwrap();
    session.cancel();
    let report = session.negotiate().await.unwrap();

    assert_eq!(report.outcome, Outcome::Impasse(Impasse::Cancelled { round: 0 }));
    assert_eq!(session.status().state, SessionState::Failed);
    assert_eq!(session.status().impasse, Some(Impasse::Cancelled { round: 0 }));

    let last = negotiations
        .audit()
        .entries(&session.session_id)
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(last.payload["details"]["cancelled"], true);
}

#[actix_rt::test]
async fn test_cancel_during_negotiation_stops_at_round_boundary() {
    let framework = Framework::new("test_cancel_during_negotiation_stops_at_round_boundary").unwrap();
    // Small concessions keep parties apart for many rounds.
    let mut config = framework.config.clone();
    config.bargaining.max_rounds = 1000;
    config.bargaining.strategy.params = serde_yaml::from_str("{ step: 0.01 }").unwrap();
    let framework = framework.with_config(config);
    let negotiations = framework.build().unwrap();
    let (a, b) = scenarios::narrow_overlap();

    let session = negotiations.open_session(a, b).unwrap();
    let mut status = session.subscribe();
    let cancel_after_first_round = async {
        while status.borrow_and_update().current_round == 0 {
            status.changed().await.unwrap();
        }
        session.cancel();
    };

    let (report, _) = tokio::join!(session.negotiate(), cancel_after_first_round);
    let report = report.unwrap();

    let round = match report.outcome {
        Outcome::Impasse(Impasse::Cancelled { round }) => round,
        outcome => panic!("Expected cancellation, got {:?}", outcome),
    };
    assert!(round >= 1);
    assert_eq!(report.rounds(), round);
    assert_eq!(session.proposals().await.unwrap().len(), round as usize);

    let status = session.status();
    assert_eq!(status.state, SessionState::Failed);
    assert_eq!(status.impasse, Some(Impasse::Cancelled { round }));

    let last = negotiations
        .audit()
        .entries(&session.session_id)
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(last.payload["to"], "failed");
    assert_eq!(last.payload["details"]["cancelled"], true);
}

#[actix_rt::test]
async fn test_invalid_constraints_are_rejected() {
    let framework = Framework::new("test_invalid_constraints_are_rejected").unwrap();
    let negotiations = framework.build().unwrap();
    let (a, _) = scenarios::service_contract();
    let inverted = contract_negotiators::terms::ConstraintSet::new("Party B")
        .with_range("duration", 18.0, 12.0, 1.0);

    let result = negotiations.open_session_with_id("invalid", a, inverted);

    assert!(matches!(result, Err(Error::Session(_))));
    assert!(negotiations.audit().entries("invalid").unwrap().is_empty());
}

#[actix_rt::test]
async fn test_sessions_run_independently() {
    let framework = Framework::new("test_sessions_run_independently").unwrap();
    let negotiations = framework.build().unwrap();

    let (a, b) = scenarios::service_contract();
    let first = negotiations.open_session(a, b).unwrap();
    let (a, b) = scenarios::exclusive_security_tier();
    let second = negotiations.open_session(a, b).unwrap();

    let (first_report, second_report) = tokio::join!(first.negotiate(), second.negotiate());

    assert!(first_report.unwrap().converged_terms().is_some());
    assert!(second_report.unwrap().converged_terms().is_none());
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(first.status().state, SessionState::Approved);
    assert_eq!(second.status().state, SessionState::Failed);
}
