use contract_bargaining_engine::{BargainingEngine, NegotiationReport, RoundControl};

use crate::session::{NegotiationSession, SessionError};

/// Runs negotiation for the session from `created` to `approved` or `failed`.
/// Proposals are recorded as soon as each round completes, so status
/// observers see the current round.
pub async fn run_negotiation(
    session: &mut NegotiationSession,
    engine: &BargainingEngine,
    control: RoundControl,
) -> Result<NegotiationReport, SessionError> {
    session.begin_negotiation()?;

    let party_a = session.party_a().clone();
    let party_b = session.party_b().clone();

    // After first failure proposals are left for `conclude`, which records
    // everything missing or returns the error.
    let mut recording = true;
    let report = engine
        .negotiate_async(&party_a, &party_b, control, |proposal| {
            if !recording {
                return;
            }
            if let Err(e) = session.record_proposal(proposal) {
                log::warn!("[{}] Failed to record proposal {}. {e}", session.id(), proposal.round);
                recording = false;
            }
        })
        .await;

    session.conclude(&report)?;
    Ok(report)
}
