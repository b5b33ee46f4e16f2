use actix::prelude::*;
use futures::FutureExt;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use contract_bargaining_engine::{
    cancel_pair, BargainingEngine, CancelHandle, CancelToken, NegotiationReport, Proposal,
    RoundControl,
};

use crate::audit::{AuditLog, SystemEvent};
use crate::deployment::{ContractRecord, DeploymentCoordinator};
use crate::driver::run_negotiation;
use crate::error::Error;
use crate::session::{NegotiationSession, SessionStatus};

// =========================================== //
// Session interface
// =========================================== //

/// Runs bargaining between session parties and records its result.
#[derive(Message)]
#[rtype(result = "Result<NegotiationReport, Error>")]
pub struct Negotiate {}

/// Deploys contract from approved session. Safe to send many times.
#[derive(Message)]
#[rtype(result = "Result<ContractRecord, Error>")]
pub struct Deploy {}

#[derive(Message)]
#[rtype(result = "Vec<Proposal>")]
pub struct GetProposals {}

/// Owns single negotiation session. Messages are processed one at a time
/// in the order they arrived, even when handling them needs to wait.
pub struct SessionActor {
    session: Arc<Mutex<NegotiationSession>>,
    engine: Arc<BargainingEngine>,
    coordinator: Arc<DeploymentCoordinator>,
    round_timeout: Duration,
    cancel: CancelToken,
}

fn system_event(audit: &AuditLog, agent: &str, event: SystemEvent, description: &str) {
    if let Err(e) = audit.system_event(agent, event, description) {
        log::warn!("Failed to record system event of {agent}. {e}");
    }
}

impl Handler<Negotiate> for SessionActor {
    type Result = ResponseFuture<Result<NegotiationReport, Error>>;

    fn handle(&mut self, _: Negotiate, _: &mut Context<Self>) -> Self::Result {
        let session = self.session.clone();
        let engine = self.engine.clone();
        let control = RoundControl::new(self.cancel.clone(), self.round_timeout);

        async move {
            let mut session = session.lock().await;
            let audit = session.audit().clone();
            let agent = "BargainingEngine";

            system_event(
                &audit,
                agent,
                SystemEvent::Start,
                &format!("Negotiation of session [{}] started.", session.id()),
            );

            match run_negotiation(&mut session, &engine, control).await {
                Ok(report) => {
                    system_event(
                        &audit,
                        agent,
                        SystemEvent::Complete,
                        &format!("Session [{}] is {}.", session.id(), session.state()),
                    );
                    Ok(report)
                }
                Err(e) => {
                    system_event(&audit, agent, SystemEvent::Error, &e.to_string());
                    Err(e.into())
                }
            }
        }
        .boxed_local()
    }
}

impl Handler<Deploy> for SessionActor {
    type Result = ResponseFuture<Result<ContractRecord, Error>>;

    fn handle(&mut self, _: Deploy, _: &mut Context<Self>) -> Self::Result {
        let session = self.session.clone();
        let coordinator = self.coordinator.clone();

        async move {
            let mut session = session.lock().await;
            let audit = session.audit().clone();
            let agent = "DeploymentCoordinator";

            system_event(
                &audit,
                agent,
                SystemEvent::Start,
                &format!("Deployment of session [{}] requested.", session.id()),
            );

            match coordinator.deploy(&mut session).await {
                Ok(record) => {
                    system_event(
                        &audit,
                        agent,
                        SystemEvent::Complete,
                        &format!("Contract [{}] is {}.", record.id, record.state),
                    );
                    Ok(record)
                }
                Err(e) => {
                    system_event(&audit, agent, SystemEvent::Error, &e.to_string());
                    Err(e.into())
                }
            }
        }
        .boxed_local()
    }
}

impl Handler<GetProposals> for SessionActor {
    type Result = ResponseFuture<Vec<Proposal>>;

    fn handle(&mut self, _: GetProposals, _: &mut Context<Self>) -> Self::Result {
        let session = self.session.clone();
        async move { session.lock().await.proposals().to_vec() }.boxed_local()
    }
}

impl Actor for SessionActor {
    type Context = Context<Self>;
}

#[derive(Clone)]
pub struct SessionAddr {
    pub session_id: String,
    addr: Addr<SessionActor>,
    status: watch::Receiver<SessionStatus>,
    cancel: CancelHandle,
}

impl SessionAddr {
    /// Starts the session actor. Must be called inside actix `System`.
    pub fn start(
        session: NegotiationSession,
        engine: Arc<BargainingEngine>,
        coordinator: Arc<DeploymentCoordinator>,
        round_timeout: Duration,
    ) -> SessionAddr {
        let (cancel, token) = cancel_pair();
        let session_id = session.id().to_string();
        let status = session.subscribe();

        let addr = SessionActor {
            session: Arc::new(Mutex::new(session)),
            engine,
            coordinator,
            round_timeout,
            cancel: token,
        }
        .start();

        SessionAddr {
            session_id,
            addr,
            status,
            cancel,
        }
    }

    pub async fn negotiate(&self) -> Result<NegotiationReport, Error> {
        self.addr.send(Negotiate {}).await?
    }

    pub async fn deploy(&self) -> Result<ContractRecord, Error> {
        self.addr.send(Deploy {}).await?
    }

    /// Waits for running operations to finish.
    pub async fn proposals(&self) -> Result<Vec<Proposal>, Error> {
        Ok(self.addr.send(GetProposals {}).await?)
    }

    /// Returns immediately, also during running negotiation.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Negotiation stops at the next round boundary and the session fails.
    pub fn cancel(&self) {
        log::info!("[{}] Cancelling negotiation.", self.session_id);
        self.cancel.cancel()
    }
}

pub fn generate_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
