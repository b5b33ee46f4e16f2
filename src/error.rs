use contract_term_utils::ValidationError;

use crate::audit::AuditError;
use crate::deployment::DeploymentError;
use crate::session::SessionError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error("Session actor unavailable. {0}")]
    Mailbox(#[from] actix::MailboxError),
}
