mod audit;
mod framework;
mod ledger;
pub mod scenarios;
mod signatures;
mod test_directory;

pub use audit::FailingAuditSink;
pub use framework::Framework;
pub use ledger::RecordingLedger;
pub use signatures::{ScriptedSignatureProvider, SignatureScript};
pub use test_directory::prepare_test_dir;
