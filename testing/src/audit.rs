use std::sync::Mutex;

use contract_negotiators::audit::AuditError;
use contract_negotiators::{AuditEntry, AuditSink, MemorySink};

#[derive(Default)]
struct Schedule {
    skip: usize,
    fail: usize,
}

/// In-memory sink that can be told to reject appends.
#[derive(Default)]
pub struct FailingAuditSink {
    inner: MemorySink,
    schedule: Mutex<Schedule>,
}

impl FailingAuditSink {
    pub fn new() -> FailingAuditSink {
        FailingAuditSink::default()
    }

    /// Next `count` appends fail.
    pub fn fail_next(&self, count: usize) {
        self.fail_after(0, count)
    }

    /// Accepts `skip` appends, then fails next `count`.
    pub fn fail_after(&self, skip: usize, count: usize) {
        *self.schedule.lock().unwrap() = Schedule { skip, fail: count };
    }
}

impl AuditSink for FailingAuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        {
            let mut schedule = self.schedule.lock().unwrap();
            if schedule.skip > 0 {
                schedule.skip -= 1;
            } else if schedule.fail > 0 {
                schedule.fail -= 1;
                return Err(AuditError::Unavailable("Scripted audit failure.".to_string()));
            }
        }
        self.inner.append(entry)
    }

    fn read_all(&self, subject: Option<&str>) -> Result<Vec<AuditEntry>, AuditError> {
        self.inner.read_all(subject)
    }

    fn last_sequence(&self) -> Result<Option<u64>, AuditError> {
        self.inner.last_sequence()
    }
}
