use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use contract_negotiators::{ContractRecord, LedgerSink};

/// Ledger storing committed records in memory. Repeated commits of the
/// same contract return the first reference.
#[derive(Default)]
pub struct RecordingLedger {
    committed: Mutex<HashMap<String, (String, ContractRecord)>>,
    calls: Mutex<usize>,
    failures: Mutex<usize>,
}

impl RecordingLedger {
    pub fn new() -> RecordingLedger {
        RecordingLedger::default()
    }

    /// Next `count` commits fail with I/O error.
    pub fn fail_next(&self, count: usize) -> &Self {
        *self.failures.lock().unwrap() = count;
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn committed(&self) -> Vec<ContractRecord> {
        self.committed
            .lock()
            .unwrap()
            .values()
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn reference(&self, contract_id: &str) -> Option<String> {
        self.committed
            .lock()
            .unwrap()
            .get(contract_id)
            .map(|(reference, _)| reference.clone())
    }
}

#[async_trait(?Send)]
impl LedgerSink for RecordingLedger {
    async fn commit(&self, record: &ContractRecord) -> anyhow::Result<String> {
        *self.calls.lock().unwrap() += 1;

        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            anyhow::bail!("Ledger unreachable.");
        }

        let mut committed = self.committed.lock().unwrap();
        let count = committed.len();
        let (reference, _) = committed
            .entry(record.id.clone())
            .or_insert_with(|| (format!("ledger-tx-{}", count + 1), record.clone()));
        Ok(reference.clone())
    }
}
