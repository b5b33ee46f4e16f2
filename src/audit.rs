use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Subject of entries not related to any session or contract.
pub const SYSTEM_SUBJECT: &str = "system";

#[derive(thiserror::Error, Debug)]
pub enum AuditError {
    #[error("Audit sink I/O error. {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize audit entry. {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Audit log {path} is corrupted at line {line}. {reason}")]
    Corrupted {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("Audit sink unavailable. {0}")]
    Unavailable(String),
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    #[display(fmt = "session_opened")]
    SessionOpened,
    #[display(fmt = "proposal_recorded")]
    ProposalRecorded,
    #[display(fmt = "state_transition")]
    StateTransition,
    #[display(fmt = "contract_created")]
    ContractCreated,
    #[display(fmt = "signature_recorded")]
    SignatureRecorded,
    #[display(fmt = "contract_committed")]
    ContractCommitted,
    #[display(fmt = "contract_failed")]
    ContractFailed,
    #[display(fmt = "system_event")]
    SystemEvent,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEvent {
    Start,
    Complete,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Session id, contract id or `system`.
    pub subject: String,
    pub kind: AuditKind,
    pub payload: serde_json::Value,
}

/// Append-only storage of audit entries.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;
    /// Entries in append order. `None` returns entries of all subjects.
    fn read_all(&self, subject: Option<&str>) -> Result<Vec<AuditEntry>, AuditError>;
    fn last_sequence(&self) -> Result<Option<u64>, AuditError>;
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, AuditError> {
    mutex
        .lock()
        .map_err(|_| AuditError::Unavailable("Audit lock poisoned.".to_string()))
}

#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }
}

impl AuditSink for MemorySink {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        lock(&self.entries)?.push(entry.clone());
        Ok(())
    }

    fn read_all(&self, subject: Option<&str>) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(lock(&self.entries)?
            .iter()
            .filter(|entry| subject.map(|s| entry.subject == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    fn last_sequence(&self) -> Result<Option<u64>, AuditError> {
        Ok(lock(&self.entries)?.last().map(|entry| entry.sequence))
    }
}

/// Stores one JSON encoded entry per line. File is only appended to and
/// synchronized after every entry. Bytes past the last complete line are
/// leftovers of an interrupted write and get truncated, so the file must
/// have single writer.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<AppendFile>,
}

struct AppendFile {
    file: File,
    /// Length of the file up to the end of the last complete entry.
    committed: u64,
}

impl AppendFile {
    fn drop_torn_tail(&mut self, path: &Path) -> std::io::Result<()> {
        let len = self.file.metadata()?.len();
        if len > self.committed {
            log::warn!(
                "Audit log {} ends with incomplete entry. Dropping {} byte(s).",
                path.display(),
                len - self.committed
            );
            self.file.set_len(self.committed)?;
        } else {
            self.committed = len;
        }
        Ok(())
    }
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> Result<JsonLinesSink, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let committed = fs::read(&path)?
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map(|pos| pos as u64 + 1)
            .unwrap_or(0);

        let mut file = AppendFile { file, committed };
        file.drop_torn_tail(&path)?;
        log::debug!("Opened audit log: {}", path.display());

        Ok(JsonLinesSink {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let content = fs::read_to_string(&self.path)?;
        let mut entries = vec![];
        for (idx, line) in content.split_inclusive('\n').enumerate() {
            // Incomplete tail is removed before the next append.
            if !line.ends_with('\n') || line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(line).map_err(|e| AuditError::Corrupted {
                path: self.path.clone(),
                line: idx + 1,
                reason: e.to_string(),
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

impl AuditSink for JsonLinesSink {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut inner = lock(&self.file)?;
        inner.drop_torn_tail(&self.path)?;

        let written = inner
            .file
            .write_all(line.as_bytes())
            .and_then(|_| inner.file.sync_data());
        match written {
            Ok(()) => {
                inner.committed += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                let committed = inner.committed;
                if let Err(rollback) = inner.file.set_len(committed) {
                    log::warn!(
                        "Failed to roll back partial write to {}. {rollback}",
                        self.path.display()
                    );
                }
                Err(e.into())
            }
        }
    }

    fn read_all(&self, subject: Option<&str>) -> Result<Vec<AuditEntry>, AuditError> {
        let _guard = lock(&self.file)?;
        Ok(self
            .load()?
            .into_iter()
            .filter(|entry| subject.map(|s| entry.subject == s).unwrap_or(true))
            .collect())
    }

    fn last_sequence(&self) -> Result<Option<u64>, AuditError> {
        let _guard = lock(&self.file)?;
        Ok(self.load()?.last().map(|entry| entry.sequence))
    }
}

/// Assigns sequence numbers and timestamps to entries before passing them
/// to the sink. Sequence continues from the last entry stored in the sink.
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
    next_sequence: Mutex<u64>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Result<AuditLog, AuditError> {
        let next_sequence = sink.last_sequence()?.map(|last| last + 1).unwrap_or(1);
        Ok(AuditLog {
            sink,
            next_sequence: Mutex::new(next_sequence),
        })
    }

    pub fn in_memory() -> AuditLog {
        AuditLog {
            sink: Arc::new(MemorySink::new()),
            next_sequence: Mutex::new(1),
        }
    }

    /// Entry is numbered only if the sink accepted it, so failed appends
    /// don't leave gaps.
    pub fn record(
        &self,
        subject: &str,
        kind: AuditKind,
        payload: serde_json::Value,
    ) -> Result<AuditEntry, AuditError> {
        let mut next = lock(&self.next_sequence)?;
        let entry = AuditEntry {
            sequence: *next,
            timestamp: Utc::now(),
            subject: subject.to_string(),
            kind,
            payload,
        };

        self.sink.append(&entry)?;
        *next += 1;

        log::trace!("[{}] Audit #{}: {}", entry.subject, entry.sequence, entry.kind);
        Ok(entry)
    }

    pub fn system_event(
        &self,
        agent: &str,
        event: SystemEvent,
        description: &str,
    ) -> Result<AuditEntry, AuditError> {
        self.record(
            SYSTEM_SUBJECT,
            AuditKind::SystemEvent,
            serde_json::json!({
                "agent": agent,
                "event": event,
                "description": description,
            }),
        )
    }

    pub fn entries(&self, subject: &str) -> Result<Vec<AuditEntry>, AuditError> {
        self.sink.read_all(Some(subject))
    }

    pub fn all_entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        self.sink.read_all(None)
    }
}
