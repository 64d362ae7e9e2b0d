// crates/nerve-router/src/audit.rs
// ============================================================================
// Module: Audit Log
// Description: Append-only, hash-chained record of every routed request.
// Purpose: Sequence audit entries, mirror them to sinks, and verify chains.
// Dependencies: nerve-core, serde_json, tracing
// ============================================================================

//! ## Overview
//! [`AuditLog::append`] turns an [`AuditRecord`] into a sequenced
//! [`AuditEntry`]. The record body is hashed before the lock is taken; only
//! sequence assignment and chain linking happen under it, so sequence numbers
//! strictly increase with no gaps.
//!
//! Entries are mirrored to [`AuditSink`]s after the in-memory append. Sinks
//! are best-effort and never fail an append. [`verify_chain`] recomputes every
//! link, both for retained entries and for a JSON-lines file export.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use nerve_core::AuditEntry;
use nerve_core::AuditFilter;
use nerve_core::AuditRecord;
use nerve_core::HashDigest;
use nerve_core::HashError;
use nerve_core::RequestId;
use nerve_core::chain_digest;
use nerve_core::hash_canonical_json;
use thiserror::Error;
use tracing::warn;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Audit log errors.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Record could not be canonicalized.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// Internal lock was poisoned.
    #[error("audit log lock poisoned")]
    Poisoned,
    /// Export file could not be read.
    #[error("audit file io error: {0}")]
    Io(String),
    /// Export file line was not a valid entry.
    #[error("audit file line {line} is invalid: {message}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// Parser message.
        message: String,
    },
    /// Chain verification failed.
    #[error("audit chain broken at sequence {sequence}: {reason}")]
    ChainBroken {
        /// First offending sequence number.
        sequence: u64,
        /// Failure detail.
        reason: String,
    },
}

impl AuditError {
    /// Stable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Hash(_) => "audit_hash_failed",
            Self::Poisoned => "audit_poisoned",
            Self::Io(_) => "audit_io",
            Self::Parse {
                ..
            } => "audit_parse",
            Self::ChainBroken {
                ..
            } => "audit_chain_broken",
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Mirror for appended audit entries.
pub trait AuditSink: Send + Sync {
    /// Records one sequenced entry.
    fn record(&self, entry: &AuditEntry);
}

/// Audit sink that writes JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, entry: &AuditEntry) {
        if let Ok(payload) = serde_json::to_string(entry) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<File>,
}

impl FileAuditSink {
    /// Opens the audit file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, entry: &AuditEntry) {
        if let Ok(payload) = serde_json::to_string(entry)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Audit sink that discards entries.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _entry: &AuditEntry) {}
}

// ============================================================================
// SECTION: Audit Log
// ============================================================================

/// Position of the last appended entry, used to continue an existing chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTail {
    /// Last sequence number.
    pub sequence: u64,
    /// Hash of the last entry.
    pub entry_hash: HashDigest,
}

/// State behind the audit lock.
struct AuditState {
    /// Retained entries in sequence order.
    entries: VecDeque<AuditEntry>,
    /// Last sequence assigned.
    last_sequence: u64,
    /// Hash of the last entry.
    last_hash: Option<HashDigest>,
    /// Retained entry count per request id.
    request_ids: HashMap<RequestId, usize>,
}

impl AuditState {
    /// Drops one retained reference to `request_id`.
    fn forget(&mut self, request_id: &RequestId) {
        if let Some(count) = self.request_ids.get_mut(request_id) {
            *count -= 1;
            if *count == 0 {
                self.request_ids.remove(request_id);
            }
        }
    }
}

/// Append-only, hash-chained audit log.
pub struct AuditLog {
    /// Sequenced entries.
    state: Mutex<AuditState>,
    /// Mirrors.
    sinks: Vec<Arc<dyn AuditSink>>,
    /// Maximum retained entries.
    retention: usize,
}

impl AuditLog {
    /// Creates an empty log retaining at most `retention` entries.
    #[must_use]
    pub fn new(retention: usize) -> Self {
        Self {
            state: Mutex::new(AuditState {
                entries: VecDeque::new(),
                last_sequence: 0,
                last_hash: None,
                request_ids: HashMap::new(),
            }),
            sinks: Vec::new(),
            retention: retention.max(1),
        }
    }

    /// Continues an existing chain after `tail`.
    #[must_use]
    pub fn with_tail(self, tail: Option<ChainTail>) -> Self {
        if let Some(tail) = tail
            && let Ok(mut state) = self.state.lock()
        {
            state.last_sequence = tail.sequence;
            state.last_hash = Some(tail.entry_hash);
        }
        self
    }

    /// Adds a mirror sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Appends a record and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] when the record cannot be hashed or the lock is poisoned.
    pub fn append(&self, record: AuditRecord) -> Result<u64, AuditError> {
        let body = hash_canonical_json(&record)?;
        let entry = {
            let mut state = self.lock()?;
            let sequence = state.last_sequence + 1;
            let entry_hash = chain_digest(sequence, state.last_hash.as_ref(), &body);
            let entry = AuditEntry {
                sequence,
                record,
                prev_hash: state.last_hash.take(),
                entry_hash: entry_hash.clone(),
            };
            state.last_sequence = sequence;
            state.last_hash = Some(entry_hash);
            *state.request_ids.entry(entry.record.request_id.clone()).or_insert(0) += 1;
            state.entries.push_back(entry.clone());
            while state.entries.len() > self.retention {
                if let Some(evicted) = state.entries.pop_front() {
                    state.forget(&evicted.record.request_id);
                }
            }
            entry
        };
        for sink in &self.sinks {
            sink.record(&entry);
        }
        Ok(entry.sequence)
    }

    /// Returns a lazy cursor over retained entries matching `filter`.
    ///
    /// The cursor can be restarted from any sequence number via
    /// [`AuditFilter::from_sequence`] or [`AuditCursor::position`].
    #[must_use]
    pub fn query(&self, filter: AuditFilter) -> AuditCursor<'_> {
        let next = filter.from_sequence.unwrap_or(1).max(1);
        AuditCursor {
            log: self,
            filter,
            next,
        }
    }

    /// Last sequence number assigned; zero when nothing was appended.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Poisoned`] when the lock is poisoned.
    pub fn last_sequence(&self) -> Result<u64, AuditError> {
        Ok(self.lock()?.last_sequence)
    }

    /// Returns true when a retained entry carries `request_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Poisoned`] when the lock is poisoned.
    pub fn contains_request(&self, request_id: &RequestId) -> Result<bool, AuditError> {
        Ok(self.lock()?.request_ids.contains_key(request_id))
    }

    /// Number of retained entries.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Poisoned`] when the lock is poisoned.
    pub fn len(&self) -> Result<usize, AuditError> {
        Ok(self.lock()?.entries.len())
    }

    /// Verifies the chain over retained entries and returns how many were checked.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::ChainBroken`] when any link fails.
    pub fn verify(&self) -> Result<usize, AuditError> {
        let entries: Vec<AuditEntry> = self.lock()?.entries.iter().cloned().collect();
        verify_chain(&entries)
    }

    /// Returns the entry at `sequence` or the first later one matching `filter`.
    fn next_match(
        &self,
        from: u64,
        filter: &AuditFilter,
    ) -> Result<Option<AuditEntry>, AuditError> {
        let state = self.lock()?;
        let Some(first) = state.entries.front().map(|entry| entry.sequence) else {
            return Ok(None);
        };
        let start = usize::try_from(from.saturating_sub(first)).unwrap_or(usize::MAX);
        Ok(state.entries.iter().skip(start).find(|entry| filter.matches(entry)).cloned())
    }

    /// Acquires the state lock.
    fn lock(&self) -> Result<MutexGuard<'_, AuditState>, AuditError> {
        self.state.lock().map_err(|_| AuditError::Poisoned)
    }
}

// ============================================================================
// SECTION: Cursor
// ============================================================================

/// Lazy, restartable iterator over audit entries in sequence order.
pub struct AuditCursor<'a> {
    /// Source log.
    log: &'a AuditLog,
    /// Filter applied to each entry.
    filter: AuditFilter,
    /// Next sequence number to examine.
    next: u64,
}

impl AuditCursor<'_> {
    /// Sequence number the cursor resumes from.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.next
    }
}

impl Iterator for AuditCursor<'_> {
    type Item = AuditEntry;

    fn next(&mut self) -> Option<Self::Item> {
        match self.log.next_match(self.next, &self.filter) {
            Ok(Some(entry)) => {
                self.next = entry.sequence + 1;
                Some(entry)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "audit query aborted");
                None
            }
        }
    }
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies hash links, sequence contiguity, and genesis linkage.
///
/// Entries must be in sequence order. A slice starting after sequence 1 is
/// accepted as a retained suffix; its first back-link is not checked.
///
/// # Errors
///
/// Returns [`AuditError::ChainBroken`] at the first inconsistent entry.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<usize, AuditError> {
    let mut previous: Option<&AuditEntry> = None;
    for entry in entries {
        let broken = |reason: &str| AuditError::ChainBroken {
            sequence: entry.sequence,
            reason: reason.to_string(),
        };
        match previous {
            Some(prev) => {
                if entry.sequence != prev.sequence + 1 {
                    return Err(broken("sequence gap"));
                }
                if entry.prev_hash.as_ref() != Some(&prev.entry_hash) {
                    return Err(broken("previous hash mismatch"));
                }
            }
            None if entry.sequence == 1 && entry.prev_hash.is_some() => {
                return Err(broken("genesis entry has a previous hash"));
            }
            None => {}
        }
        let body = hash_canonical_json(&entry.record)?;
        if chain_digest(entry.sequence, entry.prev_hash.as_ref(), &body) != entry.entry_hash {
            return Err(broken("entry hash mismatch"));
        }
        previous = Some(entry);
    }
    Ok(entries.len())
}

/// Reads a JSON-lines audit export, sorted by sequence.
///
/// # Errors
///
/// Returns [`AuditError`] when the file cannot be read or a line does not parse.
pub fn read_audit_file(path: &Path) -> Result<Vec<AuditEntry>, AuditError> {
    let file = File::open(path).map_err(|err| AuditError::Io(err.to_string()))?;
    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| AuditError::Io(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(&line).map_err(|err| AuditError::Parse {
            line: index + 1,
            message: err.to_string(),
        })?;
        entries.push(entry);
    }
    entries.sort_by_key(|entry| entry.sequence);
    Ok(entries)
}

/// Verifies a JSON-lines audit export and returns the entry count.
///
/// # Errors
///
/// Returns [`AuditError`] when the file is unreadable or the chain is broken.
pub fn verify_audit_file(path: &Path) -> Result<usize, AuditError> {
    verify_chain(&read_audit_file(path)?)
}

/// Returns the tail of an existing export, or `None` when the file is missing or empty.
///
/// # Errors
///
/// Returns [`AuditError`] when the file exists but cannot be parsed.
pub fn read_chain_tail(path: &Path) -> Result<Option<ChainTail>, AuditError> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(read_audit_file(path)?.pop().map(|entry| ChainTail {
        sequence: entry.sequence,
        entry_hash: entry.entry_hash,
    }))
}

#[cfg(test)]
mod tests;
