//! Record of articles already turned into email, kept across runs.
//!
//! One line per article: `<guid>#record#<content length>`. The length is the
//! only fingerprint, so an edit that keeps the byte length the same goes
//! unnoticed, and two different bodies of equal length look identical.
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

/// Separator between guid and fingerprint on a ledger line.
pub const RECORD_SEPARATOR: &str = "#record#";
/// Records kept when persisting.
pub const DEFAULT_RECORD_MAX: usize = 2000;
/// Appended to the title of an article whose content length changed.
pub const UPDATE_SUFFIX: &str = ".update";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to read ledger '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write ledger '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupRecord {
    pub guid: String,
    pub fingerprint: u64,
}

/// What to do with an article given the ledger's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerDecision {
    /// Never processed
    New,
    /// Processed with the same content length; skip
    Unchanged,
    /// Processed before, but the content length differs
    Changed { previous: u64 },
}

impl LedgerDecision {
    pub fn should_skip(self) -> bool {
        matches!(self, LedgerDecision::Unchanged)
    }

    /// Title suffix that keeps an updated article's artifact apart from the
    /// earlier one.
    pub fn title_suffix(self) -> Option<&'static str> {
        match self {
            LedgerDecision::Changed { .. } => Some(UPDATE_SUFFIX),
            _ => None,
        }
    }
}

/// In-memory ledger. Records are kept in write order, oldest first.
#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    max_records: usize,
    records: Vec<DedupRecord>,
    index: HashMap<String, u64>,
}

impl DedupLedger {
    /// An empty ledger that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>, max_records: usize) -> Self {
        Self {
            path: path.into(),
            max_records,
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Load the ledger file. A missing file is an empty ledger; lines without
    /// exactly one separator or with a non-numeric fingerprint are skipped.
    pub fn load(path: impl Into<PathBuf>, max_records: usize) -> Result<Self, LedgerError> {
        let mut ledger = Self::new(path, max_records);

        let text = match std::fs::read_to_string(&ledger.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %ledger.path.display(), "No ledger file found, starting empty");
                return Ok(ledger);
            }
            Err(source) => {
                return Err(LedgerError::Read {
                    path: ledger.path,
                    source,
                })
            }
        };

        let mut skipped = 0usize;
        for line in text.lines() {
            match parse_line(line.trim()) {
                Some(record) => ledger.upsert(record),
                None if line.trim().is_empty() => {}
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(path = %ledger.path.display(), skipped = skipped, "Malformed ledger lines ignored");
        }
        tracing::debug!(path = %ledger.path.display(), records = ledger.len(), "Loaded ledger");

        Ok(ledger)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn fingerprint(&self, guid: &str) -> Option<u64> {
        self.index.get(guid).copied()
    }

    /// Compare an article against its last recorded fingerprint.
    pub fn lookup(&self, guid: &str, content_len: u64) -> LedgerDecision {
        match self.index.get(guid) {
            None => LedgerDecision::New,
            Some(&previous) if previous == content_len => LedgerDecision::Unchanged,
            Some(&previous) => LedgerDecision::Changed { previous },
        }
    }

    /// Record a successfully processed article. An existing record for the
    /// guid is replaced and moves to the newest position.
    pub fn record(&mut self, guid: &str, content_len: u64) {
        self.upsert(DedupRecord {
            guid: guid.to_string(),
            fingerprint: content_len,
        });
    }

    /// Records in write order, oldest first.
    pub fn records(&self) -> &[DedupRecord] {
        &self.records
    }

    /// Rewrite the ledger file with the newest `max_records` records.
    ///
    /// Written to a temporary sibling and renamed over the old file, so an
    /// interrupted write never leaves a truncated ledger.
    pub fn persist(&self) -> Result<(), LedgerError> {
        let write_err = |source: std::io::Error| LedgerError::Write {
            path: self.path.clone(),
            source,
        };

        let start = self.records.len().saturating_sub(self.max_records);
        let mut body = String::new();
        for record in &self.records[start..] {
            body.push_str(&format_line(record));
            body.push('\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut temp_name = self.path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp_path = self.path.with_file_name(temp_name);

        let result = std::fs::File::create(&temp_path)
            .and_then(|mut file| {
                file.write_all(body.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| std::fs::rename(&temp_path, &self.path));
        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(write_err(e));
        }

        tracing::debug!(
            path = %self.path.display(),
            written = self.records.len() - start,
            dropped = start,
            "Persisted ledger"
        );
        Ok(())
    }

    fn upsert(&mut self, record: DedupRecord) {
        if self.index.insert(record.guid.clone(), record.fingerprint).is_some() {
            self.records.retain(|r| r.guid != record.guid);
        }
        self.records.push(record);
    }
}

fn parse_line(line: &str) -> Option<DedupRecord> {
    let mut fields = line.split(RECORD_SEPARATOR);
    let guid = fields.next()?;
    let fingerprint = fields.next()?;
    if fields.next().is_some() || guid.is_empty() {
        return None;
    }
    Some(DedupRecord {
        guid: guid.to_string(),
        fingerprint: fingerprint.trim().parse().ok()?,
    })
}

fn format_line(record: &DedupRecord) -> String {
    format!("{}{}{}", record.guid, RECORD_SEPARATOR, record.fingerprint)
}
