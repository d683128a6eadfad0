use crate::errors::AutosignResult;
use crate::utils::atomic_write;
use chrono::{DateTime, NaiveDate, TimeZone};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const RECORD_FILE: &str = "sign_record.json";

/// Days a sign task completed, as `YYYY-MM-DD -> RFC 3339 timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRecord {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl SignRecord {
    /// Load from `path`; a missing or unreadable file starts an empty record.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("ignoring corrupt sign record {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn signed_on(&self, date: NaiveDate) -> Option<&str> {
        self.entries.get(&date.to_string()).map(String::as_str)
    }

    pub fn record<Z: TimeZone>(&mut self, at: &DateTime<Z>)
    where
        Z::Offset: Display,
    {
        self.entries
            .insert(at.date_naive().to_string(), at.to_rfc3339());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self) -> AutosignResult<()> {
        let content = serde_json::to_string_pretty(&self.entries)?;
        atomic_write(&self.path, &content)?;
        Ok(())
    }
}
