//! Dead Letter Queue
//!
//! Durable record of operations that exhausted their retries, kept for
//! inspection and bulk replay.
//!
//! The queue is a JSON array on disk. Every mutation rewrites the whole file
//! through a temporary file in the same directory that is then renamed over
//! the target, so a crash leaves either the old or the new array.

use crate::domain::entities::{DeadLetterEntry, Params};
use crate::domain::errors::DeadLetterError;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Outcome of a bulk replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Entries replayed
    pub retried: usize,
    /// Entries that succeeded and were dropped
    pub succeeded: usize,
    /// Entries that failed again and stay queued
    pub failed: usize,
    /// Set when the outcome was applied in memory but the file could not
    /// be rewritten
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_error: Option<String>,
}

impl ReplayReport {
    /// Whether every replayed entry went through.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Dead letter queue backed by a JSON file.
pub struct DeadLetterQueue {
    path: Option<PathBuf>,
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    /// Open the queue stored at `path`.
    ///
    /// A missing file yields an empty queue. A file that does not parse is
    /// moved aside to `<path>.corrupt` and the queue starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DeadLetterError> {
        let path = path.into();
        let entries = Self::load(&path)?;

        if !entries.is_empty() {
            tracing::info!("loaded {} dead letter entries from {:?}", entries.len(), path);
        }

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// Queue that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn load(path: &Path) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DeadLetterError::io(path, e)),
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                let quarantine = Self::quarantine_path(path);
                tracing::error!(
                    "dead letter file {:?} is unreadable ({}), moving it to {:?}",
                    path,
                    e,
                    quarantine
                );
                std::fs::rename(path, &quarantine).map_err(|e| DeadLetterError::io(path, e))?;
                Ok(Vec::new())
            }
        }
    }

    fn quarantine_path(path: &Path) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(".corrupt");
        PathBuf::from(name)
    }

    /// Rewrite the backing file. Called with the entry lock held.
    fn persist(&self, entries: &[DeadLetterEntry]) -> Result<(), DeadLetterError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| DeadLetterError::io(&dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| DeadLetterError::io(&dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, entries)?;
        tmp.flush().map_err(|e| DeadLetterError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| DeadLetterError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| DeadLetterError::io(path, e.error))?;

        Ok(())
    }

    /// Record an operation that exhausted its retries.
    pub fn add_failed_operation(
        &self,
        operation: &str,
        params: Params,
        error: &str,
        attempts: u32,
    ) -> Result<Uuid, DeadLetterError> {
        self.add(DeadLetterEntry::new(operation, params, error, attempts))
    }

    /// Queue a prepared entry and return its record id.
    ///
    /// The entry is only queued once the file has been rewritten; on error
    /// the queue is unchanged.
    pub fn add(&self, entry: DeadLetterEntry) -> Result<Uuid, DeadLetterError> {
        let id = entry.id;
        let operation = entry.operation.clone();
        let attempts = entry.attempts;
        let error = entry.error.clone();

        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.push(entry);
        self.persist(&next)?;
        *entries = next;

        tracing::warn!(
            "added to dead letter queue: {} after {} attempts: {}",
            operation,
            attempts,
            error
        );

        Ok(id)
    }

    /// Replay every queued entry through `replay`.
    ///
    /// Works on a snapshot and does not hold the queue lock while replaying,
    /// so new failures can be queued meanwhile. Entries that succeed are
    /// dropped; entries that fail again get one more attempt counted and
    /// their error updated. A failed file rewrite is reported in
    /// `ReplayReport::file_error`.
    pub fn retry_all<F>(&self, mut replay: F) -> ReplayReport
    where
        F: FnMut(&DeadLetterEntry) -> Result<(), String>,
    {
        let snapshot = self.entries.lock().clone();
        if snapshot.is_empty() {
            return ReplayReport::default();
        }

        tracing::info!("replaying {} dead letter entries", snapshot.len());

        let outcomes: HashMap<Uuid, Result<(), String>> = snapshot
            .iter()
            .map(|entry| (entry.id, replay(entry)))
            .collect();

        let mut report = ReplayReport {
            retried: outcomes.len(),
            ..Default::default()
        };

        // Memory follows the outcomes even when the file cannot be rewritten
        let mut entries = self.entries.lock();
        entries.retain_mut(|entry| match outcomes.get(&entry.id) {
            Some(Ok(())) => {
                report.succeeded += 1;
                false
            }
            Some(Err(error)) => {
                report.failed += 1;
                entry.attempts += 1;
                entry.error = error.clone();
                true
            }
            // Queued after the snapshot was taken
            None => true,
        });

        if let Err(e) = self.persist(&entries) {
            tracing::error!("dead letter file is stale after replay: {}", e);
            report.file_error = Some(e.to_string());
        }
        drop(entries);

        tracing::info!(
            "dead letter replay finished: {} retried, {} failed",
            report.retried,
            report.failed
        );

        report
    }

    /// Snapshot of all queued entries, oldest first.
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().clone()
    }

    /// Look up one entry by record id.
    pub fn get(&self, id: Uuid) -> Option<DeadLetterEntry> {
        self.entries.lock().iter().find(|e| e.id == id).cloned()
    }

    /// Drop one entry by record id.
    pub fn remove(&self, id: Uuid) -> Result<Option<DeadLetterEntry>, DeadLetterError> {
        let mut entries = self.entries.lock();
        let Some(pos) = entries.iter().position(|e| e.id == id) else {
            return Ok(None);
        };

        let mut next = entries.clone();
        let entry = next.remove(pos);
        self.persist(&next)?;
        *entries = next;
        Ok(Some(entry))
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, DeadLetterError> {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        self.persist(&[])?;
        entries.clear();
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
