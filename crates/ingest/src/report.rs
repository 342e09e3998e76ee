use config::Schema;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::convert::ChunkStats;

/// How a source file's ingestion ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// Still streaming (only seen while a run is in progress).
    Running,
    Done,
    Failed(String),
    Cancelled,
}

/// Outcome and counters for one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
    pub chunks: u64,
    pub rows_read: u64,
    pub records: u64,
    pub dropped_missing_key: u64,
    /// Parse fallbacks per schema field, in schema order.
    pub fallbacks: Vec<u64>,
}

impl FileReport {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            status: FileStatus::Running,
            chunks: 0,
            rows_read: 0,
            records: 0,
            dropped_missing_key: 0,
            fallbacks: Vec::new(),
        }
    }

    pub(crate) fn set_status(&mut self, status: FileStatus) {
        self.status = status;
    }

    pub(crate) fn add_chunk(&mut self, stats: &ChunkStats) {
        self.rows_read += stats.rows;
        self.records += stats.records;
        self.dropped_missing_key += stats.dropped_missing_key;
        if self.fallbacks.len() < stats.fallbacks.len() {
            self.fallbacks.resize(stats.fallbacks.len(), 0);
        }
        for (acc, n) in self.fallbacks.iter_mut().zip(&stats.fallbacks) {
            *acc += n;
        }
    }
}

/// Outcome of a whole ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub files: Vec<FileReport>,
    /// Records appended to buckets by the harvester.
    pub records_written: u64,
    /// Rows written to column files, over every flush.
    pub rows_flushed: u64,
    pub dropped_missing_key: u64,
    /// Parse fallbacks by field name; fields with none are omitted.
    pub fallbacks: BTreeMap<String, u64>,
}

impl IngestReport {
    pub(crate) fn from_files(
        files: Vec<FileReport>,
        schema: &Schema,
        records_written: u64,
        rows_flushed: u64,
    ) -> Self {
        let mut fallbacks = BTreeMap::new();
        for f in &files {
            for (field, n) in schema.fields().iter().zip(&f.fallbacks) {
                if *n > 0 {
                    *fallbacks.entry(field.name.clone()).or_insert(0) += n;
                }
            }
        }
        Self {
            dropped_missing_key: files.iter().map(|f| f.dropped_missing_key).sum(),
            records_written,
            rows_flushed,
            files,
            fallbacks,
        }
    }

    /// Files that did not finish.
    pub fn failed(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.status != FileStatus::Done)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Parse fallbacks recorded for `field`.
    #[must_use]
    pub fn fallbacks_for(&self, field: &str) -> u64 {
        self.fallbacks.get(field).copied().unwrap_or(0)
    }
}
