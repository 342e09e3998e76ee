//! # Config - Run Configuration and Dataset Schema
//!
//! A run is described by one JSON document:
//!
//! ```json
//! {
//!   "SourceDir": "/data/raw",
//!   "SourceFiles": ["enrollment_2011.csv", "enrollment_2012.csv"],
//!   "TargetDir": "/data/enrollment",
//!   "CodesDir": "/data/codes",
//!   "ChunkSize": 10000,
//!   "NumBuckets": 1024,
//!   "BufMaxRecs": 100000,
//!   "Concurrency": 10,
//!   "Variables": [
//!     { "Name": "Enrolid", "Type": "uint64", "SourceType": "float64", "Must": true, "KeyVar": true },
//!     { "Name": "Sex", "Type": "uint8", "SourceType": "string", "Must": true }
//!   ]
//! }
//! ```
//!
//! The `Variables` list is the dataset [`Schema`]: an ordered set of typed
//! fields with exactly one key field. It is fixed for the lifetime of a
//! store.
//!
//! A few tuning knobs may be overridden from the environment:
//!
//! ```text
//! BUCKETIZE_CONCURRENCY    chunk-dispatch concurrency
//! BUCKETIZE_BUF_MAX_RECS   per-bucket flush threshold (rows)
//! BUCKETIZE_CHUNK_SIZE     rows pulled per source chunk
//! BUCKETIZE_MAX_CHUNK      chunks per file (0 = all)
//! ```

mod schema;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub use schema::{FieldDesc, Schema, SourceType};

/// Concurrency used when the configuration leaves it at 0.
pub const DEFAULT_CONCURRENCY: usize = 10;
/// Rows pulled from a source file per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
/// Rows a bucket buffers in memory before flushing.
pub const DEFAULT_BUF_MAX_RECS: usize = 100_000;
/// Concurrent column files processed by the factorizer.
pub const DEFAULT_FACTORIZE_CONCURRENCY: usize = 20;
/// Concurrent buckets processed by the sorter.
pub const DEFAULT_SORT_CONCURRENCY: usize = 10;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid JSON for [`Config`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A setting or schema field violates a constraint.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for one ingestion run and the tools applied afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    /// Directory prefix for all source files.
    #[serde(default)]
    pub source_dir: PathBuf,

    /// Source file names, relative to `source_dir`.
    #[serde(default, alias = "SASFiles")]
    pub source_files: Vec<String>,

    /// Root of the bucket store.
    pub target_dir: PathBuf,

    /// Where factor code tables are written.
    #[serde(default)]
    pub codes_dir: PathBuf,

    /// Rows pulled from a source file per chunk.
    #[serde(default = "default_chunk_size", alias = "SASChunkSize")]
    pub chunk_size: usize,

    /// Number of hash partitions.
    pub num_buckets: u32,

    /// A bucket is flushed once it buffers more than this many rows.
    #[serde(default = "default_buf_max_recs")]
    pub buf_max_recs: usize,

    /// Chunks dispatched concurrently (0 means the default of 10).
    #[serde(default)]
    pub concurrency: usize,

    /// Process at most this many chunks per file (0 means all).
    #[serde(default)]
    pub max_chunk: usize,

    #[serde(default = "default_factorize_concurrency")]
    pub factorize_concurrency: usize,

    #[serde(default = "default_sort_concurrency")]
    pub sort_concurrency: usize,

    /// Per-job deadline for file work, in seconds.
    #[serde(default)]
    pub io_timeout_secs: Option<u64>,

    /// The dataset schema, in column order.
    #[serde(default)]
    pub variables: Vec<FieldDesc>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_buf_max_recs() -> usize {
    DEFAULT_BUF_MAX_RECS
}

fn default_factorize_concurrency() -> usize {
    DEFAULT_FACTORIZE_CONCURRENCY
}

fn default_sort_concurrency() -> usize {
    DEFAULT_SORT_CONCURRENCY
}

impl Config {
    /// Creates a configuration with defaults for everything but the
    /// target directory, bucket count and schema.
    pub fn new<P: AsRef<Path>>(target_dir: P, num_buckets: u32, variables: Vec<FieldDesc>) -> Self {
        Self {
            source_dir: PathBuf::new(),
            source_files: Vec::new(),
            target_dir: target_dir.as_ref().to_path_buf(),
            codes_dir: target_dir.as_ref().join("Codes"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            num_buckets,
            buf_max_recs: DEFAULT_BUF_MAX_RECS,
            concurrency: DEFAULT_CONCURRENCY,
            max_chunk: 0,
            factorize_concurrency: DEFAULT_FACTORIZE_CONCURRENCY,
            sort_concurrency: DEFAULT_SORT_CONCURRENCY,
            io_timeout_secs: None,
            variables,
        }
    }

    /// Reads, normalizes and validates the configuration at `path`.
    ///
    /// Environment overrides are applied before validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut conf = Self::from_json(&text)?;
        conf.apply_overrides(|key| std::env::var(key).ok())?;
        conf.validate()?;
        Ok(conf)
    }

    /// Parses a configuration document and fills in defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut conf: Config = serde_json::from_str(text)?;
        if conf.concurrency == 0 {
            conf.concurrency = DEFAULT_CONCURRENCY;
        }
        if conf.codes_dir.as_os_str().is_empty() {
            conf.codes_dir = conf.target_dir.join("Codes");
        }
        Ok(conf)
    }

    /// Applies tuning overrides looked up through `lookup` (normally the
    /// process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| -> Result<Option<usize>, ConfigError> {
            match lookup(key) {
                Some(v) => v.trim().parse::<usize>().map(Some).map_err(|_| {
                    ConfigError::Invalid(format!("{key}={v} is not a non-negative integer"))
                }),
                None => Ok(None),
            }
        };

        if let Some(v) = parse("BUCKETIZE_CONCURRENCY")? {
            self.concurrency = if v == 0 { DEFAULT_CONCURRENCY } else { v };
        }
        if let Some(v) = parse("BUCKETIZE_BUF_MAX_RECS")? {
            self.buf_max_recs = v;
        }
        if let Some(v) = parse("BUCKETIZE_CHUNK_SIZE")? {
            self.chunk_size = v;
        }
        if let Some(v) = parse("BUCKETIZE_MAX_CHUNK")? {
            self.max_chunk = v;
        }
        Ok(())
    }

    /// Checks every numeric setting and the schema.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("TargetDir must be set".into()));
        }
        if self.num_buckets == 0 {
            return Err(ConfigError::Invalid("NumBuckets must be > 0".into()));
        }
        if self.num_buckets > 10_000 {
            // bucket directories are named with four digits
            return Err(ConfigError::Invalid(format!(
                "NumBuckets must be <= 10000, got {}",
                self.num_buckets
            )));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("ChunkSize must be > 0".into()));
        }
        if self.buf_max_recs == 0 {
            return Err(ConfigError::Invalid("BufMaxRecs must be > 0".into()));
        }
        if self.factorize_concurrency == 0 || self.sort_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "FactorizeConcurrency and SortConcurrency must be > 0".into(),
            ));
        }
        self.schema().map(|_| ())
    }

    /// Builds the validated [`Schema`] from `variables`.
    pub fn schema(&self) -> Result<Schema, ConfigError> {
        Schema::new(self.variables.clone())
    }

    /// Full paths of the source files.
    #[must_use]
    pub fn source_paths(&self) -> Vec<PathBuf> {
        self.source_files
            .iter()
            .map(|f| self.source_dir.join(f))
            .collect()
    }

    /// Chunk limit per file, `None` when unlimited.
    #[must_use]
    pub fn chunk_limit(&self) -> Option<usize> {
        (self.max_chunk > 0).then_some(self.max_chunk)
    }

    /// Per-job deadline for file work.
    #[must_use]
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests;
