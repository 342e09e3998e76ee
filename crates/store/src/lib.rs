//! # Store - Bucketed Column Store
//!
//! Owns the on-disk layout of a dataset and the in-memory buffers that
//! ingestion fills.
//!
//! ## Layout
//!
//! ```text
//! TargetDir/
//!   conf.json                      { NumBuckets, Compression, CodesDir }
//!   Buckets/
//!     0000/
//!       dtypes.json                { field: type }
//!       dtypes_string.json         sidecar before the first factorization
//!       <Field>.bin.sz             column stream (see the codec crate)
//!       <Field>_string.bin.sz      original strings of a factorized field
//!       orig/                      pre-sort column files
//!     0001/
//!     ...
//! ```
//!
//! ## Write Path
//!
//! ```text
//! harvester ── Record ──> Bucket::append ──(rows > BufMaxRecs?)──> flush
//!                              |                                    |
//!                       Mutex<Vec<Column>>              one Snappy segment
//!                                                       appended per field
//! ```
//!
//! `dtypes.json` is the single source of truth for decoding a column file;
//! [`Store::read_all`] consults it on every open.
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                              |
//! |---------------|------------------------------------------------------|
//! | [`layout`]    | file and directory naming                            |
//! | [`meta`]      | `conf.json` and `dtypes.json`, atomic JSON writes    |
//! | [`bucket`]    | `Bucket`, `Record`, buffered append and flush        |
//! | [`transform`] | backup-then-rewrite of a single file                 |
//! | [`pool`]      | semaphore, cancellation, deadlines, bounded workers  |

mod bucket;
pub mod layout;
mod meta;
pub mod pool;
mod transform;

use codec::{ColumnReader, ColumnWriter, DType};
use config::{Config, Schema};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

pub use bucket::{Bucket, Record};
pub use meta::{write_json_atomic, StoreMeta, COMPRESSION_SNAPPY};
pub use transform::transform_file;

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// I/O or decoding failure on a specific file.
    #[error("{path}: {source}")]
    Column {
        path: PathBuf,
        #[source]
        source: codec::CodecError,
    },

    /// A JSON metadata file could not be read or written.
    #[error("{path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// `dtypes.json` names a type that does not exist.
    #[error("bucket {bucket}: field '{field}' has unknown dtype '{dtype}'")]
    UnknownDType {
        bucket: u32,
        field: String,
        dtype: String,
    },

    /// A field that is not listed in the bucket's `dtypes.json`.
    #[error("bucket {bucket}: no dtype recorded for field '{field}'")]
    MissingField { bucket: u32, field: String },

    #[error("bucket {bucket} out of range (store has {num_buckets})")]
    BucketOutOfRange { bucket: u32, num_buckets: u32 },

    /// A record that does not match the bucket's column layout.
    #[error("record does not match schema: {0}")]
    BadRecord(String),

    /// The directory does not hold a store this version understands.
    #[error("{path}: {reason}")]
    NotAStore { path: PathBuf, reason: String },

    /// The file a transform should replace does not exist.
    #[error("{0}: no such file to transform")]
    MissingSource(PathBuf),

    #[error("cancelled")]
    Cancelled,

    #[error("{what}: timed out after {secs}s")]
    TimedOut { what: String, secs: u64 },
}

impl StoreError {
    pub(crate) fn column(path: &Path, source: codec::CodecError) -> Self {
        StoreError::Column {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A dataset's bucket directories plus, for a store being ingested into,
/// one in-memory [`Bucket`] buffer per partition.
///
/// Built once per run and passed by reference to every component.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    meta: StoreMeta,
    /// Empty for a store opened with [`Store::open`].
    buckets: Vec<Bucket>,
}

impl Store {
    /// Initializes a fresh store under `conf.target_dir`.
    ///
    /// # Steps
    ///
    /// 1. Delete any previous `Buckets/` tree (ingestion is not incremental).
    /// 2. Create `Buckets/NNNN/` for every bucket and write its `dtypes.json`
    ///    from the schema's declared types.
    /// 3. Write `conf.json`.
    /// 4. Allocate one empty column buffer per bucket.
    pub fn create(conf: &Config) -> Result<Self, StoreError> {
        let schema = conf.schema()?;
        let root = conf.target_dir.clone();
        let buckets_dir = layout::buckets_dir(&root);

        if buckets_dir.exists() {
            info!(dir = %buckets_dir.display(), "purging previous buckets");
            fs::remove_dir_all(&buckets_dir)?;
        }

        let dtypes = schema.dtypes();
        let fields = Arc::new(columns_of(&schema));
        let mut buckets = Vec::with_capacity(conf.num_buckets as usize);
        for num in 0..conf.num_buckets {
            let dir = layout::bucket_dir(&root, num);
            fs::create_dir_all(&dir)?;
            write_json_atomic(&dir.join(layout::DTYPES_FILE), &dtypes)?;
            buckets.push(Bucket::new(num, dir, Arc::clone(&fields), conf.buf_max_recs));
        }

        let meta = StoreMeta::new(conf.num_buckets, conf.codes_dir.clone());
        meta.save(&root)?;
        info!(
            root = %root.display(),
            buckets = conf.num_buckets,
            fields = schema.len(),
            "store initialized"
        );

        Ok(Self {
            root,
            meta,
            buckets,
        })
    }

    /// Opens an existing store for post-ingestion tools.
    ///
    /// The returned store has no in-memory buffers; [`Store::bucket`]
    /// returns `None` for every bucket.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let meta = StoreMeta::load(&root)?;
        debug!(root = %root.display(), buckets = meta.num_buckets, "store opened");
        Ok(Self {
            root,
            meta,
            buckets: Vec::new(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    #[must_use]
    pub fn num_buckets(&self) -> u32 {
        self.meta.num_buckets
    }

    #[must_use]
    pub fn codes_dir(&self) -> &Path {
        &self.meta.codes_dir
    }

    /// The in-memory buffer of bucket `num`, if this store was created for
    /// ingestion.
    #[must_use]
    pub fn bucket(&self, num: u32) -> Option<&Bucket> {
        self.buckets.get(num as usize)
    }

    /// All in-memory buffers, in bucket order.
    #[must_use]
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Flushes every bucket once, even those with empty buffers, so that
    /// every column file exists after ingestion.
    ///
    /// Returns the number of rows written.
    pub fn flush_all(&self) -> Result<u64, StoreError> {
        let mut rows = 0;
        for b in &self.buckets {
            rows += b.flush()? as u64;
        }
        info!(buckets = self.buckets.len(), rows, "all buckets flushed");
        Ok(rows)
    }

    fn check_bucket(&self, bucket: u32) -> Result<(), StoreError> {
        if bucket >= self.meta.num_buckets {
            return Err(StoreError::BucketOutOfRange {
                bucket,
                num_buckets: self.meta.num_buckets,
            });
        }
        Ok(())
    }

    /// Directory of bucket `bucket`.
    #[must_use]
    pub fn bucket_path(&self, bucket: u32) -> PathBuf {
        layout::bucket_dir(&self.root, bucket)
    }

    /// Path of `field`'s column file in `bucket`.
    #[must_use]
    pub fn column_path(&self, bucket: u32, field: &str) -> PathBuf {
        self.bucket_path(bucket).join(layout::column_file_name(field))
    }

    /// Reads and parses `dtypes.json` of `bucket`.
    pub fn read_dtypes(&self, bucket: u32) -> Result<BTreeMap<String, DType>, StoreError> {
        self.check_bucket(bucket)?;
        meta::read_dtypes(&self.bucket_path(bucket), bucket)
    }

    /// Replaces `dtypes.json` of `bucket` atomically.
    pub fn write_dtypes(
        &self,
        bucket: u32,
        dtypes: &BTreeMap<String, DType>,
    ) -> Result<(), StoreError> {
        self.check_bucket(bucket)?;
        write_json_atomic(&self.bucket_path(bucket).join(layout::DTYPES_FILE), dtypes)
    }

    /// Opens a write session that appends one segment to `field`'s column.
    pub fn open_for_append(&self, bucket: u32, field: &str) -> Result<ColumnWriter, StoreError> {
        self.check_bucket(bucket)?;
        let path = self.column_path(bucket, field);
        ColumnWriter::append(&path).map_err(|e| StoreError::column(&path, e))
    }

    /// Opens a lazy decoder over `field`'s column in `bucket`, typed by the
    /// bucket's current `dtypes.json`.
    pub fn read_all(&self, bucket: u32, field: &str) -> Result<ColumnReader<File>, StoreError> {
        let dtypes = self.read_dtypes(bucket)?;
        let dtype = *dtypes.get(field).ok_or_else(|| StoreError::MissingField {
            bucket,
            field: field.to_string(),
        })?;
        let path = self.column_path(bucket, field);
        ColumnReader::open(&path, dtype).map_err(|e| StoreError::column(&path, e))
    }
}

/// Column names and types, in schema order.
fn columns_of(schema: &Schema) -> Vec<(String, DType)> {
    schema
        .fields()
        .iter()
        .map(|f| (f.name.clone(), f.dtype))
        .collect()
}
