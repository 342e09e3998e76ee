//! # Sorter - In-Place Bucket Sort
//!
//! Physically reorders every column of every bucket so rows are sorted by
//! an id field and, optionally, a time field.
//!
//! ```text
//! per bucket (at most SortConcurrency at once)
//!   decode id [+ time] ──stable sort──> permutation
//!   for each field in dtypes.json:
//!     F.bin.sz ──rename──> orig/F.bin.sz ──permute──> F.bin.sz
//!       fixed width   raw records moved as whole byte slices
//!       uvarint       decoded, permuted, re-encoded
//!       string        decoded line by line, permuted, re-encoded
//! ```
//!
//! `<F>_string.bin.sz` factorizer backups are not listed in `dtypes.json`
//! and are never touched. The sort is stable, so sorting a sorted bucket
//! writes back the same rows in the same order.

mod permute;

use anyhow::{bail, Context, Result};
use codec::{read_column, read_raw, ColumnWriter, DType};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use store::pool::{run_bounded, CancelToken, Deadline};
use store::{layout, transform_file, Store, StoreError};
use tracing::{debug, info, warn};

pub use permute::{is_identity, permutation, reorder_fixed, reorder_values};

/// The fields a sort orders by. At least one is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKeys {
    id: Option<String>,
    time: Option<String>,
}

impl SortKeys {
    /// # Errors
    ///
    /// Fails if neither field is given.
    pub fn new(id: Option<&str>, time: Option<&str>) -> Result<Self> {
        if id.is_none() && time.is_none() {
            bail!("sorting needs an id field, a time field, or both");
        }
        Ok(Self {
            id: id.map(str::to_string),
            time: time.map(str::to_string),
        })
    }

    /// The field compared first.
    #[must_use]
    pub fn primary(&self) -> &str {
        self.id.as_deref().or(self.time.as_deref()).unwrap_or_default()
    }

    /// The field that breaks ties, if both are set.
    #[must_use]
    pub fn secondary(&self) -> Option<&str> {
        self.id.as_ref().and(self.time.as_deref())
    }
}

/// Outcome of sorting one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSort {
    pub bucket: u32,
    pub rows: usize,
    /// Column files rewritten.
    pub fields: usize,
    /// The rows were already in order.
    pub already_sorted: bool,
}

/// Outcome of a sort over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortReport {
    pub sorted: Vec<BucketSort>,
    /// Buckets that failed or were cancelled, with the reason.
    pub failed: Vec<(u32, String)>,
}

impl SortReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Rows reordered over every sorted bucket.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.sorted.iter().map(|b| b.rows).sum()
    }
}

/// Sorts every bucket of a store.
pub struct Sorter<'a> {
    store: &'a Store,
    keys: SortKeys,
    concurrency: usize,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl<'a> Sorter<'a> {
    #[must_use]
    pub fn new(store: &'a Store, keys: SortKeys) -> Self {
        Self {
            store,
            keys,
            concurrency: config::DEFAULT_SORT_CONCURRENCY,
            timeout: None,
            cancel: CancelToken::new(),
        }
    }

    /// Buckets sorted at once; each holds its key columns in memory.
    #[must_use]
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Per-bucket time limit.
    #[must_use]
    pub fn io_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Sorts every bucket. The first failure cancels the buckets not yet
    /// started; all outcomes are in the report.
    pub fn run(&self) -> SortReport {
        let buckets: Vec<u32> = (0..self.store.num_buckets()).collect();
        info!(
            buckets = buckets.len(),
            id = ?self.keys.id,
            time = ?self.keys.time,
            concurrency = self.concurrency,
            "sort started"
        );

        let results = run_bounded(buckets.clone(), self.concurrency, &self.cancel, |b| {
            sort_bucket(self.store, b, &self.keys, &self.cancel, self.timeout)
        });

        let mut report = SortReport::default();
        for (b, res) in buckets.into_iter().zip(results) {
            match res {
                Ok(s) => report.sorted.push(s),
                Err(e) => {
                    let cancelled =
                        matches!(e.downcast_ref::<StoreError>(), Some(StoreError::Cancelled));
                    if !cancelled {
                        warn!(bucket = b, error = %format!("{e:#}"), "bucket sort failed");
                    }
                    report.failed.push((b, format!("{e:#}")));
                }
            }
        }
        info!(
            sorted = report.sorted.len(),
            failed = report.failed.len(),
            rows = report.rows(),
            "sort finished"
        );
        report
    }

    /// Undoes the last sort; see [`revert`].
    pub fn revert(&self) -> Result<usize> {
        revert(self.store)
    }
}

/// Moves every file in each bucket's `orig/` back into the bucket, undoing
/// the last sort. Returns the number of files restored.
pub fn revert(store: &Store) -> Result<usize> {
    let mut restored = 0;
    for b in 0..store.num_buckets() {
        let dir = store.bucket_path(b);
        let orig = dir.join(layout::ORIG_DIR);
        if !orig.is_dir() {
            continue;
        }
        let entries =
            fs::read_dir(&orig).with_context(|| format!("failed to list {}", orig.display()))?;
        for entry in entries {
            let entry = entry?;
            fs::rename(entry.path(), dir.join(entry.file_name()))
                .with_context(|| format!("failed to restore {}", entry.path().display()))?;
            restored += 1;
        }
        fs::remove_dir(&orig).with_context(|| format!("failed to remove {}", orig.display()))?;
    }
    info!(files = restored, "sort reverted");
    Ok(restored)
}

/// Sorts one bucket in place.
///
/// # Errors
///
/// Fails if a sort field is missing from `dtypes.json` or is not an
/// unsigned integer type, if a column's row count disagrees with the sort
/// columns, or on any I/O error. Files rewritten before the failure keep
/// their backups in `orig/`.
pub fn sort_bucket(
    store: &Store,
    bucket: u32,
    keys: &SortKeys,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> Result<BucketSort> {
    let deadline = Deadline::new(timeout);
    let what = format!("bucket {bucket}");
    let dtypes = store.read_dtypes(bucket)?;

    let primary = read_key(store, bucket, &dtypes, keys.primary())?;
    let secondary = match keys.secondary() {
        Some(f) => Some(read_key(store, bucket, &dtypes, f)?),
        None => None,
    };
    let perm = permutation(&primary, secondary.as_deref())
        .with_context(|| format!("bucket {bucket}"))?;
    let already_sorted = is_identity(&perm);
    debug!(bucket, rows = perm.len(), already_sorted, "permutation ready");

    let orig = store.bucket_path(bucket).join(layout::ORIG_DIR);
    for (field, &dtype) in &dtypes {
        cancel.check()?;
        deadline.check(&what)?;
        let path = store.column_path(bucket, field);
        let backup = orig.join(layout::column_file_name(field));
        transform_file(&path, &backup, |src, dst| reorder_file(src, dst, dtype, &perm))
            .with_context(|| format!("bucket {bucket}: failed to reorder {field} ({dtype})"))?;
    }

    info!(bucket, rows = perm.len(), fields = dtypes.len(), "bucket sorted");
    Ok(BucketSort {
        bucket,
        rows: perm.len(),
        fields: dtypes.len(),
        already_sorted,
    })
}

/// Decodes a sort field as `u64`s.
fn read_key(
    store: &Store,
    bucket: u32,
    dtypes: &BTreeMap<String, DType>,
    field: &str,
) -> Result<Vec<u64>> {
    let dtype = match dtypes.get(field) {
        Some(d) => *d,
        None => bail!("bucket {bucket}: sort field '{field}' is not in dtypes.json"),
    };
    if !dtype.is_unsigned_int() {
        bail!("bucket {bucket}: cannot sort on field '{field}' of type {dtype}");
    }

    let mut out = Vec::new();
    for v in store.read_all(bucket, field)? {
        let v = v.with_context(|| format!("bucket {bucket}: failed to decode {field}"))?;
        match v.as_u64() {
            Some(x) => out.push(x),
            None => bail!("bucket {bucket}: {field} holds a {} value", v.dtype()),
        }
    }
    Ok(out)
}

fn reorder_file(src: &Path, dst: &Path, dtype: DType, perm: &[usize]) -> Result<()> {
    let mut w = ColumnWriter::create(dst)?;
    match dtype.width() {
        Some(width) => {
            let raw = read_raw(src)?;
            w.write_raw(&reorder_fixed(&raw, width, perm)?)?;
        }
        None => {
            let column = read_column(src, dtype)?;
            w.write_column(&reorder_values(&column, perm)?)?;
        }
    }
    w.finish()?;
    Ok(())
}
