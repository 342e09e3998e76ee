//! # Factorize - String Columns to Integer Codes
//!
//! Replaces string columns with dense `uvarint` codes drawn from one
//! dictionary shared by every selected field in every bucket.
//!
//! ```text
//! phase 1  count      worker per file ──freq map──> aggregator ──> global table
//! phase 2  rank       count desc, value asc ──> codes 0, 1, 2, ...
//!                     CodesDir/<P>Codes.json, CodesDir/<P>Codes_freq.csv
//! phase 3  rewrite    F.bin.sz ──rename──> F_string.bin.sz ──codes──> F.bin.sz
//!          sidecars   dtypes.json[F] = "uvarint", CodeGroups.json[F] = P
//! ```
//!
//! Codes can only be assigned once every file has been counted, so the
//! phases never overlap. Any failure aborts the run; buckets whose columns
//! were already rewritten get their sidecars updated before the error is
//! returned, so `dtypes.json` always describes the files next to it.

mod codes;
mod targets;

use anyhow::{Context, Result};
use codec::{ColumnReader, ColumnWriter, DType, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use store::pool::{run_bounded, CancelToken, Deadline};
use store::{layout, transform_file, write_json_atomic, Store, StoreError};
use tracing::info;

pub use codes::{count_frequencies, zero_pad, CodeTable, Frequencies};
pub use targets::{find_targets, Prefix, Target};

use codes::DEADLINE_STRIDE;

/// A value normalization applied before counting and before lookup.
pub type Normalizer = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Outcome of a factorization run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorizeReport {
    /// The dictionary name.
    pub prefix: String,
    /// Distinct field names rewritten, sorted.
    pub fields: Vec<String>,
    /// Column files rewritten.
    pub files: usize,
    /// Buckets whose sidecar changed.
    pub buckets: usize,
    /// Rows recoded over all files.
    pub rows: u64,
    /// Number of codes in the dictionary.
    pub codes: usize,
    /// `None` when nothing was selected and no dictionary was written.
    pub codes_file: Option<PathBuf>,
}

/// Outcome of [`Factorizer::revert`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertReport {
    /// Column files restored from their string backups.
    pub files: usize,
    /// Sidecars restored from `dtypes_string.json`.
    pub sidecars: usize,
}

/// One factorization of the fields a [`Prefix`] selects.
pub struct Factorizer<'a> {
    store: &'a Store,
    prefix: Prefix,
    normalize: Normalizer,
    seed_empty: bool,
    concurrency: usize,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl<'a> Factorizer<'a> {
    /// # Errors
    ///
    /// Fails if `prefix` is not a valid field prefix.
    pub fn new(store: &'a Store, prefix: &str) -> Result<Self> {
        Ok(Self {
            store,
            prefix: Prefix::parse(prefix)?,
            normalize: Box::new(|s: &str| s.to_string()),
            seed_empty: false,
            concurrency: config::DEFAULT_FACTORIZE_CONCURRENCY,
            timeout: None,
            cancel: CancelToken::new(),
        })
    }

    /// Applies `f` to every value before it is counted or coded.
    #[must_use]
    pub fn normalize<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.normalize = Box::new(f);
        self
    }

    /// Reserves code 0 for the empty string.
    #[must_use]
    pub fn seed_empty(mut self, yes: bool) -> Self {
        self.seed_empty = yes;
        self
    }

    /// Worker count for counting and rewriting.
    #[must_use]
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Per-file time limit.
    #[must_use]
    pub fn io_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Counts, ranks and rewrites every selected column.
    pub fn run(&self) -> Result<FactorizeReport> {
        let targets = find_targets(self.store, &self.prefix)?;
        let fields: Vec<String> = targets
            .iter()
            .map(|t| t.field.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if targets.is_empty() {
            info!(prefix = self.prefix.stem(), "no string columns selected, nothing to do");
            return Ok(FactorizeReport {
                prefix: self.prefix.stem().to_string(),
                fields,
                files: 0,
                buckets: 0,
                rows: 0,
                codes: 0,
                codes_file: None,
            });
        }
        info!(
            prefix = self.prefix.stem(),
            files = targets.len(),
            fields = fields.len(),
            "factorizing"
        );

        let freq = count_frequencies(
            &targets,
            &*self.normalize,
            self.concurrency,
            &self.cancel,
            self.timeout,
        )?;
        let table = CodeTable::rank(freq, self.seed_empty);
        info!(prefix = self.prefix.stem(), codes = table.len(), "codes assigned");

        let codes_dir = self.store.codes_dir();
        fs::create_dir_all(codes_dir)
            .with_context(|| format!("failed to create {}", codes_dir.display()))?;
        let codes_file = codes_dir.join(self.prefix.codes_file_name());
        table.save_codes(&codes_file)?;
        table.save_frequencies(&codes_dir.join(self.prefix.freq_file_name()))?;

        let results = run_bounded(targets.iter().collect(), self.concurrency, &self.cancel, |t| {
            self.rewrite(t, &table)
        });

        let mut done = Vec::new();
        let mut rows = 0;
        let mut failure = None;
        for (t, res) in targets.iter().zip(results) {
            match res {
                Ok(n) => {
                    rows += n;
                    done.push(t);
                }
                Err(e) => keep_first_failure(&mut failure, e),
            }
        }

        let buckets = self.mark_coded(&done)?;
        self.record_groups(&done)?;
        if let Some(e) = failure {
            return Err(e.context(format!(
                "factorizing {} stopped after {} of {} files",
                self.prefix.stem(),
                done.len(),
                targets.len()
            )));
        }

        info!(
            prefix = self.prefix.stem(),
            files = done.len(),
            buckets,
            rows,
            "factorization finished"
        );
        Ok(FactorizeReport {
            prefix: self.prefix.stem().to_string(),
            fields,
            files: done.len(),
            buckets,
            rows,
            codes: table.len(),
            codes_file: Some(codes_file),
        })
    }

    /// Moves the column aside and writes its codes in its place.
    fn rewrite(&self, target: &Target, table: &CodeTable) -> Result<u64> {
        transform_file(&target.path, &target.backup_path(), |src, dst| {
            recode(src, dst, table, &*self.normalize, &self.cancel, self.timeout)
        })
        .with_context(|| format!("bucket {}: failed to factorize {}", target.bucket, target.field))
    }

    /// Marks rewritten fields `uvarint`, keeping the first pre-coding sidecar
    /// as `dtypes_string.json`. Returns the number of buckets touched.
    fn mark_coded(&self, done: &[&Target]) -> Result<usize> {
        let mut by_bucket: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
        for t in done {
            by_bucket.entry(t.bucket).or_default().push(&t.field);
        }

        for (&bucket, fields) in &by_bucket {
            let dir = self.store.bucket_path(bucket);
            let backup = dir.join(layout::DTYPES_BACKUP_FILE);
            if !backup.exists() {
                fs::copy(dir.join(layout::DTYPES_FILE), &backup)
                    .with_context(|| format!("failed to back up {}", backup.display()))?;
            }
            let mut dtypes = self.store.read_dtypes(bucket)?;
            for f in fields {
                dtypes.insert((*f).to_string(), DType::Uvarint);
            }
            self.store.write_dtypes(bucket, &dtypes)?;
        }
        Ok(by_bucket.len())
    }

    /// Merges `field -> prefix` entries into `CodeGroups.json`.
    fn record_groups(&self, done: &[&Target]) -> Result<()> {
        if done.is_empty() {
            return Ok(());
        }
        let path = self.store.codes_dir().join(layout::CODE_GROUPS_FILE);
        let mut groups = read_code_groups(&path)?;
        for t in done {
            groups.insert(t.field.clone(), self.prefix.stem().to_string());
        }
        write_json_atomic(&path, &groups)?;
        Ok(())
    }

    /// Undoes every factorization in the store, whatever its prefix.
    ///
    /// Each `<F>_string.bin.sz` is renamed back over `<F>.bin.sz` and
    /// `dtypes_string.json` back over `dtypes.json`. Dictionaries in the
    /// codes directory are left alone.
    pub fn revert(&self) -> Result<RevertReport> {
        let mut report = RevertReport::default();
        for bucket in 0..self.store.num_buckets() {
            let dir = self.store.bucket_path(bucket);
            let entries =
                fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))?;
            for entry in entries {
                let entry = entry?;
                let name = entry.file_name();
                let Some(restored) = name.to_str().and_then(restored_name) else {
                    continue;
                };
                fs::rename(entry.path(), dir.join(&restored))
                    .with_context(|| format!("failed to restore {}", entry.path().display()))?;
                report.files += 1;
            }

            let backup = dir.join(layout::DTYPES_BACKUP_FILE);
            if backup.exists() {
                fs::rename(&backup, dir.join(layout::DTYPES_FILE))
                    .with_context(|| format!("failed to restore {}", backup.display()))?;
                report.sidecars += 1;
            }
        }
        info!(files = report.files, sidecars = report.sidecars, "factorization reverted");
        Ok(report)
    }
}

/// `<F>.bin.sz` for a backup named `<F>_string.bin.sz`.
fn restored_name(backup: &str) -> Option<String> {
    let field = layout::field_of(backup)?.strip_suffix(layout::STRING_BACKUP_SUFFIX)?;
    Some(layout::column_file_name(field))
}

/// Streams strings from `src` and writes their codes to `dst`.
fn recode(
    src: &Path,
    dst: &Path,
    table: &CodeTable,
    normalize: &(dyn Fn(&str) -> String + Send + Sync),
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> Result<u64> {
    let deadline = Deadline::new(timeout);
    let what = dst.display().to_string();
    let rdr = ColumnReader::open(src, DType::String)
        .with_context(|| format!("failed to open {}", src.display()))?;
    let mut w = ColumnWriter::create(dst).with_context(|| format!("failed to create {what}"))?;

    let mut rows = 0u64;
    for v in rdr {
        if rows % DEADLINE_STRIDE == 0 {
            cancel.check()?;
            deadline.check(&what)?;
        }
        let v = v.with_context(|| format!("{}: failed to decode row {rows}", src.display()))?;
        let s = match v {
            Value::String(s) => s,
            other => anyhow::bail!("{}: expected a string, found {:?}", src.display(), other.dtype()),
        };
        let key = normalize(&s);
        let code = table
            .code(&key)
            .with_context(|| format!("{}: no code for value {key:?}", src.display()))?;
        w.write_value(&Value::Uvarint(code))?;
        rows += 1;
    }
    w.finish()?;
    Ok(rows)
}

fn read_code_groups(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn is_cancelled(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<StoreError>(), Some(StoreError::Cancelled))
}

/// Keeps the first real failure, replacing a cancellation it caused.
fn keep_first_failure(slot: &mut Option<anyhow::Error>, e: anyhow::Error) {
    let replace = match slot {
        None => true,
        Some(cur) => is_cancelled(cur) && !is_cancelled(&e),
    };
    if replace {
        *slot = Some(e);
    }
}

/// Unwraps per-item results, preferring a real failure over the
/// cancellations it caused.
pub(crate) fn first_failure<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(results.len());
    let mut failure = None;
    for res in results {
        match res {
            Ok(v) => out.push(v),
            Err(e) => keep_first_failure(&mut failure, e),
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(out),
    }
}
