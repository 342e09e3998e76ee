use anyhow::{anyhow, Context, Result};
use codec::{ColumnReader, DType, Value};
use crossbeam::channel;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;
use store::pool::{run_bounded, CancelToken, Deadline};
use store::write_json_atomic;
use tracing::debug;

use crate::targets::Target;
use crate::first_failure;

/// Values between deadline checks while streaming a column.
pub(crate) const DEADLINE_STRIDE: u64 = 64 * 1024;

/// Observed count of every distinct (normalized) value.
pub type Frequencies = HashMap<String, u64>;

/// Counts values across every target file.
///
/// Files are read by at most `concurrency` workers; each produces its own
/// table, and a single aggregator merges them, so the global table has
/// exactly one writer.
///
/// # Errors
///
/// Any read failure aborts the count and cancels the remaining workers.
pub fn count_frequencies<N>(
    targets: &[Target],
    normalize: &N,
    concurrency: usize,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> Result<Frequencies>
where
    N: Fn(&str) -> String + Sync + ?Sized,
{
    let (tx, rx) = channel::unbounded::<Frequencies>();

    thread::scope(|s| -> Result<Frequencies> {
        let aggregator = s.spawn(move || {
            let mut total = Frequencies::new();
            for part in rx {
                for (value, n) in part {
                    *total.entry(value).or_insert(0) += n;
                }
            }
            total
        });

        let results = run_bounded(targets.iter().collect(), concurrency, cancel, |t| {
            let freq = count_file(t, normalize, cancel, timeout)?;
            debug!(file = %t.path.display(), distinct = freq.len(), "counted");
            // the aggregator only exits once every sender is gone
            let _ = tx.send(freq);
            Ok::<_, anyhow::Error>(())
        });
        drop(tx);

        let total = aggregator
            .join()
            .map_err(|_| anyhow!("frequency aggregator panicked"))?;
        first_failure(results)?;
        Ok(total)
    })
}

fn count_file<N>(
    target: &Target,
    normalize: &N,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> Result<Frequencies>
where
    N: Fn(&str) -> String + Sync + ?Sized,
{
    let deadline = Deadline::new(timeout);
    let what = target.path.display().to_string();
    let rdr = ColumnReader::open(&target.path, DType::String)
        .with_context(|| format!("failed to open {what}"))?;

    let mut freq = Frequencies::new();
    for (i, v) in rdr.enumerate() {
        if i as u64 % DEADLINE_STRIDE == 0 {
            cancel.check()?;
            deadline.check(&what)?;
        }
        let v = v.with_context(|| format!("{what}: failed to decode row {i}"))?;
        if let Value::String(s) = v {
            *freq.entry(normalize(&s)).or_insert(0) += 1;
        }
    }
    Ok(freq)
}

/// Dense value-to-code assignment, most frequent value first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTable {
    /// `(value, count)` in code order; the code of entry `i` is `i`.
    ranked: Vec<(String, u64)>,
    codes: HashMap<String, u64>,
}

impl CodeTable {
    /// Ranks values by descending count, equal counts by ascending value,
    /// and numbers them `0, 1, 2, ...` in that order.
    ///
    /// With `seed_empty`, `""` is given code 0 whether or not it was
    /// observed, and every other value is numbered from 1.
    #[must_use]
    pub fn rank(mut freq: Frequencies, seed_empty: bool) -> Self {
        let seed = if seed_empty {
            Some(freq.remove("").unwrap_or(0))
        } else {
            None
        };

        let mut ranked: Vec<(String, u64)> = freq.into_iter().collect();
        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(n) = seed {
            ranked.insert(0, (String::new(), n));
        }

        let codes = ranked
            .iter()
            .enumerate()
            .map(|(code, (v, _))| (v.clone(), code as u64))
            .collect();
        Self { ranked, codes }
    }

    #[must_use]
    pub fn code(&self, value: &str) -> Option<u64> {
        self.codes.get(value).copied()
    }

    /// Number of codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// `(value, count)` pairs in code order.
    #[must_use]
    pub fn ranked(&self) -> &[(String, u64)] {
        &self.ranked
    }

    /// The `{ value: code }` map persisted as `<prefix>Codes.json`.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<&str, u64> {
        self.codes.iter().map(|(v, c)| (v.as_str(), *c)).collect()
    }

    /// Writes the value-to-code table as JSON.
    pub fn save_codes(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, &self.to_map())?;
        Ok(())
    }

    /// Writes `value,count` lines in code order.
    pub fn save_frequencies(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("csv.tmp");
        {
            let mut w = BufWriter::new(File::create(&tmp)?);
            for (value, n) in &self.ranked {
                writeln!(w, "{value},{n}")?;
            }
            w.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }
        fs::rename(&tmp, path).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Left-pads non-empty values with zeros to `width` characters.
pub fn zero_pad(width: usize) -> impl Fn(&str) -> String + Send + Sync {
    move |s: &str| {
        if s.is_empty() {
            String::new()
        } else {
            format!("{s:0>width$}")
        }
    }
}
