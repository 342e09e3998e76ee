use codec::{Column, ColumnWriter, DType, Value};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::{layout, StoreError};

/// One converted row: a value per schema field, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// The key field's value, duplicated here for partitioning.
    pub key: u64,
    pub values: Vec<Value>,
}

/// A hash partition's in-memory column buffer.
///
/// Appends and flushes take the same mutex, so a concurrent appender never
/// sees a buffer that is half written out or half cleared.
pub struct Bucket {
    num: u32,
    dir: PathBuf,
    fields: Arc<Vec<(String, DType)>>,
    buf_max_recs: usize,
    columns: Mutex<Vec<Column>>,
    flushes: AtomicU64,
    flushed_rows: AtomicU64,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("num", &self.num)
            .field("dir", &self.dir)
            .field("buffered", &self.len())
            .field("flushes", &self.flush_count())
            .finish()
    }
}

impl Bucket {
    pub(crate) fn new(
        num: u32,
        dir: PathBuf,
        fields: Arc<Vec<(String, DType)>>,
        buf_max_recs: usize,
    ) -> Self {
        let columns = fields.iter().map(|(_, d)| Column::new(*d)).collect();
        Self {
            num,
            dir,
            fields,
            buf_max_recs,
            columns: Mutex::new(columns),
            flushes: AtomicU64::new(0),
            flushed_rows: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn num(&self) -> u32 {
        self.num
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rows currently buffered in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.lock().first().map_or(0, Column::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completed flushes.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Rows written to disk so far.
    #[must_use]
    pub fn flushed_rows(&self) -> u64 {
        self.flushed_rows.load(Ordering::Relaxed)
    }

    /// Appends `record` to the buffer and flushes if the buffer then holds
    /// more than `BufMaxRecs` rows. Returns `true` if a flush happened.
    ///
    /// # Errors
    ///
    /// A record whose arity or value types do not match the bucket's
    /// columns is rejected before any column is touched, so the columns stay
    /// the same length.
    pub fn append(&self, record: Record) -> Result<bool, StoreError> {
        if record.values.len() != self.fields.len() {
            return Err(StoreError::BadRecord(format!(
                "{} values for {} fields",
                record.values.len(),
                self.fields.len()
            )));
        }
        for ((name, dtype), v) in self.fields.iter().zip(&record.values) {
            if v.dtype() != *dtype {
                return Err(StoreError::BadRecord(format!(
                    "field '{name}' is {dtype}, value is {}",
                    v.dtype()
                )));
            }
        }

        let mut columns = self.columns.lock();
        for (col, v) in columns.iter_mut().zip(record.values) {
            col.push(v).map_err(|e| StoreError::BadRecord(e.to_string()))?;
        }

        if columns.first().map_or(0, Column::len) > self.buf_max_recs {
            self.flush_locked(&mut columns)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Writes the buffer out as one new segment per column file and clears
    /// it. Column files are created even if the buffer is empty.
    ///
    /// Returns the number of rows written.
    pub fn flush(&self) -> Result<usize, StoreError> {
        let mut columns = self.columns.lock();
        self.flush_locked(&mut columns)
    }

    fn flush_locked(&self, columns: &mut [Column]) -> Result<usize, StoreError> {
        let rows = columns.first().map_or(0, Column::len);
        for ((name, _), col) in self.fields.iter().zip(columns.iter()) {
            let path = self.dir.join(layout::column_file_name(name));
            let mut w = ColumnWriter::append(&path).map_err(|e| StoreError::column(&path, e))?;
            w.write_column(col)
                .map_err(|e| StoreError::column(&path, e))?;
            w.finish().map_err(|e| StoreError::column(&path, e))?;
        }

        // cleared only after every column is on disk
        for col in columns.iter_mut() {
            col.clear();
        }
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.flushed_rows.fetch_add(rows as u64, Ordering::Relaxed);
        debug!(bucket = self.num, rows, "bucket flushed");
        Ok(rows)
    }
}
