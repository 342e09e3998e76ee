//! The chunked row source that feeds the pipeline.
//!
//! A source yields chunks of at most `max_rows` rows. Each chunk holds one
//! typed slice per source column plus a per-row missing flag, in the order
//! given by [`ChunkSource::columns`].

use anyhow::{bail, Context, Result};
use config::{Schema, SourceType};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Name and representation of one source column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceField {
    pub name: String,
    pub source_type: SourceType,
}

/// Decoded cells of one column.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceData {
    Float64(Vec<f64>),
    String(Vec<String>),
}

impl SourceData {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            SourceData::Float64(v) => v.len(),
            SourceData::String(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slice(&self, start: usize, end: usize) -> SourceData {
        match self {
            SourceData::Float64(v) => SourceData::Float64(v[start..end].to_vec()),
            SourceData::String(v) => SourceData::String(v[start..end].to_vec()),
        }
    }
}

/// One column of a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceColumn {
    pub name: String,
    pub data: SourceData,
    pub missing: Vec<bool>,
}

impl SourceColumn {
    /// A numeric column; `None` cells are missing (stored as NaN).
    pub fn float64(name: &str, cells: &[Option<f64>]) -> Self {
        Self {
            name: name.to_string(),
            data: SourceData::Float64(cells.iter().map(|c| c.unwrap_or(f64::NAN)).collect()),
            missing: cells.iter().map(Option::is_none).collect(),
        }
    }

    /// A text column with no missing cells.
    pub fn string(name: &str, cells: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            data: SourceData::String(cells.iter().map(|s| s.to_string()).collect()),
            missing: vec![false; cells.len()],
        }
    }

    #[must_use]
    pub fn source_type(&self) -> SourceType {
        match self.data {
            SourceData::Float64(_) => SourceType::Float64,
            SourceData::String(_) => SourceType::String,
        }
    }
}

/// A batch of rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chunk {
    pub columns: Vec<SourceColumn>,
}

impl Chunk {
    #[must_use]
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.data.len())
    }

    /// Index of the column called `name`, compared case-insensitively.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// A stream of chunks read from one source file.
pub trait ChunkSource: Send {
    /// The columns every chunk carries, in order.
    fn columns(&self) -> &[SourceField];

    /// Reads up to `max_rows` rows; `Ok(None)` at end of input.
    fn next_chunk(&mut self, max_rows: usize) -> Result<Option<Chunk>>;
}

/// Opens source files by path.
pub trait SourceOpener: Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ChunkSource>>;
}

// -------------------- In-memory tables --------------------

/// A fully materialized table served in chunks.
#[derive(Debug, Clone)]
pub struct MemorySource {
    fields: Vec<SourceField>,
    table: Chunk,
    pos: usize,
}

impl MemorySource {
    /// # Errors
    ///
    /// Fails if the columns differ in length.
    pub fn new(columns: Vec<SourceColumn>) -> Result<Self> {
        let table = Chunk { columns };
        let rows = table.rows();
        for c in &table.columns {
            if c.data.len() != rows || c.missing.len() != rows {
                bail!(
                    "column '{}' has {} rows, expected {}",
                    c.name,
                    c.data.len(),
                    rows
                );
            }
        }
        let fields = table
            .columns
            .iter()
            .map(|c| SourceField {
                name: c.name.clone(),
                source_type: c.source_type(),
            })
            .collect();
        Ok(Self {
            fields,
            table,
            pos: 0,
        })
    }
}

impl ChunkSource for MemorySource {
    fn columns(&self) -> &[SourceField] {
        &self.fields
    }

    fn next_chunk(&mut self, max_rows: usize) -> Result<Option<Chunk>> {
        let rows = self.table.rows();
        if self.pos >= rows || max_rows == 0 {
            return Ok(None);
        }
        let end = (self.pos + max_rows).min(rows);
        let columns = self
            .table
            .columns
            .iter()
            .map(|c| SourceColumn {
                name: c.name.clone(),
                data: c.data.slice(self.pos, end),
                missing: c.missing[self.pos..end].to_vec(),
            })
            .collect();
        self.pos = end;
        Ok(Some(Chunk { columns }))
    }
}

/// Serves registered in-memory tables by path.
#[derive(Debug, Default)]
pub struct MemoryOpener {
    tables: HashMap<PathBuf, MemorySource>,
}

impl MemoryOpener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<P: AsRef<Path>>(&mut self, path: P, source: MemorySource) {
        self.tables.insert(path.as_ref().to_path_buf(), source);
    }
}

impl SourceOpener for MemoryOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ChunkSource>> {
        match self.tables.get(path) {
            Some(src) => Ok(Box::new(src.clone())),
            None => bail!("no such source table: {}", path.display()),
        }
    }
}

// -------------------- Delimited text --------------------

/// Header-first, comma-delimited text.
///
/// Cells are split on `,` with no quoting. Columns are typed by the
/// schema's `SourceType` for the field of the same (case-insensitive)
/// name; columns the schema does not mention are read as text. An empty
/// numeric cell, or SAS's `.`, is missing.
pub struct DelimitedSource<R: BufRead + Send> {
    rdr: R,
    fields: Vec<SourceField>,
    line: String,
    line_no: usize,
    name: String,
}

impl<R: BufRead + Send> DelimitedSource<R> {
    /// Reads the header line and types each column against `schema`.
    pub fn new(mut rdr: R, schema: &Schema, name: &str) -> Result<Self> {
        let mut header = String::new();
        if rdr.read_line(&mut header)? == 0 {
            bail!("{name}: empty file, expected a header line");
        }
        let fields = header
            .trim_end_matches(['\r', '\n'])
            .split(',')
            .map(|h| {
                let h = h.trim();
                let source_type = schema
                    .fields()
                    .iter()
                    .find(|f| f.source_column().eq_ignore_ascii_case(h))
                    .map_or(SourceType::String, |f| f.source_type);
                SourceField {
                    name: h.to_string(),
                    source_type,
                }
            })
            .collect();
        Ok(Self {
            rdr,
            fields,
            line: String::new(),
            line_no: 1,
            name: name.to_string(),
        })
    }
}

impl DelimitedSource<BufReader<File>> {
    pub fn open(path: &Path, schema: &Schema) -> Result<Self> {
        let f = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Self::new(BufReader::new(f), schema, &path.display().to_string())
    }
}

impl<R: BufRead + Send> ChunkSource for DelimitedSource<R> {
    fn columns(&self) -> &[SourceField] {
        &self.fields
    }

    fn next_chunk(&mut self, max_rows: usize) -> Result<Option<Chunk>> {
        let mut columns: Vec<SourceColumn> = self
            .fields
            .iter()
            .map(|f| SourceColumn {
                name: f.name.clone(),
                data: match f.source_type {
                    SourceType::Float64 => SourceData::Float64(Vec::with_capacity(max_rows)),
                    SourceType::String => SourceData::String(Vec::with_capacity(max_rows)),
                },
                missing: Vec::with_capacity(max_rows),
            })
            .collect();

        let mut rows = 0;
        while rows < max_rows {
            self.line.clear();
            if self.rdr.read_line(&mut self.line)? == 0 {
                break;
            }
            self.line_no += 1;
            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }

            let cells: Vec<&str> = line.split(',').collect();
            if cells.len() != columns.len() {
                bail!(
                    "{} line {}: {} cells, header has {}",
                    self.name,
                    self.line_no,
                    cells.len(),
                    columns.len()
                );
            }
            for (col, cell) in columns.iter_mut().zip(cells) {
                match &mut col.data {
                    SourceData::Float64(v) => {
                        let cell = cell.trim();
                        if cell.is_empty() || cell == "." {
                            v.push(f64::NAN);
                            col.missing.push(true);
                        } else {
                            let x = cell.parse::<f64>().with_context(|| {
                                format!(
                                    "{} line {}: column '{}': '{}' is not a number",
                                    self.name, self.line_no, col.name, cell
                                )
                            })?;
                            v.push(x);
                            col.missing.push(false);
                        }
                    }
                    SourceData::String(v) => {
                        v.push(cell.to_string());
                        col.missing.push(false);
                    }
                }
            }
            rows += 1;
        }

        if rows == 0 {
            return Ok(None);
        }
        Ok(Some(Chunk { columns }))
    }
}

/// Opens every path as a [`DelimitedSource`].
#[derive(Debug, Clone)]
pub struct DelimitedOpener {
    schema: Schema,
}

impl DelimitedOpener {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }
}

impl SourceOpener for DelimitedOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn ChunkSource>> {
        Ok(Box::new(DelimitedSource::open(path, &self.schema)?))
    }
}
