//! Row conversion from source cells to schema types.
//!
//! ```text
//! source      target            rule
//! float64     uint8..uint64     truncate toward zero, wrap to width (NaN -> 0)
//! float64     float32/float64   `as` cast (missing stays NaN)
//! float64     string            shortest decimal form, "" if missing
//! string      string            whitespace trim
//! string      uint8..uint64     parse as i64, then `as` cast
//! string      float32/float64   parse as f64
//! ```
//!
//! A non-empty string that fails to parse leaves the field at zero. This is
//! long-standing behavior that downstream data depends on, so it is kept,
//! but every occurrence is logged at debug level and counted per field.

use anyhow::{bail, Result};
use codec::{DType, Value};
use config::Schema;
use store::Record;
use tracing::debug;

use crate::source::{Chunk, SourceData};

/// Where each schema field comes from in one chunk.
#[derive(Debug, Clone)]
pub struct FieldPlan {
    /// Per schema field: the chunk column index, or `None` if the source
    /// lacks an optional field.
    slots: Vec<Option<usize>>,
    dtypes: Vec<DType>,
    names: Vec<String>,
    key_index: usize,
}

/// Counters for one converted chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub rows: u64,
    pub records: u64,
    pub dropped_missing_key: u64,
    /// Parse fallbacks per schema field, in schema order.
    pub fallbacks: Vec<u64>,
}

impl FieldPlan {
    /// Matches schema fields to the chunk's columns.
    ///
    /// # Errors
    ///
    /// Fails if a required field is absent from the chunk.
    pub fn resolve(schema: &Schema, chunk: &Chunk) -> Result<Self> {
        let mut slots = Vec::with_capacity(schema.len());
        for f in schema.fields() {
            let slot = chunk.column_index(f.source_column());
            if slot.is_none() && f.required {
                bail!(
                    "variable {} required but not found in source",
                    f.source_column()
                );
            }
            slots.push(slot);
        }
        Ok(Self {
            slots,
            dtypes: schema.fields().iter().map(|f| f.dtype).collect(),
            names: schema.fields().iter().map(|f| f.name.clone()).collect(),
            key_index: schema.key_index(),
        })
    }

    /// Schema fields the source does not provide.
    pub fn absent_fields(&self) -> impl Iterator<Item = &str> {
        self.slots
            .iter()
            .zip(&self.names)
            .filter(|(s, _)| s.is_none())
            .map(|(_, n)| n.as_str())
    }

    /// Converts every row of `chunk`, handing each record to `emit`.
    ///
    /// Rows whose key is missing or not a finite number are dropped. `emit`
    /// returning `false` stops the walk early.
    pub fn convert<F>(&self, chunk: &Chunk, mut emit: F) -> ChunkStats
    where
        F: FnMut(Record) -> bool,
    {
        let mut stats = ChunkStats {
            fallbacks: vec![0; self.slots.len()],
            ..ChunkStats::default()
        };
        let key_slot = self.slots[self.key_index];

        for row in 0..chunk.rows() {
            stats.rows += 1;
            let key_missing = match key_slot {
                Some(k) => {
                    let col = &chunk.columns[k];
                    col.missing[row]
                        || matches!(&col.data, SourceData::Float64(xs) if !xs[row].is_finite())
                }
                None => true,
            };
            if key_missing {
                stats.dropped_missing_key += 1;
                continue;
            }

            let mut values = Vec::with_capacity(self.slots.len());
            for (i, slot) in self.slots.iter().enumerate() {
                let dtype = self.dtypes[i];
                let v = match slot {
                    None => Value::zero(dtype),
                    Some(c) => {
                        let col = &chunk.columns[*c];
                        match &col.data {
                            SourceData::Float64(xs) => from_f64(xs[row], col.missing[row], dtype),
                            SourceData::String(xs) => match from_str(&xs[row], dtype) {
                                Some(v) => v,
                                None => {
                                    stats.fallbacks[i] += 1;
                                    debug!(
                                        field = %self.names[i],
                                        value = %xs[row].trim(),
                                        "unparseable coded value, using zero"
                                    );
                                    Value::zero(dtype)
                                }
                            },
                        }
                    }
                };
                values.push(v);
            }

            let key = values[self.key_index].as_u64().unwrap_or_default();
            if !emit(Record { key, values }) {
                break;
            }
            stats.records += 1;
        }
        stats
    }
}

/// Converts a numeric source cell.
pub fn from_f64(x: f64, missing: bool, dtype: DType) -> Value {
    match dtype {
        DType::Uint8 => Value::Uint8(wrap_u64(x) as u8),
        DType::Uint16 => Value::Uint16(wrap_u64(x) as u16),
        DType::Uint32 => Value::Uint32(wrap_u64(x) as u32),
        DType::Uint64 => Value::Uint64(wrap_u64(x)),
        DType::Uvarint => Value::Uvarint(wrap_u64(x)),
        DType::Float32 => Value::Float32(x as f32),
        DType::Float64 => Value::Float64(x),
        DType::String if missing => Value::String(String::new()),
        DType::String => Value::String(x.to_string()),
    }
}

/// Truncates toward zero and reinterprets as two's complement, so
/// narrowing keeps the low bits the way an integer cell does.
fn wrap_u64(x: f64) -> u64 {
    if x >= 9_223_372_036_854_775_808.0 {
        x as u64
    } else {
        x as i64 as u64
    }
}

/// Converts a text source cell; `None` on a failed parse of a non-empty
/// cell.
pub fn from_str(s: &str, dtype: DType) -> Option<Value> {
    let s = s.trim();
    if dtype == DType::String {
        return Some(Value::String(s.to_string()));
    }
    if s.is_empty() {
        return Some(Value::zero(dtype));
    }
    let v = match dtype {
        DType::Float32 => Value::Float32(s.parse::<f64>().ok()? as f32),
        DType::Float64 => Value::Float64(s.parse::<f64>().ok()?),
        _ => {
            let n = s.parse::<i64>().ok()?;
            match dtype {
                DType::Uint8 => Value::Uint8(n as u8),
                DType::Uint16 => Value::Uint16(n as u16),
                DType::Uint32 => Value::Uint32(n as u32),
                DType::Uint64 => Value::Uint64(n as u64),
                _ => Value::Uvarint(n as u64),
            }
        }
    };
    Some(v)
}
