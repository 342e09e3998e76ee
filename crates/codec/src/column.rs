use crate::{CodecError, DType, Value};

/// A homogeneous, growable sequence of values of one logical type.
///
/// This is both the in-memory buffer for one field of a bucket and the
/// fully-decoded form of a column file.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Uint8(Vec<u8>),
    Uint16(Vec<u16>),
    Uint32(Vec<u32>),
    Uint64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    String(Vec<String>),
    Uvarint(Vec<u64>),
}

/// Evaluates `$body` against the inner vector of any column variant.
macro_rules! each_column {
    ($col:expr, $v:ident => $body:expr) => {
        match $col {
            Column::Uint8($v) => $body,
            Column::Uint16($v) => $body,
            Column::Uint32($v) => $body,
            Column::Uint64($v) => $body,
            Column::Float32($v) => $body,
            Column::Float64($v) => $body,
            Column::String($v) => $body,
            Column::Uvarint($v) => $body,
        }
    };
}

/// Like `each_column!`, but wraps the result back into the same variant.
macro_rules! map_column {
    ($col:expr, $v:ident => $body:expr) => {
        match $col {
            Column::Uint8($v) => Column::Uint8($body),
            Column::Uint16($v) => Column::Uint16($body),
            Column::Uint32($v) => Column::Uint32($body),
            Column::Uint64($v) => Column::Uint64($body),
            Column::Float32($v) => Column::Float32($body),
            Column::Float64($v) => Column::Float64($body),
            Column::String($v) => Column::String($body),
            Column::Uvarint($v) => Column::Uvarint($body),
        }
    };
}

impl Column {
    /// Creates an empty column of the given type.
    #[must_use]
    pub fn new(dtype: DType) -> Self {
        Self::with_capacity(dtype, 0)
    }

    #[must_use]
    pub fn with_capacity(dtype: DType, cap: usize) -> Self {
        match dtype {
            DType::Uint8 => Column::Uint8(Vec::with_capacity(cap)),
            DType::Uint16 => Column::Uint16(Vec::with_capacity(cap)),
            DType::Uint32 => Column::Uint32(Vec::with_capacity(cap)),
            DType::Uint64 => Column::Uint64(Vec::with_capacity(cap)),
            DType::Float32 => Column::Float32(Vec::with_capacity(cap)),
            DType::Float64 => Column::Float64(Vec::with_capacity(cap)),
            DType::String => Column::String(Vec::with_capacity(cap)),
            DType::Uvarint => Column::Uvarint(Vec::with_capacity(cap)),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Column::Uint8(_) => DType::Uint8,
            Column::Uint16(_) => DType::Uint16,
            Column::Uint32(_) => DType::Uint32,
            Column::Uint64(_) => DType::Uint64,
            Column::Float32(_) => DType::Float32,
            Column::Float64(_) => DType::Float64,
            Column::String(_) => DType::String,
            Column::Uvarint(_) => DType::Uvarint,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        each_column!(self, v => v.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all values, keeping the allocation.
    pub fn clear(&mut self) {
        each_column!(self, v => v.clear())
    }

    /// Appends `value`, which must have the column's type.
    pub fn push(&mut self, value: Value) -> Result<(), CodecError> {
        match (self, value) {
            (Column::Uint8(v), Value::Uint8(x)) => v.push(x),
            (Column::Uint16(v), Value::Uint16(x)) => v.push(x),
            (Column::Uint32(v), Value::Uint32(x)) => v.push(x),
            (Column::Uint64(v), Value::Uint64(x)) => v.push(x),
            (Column::Float32(v), Value::Float32(x)) => v.push(x),
            (Column::Float64(v), Value::Float64(x)) => v.push(x),
            (Column::String(v), Value::String(x)) => v.push(x),
            (Column::Uvarint(v), Value::Uvarint(x)) => v.push(x),
            (col, value) => {
                return Err(CodecError::TypeMismatch {
                    expected: col.dtype(),
                    found: value.dtype(),
                })
            }
        }
        Ok(())
    }

    /// Returns the value at row `i`.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<Value> {
        match self {
            Column::Uint8(v) => v.get(i).map(|x| Value::Uint8(*x)),
            Column::Uint16(v) => v.get(i).map(|x| Value::Uint16(*x)),
            Column::Uint32(v) => v.get(i).map(|x| Value::Uint32(*x)),
            Column::Uint64(v) => v.get(i).map(|x| Value::Uint64(*x)),
            Column::Float32(v) => v.get(i).map(|x| Value::Float32(*x)),
            Column::Float64(v) => v.get(i).map(|x| Value::Float64(*x)),
            Column::String(v) => v.get(i).map(|x| Value::String(x.clone())),
            Column::Uvarint(v) => v.get(i).map(|x| Value::Uvarint(*x)),
        }
    }

    /// Iterates the column's values in row order.
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Returns a new column whose row `i` is row `perm[i]` of `self`.
    pub fn permute(&self, perm: &[usize]) -> Result<Column, CodecError> {
        let len = self.len();
        if perm.len() != len {
            return Err(CodecError::PermutationLength {
                perm: perm.len(),
                len,
            });
        }
        if let Some(&index) = perm.iter().find(|&&i| i >= len) {
            return Err(CodecError::PermutationIndex { index, len });
        }
        Ok(map_column!(self, v => perm.iter().map(|&i| v[i].to_owned()).collect()))
    }
}
