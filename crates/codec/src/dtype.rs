use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CodecError;

/// Logical type of a column, as recorded in a bucket's `dtypes.json`.
///
/// The serialized names (`"uint8"`, ..., `"uvarint"`) are part of the
/// on-disk format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String,
    Uvarint,
}

impl DType {
    /// All logical types, in declaration order.
    pub const ALL: [DType; 8] = [
        DType::Uint8,
        DType::Uint16,
        DType::Uint32,
        DType::Uint64,
        DType::Float32,
        DType::Float64,
        DType::String,
        DType::Uvarint,
    ];

    /// The type name used in `dtypes.json`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            DType::Uint8 => "uint8",
            DType::Uint16 => "uint16",
            DType::Uint32 => "uint32",
            DType::Uint64 => "uint64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::String => "string",
            DType::Uvarint => "uvarint",
        }
    }

    /// Encoded size in bytes of one value, or `None` for variable-width types.
    #[must_use]
    pub fn width(self) -> Option<usize> {
        match self {
            DType::Uint8 => Some(1),
            DType::Uint16 => Some(2),
            DType::Uint32 | DType::Float32 => Some(4),
            DType::Uint64 | DType::Float64 => Some(8),
            DType::String | DType::Uvarint => None,
        }
    }

    /// `true` for the integer types (including `uvarint`).
    #[must_use]
    pub fn is_unsigned_int(self) -> bool {
        matches!(
            self,
            DType::Uint8 | DType::Uint16 | DType::Uint32 | DType::Uint64 | DType::Uvarint
        )
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::ALL
            .iter()
            .copied()
            .find(|d| d.name() == s)
            .ok_or_else(|| CodecError::UnknownDType(s.to_string()))
    }
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Uvarint(u64),
}

impl Value {
    /// The zero value of `dtype` (`0`, `0.0` or the empty string).
    #[must_use]
    pub fn zero(dtype: DType) -> Value {
        match dtype {
            DType::Uint8 => Value::Uint8(0),
            DType::Uint16 => Value::Uint16(0),
            DType::Uint32 => Value::Uint32(0),
            DType::Uint64 => Value::Uint64(0),
            DType::Float32 => Value::Float32(0.0),
            DType::Float64 => Value::Float64(0.0),
            DType::String => Value::String(String::new()),
            DType::Uvarint => Value::Uvarint(0),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Value::Uint8(_) => DType::Uint8,
            Value::Uint16(_) => DType::Uint16,
            Value::Uint32(_) => DType::Uint32,
            Value::Uint64(_) => DType::Uint64,
            Value::Float32(_) => DType::Float32,
            Value::Float64(_) => DType::Float64,
            Value::String(_) => DType::String,
            Value::Uvarint(_) => DType::Uvarint,
        }
    }

    /// Widens any unsigned integer value to `u64`.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::Uint8(x) => Some(u64::from(x)),
            Value::Uint16(x) => Some(u64::from(x)),
            Value::Uint32(x) => Some(u64::from(x)),
            Value::Uint64(x) | Value::Uvarint(x) => Some(x),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Uint8(x) => write!(f, "{x}"),
            Value::Uint16(x) => write!(f, "{x}"),
            Value::Uint32(x) => write!(f, "{x}"),
            Value::Uint64(x) | Value::Uvarint(x) => write!(f, "{x}"),
            Value::Float32(x) => write!(f, "{x}"),
            Value::Float64(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
        }
    }
}
