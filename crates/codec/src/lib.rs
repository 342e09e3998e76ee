//! # Codec - Column Stream Encoding
//!
//! Encodes and decodes the per-field column files of the bucket store.
//!
//! Every column file is a sequence of values of one logical type, wrapped in
//! the Snappy framing format. A file may contain several concatenated frame
//! streams (one per buffer flush); the decoder reads through all of them as a
//! single logical sequence.
//!
//! ## Value Encodings
//!
//! ```text
//! uint8 / uint16 / uint32 / uint64   raw little-endian, natural width
//! float32 / float64                  raw little-endian IEEE-754
//! string                             UTF-8, whitespace-trimmed, '\n'-terminated
//! uvarint                            base-128 varint, high bit = continuation
//! ```
//!
//! There is no record count in the stream: a column ends where its bytes end.
//! String values must not contain embedded newlines; this is not validated.
//!
//! ## Example
//!
//! ```rust,no_run
//! use codec::{Column, ColumnReader, ColumnWriter, DType};
//!
//! let mut w = ColumnWriter::create("year.bin.sz").unwrap();
//! w.write_column(&Column::Uint16(vec![2011, 2012])).unwrap();
//! w.finish().unwrap();
//!
//! for v in ColumnReader::open("year.bin.sz", DType::Uint16).unwrap() {
//!     println!("{:?}", v.unwrap());
//! }
//! ```

mod column;
mod dtype;
mod reader;
mod varint;
mod writer;

use std::io;

use thiserror::Error;

pub use column::Column;
pub use dtype::{DType, Value};
pub use reader::{read_column, read_raw, ColumnReader};
pub use varint::{read_uvarint, write_uvarint, MAX_VARINT_LEN};
pub use writer::{encode, encode_into, ColumnWriter};

/// Errors produced while encoding or decoding column streams.
#[derive(Debug, Error)]
pub enum CodecError {
    /// An underlying I/O error (including corrupt Snappy frames).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended in the middle of a value.
    #[error("truncated {0} value at end of stream")]
    Truncated(DType),

    /// A uvarint ran past 10 bytes or exceeded `u64::MAX`.
    #[error("uvarint overflows 64 bits")]
    VarintOverflow,

    /// A string column contained bytes that are not valid UTF-8.
    #[error("invalid utf-8 in string column: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A value of one type was pushed into a column of another.
    #[error("type mismatch: column is {expected}, value is {found}")]
    TypeMismatch { expected: DType, found: DType },

    /// A type name that is not one of the eight logical types.
    #[error("unknown dtype '{0}'")]
    UnknownDType(String),

    /// A permutation whose length differs from the column it reorders.
    #[error("permutation length {perm} does not match column length {len}")]
    PermutationLength { perm: usize, len: usize },

    /// A permutation entry pointing past the end of the column.
    #[error("permutation index {index} out of range for {len} rows")]
    PermutationIndex { index: usize, len: usize },
}

#[cfg(test)]
mod tests;
