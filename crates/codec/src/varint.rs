//! Base-128 variable-length unsigned integers.
//!
//! Seven payload bits per byte, least-significant group first; the high bit
//! of each byte is set when more bytes follow. A `u64` needs at most 10 bytes.

use byteorder::ReadBytesExt;
use std::io::{self, Read, Write};

use crate::{CodecError, DType};

/// Maximum encoded length of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Writes `value` as a uvarint and returns the number of bytes written.
pub fn write_uvarint<W: Write>(w: &mut W, mut value: u64) -> io::Result<usize> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let mut n = 0;
    while value >= 0x80 {
        buf[n] = (value as u8) | 0x80;
        value >>= 7;
        n += 1;
    }
    buf[n] = value as u8;
    n += 1;
    w.write_all(&buf[..n])?;
    Ok(n)
}

/// Reads one uvarint.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes left), and
/// [`CodecError::Truncated`] if the stream ends inside a value.
pub fn read_uvarint<R: Read>(r: &mut R) -> Result<Option<u64>, CodecError> {
    let mut result = 0u64;
    let mut shift = 0u32;

    for i in 0..MAX_VARINT_LEN {
        let byte = match r.read_u8() {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                if i == 0 {
                    return Ok(None);
                }
                return Err(CodecError::Truncated(DType::Uvarint));
            }
            Err(e) => return Err(CodecError::Io(e)),
        };

        // the tenth byte may only carry the single top bit of a u64
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(CodecError::VarintOverflow);
        }

        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some(result));
        }
        shift += 7;
    }

    Err(CodecError::VarintOverflow)
}
