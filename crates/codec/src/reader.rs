use byteorder::{ByteOrder, LittleEndian};
use snap::read::FrameDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use crate::{read_uvarint, CodecError, Column, DType, Value};

/// Streaming decoder for one column file.
///
/// Generic over any `Read` implementor so that tests can decode in-memory
/// buffers. Yields values until the compressed stream is exhausted; a value
/// cut off by the end of the stream is reported as [`CodecError::Truncated`].
pub struct ColumnReader<R: Read> {
    rdr: BufReader<FrameDecoder<R>>,
    dtype: DType,
    /// Reusable line buffer for string columns.
    line: Vec<u8>,
    done: bool,
}

impl ColumnReader<File> {
    /// Opens the column file at `path`, to be decoded as `dtype`.
    pub fn open<P: AsRef<Path>>(path: P, dtype: DType) -> Result<ColumnReader<File>, CodecError> {
        let f = File::open(path)?;
        Ok(ColumnReader::from_reader(f, dtype))
    }
}

impl<R: Read> ColumnReader<R> {
    /// Constructs a decoder over any Snappy-framed byte source.
    pub fn from_reader(reader: R, dtype: DType) -> Self {
        ColumnReader {
            rdr: BufReader::with_capacity(64 * 1024, FrameDecoder::new(reader)),
            dtype,
            line: Vec::with_capacity(64),
            done: false,
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Decodes the next value, or `Ok(None)` at end of stream.
    pub fn next_value(&mut self) -> Result<Option<Value>, CodecError> {
        match self.dtype {
            DType::String => {
                self.line.clear();
                let n = self.rdr.read_until(b'\n', &mut self.line)?;
                if n == 0 {
                    return Ok(None);
                }
                if self.line.last() == Some(&b'\n') {
                    self.line.pop();
                }
                let s = String::from_utf8(std::mem::take(&mut self.line))?;
                Ok(Some(Value::String(s)))
            }
            DType::Uvarint => Ok(read_uvarint(&mut self.rdr)?.map(Value::Uvarint)),
            fixed => {
                let mut buf = [0u8; 8];
                let width = fixed.width().unwrap_or(8);
                let n = read_full(&mut self.rdr, &mut buf[..width])?;
                if n == 0 {
                    return Ok(None);
                }
                if n < width {
                    return Err(CodecError::Truncated(fixed));
                }
                let b = &buf[..width];
                let v = match fixed {
                    DType::Uint8 => Value::Uint8(b[0]),
                    DType::Uint16 => Value::Uint16(LittleEndian::read_u16(b)),
                    DType::Uint32 => Value::Uint32(LittleEndian::read_u32(b)),
                    DType::Uint64 => Value::Uint64(LittleEndian::read_u64(b)),
                    DType::Float32 => Value::Float32(LittleEndian::read_f32(b)),
                    DType::Float64 => Value::Float64(LittleEndian::read_f64(b)),
                    DType::String | DType::Uvarint => unreachable!("variable-width types handled above"),
                };
                Ok(Some(v))
            }
        }
    }
}

impl<R: Read> Iterator for ColumnReader<R> {
    type Item = Result<Value, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_value() {
            Ok(Some(v)) => Some(Ok(v)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Decodes the whole column file at `path` into memory.
pub fn read_column<P: AsRef<Path>>(path: P, dtype: DType) -> Result<Column, CodecError> {
    let mut col = Column::new(dtype);
    for v in ColumnReader::open(path, dtype)? {
        col.push(v?)?;
    }
    Ok(col)
}

/// Decompresses the column file at `path` without decoding values.
pub fn read_raw<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, CodecError> {
    let f = File::open(path)?;
    let mut out = Vec::new();
    FrameDecoder::new(f).read_to_end(&mut out)?;
    Ok(out)
}
