use byteorder::{LittleEndian, WriteBytesExt};
use snap::write::FrameEncoder;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::{write_uvarint, CodecError, Column, Value};

/// Serializes `value` in its column encoding and writes it to `w`.
fn encode_value<W: Write>(w: &mut W, value: &Value) -> io::Result<()> {
    match value {
        Value::Uint8(x) => w.write_u8(*x),
        Value::Uint16(x) => w.write_u16::<LittleEndian>(*x),
        Value::Uint32(x) => w.write_u32::<LittleEndian>(*x),
        Value::Uint64(x) => w.write_u64::<LittleEndian>(*x),
        Value::Float32(x) => w.write_f32::<LittleEndian>(*x),
        Value::Float64(x) => w.write_f64::<LittleEndian>(*x),
        Value::String(s) => {
            w.write_all(s.trim().as_bytes())?;
            w.write_all(b"\n")
        }
        Value::Uvarint(x) => write_uvarint(w, *x).map(|_| ()),
    }
}

/// Serializes every value of `column` into `w` (uncompressed).
pub fn encode_into<W: Write>(w: &mut W, column: &Column) -> io::Result<()> {
    match column {
        Column::Uint8(v) => w.write_all(v)?,
        Column::Uint16(v) => {
            for x in v {
                w.write_u16::<LittleEndian>(*x)?;
            }
        }
        Column::Uint32(v) => {
            for x in v {
                w.write_u32::<LittleEndian>(*x)?;
            }
        }
        Column::Uint64(v) => {
            for x in v {
                w.write_u64::<LittleEndian>(*x)?;
            }
        }
        Column::Float32(v) => {
            for x in v {
                w.write_f32::<LittleEndian>(*x)?;
            }
        }
        Column::Float64(v) => {
            for x in v {
                w.write_f64::<LittleEndian>(*x)?;
            }
        }
        Column::String(v) => {
            for s in v {
                w.write_all(s.trim().as_bytes())?;
                w.write_all(b"\n")?;
            }
        }
        Column::Uvarint(v) => {
            for x in v {
                write_uvarint(w, *x)?;
            }
        }
    }
    Ok(())
}

/// Returns the uncompressed encoding of `column`.
pub fn encode(column: &Column) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(column.len() * column.dtype().width().unwrap_or(4));
    encode_into(&mut buf, column)?;
    Ok(buf)
}

/// A write session on one column file.
///
/// Values are encoded into a reusable scratch buffer and pushed through a
/// Snappy frame encoder. Each session appends one self-contained frame
/// stream, so a file written by several sessions (one per flush) is still a
/// valid column.
///
/// Call [`finish`](ColumnWriter::finish) to flush the compressor, fsync and
/// close the file. Dropping an unfinished writer flushes on a best-effort
/// basis and discards any error.
pub struct ColumnWriter {
    path: PathBuf,
    enc: Option<FrameEncoder<File>>,
    /// Reusable scratch buffer to avoid allocation per value.
    scratch: Vec<u8>,
    bytes: u64,
}

impl ColumnWriter {
    /// Creates (or truncates) the column file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path.as_ref())?;
        Ok(Self::from_file(path.as_ref(), file))
    }

    /// Opens the column file at `path` for appending a new segment,
    /// creating it if needed.
    pub fn append<P: AsRef<Path>>(path: P) -> Result<Self, CodecError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self::from_file(path.as_ref(), file))
    }

    fn from_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            enc: Some(FrameEncoder::new(file)),
            scratch: Vec::with_capacity(64 * 1024),
            bytes: 0,
        }
    }

    /// Path of the file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Uncompressed bytes written so far in this session.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    fn encoder(&mut self) -> io::Result<&mut FrameEncoder<File>> {
        self.enc
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "column writer already finished"))
    }

    /// Encodes and writes a single value.
    pub fn write_value(&mut self, value: &Value) -> Result<(), CodecError> {
        self.scratch.clear();
        encode_value(&mut self.scratch, value)?;
        self.flush_scratch()
    }

    /// Encodes and writes every value of `column`.
    pub fn write_column(&mut self, column: &Column) -> Result<(), CodecError> {
        self.scratch.clear();
        encode_into(&mut self.scratch, column)?;
        self.flush_scratch()
    }

    /// Writes bytes that are already in column encoding.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.encoder()?.write_all(bytes)?;
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    fn flush_scratch(&mut self) -> Result<(), CodecError> {
        let mut scratch = std::mem::take(&mut self.scratch);
        let res = self.write_raw(&scratch);
        scratch.clear();
        self.scratch = scratch;
        res
    }

    /// Flushes the compressor, fsyncs and closes the file.
    pub fn finish(mut self) -> Result<(), CodecError> {
        let mut enc = match self.enc.take() {
            Some(enc) => enc,
            None => return Ok(()),
        };
        enc.flush()?;
        let file = enc
            .into_inner()
            .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string()))?;
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for ColumnWriter {
    fn drop(&mut self) {
        if let Some(mut enc) = self.enc.take() {
            let _ = enc.flush();
        }
    }
}
