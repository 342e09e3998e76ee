use super::*;
use snap::write::FrameEncoder;
use std::io::{Cursor, Write};
use tempfile::tempdir;

fn sample_columns() -> Vec<Column> {
    vec![
        Column::Uint8(vec![0, 1, 255]),
        Column::Uint16(vec![0, 2011, u16::MAX]),
        Column::Uint32(vec![7, u32::MAX]),
        Column::Uint64(vec![10, 11, 12, u64::MAX]),
        Column::Float32(vec![1.5, -0.25]),
        Column::Float64(vec![3.25, f64::MIN_POSITIVE, -1e300]),
        Column::String(vec!["V700".into(), "".into(), "4019".into()]),
        Column::Uvarint(vec![0, 127, 128, 300, u64::MAX]),
    ]
}

fn snappy(bytes: &[u8]) -> Vec<u8> {
    let mut enc = FrameEncoder::new(Vec::new());
    enc.write_all(bytes).unwrap();
    match enc.into_inner() {
        Ok(buf) => buf,
        Err(e) => panic!("snappy flush failed: {}", e.error()),
    }
}

// -------------------- Round trips --------------------

#[test]
fn every_dtype_round_trips_through_a_file() {
    let dir = tempdir().unwrap();
    for col in sample_columns() {
        let path = dir.path().join(format!("{}.bin.sz", col.dtype()));
        let mut w = ColumnWriter::create(&path).unwrap();
        w.write_column(&col).unwrap();
        w.finish().unwrap();

        assert_eq!(read_column(&path, col.dtype()).unwrap(), col);
    }
}

#[test]
fn empty_column_round_trips() {
    let dir = tempdir().unwrap();
    for dtype in DType::ALL {
        let path = dir.path().join(format!("{dtype}.bin.sz"));
        let w = ColumnWriter::create(&path).unwrap();
        w.finish().unwrap();

        let col = read_column(&path, dtype).unwrap();
        assert!(col.is_empty());
        assert_eq!(col.dtype(), dtype);
    }
}

#[test]
fn appended_segments_decode_as_one_sequence() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seqnum.bin.sz");

    for chunk in [vec![1u64, 2], vec![], vec![3, 4, 5]] {
        let mut w = ColumnWriter::append(&path).unwrap();
        w.write_column(&Column::Uint64(chunk)).unwrap();
        w.finish().unwrap();
    }

    let col = read_column(&path, DType::Uint64).unwrap();
    assert_eq!(col, Column::Uint64(vec![1, 2, 3, 4, 5]));
}

#[test]
fn write_value_matches_write_column() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.bin.sz");
    let b = dir.path().join("b.bin.sz");

    let col = Column::Uvarint(vec![5, 500, 50_000]);
    let mut w = ColumnWriter::create(&a).unwrap();
    w.write_column(&col).unwrap();
    w.finish().unwrap();

    let mut w = ColumnWriter::create(&b).unwrap();
    for v in col.iter() {
        w.write_value(&v).unwrap();
    }
    assert_eq!(w.bytes_written(), 1 + 2 + 3);
    w.finish().unwrap();

    assert_eq!(read_raw(&a).unwrap(), read_raw(&b).unwrap());
}

// -------------------- Encoding details --------------------

#[test]
fn fixed_width_is_little_endian() {
    let bytes = encode(&Column::Uint16(vec![0x0102])).unwrap();
    assert_eq!(bytes, vec![0x02, 0x01]);

    let bytes = encode(&Column::Uint64(vec![1])).unwrap();
    assert_eq!(bytes, vec![1, 0, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn strings_are_trimmed_and_newline_terminated() {
    let bytes = encode(&Column::String(vec!["  250.00 ".into(), "x".into()])).unwrap();
    assert_eq!(bytes, b"250.00\nx\n".to_vec());
}

#[test]
fn uvarint_known_encodings() {
    let mut buf = Vec::new();
    assert_eq!(write_uvarint(&mut buf, 1).unwrap(), 1);
    assert_eq!(write_uvarint(&mut buf, 300).unwrap(), 2);
    assert_eq!(write_uvarint(&mut buf, u64::MAX).unwrap(), MAX_VARINT_LEN);
    assert_eq!(&buf[..3], &[0x01, 0xAC, 0x02]);

    let mut r = Cursor::new(buf);
    assert_eq!(read_uvarint(&mut r).unwrap(), Some(1));
    assert_eq!(read_uvarint(&mut r).unwrap(), Some(300));
    assert_eq!(read_uvarint(&mut r).unwrap(), Some(u64::MAX));
    assert_eq!(read_uvarint(&mut r).unwrap(), None);
}

// -------------------- Corruption --------------------

#[test]
fn uvarint_overflow_is_rejected() {
    let bytes = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
    let res = read_uvarint(&mut Cursor::new(bytes));
    assert!(matches!(res, Err(CodecError::VarintOverflow)));
}

#[test]
fn uvarint_cut_mid_value_is_truncated() {
    let res = read_uvarint(&mut Cursor::new(vec![0x80, 0x80]));
    assert!(matches!(res, Err(CodecError::Truncated(DType::Uvarint))));
}

#[test]
fn partial_fixed_width_value_is_truncated() {
    let data = snappy(&[0x01, 0x00, 0x02]);
    let mut r = ColumnReader::from_reader(Cursor::new(data), DType::Uint16);

    assert_eq!(r.next().unwrap().unwrap(), Value::Uint16(1));
    assert!(matches!(r.next(), Some(Err(CodecError::Truncated(DType::Uint16)))));
    assert!(r.next().is_none());
}

#[test]
fn unterminated_last_string_is_still_yielded() {
    let data = snappy(b"a\nb");
    let vals: Vec<Value> = ColumnReader::from_reader(Cursor::new(data), DType::String)
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(vals, vec![Value::String("a".into()), Value::String("b".into())]);
}

#[test]
fn garbage_is_not_a_snappy_stream() {
    let mut r = ColumnReader::from_reader(Cursor::new(b"not snappy".to_vec()), DType::Uint8);
    assert!(matches!(r.next(), Some(Err(CodecError::Io(_)))));
}

// -------------------- Types and columns --------------------

#[test]
fn dtype_names_parse_back() {
    for dtype in DType::ALL {
        assert_eq!(dtype.name().parse::<DType>().unwrap(), dtype);
    }
    assert!(matches!("int8".parse::<DType>(), Err(CodecError::UnknownDType(_))));
}

#[test]
fn dtype_serializes_as_lowercase_name() {
    assert_eq!(serde_json::to_string(&DType::Uvarint).unwrap(), "\"uvarint\"");
    let d: DType = serde_json::from_str("\"float32\"").unwrap();
    assert_eq!(d, DType::Float32);
    assert_eq!(d.width(), Some(4));
    assert_eq!(DType::String.width(), None);
}

#[test]
fn push_rejects_wrong_type() {
    let mut col = Column::new(DType::Uint8);
    col.push(Value::Uint8(3)).unwrap();
    let err = col.push(Value::Uint16(3)).unwrap_err();
    assert!(matches!(
        err,
        CodecError::TypeMismatch {
            expected: DType::Uint8,
            found: DType::Uint16
        }
    ));
    assert_eq!(col.len(), 1);
}

#[test]
fn permute_reorders_rows() {
    let col = Column::String(vec!["a".into(), "b".into(), "c".into(), "d".into()]);
    let out = col.permute(&[1, 2, 0, 3]).unwrap();
    assert_eq!(
        out,
        Column::String(vec!["b".into(), "c".into(), "a".into(), "d".into()])
    );
}

#[test]
fn permute_checks_bounds() {
    let col = Column::Uint8(vec![1, 2]);
    assert!(matches!(
        col.permute(&[0]),
        Err(CodecError::PermutationLength { perm: 1, len: 2 })
    ));
    assert!(matches!(
        col.permute(&[0, 2]),
        Err(CodecError::PermutationIndex { index: 2, len: 2 })
    ));
}

#[test]
fn value_widening() {
    assert_eq!(Value::Uint16(9).as_u64(), Some(9));
    assert_eq!(Value::Uvarint(9).as_u64(), Some(9));
    assert_eq!(Value::Float64(9.0).as_u64(), None);
    assert_eq!(Value::zero(DType::String), Value::String(String::new()));
}
