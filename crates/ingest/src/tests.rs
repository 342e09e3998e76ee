use super::*;
use anyhow::Result;
use codec::{DType, Value};
use config::{Config, FieldDesc, Schema, SourceType};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use store::Store;
use tempfile::tempdir;

fn fields() -> Vec<FieldDesc> {
    vec![
        FieldDesc::new("Enrolid", DType::Uint64, SourceType::Float64).key(),
        FieldDesc::new("Svcdate", DType::Uint16, SourceType::Float64).required(),
        FieldDesc::new("Netpay", DType::Float32, SourceType::Float64),
        FieldDesc::new("Dx1", DType::String, SourceType::String),
        FieldDesc::new("Sex", DType::Uint8, SourceType::String),
    ]
}

fn test_config(root: &Path, num_buckets: u32) -> Config {
    let mut conf = Config::new(root, num_buckets, fields());
    conf.chunk_size = 2;
    conf.buf_max_recs = 3;
    conf.concurrency = 2;
    conf
}

fn claims(keys: &[Option<f64>]) -> MemorySource {
    let n = keys.len();
    let dates: Vec<Option<f64>> = (0..n).map(|i| Some(18_000.0 + i as f64 + 0.9)).collect();
    let pay: Vec<Option<f64>> = (0..n).map(|i| Some(i as f64 * 1.5)).collect();
    let dx: Vec<String> = (0..n).map(|i| format!(" V{i:02} ")).collect();
    let dx: Vec<&str> = dx.iter().map(String::as_str).collect();
    let sex: Vec<&str> = (0..n).map(|i| if i % 2 == 0 { "1" } else { "2" }).collect();
    MemorySource::new(vec![
        SourceColumn::float64("ENROLID", keys),
        SourceColumn::float64("SVCDATE", &dates),
        SourceColumn::float64("NETPAY", &pay),
        SourceColumn::string("DX1", &dx),
        SourceColumn::string("SEX", &sex),
    ])
    .unwrap()
}

fn decode(store: &Store, bucket: u32, field: &str) -> Result<Vec<Value>> {
    Ok(store.read_all(bucket, field)?.collect::<Result<_, _>>()?)
}

fn total_rows(store: &Store, field: &str) -> Result<usize> {
    let mut n = 0;
    for b in 0..store.num_buckets() {
        n += store.read_all(b, field)?.count();
    }
    Ok(n)
}

// -------------------- Conversion rules --------------------

#[test]
fn numeric_cells_truncate_by_cast() {
    use convert::from_f64;
    assert_eq!(from_f64(2.9, false, DType::Uint8), Value::Uint8(2));
    // out-of-range values keep their low bits, like integer text cells
    assert_eq!(from_f64(300.7, false, DType::Uint8), Value::Uint8(44));
    assert_eq!(from_f64(70_000.0, false, DType::Uint16), Value::Uint16(4464));
    assert_eq!(from_f64(-4.0, false, DType::Uint16), Value::Uint16(65532));
    assert_eq!(
        Some(from_f64(-4.0, false, DType::Uint16)),
        convert::from_str("-4", DType::Uint16)
    );
    assert_eq!(from_f64(1e19, false, DType::Uint64), Value::Uint64(10_000_000_000_000_000_000));
    assert_eq!(from_f64(f64::NAN, true, DType::Uint32), Value::Uint32(0));
    assert_eq!(from_f64(1.25, false, DType::Float32), Value::Float32(1.25));
    assert_eq!(from_f64(250.0, false, DType::String), Value::String("250".into()));
    assert_eq!(from_f64(f64::NAN, true, DType::String), Value::String(String::new()));
    match from_f64(f64::NAN, true, DType::Float64) {
        Value::Float64(x) => assert!(x.is_nan()),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn text_cells_trim_and_parse() {
    use convert::from_str;
    assert_eq!(from_str("  4019 ", DType::String), Some(Value::String("4019".into())));
    assert_eq!(from_str(" 2 ", DType::Uint8), Some(Value::Uint8(2)));
    assert_eq!(from_str("", DType::Uint8), Some(Value::Uint8(0)));
    assert_eq!(from_str("   ", DType::Uint16), Some(Value::Uint16(0)));
    assert_eq!(from_str("2.5", DType::Float64), Some(Value::Float64(2.5)));
    assert_eq!(from_str("M", DType::Uint8), None);
    assert_eq!(from_str("2.5", DType::Uint8), None);
}

#[test]
fn missing_key_rows_are_dropped() -> Result<()> {
    let schema = Schema::new(fields())?;
    let mut src = claims(&[Some(1.0), None, Some(3.0)]);
    let chunk = src.next_chunk(10)?.unwrap();
    let plan = FieldPlan::resolve(&schema, &chunk)?;

    let mut keys = Vec::new();
    let stats = plan.convert(&chunk, |rec| {
        keys.push(rec.key);
        true
    });
    assert_eq!(keys, vec![1, 3]);
    assert_eq!(stats.rows, 3);
    assert_eq!(stats.records, 2);
    assert_eq!(stats.dropped_missing_key, 1);
    Ok(())
}

#[test]
fn non_finite_keys_are_dropped() -> Result<()> {
    let schema = Schema::new(fields())?;
    let mut src = claims(&[Some(f64::NAN), Some(7.0), Some(f64::INFINITY), Some(f64::NEG_INFINITY)]);
    let chunk = src.next_chunk(10)?.unwrap();
    let plan = FieldPlan::resolve(&schema, &chunk)?;

    let mut keys = Vec::new();
    let stats = plan.convert(&chunk, |rec| {
        keys.push(rec.key);
        true
    });
    assert_eq!(keys, vec![7]);
    assert_eq!(stats.records, 1);
    assert_eq!(stats.dropped_missing_key, 3);
    Ok(())
}

#[test]
fn required_field_must_be_present() -> Result<()> {
    let schema = Schema::new(fields())?;
    let chunk = Chunk {
        columns: vec![SourceColumn::float64("ENROLID", &[Some(1.0)])],
    };
    let err = FieldPlan::resolve(&schema, &chunk).unwrap_err();
    assert!(err.to_string().contains("Svcdate"));
    Ok(())
}

#[test]
fn key_column_is_always_required() -> Result<()> {
    let mut key = FieldDesc::new("Enrolid", DType::Uint64, SourceType::Float64);
    key.is_key = true;
    let schema = Schema::new(vec![
        key,
        FieldDesc::new("Netpay", DType::Float32, SourceType::Float64),
    ])?;
    let chunk = Chunk {
        columns: vec![SourceColumn::float64("NETPAY", &[Some(1.0)])],
    };
    let err = FieldPlan::resolve(&schema, &chunk).unwrap_err();
    assert!(err.to_string().contains("Enrolid"), "{err}");
    Ok(())
}

#[test]
fn absent_optional_fields_become_zero() -> Result<()> {
    let schema = Schema::new(fields())?;
    let chunk = Chunk {
        columns: vec![
            SourceColumn::float64("enrolid", &[Some(7.0)]),
            SourceColumn::float64("svcdate", &[Some(100.0)]),
        ],
    };
    let plan = FieldPlan::resolve(&schema, &chunk)?;
    assert_eq!(plan.absent_fields().collect::<Vec<_>>(), vec!["Netpay", "Dx1", "Sex"]);

    let mut out = Vec::new();
    plan.convert(&chunk, |rec| {
        out.push(rec);
        true
    });
    assert_eq!(
        out[0].values,
        vec![
            Value::Uint64(7),
            Value::Uint16(100),
            Value::Float32(0.0),
            Value::String(String::new()),
            Value::Uint8(0),
        ]
    );
    Ok(())
}

#[test]
fn emit_false_stops_the_walk() -> Result<()> {
    let schema = Schema::new(fields())?;
    let mut src = claims(&[Some(1.0), Some(2.0), Some(3.0)]);
    let chunk = src.next_chunk(10)?.unwrap();
    let plan = FieldPlan::resolve(&schema, &chunk)?;
    let stats = plan.convert(&chunk, |_| false);
    assert_eq!(stats.records, 0);
    assert_eq!(stats.rows, 1);
    Ok(())
}

// -------------------- Sources --------------------

#[test]
fn memory_source_serves_chunks() -> Result<()> {
    let mut src = claims(&[Some(1.0), Some(2.0), Some(3.0)]);
    assert_eq!(src.columns().len(), 5);
    assert_eq!(src.next_chunk(2)?.unwrap().rows(), 2);
    assert_eq!(src.next_chunk(2)?.unwrap().rows(), 1);
    assert!(src.next_chunk(2)?.is_none());
    Ok(())
}

#[test]
fn memory_source_rejects_ragged_columns() {
    let res = MemorySource::new(vec![
        SourceColumn::float64("A", &[Some(1.0)]),
        SourceColumn::string("B", &["x", "y"]),
    ]);
    assert!(res.is_err());
}

#[test]
fn delimited_source_types_cells_by_schema() -> Result<()> {
    let schema = Schema::new(fields())?;
    let text = "ENROLID,SVCDATE,DX1,EXTRA\n10,18000.5, 250.00 ,a\n,18001,V70,b\n\n12,.,,c\n";
    let mut src = DelimitedSource::new(Cursor::new(text), &schema, "t.csv")?;

    let types: Vec<SourceType> = src.columns().iter().map(|c| c.source_type).collect();
    assert_eq!(
        types,
        vec![SourceType::Float64, SourceType::Float64, SourceType::String, SourceType::String]
    );

    let chunk = src.next_chunk(2)?.unwrap();
    assert_eq!(chunk.rows(), 2);
    assert_eq!(chunk.columns[0].missing, vec![false, true]);
    assert_eq!(
        chunk.columns[2].data,
        SourceData::String(vec![" 250.00 ".into(), "V70".into()])
    );

    let chunk = src.next_chunk(2)?.unwrap();
    assert_eq!(chunk.rows(), 1);
    assert_eq!(chunk.columns[1].missing, vec![true]);
    assert!(src.next_chunk(2)?.is_none());
    Ok(())
}

#[test]
fn delimited_source_reports_bad_lines() -> Result<()> {
    let schema = Schema::new(fields())?;

    let mut src = DelimitedSource::new(Cursor::new("ENROLID,SVCDATE\n1,2,3\n"), &schema, "t.csv")?;
    let err = src.next_chunk(10).unwrap_err();
    assert!(err.to_string().contains("line 2"));

    let mut src = DelimitedSource::new(Cursor::new("ENROLID,SVCDATE\nabc,2\n"), &schema, "t.csv")?;
    assert!(src.next_chunk(10).is_err());

    assert!(DelimitedSource::new(Cursor::new(""), &schema, "t.csv").is_err());
    Ok(())
}

// -------------------- Pipeline --------------------

#[test]
fn three_keys_land_in_their_buckets() -> Result<()> {
    let dir = tempdir()?;
    let conf = test_config(dir.path(), 4);
    let store = Store::create(&conf)?;

    let mut opener = MemoryOpener::new();
    opener.insert(
        "claims",
        MemorySource::new(vec![
            SourceColumn::float64("ENROLID", &[Some(10.0), Some(11.0), Some(12.0)]),
            SourceColumn::float64("SVCDATE", &[Some(18_262.7), Some(70_000.0), Some(1.0)]),
            SourceColumn::float64("NETPAY", &[Some(12.5), Some(0.0), Some(-3.25)]),
            SourceColumn::string("DX1", &["  4019 ", "V700", ""]),
            SourceColumn::string("SEX", &["1", "2", "x"]),
        ])?,
    );

    let pipeline = Pipeline::new(&conf, &store, &opener)?;
    let report = pipeline.run_paths(&[PathBuf::from("claims")])?;
    assert!(report.is_success());
    assert_eq!(report.records_written, 3);
    assert_eq!(report.rows_flushed, 3);
    assert_eq!(report.fallbacks_for("Sex"), 1);

    let expected = [
        (10u64, 18_262u16, 12.5f32, "4019", 1u8),
        (11, 4464, 0.0, "V700", 2), // 70000 wraps
        (12, 1, -3.25, "", 0),
    ];
    for (key, date, pay, dx, sex) in expected {
        let b = partition::bucket_of(key, 4);
        let keys = decode(&store, b, "Enrolid")?;
        let row = keys
            .iter()
            .position(|v| *v == Value::Uint64(key))
            .expect("key in its bucket");

        assert_eq!(decode(&store, b, "Svcdate")?[row], Value::Uint16(date));
        assert_eq!(decode(&store, b, "Netpay")?[row], Value::Float32(pay));
        assert_eq!(decode(&store, b, "Dx1")?[row], Value::String(dx.into()));
        assert_eq!(decode(&store, b, "Sex")?[row], Value::Uint8(sex));

        for other in (0..4).filter(|&o| o != b) {
            assert!(!decode(&store, other, "Enrolid")?.contains(&Value::Uint64(key)));
        }
    }
    Ok(())
}

#[test]
fn rows_are_conserved_across_files_and_flushes() -> Result<()> {
    let dir = tempdir()?;
    let conf = test_config(dir.path(), 8);
    let store = Store::create(&conf)?;

    let mut opener = MemoryOpener::new();
    let mut paths = Vec::new();
    let mut expected = 0;
    for f in 0..3u32 {
        let keys: Vec<Option<f64>> = (0..25u32)
            .map(|i| (i % 7 != 3).then_some(f64::from(f * 1000 + i)))
            .collect();
        expected += keys.iter().filter(|k| k.is_some()).count();
        let path = PathBuf::from(format!("file{f}"));
        opener.insert(&path, claims(&keys));
        paths.push(path);
    }

    let report = Pipeline::new(&conf, &store, &opener)?.run_paths(&paths)?;
    assert!(report.is_success());
    assert_eq!(report.records_written, expected as u64);
    assert_eq!(report.dropped_missing_key, 75 - expected as u64);
    for f in &report.files {
        assert_eq!(f.rows_read, 25);
        assert_eq!(f.chunks, 13);
    }

    for field in ["Enrolid", "Svcdate", "Netpay", "Dx1", "Sex"] {
        assert_eq!(total_rows(&store, field)?, expected, "field {field}");
    }
    let flushes: u64 = store.buckets().iter().map(|b| b.flush_count()).sum();
    assert!(flushes > 8, "threshold flushes happened");
    Ok(())
}

#[test]
fn failing_file_does_not_stop_others() -> Result<()> {
    let dir = tempdir()?;
    let conf = test_config(dir.path(), 2);
    let store = Store::create(&conf)?;

    let mut opener = MemoryOpener::new();
    opener.insert("good", claims(&[Some(1.0), Some(2.0)]));
    opener.insert(
        "no_svcdate",
        MemorySource::new(vec![SourceColumn::float64("ENROLID", &[Some(5.0)])])?,
    );

    let paths = vec![
        PathBuf::from("good"),
        PathBuf::from("no_svcdate"),
        PathBuf::from("missing"),
    ];
    let report = Pipeline::new(&conf, &store, &opener)?.run_paths(&paths)?;

    assert!(!report.is_success());
    assert_eq!(report.files[0].status, FileStatus::Done);
    match &report.files[1].status {
        FileStatus::Failed(msg) => assert!(msg.contains("SVCDATE") || msg.contains("Svcdate")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(report.files[2].status, FileStatus::Failed(_)));
    assert_eq!(report.failed().count(), 2);
    assert_eq!(total_rows(&store, "Enrolid")?, 2);
    Ok(())
}

#[test]
fn max_chunk_limits_each_file() -> Result<()> {
    let dir = tempdir()?;
    let mut conf = test_config(dir.path(), 2);
    conf.max_chunk = 1;
    let store = Store::create(&conf)?;

    let mut opener = MemoryOpener::new();
    opener.insert("a", claims(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]));
    let report = Pipeline::new(&conf, &store, &opener)?.run_paths(&[PathBuf::from("a")])?;

    assert!(report.is_success());
    assert_eq!(report.files[0].chunks, 1);
    assert_eq!(report.records_written, 2);
    assert_eq!(total_rows(&store, "Dx1")?, 2);
    Ok(())
}

#[test]
fn delimited_files_end_to_end() -> Result<()> {
    let dir = tempdir()?;
    let src_dir = dir.path().join("raw");
    std::fs::create_dir_all(&src_dir)?;
    std::fs::write(
        src_dir.join("a.csv"),
        "Enrolid,Svcdate,Dx1,Sex\n10,1,A,1\n11,2,B,2\n,3,C,1\n",
    )?;
    std::fs::write(src_dir.join("b.csv"), "Enrolid,Svcdate,Dx1,Sex\n12,4,D,?\n")?;

    let mut conf = test_config(&dir.path().join("out"), 4);
    conf.source_dir = src_dir;
    conf.source_files = vec!["a.csv".into(), "b.csv".into()];
    let store = Store::create(&conf)?;
    let opener = DelimitedOpener::new(conf.schema()?);

    let report = Pipeline::new(&conf, &store, &opener)?.run()?;
    assert!(report.is_success());
    assert_eq!(report.records_written, 3);
    assert_eq!(report.dropped_missing_key, 1);
    assert_eq!(report.fallbacks_for("Sex"), 1);
    assert_eq!(total_rows(&store, "Netpay")?, 3);
    Ok(())
}

#[test]
fn pipeline_requires_an_ingestion_store() -> Result<()> {
    let dir = tempdir()?;
    let conf = test_config(dir.path(), 2);
    Store::create(&conf)?;
    let opened = Store::open(dir.path())?;
    let opener = MemoryOpener::new();
    assert!(Pipeline::new(&conf, &opened, &opener).is_err());
    Ok(())
}

#[test]
fn cancelled_pipeline_skips_files() -> Result<()> {
    let dir = tempdir()?;
    let conf = test_config(dir.path(), 2);
    let store = Store::create(&conf)?;
    let mut opener = MemoryOpener::new();
    opener.insert("a", claims(&[Some(1.0)]));

    let pipeline = Pipeline::new(&conf, &store, &opener)?;
    pipeline.cancel_token().cancel();
    let report = pipeline.run_paths(&[PathBuf::from("a")])?;
    assert_eq!(report.files[0].status, FileStatus::Cancelled);
    assert_eq!(report.records_written, 0);
    // final flush still creates every column file
    assert_eq!(total_rows(&store, "Enrolid")?, 0);
    Ok(())
}
