use super::*;
use codec::DType;
use std::collections::HashMap;
use tempfile::tempdir;

const SAMPLE: &str = r#"{
    "SourceDir": "/data/raw",
    "SASFiles": ["a.csv", "b.csv"],
    "TargetDir": "/data/out",
    "NumBuckets": 64,
    "BufMaxRecs": 500,
    "Variables": [
        { "Name": "Enrolid", "Type": "uint64", "Must": true, "KeyVar": true },
        { "Name": "Sex", "Type": "uint8", "SourceType": "string", "Must": true },
        { "Name": "Dx1", "Type": "string", "SourceType": "string" },
        { "Name": "Pay", "Type": "float32", "SourceName": "NETPAY" }
    ]
}"#;

fn fields() -> Vec<FieldDesc> {
    vec![
        FieldDesc::new("Enrolid", DType::Uint64, SourceType::Float64).key(),
        FieldDesc::new("Year", DType::Uint16, SourceType::Float64),
    ]
}

// -------------------- Parsing --------------------

#[test]
fn parses_sample_and_fills_defaults() {
    let conf = Config::from_json(SAMPLE).unwrap();
    assert_eq!(conf.num_buckets, 64);
    assert_eq!(conf.buf_max_recs, 500);
    assert_eq!(conf.source_files, vec!["a.csv", "b.csv"]);
    assert_eq!(conf.chunk_size, DEFAULT_CHUNK_SIZE);
    assert_eq!(conf.concurrency, DEFAULT_CONCURRENCY);
    assert_eq!(conf.factorize_concurrency, DEFAULT_FACTORIZE_CONCURRENCY);
    assert_eq!(conf.codes_dir, PathBuf::from("/data/out/Codes"));
    assert_eq!(conf.chunk_limit(), None);
    assert_eq!(conf.io_timeout(), None);
    conf.validate().unwrap();
}

#[test]
fn parses_field_descriptors() {
    let conf = Config::from_json(SAMPLE).unwrap();
    let schema = conf.schema().unwrap();

    assert_eq!(schema.len(), 4);
    assert_eq!(schema.key_field().name, "Enrolid");
    assert_eq!(schema.key_index(), 0);

    let sex = &schema.fields()[1];
    assert_eq!(sex.dtype, DType::Uint8);
    assert_eq!(sex.source_type, SourceType::String);
    assert!(sex.required);
    assert!(!sex.is_key);

    let pay = &schema.fields()[3];
    assert_eq!(pay.source_type, SourceType::Float64);
    assert_eq!(pay.source_column(), "NETPAY");
    assert_eq!(schema.index_of("Dx1"), Some(2));
    assert_eq!(schema.dtypes()["Dx1"], DType::String);
}

#[test]
fn source_paths_join_source_dir() {
    let conf = Config::from_json(SAMPLE).unwrap();
    assert_eq!(
        conf.source_paths(),
        vec![PathBuf::from("/data/raw/a.csv"), PathBuf::from("/data/raw/b.csv")]
    );
}

#[test]
fn load_reads_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("conf.json");
    std::fs::write(&path, SAMPLE).unwrap();
    let conf = Config::load(&path).unwrap();
    assert_eq!(conf.target_dir, PathBuf::from("/data/out"));
}

#[test]
fn load_reports_missing_file() {
    let dir = tempdir().unwrap();
    let err = Config::load(dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("nope.json"));
}

#[test]
fn malformed_json_is_a_parse_error() {
    assert!(matches!(
        Config::from_json("{ not json"),
        Err(ConfigError::Parse(_))
    ));
}

// -------------------- Overrides --------------------

#[test]
fn overrides_replace_tuning_knobs() {
    let mut conf = Config::from_json(SAMPLE).unwrap();
    let env: HashMap<&str, &str> = [
        ("BUCKETIZE_CONCURRENCY", "3"),
        ("BUCKETIZE_BUF_MAX_RECS", "7"),
        ("BUCKETIZE_MAX_CHUNK", "2"),
    ]
    .into_iter()
    .collect();

    conf.apply_overrides(|k| env.get(k).map(|v| v.to_string()))
        .unwrap();

    assert_eq!(conf.concurrency, 3);
    assert_eq!(conf.buf_max_recs, 7);
    assert_eq!(conf.chunk_limit(), Some(2));
    assert_eq!(conf.chunk_size, DEFAULT_CHUNK_SIZE);
}

#[test]
fn bad_override_is_rejected() {
    let mut conf = Config::from_json(SAMPLE).unwrap();
    let err = conf
        .apply_overrides(|k| (k == "BUCKETIZE_CHUNK_SIZE").then(|| "lots".to_string()))
        .unwrap_err();
    assert!(err.to_string().contains("BUCKETIZE_CHUNK_SIZE"));
}

// -------------------- Validation --------------------

#[test]
fn zero_buckets_is_invalid() {
    let mut conf = Config::new("/tmp/x", 4, fields());
    conf.validate().unwrap();
    conf.num_buckets = 0;
    assert!(matches!(conf.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn zero_thresholds_are_invalid() {
    let mut conf = Config::new("/tmp/x", 4, fields());
    conf.buf_max_recs = 0;
    assert!(conf.validate().is_err());

    let mut conf = Config::new("/tmp/x", 4, fields());
    conf.chunk_size = 0;
    assert!(conf.validate().is_err());
}

#[test]
fn schema_requires_exactly_one_key() {
    let none = vec![FieldDesc::new("A", DType::Uint64, SourceType::Float64)];
    assert!(Schema::new(none).unwrap_err().to_string().contains("no key"));

    let two = vec![
        FieldDesc::new("A", DType::Uint64, SourceType::Float64).key(),
        FieldDesc::new("B", DType::Uint64, SourceType::Float64).key(),
    ];
    assert!(Schema::new(two).unwrap_err().to_string().contains("2 key fields"));
}

#[test]
fn key_must_be_uint64() {
    let f = vec![FieldDesc::new("A", DType::Uint32, SourceType::Float64).key()];
    assert!(Schema::new(f).unwrap_err().to_string().contains("must be uint64"));
}

#[test]
fn schema_rejects_bad_names() {
    for bad in ["", "a/b", "x.y", "Dx1_string"] {
        let f = vec![
            FieldDesc::new("K", DType::Uint64, SourceType::Float64).key(),
            FieldDesc::new(bad, DType::String, SourceType::String),
        ];
        assert!(Schema::new(f).is_err(), "accepted {bad:?}");
    }

    let dup = vec![
        FieldDesc::new("K", DType::Uint64, SourceType::Float64).key(),
        FieldDesc::new("K", DType::Uint8, SourceType::Float64),
    ];
    assert!(Schema::new(dup).unwrap_err().to_string().contains("duplicate"));
}

#[test]
fn uvarint_is_not_an_ingest_type() {
    let f = vec![
        FieldDesc::new("K", DType::Uint64, SourceType::Float64).key(),
        FieldDesc::new("Dx", DType::Uvarint, SourceType::String),
    ];
    assert!(Schema::new(f).is_err());
}

#[test]
fn key_builder_implies_required() {
    let f = FieldDesc::new("K", DType::Uint64, SourceType::Float64).key();
    assert!(f.is_key && f.required);
    assert_eq!(f.source_column(), "K");
}

#[test]
fn json_key_without_must_is_required() {
    let json = r#"{
        "TargetDir": "/data/out",
        "NumBuckets": 4,
        "Variables": [
            { "Name": "Enrolid", "Type": "uint64", "KeyVar": true },
            { "Name": "Year", "Type": "uint16" }
        ]
    }"#;
    let conf = Config::from_json(json).unwrap();
    assert!(!conf.variables[0].required);

    let schema = conf.schema().unwrap();
    assert!(schema.key_field().required);
    assert!(!schema.fields()[1].required);
}
