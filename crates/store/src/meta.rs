use codec::DType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{layout, StoreError};

pub const COMPRESSION_SNAPPY: &str = "snappy";

/// The store descriptor, `conf.json` at the target root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StoreMeta {
    pub num_buckets: u32,
    pub compression: String,
    pub codes_dir: PathBuf,
}

impl StoreMeta {
    #[must_use]
    pub fn new(num_buckets: u32, codes_dir: PathBuf) -> Self {
        Self {
            num_buckets,
            compression: COMPRESSION_SNAPPY.to_string(),
            codes_dir,
        }
    }

    pub fn load(root: &Path) -> Result<Self, StoreError> {
        let path = root.join(layout::STORE_META_FILE);
        if !path.exists() {
            return Err(StoreError::NotAStore {
                path: root.to_path_buf(),
                reason: format!("missing {}", layout::STORE_META_FILE),
            });
        }
        let meta: StoreMeta = read_json(&path)?;
        if meta.compression != COMPRESSION_SNAPPY {
            return Err(StoreError::NotAStore {
                path,
                reason: format!("unsupported compression '{}'", meta.compression),
            });
        }
        if meta.num_buckets == 0 {
            return Err(StoreError::NotAStore {
                path,
                reason: "NumBuckets is 0".into(),
            });
        }
        Ok(meta)
    }

    pub fn save(&self, root: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(root)?;
        write_json_atomic(&root.join(layout::STORE_META_FILE), self)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads `dtypes.json` in `dir`.
///
/// Type names are parsed one by one so that an unknown type is reported
/// together with the field it belongs to.
pub(crate) fn read_dtypes(dir: &Path, bucket: u32) -> Result<BTreeMap<String, DType>, StoreError> {
    let raw: BTreeMap<String, String> = read_json(&dir.join(layout::DTYPES_FILE))?;
    raw.into_iter()
        .map(|(field, name)| match name.parse::<DType>() {
            Ok(dtype) => Ok((field, dtype)),
            Err(_) => Err(StoreError::UnknownDType {
                bucket,
                field,
                dtype: name,
            }),
        })
        .collect()
}

/// Serializes `value` as pretty JSON to `path` via a `.tmp` file, fsync and
/// rename, so readers never see a partially written file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        f.write_all(&json)?;
        f.flush()?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
