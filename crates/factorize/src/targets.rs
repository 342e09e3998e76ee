use anyhow::{bail, Result};
use codec::DType;
use std::path::PathBuf;
use store::{layout, Store};

/// Which fields a factorization run covers.
///
/// `Dx*` selects every field named `Dx` followed by a digit (`Dx1`, `Dx12`)
/// and shares one dictionary between them. A plain `Dx` selects every field
/// whose name starts with `Dx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    stem: String,
    numbered: bool,
}

impl Prefix {
    /// # Errors
    ///
    /// Fails on an empty stem or a stem containing a path separator.
    pub fn parse(s: &str) -> Result<Self> {
        let (stem, numbered) = match s.strip_suffix('*') {
            Some(stem) => (stem, true),
            None => (s, false),
        };
        if stem.is_empty() {
            bail!("empty factorization prefix");
        }
        if stem.contains(['/', '\\', '*']) {
            bail!("invalid factorization prefix '{s}'");
        }
        Ok(Self {
            stem: stem.to_string(),
            numbered,
        })
    }

    /// The prefix without its `*`; also the dictionary name.
    #[must_use]
    pub fn stem(&self) -> &str {
        &self.stem
    }

    #[must_use]
    pub fn is_numbered(&self) -> bool {
        self.numbered
    }

    #[must_use]
    pub fn matches(&self, field: &str) -> bool {
        let Some(rest) = field.strip_prefix(self.stem.as_str()) else {
            return false;
        };
        if self.numbered {
            return rest.starts_with(|c: char| c.is_ascii_digit());
        }
        true
    }

    /// `<stem>Codes.json`.
    #[must_use]
    pub fn codes_file_name(&self) -> String {
        format!("{}Codes.json", self.stem)
    }

    /// `<stem>Codes_freq.csv`.
    #[must_use]
    pub fn freq_file_name(&self) -> String {
        format!("{}Codes_freq.csv", self.stem)
    }
}

/// One column file to factorize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub bucket: u32,
    pub field: String,
    pub path: PathBuf,
}

impl Target {
    /// Where the original strings are kept after the rewrite.
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        self.path
            .with_file_name(layout::string_backup_file_name(&self.field))
    }
}

/// Every column in the store that `prefix` selects and that still holds
/// strings, in bucket then field order.
///
/// Fields already coded (`uvarint` in the sidecar) are not selected, so a
/// second run over the same prefix finds nothing to do.
pub fn find_targets(store: &Store, prefix: &Prefix) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    for bucket in 0..store.num_buckets() {
        for (field, dtype) in store.read_dtypes(bucket)? {
            if dtype != DType::String || !prefix.matches(&field) {
                continue;
            }
            let file_name = layout::column_file_name(&field);
            if layout::is_string_backup(&file_name) {
                continue;
            }
            let path = store.bucket_path(bucket).join(file_name);
            if !path.exists() {
                bail!("{}: listed in dtypes.json but missing", path.display());
            }
            targets.push(Target {
                bucket,
                field,
                path,
            });
        }
    }
    Ok(targets)
}
