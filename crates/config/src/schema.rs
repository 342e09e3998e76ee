use codec::DType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::ConfigError;

/// How a field is represented by the source reader, before conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Float64,
    String,
}

/// Description of one field of the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FieldDesc {
    /// Field name; also the column file stem and the `dtypes.json` key.
    pub name: String,

    /// Logical type stored in the column file.
    #[serde(rename = "Type")]
    pub dtype: DType,

    /// Representation in the source files.
    #[serde(default)]
    pub source_type: SourceType,

    /// Column name in the source files, if it differs from `name`.
    /// Matched case-insensitively.
    #[serde(default)]
    pub source_name: Option<String>,

    /// A file lacking a required field is rejected.
    #[serde(default, rename = "Must")]
    pub required: bool,

    /// The partitioning and primary sort key.
    #[serde(default, rename = "KeyVar")]
    pub is_key: bool,
}

impl FieldDesc {
    pub fn new(name: &str, dtype: DType, source_type: SourceType) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            source_type,
            source_name: None,
            required: false,
            is_key: false,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field as the key; a key is always required.
    #[must_use]
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self.required = true;
        self
    }

    /// Name of the field in the source files.
    #[must_use]
    pub fn source_column(&self) -> &str {
        self.source_name.as_deref().unwrap_or(&self.name)
    }
}

/// An ordered, validated set of field descriptors with exactly one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    fields: Vec<FieldDesc>,
    key_index: usize,
}

impl Schema {
    /// Validates `fields`.
    ///
    /// # Errors
    ///
    /// Rejects an empty field list, duplicate or empty names, names that
    /// would collide with store metadata, zero or several key fields, and a
    /// key whose type is not `uint64`. `uvarint` is not a valid ingest type.
    /// The key field is marked required whatever its `Must` flag says.
    pub fn new(mut fields: Vec<FieldDesc>) -> Result<Self, ConfigError> {
        if fields.is_empty() {
            return Err(ConfigError::Invalid("schema has no fields".into()));
        }

        let mut seen = HashSet::new();
        for f in &fields {
            if f.name.is_empty() || f.name.contains(['/', '\\', '.']) {
                return Err(ConfigError::Invalid(format!(
                    "field name '{}' is not usable as a file name",
                    f.name
                )));
            }
            if f.name.ends_with("_string") {
                return Err(ConfigError::Invalid(format!(
                    "field name '{}' collides with factorization backups",
                    f.name
                )));
            }
            if !seen.insert(f.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate field '{}'", f.name)));
            }
            if f.dtype == DType::Uvarint {
                return Err(ConfigError::Invalid(format!(
                    "field '{}': uvarint is produced by factorization, not ingested",
                    f.name
                )));
            }
        }

        let keys: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_key)
            .map(|(i, _)| i)
            .collect();
        let key_index = match keys.as_slice() {
            [k] => *k,
            [] => return Err(ConfigError::Invalid("schema has no key field".into())),
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "schema has {} key fields, expected exactly one",
                    keys.len()
                )))
            }
        };
        if fields[key_index].dtype != DType::Uint64 {
            return Err(ConfigError::Invalid(format!(
                "key field '{}' must be uint64, not {}",
                fields[key_index].name, fields[key_index].dtype
            )));
        }

        fields[key_index].required = true;
        Ok(Self { fields, key_index })
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn key_index(&self) -> usize {
        self.key_index
    }

    #[must_use]
    pub fn key_field(&self) -> &FieldDesc {
        &self.fields[self.key_index]
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// The initial `dtypes.json` contents for a bucket.
    #[must_use]
    pub fn dtypes(&self) -> BTreeMap<String, DType> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.dtype))
            .collect()
    }
}
