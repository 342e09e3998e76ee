//! File and directory names of the on-disk format.

use std::path::{Path, PathBuf};

/// Directory under the target root holding one directory per bucket.
pub const BUCKETS_DIR: &str = "Buckets";
/// Store descriptor at the target root.
pub const STORE_META_FILE: &str = "conf.json";
/// Per-bucket dtype sidecar.
pub const DTYPES_FILE: &str = "dtypes.json";
/// Copy of the sidecar taken before the first factorization.
pub const DTYPES_BACKUP_FILE: &str = "dtypes_string.json";
/// Extension shared by every column file.
pub const COLUMN_EXT: &str = ".bin.sz";
/// Stem suffix of a factorized field's original string column.
pub const STRING_BACKUP_SUFFIX: &str = "_string";
/// Per-bucket directory of pre-sort column files.
pub const ORIG_DIR: &str = "orig";
/// Field-to-dictionary mapping in the codes directory.
pub const CODE_GROUPS_FILE: &str = "CodeGroups.json";

#[must_use]
pub fn buckets_dir(root: &Path) -> PathBuf {
    root.join(BUCKETS_DIR)
}

/// `Buckets/NNNN`, zero-padded to four digits.
#[must_use]
pub fn bucket_dir(root: &Path, bucket: u32) -> PathBuf {
    buckets_dir(root).join(format!("{bucket:04}"))
}

#[must_use]
pub fn column_file_name(field: &str) -> String {
    format!("{field}{COLUMN_EXT}")
}

#[must_use]
pub fn string_backup_file_name(field: &str) -> String {
    format!("{field}{STRING_BACKUP_SUFFIX}{COLUMN_EXT}")
}

/// Field name of a column file name, or `None` if `file_name` is not a
/// column file.
#[must_use]
pub fn field_of(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(COLUMN_EXT)
        .filter(|stem| !stem.is_empty())
}

/// `true` for a factorizer backup (`<Field>_string.bin.sz`).
#[must_use]
pub fn is_string_backup(file_name: &str) -> bool {
    field_of(file_name).is_some_and(|stem| stem.ends_with(STRING_BACKUP_SUFFIX))
}
