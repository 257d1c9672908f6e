//! On-disk layout helpers for a store root.
//!
//! This module centralizes all *relative* path conventions under a store root:
//! - optimized dataset files (`optimized/`)
//! - canonical dataset versions and their `CURRENT` pointer (`canonical/`)
//!
//! The functions here return relative [`PathBuf`] values. Callers join them
//! with a [`crate::storage::StorageLocation`] before doing IO.

use std::path::PathBuf;

use crate::format::StorageFormat;

/// Directory holding one optimized file per dataset.
pub const OPTIMIZED_DIR_NAME: &str = "optimized";

/// Directory holding versioned canonical dataset files.
pub const CANONICAL_DIR_NAME: &str = "canonical";

/// Name of the file that stores a dataset's current canonical version.
pub const CURRENT_FILE_NAME: &str = "CURRENT";

/// Number of digits used in zero-padded canonical version file names.
pub const VERSION_FILENAME_DIGITS: usize = 10;

/// Relative path: `optimized/`
pub fn optimized_rel_dir() -> PathBuf {
    PathBuf::from(OPTIMIZED_DIR_NAME)
}

/// Relative path: `optimized/<dataset_id>.<ext>`
pub fn optimized_rel_path(dataset_id: &str, format: StorageFormat) -> PathBuf {
    optimized_rel_dir().join(format!("{dataset_id}.{}", format.extension()))
}

/// Relative path: `canonical/<dataset_id>/`
pub fn canonical_rel_dir(dataset_id: &str) -> PathBuf {
    PathBuf::from(CANONICAL_DIR_NAME).join(dataset_id)
}

/// Relative path: `canonical/<dataset_id>/CURRENT`
pub fn canonical_current_rel_path(dataset_id: &str) -> PathBuf {
    canonical_rel_dir(dataset_id).join(CURRENT_FILE_NAME)
}

/// Relative path: `canonical/<dataset_id>/<zero-padded version>.json`
pub fn canonical_version_rel_path(dataset_id: &str, version: u64) -> PathBuf {
    let file_name = format!("{:0width$}.json", version, width = VERSION_FILENAME_DIGITS);
    canonical_rel_dir(dataset_id).join(file_name)
}

/// Parse a canonical version file name back into its version number.
pub fn parse_version_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".json")?;
    if stem.len() != VERSION_FILENAME_DIGITS {
        return None;
    }
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimized_paths_use_format_extension() {
        assert_eq!(
            optimized_rel_path("ds", StorageFormat::ColumnarCompressed),
            PathBuf::from("optimized/ds.parquet")
        );
        assert_eq!(
            optimized_rel_path("ds", StorageFormat::Hierarchical),
            PathBuf::from("optimized/ds.h5")
        );
        assert_eq!(
            optimized_rel_path("ds", StorageFormat::GenericBinary),
            PathBuf::from("optimized/ds.pkl")
        );
    }

    #[test]
    fn version_file_names_round_trip() {
        let path = canonical_version_rel_path("ds", 42);
        assert_eq!(path, PathBuf::from("canonical/ds/0000000042.json"));

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert_eq!(parse_version_file_name(name), Some(42));
        assert_eq!(parse_version_file_name("CURRENT"), None);
        assert_eq!(parse_version_file_name("42.json"), None);
    }
}
