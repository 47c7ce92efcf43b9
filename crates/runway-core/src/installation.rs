//! Runtimes already unpacked beneath the managed root.

use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use crate::version;

pub const DEFAULT_METADATA_FILE: &str = "release";
pub const DEFAULT_VERSION_KEY: &str = "JAVA_VERSION";

/// What identifies an installation: the metadata file at its top level and
/// the key naming its version inside that file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataLayout {
    pub file_name: String,
    pub version_key: String,
}

impl Default for MetadataLayout {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_METADATA_FILE.to_string(),
            version_key: DEFAULT_VERSION_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationRecord {
    /// Installation root, the directory holding the metadata file.
    pub path: PathBuf,
    /// `None` when the metadata file is unreadable or lacks the version key.
    pub version: Option<String>,
}

/// Every `<root>/<dir>/<metadata file>`, following symlinks. A missing root
/// yields nothing.
#[must_use]
pub fn scan(root: &Path, layout: &MetadataLayout) -> Vec<InstallationRecord> {
    let mut records: Vec<InstallationRecord> = WalkDir::new(root)
        .follow_links(true)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == layout.file_name.as_str())
        .filter_map(|entry| {
            let path = entry.path().parent()?.to_path_buf();
            let version = read_version(entry.path(), &layout.version_key);
            Some(InstallationRecord { path, version })
        })
        .collect();
    records.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Found {} installation(s) under {}", records.len(), root.display());
    records
}

/// The first installation at or above `recommended`.
#[must_use]
pub fn good_installation(
    root: &Path,
    layout: &MetadataLayout,
    recommended: &str,
) -> Option<InstallationRecord> {
    scan(root, layout).into_iter().find(|record| {
        record
            .version
            .as_deref()
            .is_some_and(|found| version::compare(found, recommended).is_ge())
    })
}

/// Version recorded in the metadata file directly under `home`.
#[must_use]
pub fn installed_version(home: &Path, layout: &MetadataLayout) -> Option<String> {
    read_version(&home.join(&layout.file_name), &layout.version_key)
}

fn read_version(metadata: &Path, key: &str) -> Option<String> {
    let content = match std::fs::read_to_string(metadata) {
        Ok(content) => content,
        Err(error) => {
            debug!("Failed to read {}: {error}", metadata.display());
            return None;
        }
    };
    parse_version(&content, key)
}

fn parse_version(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.strip_prefix(key)?
            .strip_prefix('=')
            .map(|value| value.replace('"', ""))
    })
}
