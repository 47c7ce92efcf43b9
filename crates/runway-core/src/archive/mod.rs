//! Unpacking runtime archives.
//!
//! Zip files are read in-process. Tarballs are handed to the system `tar`,
//! whose listing output is streamed back entry by entry.

mod untar;
mod unzip;

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::task::TaskHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
}

impl ArchiveKind {
    /// Classify an archive by file name: `*.zip`, or `*.tar` optionally
    /// followed by one alphanumeric compression extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if is_tar_name(name) {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

fn is_tar_name(name: &str) -> bool {
    if name.ends_with(".tar") {
        return true;
    }
    name.rsplit_once('.').is_some_and(|(stem, ext)| {
        stem.ends_with(".tar") && ext.chars().all(|ch| ch.is_ascii_alphanumeric())
    })
}

/// One path reported while unpacking, relative to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub is_dir: bool,
}

impl ArchiveEntry {
    fn from_listing(line: &str) -> Self {
        Self {
            name: line.to_string(),
            is_dir: line.ends_with('/'),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot unpack unsupported file: {}", .0.display())]
    Unsupported(PathBuf),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Zip {
        context: &'static str,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("entry is outside of the target dir: {entry}")]
    UnsafeEntry { entry: String },
    #[error("{program} is not available: {details}")]
    ToolMissing { program: String, details: String },
    #[error("{program} {}\n\n{stderr}", describe_exit(.code))]
    ProcessFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("extraction was cancelled\n{stderr}")]
    Cancelled { stderr: String },
    #[error("extraction worker stopped unexpectedly: {0}")]
    Worker(String),
}

#[allow(clippy::ref_option)]
fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("failed with exit code: {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

impl ArchiveError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }

    fn zip(context: &'static str, source: zip::result::ZipError) -> Self {
        Self::Zip { context, source }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<tokio::task::JoinError> for ArchiveError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Worker(error.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    tar_program: PathBuf,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            tar_program: PathBuf::from("tar"),
        }
    }
}

impl Extractor {
    /// Use a specific `tar` executable instead of the one found on `PATH`.
    #[must_use]
    pub fn with_tar_program(program: impl Into<PathBuf>) -> Self {
        Self {
            tar_program: program.into(),
        }
    }

    /// Start unpacking `archive` into `dest` on a worker thread.
    ///
    /// `on_entry` sees every entry in archive order before it is written.
    ///
    /// # Errors
    /// Returns [`ArchiveError::Unsupported`] right away when the file name is
    /// neither a zip nor a tarball; every other failure is reported through
    /// the returned handle.
    pub fn unpack<F>(
        &self,
        archive: &Path,
        dest: &Path,
        cancel: CancellationToken,
        on_entry: F,
    ) -> Result<TaskHandle<ArchiveError>, ArchiveError>
    where
        F: FnMut(&ArchiveEntry) + Send + 'static,
    {
        let kind = ArchiveKind::from_path(archive)
            .ok_or_else(|| ArchiveError::Unsupported(archive.to_path_buf()))?;
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        let token = cancel.clone();

        Ok(match kind {
            ArchiveKind::Zip => TaskHandle::spawn_blocking(token, move || {
                unzip::unzip(&archive, &dest, &cancel, on_entry)
            }),
            ArchiveKind::Tar => {
                let program = self.tar_program.clone();
                TaskHandle::spawn_blocking(token, move || {
                    untar::untar(&program, &archive, &dest, &cancel, on_entry)
                })
            }
        })
    }
}

/// Unpack with the default [`Extractor`].
///
/// # Errors
/// See [`Extractor::unpack`].
pub fn unpack<F>(
    archive: &Path,
    dest: &Path,
    cancel: CancellationToken,
    on_entry: F,
) -> Result<TaskHandle<ArchiveError>, ArchiveError>
where
    F: FnMut(&ArchiveEntry) + Send + 'static,
{
    Extractor::default().unpack(archive, dest, cancel, on_entry)
}

/// Absolute, lexically normalized form of `path`; symlinks are not resolved.
fn absolute_normalized(path: &Path) -> Result<PathBuf, ArchiveError> {
    let absolute = std::path::absolute(path).map_err(|error| {
        ArchiveError::io_with_path("failed to resolve destination", path, &error)
    })?;
    Ok(normalize(&absolute))
}

pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
