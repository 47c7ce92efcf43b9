use std::fs::File;
use std::path::Path;

use log::debug;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use super::{ArchiveEntry, ArchiveError, absolute_normalized, normalize};

pub(super) fn unzip<F>(
    archive: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    mut on_entry: F,
) -> Result<(), ArchiveError>
where
    F: FnMut(&ArchiveEntry),
{
    let dest = absolute_normalized(dest)?;
    let file = File::open(archive).map_err(|error| {
        ArchiveError::io_with_path("failed to open zip file", archive, &error)
    })?;
    let mut zip = ZipArchive::new(file)
        .map_err(|error| ArchiveError::zip("failed to read zip archive", error))?;

    for index in 0..zip.len() {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled {
                stderr: String::new(),
            });
        }

        let mut entry = zip
            .by_index(index)
            .map_err(|error| ArchiveError::zip("failed to read zip entry", error))?;
        let name = entry.name().to_string();

        // Must hold before anything is created for this entry.
        let target = normalize(&dest.join(&name));
        if !target.starts_with(&dest) {
            return Err(ArchiveError::UnsafeEntry { entry: name });
        }

        let is_dir = entry.is_dir();
        on_entry(&ArchiveEntry { name, is_dir });

        if is_dir {
            std::fs::create_dir_all(&target).map_err(|error| {
                ArchiveError::io_with_path("failed to create extraction directory", &target, &error)
            })?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                ArchiveError::io_with_path(
                    "failed to create extraction parent directory",
                    parent,
                    &error,
                )
            })?;
        }
        let mut outfile = File::create(&target).map_err(|error| {
            ArchiveError::io_with_path("failed to create extracted file", &target, &error)
        })?;
        std::io::copy(&mut entry, &mut outfile).map_err(|error| {
            ArchiveError::io_with_path("failed to extract archive entry", &target, &error)
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode));
            }
        }
    }

    debug!("Extraction complete to {}", dest.display());
    Ok(())
}
