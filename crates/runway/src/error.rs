use std::path::PathBuf;

use runway_core::{ArchiveError, DownloadError, UpgradeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to read settings {}: {source}", .path.display())]
    SettingsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings {}: {source}", .path.display())]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} is not set; pass it on the command line or in settings.json")]
    MissingSetting(&'static str),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Upgrade(#[from] UpgradeError),
}

impl AppError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Download(error) => error.is_cancelled(),
            Self::Archive(error) => error.is_cancelled(),
            Self::Upgrade(error) => error.is_cancelled(),
            _ => false,
        }
    }
}
