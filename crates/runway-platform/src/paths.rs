use std::path::{Path, PathBuf};
use thiserror::Error;

/// Overrides every per-user location with a single directory, for portable
/// installs and sandboxed runs.
pub const HOME_ENV: &str = "RUNWAY_HOME";

const APP_DIR: &str = "runway";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("Could not determine the user {0} directory")]
    BaseDirUnavailable(&'static str),
}

/// Where runway keeps its settings, remembered answers and log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl AppPaths {
    /// Resolve the per-user locations, honouring [`HOME_ENV`].
    ///
    /// # Errors
    /// Returns an error when the platform base directory cannot be determined
    /// and no override is set.
    pub fn new() -> Result<Self, AppPathsError> {
        Self::resolve(std::env::var_os(HOME_ENV).map(PathBuf::from))
    }

    fn resolve(home_override: Option<PathBuf>) -> Result<Self, AppPathsError> {
        match home_override.filter(|home| !home.as_os_str().is_empty()) {
            Some(home) => Ok(Self::rooted(&home)),
            None => Self::platform_default(),
        }
    }

    /// Everything under one directory, logs in its `logs` subdirectory.
    #[must_use]
    pub fn rooted(home: &Path) -> Self {
        Self {
            config_dir: home.to_path_buf(),
            log_dir: home.join("logs"),
        }
    }

    #[cfg(target_os = "macos")]
    fn platform_default() -> Result<Self, AppPathsError> {
        let home = dirs::home_dir().ok_or(AppPathsError::BaseDirUnavailable("home"))?;
        Ok(Self {
            config_dir: home.join("Library/Application Support").join(APP_DIR),
            log_dir: home.join("Library/Logs").join(APP_DIR),
        })
    }

    #[cfg(not(target_os = "macos"))]
    fn platform_default() -> Result<Self, AppPathsError> {
        Ok(Self {
            config_dir: dirs::config_dir()
                .ok_or(AppPathsError::BaseDirUnavailable("config"))?
                .join(APP_DIR),
            log_dir: dirs::data_local_dir()
                .ok_or(AppPathsError::BaseDirUnavailable("local data"))?
                .join(APP_DIR)
                .join("logs"),
        })
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    /// Where "never ask again" answers are remembered.
    #[must_use]
    pub fn preferences_file(&self) -> PathBuf {
        self.config_dir.join("preferences.json")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join("runway.log")
    }

    /// # Errors
    /// Returns an error if either directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.log_dir)
    }
}
