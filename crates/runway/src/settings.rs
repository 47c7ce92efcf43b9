use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use runway_core::download::ClientOptions;
use runway_core::installation::{self, MetadataLayout};
use runway_core::upgrade::{DEFAULT_CONFIG_KEY, UpgradeSettings};
use runway_platform::AppPaths;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub minimum_version: Option<String>,

    #[serde(default)]
    pub recommended_version: Option<String>,

    #[serde(default)]
    pub managed_root: Option<PathBuf>,

    #[serde(default)]
    pub runtime_home: Option<PathBuf>,

    /// Read from `runtime_home` when unset.
    #[serde(default)]
    pub runtime_version: Option<String>,

    #[serde(default)]
    pub links_url: Option<String>,

    #[serde(default = "default_platform")]
    pub platform: String,

    #[serde(default)]
    pub config_file: Option<PathBuf>,

    #[serde(default = "default_config_key")]
    pub config_key: String,

    #[serde(default)]
    pub app_dir: Option<PathBuf>,

    #[serde(default = "default_app_name")]
    pub app_name: String,

    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,

    #[serde(default = "default_version_key")]
    pub version_key: String,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub headless: bool,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_platform() -> String {
    runway_platform::platform_id().to_string()
}

fn default_config_key() -> String {
    DEFAULT_CONFIG_KEY.to_string()
}

fn default_app_name() -> String {
    "the application".to_string()
}

fn default_metadata_file() -> String {
    installation::DEFAULT_METADATA_FILE.to_string()
}

fn default_version_key() -> String {
    installation::DEFAULT_VERSION_KEY.to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            minimum_version: None,
            recommended_version: None,
            managed_root: None,
            runtime_home: None,
            runtime_version: None,
            links_url: None,
            platform: default_platform(),
            config_file: None,
            config_key: default_config_key(),
            app_dir: None,
            app_name: default_app_name(),
            metadata_file: default_metadata_file(),
            version_key: default_version_key(),
            http_timeout_secs: default_http_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            headless: false,
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl Settings {
    /// Load from `path`, or from the per-user settings file when `path` is
    /// `None`. Only an explicitly named file has to exist.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let Ok(paths) = AppPaths::new() else {
                    return Ok(Self::default());
                };
                let settings_path = paths.settings_file();
                if settings_path.exists() {
                    Self::load_from(&settings_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_from(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|source| AppError::SettingsRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| AppError::SettingsParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn layout(&self) -> MetadataLayout {
        MetadataLayout {
            file_name: self.metadata_file.clone(),
            version_key: self.version_key.clone(),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.http_timeout_secs),
            ..ClientOptions::default()
        }
    }

    /// The running runtime's version: configured, or read from its home.
    pub fn current_version(&self) -> Option<String> {
        self.runtime_version.clone().or_else(|| {
            self.runtime_home
                .as_deref()
                .and_then(|home| installation::installed_version(home, &self.layout()))
        })
    }

    pub fn upgrade_settings(&self) -> UpgradeSettings {
        UpgradeSettings {
            app_name: self.app_name.clone(),
            current_version: self.current_version().unwrap_or_default(),
            minimum_version: self.minimum_version.clone(),
            recommended_version: self.recommended_version.clone(),
            runtime_home: self.runtime_home.clone(),
            managed_root: self.managed_root.clone(),
            links_url: self.links_url.clone(),
            platform: self.platform.clone(),
            config_file: self.config_file.clone(),
            config_key: self.config_key.clone(),
            app_dir: self.app_dir.clone(),
            layout: self.layout(),
        }
    }
}
