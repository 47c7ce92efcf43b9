//! Flat `KEY=VALUE` configuration files shared with the launcher.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Entries in file order. Lines without `=` are dropped on load; a repeated
/// key keeps its first position and its last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    entries: Vec<(String, String)>,
}

impl ConfigFile {
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut config = Self::default();
        for line in content.lines() {
            if let Some((key, value)) = line.split_once('=') {
                config.set(key, value);
            }
        }
        config
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(path, self.render()).map_err(write_error)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some((_, existing)) => value.clone_into(existing),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            let _ = writeln!(out, "{key}={value}");
        }
        out
    }
}

/// Merge `props` into the config file at `path`, creating it if needed.
pub fn update_all<'a, I>(path: &Path, props: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut config = if path.is_file() {
        ConfigFile::load(path)?
    } else {
        ConfigFile::default()
    };
    for (key, value) in props {
        config.set(key, value);
    }
    config.save(path)?;
    debug!("Updated config file {}", path.display());
    Ok(())
}

/// Set a single key in the config file at `path`, creating it if needed.
pub fn update(path: &Path, key: &str, value: &str) -> Result<(), ConfigError> {
    update_all(path, [(key, value)])
}
