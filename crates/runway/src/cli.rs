use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::settings::Settings;

/// Keeps an application's runtime up to date.
#[derive(Debug, Parser)]
#[command(name = "runway", version, about)]
pub struct Cli {
    /// Settings file to use instead of the per-user one.
    #[arg(long, global = true, env = "RUNWAY_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Command-line values that take precedence over the settings file.
#[derive(Debug, Default, clap::Args)]
pub struct Overrides {
    /// Never prompt; decline every question.
    #[arg(long, global = true)]
    pub headless: bool,

    /// Version of the runtime currently in use.
    #[arg(long, global = true, value_name = "VERSION")]
    pub runtime_version: Option<String>,

    #[arg(long, global = true, value_name = "DIR")]
    pub runtime_home: Option<PathBuf>,

    #[arg(long, global = true, value_name = "VERSION")]
    pub minimum_version: Option<String>,

    #[arg(long, global = true, value_name = "VERSION")]
    pub recommended_version: Option<String>,

    /// Directory holding managed runtimes.
    #[arg(long, global = true, value_name = "DIR")]
    pub managed_root: Option<PathBuf>,

    /// Platform manifest location (http, https or file URL).
    #[arg(long, global = true, value_name = "URL")]
    pub links_url: Option<String>,

    #[arg(long, global = true)]
    pub platform: Option<String>,

    /// Launcher config file that receives the new runtime location.
    #[arg(long, global = true, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR")]
    pub app_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "NAME")]
    pub app_name: Option<String>,
}

impl Overrides {
    pub fn apply(self, settings: &mut Settings) {
        if self.headless {
            settings.headless = true;
        }
        let optional = [
            (&mut settings.runtime_version, self.runtime_version),
            (&mut settings.minimum_version, self.minimum_version),
            (&mut settings.recommended_version, self.recommended_version),
            (&mut settings.links_url, self.links_url),
        ];
        for (field, value) in optional {
            if value.is_some() {
                *field = value;
            }
        }
        let paths = [
            (&mut settings.runtime_home, self.runtime_home),
            (&mut settings.managed_root, self.managed_root),
            (&mut settings.config_file, self.config_file),
            (&mut settings.app_dir, self.app_dir),
        ];
        for (field, value) in paths {
            if value.is_some() {
                *field = value;
            }
        }
        if let Some(platform) = self.platform {
            settings.platform = platform;
        }
        if let Some(app_name) = self.app_name {
            settings.app_name = app_name;
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check the running runtime and offer to upgrade it.
    Check,
    /// Download and install the runtime for this platform.
    Upgrade,
    /// Explain a launch failure caused by an outdated runtime.
    LaunchFailed {
        /// The launch error message.
        message: String,
    },
    /// Compare two versions; prints -1, 0 or 1.
    Compare { a: String, b: String },
    /// Map a class file version such as 61.0 to a release name.
    ClassVersion { version: String },
    /// Download a URL to a file.
    Download { url: String, dest: PathBuf },
    /// Unpack a zip or tar archive.
    Unpack { archive: PathBuf, dest: PathBuf },
}
