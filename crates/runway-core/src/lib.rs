//! Runtime acquisition for application launchers: version checks, downloads,
//! archive unpacking and the upgrade flow that ties them together.

pub mod archive;
mod checksum;
pub mod config_file;
pub mod download;
pub mod installation;
pub mod manifest;
pub mod prefs;
pub mod prompt;
mod task;
pub mod upgrade;
pub mod version;

pub use archive::{ArchiveEntry, ArchiveError, ArchiveKind, Extractor, unpack};
pub use config_file::{ConfigError, ConfigFile};
pub use download::{
    ClientOptions, DownloadError, DownloadProgress, download, download_text, http_client,
};
pub use installation::{InstallationRecord, MetadataLayout};
pub use manifest::Manifest;
pub use prefs::{JsonPreferences, MemoryPreferences, PreferenceError, PreferenceStore};
pub use prompt::{
    Choice, DecisionPrompt, HeadlessPrompt, LineProgress, NullProgress, ProgressSink, Prompt,
};
pub use runway_platform::HideWindow;
pub use task::TaskHandle;
pub use upgrade::{CheckOutcome, Orchestrator, UpgradeDecision, UpgradeError, UpgradeSettings};
pub use version::{Version, compare};
