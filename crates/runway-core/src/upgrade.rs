//! Deciding whether the running runtime is good enough, and replacing it
//! when it is not.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveError, Extractor, normalize};
use crate::config_file::{self, ConfigError};
use crate::download::{self, DownloadError, DownloadProgress};
use crate::installation::{self, InstallationRecord, MetadataLayout};
use crate::manifest::{self, Manifest};
use crate::prefs::{MemoryPreferences, PreferenceStore};
use crate::prompt::{Choice, DecisionPrompt, HeadlessPrompt, NullProgress, ProgressSink, Prompt};
use crate::{checksum, version};

pub const SKIP_UPGRADE_PROMPT: &str = "skip-upgrade-prompt";
pub const SKIP_VERSION_WARNING: &str = "skip-version-warning";
pub const DEFAULT_CONFIG_KEY: &str = "jvm-dir";

const DOWNLOADING: &str = "Downloading runtime...";

#[derive(Debug, Clone)]
pub struct UpgradeSettings {
    pub app_name: String,
    /// Version of the runtime this process is running on.
    pub current_version: String,
    pub minimum_version: Option<String>,
    pub recommended_version: Option<String>,
    /// Home directory of the running runtime.
    pub runtime_home: Option<PathBuf>,
    /// Directory holding runtimes installed by us.
    pub managed_root: Option<PathBuf>,
    /// Location of the platform manifest.
    pub links_url: Option<String>,
    pub platform: String,
    /// Launcher config file that receives the new runtime location.
    pub config_file: Option<PathBuf>,
    pub config_key: String,
    /// Paths under this directory are written to the config file relative to it.
    pub app_dir: Option<PathBuf>,
    pub layout: MetadataLayout,
}

impl Default for UpgradeSettings {
    fn default() -> Self {
        Self {
            app_name: "the application".to_string(),
            current_version: String::new(),
            minimum_version: None,
            recommended_version: None,
            runtime_home: None,
            managed_root: None,
            links_url: None,
            platform: runway_platform::platform_id().to_string(),
            config_file: None,
            config_key: DEFAULT_CONFIG_KEY.to_string(),
            app_dir: None,
            layout: MetadataLayout::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeDecision {
    AlreadyAdequate,
    /// Managed runtime with nothing better installed: offer a download.
    OfferDownload,
    /// Managed runtime, but a good enough installation already exists.
    OfferSwitch(InstallationRecord),
    /// Not ours to replace; warn only.
    WarnOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Continue,
    /// The host should exit with a non-zero status.
    Quit,
    /// A new runtime was installed, at the given root when one was detected.
    Upgraded(Option<PathBuf>),
    UpgradeFailed(String),
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("no managed runtime directory is configured")]
    NoManagedRoot,
    #[error("invalid managed runtime directory {}: {source}", .path.display())]
    ManagedRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no runtime manifest location is configured")]
    NoManifest,
    #[error("no runtime download available for platform: {platform}")]
    NoArchiveForPlatform { platform: String },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("upgrade cancelled")]
    Cancelled,
    #[error("upgrade worker stopped unexpectedly: {0}")]
    Worker(String),
}

impl UpgradeError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Download(error) => error.is_cancelled(),
            Self::Archive(error) => error.is_cancelled(),
            _ => false,
        }
    }
}

pub struct Orchestrator {
    settings: UpgradeSettings,
    client: reqwest::Client,
    prompt: Arc<dyn DecisionPrompt>,
    prefs: Arc<dyn PreferenceStore>,
    progress: Arc<dyn ProgressSink>,
    extractor: Extractor,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// A headless orchestrator that remembers nothing and reports nowhere;
    /// swap collaborators in with the `with_*` methods.
    #[must_use]
    pub fn new(settings: UpgradeSettings, client: reqwest::Client) -> Self {
        Self {
            settings,
            client,
            prompt: Arc::new(HeadlessPrompt::default()),
            prefs: Arc::new(MemoryPreferences::default()),
            progress: Arc::new(NullProgress),
            extractor: Extractor::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: Arc<dyn DecisionPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    #[must_use]
    pub fn with_preferences(mut self, prefs: Arc<dyn PreferenceStore>) -> Self {
        self.prefs = prefs;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Share an existing token, such as one cancelled on Ctrl-C.
    #[must_use]
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &UpgradeSettings {
        &self.settings
    }

    /// Cancelling this token stops a running upgrade at its next checkpoint.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn is_below(&self, threshold: Option<&str>) -> bool {
        threshold.is_some_and(|threshold| {
            version::compare(&self.settings.current_version, threshold).is_lt()
        })
    }

    #[must_use]
    pub fn is_below_minimum(&self) -> bool {
        self.is_below(self.settings.minimum_version.as_deref())
    }

    #[must_use]
    pub fn is_below_recommended(&self) -> bool {
        self.is_below(self.settings.recommended_version.as_deref())
    }

    /// The managed root, if configured and present on disk.
    fn managed_root(&self) -> Option<&Path> {
        self.settings
            .managed_root
            .as_deref()
            .filter(|root| root.is_dir())
    }

    /// Whether the running runtime lives under the managed root.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        match (self.settings.runtime_home.as_deref(), self.managed_root()) {
            (Some(home), Some(root)) => normalize(home).starts_with(normalize(root)),
            _ => false,
        }
    }

    #[must_use]
    pub fn decide(&self) -> UpgradeDecision {
        // Adequacy is judged against the recommended version only.
        let Some(target) = self.settings.recommended_version.as_deref() else {
            return UpgradeDecision::AlreadyAdequate;
        };
        if !self.is_below_recommended() {
            return UpgradeDecision::AlreadyAdequate;
        }
        let Some(root) = self.managed_root().filter(|_| self.is_managed()) else {
            return UpgradeDecision::WarnOnly;
        };
        if let Some(record) = installation::good_installation(root, &self.settings.layout, target)
        {
            return UpgradeDecision::OfferSwitch(record);
        }
        if self.settings.links_url.is_none() {
            // Nowhere to download from.
            return UpgradeDecision::WarnOnly;
        }
        UpgradeDecision::OfferDownload
    }

    /// Run the startup check, asking the user where needed.
    pub async fn check(&self) -> CheckOutcome {
        self.progress
            .update(Some("Checking runtime version..."), None);

        let decision = self.decide();
        debug!("Runtime check for {}: {decision:?}", self.settings.current_version);

        match decision {
            UpgradeDecision::AlreadyAdequate => CheckOutcome::Continue,
            UpgradeDecision::OfferDownload => {
                let prompt = Prompt::new(self.download_message(), "Upgrade", "Not now")
                    .with_never("Never ask again");
                if self.ask_if_allowed(SKIP_UPGRADE_PROMPT, &prompt).await {
                    self.run_upgrade().await
                } else {
                    CheckOutcome::Continue
                }
            }
            UpgradeDecision::OfferSwitch(record) => {
                self.warn(&self.switch_message(&record.path)).await
            }
            UpgradeDecision::WarnOnly => self.warn(&self.warn_message()).await,
        }
    }

    async fn warn(&self, message: &str) -> CheckOutcome {
        let prompt = Prompt::new(message, "Quit", "Launch anyway")
            .with_never("Launch and never warn again");
        if self.ask_if_allowed(SKIP_VERSION_WARNING, &prompt).await {
            CheckOutcome::Quit
        } else {
            CheckOutcome::Continue
        }
    }

    /// Waits for an answer on the blocking pool. A cancelled token abandons
    /// the question and counts as [`Choice::Canceled`].
    async fn ask(&self, prompt: &Prompt) -> Choice {
        let asker = Arc::clone(&self.prompt);
        let prompt = prompt.clone();
        let answer = tokio::task::spawn_blocking(move || asker.ask(&prompt));
        tokio::select! {
            () = self.cancel.cancelled() => {
                debug!("Prompt abandoned after cancellation");
                Choice::Canceled
            }
            answer = answer => answer.unwrap_or(Choice::Canceled),
        }
    }

    /// True only for an explicit yes. A "never" answer is remembered under
    /// `key`, and a remembered key skips the prompt entirely.
    async fn ask_if_allowed(&self, key: &str, prompt: &Prompt) -> bool {
        if self.prefs.is_suppressed(key) {
            debug!("Prompt {key} suppressed by user preference");
            return false;
        }
        match self.ask(prompt).await {
            Choice::Yes => true,
            Choice::Never => {
                if let Err(error) = self.prefs.suppress(key) {
                    warn!("Failed to remember answer for {key}: {error}");
                }
                false
            }
            Choice::No | Choice::Canceled => false,
        }
    }

    fn old_version_warning(&self) -> String {
        let threshold = if self.is_below_minimum() {
            format!(
                "required minimum of {}",
                self.settings.minimum_version.as_deref().unwrap_or_default()
            )
        } else {
            format!(
                "recommended minimum of {}",
                self.settings.recommended_version.as_deref().unwrap_or_default()
            )
        };
        format!(
            "The runtime version currently in use, {}, is below the {threshold}.",
            self.settings.current_version
        )
    }

    fn download_message(&self) -> String {
        let mut message = self.old_version_warning();
        if self.is_below_minimum() {
            message.push_str(&format!(
                "\nIt is strongly recommended to upgrade it, or {} may not work properly.",
                self.settings.app_name
            ));
        }
        message.push_str("\n\nHow would you like to proceed?");
        message
    }

    fn switch_message(&self, good: &Path) -> String {
        let mut message = self.old_version_warning();
        message.push_str(&format!(
            "\nIt appears there is a good-enough runtime already installed at {}, which is {}recommended to use instead.",
            good.display(),
            if self.is_below_minimum() { "strongly " } else { "" }
        ));
        message.push_str(&self.crash_warning());
        message.push_str("\n\nHow would you like to proceed?");
        message
    }

    fn warn_message(&self) -> String {
        let mut message = self.old_version_warning();
        message.push_str(&self.crash_warning());
        message.push_str("\n\nHow would you like to proceed?");
        message
    }

    fn crash_warning(&self) -> String {
        if self.is_below_minimum() {
            format!(
                "\nIf you continue the launch with this runtime, {} might crash.",
                self.settings.app_name
            )
        } else {
            String::new()
        }
    }

    /// Handle a launch that failed because the application needs a newer
    /// runtime. `message` is the failure text, which usually names the class
    /// file version that was rejected.
    pub async fn inform_launch_failure(&self, message: &str) -> CheckOutcome {
        if !self.prompt.is_interactive() {
            error!("Launch failed and no one can be asked to upgrade: {message}");
            return CheckOutcome::Quit;
        }

        let needed = version::extract_class_version(message)
            .and_then(version::class_version_to_release)
            .unwrap_or_else(|| "unknown".to_string());
        let text = format!(
            "{} failed to launch because it requires a newer runtime.\n\n  - Current version: {}\n  - Needed version: {needed}\n\nHow would you like to proceed?",
            capitalize(&self.settings.app_name),
            self.settings.current_version,
        );

        if self.ask(&Prompt::new(text, "Upgrade", "Just quit")).await != Choice::Yes {
            return CheckOutcome::Quit;
        }
        match self.upgrade().await {
            Ok(path) => CheckOutcome::Upgraded(path),
            Err(UpgradeError::NoArchiveForPlatform { platform }) => {
                error!("No runtime download available for platform: {platform}");
                CheckOutcome::Quit
            }
            Err(error) => failed(&error),
        }
    }

    /// [`Orchestrator::upgrade`], with failures logged instead of returned.
    pub async fn run_upgrade(&self) -> CheckOutcome {
        match self.upgrade().await {
            Ok(path) => CheckOutcome::Upgraded(path),
            Err(error) => failed(&error),
        }
    }

    /// Download and unpack the runtime for this platform into the managed
    /// root, then record its location in the config file.
    ///
    /// Returns the new installation root when the archive revealed one.
    ///
    /// # Errors
    /// Fails when the managed root or manifest is not configured, the
    /// platform has no download, or any transfer or extraction step fails.
    pub async fn upgrade(&self) -> Result<Option<PathBuf>, UpgradeError> {
        let root = self.prepare_root()?;
        self.progress
            .update(Some("Updating runtime..."), Some(f64::NAN));

        let links_url = self
            .settings
            .links_url
            .as_deref()
            .ok_or(UpgradeError::NoManifest)?;
        let manifest = Manifest::parse(download::download_text(&self.client, links_url).await?);
        let platform = self.settings.platform.as_str();
        let url = manifest
            .archive_for(platform)
            .ok_or_else(|| UpgradeError::NoArchiveForPlatform {
                platform: platform.to_string(),
            })?;
        self.check_cancelled()?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("runway-runtime-");
        let suffix = manifest::archive_suffix(url);
        if let Some(suffix) = suffix.as_deref() {
            builder.suffix(suffix);
        }
        let archive = builder
            .tempfile()
            .map_err(|error| UpgradeError::io("failed to create temporary archive", error))?
            .into_temp_path();

        let sink = Arc::clone(&self.progress);
        download::download(
            &self.client,
            url,
            &archive,
            self.cancel.clone(),
            move |progress| match progress {
                DownloadProgress::Fraction(fraction) => sink.update(Some(DOWNLOADING), Some(fraction)),
                DownloadProgress::Bytes(_) => sink.update(Some(DOWNLOADING), Some(f64::NAN)),
            },
        )
        .wait()
        .await?;

        if let Some(expected) = manifest.checksum_for(platform) {
            self.verify_checksum(url, &archive, expected).await?;
        }
        self.check_cancelled()?;

        let install_dir = Arc::new(Mutex::new(None::<String>));
        let captured = Arc::clone(&install_dir);
        let sink = Arc::clone(&self.progress);
        self.extractor
            .unpack(&archive, &root, self.cancel.clone(), move |entry| {
                if let Ok(mut dir) = captured.lock() {
                    if dir.is_none() {
                        *dir = install_root_from_entry(&entry.name);
                    }
                }
                let message = format!("Unpacking {}", entry.name);
                sink.update(Some(&message), Some(f64::NAN));
            })?
            .wait()
            .await?;

        let install_dir = install_dir.lock().ok().and_then(|dir| dir.clone());
        let new_home = match install_dir {
            Some(dir) => {
                let home = normalize(&root.join(dir));
                self.persist_location(&home)?;
                Some(home)
            }
            None => {
                warn!("Could not tell which directory the new runtime was unpacked into");
                None
            }
        };

        self.progress
            .update(Some("Runtime update complete"), Some(f64::NAN));
        info!("Runtime upgrade complete: {new_home:?}");
        Ok(new_home)
    }

    fn check_cancelled(&self) -> Result<(), UpgradeError> {
        if self.cancel.is_cancelled() {
            Err(UpgradeError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn prepare_root(&self) -> Result<PathBuf, UpgradeError> {
        let root = self
            .settings
            .managed_root
            .as_deref()
            .ok_or(UpgradeError::NoManagedRoot)?;
        let managed_root_error = |source| UpgradeError::ManagedRoot {
            path: root.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(root).map_err(managed_root_error)?;
        let root = std::path::absolute(root).map_err(managed_root_error)?;
        Ok(normalize(&root))
    }

    async fn verify_checksum(
        &self,
        url: &str,
        archive: &Path,
        expected: &str,
    ) -> Result<(), UpgradeError> {
        self.progress
            .update(Some("Verifying download..."), Some(f64::NAN));
        let path = archive.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || checksum::sha256_file(&path))
            .await
            .map_err(|error| UpgradeError::Worker(error.to_string()))?
            .map_err(|error| UpgradeError::io("failed to checksum runtime archive", error))?;
        if actual.eq_ignore_ascii_case(expected) {
            info!("Runtime archive checksum verified");
            Ok(())
        } else {
            Err(UpgradeError::ChecksumMismatch {
                url: url.to_string(),
                expected: expected.to_ascii_lowercase(),
                actual,
            })
        }
    }

    fn persist_location(&self, home: &Path) -> Result<(), UpgradeError> {
        let Some(config_file) = self.settings.config_file.as_deref() else {
            debug!("No config file configured; not recording {}", home.display());
            return Ok(());
        };
        let value = relative_to_app_dir(home, self.settings.app_dir.as_deref());
        config_file::update(
            config_file,
            &self.settings.config_key,
            &value.to_string_lossy(),
        )?;
        info!(
            "Recorded {}={} in {}",
            self.settings.config_key,
            value.display(),
            config_file.display()
        );
        Ok(())
    }
}

fn failed(error: &UpgradeError) -> CheckOutcome {
    if error.is_cancelled() {
        warn!("Runtime upgrade cancelled");
    } else {
        error!("Runtime upgrade failed: {error}");
    }
    CheckOutcome::UpgradeFailed(error.to_string())
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Top-level directory named by an archive entry, if any. Entries are
/// relative to the unpack destination; a leading `./` is ignored.
fn install_root_from_entry(name: &str) -> Option<String> {
    let mut name = name;
    while let Some(rest) = name.strip_prefix("./") {
        name = rest;
    }
    let (first, _) = name.split_once('/')?;
    if first.is_empty() || first == "." || first == ".." {
        return None;
    }
    Some(first.to_string())
}

/// `path` relative to `app_dir` when it lies beneath it, else unchanged.
fn relative_to_app_dir(path: &Path, app_dir: Option<&Path>) -> PathBuf {
    let Some(app_dir) = app_dir else {
        return path.to_path_buf();
    };
    let app_dir = std::path::absolute(app_dir).map_or_else(|_| app_dir.to_path_buf(), |dir| normalize(&dir));
    match path.strip_prefix(&app_dir) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative.to_path_buf(),
        _ => path.to_path_buf(),
    }
}
