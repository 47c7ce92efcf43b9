use std::io::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};

use runway_core::{
    CheckOutcome, Choice, DecisionPrompt, MemoryPreferences, Orchestrator, ProgressSink, Prompt,
    UpgradeError, UpgradeSettings,
};

struct AlwaysYes;

impl DecisionPrompt for AlwaysYes {
    fn ask(&self, _prompt: &Prompt) -> Choice {
        Choice::Yes
    }
}

#[derive(Default)]
struct RecordingProgress {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingProgress {
    fn update(&self, message: Option<&str>, _progress: Option<f64>) {
        if let Some(message) = message {
            self.messages
                .lock()
                .expect("progress lock")
                .push(message.to_string());
        }
    }
}

fn file_url(path: &Path) -> String {
    reqwest::Url::from_file_path(path)
        .expect("absolute path should convert to a file URL")
        .to_string()
}

fn write_runtime_zip(path: &Path) {
    let file = std::fs::File::create(path).expect("zip file should be created");
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    writer
        .add_directory("jdk-21.0.2/", options)
        .expect("directory entry should be written");
    writer
        .start_file("jdk-21.0.2/release", options)
        .expect("release entry should be started");
    writer
        .write_all(b"JAVA_VERSION=\"21.0.2\"\n")
        .expect("release entry should be written");
    writer
        .add_directory("jdk-21.0.2/bin/", options)
        .expect("bin entry should be written");
    writer.finish().expect("zip archive should be finalized");
}

struct Fixture {
    _temp: tempfile::TempDir,
    app_dir: std::path::PathBuf,
    settings: UpgradeSettings,
    archive: std::path::PathBuf,
    manifest: std::path::PathBuf,
}

fn fixture(manifest_body: impl FnOnce(&str) -> String) -> Fixture {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let app_dir = temp.path().join("Fiji.app");
    let managed_root = app_dir.join("java").join("linux-x64");
    std::fs::create_dir_all(managed_root.join("jdk-11")).expect("managed root should exist");
    std::fs::write(
        managed_root.join("jdk-11").join("release"),
        "JAVA_VERSION=\"11.0.22\"\n",
    )
    .expect("old release file");

    let archive = temp.path().join("zulu21-linux_x64.zip");
    write_runtime_zip(&archive);
    let manifest = temp.path().join("links.txt");
    std::fs::write(&manifest, manifest_body(&file_url(&archive))).expect("manifest written");

    let settings = UpgradeSettings {
        app_name: "Fiji".to_string(),
        current_version: "11.0.22".to_string(),
        minimum_version: Some("11".to_string()),
        recommended_version: Some("21".to_string()),
        runtime_home: Some(managed_root.join("jdk-11")),
        managed_root: Some(managed_root),
        links_url: Some(file_url(&manifest)),
        platform: "linux-x64".to_string(),
        config_file: Some(app_dir.join("fiji.cfg")),
        app_dir: Some(app_dir.clone()),
        ..UpgradeSettings::default()
    };

    Fixture {
        _temp: temp,
        app_dir,
        settings,
        archive,
        manifest,
    }
}

#[tokio::test]
async fn accepted_upgrade_installs_runtime_and_records_location() {
    let fixture = fixture(|url| format!("macos-arm64=file:///nowhere.tar.gz\nlinux-x64={url}\n"));
    std::fs::write(fixture.app_dir.join("fiji.cfg"), "max-heap=75%\n").expect("seed config");
    let progress = Arc::new(RecordingProgress::default());
    let orchestrator = Orchestrator::new(fixture.settings.clone(), reqwest::Client::new())
        .with_prompt(Arc::new(AlwaysYes))
        .with_preferences(Arc::new(MemoryPreferences::default()))
        .with_progress(progress.clone());

    let outcome = orchestrator.check().await;

    let new_home = fixture.app_dir.join("java/linux-x64/jdk-21.0.2");
    assert_eq!(outcome, CheckOutcome::Upgraded(Some(new_home.clone())));
    assert_eq!(
        std::fs::read_to_string(new_home.join("release")).expect("release should be unpacked"),
        "JAVA_VERSION=\"21.0.2\"\n"
    );

    let config = std::fs::read_to_string(fixture.app_dir.join("fiji.cfg")).expect("config");
    let expected_dir = Path::new("java").join("linux-x64").join("jdk-21.0.2");
    assert_eq!(
        config,
        format!("max-heap=75%\njvm-dir={}\n", expected_dir.display())
    );

    let messages = progress.messages.lock().expect("progress lock");
    assert_eq!(messages.first().map(String::as_str), Some("Checking runtime version..."));
    assert!(messages.iter().any(|message| message == "Downloading runtime..."));
    assert!(messages.iter().any(|message| message == "Unpacking jdk-21.0.2/"));
    assert_eq!(messages.last().map(String::as_str), Some("Runtime update complete"));

    // The freshly unpacked runtime now satisfies the next check.
    let next = Orchestrator::new(fixture.settings.clone(), reqwest::Client::new());
    assert!(matches!(
        next.decide(),
        runway_core::UpgradeDecision::OfferSwitch(record) if record.path == new_home
    ));
}

#[tokio::test]
async fn missing_platform_entry_fails_loudly() {
    let fixture = fixture(|url| format!("windows-x64={url}\n"));
    let orchestrator = Orchestrator::new(fixture.settings.clone(), reqwest::Client::new());

    let result = orchestrator.upgrade().await;

    assert!(matches!(
        result,
        Err(UpgradeError::NoArchiveForPlatform { ref platform }) if platform == "linux-x64"
    ));
    assert!(!fixture.app_dir.join("fiji.cfg").exists());
}

#[tokio::test]
async fn checksum_mismatch_stops_before_unpacking() {
    let fixture = fixture(|url| format!("linux-x64={url}\nlinux-x64.sha256={}\n", "0".repeat(64)));
    let orchestrator = Orchestrator::new(fixture.settings.clone(), reqwest::Client::new());

    match orchestrator.run_upgrade().await {
        CheckOutcome::UpgradeFailed(reason) => assert!(reason.contains("checksum mismatch")),
        other => panic!("expected checksum failure, got {other:?}"),
    }
    assert!(!fixture.app_dir.join("java/linux-x64/jdk-21.0.2").exists());
}

#[tokio::test]
async fn matching_checksum_is_accepted() {
    let mut fixture = fixture(|url| format!("linux-x64={url}\n"));
    let digest = {
        use sha2::{Digest, Sha256};
        format!("{:x}", Sha256::digest(std::fs::read(&fixture.archive).expect("archive")))
    };
    let body = std::fs::read_to_string(&fixture.manifest).expect("manifest");
    std::fs::write(
        &fixture.manifest,
        format!("{body}linux-x64.sha256={}\n", digest.to_uppercase()),
    )
    .expect("manifest rewritten");
    fixture.settings.config_file = None;

    let orchestrator = Orchestrator::new(fixture.settings.clone(), reqwest::Client::new());
    let home = orchestrator.upgrade().await.expect("upgrade should succeed");

    assert_eq!(home, Some(fixture.app_dir.join("java/linux-x64/jdk-21.0.2")));
}

#[tokio::test]
async fn cancelled_upgrade_reports_cancellation() {
    let fixture = fixture(|url| format!("linux-x64={url}\n"));
    let orchestrator = Orchestrator::new(fixture.settings.clone(), reqwest::Client::new());
    orchestrator.cancellation_token().cancel();

    let error = orchestrator
        .upgrade()
        .await
        .expect_err("cancelled upgrade should fail");

    assert!(error.is_cancelled());
    assert!(!fixture.app_dir.join("fiji.cfg").exists());
}

const LAUNCH_FAILURE: &str = "java.lang.UnsupportedClassVersionError: sc/fiji/Main has been \
    compiled by a more recent version of the Java Runtime (class file version 65.0), this \
    version of the Java Runtime only recognizes class file versions up to 55.0";

#[tokio::test]
async fn launch_failure_upgrade_without_platform_archive_quits() {
    let fixture = fixture(|url| format!("windows-x64={url}\n"));
    let orchestrator = Orchestrator::new(fixture.settings.clone(), reqwest::Client::new())
        .with_prompt(Arc::new(AlwaysYes));

    let outcome = orchestrator.inform_launch_failure(LAUNCH_FAILURE).await;

    assert_eq!(outcome, CheckOutcome::Quit);
    assert!(!fixture.app_dir.join("fiji.cfg").exists());
    assert!(!fixture.app_dir.join("java/linux-x64/jdk-21.0.2").exists());
}

#[tokio::test]
async fn launch_failure_upgrade_installs_runtime() {
    let fixture = fixture(|url| format!("linux-x64={url}\n"));
    let orchestrator = Orchestrator::new(fixture.settings.clone(), reqwest::Client::new())
        .with_prompt(Arc::new(AlwaysYes));

    let outcome = orchestrator.inform_launch_failure(LAUNCH_FAILURE).await;

    let new_home = fixture.app_dir.join("java/linux-x64/jdk-21.0.2");
    assert_eq!(outcome, CheckOutcome::Upgraded(Some(new_home.clone())));
    assert!(new_home.join("release").is_file());
    let config = std::fs::read_to_string(fixture.app_dir.join("fiji.cfg")).expect("config");
    let expected_dir = Path::new("java").join("linux-x64").join("jdk-21.0.2");
    assert_eq!(config, format!("jvm-dir={}\n", expected_dir.display()));
}
