mod cli;
mod console;
mod error;
mod logging;
mod settings;

use std::cmp::Ordering;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use runway_core::{
    CheckOutcome, DownloadProgress, Extractor, JsonPreferences, Orchestrator, PreferenceStore,
    download, http_client, version,
};
use runway_platform::AppPaths;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, Command};
use crate::console::{console, progress_sink};
use crate::error::AppError;
use crate::settings::Settings;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match Settings::load(cli.settings.as_deref()) {
        Ok(settings) => settings,
        Err(error) => {
            eprintln!("runway: {error}");
            return ExitCode::FAILURE;
        }
    };
    cli.overrides.apply(&mut settings);

    let paths = AppPaths::new().ok();
    if let Some(paths) = &paths {
        let _ = paths.ensure_dirs();
    }
    logging::init_logging(
        paths.as_ref().map(AppPaths::log_file).as_deref(),
        cli.verbose,
        cli.verbose || settings.debug_logging,
        settings.max_log_size_bytes,
    );

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let result = run(cli.command, &settings, paths.as_ref(), cancel.clone()).await;
    if cancel.is_cancelled() {
        // An abandoned prompt may still be blocked on stdin, and runtime
        // shutdown would wait for it.
        warn!("Interrupted");
        eprintln!("runway: interrupted");
        log::logger().flush();
        std::process::exit(130);
    }

    match result {
        Ok(code) => code,
        Err(error) if error.is_cancelled() => {
            warn!("Interrupted: {error}");
            eprintln!("runway: interrupted");
            ExitCode::from(130)
        }
        Err(error) => {
            error!("{error}");
            eprintln!("runway: {error}");
            ExitCode::FAILURE
        }
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            cancel.cancel();
        }
    });
}

async fn run(
    command: Command,
    settings: &Settings,
    paths: Option<&AppPaths>,
    cancel: CancellationToken,
) -> Result<ExitCode, AppError> {
    match command {
        Command::Compare { a, b } => {
            let result = match version::compare(&a, &b) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
            println!("{result}");
            Ok(ExitCode::SUCCESS)
        }
        Command::ClassVersion {
            version: class_version,
        } => {
            let release = version::class_version_to_release(&class_version);
            println!("{}", release.as_deref().unwrap_or("unknown"));
            Ok(ExitCode::SUCCESS)
        }
        Command::Download { url, dest } => {
            let client = http_client(&settings.client_options())?;
            let progress = progress_sink(settings.headless);
            let message = format!("Downloading {url}");
            let sink = Arc::clone(&progress);
            download(&client, &url, &dest, cancel, move |update| match update {
                DownloadProgress::Fraction(fraction) => {
                    sink.update(Some(message.as_str()), Some(fraction));
                }
                DownloadProgress::Bytes(_) => sink.update(Some(message.as_str()), Some(f64::NAN)),
            })
            .wait()
            .await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Unpack { archive, dest } => {
            Extractor::default()
                .unpack(&archive, &dest, cancel, |entry| println!("{}", entry.name))?
                .wait()
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => {
            let orchestrator = orchestrator(settings, paths, cancel)?;
            Ok(match orchestrator.check().await {
                CheckOutcome::Quit => ExitCode::FAILURE,
                CheckOutcome::Upgraded(path) => {
                    report_upgrade(path.as_deref());
                    ExitCode::SUCCESS
                }
                CheckOutcome::Continue | CheckOutcome::UpgradeFailed(_) => ExitCode::SUCCESS,
            })
        }
        Command::Upgrade => {
            let orchestrator = orchestrator(settings, paths, cancel)?;
            let path = orchestrator.upgrade().await?;
            report_upgrade(path.as_deref());
            Ok(ExitCode::SUCCESS)
        }
        Command::LaunchFailed { message } => {
            let orchestrator = orchestrator(settings, paths, cancel)?;
            Ok(match orchestrator.inform_launch_failure(&message).await {
                CheckOutcome::Upgraded(path) => {
                    report_upgrade(path.as_deref());
                    ExitCode::SUCCESS
                }
                CheckOutcome::Continue => ExitCode::SUCCESS,
                CheckOutcome::Quit | CheckOutcome::UpgradeFailed(_) => ExitCode::FAILURE,
            })
        }
    }
}

fn orchestrator(
    settings: &Settings,
    paths: Option<&AppPaths>,
    cancel: CancellationToken,
) -> Result<Orchestrator, AppError> {
    let upgrade_settings = settings.upgrade_settings();
    if upgrade_settings.current_version.is_empty() {
        return Err(AppError::MissingSetting("runtime_version"));
    }
    let client = http_client(&settings.client_options())?;

    let (progress, prompt) = console(settings.headless);
    let mut orchestrator = Orchestrator::new(upgrade_settings, client)
        .with_cancellation_token(cancel)
        .with_prompt(prompt)
        .with_progress(progress);
    if let Some(paths) = paths {
        let prefs: Arc<dyn PreferenceStore> =
            Arc::new(JsonPreferences::load(paths.preferences_file()));
        orchestrator = orchestrator.with_preferences(prefs);
    }

    Ok(orchestrator)
}

fn report_upgrade(path: Option<&std::path::Path>) {
    match path {
        Some(path) => println!("Runtime installed at {}", path.display()),
        None => println!("Runtime installed"),
    }
}
