use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use runway_platform::HideWindow;
use tokio_util::sync::CancellationToken;

use super::{ArchiveEntry, ArchiveError, absolute_normalized};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const TERMINATE_GRACE: Duration = Duration::from_secs(1);
const READER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Kills the helper if it is still running when extraction bails out early.
struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }
}

pub(super) fn untar<F>(
    program: &Path,
    archive: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    mut on_entry: F,
) -> Result<(), ArchiveError>
where
    F: FnMut(&ArchiveEntry) + Send + 'static,
{
    let program_name = program.display().to_string();
    let program = which::which(program).map_err(|error| ArchiveError::ToolMissing {
        program: program_name.clone(),
        details: error.to_string(),
    })?;
    let archive = absolute_normalized(archive)?;
    let dest = absolute_normalized(dest)?;
    std::fs::create_dir_all(&dest).map_err(|error| {
        ArchiveError::io_with_path("failed to create extraction directory", &dest, &error)
    })?;

    info!(
        "Extracting {} to {} with {}",
        archive.display(),
        dest.display(),
        program.display()
    );

    let mut command = Command::new(&program);
    command
        .arg("xvf")
        .arg(&archive)
        .arg("-C")
        .arg(&dest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .hide_window();
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group, so compression helpers spawned by tar are
        // signalled together with it.
        command.process_group(0);
    }

    let child = command
        .spawn()
        .map_err(|error| ArchiveError::io_with_path("failed to start", &program, &error))?;
    let mut child = ChildGuard(child);

    let stdout = child
        .0
        .stdout
        .take()
        .ok_or_else(|| ArchiveError::Worker("tar stdout was not captured".to_string()))?;
    let stderr = child
        .0
        .stderr
        .take()
        .ok_or_else(|| ArchiveError::Worker("tar stderr was not captured".to_string()))?;

    let stop = Arc::new(AtomicBool::new(false));
    let errors = Arc::new(Mutex::new(String::new()));

    let stdout_reader = {
        let stop = Arc::clone(&stop);
        let errors = Arc::clone(&errors);
        spawn_reader("untar-stdout", move || {
            drain_lines(stdout, &stop, &errors, |line| {
                on_entry(&ArchiveEntry::from_listing(line));
            });
        })
    };
    let stdout_reader = match stdout_reader {
        Ok(handle) => handle,
        Err(error) => {
            stop.store(true, Ordering::Relaxed);
            return Err(error);
        }
    };

    let stderr_reader = {
        let stop = Arc::clone(&stop);
        let errors = Arc::clone(&errors);
        spawn_reader("untar-stderr", move || {
            drain_lines(stderr, &stop, &errors, |line| append_error(&errors, line));
        })
    };
    let stderr_reader = match stderr_reader {
        Ok(handle) => handle,
        Err(error) => {
            stop.store(true, Ordering::Relaxed);
            terminate(&mut child.0);
            join_bounded(stdout_reader);
            return Err(error);
        }
    };

    loop {
        match child.0.try_wait() {
            Ok(Some(status)) => {
                join_fully(stdout_reader)?;
                join_fully(stderr_reader)?;
                let stderr = collected(&errors);
                if status.success() {
                    if !stderr.is_empty() {
                        debug!("{program_name} stderr: {stderr}");
                    }
                    debug!("Extraction complete to {}", dest.display());
                    return Ok(());
                }
                return Err(ArchiveError::ProcessFailed {
                    program: program_name,
                    code: status.code(),
                    stderr,
                });
            }
            Ok(None) => {}
            Err(error) => {
                stop.store(true, Ordering::Relaxed);
                terminate(&mut child.0);
                join_bounded(stdout_reader);
                join_bounded(stderr_reader);
                return Err(ArchiveError::io("failed to poll tar process", error));
            }
        }

        if cancel.is_cancelled() {
            info!("Cancelling extraction of {}", archive.display());
            stop.store(true, Ordering::Relaxed);
            terminate(&mut child.0);
            join_bounded(stdout_reader);
            join_bounded(stderr_reader);
            return Err(ArchiveError::Cancelled {
                stderr: collected(&errors),
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<F>(name: &str, body: F) -> Result<JoinHandle<()>, ArchiveError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|error| ArchiveError::io("failed to start output reader", error))
}

/// Feeds complete lines to `on_line` until end of stream. The stop flag is
/// checked after each line, so a line already in the pipe is never lost.
fn drain_lines<R, F>(source: R, stop: &AtomicBool, errors: &Mutex<String>, mut on_line: F)
where
    R: Read,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if !line.is_empty() {
                    on_line(line);
                }
            }
            Err(error) => {
                append_error(errors, &error.to_string());
                break;
            }
        }
        if stop.load(Ordering::Relaxed) {
            break;
        }
    }
}

fn append_error(errors: &Mutex<String>, line: &str) {
    if let Ok(mut buf) = errors.lock() {
        buf.push_str(line);
        buf.push('\n');
    }
}

fn collected(errors: &Mutex<String>) -> String {
    errors.lock().map(|buf| buf.clone()).unwrap_or_default()
}

/// SIGTERM first, then a hard kill once the grace period runs out.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let group = i32::try_from(child.id()).ok().map(Pid::from_raw);
        if let Some(group) = group {
            if let Err(error) = killpg(group, Signal::SIGTERM) {
                warn!("Failed to send SIGTERM to tar: {error}");
            }
        }

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if start.elapsed() < TERMINATE_GRACE => thread::sleep(POLL_INTERVAL),
                Ok(None) => {
                    warn!("tar did not stop within {TERMINATE_GRACE:?}, killing");
                    if let Some(group) = group {
                        let _ = killpg(group, Signal::SIGKILL);
                    }
                    break;
                }
                Err(error) => {
                    warn!("Error checking tar status: {error}");
                    break;
                }
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}

fn join_fully(handle: JoinHandle<()>) -> Result<(), ArchiveError> {
    handle
        .join()
        .map_err(|_| ArchiveError::Worker("output reader panicked".to_string()))
}

fn join_bounded(handle: JoinHandle<()>) {
    let deadline = Instant::now() + READER_JOIN_TIMEOUT;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(
                "{} did not stop within {READER_JOIN_TIMEOUT:?}, detaching",
                handle.thread().name().unwrap_or("output reader")
            );
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let _ = handle.join();
}
