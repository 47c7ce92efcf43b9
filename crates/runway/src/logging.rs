use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Append-only log file for [`WriteLogger`].
///
/// Opening it cuts an oversized file down to its newer half. If the file is
/// removed while runway runs, the next write starts a fresh one.
struct LogFile {
    path: PathBuf,
    file: File,
}

impl LogFile {
    /// `max_size` of zero disables trimming.
    fn open(path: &Path, max_size: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if max_size > 0 {
            shrink(path, max_size)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            file: append(path)?,
        })
    }

    fn reopen_if_removed(&mut self) -> io::Result<()> {
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            self.file = append(&self.path)?;
        }
        Ok(())
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.reopen_if_removed()?;
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn shrink(path: &Path, max_size: u64) -> io::Result<()> {
    let len = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(error),
    };
    if len <= max_size {
        return Ok(());
    }
    let contents = fs::read(path)?;
    fs::write(path, newer_half(&contents))
}

/// The second half of `contents`, starting after the first line break past
/// the midpoint so no line is cut in two.
fn newer_half(contents: &[u8]) -> &[u8] {
    let half = contents.len() / 2;
    match contents[half..].iter().position(|&byte| byte == b'\n') {
        Some(pos) => &contents[half + pos + 1..],
        None => &contents[half..],
    }
}

fn config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("runway")
        .build()
}

/// Log runway's own crates to `log_path`. `echo` also copies them to stderr,
/// as debug builds always do. `debug` lowers the level from Info to Debug.
pub fn init_logging(log_path: Option<&Path>, echo: bool, debug: bool, max_log_size: u64) {
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    if echo || cfg!(debug_assertions) {
        loggers.push(TermLogger::new(
            LevelFilter::Debug,
            config(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ));
    }

    let mut file_error = None;
    if let Some(log_path) = log_path {
        match LogFile::open(log_path, max_log_size) {
            Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, config(), file)),
            Err(error) => file_error = Some(error),
        }
    }

    if !loggers.is_empty() {
        let _ = CombinedLogger::init(loggers);
    }
    set_debug_logging(debug);

    match (log_path, file_error) {
        (Some(log_path), Some(error)) => {
            log::warn!("Cannot write log file {}: {error}", log_path.display());
        }
        (Some(log_path), None) => log::debug!("Logging to {}", log_path.display()),
        (None, _) => {}
    }
}

pub fn set_debug_logging(enabled: bool) {
    log::set_max_level(if enabled {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
}
