use std::path::Path;
use std::pin::Pin;
use std::time::{Duration, Instant};

use futures_util::TryStreamExt;
use log::{debug, info};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::task::TaskHandle;

pub const INITIAL_CHUNK_SIZE: usize = 64 * 1024;
pub const MIN_CHUNK_SIZE: usize = 8 * 1024;
pub const MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024;
/// Aim for roughly ten progress updates per second.
pub const TARGET_CHUNK_INTERVAL: Duration = Duration::from_millis(100);

const MAX_REDIRECTS: usize = 10;

type SourceReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DownloadProgress {
    /// Share of the advertised length transferred so far, in `[0, 1]`.
    Fraction(f64),
    /// Bytes transferred so far, when the source did not advertise a length.
    Bytes(u64),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid download source '{url}': {details}")]
    InvalidSource { url: String, details: String },
    #[error("{context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} failed with HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("download cancelled")]
    Cancelled,
    #[error("download worker stopped unexpectedly: {0}")]
    Worker(String),
}

impl DownloadError {
    fn http(context: &'static str, source: reqwest::Error) -> Self {
        Self::Http { context, source }
    }

    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<tokio::task::JoinError> for DownloadError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Worker(error.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: format!("runway/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Build the HTTP client shared by every download.
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialized.
pub fn http_client(options: &ClientOptions) -> Result<reqwest::Client, DownloadError> {
    reqwest::Client::builder()
        .user_agent(options.user_agent.as_str())
        .connect_timeout(options.connect_timeout)
        .read_timeout(options.read_timeout)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|error| DownloadError::http("failed to build HTTP client", error))
}

/// Start downloading `source` into `dest` on a spawned task.
///
/// `on_progress` runs on that task after every chunk, in transfer order. A
/// cancelled or failed download leaves whatever was written in `dest`.
pub fn download<F>(
    client: &reqwest::Client,
    source: &str,
    dest: &Path,
    cancel: CancellationToken,
    on_progress: F,
) -> TaskHandle<DownloadError>
where
    F: FnMut(DownloadProgress) + Send + 'static,
{
    let client = client.clone();
    let source = source.to_string();
    let dest = dest.to_path_buf();
    let token = cancel.clone();

    TaskHandle::spawn(token, async move {
        run_download(&client, &source, &dest, &cancel, on_progress).await
    })
}

async fn run_download<F>(
    client: &reqwest::Client,
    source: &str,
    dest: &Path,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<(), DownloadError>
where
    F: FnMut(DownloadProgress),
{
    info!("Downloading {source} to {}", dest.display());
    let (mut reader, total) = open_source(client, source).await?;

    let mut file = tokio::fs::File::create(dest).await.map_err(|error| {
        DownloadError::io_with_path("failed to create download file", dest, &error)
    })?;

    let mut chunk_size = INITIAL_CHUNK_SIZE;
    let mut buffer = Vec::with_capacity(chunk_size);
    let mut transferred: u64 = 0;
    let mut last = Instant::now();

    loop {
        buffer.clear();
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Download of {source} cancelled after {transferred} bytes");
                let _ = file.flush().await;
                return Err(DownloadError::Cancelled);
            }
            result = read_chunk(&mut reader, &mut buffer, chunk_size) => {
                result.map_err(|error| DownloadError::io("download stream error", error))?
            }
        };
        if read == 0 {
            break;
        }

        file.write_all(&buffer).await.map_err(|error| {
            DownloadError::io_with_path("failed to write download data", dest, &error)
        })?;

        let now = Instant::now();
        chunk_size = next_chunk_size(chunk_size, now.duration_since(last));
        last = now;

        transferred += read as u64;
        on_progress(progress(transferred, total));
    }

    file.flush().await.map_err(|error| {
        DownloadError::io_with_path("failed to flush download file", dest, &error)
    })?;

    info!("Download complete: {transferred} bytes");
    Ok(())
}

/// Fetch a small text resource (such as a runtime manifest) as lines.
///
/// # Errors
/// Returns an error if the source cannot be opened or read.
pub async fn download_text(
    client: &reqwest::Client,
    source: &str,
) -> Result<Vec<String>, DownloadError> {
    let (mut reader, _) = open_source(client, source).await?;
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .await
        .map_err(|error| DownloadError::io("failed to read text resource", error))?;

    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(str::to_string)
        .collect())
}

async fn open_source(
    client: &reqwest::Client,
    source: &str,
) -> Result<(SourceReader, Option<u64>), DownloadError> {
    let url = reqwest::Url::parse(source).map_err(|error| DownloadError::InvalidSource {
        url: source.to_string(),
        details: error.to_string(),
    })?;

    if url.scheme() == "file" {
        let path = url
            .to_file_path()
            .map_err(|()| DownloadError::InvalidSource {
                url: source.to_string(),
                details: "not a local file path".to_string(),
            })?;
        let file = tokio::fs::File::open(&path).await.map_err(|error| {
            DownloadError::io_with_path("failed to open download source", &path, &error)
        })?;
        let total = file.metadata().await.ok().map(|metadata| metadata.len());
        return Ok((Box::pin(file), total.filter(|total| *total > 0)));
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|error| DownloadError::http("download request failed", error))?;

    if !response.status().is_success() {
        return Err(DownloadError::Status {
            url: source.to_string(),
            status: response.status(),
        });
    }

    let total = response.content_length().filter(|total| *total > 0);
    let stream = response.bytes_stream().map_err(std::io::Error::other);
    Ok((Box::pin(StreamReader::new(stream)), total))
}

async fn read_chunk(
    reader: &mut SourceReader,
    buffer: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<usize> {
    reader.take(limit as u64).read_to_end(buffer).await
}

#[allow(clippy::cast_precision_loss)]
fn progress(transferred: u64, total: Option<u64>) -> DownloadProgress {
    match total {
        Some(total) => DownloadProgress::Fraction((transferred as f64 / total as f64).min(1.0)),
        None => DownloadProgress::Bytes(transferred),
    }
}

/// Scale the chunk size so the next chunk takes about
/// [`TARGET_CHUNK_INTERVAL`].
fn next_chunk_size(current: usize, elapsed: Duration) -> usize {
    let elapsed = elapsed.as_nanos().max(1);
    let scaled = current as u128 * TARGET_CHUNK_INTERVAL.as_nanos() / elapsed;
    usize::try_from(scaled)
        .unwrap_or(MAX_CHUNK_SIZE)
        .clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{
        ClientOptions, DownloadError, DownloadProgress, INITIAL_CHUNK_SIZE, MAX_CHUNK_SIZE,
        MIN_CHUNK_SIZE, download, download_text, http_client, next_chunk_size,
    };

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn client() -> reqwest::Client {
        http_client(&ClientOptions::default()).expect("client should build")
    }

    fn recorder() -> (
        Arc<Mutex<Vec<DownloadProgress>>>,
        impl FnMut(DownloadProgress) + Send + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |progress| {
            sink.lock().expect("progress lock").push(progress);
        })
    }

    #[tokio::test]
    async fn known_length_reports_fractions_ending_at_one() {
        let body = payload(300 * 1024);
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/runtime.zip")
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let dest = temp.path().join("runtime.zip");
        let (seen, on_progress) = recorder();

        download(
            &client(),
            &format!("{}/runtime.zip", server.url()),
            &dest,
            CancellationToken::new(),
            on_progress,
        )
        .wait()
        .await
        .expect("download should succeed");

        mock.assert_async().await;
        assert_eq!(std::fs::read(&dest).expect("dest readable"), body);

        let seen = seen.lock().expect("progress lock");
        assert!(!seen.is_empty());
        let fractions: Vec<f64> = seen
            .iter()
            .map(|progress| match progress {
                DownloadProgress::Fraction(value) => *value,
                DownloadProgress::Bytes(_) => panic!("length was advertised"),
            })
            .collect();
        assert!(fractions.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(fractions.iter().all(|value| (0.0..=1.0).contains(value)));
        assert_eq!(fractions.last().copied(), Some(1.0));
    }

    #[tokio::test]
    async fn unknown_length_reports_byte_counts_ending_at_file_size() {
        let body = payload(200 * 1024);
        let served = body.clone();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/stream.tar.gz")
            .with_status(200)
            .with_chunked_body(move |writer| writer.write_all(&served))
            .create_async()
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let dest = temp.path().join("stream.tar.gz");
        let (seen, on_progress) = recorder();

        download(
            &client(),
            &format!("{}/stream.tar.gz", server.url()),
            &dest,
            CancellationToken::new(),
            on_progress,
        )
        .wait()
        .await
        .expect("download should succeed");

        let seen = seen.lock().expect("progress lock");
        let counts: Vec<u64> = seen
            .iter()
            .map(|progress| match progress {
                DownloadProgress::Bytes(count) => *count,
                DownloadProgress::Fraction(_) => panic!("length was not advertised"),
            })
            .collect();
        assert!(counts.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(counts.last().copied(), Some(body.len() as u64));
        assert_eq!(
            std::fs::metadata(&dest).expect("dest exists").len(),
            body.len() as u64
        );
    }

    #[tokio::test]
    async fn redirects_are_followed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/latest")
            .with_status(302)
            .with_header("location", &format!("{}/jdk-21.zip", server.url()))
            .create_async()
            .await;
        server
            .mock("GET", "/jdk-21.zip")
            .with_status(200)
            .with_body("archive-bytes")
            .create_async()
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let dest = temp.path().join("jdk.zip");

        download(
            &client(),
            &format!("{}/latest", server.url()),
            &dest,
            CancellationToken::new(),
            |_| {},
        )
        .wait()
        .await
        .expect("redirected download should succeed");

        assert_eq!(
            std::fs::read_to_string(&dest).expect("dest readable"),
            "archive-bytes"
        );
    }

    #[tokio::test]
    async fn http_error_status_fails_the_download() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing.zip")
            .with_status(404)
            .create_async()
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let result = download(
            &client(),
            &format!("{}/missing.zip", server.url()),
            &temp.path().join("missing.zip"),
            CancellationToken::new(),
            |_| {},
        )
        .wait()
        .await;

        assert!(matches!(
            result,
            Err(DownloadError::Status { status, .. }) if status == reqwest::StatusCode::NOT_FOUND
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_within_one_chunk_and_keeps_partial_file() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let source = temp.path().join("big.bin");
        std::fs::write(&source, payload(4 * 1024 * 1024)).expect("source written");
        let source_url = reqwest::Url::from_file_path(&source).expect("absolute path");
        let dest = temp.path().join("copy.bin");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let reports = Arc::new(Mutex::new(0_usize));
        let counter = Arc::clone(&reports);

        let result = download(&client(), source_url.as_str(), &dest, cancel, move |_| {
            *counter.lock().expect("counter lock") += 1;
            trigger.cancel();
        })
        .wait()
        .await;

        assert!(matches!(result, Err(ref error) if error.is_cancelled()));
        assert_eq!(*reports.lock().expect("counter lock"), 1);
        let written = std::fs::metadata(&dest).expect("partial file kept").len();
        assert_eq!(written, INITIAL_CHUNK_SIZE as u64);
    }

    #[tokio::test]
    async fn download_text_splits_lines() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/links.txt")
            .with_status(200)
            .with_body("linux-x64=https://example.com/a.tar.gz\nmacos-arm64=https://example.com/b.tar.gz\n")
            .create_async()
            .await;

        let lines = download_text(&client(), &format!("{}/links.txt", server.url()))
            .await
            .expect("text should download");

        assert_eq!(
            lines,
            [
                "linux-x64=https://example.com/a.tar.gz",
                "macos-arm64=https://example.com/b.tar.gz"
            ]
        );
    }

    #[tokio::test]
    async fn invalid_source_is_rejected() {
        let result = download_text(&client(), "not a url").await;
        assert!(matches!(result, Err(DownloadError::InvalidSource { .. })));
    }

    #[test]
    fn chunk_size_grows_when_transfers_are_fast() {
        let next = next_chunk_size(INITIAL_CHUNK_SIZE, Duration::from_millis(50));
        assert_eq!(next, INITIAL_CHUNK_SIZE * 2);
        assert_eq!(
            next_chunk_size(MAX_CHUNK_SIZE, Duration::from_millis(1)),
            MAX_CHUNK_SIZE
        );
        assert_eq!(next_chunk_size(INITIAL_CHUNK_SIZE, Duration::ZERO), MAX_CHUNK_SIZE);
    }

    #[test]
    fn chunk_size_shrinks_when_transfers_are_slow() {
        let next = next_chunk_size(INITIAL_CHUNK_SIZE, Duration::from_millis(400));
        assert_eq!(next, INITIAL_CHUNK_SIZE / 4);
        assert_eq!(
            next_chunk_size(MIN_CHUNK_SIZE, Duration::from_secs(5)),
            MIN_CHUNK_SIZE
        );
    }

    #[test]
    fn chunk_size_holds_at_target_interval() {
        assert_eq!(
            next_chunk_size(INITIAL_CHUNK_SIZE, Duration::from_millis(100)),
            INITIAL_CHUNK_SIZE
        );
    }
}
