use std::{path::PathBuf, time::Duration};

use reqwest::{header, header::HeaderMap, Url};
use tokio::fs;

use crate::{errors::TransferError, utils::sanitize_file_name};

pub const DEFAULT_CONCURRENCY: u32 = 4;
pub const DEFAULT_CHUNK_IO_SIZE: usize = 1024 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Everything needed to download one file. Not modified once the transfer starts.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source_url: String,
    /// Final location of the file. Its parent directory has to exist.
    pub destination_path: PathBuf,
    /// Directory for the part files. Defaults to the destination's directory.
    pub temp_dir: Option<PathBuf>,
    pub concurrency: u32,
    /// Buffer size used when writing parts and merging them.
    pub chunk_io_size: usize,
    /// Upper bound for a single attempt of a single segment, body included. Large
    /// segments on slow links need a value well above the default.
    pub per_request_timeout: Duration,
    /// Retries per segment after the first attempt.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Minimum time between two progress callbacks.
    pub progress_interval: Duration,
    /// Size already learned from [`RemoteMeta`]; skips the size request when set.
    pub known_size: Option<u64>,
}

impl TransferRequest {
    pub fn new(source_url: impl Into<String>, destination_path: impl Into<PathBuf>) -> Self {
        TransferRequest {
            source_url: source_url.into(),
            destination_path: destination_path.into(),
            temp_dir: None,
            concurrency: DEFAULT_CONCURRENCY,
            chunk_io_size: DEFAULT_CHUNK_IO_SIZE,
            per_request_timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            known_size: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_chunk_io_size(mut self, chunk_io_size: usize) -> Self {
        self.chunk_io_size = chunk_io_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_request_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Reuses the result of an earlier [`RemoteMeta`] lookup. Only pass a size from a
    /// server that accepts range requests.
    pub fn with_known_size(mut self, total_size: u64) -> Self {
        self.known_size = Some(total_size);
        self
    }

    /// Directory that receives the part files.
    pub fn artifact_dir(&self) -> PathBuf {
        match &self.temp_dir {
            Some(dir) => dir.clone(),
            None => self
                .destination_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    /// File name of the destination, used to name the part files.
    pub fn file_name(&self) -> Option<String> {
        self.destination_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
    }

    /// Checks everything that can be checked before touching the network.
    pub fn validate(&self) -> Result<Url, TransferError> {
        let url = Url::parse(&self.source_url).map_err(|e| {
            TransferError::InvalidInput(format!("invalid url {}: {}", self.source_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransferError::InvalidInput(format!(
                "unsupported url scheme: {}",
                url.scheme()
            )));
        }
        if self.concurrency == 0 {
            return Err(TransferError::InvalidInput(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.chunk_io_size == 0 {
            return Err(TransferError::InvalidInput(
                "chunk I/O size must be at least 1 byte".to_string(),
            ));
        }
        if self.per_request_timeout.is_zero() {
            return Err(TransferError::InvalidInput(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        if self.file_name().is_none() {
            return Err(TransferError::InvalidInput(format!(
                "destination {} has no file name",
                self.destination_path.display()
            )));
        }
        if self.destination_path.is_dir() {
            return Err(TransferError::InvalidInput(format!(
                "destination {} is a directory",
                self.destination_path.display()
            )));
        }
        let output_dir = match self.destination_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !output_dir.is_dir() {
            return Err(TransferError::InvalidInput(format!(
                "output directory {} doesn't exist",
                output_dir.display()
            )));
        }
        if !self.artifact_dir().is_dir() {
            return Err(TransferError::InvalidInput(format!(
                "temporary directory {} doesn't exist",
                self.artifact_dir().display()
            )));
        }
        Ok(url)
    }

    /// Creates and removes a scratch file in the output and temporary directories, so a
    /// read-only location is reported before any request goes out.
    pub async fn check_writable(&self) -> Result<(), TransferError> {
        let file_name = self.file_name().unwrap_or_default();
        let output_dir = match self.destination_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut dirs = vec![output_dir];
        let artifact_dir = self.artifact_dir();
        if !dirs.contains(&artifact_dir) {
            dirs.push(artifact_dir);
        }

        for dir in dirs {
            let scratch = dir.join(format!(".{}.write-check", file_name));
            let created = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&scratch)
                .await;
            match created {
                Ok(file) => {
                    drop(file);
                    let _ = fs::remove_file(&scratch).await;
                }
                Err(e) => {
                    return Err(TransferError::InvalidInput(format!(
                        "cannot write to {}: {}",
                        dir.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Basic information on the file to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMeta {
    pub content_length: Option<u64>,
    pub content_type: String,
    pub file_name: String,
    pub accepts_ranges: bool,
}

impl RemoteMeta {
    /// Reads size, type, name and range support from the headers of a HEAD response.
    ///
    /// The length is taken from the header itself: a HEAD response carries no body, so
    /// the body length would always be zero.
    pub fn from_headers(url: &str, headers: &HeaderMap) -> Self {
        let header_str = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let content_length = header_str(header::CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok());
        let content_type = header_str(header::CONTENT_TYPE).unwrap_or_default().to_string();
        let accepts_ranges = header_str(header::ACCEPT_RANGES)
            .map(|v| !v.eq_ignore_ascii_case("none"))
            .unwrap_or(false);

        let file_name = header_str(header::CONTENT_DISPOSITION)
            .and_then(file_name_from_disposition)
            .unwrap_or_else(|| file_name_from_url(url));

        RemoteMeta {
            content_length,
            content_type,
            file_name: sanitize_file_name(&file_name),
            accepts_ranges,
        }
    }
}

/// Whether the headers explicitly refuse range requests.
pub(crate) fn refuses_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("none"))
        .unwrap_or(false)
}

fn file_name_from_disposition(disposition: &str) -> Option<String> {
    if !disposition.to_lowercase().contains("filename") {
        return None;
    }
    let index = disposition.rfind('=')?;
    let name = disposition[index + 1..]
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .replace('"', "");
    let name = name.strip_prefix("UTF-8''").unwrap_or(&name).to_string();
    if name.is_empty() {
        return None;
    }
    Some(name)
}

/// Gets a file name from a download url.
pub fn file_name_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    if let Some(last_slash_index) = without_query.rfind('/') {
        if last_slash_index + 1 != without_query.len() && !without_query[..last_slash_index].ends_with('/') {
            return without_query[last_slash_index + 1..].to_string();
        }
    }
    String::from("Unknown_File")
}
