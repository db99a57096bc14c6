use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use futures_util::StreamExt;
use reqwest::{header, Client, StatusCode, Url};
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    errors::FetchError,
    progress::ProgressTracker,
    segment::{ByteRange, SegmentArtifact},
};

/// Retry policy of a segment: `max_retries` extra attempts, exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 based): `base * 2^retry`, capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Downloads single byte ranges of one remote file into part files.
///
/// One fetcher is shared by all segment tasks of a transfer; every call to
/// [`SegmentFetcher::fetch`] owns exactly one part file.
#[derive(Debug, Clone)]
pub struct SegmentFetcher {
    client: Client,
    url: Url,
    total_size: u64,
    timeout: Duration,
    chunk_io_size: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl SegmentFetcher {
    pub fn new(
        client: Client,
        url: Url,
        total_size: u64,
        timeout: Duration,
        chunk_io_size: usize,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        SegmentFetcher {
            client,
            url,
            total_size,
            timeout,
            chunk_io_size,
            retry,
            cancel,
        }
    }

    /// Fetches `range` into `path`, retrying transient failures.
    ///
    /// Each retry starts over from `range.start` and truncates the part file. Progress
    /// is only reported for bytes beyond what earlier attempts already reported.
    pub async fn fetch(
        &self,
        range: ByteRange,
        path: PathBuf,
        progress: Arc<ProgressTracker>,
    ) -> Result<SegmentArtifact, FetchError> {
        let mut reported = 0u64;
        let mut retries = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let attempt = self.attempt(range, &path, &progress, &mut reported);
            let result = match tokio::time::timeout(self.timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.timeout)),
            };

            let err = match result {
                Ok(()) => {
                    debug!(index = range.index, bytes = range.len(), "segment complete");
                    return Ok(SegmentArtifact { range, path });
                }
                Err(err) => err,
            };

            if !err.is_retryable() || retries >= self.retry.max_retries {
                return Err(err);
            }

            let delay = self.retry.backoff(retries);
            retries += 1;
            warn!(
                index = range.index,
                retry = retries,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "segment attempt failed, retrying"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        range: ByteRange,
        path: &Path,
        progress: &ProgressTracker,
        reported: &mut u64,
    ) -> Result<(), FetchError> {
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self
                .client
                .get(self.url.clone())
                .header(header::RANGE, range.header_value())
                .send() => response?,
        };

        self.check_response(range, &response)?;

        let expected = range.len();
        let file = File::create(path).await?;
        let mut writer = BufWriter::with_capacity(self.chunk_io_size, file);
        let mut written = 0u64;
        let mut bytes_stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                next = bytes_stream.next() => next,
            };
            let bytes = match next {
                Some(data) => data?,
                None => break,
            };

            let received = written + bytes.len() as u64;
            if received > expected {
                return Err(FetchError::LengthMismatch { expected, received });
            }
            writer.write_all(&bytes).await?;
            written = received;

            if written > *reported {
                progress.record(written - *reported);
                *reported = written;
            }
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        if written != expected {
            return Err(FetchError::LengthMismatch {
                expected,
                received: written,
            });
        }
        Ok(())
    }

    fn check_response(&self, range: ByteRange, response: &reqwest::Response) -> Result<(), FetchError> {
        let status = response.status();
        let whole_file = range.start == 0 && range.len() == self.total_size;
        match status {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK if whole_file => {}
            // The server ignored the Range header and is sending the whole file.
            StatusCode::OK => {
                return Err(FetchError::UnexpectedRange(
                    "server ignored the range request".to_string(),
                ))
            }
            _ => return Err(FetchError::Status(status)),
        }

        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            if content_type.to_str().unwrap_or("").contains("text/html") {
                return Err(FetchError::UnexpectedContent(
                    "download link expired or link doesn't point to a file".to_string(),
                ));
            }
        }

        if status == StatusCode::PARTIAL_CONTENT {
            if let Some(content_range) = response
                .headers()
                .get(header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
            {
                match parse_content_range(content_range) {
                    Some((start, end)) if start == range.start && end == range.end => {}
                    _ => {
                        return Err(FetchError::UnexpectedRange(format!(
                            "asked for {}-{}, got {}",
                            range.start, range.end, content_range
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

/// Parses `bytes start-end/total` into `(start, end)`.
fn parse_content_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (bounds, _total) = spec.split_once('/')?;
    let (start, end) = bounds.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}
