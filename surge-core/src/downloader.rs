use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use reqwest::{header, Client, Url};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    download::{refuses_ranges, RemoteMeta, TransferRequest},
    errors::{FetchError, TransferError},
    fetcher::{RetryPolicy, SegmentFetcher},
    merger::{unmerged, ChunkMerger},
    progress::ProgressTracker,
    segment::{plan_segments, SegmentArtifact},
    utils::{artifact_path, merge_path, remove_artifacts, stale_artifacts},
};

pub const DEFAULT_USER_AGENT: &str = concat!("surge/", env!("CARGO_PKG_VERSION"));

/// Stages of a transfer. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Planning,
    FetchingSize,
    Downloading,
    Merging,
    Completed,
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Planning => "planning",
            TransferState::FetchingSize => "fetching size",
            TransferState::Downloading => "downloading",
            TransferState::Merging => "merging",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Result of a transfer.
#[derive(Debug)]
pub enum TransferOutcome {
    Completed {
        path: PathBuf,
        total_size: u64,
    },
    Failed {
        error: TransferError,
        /// Stage the transfer was in when it failed.
        stage: TransferState,
        /// Temporary files that are still on disk.
        leftover_artifacts: Vec<PathBuf>,
    },
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed { .. })
    }

    pub fn into_result(self) -> Result<PathBuf, TransferError> {
        match self {
            TransferOutcome::Completed { path, .. } => Ok(path),
            TransferOutcome::Failed { error, .. } => Err(error),
        }
    }
}

/// Downloads one remote file with several concurrent range requests.
#[derive(Debug, Clone)]
pub struct TransferOrchestrator {
    client: Client,
}

impl TransferOrchestrator {
    /// Creates an orchestrator with its own HTTP client.
    pub fn new(user_agent: &str) -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransferError::InvalidInput(format!("cannot build http client: {}", e)))?;
        Ok(TransferOrchestrator { client })
    }

    /// Uses an already configured client, e.g. one carrying session cookies.
    pub fn with_client(client: Client) -> Self {
        TransferOrchestrator { client }
    }

    /// Asks the server for size, type, name and range support of `url`.
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<RemoteMeta, TransferError> {
        let response = self
            .client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransferError::SizeUnavailable(format!("HEAD {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(TransferError::SizeUnavailable(format!(
                "HEAD {} answered {}",
                url,
                response.status()
            )));
        }
        Ok(RemoteMeta::from_headers(url, response.headers()))
    }

    /// Downloads `request.source_url` to `request.destination_path`.
    ///
    /// `on_progress` receives percentages in `[0, 100]`; the 100 call happens once the
    /// file is in place.
    pub async fn download<P>(&self, request: TransferRequest, on_progress: P) -> TransferOutcome
    where
        P: FnMut(f64) + Send + 'static,
    {
        self.download_with_shutdown(request, on_progress, CancellationToken::new())
            .await
    }

    /// Like [`TransferOrchestrator::download`], but stops with `TransferError::Cancelled`
    /// as soon as `shutdown` is cancelled.
    pub async fn download_with_shutdown<P>(
        &self,
        request: TransferRequest,
        on_progress: P,
        shutdown: CancellationToken,
    ) -> TransferOutcome
    where
        P: FnMut(f64) + Send + 'static,
    {
        let mut transfer = Transfer::new(request);
        match self.run(&mut transfer, on_progress, shutdown).await {
            Ok(total_size) => {
                transfer.advance(TransferState::Completed);
                TransferOutcome::Completed {
                    path: transfer.request.destination_path,
                    total_size,
                }
            }
            Err(error) => {
                let stage = transfer.state;
                let leftover_artifacts = transfer.cleanup(&error).await;
                transfer.advance(TransferState::Failed);
                warn!(
                    url = %transfer.request.source_url,
                    stage = %stage,
                    error = %error,
                    "transfer failed"
                );
                TransferOutcome::Failed {
                    error,
                    stage,
                    leftover_artifacts,
                }
            }
        }
    }

    async fn run<P>(
        &self,
        transfer: &mut Transfer,
        on_progress: P,
        shutdown: CancellationToken,
    ) -> Result<u64, TransferError>
    where
        P: FnMut(f64) + Send + 'static,
    {
        let url = transfer.request.validate()?;
        transfer.request.check_writable().await?;
        let file_name = transfer.request.file_name().unwrap_or_default();

        transfer.advance(TransferState::FetchingSize);
        let total_size = match transfer.request.known_size {
            Some(total_size) => total_size,
            None => self.fetch_size(&transfer.request, &url).await?,
        };
        info!(url = %url, bytes = total_size, "file size");

        let ranges = plan_segments(total_size, transfer.request.concurrency)?;
        let artifact_dir = transfer.request.artifact_dir();
        transfer.artifacts = ranges
            .iter()
            .map(|r| artifact_path(&artifact_dir, &file_name, r.index))
            .collect();

        transfer.advance(TransferState::Downloading);
        let tracker = Arc::new(ProgressTracker::new(
            total_size,
            transfer.request.progress_interval,
            on_progress,
        ));
        let cancel = shutdown.child_token();
        let fetcher = Arc::new(SegmentFetcher::new(
            self.client.clone(),
            url,
            total_size,
            transfer.request.per_request_timeout,
            transfer.request.chunk_io_size,
            RetryPolicy {
                max_retries: transfer.request.max_retries,
                base_delay: transfer.request.retry_base_delay,
                max_delay: transfer.request.retry_max_delay,
            },
            cancel.clone(),
        ));

        info!(segments = ranges.len(), "starting download");
        let mut join_set = JoinSet::new();
        for (range, path) in ranges.iter().copied().zip(transfer.artifacts.iter().cloned()) {
            let fetcher = fetcher.clone();
            let tracker = tracker.clone();
            join_set.spawn(async move { (range.index, fetcher.fetch(range, path, tracker).await) });
        }

        let mut completed: Vec<SegmentArtifact> = Vec::with_capacity(ranges.len());
        let mut failure: Option<TransferError> = None;
        while let Some(joined) = join_set.join_next().await {
            let error = match joined {
                Ok((_, Ok(artifact))) => {
                    completed.push(artifact);
                    continue;
                }
                Ok((_, Err(FetchError::Cancelled))) if cancel.is_cancelled() => continue,
                Ok((index, Err(cause))) => TransferError::SegmentFailed { index, cause },
                Err(e) => TransferError::Worker(e.to_string()),
            };
            if failure.is_none() {
                // Siblings stop at their next chunk; keep draining so nothing writes
                // to a part file once cleanup starts.
                cancel.cancel();
                failure = Some(error);
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }
        if shutdown.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        transfer.advance(TransferState::Merging);
        transfer.merging = Some(completed.clone());
        let merged = ChunkMerger::new(transfer.request.chunk_io_size)
            .merge(completed, &transfer.request.destination_path)
            .await?;

        tracker.finish();
        info!(
            path = %transfer.request.destination_path.display(),
            bytes = merged,
            "download complete"
        );
        Ok(merged)
    }

    /// Removes part files an interrupted earlier transfer left for the same destination.
    /// Returns the files that could not be removed.
    pub async fn remove_stale_artifacts(
        request: &TransferRequest,
    ) -> Result<Vec<PathBuf>, TransferError> {
        let file_name = request.file_name().ok_or_else(|| {
            TransferError::InvalidInput(format!(
                "destination {} has no file name",
                request.destination_path.display()
            ))
        })?;

        let mut stale = Vec::new();
        let mut dirs = vec![request.artifact_dir()];
        if let Some(parent) = request.destination_path.parent() {
            if !parent.as_os_str().is_empty() && !dirs.iter().any(|d| d == parent) {
                dirs.push(parent.to_path_buf());
            }
        }
        for dir in dirs {
            match stale_artifacts(&dir, &file_name).await {
                Ok(found) => stale.extend(found),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(TransferError::InvalidInput(format!(
                        "cannot read {}: {}",
                        dir.display(),
                        e
                    )))
                }
            }
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "removing parts of an earlier transfer");
        }
        Ok(remove_artifacts(&stale).await)
    }

    async fn fetch_size(&self, request: &TransferRequest, url: &Url) -> Result<u64, TransferError> {
        let response = self
            .client
            .head(url.clone())
            .timeout(request.per_request_timeout)
            .send()
            .await
            .map_err(|e| TransferError::SizeUnavailable(format!("size probe failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(TransferError::SizeUnavailable(format!(
                "size probe answered {}",
                response.status()
            )));
        }
        if request.concurrency > 1 && refuses_ranges(response.headers()) {
            return Err(TransferError::SizeUnavailable(
                "server does not accept range requests".to_string(),
            ));
        }

        let total_size = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                TransferError::SizeUnavailable("server did not send a content length".to_string())
            })?;
        Ok(total_size)
    }
}

/// Book-keeping of one `download` call.
struct Transfer {
    request: TransferRequest,
    state: TransferState,
    /// Part files this transfer may have created, known once the ranges are planned.
    artifacts: Vec<PathBuf>,
    /// Set once merging starts.
    merging: Option<Vec<SegmentArtifact>>,
}

impl Transfer {
    fn new(request: TransferRequest) -> Self {
        Transfer {
            request,
            state: TransferState::Planning,
            artifacts: Vec::new(),
            merging: None,
        }
    }

    fn advance(&mut self, next: TransferState) {
        debug!(from = %self.state, to = %next, "transfer state");
        self.state = next;
    }

    /// Removes what this transfer left behind and returns what is still on disk.
    ///
    /// A partially merged output is always removed. After a merge failure the parts
    /// that were not merged yet are kept for inspection.
    async fn cleanup(&self, error: &TransferError) -> Vec<PathBuf> {
        let mut leftovers = Vec::new();
        if let Some(artifacts) = &self.merging {
            leftovers.extend(remove_artifacts(&[merge_path(&self.request.destination_path)]).await);
            if let TransferError::MergeIo { .. } = error {
                leftovers.extend(unmerged(artifacts).await);
                return leftovers;
            }
        }
        leftovers.extend(remove_artifacts(&self.artifacts).await);
        leftovers
    }
}
