//! Chunked, concurrent, resumable-on-retry HTTP(S) file downloads.
//!
//! A [`TransferOrchestrator`] probes the size of a remote file, splits it into byte
//! ranges, fetches every range into its own part file in parallel and concatenates the
//! parts into the destination. Either the complete file ends up at the destination or
//! nothing does.
//!
//! ```no_run
//! use surge_core::{TransferOrchestrator, TransferRequest, DEFAULT_USER_AGENT};
//!
//! # async fn run() -> Result<(), surge_core::TransferError> {
//! let orchestrator = TransferOrchestrator::new(DEFAULT_USER_AGENT)?;
//! let request = TransferRequest::new("https://example.com/video.mp4", "./video.mp4")
//!     .with_concurrency(8);
//! let path = orchestrator
//!     .download(request, |percentage| println!("{:.1}%", percentage))
//!     .await
//!     .into_result()?;
//! println!("saved to {}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod download;
pub mod downloader;
pub mod errors;
pub mod fetcher;
pub mod merger;
pub mod progress;
pub mod segment;
pub mod utils;

pub use download::{RemoteMeta, TransferRequest};
pub use downloader::{TransferOrchestrator, TransferOutcome, TransferState, DEFAULT_USER_AGENT};
pub use errors::{FetchError, TransferError};
pub use progress::{ProgressTracker, TransferProgress};
pub use segment::{plan_segments, ByteRange, SegmentArtifact};
