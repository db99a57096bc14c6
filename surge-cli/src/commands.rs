use std::path::{Path, PathBuf};

use clap::Subcommand;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use prettytable::Table;
use surge_core::{
    utils::{sanitize_file_name, unique_path},
    RemoteMeta, TransferOrchestrator, TransferOutcome, TransferRequest,
};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Settings;

const BAR_LENGTH: u64 = 1000;

#[derive(Subcommand)]
pub enum Commands {
    /// Download a file
    Download {
        #[clap(value_parser)]
        url: String,
        /// Output file, defaults to the remote file name inside the download directory
        #[clap(short, long, value_parser)]
        output: Option<PathBuf>,
        /// Number of concurrent range requests
        #[clap(short, long, value_parser)]
        threads: Option<u32>,
        /// Retries per segment after the first attempt
        #[clap(short, long, value_parser)]
        retries: Option<u32>,
        /// Timeout of one segment request, body included, in seconds
        #[clap(long, value_parser)]
        timeout: Option<u64>,
        /// Write buffer size in bytes
        #[clap(long, value_parser)]
        chunk_size: Option<usize>,
    },
    /// Show size, type and name of a remote file
    Info {
        #[clap(value_parser)]
        url: String,
    },
    /// Show the effective configuration
    Config,
}

pub async fn handle_download(
    url: String,
    output: Option<PathBuf>,
    threads: Option<u32>,
    retries: Option<u32>,
    timeout: Option<u64>,
    chunk_size: Option<usize>,
    settings: Settings,
) -> Result<(), ()> {
    let settings = match settings.override_with(threads, retries, timeout, chunk_size) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return Err(());
        }
    };

    let orchestrator = match TransferOrchestrator::new(&settings.user_agent) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("{}", e);
            return Err(());
        }
    };

    println!("Profiling file to download....");
    let meta = match orchestrator.probe(&url, settings.timeout).await {
        Ok(meta) => meta,
        Err(e) => {
            eprintln!("{}", e);
            return Err(());
        }
    };

    let size = meta
        .content_length
        .map(|len| HumanBytes(len).to_string())
        .unwrap_or_else(|| String::from("unknown"));
    println!("File Name : {}\nFile Size : {}\n", meta.file_name, size);

    let destination =
        match resolve_destination(output, &settings.download_dir, &meta.file_name).await {
            Ok(destination) => destination,
            Err(e) => {
                eprintln!("{}", e);
                return Err(());
            }
        };

    let mut request = TransferRequest::new(url, &destination)
        .with_concurrency(settings.max_threads)
        .with_chunk_io_size(settings.chunk_size)
        .with_timeout(settings.timeout)
        .with_max_retries(settings.retry_times);
    if let Some(total_size) = reusable_size(&meta, settings.max_threads) {
        request = request.with_known_size(total_size);
    }
    if let Some(temp_dir) = &settings.temp_dir {
        if let Err(e) = fs::create_dir_all(temp_dir).await {
            eprintln!("{}: {}", temp_dir.display(), e);
            return Err(());
        }
        request = request.with_temp_dir(temp_dir);
    }

    match TransferOrchestrator::remove_stale_artifacts(&request).await {
        Ok(leftovers) => {
            for path in leftovers {
                warn!(path = %path.display(), "could not remove file of an earlier download");
            }
        }
        Err(e) => debug!(error = %e, "skipped stale file cleanup"),
    }

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling download, removing temporary files...");
            ctrl_c.cancel();
        }
    });

    println!("Initializing download, do not close the terminal");
    let bar = progress_bar();
    let sink_bar = bar.clone();
    let outcome = orchestrator
        .download_with_shutdown(
            request,
            move |percentage| sink_bar.set_position((percentage * 10f64).round() as u64),
            shutdown,
        )
        .await;

    match outcome {
        TransferOutcome::Completed { path, total_size } => {
            bar.finish();
            println!(
                "File downloaded successfully\nOutput : {}\nSize   : {}",
                path.display(),
                HumanBytes(total_size)
            );
            Ok(())
        }
        TransferOutcome::Failed {
            error,
            stage,
            leftover_artifacts,
        } => {
            bar.abandon();
            eprintln!("Download failed while {}: {}", stage, error);
            for path in leftover_artifacts {
                eprintln!("Left on disk: {}", path.display());
            }
            Err(())
        }
    }
}

pub async fn handle_info(url: String, settings: Settings) -> Result<(), ()> {
    let orchestrator = match TransferOrchestrator::new(&settings.user_agent) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("{}", e);
            return Err(());
        }
    };

    match orchestrator.probe(&url, settings.timeout).await {
        Ok(meta) => {
            let size = match meta.content_length {
                Some(len) => format!("{} ({} bytes)", HumanBytes(len), len),
                None => String::from("unknown"),
            };
            let content_type = if meta.content_type.is_empty() {
                "unknown"
            } else {
                meta.content_type.as_str()
            };
            println!("File Name     : {}", meta.file_name);
            println!("File Size     : {}", size);
            println!("Content Type  : {}", content_type);
            println!(
                "Range Support : {}",
                if meta.accepts_ranges { "yes" } else { "no" }
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e);
            Err(())
        }
    }
}

pub fn handle_config(settings: &Settings) -> Result<(), ()> {
    let temp_dir = settings
        .temp_dir
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| String::from("(next to the output file)"));

    let mut table = Table::new();
    table.add_row(row![b => "Setting", "Variable", "Value"]);
    table.add_row(row!["Max threads", "SURGE_MAX_THREADS", settings.max_threads]);
    table.add_row(row![
        "Chunk size",
        "SURGE_CHUNK_SIZE",
        HumanBytes(settings.chunk_size as u64)
    ]);
    table.add_row(row![
        "Timeout",
        "SURGE_TIMEOUT",
        format!("{}s", settings.timeout.as_secs())
    ]);
    table.add_row(row!["Retries", "SURGE_RETRY_TIMES", settings.retry_times]);
    table.add_row(row![
        "Download dir",
        "SURGE_DOWNLOAD_DIR",
        settings.download_dir.display()
    ]);
    table.add_row(row!["Temp dir", "SURGE_TEMP_DIR", temp_dir]);
    table.add_row(row!["User agent", "SURGE_USER_AGENT", settings.user_agent]);
    table.printstd();
    Ok(())
}

/// Output path for a download: `output` as given, or a fresh name inside `download_dir`.
/// Missing parent directories are created.
async fn resolve_destination(
    output: Option<PathBuf>,
    download_dir: &Path,
    remote_name: &str,
) -> Result<PathBuf, String> {
    let destination = match output {
        Some(path) => path,
        None => unique_path(&download_dir.join(sanitize_file_name(remote_name))).await,
    };
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("{}: {}", parent.display(), e))?;
    }
    Ok(destination)
}

/// Size from the info request that the download can reuse instead of asking again.
fn reusable_size(meta: &RemoteMeta, threads: u32) -> Option<u64> {
    match meta.content_length {
        Some(len) if len > 0 && (threads == 1 || meta.accepts_ranges) => Some(len),
        _ => None,
    }
}

/// Bar in tenths of a percent, fed by the transfer's progress callback.
fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(BAR_LENGTH);
    let style = ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {percent}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    bar.set_style(style);
    bar
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn meta(content_length: Option<u64>, accepts_ranges: bool) -> RemoteMeta {
        RemoteMeta {
            content_length,
            content_type: String::from("video/mp4"),
            file_name: String::from("video.mp4"),
            accepts_ranges,
        }
    }

    #[tokio::test]
    async fn test_resolve_destination_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("new/nested/video.mp4");

        let destination = resolve_destination(Some(output.clone()), dir.path(), "ignored.mp4")
            .await
            .unwrap();

        assert_eq!(destination, output);
        assert!(dir.path().join("new/nested").is_dir());
    }

    #[tokio::test]
    async fn test_resolve_destination_in_download_dir() {
        let dir = tempdir().unwrap();
        let download_dir = dir.path().join("downloads");
        std::fs::create_dir(&download_dir).unwrap();
        std::fs::write(download_dir.join("clip_ 1.mp4"), b"x").unwrap();

        let destination = resolve_destination(None, &download_dir, "clip: 1.mp4")
            .await
            .unwrap();

        assert_eq!(destination, download_dir.join("clip_ 1_1.mp4"));
    }

    #[test]
    fn test_reusable_size() {
        assert_eq!(reusable_size(&meta(Some(1000), true), 4), Some(1000));
        assert_eq!(reusable_size(&meta(Some(1000), false), 1), Some(1000));
        assert_eq!(reusable_size(&meta(Some(1000), false), 4), None);
        assert_eq!(reusable_size(&meta(Some(0), true), 4), None);
        assert_eq!(reusable_size(&meta(None, true), 4), None);
    }
}
