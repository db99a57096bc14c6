use std::path::{Path, PathBuf};

use tokio::{
    fs::{self, File},
    io::{self, AsyncWriteExt, BufReader, BufWriter},
};
use tracing::{debug, info};

use crate::{errors::TransferError, segment::SegmentArtifact, utils::merge_path};

/// Concatenates part files, in range order, into the final file.
#[derive(Debug, Clone, Copy)]
pub struct ChunkMerger {
    chunk_io_size: usize,
}

impl ChunkMerger {
    pub fn new(chunk_io_size: usize) -> Self {
        ChunkMerger {
            chunk_io_size: chunk_io_size.max(1),
        }
    }

    /// Writes every artifact into a sibling of `destination`, then renames it into place.
    ///
    /// Each part file is deleted right after it has been appended. On failure the parts
    /// that were not merged yet are left on disk and the partial output is left at
    /// [`merge_path`]; the caller decides what to clean up. Returns the merged length.
    pub async fn merge(
        &self,
        mut artifacts: Vec<SegmentArtifact>,
        destination: &Path,
    ) -> Result<u64, TransferError> {
        artifacts.sort_by_key(|a| a.range.index);
        let merging = merge_path(destination);

        let file = File::create(&merging).await.map_err(merge_err(&merging))?;
        let mut writer = BufWriter::with_capacity(self.chunk_io_size, file);
        let mut total = 0u64;

        for artifact in &artifacts {
            let part = File::open(&artifact.path)
                .await
                .map_err(merge_err(&artifact.path))?;
            let mut reader = BufReader::with_capacity(self.chunk_io_size, part);
            let copied = io::copy(&mut reader, &mut writer)
                .await
                .map_err(merge_err(&merging))?;

            if copied != artifact.range.len() {
                return Err(TransferError::MergeIo {
                    path: artifact.path.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!(
                            "part {} holds {} bytes, expected {}",
                            artifact.range.index,
                            copied,
                            artifact.range.len()
                        ),
                    ),
                });
            }
            total += copied;

            fs::remove_file(&artifact.path)
                .await
                .map_err(merge_err(&artifact.path))?;
            debug!(index = artifact.range.index, "part merged");
        }

        writer.flush().await.map_err(merge_err(&merging))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(merge_err(&merging))?;
        drop(writer);

        fs::rename(&merging, destination)
            .await
            .map_err(merge_err(destination))?;

        info!(path = %destination.display(), bytes = total, "parts merged");
        Ok(total)
    }
}

fn merge_err(path: &Path) -> impl FnOnce(std::io::Error) -> TransferError {
    let path = path.to_path_buf();
    move |source| TransferError::MergeIo { path, source }
}

/// Paths of the artifacts that a failed merge did not consume yet.
pub async fn unmerged(artifacts: &[SegmentArtifact]) -> Vec<PathBuf> {
    let mut remaining = Vec::new();
    for artifact in artifacts {
        if fs::try_exists(&artifact.path).await.unwrap_or(false) {
            remaining.push(artifact.path.clone());
        }
    }
    remaining
}
