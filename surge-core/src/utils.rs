use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::fs;
use tracing::{debug, warn};

const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Makes a string usable as a file name on every major platform.
pub fn sanitize_file_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_control() || INVALID_FILE_NAME_CHARS.contains(&c) {
            '_'
        } else {
            c
        };
        if c == '_' && sanitized.ends_with('_') {
            continue;
        }
        sanitized.push(c);
    }

    let trimmed = sanitized.trim_matches(|c: char| c == '_' || c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        return String::from("untitled");
    }
    trimmed.to_string()
}

/// Returns `path`, or `stem_1.ext`, `stem_2.ext`, ... if it already exists.
pub async fn unique_path(path: &Path) -> PathBuf {
    if !exists(path).await {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().to_string());

    let mut counter = 1u32;
    loop {
        let file_name = match &extension {
            Some(ext) => format!("{stem}_{counter}.{ext}"),
            None => format!("{stem}_{counter}"),
        };
        let candidate = path.with_file_name(file_name);
        if !exists(&candidate).await {
            return candidate;
        }
        counter += 1;
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Location of the temporary file holding part `index` of `file_name`.
pub fn artifact_path(dir: &Path, file_name: &str, index: usize) -> PathBuf {
    dir.join(format!("{file_name}.part{index}"))
}

/// Sibling of `destination` that the merge writes before the final rename.
pub fn merge_path(destination: &Path) -> PathBuf {
    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| String::from("download"));
    destination.with_file_name(format!("{file_name}.merging"))
}

/// Part files and merge output left in `dir` by an earlier, interrupted transfer of `file_name`.
pub async fn stale_artifacts(dir: &Path, file_name: &str) -> std::io::Result<Vec<PathBuf>> {
    let part_prefix = format!("{file_name}.part");
    let merging = format!("{file_name}.merging");

    let mut found = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_part = name
            .strip_prefix(&part_prefix)
            .map(|index| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        if is_part || name == merging {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// Removes the given temporary files. Missing files are not an error, so calling this
/// again after a previous cleanup is a no-op. Returns the paths that could not be removed.
pub async fn remove_artifacts(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut leftovers = Vec::new();
    for path in paths {
        match fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "removed temporary file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove temporary file");
                leftovers.push(path.clone());
            }
        }
    }
    leftovers
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("clip: part 1/2?.mp4"), "clip_ part 1_2_.mp4");
        assert_eq!(sanitize_file_name("a<>b"), "a_b");
        assert_eq!(sanitize_file_name("..hidden.."), "hidden");
        assert_eq!(sanitize_file_name("???"), "untitled");
        assert_eq!(sanitize_file_name(""), "untitled");
    }

    #[test]
    fn test_artifact_and_merge_paths() {
        let dir = Path::new("/tmp/media");

        assert_eq!(
            artifact_path(dir, "video.mp4", 3),
            PathBuf::from("/tmp/media/video.mp4.part3")
        );
        assert_eq!(
            merge_path(&dir.join("video.mp4")),
            PathBuf::from("/tmp/media/video.mp4.merging")
        );
    }

    #[tokio::test]
    async fn test_unique_path() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("movie.mp4");

        assert_eq!(unique_path(&target).await, target);

        fs::write(&target, b"x").await.unwrap();
        fs::write(dir.path().join("movie_1.mp4"), b"x").await.unwrap();

        assert_eq!(unique_path(&target).await, dir.path().join("movie_2.mp4"));
    }

    #[tokio::test]
    async fn test_stale_artifacts() {
        let dir = tempdir().unwrap();
        for name in [
            "clip.mp4.part0",
            "clip.mp4.part12",
            "clip.mp4.merging",
            "clip.mp4.partial",
            "clip.mp4",
            "other.mp4.part0",
        ] {
            fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let found = stale_artifacts(dir.path(), "clip.mp4").await.unwrap();

        assert_eq!(
            found,
            vec![
                dir.path().join("clip.mp4.merging"),
                dir.path().join("clip.mp4.part0"),
                dir.path().join("clip.mp4.part12"),
            ]
        );
    }

    #[tokio::test]
    async fn test_remove_artifacts_is_idempotent() {
        let dir = tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..3)
            .map(|i| artifact_path(dir.path(), "file.bin", i))
            .collect();
        for path in &paths[..2] {
            fs::write(path, b"data").await.unwrap();
        }

        assert!(remove_artifacts(&paths).await.is_empty());
        assert!(remove_artifacts(&paths).await.is_empty());

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
