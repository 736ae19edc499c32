//! Clip storage helpers: cross-device moves and retention pruning.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{VisionError, VisionResult};

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Encodes run in a temp directory that may live on tmpfs while clips are
/// kept on the SD card, so a plain rename can fail with EXDEV. In that case
/// the file is copied next to `dst` and renamed into place.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> VisionResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            let tmp_dst = dst.with_extension("tmp");
            fs::copy(src, &tmp_dst).await?;
            if let Err(e) = fs::rename(&tmp_dst, dst).await {
                let _ = fs::remove_file(&tmp_dst).await;
                return Err(VisionError::from(e));
            }
            if let Err(e) = fs::remove_file(src).await {
                tracing::warn!("Failed to remove {} after copy: {}", src.display(), e);
            }
            Ok(())
        }
        Err(e) => Err(VisionError::from(e)),
    }
}

/// EXDEV is error code 18 on Linux/macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

/// Delete the oldest clips in `dir` so that at most `keep` remain.
///
/// Clips are `.mp4` files whose names start with a sortable timestamp, so
/// lexical order is chronological. Returns the removed paths.
pub async fn prune_clips(dir: impl AsRef<Path>, keep: usize) -> VisionResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut clips = Vec::new();

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "mp4") && entry.file_type().await?.is_file() {
            clips.push(path);
        }
    }

    if clips.len() <= keep {
        return Ok(Vec::new());
    }

    clips.sort();
    let excess = clips.len() - keep;
    let mut removed = Vec::with_capacity(excess);
    for path in clips.into_iter().take(excess) {
        match fs::remove_file(&path).await {
            Ok(()) => removed.push(path),
            Err(e) => tracing::warn!("Failed to prune clip {}: {}", path.display(), e),
        }
    }

    tracing::debug!(removed = removed.len(), keep, "Pruned clip directory");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_to_subdirectory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("clip.mp4");
        let dst = dir.path().join("clips").join("clip.mp4");

        fs::write(&src, b"mp4").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"mp4");
    }

    #[tokio::test]
    async fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }

    #[tokio::test]
    async fn test_prune_keeps_newest_clips() {
        let dir = TempDir::new().unwrap();
        for name in [
            "20260101T100000_a.mp4",
            "20260101T090000_b.mp4",
            "20260102T080000_c.mp4",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        let removed = prune_clips(dir.path(), 2).await.unwrap();
        assert_eq!(removed, vec![dir.path().join("20260101T090000_b.mp4")]);
        assert!(dir.path().join("20260102T080000_c.mp4").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_prune_missing_dir_is_noop() {
        let dir = TempDir::new().unwrap();
        let removed = prune_clips(dir.path().join("missing"), 1).await.unwrap();
        assert!(removed.is_empty());
    }
}
