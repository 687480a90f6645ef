//! Feed retrieval over HTTP, raw feed archive and atomic output writes.

mod fetch;

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub use fetch::{
    is_transient_error, is_transient_status, redirect_target, retry_after, FeedFetcher,
    FetchError, FetchedBody, FetcherConfig, RetryPolicy,
};

pub const CRATE_NAME: &str = "fxcal-storage";

#[derive(Debug, Clone)]
pub struct ArchivedFeed {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Hash-addressed archive of the raw bytes each run downloaded.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn archive_relative_path(
        &self,
        fetched_at: DateTime<Utc>,
        feed_id: &str,
        content_hash: &str,
    ) -> PathBuf {
        let stamp = fetched_at.format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(stamp)
            .join(feed_id)
            .join(format!("{content_hash}.ics"))
    }

    /// Stores a feed snapshot once per content hash.
    pub async fn archive_feed(
        &self,
        fetched_at: DateTime<Utc>,
        feed_id: &str,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedFeed> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.archive_relative_path(fetched_at, feed_id, &content_hash);
        let absolute_path = self.root.join(&relative_path);

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            return Ok(ArchivedFeed {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: true,
            });
        }

        write_atomic(&absolute_path, bytes).await?;
        Ok(ArchivedFeed {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: false,
        })
    }
}

/// Writes through a temp file in the same directory and renames it into place.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "renaming temp file {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn archive_hashing_is_stable() {
        let hash = ArtifactStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn archiving_same_feed_twice_deduplicates() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let fetched_at = DateTime::parse_from_rfc3339("2025-09-01T06:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let first = store
            .archive_feed(fetched_at, "primary", b"BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n")
            .await
            .expect("first archive");
        let second = store
            .archive_feed(fetched_at, "primary", b"BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n")
            .await
            .expect("second archive");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.relative_path.ends_with(format!("{}.ics", first.content_hash)));
        assert!(first.absolute_path.exists());
    }

    #[tokio::test]
    async fn write_atomic_replaces_existing_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out").join("napoli.ics");
        write_atomic(&path, b"first").await.expect("first write");
        write_atomic(&path, b"second").await.expect("second write");
        assert_eq!(std::fs::read(&path).expect("read"), b"second");

        let leftovers = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
