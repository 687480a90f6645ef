//! Feed adapter contracts plus the iCalendar codec they share.

pub mod ics;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fxcal_core::FeedRole;
use fxcal_storage::{FeedFetcher, FetchError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub use ics::{parse_calendar, render_calendar, CalendarHeader, CodecError, ParsedCalendar};

pub const CRATE_NAME: &str = "fxcal-feeds";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedTransport {
    Http,
    LocalFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            fetched_at: Utc::now(),
        }
    }
}

impl Default for AdapterContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw feed bytes exactly as retrieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFeed {
    pub feed_id: String,
    pub role: FeedRole,
    pub location: String,
    pub fetched_at: DateTime<Utc>,
    pub body: Vec<u8>,
}

impl FetchedFeed {
    /// Lossy UTF-8 view of the body.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("fetching {feed_id}: {source}")]
    Fetch {
        feed_id: String,
        #[source]
        source: FetchError,
    },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {feed_id}: {source}")]
    Codec {
        feed_id: String,
        #[source]
        source: CodecError,
    },
}

#[async_trait]
pub trait FeedAdapter: Send + Sync {
    fn feed_id(&self) -> &str;
    fn role(&self) -> FeedRole;
    fn location(&self) -> &str;
    fn transport(&self) -> FeedTransport;

    async fn fetch(
        &self,
        http: &FeedFetcher,
        ctx: &AdapterContext,
    ) -> Result<FetchedFeed, AdapterError>;

    fn parse(&self, feed: &FetchedFeed) -> Result<ParsedCalendar, AdapterError> {
        let calendar =
            parse_calendar(&feed.text(), self.role()).map_err(|source| AdapterError::Codec {
                feed_id: feed.feed_id.clone(),
                source,
            })?;
        debug!(
            feed_id = %feed.feed_id,
            fixtures = calendar.fixtures.len(),
            "feed parsed"
        );
        Ok(calendar)
    }
}

#[derive(Debug, Clone)]
pub struct IcsUrlAdapter {
    feed_id: String,
    role: FeedRole,
    url: String,
}

impl IcsUrlAdapter {
    pub fn new(feed_id: impl Into<String>, role: FeedRole, url: impl Into<String>) -> Self {
        Self {
            feed_id: feed_id.into(),
            role,
            url: normalize_feed_url(&url.into()),
        }
    }
}

#[async_trait]
impl FeedAdapter for IcsUrlAdapter {
    fn feed_id(&self) -> &str {
        &self.feed_id
    }

    fn role(&self) -> FeedRole {
        self.role
    }

    fn location(&self) -> &str {
        &self.url
    }

    fn transport(&self) -> FeedTransport {
        FeedTransport::Http
    }

    async fn fetch(
        &self,
        http: &FeedFetcher,
        ctx: &AdapterContext,
    ) -> Result<FetchedFeed, AdapterError> {
        let response = http
            .fetch(ctx.run_id, &self.feed_id, &self.url)
            .await
            .map_err(|source| AdapterError::Fetch {
                feed_id: self.feed_id.clone(),
                source,
            })?;
        Ok(FetchedFeed {
            feed_id: self.feed_id.clone(),
            role: self.role,
            location: response.final_url,
            fetched_at: ctx.fetched_at,
            body: response.body,
        })
    }
}

/// Reads a feed snapshot from disk; used for offline runs and tests.
#[derive(Debug, Clone)]
pub struct IcsFileAdapter {
    feed_id: String,
    role: FeedRole,
    path: PathBuf,
    location: String,
}

impl IcsFileAdapter {
    pub fn new(feed_id: impl Into<String>, role: FeedRole, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            feed_id: feed_id.into(),
            role,
            location: path.display().to_string(),
            path,
        }
    }
}

#[async_trait]
impl FeedAdapter for IcsFileAdapter {
    fn feed_id(&self) -> &str {
        &self.feed_id
    }

    fn role(&self) -> FeedRole {
        self.role
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn transport(&self) -> FeedTransport {
        FeedTransport::LocalFile
    }

    async fn fetch(
        &self,
        _http: &FeedFetcher,
        ctx: &AdapterContext,
    ) -> Result<FetchedFeed, AdapterError> {
        let body = tokio::fs::read(&self.path)
            .await
            .map_err(|source| AdapterError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(FetchedFeed {
            feed_id: self.feed_id.clone(),
            role: self.role,
            location: self.location.clone(),
            fetched_at: ctx.fetched_at,
            body,
        })
    }
}

/// `webcal://` is plain HTTPS for our purposes.
pub fn normalize_feed_url(url: &str) -> String {
    let trimmed = url.trim();
    match trimmed.strip_prefix("webcal://") {
        Some(rest) => format!("https://{rest}"),
        None => trimmed.to_string(),
    }
}

pub fn is_remote_location(location: &str) -> bool {
    let lower = location.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("webcal://")
}

/// Picks the adapter for a configured location; relative paths resolve against `base_dir`.
pub fn adapter_for_location(
    feed_id: &str,
    role: FeedRole,
    location: &str,
    base_dir: &std::path::Path,
) -> Box<dyn FeedAdapter> {
    if is_remote_location(location) {
        Box::new(IcsUrlAdapter::new(feed_id, role, location))
    } else {
        let raw = location.trim();
        let path = raw.strip_prefix("file://").unwrap_or(raw);
        Box::new(IcsFileAdapter::new(feed_id, role, base_dir.join(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxcal_core::FixtureStart;
    use fxcal_storage::FetcherConfig;
    use std::path::Path;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn http() -> FeedFetcher {
        FeedFetcher::new(FetcherConfig::default()).expect("http client")
    }

    #[test]
    fn webcal_urls_become_https() {
        assert_eq!(
            normalize_feed_url(" webcal://fixtur.es/napoli.ics "),
            "https://fixtur.es/napoli.ics"
        );
        assert!(is_remote_location("HTTPS://example.org/x.ics"));
        assert!(!is_remote_location("fixtures/feeds/primary.ics"));
    }

    #[test]
    fn adapter_selection_by_location() {
        let root = Path::new("/srv/fxcal");
        let remote = adapter_for_location("primary", FeedRole::Primary, "webcal://a.b/c.ics", root);
        assert_eq!(remote.transport(), FeedTransport::Http);
        assert_eq!(remote.location(), "https://a.b/c.ics");

        let local = adapter_for_location("secondary", FeedRole::Secondary, "feeds/s.ics", root);
        assert_eq!(local.transport(), FeedTransport::LocalFile);
        assert_eq!(local.role(), FeedRole::Secondary);
        assert_eq!(local.location(), "/srv/fxcal/feeds/s.ics");
    }

    #[tokio::test]
    async fn file_adapter_reads_and_parses_sample_primary_feed() {
        let adapter = IcsFileAdapter::new(
            "primary",
            FeedRole::Primary,
            workspace_root().join("fixtures/feeds/primary.ics"),
        );
        let feed = adapter.fetch(&http(), &AdapterContext::new()).await.unwrap();
        let calendar = adapter.parse(&feed).unwrap();
        assert!(!calendar.fixtures.is_empty());
        assert!(calendar.fixtures.iter().all(|f| f.source == FeedRole::Primary));
        assert!(calendar
            .fixtures
            .iter()
            .any(|f| matches!(f.start, Some(FixtureStart::Timed { .. }))));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let adapter = IcsFileAdapter::new("primary", FeedRole::Primary, "/definitely/not/here.ics");
        let err = adapter.fetch(&http(), &AdapterContext::new()).await.unwrap_err();
        assert!(matches!(err, AdapterError::Io { .. }));
    }

    #[tokio::test]
    async fn non_calendar_body_is_a_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oops.ics");
        std::fs::write(&path, "<html>maintenance</html>").unwrap();
        let adapter = IcsFileAdapter::new("secondary", FeedRole::Secondary, &path);
        let feed = adapter.fetch(&http(), &AdapterContext::new()).await.unwrap();
        let err = adapter.parse(&feed).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::Codec {
                source: CodecError::NotACalendar,
                ..
            }
        ));
    }
}
