//! Downloading one calendar feed: transient failures are retried, redirects are followed by hand
//! so `webcal://` targets can be rewritten, anything else is reported once.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, ACCEPT, LOCATION, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

const ACCEPT_CALENDAR: &str = "text/calendar, text/plain;q=0.8, */*;q=0.5";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Requests per feed, the first one included.
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Pause before retry number `retry` (1-based). A server `Retry-After` wins, within `max_delay`.
    pub fn delay_before(&self, retry: u32, server_hint: Option<Duration>) -> Duration {
        if let Some(hint) = server_hint {
            return hint.min(self.max_delay);
        }
        let doublings = retry.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_redirects: usize,
    pub retry: RetryPolicy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            max_redirects: 5,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub status: u16,
    /// Location the body was finally served from, after redirects.
    pub final_url: String,
    pub attempts: u32,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid feed url {url:?}")]
    InvalidUrl { url: String },
    #[error("requesting {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("redirect from {url} has no usable Location")]
    BadRedirect { url: String },
    #[error("more than {limit} redirects starting at {url}")]
    TooManyRedirects { url: String, limit: usize },
}

/// Statuses a feed host returns while briefly overloaded or restarting.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Only failures before a response arrived; a broken body or bad TLS is not retried.
pub fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Resolves a `Location` header against the current url; `webcal://` becomes `https://`.
pub fn redirect_target(current: &Url, location: &str) -> Option<Url> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }
    let rewritten = match location.get(..9) {
        Some(scheme) if scheme.eq_ignore_ascii_case("webcal://") => {
            format!("https://{}", &location[9..])
        }
        _ => location.to_string(),
    };
    current.join(&rewritten).ok()
}

#[derive(Debug)]
pub struct FeedFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
    max_redirects: usize,
}

impl FeedFetcher {
    pub fn new(config: FetcherConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none());

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            retry: config.retry,
            max_redirects: config.max_redirects,
        })
    }

    pub async fn fetch(
        &self,
        run_id: Uuid,
        feed_id: &str,
        url: &str,
    ) -> Result<FetchedBody, FetchError> {
        let span = info_span!("feed_download", %run_id, feed_id, url);
        self.download(url).instrument(span).await
    }

    async fn download(&self, url: &str) -> Result<FetchedBody, FetchError> {
        let start = Url::parse(url.trim()).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        let mut current = start.clone();
        let mut redirects = 0usize;
        let mut attempt = 1u32;

        loop {
            let sent = self
                .client
                .get(current.clone())
                .header(ACCEPT, ACCEPT_CALENDAR)
                .send()
                .await;

            let resp = match sent {
                Ok(resp) => resp,
                Err(source) if is_transient_error(&source) && attempt < self.retry.attempts => {
                    let delay = self.retry.delay_before(attempt, None);
                    warn!(error = %source, attempt, ?delay, "feed host unreachable, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Err(source) => {
                    return Err(FetchError::Transport {
                        url: current.to_string(),
                        source,
                    })
                }
            };

            let status = resp.status();
            if status.is_redirection() {
                let target = resp
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|location| redirect_target(&current, location))
                    .ok_or_else(|| FetchError::BadRedirect {
                        url: current.to_string(),
                    })?;
                redirects += 1;
                if redirects > self.max_redirects {
                    return Err(FetchError::TooManyRedirects {
                        url: start.to_string(),
                        limit: self.max_redirects,
                    });
                }
                debug!(status = status.as_u16(), from = %current, to = %target, "following redirect");
                current = target;
                continue;
            }

            if status.is_success() {
                let body = resp
                    .bytes()
                    .await
                    .map_err(|source| FetchError::Transport {
                        url: current.to_string(),
                        source,
                    })?
                    .to_vec();
                debug!(status = status.as_u16(), bytes = body.len(), attempt, "feed downloaded");
                return Ok(FetchedBody {
                    status: status.as_u16(),
                    final_url: current.to_string(),
                    attempts: attempt,
                    body,
                });
            }

            if is_transient_status(status) && attempt < self.retry.attempts {
                let delay = self.retry.delay_before(attempt, retry_after(resp.headers()));
                warn!(status = status.as_u16(), attempt, ?delay, "feed temporarily unavailable, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(FetchError::Status {
                status: status.as_u16(),
                url: current.to_string(),
            });
        }
    }
}
