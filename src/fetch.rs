//! HTTP page fetching with exponential backoff retry logic.
//!
//! - [`PageSource`]: core trait, one GET returning the page body
//! - [`HttpFetcher`]: `reqwest` client sending browser-like headers
//! - [`Retry`]: decorator adding retries to any [`PageSource`]
//!
//! Only transient failures are retried: timeouts, connection errors, 429 and
//! 5xx responses. A 404 fails immediately.
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use crate::error::{Error, Result};
use rand::{Rng, rng};
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Desktop Chrome, used when the settings carry no enabled user agent.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

/// Transport settings shared by every request.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retries: usize,
    pub base_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Something that can GET a page.
pub trait PageSource {
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<Page>;
}

impl<T: PageSource> PageSource for &T {
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<Page> {
        (**self).fetch(url, user_agent).await
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers
}

/// Plain HTTP fetcher. Accept-Encoding is negotiated by the `gzip` feature.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build the client.
    ///
    /// # Arguments
    ///
    /// * `config` - request timeout; retries are applied by [`Retry`]
    ///
    /// # Returns
    ///
    /// [`Error::Configuration`] if the TLS backend cannot be initialised.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(browser_headers())
            .gzip(true)
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl PageSource for HttpFetcher {
    #[instrument(level = "debug", skip(self, user_agent))]
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<Page> {
        let t0 = Instant::now();
        let resp = self
            .client
            .get(url)
            .header(header::USER_AGENT, user_agent)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retryable = status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
            return Err(Error::fetch(url, format!("status {status}"), retryable));
        }

        let final_url = resp.url().to_string();
        let body = resp.text().await?;
        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched page"
        );
        Ok(Page {
            url: final_url,
            status: status.as_u16(),
            body,
        })
    }
}

/// Wrapper adding exponential backoff retries to any [`PageSource`].
pub struct Retry<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> Retry<T> {
    /// Wrap `inner`.
    ///
    /// # Arguments
    ///
    /// * `inner` - the source to retry
    /// * `max_retries` - extra attempts after the first; `0` disables retrying
    /// * `base_delay` - delay before the first retry, doubled for each next one
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        self.base_delay.saturating_mul(1 << shift).min(self.max_delay)
    }
}

impl<T> fmt::Debug for Retry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: PageSource> PageSource for Retry<T> {
    #[instrument(level = "debug", skip(self, user_agent))]
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<Page> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.fetch(url, user_agent).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    let retryable = matches!(e, Error::Fetch { retryable: true, .. });
                    attempt += 1;
                    if !retryable || attempt > self.max_retries {
                        if retryable {
                            error!(
                                attempt,
                                max = self.max_retries,
                                elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                                error = %e,
                                "fetch exhausted retries"
                            );
                        }
                        return Err(e);
                    }

                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = self.backoff(attempt) + Duration::from_millis(jitter_ms);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
