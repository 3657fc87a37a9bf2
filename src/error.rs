//! Error taxonomy for the scraping pipeline.
//!
//! Only [`Error::Configuration`] and [`Error::Storage`] are fatal; everything
//! else is caught by the component that can tolerate it (the extractor for
//! per-node problems, the driver for per-page and per-source problems).

/// Errors produced by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A page could not be fetched (non-2xx status, timeout, connection failure).
    #[error("fetch failed for {url}: {reason}")]
    Fetch {
        url: String,
        reason: String,
        /// Whether repeating the request may succeed.
        retryable: bool,
    },

    /// A section selector matched nothing where data was expected.
    #[error("nothing found with selector `{selector}` on {url}")]
    NoData { url: String, selector: String },

    /// The chat or pub/sub channel rejected a delivery.
    #[error("notification failed: {0}")]
    Notification(String),

    /// The database is unreachable or rejected an operation.
    #[error("storage error: {0}")]
    Storage(#[from] mongodb::error::Error),

    /// A stored document could not be decoded.
    #[error("storage error: malformed document: {0}")]
    Document(#[from] mongodb::bson::de::Error),
}

impl Error {
    /// Fatal errors stop the driver loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::Storage(_) | Error::Document(_)
        )
    }

    pub(crate) fn fetch(url: &str, reason: impl Into<String>, retryable: bool) -> Self {
        Error::Fetch {
            url: url.to_string(),
            reason: reason.into(),
            retryable,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        let retryable = err.is_timeout() || err.is_connect() || err.is_request();
        Error::Fetch {
            url,
            reason: err.to_string(),
            retryable,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
