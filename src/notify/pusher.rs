//! Pusher Channels REST client.
//!
//! Events are posted to `https://api-{cluster}.pusher.com/apps/{app_id}/events`
//! and signed with HMAC-SHA256 over the method, path and sorted query string.
//! Pusher rejects event data above 10 kB, so batches are halved until each
//! fits.

use crate::error::{Error, Result};
use crate::models::ArticleRecord;
use crate::notify::message::cut_with_ellipsis;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::json;
use sha2::Sha256;
use std::fmt;
use tracing::{debug, info, instrument, warn};

pub const MAX_BATCH_SIZE: usize = 10_000;
pub const MAX_TITLE_LENGTH: usize = 300;
pub const MAX_DESCRIPTION_LENGTH: usize = 600;

/// One announced article: source name, title, link, description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PusherMessage {
    pub n: String,
    pub t: String,
    pub l: String,
    pub d: String,
}

impl From<&ArticleRecord> for PusherMessage {
    fn from(record: &ArticleRecord) -> Self {
        Self {
            n: record.source_name.clone(),
            t: cut_with_ellipsis(&record.title, MAX_TITLE_LENGTH),
            l: record.link.clone(),
            d: cut_with_ellipsis(&record.description, MAX_DESCRIPTION_LENGTH),
        }
    }
}

fn serialized_len(batch: &[PusherMessage]) -> usize {
    serde_json::to_string(batch).map_or(usize::MAX, |s| s.len())
}

/// Batches that fit [`MAX_BATCH_SIZE`], in order, plus the single messages
/// too large to ever fit.
pub fn split_batches(messages: &[PusherMessage]) -> (Vec<&[PusherMessage]>, Vec<&PusherMessage>) {
    let mut batches = Vec::new();
    let mut oversized = Vec::new();
    split_into(messages, &mut batches, &mut oversized);
    (batches, oversized)
}

fn split_into<'a>(
    messages: &'a [PusherMessage],
    batches: &mut Vec<&'a [PusherMessage]>,
    oversized: &mut Vec<&'a PusherMessage>,
) {
    if messages.is_empty() {
        return;
    }
    if serialized_len(messages) <= MAX_BATCH_SIZE {
        batches.push(messages);
        return;
    }
    if let [single] = messages {
        oversized.push(single);
        return;
    }
    let (left, right) = messages.split_at(messages.len() / 2);
    split_into(left, batches, oversized);
    split_into(right, batches, oversized);
}

#[derive(Clone)]
pub struct PusherConfig {
    pub app_id: String,
    pub key: String,
    pub secret: String,
    pub cluster: String,
    pub channel: String,
    pub event: String,
}

impl fmt::Debug for PusherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PusherConfig")
            .field("app_id", &self.app_id)
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("cluster", &self.cluster)
            .field("channel", &self.channel)
            .field("event", &self.event)
            .finish()
    }
}

fn body_md5(body: &str) -> String {
    use md5::{Digest, Md5};
    hex::encode(Md5::digest(body.as_bytes()))
}

/// Hex HMAC-SHA256 of `"{method}\n{path}\n{query}"`.
fn sign(secret: &str, method: &str, path: &str, query: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Configuration(format!("invalid pusher secret: {e}")))?;
    mac.update(format!("{method}\n{path}\n{query}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Query string without the signature. Keys are already in sorted order.
fn auth_query(key: &str, timestamp: i64, body: &str) -> String {
    format!(
        "auth_key={key}&auth_timestamp={timestamp}&auth_version=1.0&body_md5={}",
        body_md5(body)
    )
}

/// Signed REST client for one Pusher app.
#[derive(Debug, Clone)]
pub struct PusherClient {
    http: reqwest::Client,
    config: PusherConfig,
    host: String,
}

impl PusherClient {
    /// Create a client for the app's cluster host.
    ///
    /// # Arguments
    ///
    /// * `http` - shared client; its timeout bounds every trigger
    /// * `config` - app credentials, channel and event name
    pub fn new(http: reqwest::Client, config: PusherConfig) -> Self {
        let host = format!("https://api-{}.pusher.com", config.cluster);
        Self { http, config, host }
    }

    #[cfg(test)]
    pub(crate) fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    fn path(&self) -> String {
        format!("/apps/{}/events", self.config.app_id)
    }

    /// Signed request URL for `body` at `timestamp`.
    fn signed_url(&self, body: &str, timestamp: i64) -> Result<String> {
        let path = self.path();
        let query = auth_query(&self.config.key, timestamp, body);
        let signature = sign(&self.config.secret, "POST", &path, &query)?;
        Ok(format!("{}{path}?{query}&auth_signature={signature}", self.host))
    }

    /// Trigger one event carrying `batch` as its JSON data.
    ///
    /// # Returns
    ///
    /// [`Error::Notification`] when the request fails or Pusher answers non-2xx.
    #[instrument(level = "debug", skip_all, fields(messages = batch.len()))]
    pub async fn trigger(&self, batch: &[PusherMessage]) -> Result<()> {
        let data = serde_json::to_string(batch)
            .map_err(|e| Error::Notification(format!("cannot encode pusher batch: {e}")))?;
        let body = json!({
            "name": self.config.event,
            "channels": [self.config.channel],
            "data": data,
        })
        .to_string();
        let url = self.signed_url(&body, Utc::now().timestamp())?;

        let resp = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("pusher request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Notification(format!("pusher returned {status}: {text}")));
        }
        debug!(bytes = data.len(), "Pusher event triggered");
        Ok(())
    }

    /// Deliver `messages`, split into batches that fit. Failures are logged.
    ///
    /// # Returns
    ///
    /// How many messages were delivered.
    pub async fn send(&self, messages: &[PusherMessage]) -> usize {
        let (batches, oversized) = split_batches(messages);
        for message in oversized {
            warn!(
                link = %message.l,
                bytes = serialized_len(std::slice::from_ref(message)),
                max = MAX_BATCH_SIZE,
                "Pusher message too large; dropped"
            );
        }

        let mut delivered = 0;
        for batch in batches {
            match self.trigger(batch).await {
                Ok(()) => delivered += batch.len(),
                Err(e) => warn!(error = %e, messages = batch.len(), "Pusher delivery failed"),
            }
        }
        info!(delivered, total = messages.len(), "Pusher notify finished");
        delivered
    }
}
