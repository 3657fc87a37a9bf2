//! Slack Web API `chat.postMessage` client.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use tracing::{debug, warn};

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

#[derive(Clone)]
pub struct SlackConfig {
    pub token: String,
    /// Where new articles are announced.
    pub channel: String,
    /// Where cycle reports and issues go.
    pub report_channel: String,
}

impl fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackConfig")
            .field("token", &"<redacted>")
            .field("channel", &self.channel)
            .field("report_channel", &self.report_channel)
            .finish()
    }
}

/// The Web API answers 200 even on failure; `ok` tells the truth.
#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Bot-token client for one workspace.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    config: SlackConfig,
    endpoint: String,
}

impl SlackClient {
    /// Create a client posting to the public Web API.
    ///
    /// # Arguments
    ///
    /// * `http` - shared client; its timeout bounds every post
    /// * `config` - token and channels
    pub fn new(http: reqwest::Client, config: SlackConfig) -> Self {
        Self {
            http,
            config,
            endpoint: POST_MESSAGE_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Channel for article announcements.
    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    /// Channel for operator reports.
    pub fn report_channel(&self) -> &str {
        &self.config.report_channel
    }

    /// Post `text` to `channel` with link unfurling off.
    ///
    /// # Returns
    ///
    /// `Ok(())` once Slack acknowledged the message, or right away for empty
    /// text. Transport failures, non-2xx statuses and `ok: false` answers are
    /// [`Error::Notification`].
    pub async fn post_message(&self, channel: &str, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.config.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("slack request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Slack returned non-success");
            return Err(Error::Notification(format!("slack returned {status}")));
        }
        let answer: SlackResponse = resp
            .json()
            .await
            .map_err(|e| Error::Notification(format!("unreadable slack response: {e}")))?;
        check(answer)?;
        debug!(channel, bytes = text.len(), "Message sent to Slack");
        Ok(())
    }
}

fn check(answer: SlackResponse) -> Result<()> {
    if answer.ok {
        Ok(())
    } else {
        Err(Error::Notification(format!(
            "slack error: {}",
            answer.error.as_deref().unwrap_or("unknown")
        )))
    }
}
