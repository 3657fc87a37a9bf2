//! Announcements and operator reports.
//!
//! New articles go to the Slack chat channel right away and are queued for
//! Pusher, which is flushed once per cycle. Reports (cycle summaries, issues,
//! fatal errors) go to the Slack report channel. Delivery failures are logged
//! and never propagate.

pub mod message;
pub mod pusher;
pub mod slack;

use crate::error::{Error, Result};
use crate::models::ArticleRecord;
use crate::utils::truncate_for_log;
use pusher::{PusherClient, PusherConfig, PusherMessage};
use slack::{SlackClient, SlackConfig};
use std::time::Duration;
use tracing::{debug, info, warn};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub struct Notifier {
    slack: Option<SlackClient>,
    pusher: Option<PusherClient>,
    /// Print announcements to stdout (dry run).
    echo: bool,
    pending: Vec<PusherMessage>,
}

impl Notifier {
    /// Build the notifier and its shared HTTP client.
    ///
    /// # Arguments
    ///
    /// * `slack` - chat and report channels, if configured
    /// * `pusher` - pub/sub app, if configured
    /// * `echo` - also print announcements and reports to stdout
    ///
    /// # Returns
    ///
    /// [`Error::Configuration`] when the HTTP client cannot be built.
    pub fn new(slack: Option<SlackConfig>, pusher: Option<PusherConfig>, echo: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            slack: slack.map(|config| SlackClient::new(http.clone(), config)),
            pusher: pusher.map(|config| PusherClient::new(http, config)),
            echo,
            pending: Vec::new(),
        })
    }

    /// Post the `"<title>": <link>` lines for `records` to the chat channel.
    pub async fn announce(&self, records: &[ArticleRecord]) {
        if records.is_empty() {
            return;
        }
        let text = message::create_message(records);
        if self.echo {
            print!("{text}");
        }
        if let Some(slack) = &self.slack {
            if let Err(e) = slack.post_message(slack.channel(), &text).await {
                warn!(error = %e, records = records.len(), "Chat announcement failed");
            }
        }
    }

    /// Queue `records` for the next [`Notifier::flush`].
    pub fn queue(&mut self, records: &[ArticleRecord]) {
        if self.pusher.is_some() {
            self.pending.extend(records.iter().map(PusherMessage::from));
        }
    }

    /// Messages waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Deliver everything queued to Pusher.
    pub async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        debug!(pending = self.pending(), "Flushing pusher queue");
        let messages = std::mem::take(&mut self.pending);
        if let Some(pusher) = &self.pusher {
            pusher.send(&messages).await;
        }
    }

    /// Send an operator report to the report channel.
    pub async fn report(&self, text: &str) {
        if self.echo {
            println!("{text}");
        }
        match &self.slack {
            Some(slack) => {
                if let Err(e) = slack.post_message(slack.report_channel(), text).await {
                    warn!(error = %e, "Report delivery failed");
                }
            }
            None => debug!("No report channel configured"),
        }
        info!(report = %truncate_for_log(text, 500), "Report");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pusher_config() -> PusherConfig {
        PusherConfig {
            app_id: "1".to_string(),
            key: "key".to_string(),
            secret: "secret".to_string(),
            cluster: "eu".to_string(),
            channel: "news".to_string(),
            event: "article".to_string(),
        }
    }

    #[test]
    fn test_queue_requires_pusher() {
        let record = ArticleRecord::new("CNBC", "https://www.cnbc.com/a", Utc::now());

        let mut quiet = Notifier::new(None, None, false).unwrap();
        quiet.queue(std::slice::from_ref(&record));
        assert_eq!(quiet.pending(), 0);

        let mut notifier = Notifier::new(None, Some(pusher_config()), false).unwrap();
        notifier.queue(std::slice::from_ref(&record));
        notifier.queue(std::slice::from_ref(&record));
        assert_eq!(notifier.pending(), 2);
    }

    fn unreachable_notifier() -> Notifier {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let slack = SlackConfig {
            token: "xoxb".to_string(),
            channel: "#news".to_string(),
            report_channel: "#ops".to_string(),
        };
        Notifier {
            slack: Some(SlackClient::new(http.clone(), slack).with_endpoint("http://127.0.0.1:9/chat")),
            pusher: Some(PusherClient::new(http, pusher_config()).with_host("http://127.0.0.1:9")),
            echo: false,
            pending: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_delivery_failures_do_not_propagate() {
        let mut record = ArticleRecord::new("CNBC", "https://www.cnbc.com/a", Utc::now());
        record.title = "Stocks rally".to_string();
        let records = vec![record];

        let mut notifier = unreachable_notifier();
        notifier.announce(&records).await;
        notifier.queue(&records);
        assert_eq!(notifier.pending(), 1);

        notifier.flush().await;
        assert_eq!(notifier.pending(), 0);
        notifier.report("```Single run```").await;
    }

    #[tokio::test]
    async fn test_flush_without_pusher_drains_nothing() {
        let mut notifier = Notifier::new(None, None, false).unwrap();
        notifier.announce(&[]).await;
        notifier.flush().await;
        assert_eq!(notifier.pending(), 0);
    }
}
