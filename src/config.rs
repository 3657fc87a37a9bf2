//! Validated runtime configuration built from the [`Cli`].

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::fetch::FetchConfig;
use crate::notify::pusher::PusherConfig;
use crate::notify::slack::SlackConfig;
use crate::storage::StorageConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Where sources and user agents come from each cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsSource {
    File(PathBuf),
    /// `name` of a document in the settings collection.
    Collection(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` in dry-run mode.
    pub storage: Option<StorageConfig>,
    pub settings: SettingsSource,
    /// `Some` in loop mode.
    pub interval: Option<Duration>,
    pub source: Option<String>,
    pub max_failed_attempts: u32,
    pub fetch: FetchConfig,
    pub slack: Option<SlackConfig>,
    pub pusher: Option<PusherConfig>,
    pub dry_run: bool,
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::Configuration(format!("{name} is not set"))),
    }
}

/// A group of settings that must be given together or not at all.
fn group(values: &[(&Option<String>, &str)]) -> Result<Option<Vec<String>>> {
    let given = values.iter().filter(|(v, _)| v.is_some()).count();
    if given == 0 {
        return Ok(None);
    }
    values
        .iter()
        .map(|(value, name)| required(value, name))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

impl Config {
    /// Validate parsed arguments.
    ///
    /// # Arguments
    ///
    /// * `cli` - flags with their environment fallbacks already applied
    ///
    /// # Returns
    ///
    /// The typed configuration, or [`Error::Configuration`] naming the first
    /// missing or invalid value.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let settings = match (&cli.sources_file, &cli.settings_file_name) {
            (Some(path), _) => SettingsSource::File(path.clone()),
            (None, _) if cli.dry_run => {
                return Err(Error::Configuration("--dry-run needs --sources-file".to_string()));
            }
            (None, name) => SettingsSource::Collection(required(name, "SETTINGS_FILE_NAME")?),
        };

        let storage = if cli.dry_run {
            None
        } else {
            let ttl = |value: Option<u64>, name: &str| {
                value
                    .map(Duration::from_secs)
                    .ok_or_else(|| Error::Configuration(format!("{name} is not set")))
            };
            Some(StorageConfig {
                cluster_url: required(&cli.cluster_url, "CLUSTER_URL")?,
                main_database: required(&cli.main_database, "MAIN_DATABASE")?,
                main_collection: required(&cli.main_collection, "MAIN_COLLECTION")?,
                main_ttl: ttl(cli.main_ttl_value, "MAIN_TTL_VALUE")?,
                issues_database: required(&cli.issues_database, "ISSUES_DATABASE")?,
                issues_collection: required(&cli.issues_collection, "ISSUES_COLLECTION")?,
                issues_ttl: ttl(cli.issues_ttl_value, "ISSUES_TTL_VALUE")?,
                settings_database: required(&cli.settings_database, "SETTINGS_DATABASE")?,
                settings_collection: required(&cli.settings_collection, "SETTINGS_COLLECTION")?,
            })
        };

        let interval = if cli.loop_mode {
            match cli.time_interval {
                Some(0) | None => {
                    return Err(Error::Configuration(
                        "TIME_INTERVAL must be a positive number of seconds in loop mode".to_string(),
                    ));
                }
                Some(secs) => Some(Duration::from_secs(secs)),
            }
        } else {
            None
        };

        if cli.fetch_timeout == 0 {
            return Err(Error::Configuration("FETCH_TIMEOUT must be positive".to_string()));
        }
        let fetch = FetchConfig {
            timeout: Duration::from_secs(cli.fetch_timeout),
            retries: cli.fetch_retries,
            ..FetchConfig::default()
        };

        // Notification credentials are ignored in dry-run mode.
        let (slack, pusher) = if cli.dry_run {
            (None, None)
        } else {
            let slack = group(&[
                (&cli.slack_bot_token, "SLACK_BOT_TOKEN"),
                (&cli.slack_channel, "SLACK_CHANNEL"),
            ])?
            .map(|values| {
                let channel = values[1].clone();
                SlackConfig {
                    token: values[0].clone(),
                    report_channel: cli
                        .slack_report_channel
                        .clone()
                        .filter(|c| !c.trim().is_empty())
                        .unwrap_or_else(|| channel.clone()),
                    channel,
                }
            });
            let pusher = group(&[
                (&cli.pusher_app_id, "PUSHER_APP_ID"),
                (&cli.pusher_app_key, "PUSHER_APP_KEY"),
                (&cli.pusher_app_secret, "PUSHER_APP_SECRET"),
                (&cli.pusher_app_cluster, "PUSHER_APP_CLUSTER"),
                (&cli.pusher_channel, "PUSHER_CHANNEL"),
                (&cli.pusher_event, "PUSHER_EVENT"),
            ])?
            .map(|mut values| PusherConfig {
                event: values.remove(5),
                channel: values.remove(4),
                cluster: values.remove(3),
                secret: values.remove(2),
                key: values.remove(1),
                app_id: values.remove(0),
            });
            (slack, pusher)
        };

        Ok(Self {
            storage,
            settings,
            interval,
            source: cli.source.clone(),
            max_failed_attempts: cli.max_failed_attempts,
            fetch,
            slack,
            pusher,
            dry_run: cli.dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const STORAGE: [&str; 19] = [
        "finnews_scraper",
        "--cluster-url",
        "mongodb://localhost:27017",
        "--main-database",
        "news",
        "--main-collection",
        "articles",
        "--main-ttl-value",
        "604800",
        "--issues-database",
        "news",
        "--issues-collection",
        "issues",
        "--issues-ttl-value",
        "86400",
        "--settings-database",
        "news",
        "--settings-collection",
        "settings",
    ];

    fn cli(extra: &[&str]) -> Cli {
        Cli::parse_from(STORAGE.iter().chain(extra.iter()))
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_cli(&cli(&[
            "--settings-file-name",
            "scraper",
            "--loop",
            "--time-interval",
            "600",
            "--slack-bot-token",
            "xoxb",
            "--slack-channel",
            "#news",
        ]))
        .unwrap();

        let storage = config.storage.unwrap();
        assert_eq!(storage.main_ttl, Duration::from_secs(604800));
        assert_eq!(config.settings, SettingsSource::Collection("scraper".to_string()));
        assert_eq!(config.interval, Some(Duration::from_secs(600)));
        let slack = config.slack.unwrap();
        assert_eq!(slack.report_channel, "#news");
    }

    #[test]
    fn test_pusher_group_is_all_or_nothing() {
        let partial = cli(&["--settings-file-name", "scraper", "--pusher-app-id", "1"]);
        let err = Config::from_cli(&partial).unwrap_err();
        assert!(err.to_string().contains("PUSHER_APP_KEY"));

        let full = cli(&[
            "--settings-file-name", "scraper",
            "--pusher-app-id", "1",
            "--pusher-app-key", "key",
            "--pusher-app-secret", "secret",
            "--pusher-app-cluster", "eu",
            "--pusher-channel", "news",
            "--pusher-event", "article",
        ]);
        let pusher = Config::from_cli(&full).unwrap().pusher.unwrap();
        assert_eq!(pusher.app_id, "1");
        assert_eq!(pusher.cluster, "eu");
        assert_eq!(pusher.event, "article");
    }

    #[test]
    fn test_loop_requires_interval() {
        let err = Config::from_cli(&cli(&["--settings-file-name", "scraper", "--loop"])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_storage_is_fatal() {
        let bare = Cli::parse_from(["finnews_scraper", "--settings-file-name", "scraper"]);
        assert!(matches!(Config::from_cli(&bare), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_dry_run_needs_only_sources_file() {
        let dry = Cli::parse_from(["finnews_scraper", "--dry-run", "--sources-file", "sources.yaml"]);
        let config = Config::from_cli(&dry).unwrap();
        assert!(config.storage.is_none());
        assert!(config.slack.is_none());
        assert_eq!(config.settings, SettingsSource::File(PathBuf::from("sources.yaml")));

        let dry = Cli::parse_from(["finnews_scraper", "--dry-run"]);
        assert!(Config::from_cli(&dry).is_err());
    }
}
