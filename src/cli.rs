//! Command-line interface definitions.
//!
//! Every setting can come from a flag or from the environment variable named
//! after it. Which values are required depends on the mode; that is checked
//! in [`crate::config::Config::from_cli`].

use clap::Parser;
use std::path::PathBuf;

/// Scrape financial news front pages, store new articles and announce them.
///
/// # Examples
///
/// ```sh
/// # One pass over every enabled source
/// finnews_scraper
///
/// # Run forever, one cycle every TIME_INTERVAL seconds
/// finnews_scraper --loop
///
/// # Try a single source from a local file without touching the database
/// finnews_scraper --dry-run --sources-file sources.yaml --source CNBC
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Keep scraping, sleeping TIME_INTERVAL seconds between cycles
    #[arg(short = 'l', long = "loop")]
    pub loop_mode: bool,

    /// Only scrape the named source
    #[arg(short = 's', long, visible_alias = "webpage", short_alias = 'w')]
    pub source: Option<String>,

    /// Scrape and enrich against an in-memory store and print what would be announced
    #[arg(long)]
    pub dry_run: bool,

    /// Read sources and user agents from a local YAML/JSON file instead of the settings collection
    #[arg(long, env = "SOURCES_FILE")]
    pub sources_file: Option<PathBuf>,

    /// MongoDB connection string
    #[arg(long, env = "CLUSTER_URL", hide_env_values = true)]
    pub cluster_url: Option<String>,

    #[arg(long, env = "MAIN_DATABASE")]
    pub main_database: Option<String>,

    #[arg(long, env = "MAIN_COLLECTION")]
    pub main_collection: Option<String>,

    /// Seconds before an article expires
    #[arg(long, env = "MAIN_TTL_VALUE")]
    pub main_ttl_value: Option<u64>,

    #[arg(long, env = "ISSUES_DATABASE")]
    pub issues_database: Option<String>,

    #[arg(long, env = "ISSUES_COLLECTION")]
    pub issues_collection: Option<String>,

    /// Seconds before an issue expires
    #[arg(long, env = "ISSUES_TTL_VALUE")]
    pub issues_ttl_value: Option<u64>,

    #[arg(long, env = "SETTINGS_DATABASE")]
    pub settings_database: Option<String>,

    #[arg(long, env = "SETTINGS_COLLECTION")]
    pub settings_collection: Option<String>,

    /// `name` of the settings document to load
    #[arg(long, env = "SETTINGS_FILE_NAME")]
    pub settings_file_name: Option<String>,

    /// Seconds between cycles in loop mode
    #[arg(long, env = "TIME_INTERVAL")]
    pub time_interval: Option<u64>,

    /// Consecutive empty cycles before a source is skipped
    #[arg(long, env = "MAX_FAILED_ATTEMPTS", default_value_t = 3)]
    pub max_failed_attempts: u32,

    /// HTTP timeout in seconds
    #[arg(long, env = "FETCH_TIMEOUT", default_value_t = 15)]
    pub fetch_timeout: u64,

    /// Retries for transient fetch failures
    #[arg(long, env = "FETCH_RETRIES", default_value_t = 2)]
    pub fetch_retries: usize,

    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    pub slack_bot_token: Option<String>,

    /// Channel for article announcements
    #[arg(long, env = "SLACK_CHANNEL")]
    pub slack_channel: Option<String>,

    /// Channel for reports; defaults to SLACK_CHANNEL
    #[arg(long, env = "SLACK_REPORT_CHANNEL")]
    pub slack_report_channel: Option<String>,

    #[arg(long, env = "PUSHER_APP_ID")]
    pub pusher_app_id: Option<String>,

    #[arg(long, env = "PUSHER_APP_KEY")]
    pub pusher_app_key: Option<String>,

    #[arg(long, env = "PUSHER_APP_SECRET", hide_env_values = true)]
    pub pusher_app_secret: Option<String>,

    #[arg(long, env = "PUSHER_APP_CLUSTER")]
    pub pusher_app_cluster: Option<String>,

    #[arg(long, env = "PUSHER_CHANNEL")]
    pub pusher_channel: Option<String>,

    #[arg(long, env = "PUSHER_EVENT")]
    pub pusher_event: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "finnews_scraper",
            "--loop",
            "--source",
            "CNBC",
            "--cluster-url",
            "mongodb://localhost:27017",
            "--time-interval",
            "300",
        ]);

        assert!(cli.loop_mode);
        assert!(!cli.dry_run);
        assert_eq!(cli.source.as_deref(), Some("CNBC"));
        assert_eq!(cli.cluster_url.as_deref(), Some("mongodb://localhost:27017"));
        assert_eq!(cli.time_interval, Some(300));
    }

    #[test]
    fn test_cli_short_flags_and_alias() {
        let cli = Cli::parse_from(["finnews_scraper", "-l", "-w", "WSJ"]);
        assert!(cli.loop_mode);
        assert_eq!(cli.source.as_deref(), Some("WSJ"));

        let cli = Cli::parse_from(["finnews_scraper", "--webpage", "Bloomberg"]);
        assert!(!cli.loop_mode);
        assert_eq!(cli.source.as_deref(), Some("Bloomberg"));
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["finnews_scraper", "--dry-run", "--sources-file", "sources.yaml"]);
        assert!(cli.dry_run);
        assert_eq!(cli.sources_file, Some(PathBuf::from("sources.yaml")));
        assert_eq!(cli.fetch_timeout, 15);
    }
}
