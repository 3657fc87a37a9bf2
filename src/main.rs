//! # finnews_scraper
//!
//! A bot that watches financial news front pages. Each source is described by
//! a selector rule in the settings; the bot fetches the source's pages,
//! extracts article links, stores the ones it has not seen before in MongoDB
//! and announces them on Slack and Pusher.
//!
//! ## Usage
//!
//! ```sh
//! finnews_scraper --loop
//! ```
//!
//! ## Architecture
//!
//! 1. **Settings**: sources and user agents, reloaded every cycle
//! 2. **Fetching**: browser-like GET with retries for transient failures
//! 3. **Extraction**: section selectors yield absolute article links
//! 4. **Reconciliation**: known links are refreshed, new ones unfurled and inserted
//! 5. **Notification**: chat announcement, Pusher events, cycle report

use clap::Parser;
use std::error::Error;
use tracing::{error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod driver;
mod error;
mod fetch;
mod models;
mod notify;
mod reconcile;
mod registry;
mod scrapers;
mod storage;
mod utils;

use cli::Cli;
use config::Config;
use driver::Driver;
use fetch::{HttpFetcher, PageSource, Retry};
use notify::Notifier;
use storage::{MemoryStore, MongoStore, Storage};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("finnews_scraper starting up");

    let args = Cli::parse();
    let config = Config::from_cli(&args).inspect_err(|e| error!(error = %e, "Invalid configuration"))?;
    info!(
        loop_mode = config.interval.is_some(),
        source = ?config.source,
        dry_run = config.dry_run,
        slack = config.slack.is_some(),
        pusher = config.pusher.is_some(),
        "Configuration loaded"
    );

    let notifier = Notifier::new(config.slack.clone(), config.pusher.clone(), config.dry_run)?;
    let fetcher = Retry::new(
        HttpFetcher::new(&config.fetch)?,
        config.fetch.retries,
        config.fetch.base_delay,
    );

    let result = match config.storage.clone() {
        None => {
            let mut driver = Driver::new(config, MemoryStore::new(), fetcher, notifier);
            let result = drive(&mut driver).await;
            info!(
                articles = driver.store().articles().await.len(),
                issues = driver.store().issues().await.len(),
                "Dry run finished"
            );
            result
        }
        Some(storage) => match MongoStore::connect(&storage).await {
            Ok(store) => {
                let mut driver = Driver::new(config, store, fetcher, notifier);
                drive(&mut driver).await
            }
            Err(e) => {
                error!(error = %e, "Cannot connect to database");
                notifier.report(&format!("```CRITICAL: {e}```")).await;
                Err(e)
            }
        },
    };

    info!(elapsed_secs = start_time.elapsed().as_secs_f64(), "Finished");
    result.map_err(Into::into)
}

/// Run the driver, report a fatal error if one ends the run, then release the store.
async fn drive<S: Storage, P: PageSource>(driver: &mut Driver<S, P>) -> error::Result<()> {
    let result = driver.run().await;
    if let Err(e) = &result {
        driver.report_fatal(e).await;
    }
    driver.shutdown().await;
    result
}
