//! The scrape loop.
//!
//! A cycle reloads the settings, then handles each enabled source in turn:
//! fetch every crawl page, extract records, reconcile them against the store,
//! announce what is new. After the last source the Pusher queue is flushed
//! and a summary is sent to the report channel. In loop mode the driver then
//! sleeps until the next cycle is due, waking early on Ctrl-C.
//!
//! Per-page and per-source failures are logged and recorded as issues.
//! Errors for which [`Error::is_fatal`] holds end the run.

use crate::config::{Config, SettingsSource};
use crate::error::{Error, Result};
use crate::fetch::PageSource;
use crate::models::{IssueLevel, IssueRecord};
use crate::notify::Notifier;
use crate::notify::message::{SourceSummary, create_summary, cycle_report};
use crate::reconcile::reconcile;
use crate::registry::{self, CompiledRule, SelectorRule, Settings};
use crate::scrapers::links::Extractor;
use crate::scrapers::unfurl::Unfurler;
use crate::storage::Storage;
use crate::utils::{pick_user_agent, truncate_for_log};
use chrono::Utc;
use scraper::Html;
use std::collections::HashMap;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Owns everything a run needs: configuration, store, fetcher and notifier.
pub struct Driver<S, P> {
    config: Config,
    store: S,
    fetcher: P,
    notifier: Notifier,
    /// Consecutive cycles each source produced nothing. Reset only by a restart
    /// once a source has been skipped.
    failed_attempts: HashMap<String, u32>,
    cycle: u64,
}

impl<S: Storage, P: PageSource> Driver<S, P> {
    /// Assemble a driver.
    ///
    /// # Arguments
    ///
    /// * `config` - validated process configuration
    /// * `store` - articles, issues and (unless a sources file is used) settings
    /// * `fetcher` - page source for crawl pages and unfurling
    /// * `notifier` - announcement and report delivery
    pub fn new(config: Config, store: S, fetcher: P, notifier: Notifier) -> Self {
        Self {
            config,
            store,
            fetcher,
            notifier,
            failed_attempts: HashMap::new(),
            cycle: 0,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one cycle, or cycles until interrupted in loop mode.
    ///
    /// # Returns
    ///
    /// `Ok(())` after a single run or an interrupt. The first fatal error
    /// otherwise; the caller reports it with [`Driver::report_fatal`].
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.cycle += 1;
            let header = match self.config.interval {
                Some(_) => format!("Cycle #{}", self.cycle),
                None => "Single run".to_string(),
            };
            debug!("--- {header} ---");

            let t0 = Instant::now();
            let summaries = self.run_cycle().await?;
            let elapsed = t0.elapsed();

            let report = cycle_report(
                &header,
                Utc::now(),
                elapsed.as_secs_f64(),
                &create_summary(&summaries),
            );
            self.notifier.report(&report).await;

            let Some(interval) = self.config.interval else {
                return Ok(());
            };
            let delay = interval.saturating_sub(elapsed);
            debug!(delay_secs = delay.as_secs_f64(), "Sleeping until next cycle");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted; stopping");
                    return Ok(());
                }
            }
        }
    }

    /// One pass over every enabled source. Returns one summary per scraped source.
    #[instrument(level = "info", skip(self), fields(cycle = self.cycle))]
    pub async fn run_cycle(&mut self) -> Result<Vec<SourceSummary>> {
        let settings = self.load_settings().await?;
        if settings.sources.is_empty() {
            warn!("Settings list no sources");
        }
        let user_agents = settings.user_agents();
        let rules: Vec<&SelectorRule> = settings
            .sources
            .enabled()
            .filter(|rule| self.config.source.as_ref().is_none_or(|only| *only == rule.name))
            .collect();
        info!(sources = rules.len(), user_agents = user_agents.len(), "Loaded sources");
        if let Some(only) = &self.config.source {
            if settings.sources.get(only).is_none_or(|rule| !rule.enable) {
                warn!(source = %only, "No enabled source with that name");
            }
        }

        let mut summaries = Vec::with_capacity(rules.len());
        for rule in rules {
            if self.should_skip(&rule.name).await? {
                continue;
            }
            let user_agent = pick_user_agent(&user_agents);
            let summary = match self.scrape_source(rule, user_agent).await {
                Ok(summary) => summary,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(source = %rule.name, error = %e, "Source failed");
                    self.record_issue(IssueRecord::new(IssueLevel::Error, e.to_string()))
                        .await?;
                    SourceSummary {
                        name: rule.name.clone(),
                        new: 0,
                        parsed: 0,
                        seconds: 0.0,
                    }
                }
            };

            let failures = self.failed_attempts.entry(rule.name.clone()).or_insert(0);
            *failures = if summary.parsed == 0 { *failures + 1 } else { 0 };
            summaries.push(summary);
        }

        self.notifier.flush().await;
        Ok(summaries)
    }

    async fn load_settings(&self) -> Result<Settings> {
        match &self.config.settings {
            SettingsSource::File(path) => registry::load_file(path).await,
            SettingsSource::Collection(name) => self.store.load_settings(name).await,
        }
    }

    /// Sources that came back empty `max_failed_attempts` cycles in a row are
    /// skipped from then on. The skip is reported once.
    async fn should_skip(&mut self, name: &str) -> Result<bool> {
        let max = self.config.max_failed_attempts;
        let Some(failures) = self.failed_attempts.get_mut(name) else {
            return Ok(false);
        };
        if *failures < max {
            return Ok(false);
        }
        if *failures == max {
            *failures += 1;
            let message = format!("{name} was skipped after {max} failed attempts");
            error!(source = %name, max, "Source skipped after repeated failures");
            self.record_issue(IssueRecord::new(IssueLevel::Error, message.as_str()))
                .await?;
            self.notifier.report(&message).await;
        }
        Ok(true)
    }

    #[instrument(level = "info", skip_all, fields(source = %rule.name))]
    async fn scrape_source(&mut self, rule: &SelectorRule, user_agent: &str) -> Result<SourceSummary> {
        let t0 = Instant::now();
        let mut summary = SourceSummary {
            name: rule.name.clone(),
            new: 0,
            parsed: 0,
            seconds: 0.0,
        };

        let compiled = match CompiledRule::compile(rule) {
            Ok(compiled) => compiled,
            Err(e) => {
                error!(error = %e, "Invalid source rule");
                self.record_issue(IssueRecord::new(IssueLevel::Error, e.to_string()))
                    .await?;
                summary.seconds = t0.elapsed().as_secs_f64();
                return Ok(summary);
            }
        };

        let mut extractor = Extractor::new(&compiled);
        let mut records = Vec::new();
        for (page, url) in compiled.crawl_urls.iter().enumerate() {
            let body = match self.fetcher.fetch(url, user_agent).await {
                Ok(page) => {
                    debug!(%url, status = page.status, bytes = page.body.len(), "Fetched page");
                    page.body
                }
                Err(e) => {
                    warn!(%url, error = %e, "Fetch failed; skipping page");
                    let issue = IssueRecord::new(IssueLevel::Error, e.to_string())
                        .with_link(url)
                        .with_user_agent(user_agent);
                    self.record_issue(issue).await?;
                    continue;
                }
            };

            let extraction = {
                let document = Html::parse_document(&body);
                extractor.extract(&document, page)
            };
            if extraction.is_no_data() {
                warn!(%url, "No data on page");
            }
            for e in extraction.no_data_errors(url) {
                if let Error::NoData { selector, .. } = &e {
                    let issue = IssueRecord::new(IssueLevel::Warning, e.to_string())
                        .with_link(url)
                        .with_user_agent(user_agent)
                        .with_content(selector.as_str());
                    self.record_issue(issue).await?;
                }
            }
            records.extend(extraction.records);
        }

        summary.parsed = records.len();
        if records.is_empty() {
            warn!("No records extracted");
        }

        let unfurler = Unfurler::new(&self.fetcher, user_agent);
        let outcome = reconcile(&self.store, &unfurler, records).await?;
        for failure in &outcome.enrichment_failed {
            let issue = IssueRecord::new(IssueLevel::Warning, "enrichment failed")
                .with_link(&failure.record.link)
                .with_user_agent(user_agent)
                .with_content(truncate_for_log(&failure.reason(), 500));
            self.record_issue(issue).await?;
        }

        self.notifier.announce(&outcome.inserted).await;
        self.notifier.queue(&outcome.inserted);

        summary.new = outcome.inserted.len();
        summary.seconds = t0.elapsed().as_secs_f64();
        info!(
            new = summary.new,
            parsed = summary.parsed,
            refreshed = outcome.refreshed,
            failed = outcome.enrichment_failed.len(),
            elapsed_ms = (summary.seconds * 1000.0) as u64,
            "Source done"
        );
        Ok(summary)
    }

    async fn record_issue(&self, issue: IssueRecord) -> Result<()> {
        debug!(level = %issue.level, message = %issue.message, "Recording issue");
        self.store.record_issue(&issue).await
    }

    /// Log a run-ending error, keep it as a critical issue when the store
    /// still works, and post it to the report channel.
    pub async fn report_fatal(&self, e: &Error) {
        error!(error = %e, "Stopping after fatal error");
        if !matches!(e, Error::Storage(_)) {
            let issue = IssueRecord::new(IssueLevel::Critical, e.to_string());
            if let Err(store_err) = self.store.record_issue(&issue).await {
                error!(error = %store_err, "Could not record fatal error");
            }
        }
        self.notifier.report(&format!("```CRITICAL: {e}```")).await;
    }

    /// Release the store.
    pub async fn shutdown(&self) {
        self.store.close().await;
    }
}
