use crate::error::{Error, Result};
use crate::models::{ArticleRecord, IssueRecord};
use crate::registry::Settings;
use crate::storage::{ArticleStore, IssueLog, SettingsStore, Storage};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

/// In-process store. Nothing expires.
#[derive(Debug, Default)]
pub struct MemoryStore {
    articles: RwLock<Vec<ArticleRecord>>,
    issues: RwLock<Vec<IssueRecord>>,
    settings: Option<(String, Settings)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `settings` under `name` from [`SettingsStore::load_settings`].
    #[cfg(test)]
    pub fn with_settings(mut self, name: &str, settings: Settings) -> Self {
        self.settings = Some((name.to_string(), settings));
        self
    }

    pub async fn articles(&self) -> Vec<ArticleRecord> {
        self.articles.read().await.clone()
    }

    pub async fn issues(&self) -> Vec<IssueRecord> {
        self.issues.read().await.clone()
    }
}

impl ArticleStore for MemoryStore {
    async fn refresh(&self, hash_id: &str, checked_at: DateTime<Utc>) -> Result<bool> {
        let mut articles = self.articles.write().await;
        match articles.iter_mut().find(|a| a.hash_id == hash_id) {
            Some(article) => {
                article.checked_at = checked_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_many(&self, records: &[ArticleRecord]) -> Result<()> {
        self.articles.write().await.extend_from_slice(records);
        debug!(count = records.len(), "Inserted records into memory store");
        Ok(())
    }
}

impl IssueLog for MemoryStore {
    async fn record_issue(&self, issue: &IssueRecord) -> Result<()> {
        self.issues.write().await.push(issue.clone());
        Ok(())
    }
}

impl SettingsStore for MemoryStore {
    async fn load_settings(&self, name: &str) -> Result<Settings> {
        match &self.settings {
            Some((stored, settings)) if stored == name => Ok(settings.clone()),
            _ => Err(Error::Configuration(format!("no settings named `{name}`"))),
        }
    }
}

impl Storage for MemoryStore {
    async fn close(&self) {}
}
