//! Persistence seams.
//!
//! [`mongo::MongoStore`] is the production backend. [`memory::MemoryStore`]
//! backs `--dry-run` and the tests.

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::{MongoStore, StorageConfig};

use crate::error::Result;
use crate::models::{ArticleRecord, IssueRecord};
use crate::registry::Settings;
use chrono::{DateTime, Utc};

/// The collection of previously seen articles.
pub trait ArticleStore {
    /// Atomically set `checked` on the record with `hash_id`.
    /// Returns whether such a record existed.
    async fn refresh(&self, hash_id: &str, checked_at: DateTime<Utc>) -> Result<bool>;

    /// Insert new records. An empty slice is a no-op.
    async fn insert_many(&self, records: &[ArticleRecord]) -> Result<()>;
}

/// The operator-facing issues collection.
pub trait IssueLog {
    async fn record_issue(&self, issue: &IssueRecord) -> Result<()>;
}

/// Named settings documents.
pub trait SettingsStore {
    async fn load_settings(&self, name: &str) -> Result<Settings>;
}

/// Everything the driver needs from a backend.
pub trait Storage: ArticleStore + IssueLog + SettingsStore {
    /// Release connections. The store must not be used afterwards.
    async fn close(&self);
}
