//! MongoDB backend.
//!
//! Three collections, possibly in different databases: the main article
//! collection, the issues collection and the settings collection. Both the
//! main and the issues collection carry a `ttl_idx` TTL index on `created`;
//! when the configured expiry differs from the existing index it is dropped
//! and recreated.

use crate::error::{Error, Result};
use crate::models::{ArticleRecord, IssueRecord};
use crate::registry::Settings;
use crate::storage::{ArticleStore, IssueLog, SettingsStore, Storage};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, Document, doc};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const HASH_IDX_NAME: &str = "hash_idx";
pub const TTL_IDX_NAME: &str = "ttl_idx";

/// Connection and collection settings.
#[derive(Clone)]
pub struct StorageConfig {
    pub cluster_url: String,
    pub main_database: String,
    pub main_collection: String,
    pub main_ttl: Duration,
    pub issues_database: String,
    pub issues_collection: String,
    pub issues_ttl: Duration,
    pub settings_database: String,
    pub settings_collection: String,
}

// The cluster URL usually embeds credentials.
impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("cluster_url", &"<redacted>")
            .field("main", &format_args!("{}.{}", self.main_database, self.main_collection))
            .field("main_ttl", &self.main_ttl)
            .field("issues", &format_args!("{}.{}", self.issues_database, self.issues_collection))
            .field("issues_ttl", &self.issues_ttl)
            .field(
                "settings",
                &format_args!("{}.{}", self.settings_database, self.settings_collection),
            )
            .finish()
    }
}

/// MongoDB backend: articles, issues and settings, each in its own
/// database/collection pair.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    articles: Collection<ArticleRecord>,
    issues: Collection<IssueRecord>,
    settings: Collection<Document>,
}

impl MongoStore {
    /// Connect, ping and make sure the indexes exist.
    ///
    /// # Arguments
    ///
    /// * `config` - cluster URL plus the database, collection and TTL of each store
    ///
    /// # Returns
    ///
    /// A ready store, or [`Error::Storage`] when the cluster is unreachable or
    /// an index cannot be created.
    #[instrument(level = "info", skip_all)]
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        info!("Connecting to database");
        let client = Client::with_uri_str(&config.cluster_url).await?;
        client
            .database(&config.main_database)
            .run_command(doc! { "ping": 1 })
            .await?;

        let store = Self {
            articles: client
                .database(&config.main_database)
                .collection(&config.main_collection),
            issues: client
                .database(&config.issues_database)
                .collection(&config.issues_collection),
            settings: client
                .database(&config.settings_database)
                .collection(&config.settings_collection),
            client,
        };

        ensure_index(&store.articles, HASH_IDX_NAME, "hash_id", None).await?;
        ensure_index(&store.articles, TTL_IDX_NAME, "created", Some(config.main_ttl)).await?;
        ensure_index(&store.issues, TTL_IDX_NAME, "created", Some(config.issues_ttl)).await?;
        info!(
            main = %store.articles.namespace(),
            issues = %store.issues.namespace(),
            "Database ready"
        );
        Ok(store)
    }
}

/// Create `name` on `field` if missing; recreate a TTL index whose expiry changed.
async fn ensure_index<T: Send + Sync>(
    collection: &Collection<T>,
    name: &str,
    field: &str,
    expire_after: Option<Duration>,
) -> Result<()> {
    let existing: Vec<IndexModel> = collection.list_indexes().await?.try_collect().await?;
    let current = existing
        .iter()
        .filter_map(|index| index.options.as_ref())
        .find(|options| options.name.as_deref() == Some(name));

    match current {
        Some(options) if options.expire_after == expire_after => {
            debug!(index = name, collection = %collection.name(), "Index up to date");
            return Ok(());
        }
        Some(options) => {
            warn!(
                index = name,
                collection = %collection.name(),
                old = ?options.expire_after,
                new = ?expire_after,
                "TTL changed; recreating index"
            );
            collection.drop_index(name).await?;
        }
        None => {}
    }

    let options = IndexOptions::builder()
        .name(name.to_string())
        .expire_after(expire_after)
        .build();
    let model = IndexModel::builder()
        .keys(doc! { field: 1 })
        .options(options)
        .build();
    collection.create_index(model).await?;
    info!(index = name, collection = %collection.name(), "Created index");
    Ok(())
}

impl ArticleStore for MongoStore {
    /// `find_one_and_update` on `hash_id`, so the check and the write are one
    /// server-side operation.
    async fn refresh(&self, hash_id: &str, checked_at: DateTime<Utc>) -> Result<bool> {
        // Untyped so documents written by older versions still match.
        let previous = self
            .articles
            .clone_with_type::<Document>()
            .find_one_and_update(
                doc! { "hash_id": hash_id },
                doc! { "$set": { "checked": bson::DateTime::from_chrono(checked_at) } },
            )
            .await?;
        Ok(previous.is_some())
    }

    /// Ordered bulk insert.
    async fn insert_many(&self, records: &[ArticleRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let result = self.articles.insert_many(records).await?;
        debug!(count = result.inserted_ids.len(), "Inserted new documents");
        Ok(())
    }
}

impl IssueLog for MongoStore {
    async fn record_issue(&self, issue: &IssueRecord) -> Result<()> {
        self.issues.insert_one(issue).await?;
        Ok(())
    }
}

impl SettingsStore for MongoStore {
    /// Read the `data` sub-document of the settings document called `name`.
    ///
    /// # Returns
    ///
    /// [`Error::Configuration`] when the document or its `data` field is
    /// missing, [`Error::Document`] when `data` does not decode.
    #[instrument(level = "debug", skip(self))]
    async fn load_settings(&self, name: &str) -> Result<Settings> {
        let document = self
            .settings
            .find_one(doc! { "name": name })
            .await?
            .ok_or_else(|| Error::Configuration(format!("no settings document named `{name}`")))?;
        let data = document.get_document("data").map_err(|e| {
            Error::Configuration(format!("settings document `{name}` has no data: {e}"))
        })?;
        let settings: Settings = bson::from_document(data.clone())?;
        debug!(sources = settings.sources.len(), "Loaded settings document");
        Ok(settings)
    }
}

impl Storage for MongoStore {
    /// Wait for in-flight operations, then drop the connection pool.
    async fn close(&self) {
        info!("Closing database connection");
        self.client.clone().shutdown().await;
    }
}
