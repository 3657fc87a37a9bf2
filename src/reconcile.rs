//! Dedup and upsert of extracted records against the article store.

use crate::error::{Error, Result};
use crate::models::ArticleRecord;
use crate::scrapers::unfurl::MetadataSource;
use crate::storage::ArticleStore;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

/// A new record that could not be enriched and was therefore not stored.
#[derive(Debug)]
pub struct EnrichmentFailure {
    pub record: ArticleRecord,
    /// The fetch error, or `None` when the page had no usable title.
    pub error: Option<Error>,
}

impl EnrichmentFailure {
    /// Human-readable cause, for logs and issue records.
    pub fn reason(&self) -> String {
        match &self.error {
            Some(e) => e.to_string(),
            None => "page has no title".to_string(),
        }
    }
}

/// Outcome of one [`reconcile`] call.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Records inserted as new, in extraction order.
    pub inserted: Vec<ArticleRecord>,
    /// Records that already existed and had `checked` refreshed.
    pub refreshed: usize,
    pub enrichment_failed: Vec<EnrichmentFailure>,
}

/// Refresh known records, enrich and insert new ones.
///
/// # Arguments
///
/// * `store` - where articles are looked up and inserted
/// * `metadata` - used only for records the store has never seen
/// * `records` - output of the extractor, in document order
///
/// # Returns
///
/// The [`Reconciliation`]. Storage errors abort the call; enrichment errors
/// only affect their record.
#[instrument(level = "info", skip_all, fields(records = records.len()))]
pub async fn reconcile<S, M>(store: &S, metadata: &M, records: Vec<ArticleRecord>) -> Result<Reconciliation>
where
    S: ArticleStore,
    M: MetadataSource,
{
    let mut out = Reconciliation::default();
    let mut fresh = Vec::new();

    for mut record in records {
        let now = Utc::now();
        if store.refresh(&record.hash_id, now).await? {
            out.refreshed += 1;
            continue;
        }

        match metadata.metadata(&record.link).await {
            Ok(meta) if !meta.title.is_empty() => {
                record.title = meta.title;
                record.description = meta.description;
                record.checked_at = now;
                fresh.push(record);
            }
            Ok(_) => {
                warn!(link = %record.link, "Enrichment found no title");
                out.enrichment_failed.push(EnrichmentFailure { record, error: None });
            }
            Err(e) => {
                warn!(link = %record.link, error = %e, "Enrichment failed");
                out.enrichment_failed.push(EnrichmentFailure {
                    record,
                    error: Some(e),
                });
            }
        }
    }

    store.insert_many(&fresh).await?;
    out.inserted = fresh;

    if out.inserted.is_empty() {
        debug!(refreshed = out.refreshed, "Nothing new");
    } else {
        info!(
            inserted = out.inserted.len(),
            refreshed = out.refreshed,
            failed = out.enrichment_failed.len(),
            "Reconciled records"
        );
    }
    Ok(out)
}
