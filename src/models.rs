//! Data models shared across the pipeline.
//!
//! - [`ArticleRecord`]: one discovered news item, persisted in the main collection
//! - [`IssueRecord`]: an operator-facing problem, persisted in the issues collection
//! - [`PageMetadata`]: title/description unfurled from an article page
//!
//! Field names of the persisted types match the existing collection schema
//! (`name, hash_id, title, link, description, created, checked`), hence the
//! serde renames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// A news item discovered on a source page.
///
/// `title` and `description` stay empty until enrichment fills them in.
/// `link` is always absolute once the extractor has produced the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// The originating source name from the registry.
    #[serde(rename = "name")]
    pub source_name: String,
    /// SHA-1 of `source_name + link`, the dedup key.
    pub hash_id: String,
    /// The article headline.
    pub title: String,
    /// Absolute URL of the article.
    pub link: String,
    /// Short summary of the article.
    pub description: String,
    /// First time the article was seen. The TTL index expires records on this field.
    #[serde(
        rename = "created",
        with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime"
    )]
    pub created_at: DateTime<Utc>,
    /// Last time the article was seen on its source page.
    #[serde(
        rename = "checked",
        with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime"
    )]
    pub checked_at: DateTime<Utc>,
}

impl ArticleRecord {
    /// Create a fresh record first seen at `now`.
    pub fn new(source_name: &str, link: &str, now: DateTime<Utc>) -> Self {
        Self {
            source_name: source_name.to_string(),
            hash_id: hash_id(source_name, link),
            title: String::new(),
            link: link.to_string(),
            description: String::new(),
            created_at: now,
            checked_at: now,
        }
    }
}

/// Deterministic dedup key for an article: hex SHA-1 of `source_name + link`.
pub fn hash_id(source_name: &str, link: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source_name.as_bytes());
    hasher.update(link.as_bytes());
    hex::encode(hasher.finalize())
}

/// Severity of an [`IssueRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueLevel {
    Warning,
    Error,
    Critical,
}

impl fmt::Display for IssueLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueLevel::Warning => "WARNING",
            IssueLevel::Error => "ERROR",
            IssueLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// A problem worth an operator's attention, kept in the issues collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created: DateTime<Utc>,
    pub level: IssueLevel,
    pub message: String,
    /// The page the issue was observed on, if any.
    pub link: String,
    /// The user agent used for the failing request, if any.
    pub user_agent: String,
    /// Extra context such as the selector that matched nothing.
    pub content: String,
}

impl IssueRecord {
    /// Issue stamped with the current time. Optional fields start empty.
    ///
    /// # Arguments
    ///
    /// * `level` - severity
    /// * `message` - what went wrong
    pub fn new(level: IssueLevel, message: impl Into<String>) -> Self {
        Self {
            created: Utc::now(),
            level,
            message: message.into(),
            link: String::new(),
            user_agent: String::new(),
            content: String::new(),
        }
    }

    /// Page or article the issue is about.
    pub fn with_link(mut self, link: &str) -> Self {
        self.link = link.to_string();
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    /// Extra detail, such as the failing selector.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }
}

/// Which group of meta tags produced a [`PageMetadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfurlMethod {
    TwitterCard,
    OpenGraph,
    MetaTags,
}

/// Metadata unfurled from an article page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMetadata {
    pub method: UnfurlMethod,
    /// Final URL after redirects.
    pub url: String,
    /// Site name, or the title when the page declares none.
    pub site: String,
    pub title: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hash_id_matches_sha1_of_concatenation() {
        // sha1("abc")
        assert_eq!(hash_id("a", "bc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(hash_id("ab", "c"), hash_id("a", "bc"));
    }

    #[test]
    fn test_hash_id_stable_and_distinct() {
        let a = hash_id("Bloomberg", "https://www.bloomberg.com/news/a");
        let b = hash_id("Bloomberg", "https://www.bloomberg.com/news/a");
        let c = hash_id("Bloomberg", "https://www.bloomberg.com/news/b");
        let d = hash_id("WSJ", "https://www.bloomberg.com/news/a");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn test_new_record_is_unenriched() {
        let now = Utc.with_ymd_and_hms(2025, 5, 6, 14, 30, 0).unwrap();
        let record = ArticleRecord::new("WSJ", "https://www.wsj.com/economy/x", now);
        assert_eq!(record.source_name, "WSJ");
        assert!(record.title.is_empty());
        assert!(record.description.is_empty());
        assert_eq!(record.created_at, now);
        assert_eq!(record.checked_at, now);
        assert_eq!(record.hash_id, hash_id("WSJ", "https://www.wsj.com/economy/x"));
    }

    #[test]
    fn test_record_uses_collection_field_names() {
        let now = Utc.with_ymd_and_hms(2025, 5, 6, 14, 30, 0).unwrap();
        let record = ArticleRecord::new("WSJ", "https://www.wsj.com/economy/x", now);
        let doc = mongodb::bson::to_document(&record).unwrap();
        for field in ["name", "hash_id", "title", "link", "description", "created", "checked"] {
            assert!(doc.contains_key(field), "missing {field}");
        }
        assert!(doc.get_datetime("created").is_ok());
    }

    #[test]
    fn test_issue_level_serialization() {
        let issue = IssueRecord::new(IssueLevel::Warning, "no data")
            .with_link("https://example.com")
            .with_content("quote");
        let doc = mongodb::bson::to_document(&issue).unwrap();
        assert_eq!(doc.get_str("level").unwrap(), "WARNING");
        assert_eq!(doc.get_str("link").unwrap(), "https://example.com");
        assert_eq!(IssueLevel::Critical.to_string(), "CRITICAL");
    }
}
