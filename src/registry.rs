//! Source registry: the per-site selector rules and the user agent pool.
//!
//! Settings are read either from a local YAML/JSON file or from a document in
//! the settings collection shaped `{ name, data: { sources, user_agents } }`.
//! `sources` may be a list of rules or a map of source name to rule; map order
//! is preserved and a rule without a `name` takes its key.
//!
//! ```yaml
//! sources:
//!   QuotesToScrape:
//!     target_url: https://quotes.toscrape.com
//!     crawl_urls: [https://quotes.toscrape.com]
//!     filter: '(?:https|/author/)\S*'
//!     sections: [['//*[@class="quote"]/span/a']]
//! user_agents:
//!   - { enable: true, comment: chrome, value: "Mozilla/5.0 ..." }
//! ```

use crate::error::{Error, Result};
use crate::scrapers::selector;
use regex::Regex;
use scraper::Selector;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, instrument};
use url::Url;

/// Default link filter: hrefs that carry a full https URL.
pub const DEFAULT_LINK_FILTER: &str = r"https\S*";

fn enabled() -> bool {
    true
}

/// Section selectors of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sections {
    /// One selector list per crawl URL, index-aligned with `crawl_urls`.
    PerPage(Vec<Vec<String>>),
    /// One selector list applied to every crawl URL.
    Flat(Vec<String>),
}

/// Declarative extraction recipe for one source, as written in the settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorRule {
    #[serde(default)]
    pub name: String,
    #[serde(default = "enabled")]
    pub enable: bool,
    /// Base URL relative links are resolved against.
    pub target_url: String,
    /// Pages to scrape for this source.
    pub crawl_urls: Vec<String>,
    pub sections: Sections,
    /// Regex marking an href as a full URL; anything else is joined to `target_url`.
    #[serde(default)]
    pub filter: Option<String>,
    /// Class marking sponsored entries.
    #[serde(default)]
    pub sponsored: Option<String>,
    /// Narrowing selector applied inside each section.
    #[serde(default)]
    pub element: Option<String>,
}

/// Ordered collection of selector rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRegistry {
    rules: Vec<SelectorRule>,
}

impl SourceRegistry {
    /// Registry holding `rules` in the given order.
    pub fn new(rules: Vec<SelectorRule>) -> Self {
        Self { rules }
    }

    /// Enabled rules in registry order.
    pub fn enabled(&self) -> impl Iterator<Item = &SelectorRule> {
        self.rules.iter().filter(|rule| rule.enable)
    }

    /// Rule called `name`, enabled or not.
    pub fn get(&self, name: &str) -> Option<&SelectorRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'de> Deserialize<'de> for SourceRegistry {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RegistryVisitor;

        impl<'de> Visitor<'de> for RegistryVisitor {
            type Value = SourceRegistry;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a list of source rules or a map of source name to rule")
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut rules = Vec::new();
                while let Some(rule) = seq.next_element::<SelectorRule>()? {
                    rules.push(rule);
                }
                Ok(SourceRegistry::new(rules))
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut rules = Vec::new();
                while let Some((name, mut rule)) = map.next_entry::<String, SelectorRule>()? {
                    if rule.name.is_empty() {
                        rule.name = name;
                    }
                    rules.push(rule);
                }
                Ok(SourceRegistry::new(rules))
            }
        }

        deserializer.deserialize_any(RegistryVisitor)
    }
}

/// An entry of the user agent pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAgent {
    #[serde(default = "enabled")]
    pub enable: bool,
    #[serde(default)]
    pub comment: String,
    pub value: String,
}

/// Everything a scrape cycle reads from the settings source.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    pub sources: SourceRegistry,
    #[serde(default)]
    pub user_agents: Vec<UserAgent>,
}

impl Settings {
    /// Values of the enabled user agents.
    pub fn user_agents(&self) -> Vec<&str> {
        self.user_agents
            .iter()
            .filter(|ua| ua.enable && !ua.value.trim().is_empty())
            .map(|ua| ua.value.as_str())
            .collect()
    }
}

/// Read settings from a local YAML or JSON file.
///
/// # Arguments
///
/// * `path` - file with the same `{ sources, user_agents }` shape as the
///   `data` field of a settings document
///
/// # Returns
///
/// The parsed [`Settings`], or [`Error::Configuration`] when the file is
/// missing or malformed.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn load_file(path: &Path) -> Result<Settings> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Configuration(format!("cannot read settings file {}: {e}", path.display()))
    })?;
    let settings: Settings = serde_yaml::from_str(&raw).map_err(|e| {
        Error::Configuration(format!("malformed settings file {}: {e}", path.display()))
    })?;
    debug!(sources = settings.sources.len(), "Loaded settings file");
    Ok(settings)
}

/// A compiled section selector, keeping its source text for reporting.
#[derive(Debug, Clone)]
pub struct SectionSelector {
    pub expr: String,
    pub selector: Selector,
}

#[derive(Debug, Clone)]
enum CompiledSections {
    PerPage(Vec<Vec<SectionSelector>>),
    Flat(Vec<SectionSelector>),
}

/// A [`SelectorRule`] with its URLs parsed and selectors compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub target_url: Url,
    pub crawl_urls: Vec<String>,
    pub link_filter: Regex,
    pub element: Option<Selector>,
    pub sponsored: Option<Selector>,
    sections: CompiledSections,
}

impl CompiledRule {
    /// Validate and compile a rule.
    ///
    /// # Arguments
    ///
    /// * `rule` - the rule as read from the settings
    ///
    /// # Returns
    ///
    /// The compiled rule, or [`Error::Configuration`] naming the source when a
    /// URL, selector or filter is invalid.
    pub fn compile(rule: &SelectorRule) -> Result<Self> {
        let invalid = |what: String| Error::Configuration(format!("source `{}`: {what}", rule.name));

        if rule.name.trim().is_empty() {
            return Err(Error::Configuration("source without a name".to_string()));
        }
        let target_url = Url::parse(&rule.target_url)
            .map_err(|e| invalid(format!("invalid target_url `{}`: {e}", rule.target_url)))?;
        if !matches!(target_url.scheme(), "http" | "https") {
            return Err(invalid(format!("target_url `{}` is not http(s)", rule.target_url)));
        }
        if rule.crawl_urls.is_empty() {
            return Err(invalid("no crawl_urls".to_string()));
        }
        for url in &rule.crawl_urls {
            Url::parse(url).map_err(|e| invalid(format!("invalid crawl url `{url}`: {e}")))?;
        }

        let compile_list = |list: &[String]| -> Result<Vec<SectionSelector>> {
            if list.is_empty() {
                return Err(invalid("empty section list".to_string()));
            }
            list.iter()
                .map(|expr| {
                    Ok(SectionSelector {
                        expr: expr.clone(),
                        selector: selector::compile(expr)?,
                    })
                })
                .collect()
        };
        let sections = match &rule.sections {
            Sections::Flat(list) => CompiledSections::Flat(compile_list(list)?),
            Sections::PerPage(pages) => {
                if pages.len() != rule.crawl_urls.len() {
                    return Err(invalid(format!(
                        "{} section lists for {} crawl urls",
                        pages.len(),
                        rule.crawl_urls.len()
                    )));
                }
                CompiledSections::PerPage(
                    pages
                        .iter()
                        .map(|list| compile_list(list))
                        .collect::<Result<_>>()?,
                )
            }
        };

        let filter = rule.filter.as_deref().unwrap_or(DEFAULT_LINK_FILTER);
        let link_filter =
            Regex::new(filter).map_err(|e| invalid(format!("invalid filter `{filter}`: {e}")))?;
        let element = rule.element.as_deref().map(selector::compile).transpose()?;
        let sponsored = rule.sponsored.as_deref().map(selector::compile).transpose()?;

        Ok(Self {
            name: rule.name.clone(),
            target_url,
            crawl_urls: rule.crawl_urls.clone(),
            link_filter,
            element,
            sponsored,
            sections,
        })
    }

    /// Section selectors for the crawl URL at `page`.
    ///
    /// # Arguments
    ///
    /// * `page` - index into `crawl_urls`
    ///
    /// # Returns
    ///
    /// The flat list for every page, or the page's own list. A page past the
    /// end of a per-page list has no selectors.
    pub fn sections_for(&self, page: usize) -> &[SectionSelector] {
        match &self.sections {
            CompiledSections::Flat(list) => list,
            CompiledSections::PerPage(pages) => pages.get(page).map(Vec::as_slice).unwrap_or(&[]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS_YAML: &str = r#"
sources:
  QuotesToScrape:
    target_url: https://quotes.toscrape.com
    crawl_urls: ['https://quotes.toscrape.com']
    filter: '(?:https|/author/)\S*'
    sections: [['//*[@class="quote"]/span/a']]
  WSJ:
    enable: false
    target_url: https://www.wsj.com
    crawl_urls: ['https://www.wsj.com/news/economy']
    element: WSJTheme--headline--7VCzo7Ay
    sections: [style--grid--SxS2So51]
user_agents:
  - { enable: true, comment: chrome, value: "Mozilla/5.0 Chrome" }
  - { enable: false, comment: old, value: "Mozilla/4.0" }
"#;

    #[test]
    fn test_settings_map_form_keeps_order_and_names() {
        let settings: Settings = serde_yaml::from_str(SETTINGS_YAML).unwrap();
        assert_eq!(settings.sources.len(), 2);
        let names: Vec<_> = settings.sources.rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["QuotesToScrape", "WSJ"]);

        let enabled: Vec<_> = settings.sources.enabled().map(|r| r.name.as_str()).collect();
        assert_eq!(enabled, vec!["QuotesToScrape"]);
        assert_eq!(settings.user_agents(), vec!["Mozilla/5.0 Chrome"]);
    }

    #[test]
    fn test_settings_list_form_from_json() {
        let json = r#"{
            "sources": [
                {"name": "Benzinga", "enable": true, "target_url": "https://www.benzinga.com",
                 "crawl_urls": ["https://www.benzinga.com/markets"],
                 "sections": ["top-section-container", "content-feed-list"]}
            ]
        }"#;
        let settings: Settings = serde_yaml::from_str(json).unwrap();
        let rule = settings.sources.get("Benzinga").unwrap();
        assert_eq!(
            rule.sections,
            Sections::Flat(vec![
                "top-section-container".to_string(),
                "content-feed-list".to_string()
            ])
        );
        assert!(settings.user_agents.is_empty());
    }

    #[test]
    fn test_settings_from_bson_document() {
        use mongodb::bson::doc;
        let data = doc! {
            "sources": [{
                "name": "CNBC",
                "target_url": "https://www.cnbc.com",
                "crawl_urls": ["https://www.cnbc.com/business"],
                "sections": ["SectionWrapper-content"],
                "element": "Card-titleAndFooter",
            }],
            "user_agents": [{"enable": true, "comment": "", "value": "UA"}],
        };
        let settings: Settings = mongodb::bson::from_document(data).unwrap();
        assert_eq!(settings.sources.get("CNBC").unwrap().element.as_deref(), Some("Card-titleAndFooter"));
        assert_eq!(settings.user_agents(), vec!["UA"]);
    }

    #[test]
    fn test_compile_rule() {
        let settings: Settings = serde_yaml::from_str(SETTINGS_YAML).unwrap();
        let rule = CompiledRule::compile(settings.sources.get("QuotesToScrape").unwrap()).unwrap();
        assert_eq!(rule.target_url.as_str(), "https://quotes.toscrape.com/");
        assert_eq!(rule.sections_for(0).len(), 1);
        assert!(rule.sections_for(1).is_empty());
        assert!(rule.link_filter.is_match("/author/Jane-Austen"));

        let wsj = CompiledRule::compile(settings.sources.get("WSJ").unwrap()).unwrap();
        assert!(wsj.element.is_some());
        assert_eq!(wsj.sections_for(3).len(), 1);
        assert_eq!(wsj.link_filter.as_str(), DEFAULT_LINK_FILTER);
    }

    #[test]
    fn test_compile_rule_rejects_bad_input() {
        let base = SelectorRule {
            name: "Bad".to_string(),
            enable: true,
            target_url: "https://example.com".to_string(),
            crawl_urls: vec!["https://example.com/news".to_string()],
            sections: Sections::Flat(vec!["headline".to_string()]),
            filter: None,
            sponsored: None,
            element: None,
        };
        assert!(CompiledRule::compile(&base).is_ok());

        let cases = [
            SelectorRule { target_url: "example.com".to_string(), ..base.clone() },
            SelectorRule { crawl_urls: vec![], ..base.clone() },
            SelectorRule { filter: Some("(".to_string()), ..base.clone() },
            SelectorRule { sections: Sections::PerPage(vec![]), ..base.clone() },
            SelectorRule { sections: Sections::Flat(vec!["//a/@href".to_string()]), ..base.clone() },
        ];
        for rule in cases {
            assert!(matches!(CompiledRule::compile(&rule), Err(Error::Configuration(_))), "{rule:?}");
        }
    }
}
