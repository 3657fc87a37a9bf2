//! Page extraction: turn a parsed source page into [`ArticleRecord`]s.
//!
//! An [`Extractor`] lives for one pass over a source. It remembers every link
//! it has produced so a story that appears on two crawl pages (or twice on the
//! same page) yields a single record.

use crate::error::Error;
use crate::models::ArticleRecord;
use crate::registry::CompiledRule;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};
use url::Url;

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));

/// What one page yielded.
#[derive(Debug, Default)]
pub struct PageExtraction {
    /// New records, in document order.
    pub records: Vec<ArticleRecord>,
    /// Section selectors that matched no node on the page.
    pub empty_selectors: Vec<String>,
    /// Matched nodes dropped because they had no usable link.
    pub skipped_nodes: usize,
}

impl PageExtraction {
    /// Every section selector came back empty.
    pub fn is_no_data(&self) -> bool {
        self.records.is_empty() && !self.empty_selectors.is_empty()
    }

    /// One [`Error::NoData`] per empty selector, for logging and issue records.
    pub fn no_data_errors<'a>(&'a self, url: &'a str) -> impl Iterator<Item = Error> + 'a {
        self.empty_selectors.iter().map(move |selector| Error::NoData {
            url: url.to_string(),
            selector: selector.clone(),
        })
    }
}

/// Stateful link extractor for a single source pass.
#[derive(Debug)]
pub struct Extractor<'r> {
    rule: &'r CompiledRule,
    seen: HashSet<String>,
}

impl<'r> Extractor<'r> {
    /// Start a pass over the source described by `rule`.
    pub fn new(rule: &'r CompiledRule) -> Self {
        Self {
            rule,
            seen: HashSet::new(),
        }
    }

    /// Extract records from the crawl page at index `page`, stamped with the current time.
    pub fn extract(&mut self, document: &Html, page: usize) -> PageExtraction {
        self.extract_at(document, page, Utc::now())
    }

    /// [`Extractor::extract`] with an explicit timestamp.
    ///
    /// # Arguments
    ///
    /// * `document` - the parsed crawl page
    /// * `page` - index of the page in `crawl_urls`, selecting its sections
    /// * `now` - `created_at` and `checked_at` of every new record
    ///
    /// # Returns
    ///
    /// Records not produced earlier in this pass, plus empty selectors and the
    /// number of nodes skipped for lack of a usable link.
    #[instrument(level = "debug", skip(self, document, now), fields(source = %self.rule.name))]
    pub fn extract_at(&mut self, document: &Html, page: usize, now: DateTime<Utc>) -> PageExtraction {
        let rule = self.rule;
        let mut out = PageExtraction::default();

        for section in rule.sections_for(page) {
            let mut matched = 0usize;
            for node in document.select(&section.selector) {
                let nodes: Vec<ElementRef> = match &rule.element {
                    Some(element) => node.select(element).collect(),
                    None => vec![node],
                };
                for node in nodes {
                    matched += 1;
                    if self.is_sponsored(node) {
                        debug!(selector = %section.expr, "Skipping sponsored entry");
                        continue;
                    }
                    let Some(href) = self.candidate_href(node) else {
                        out.skipped_nodes += 1;
                        continue;
                    };
                    let Some(link) = resolve_link(&rule.target_url, &rule.link_filter, href) else {
                        warn!(href, selector = %section.expr, "Skipping unresolvable link");
                        out.skipped_nodes += 1;
                        continue;
                    };
                    if self.seen.insert(link.clone()) {
                        out.records.push(ArticleRecord::new(&rule.name, &link, now));
                    }
                }
            }
            if matched == 0 {
                warn!(selector = %section.expr, page, "Section selector matched nothing");
                out.empty_selectors.push(section.expr.clone());
            }
        }

        debug!(
            records = out.records.len(),
            skipped = out.skipped_nodes,
            "Extracted page"
        );
        out
    }

    fn is_sponsored(&self, node: ElementRef) -> bool {
        match &self.rule.sponsored {
            Some(sponsored) => sponsored.matches(&node) || node.select(sponsored).next().is_some(),
            None => false,
        }
    }

    /// The node's own href when it is an anchor, else the href of its first
    /// descendant anchor, else the node's own href.
    fn candidate_href<'a>(&self, node: ElementRef<'a>) -> Option<&'a str> {
        let own = node.value().attr("href").map(str::trim).filter(|h| !h.is_empty());
        if node.value().name() == "a" {
            return own;
        }
        match node.select(&ANCHOR).next() {
            Some(anchor) => anchor.value().attr("href").map(str::trim).filter(|h| !h.is_empty()),
            None => own,
        }
    }
}

/// Turn an extracted href into an absolute link.
///
/// # Arguments
///
/// * `base` - the source's `target_url`
/// * `filter` - the rule's link filter; a matching href is taken as a full URL
/// * `href` - the raw attribute value
///
/// # Returns
///
/// A matching absolute http(s) href verbatim, anything else joined against
/// `base`. Other schemes (`javascript:`, `mailto:`) yield `None`.
pub fn resolve_link(base: &Url, filter: &Regex, href: &str) -> Option<String> {
    let is_web = |url: &Url| matches!(url.scheme(), "http" | "https");
    if filter.is_match(href) {
        if let Ok(url) = Url::parse(href) {
            return is_web(&url).then(|| href.to_string());
        }
    }
    base.join(href).ok().filter(is_web).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Sections, SelectorRule};

    const QUOTES: &str = include_str!("../../tests/fixtures/quotes.html");

    const AUTHORS: [&str; 8] = [
        "https://quotes.toscrape.com/author/Albert-Einstein",
        "https://quotes.toscrape.com/author/J-K-Rowling",
        "https://quotes.toscrape.com/author/Jane-Austen",
        "https://quotes.toscrape.com/author/Marilyn-Monroe",
        "https://quotes.toscrape.com/author/Andre-Gide",
        "https://quotes.toscrape.com/author/Thomas-A-Edison",
        "https://quotes.toscrape.com/author/Eleanor-Roosevelt",
        "https://quotes.toscrape.com/author/Steve-Martin",
    ];

    fn rule(sections: Sections, filter: Option<&str>) -> SelectorRule {
        SelectorRule {
            name: "QuotesToScrape".to_string(),
            enable: true,
            target_url: "https://quotes.toscrape.com".to_string(),
            crawl_urls: vec!["https://quotes.toscrape.com".to_string()],
            sections,
            filter: filter.map(String::from),
            sponsored: None,
            element: None,
        }
    }

    fn links(extraction: &PageExtraction) -> Vec<&str> {
        extraction.records.iter().map(|r| r.link.as_str()).collect()
    }

    #[test]
    fn test_quotes_class_section_with_author_filter() {
        let compiled =
            CompiledRule::compile(&rule(Sections::Flat(vec!["quote".into()]), Some("/author/"))).unwrap();
        let document = Html::parse_document(QUOTES);
        let out = Extractor::new(&compiled).extract(&document, 0);

        assert_eq!(links(&out), AUTHORS);
        assert!(out.empty_selectors.is_empty());
        assert!(!out.is_no_data());
        for record in &out.records {
            assert!(record.link.starts_with("https://"));
            assert_eq!(record.source_name, "QuotesToScrape");
            assert!(record.title.is_empty());
        }
    }

    #[test]
    fn test_quotes_xpath_section_selects_anchors() {
        let compiled = CompiledRule::compile(&rule(
            Sections::PerPage(vec![vec![r#"//*[@class="quote"]/span/a"#.into()]]),
            Some(r"(?:https|/author/)\S*"),
        ))
        .unwrap();
        let document = Html::parse_document(QUOTES);
        let out = Extractor::new(&compiled).extract(&document, 0);
        assert_eq!(links(&out), AUTHORS);
    }

    #[test]
    fn test_default_filter_takes_first_anchor() {
        let compiled = CompiledRule::compile(&rule(Sections::Flat(vec!["quote".into()]), None)).unwrap();
        let document = Html::parse_document(QUOTES);
        let out = Extractor::new(&compiled).extract(&document, 0);
        // the author link is the first anchor of every quote
        assert_eq!(links(&out), AUTHORS);
    }

    #[test]
    fn test_seen_links_persist_across_pages() {
        let compiled =
            CompiledRule::compile(&rule(Sections::Flat(vec!["quote".into()]), Some("/author/"))).unwrap();
        let document = Html::parse_document(QUOTES);
        let mut extractor = Extractor::new(&compiled);
        assert_eq!(extractor.extract(&document, 0).records.len(), 8);
        let second = extractor.extract(&document, 0);
        assert!(second.records.is_empty());
        assert!(!second.is_no_data());
    }

    #[test]
    fn test_empty_selector_reports_no_data() {
        let compiled = CompiledRule::compile(&rule(
            Sections::Flat(vec!["missing-section".into(), "quote".into()]),
            Some("/author/"),
        ))
        .unwrap();
        let document = Html::parse_document(QUOTES);
        let out = Extractor::new(&compiled).extract(&document, 0);
        assert_eq!(out.records.len(), 8);
        assert_eq!(out.empty_selectors, vec!["missing-section".to_string()]);
        assert!(!out.is_no_data());

        let errors: Vec<_> = out.no_data_errors("https://quotes.toscrape.com").collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("missing-section"));
    }

    #[test]
    fn test_sponsored_and_element_narrowing() {
        let html = r#"
            <div class="feed">
              <article class="card"><a href="/markets/one">One</a></article>
              <article class="card"><span class="sponsored">Ad</span><a href="https://ads.example.com/x">Ad</a></article>
              <article class="card promo"><a href="/markets/two">Two</a></article>
              <article class="card"><a href="javascript:void(0)">Broken</a></article>
              <article class="card"><a href="https://www.example.com/markets/three">Three</a></article>
              <article class="card"><a href="/markets/one">One again</a></article>
            </div>"#;
        let mut raw = rule(Sections::Flat(vec!["feed".into()]), None);
        raw.target_url = "https://www.example.com".to_string();
        raw.element = Some("card".to_string());
        raw.sponsored = Some("css:.sponsored, .promo".to_string());
        let compiled = CompiledRule::compile(&raw).unwrap();

        let out = Extractor::new(&compiled).extract(&Html::parse_document(html), 0);
        assert_eq!(
            links(&out),
            vec![
                "https://www.example.com/markets/one",
                "https://www.example.com/markets/three"
            ]
        );
        assert_eq!(out.skipped_nodes, 1);
    }

    #[test]
    fn test_first_anchor_wins_over_absolute_share_link() {
        let html = r#"
            <div class="feed">
              <article class="card">
                <a href="/markets/story">Stocks rally</a>
                <a href="https://twitter.com/share">Share</a>
              </article>
            </div>"#;
        let mut raw = rule(Sections::Flat(vec!["card".into()]), None);
        raw.target_url = "https://www.example.com".to_string();
        let compiled = CompiledRule::compile(&raw).unwrap();

        let out = Extractor::new(&compiled).extract(&Html::parse_document(html), 0);
        assert_eq!(links(&out), vec!["https://www.example.com/markets/story"]);
    }

    #[test]
    fn test_resolve_link() {
        let base = Url::parse("https://www.cnbc.com").unwrap();
        let https = Regex::new(crate::registry::DEFAULT_LINK_FILTER).unwrap();
        assert_eq!(
            resolve_link(&base, &https, "/2025/05/06/story.html").as_deref(),
            Some("https://www.cnbc.com/2025/05/06/story.html")
        );
        assert_eq!(
            resolve_link(&base, &https, "https://www.cnbc.com/x").as_deref(),
            Some("https://www.cnbc.com/x")
        );
        assert_eq!(
            resolve_link(&base, &https, "//cdn.cnbc.com/a").as_deref(),
            Some("https://cdn.cnbc.com/a")
        );
        assert_eq!(resolve_link(&base, &https, "mailto:news@cnbc.com"), None);

        // a matching href that is not a full URL is still resolved
        let author = Regex::new("/author/").unwrap();
        assert_eq!(
            resolve_link(&base, &author, "/author/Jane-Austen").as_deref(),
            Some("https://www.cnbc.com/author/Jane-Austen")
        );
    }
}
