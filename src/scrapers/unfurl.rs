//! Article metadata ("unfurl") from meta tags.
//!
//! Three groups are tried in order, stopping as soon as both a title and a
//! description are known: Twitter card, Open Graph, then plain `<meta>` tags
//! with `<title>` as the last resort. Later groups only fill gaps left by
//! earlier ones.

use crate::error::Result;
use crate::fetch::PageSource;
use crate::models::{PageMetadata, UnfurlMethod};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, instrument};

/// Something that can produce [`PageMetadata`] for a link.
pub trait MetadataSource {
    async fn metadata(&self, url: &str) -> Result<PageMetadata>;
}

struct Group {
    method: UnfurlMethod,
    title: Selector,
    description: Selector,
    site: Option<Selector>,
}

fn css(expr: &str) -> Selector {
    Selector::parse(expr).expect("static selector")
}

static GROUPS: Lazy<[Group; 3]> = Lazy::new(|| {
    [
        Group {
            method: UnfurlMethod::TwitterCard,
            title: css(r#"meta[name="twitter:title"]"#),
            description: css(r#"meta[name="twitter:description"]"#),
            site: Some(css(r#"meta[name="twitter:site"]"#)),
        },
        Group {
            method: UnfurlMethod::OpenGraph,
            title: css(r#"meta[property="og:title"]"#),
            description: css(r#"meta[property="og:description"]"#),
            site: Some(css(r#"meta[property="og:site_name"]"#)),
        },
        Group {
            method: UnfurlMethod::MetaTags,
            title: css(r#"meta[name="title"]"#),
            description: css(r#"meta[name="description"]"#),
            site: None,
        },
    ]
});

static TITLE: Lazy<Selector> = Lazy::new(|| css("title"));

/// First non-blank `content` among the tags matching `selector`.
fn content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Fix the mojibake apostrophe some sites emit and normalise non-breaking spaces.
pub fn clear_string(s: &str) -> String {
    s.replace("â€™", "'").replace('\u{a0}', " ").trim().to_string()
}

/// Extract metadata from an already fetched page. `url` is the final page URL.
pub fn unfurl_html(html: &str, url: &str) -> PageMetadata {
    let document = Html::parse_document(html);
    let mut title: Option<String> = None;
    let mut description: Option<String> = None;
    let mut site: Option<String> = None;
    let mut method = UnfurlMethod::MetaTags;

    for group in GROUPS.iter() {
        if title.is_none() {
            title = content(&document, &group.title);
        }
        if group.method == UnfurlMethod::MetaTags && title.is_none() {
            title = document
                .select(&TITLE)
                .next()
                .map(|t| t.text().collect::<String>())
                .filter(|t| !t.trim().is_empty());
        }
        if description.is_none() {
            description = content(&document, &group.description);
        }
        if site.is_none() {
            site = group.site.as_ref().and_then(|s| content(&document, s));
        }
        if title.is_some() && description.is_some() {
            method = group.method;
            break;
        }
    }

    let title = clear_string(title.as_deref().unwrap_or_default());
    PageMetadata {
        method,
        url: url.to_string(),
        site: site.unwrap_or_else(|| title.clone()),
        description: clear_string(description.as_deref().unwrap_or_default()),
        title,
    }
}

/// [`MetadataSource`] that fetches the link with a fixed user agent.
#[derive(Debug)]
pub struct Unfurler<P> {
    source: P,
    user_agent: String,
}

impl<P: PageSource> Unfurler<P> {
    pub fn new(source: P, user_agent: &str) -> Self {
        Self {
            source,
            user_agent: user_agent.to_string(),
        }
    }
}

impl<P: PageSource> MetadataSource for Unfurler<P> {
    #[instrument(level = "debug", skip(self))]
    async fn metadata(&self, url: &str) -> Result<PageMetadata> {
        let page = self.source.fetch(url, &self.user_agent).await?;
        let meta = unfurl_html(&page.body, &page.url);
        debug!(
            method = ?meta.method,
            final_url = %meta.url,
            site = %meta.site,
            title = %meta.title,
            "Unfurled link"
        );
        Ok(meta)
    }
}
