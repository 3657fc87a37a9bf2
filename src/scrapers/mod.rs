//! Settings-driven extraction.
//!
//! There are no per-site scrapers: every source is a [`crate::registry::SelectorRule`]
//! and one engine handles them all.
//!
//! | Module | Role |
//! |--------|------|
//! | [`selector`] | Compile class, CSS and XPath selector strings |
//! | [`links`] | Walk matched sections of a page and produce article records |
//! | [`unfurl`] | Title and description from Twitter card, Open Graph or meta tags |

pub mod links;
pub mod selector;
pub mod unfurl;
