//! Selector notations accepted in source rules.
//!
//! Registries written for different generations of the bot describe sections
//! in three ways, all compiled down to a [`scraper::Selector`]:
//!
//! | Notation | Example | Compiled CSS |
//! |----------|---------|--------------|
//! | Bare class names | `quote`, `card card--lite` | `.quote`, `.card.card--lite` |
//! | XPath location path | `//*[@class="quote"]/span/a` | `*[class="quote"] > span > a` |
//! | CSS | `css:div.quote > a`, `div.quote > a` | used verbatim |
//!
//! Only the XPath subset that maps one-to-one onto CSS is supported: the `/`
//! and `//` axes, `*` and element names, and the predicates `[@a]`,
//! `[@a="v"]`, `[contains(@a,"v")]`, `[starts-with(@a,"v")]`, `[n]`,
//! `[last()]`, joined with `and`. Unions (`|`) become selector lists.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Selector;

static IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?[A-Za-z_][\w-]*$").unwrap());
static NODE_TEST: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\*|[A-Za-z_][\w-]*)").unwrap());
static ATTR_PRESENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^@([\w-]+)$").unwrap());
static ATTR_EQ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^@([\w-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')$"#).unwrap()
});
static ATTR_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(contains|starts-with)\(\s*@([\w-]+)\s*,\s*(?:"([^"]*)"|'([^']*)')\s*\)$"#)
        .unwrap()
});
static POSITION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

/// Compile a rule selector in any supported notation.
pub fn compile(expr: &str) -> Result<Selector> {
    let css = to_css(expr)?;
    Selector::parse(&css).map_err(|e| {
        Error::Configuration(format!("invalid selector `{expr}` (as CSS `{css}`): {e:?}"))
    })
}

/// Translate a rule selector to CSS without parsing it.
pub fn to_css(expr: &str) -> Result<String> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(Error::Configuration("empty selector".to_string()));
    }
    if let Some(css) = expr.strip_prefix("css:") {
        return Ok(css.trim().to_string());
    }
    if let Some(path) = expr.strip_prefix("xpath:") {
        return xpath_to_css(path.trim());
    }
    if expr.starts_with('/') {
        return xpath_to_css(expr);
    }
    if expr.split_whitespace().all(|token| IDENT.is_match(token)) {
        return Ok(expr
            .split_whitespace()
            .map(|class| format!(".{class}"))
            .collect());
    }
    Ok(expr.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

/// Translate an XPath location path (or a `|` union of them) to CSS.
pub fn xpath_to_css(path: &str) -> Result<String> {
    let alternatives = split_top_level(path, '|');
    let css: Result<Vec<String>> = alternatives
        .into_iter()
        .map(|alt| translate_path(alt.trim(), path))
        .collect();
    Ok(css?.join(", "))
}

fn translate_path(path: &str, original: &str) -> Result<String> {
    let unsupported = |what: &str| {
        Error::Configuration(format!("unsupported XPath `{original}`: {what}"))
    };

    let steps = path_steps(path).map_err(|what| unsupported(&what))?;
    if steps.is_empty() {
        return Err(unsupported("empty path"));
    }

    let mut css = String::new();
    for (i, (axis, step)) in steps.iter().enumerate() {
        let mut compound = translate_step(step).map_err(|what| unsupported(&what))?;
        if i == 0 {
            if *axis == Axis::Child {
                compound.push_str(":root");
            }
        } else {
            css.push_str(match axis {
                Axis::Child => " > ",
                Axis::Descendant => " ",
            });
        }
        css.push_str(&compound);
    }
    Ok(css)
}

/// Split a path into `(axis, step)` pairs, honouring quotes and brackets.
fn path_steps(path: &str) -> std::result::Result<Vec<(Axis, &str)>, String> {
    let mut steps = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut axis = Axis::Descendant;
    let mut start = 0usize;
    let mut chars = path.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, '/') if depth == 0 => {
                if i > start {
                    steps.push((axis, &path[start..i]));
                } else if !steps.is_empty() {
                    return Err("empty step".to_string());
                }
                axis = Axis::Child;
                if let Some((_, '/')) = chars.peek() {
                    chars.next();
                    axis = Axis::Descendant;
                }
                start = i + c.len_utf8() + if axis == Axis::Descendant { 1 } else { 0 };
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return Err("unbalanced quotes or brackets".to_string());
    }
    if start >= path.len() {
        return Err("path ends with a separator".to_string());
    }
    steps.push((axis, &path[start..]));
    Ok(steps)
}

fn translate_step(step: &str) -> std::result::Result<String, String> {
    let step = step.trim();
    if step.contains("::") || step.starts_with('.') || step.starts_with('@') {
        return Err(format!("step `{step}` is not an element test"));
    }
    let name = NODE_TEST
        .find(step)
        .ok_or_else(|| format!("step `{step}` has no node test"))?
        .as_str();

    let mut css = name.to_string();
    let mut rest = &step[name.len()..];
    while !rest.is_empty() {
        let inner_end = predicate_end(rest).ok_or_else(|| format!("malformed predicate in `{step}`"))?;
        let predicate = &rest[1..inner_end];
        for clause in split_and(predicate) {
            css.push_str(&translate_predicate(clause.trim(), name == "*")?);
        }
        rest = &rest[inner_end + 1..];
    }
    Ok(css)
}

/// Byte index of the `]` closing the predicate that starts `s`.
fn predicate_end(s: &str) -> Option<usize> {
    if !s.starts_with('[') {
        return None;
    }
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn translate_predicate(clause: &str, any_element: bool) -> std::result::Result<String, String> {
    if POSITION.is_match(clause) {
        let n: usize = clause.parse().map_err(|_| format!("bad position `{clause}`"))?;
        return Ok(if any_element {
            format!(":nth-child({n})")
        } else {
            format!(":nth-of-type({n})")
        });
    }
    if clause == "last()" {
        return Ok(if any_element { ":last-child" } else { ":last-of-type" }.to_string());
    }
    if let Some(caps) = ATTR_PRESENT.captures(clause) {
        return Ok(format!("[{}]", &caps[1]));
    }
    if let Some(caps) = ATTR_EQ.captures(clause) {
        let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        return Ok(format!("[{}=\"{}\"]", &caps[1], escape_value(value)));
    }
    if let Some(caps) = ATTR_FN.captures(clause) {
        let op = if &caps[1] == "contains" { "*=" } else { "^=" };
        let value = caps.get(3).or_else(|| caps.get(4)).map_or("", |m| m.as_str());
        return Ok(format!("[{}{op}\"{}\"]", &caps[2], escape_value(value)));
    }
    Err(format!("predicate `[{clause}]` is not supported"))
}

fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Split on `sep` outside quotes, brackets and parentheses.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, c) if c == sep && depth == 0 => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Split a predicate body on the `and` keyword outside quotes.
fn split_and(predicate: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    let bytes = predicate.as_bytes();
    for (i, c) in predicate.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, ' ') if bytes[i..].starts_with(b" and ") => {
                parts.push(&predicate[start..i]);
                start = i + " and ".len();
            }
            _ => {}
        }
    }
    parts.push(&predicate[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_class_names() {
        assert_eq!(to_css("quote").unwrap(), ".quote");
        assert_eq!(to_css("styles_info__E4gXL").unwrap(), ".styles_info__E4gXL");
        assert_eq!(
            to_css("component component--layout layout--D2").unwrap(),
            ".component.component--layout.layout--D2"
        );
    }

    #[test]
    fn test_css_passthrough() {
        assert_eq!(to_css("div.quote > span a").unwrap(), "div.quote > span a");
        assert_eq!(to_css("css:article").unwrap(), "article");
    }

    #[test]
    fn test_xpath_class_path() {
        assert_eq!(
            to_css(r#"//*[@class="quote"]/span/a"#).unwrap(),
            r#"*[class="quote"] > span > a"#
        );
    }

    #[test]
    fn test_xpath_descendant_and_position() {
        assert_eq!(
            to_css("//div[contains(@class, 'story')]//h3[1]/a").unwrap(),
            r#"div[class*="story"] h3:nth-of-type(1) > a"#
        );
        assert_eq!(to_css("//ul/*[2]").unwrap(), "ul > *:nth-child(2)");
        assert_eq!(to_css("//li[last()]").unwrap(), "li:last-of-type");
    }

    #[test]
    fn test_xpath_absolute_and_union() {
        assert_eq!(to_css("/html/body/div").unwrap(), "html:root > body > div");
        assert_eq!(
            to_css(r#"//a[@data-component="headline"] | //h2/a"#).unwrap(),
            r#"a[data-component="headline"], h2 > a"#
        );
    }

    #[test]
    fn test_xpath_conjunction_and_prefix() {
        assert_eq!(
            to_css(r#"xpath://a[starts-with(@href, "/news/") and @title]"#).unwrap(),
            r#"a[href^="/news/"][title]"#
        );
    }

    #[test]
    fn test_xpath_slash_inside_predicate() {
        assert_eq!(
            to_css(r#"//a[contains(@href, "/author/")]"#).unwrap(),
            r#"a[href*="/author/"]"#
        );
    }

    #[test]
    fn test_unsupported_xpath_is_configuration_error() {
        for expr in ["//a/@href", "//div/text()", "//a/..", "//div[", "//div/"] {
            let err = to_css(expr).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{expr}");
        }
    }

    #[test]
    fn test_compile_selectors() {
        assert!(compile("quote").is_ok());
        assert!(compile(r#"//*[@class="quote"]/span/a"#).is_ok());
        assert!(compile("").is_err());
        assert!(compile("div[").is_err());
    }
}
