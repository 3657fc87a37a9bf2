//! Text formatting for chat announcements and operator reports.

use crate::models::ArticleRecord;
use chrono::{DateTime, Utc};
use itertools::Itertools;

/// Per-source line of the cycle summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub name: String,
    pub new: usize,
    pub parsed: usize,
    pub seconds: f64,
}

/// One `"<title>": <link>` line per record.
pub fn create_message(records: &[ArticleRecord]) -> String {
    records
        .iter()
        .map(|r| format!("\"{}\": {}\n", r.title, r.link))
        .join("")
}

/// Totals line followed by one line per source: `new / parsed` and seconds.
pub fn create_summary(sources: &[SourceSummary]) -> String {
    let new: usize = sources.iter().map(|s| s.new).sum();
    let parsed: usize = sources.iter().map(|s| s.parsed).sum();
    let seconds: f64 = sources.iter().map(|s| s.seconds).sum();

    let mut out = summary_line("Total", new, parsed, seconds);
    for s in sources {
        out.push_str(&summary_line(&format!("- `{}`", s.name), s.new, s.parsed, s.seconds));
    }
    out
}

fn summary_line(label: &str, new: usize, parsed: usize, seconds: f64) -> String {
    format!("{label:<30} {:<15} {seconds:.1}\n", format!("{new} / {parsed}"))
}

/// The code-fenced report posted after each cycle.
///
/// # Arguments
///
/// * `header` - `Cycle #N` or `Single run`
/// * `finished_at` - printed as `%Y-%m-%d %H:%M:%S` UTC
/// * `seconds` - cycle duration
/// * `summary` - output of [`create_summary`]
pub fn cycle_report(header: &str, finished_at: DateTime<Utc>, seconds: f64, summary: &str) -> String {
    format!(
        "```{header} ({}) finished in {seconds:.1} seconds\n\n{summary}```",
        finished_at.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Cut `text` to at most `max_chars` characters, ending in `...` when cut.
pub fn cut_with_ellipsis(text: &str, max_chars: usize) -> String {
    const ELLIPSIS: &str = "...";
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_create_message() {
        let now = Utc::now();
        let mut a = ArticleRecord::new("CNBC", "https://www.cnbc.com/a", now);
        a.title = "Stocks rally".to_string();
        let mut b = ArticleRecord::new("CNBC", "https://www.cnbc.com/b", now);
        b.title = "Bonds slip".to_string();
        assert_eq!(
            create_message(&[a, b]),
            "\"Stocks rally\": https://www.cnbc.com/a\n\"Bonds slip\": https://www.cnbc.com/b\n"
        );
        assert_eq!(create_message(&[]), "");
    }

    #[test]
    fn test_create_summary() {
        let summary = create_summary(&[
            SourceSummary { name: "CNBC".into(), new: 2, parsed: 40, seconds: 3.24 },
            SourceSummary { name: "WSJ".into(), new: 0, parsed: 12, seconds: 1.0 },
        ]);
        let lines: Vec<_> = summary.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], format!("{:<30} {:<15} 4.2", "Total", "2 / 52"));
        assert_eq!(lines[1], format!("{:<30} {:<15} 3.2", "- `CNBC`", "2 / 40"));
        assert_eq!(lines[2], format!("{:<30} {:<15} 1.0", "- `WSJ`", "0 / 12"));
    }

    #[test]
    fn test_cycle_report() {
        let at = Utc.with_ymd_and_hms(2025, 5, 6, 14, 30, 0).unwrap();
        assert_eq!(
            cycle_report("Cycle #3", at, 12.34, "Total\n"),
            "```Cycle #3 (2025-05-06 14:30:00) finished in 12.3 seconds\n\nTotal\n```"
        );
    }

    #[test]
    fn test_cut_with_ellipsis() {
        let long = "x".repeat(450);
        let cut = cut_with_ellipsis(&long, 300);
        assert_eq!(cut.chars().count(), 300);
        assert!(cut.ends_with("..."));

        let exact = "y".repeat(300);
        assert_eq!(cut_with_ellipsis(&exact, 300), exact);
        assert_eq!(cut_with_ellipsis("short", 300), "short");

        let wide = "é".repeat(301);
        assert_eq!(cut_with_ellipsis(&wide, 300).chars().count(), 300);
    }
}
