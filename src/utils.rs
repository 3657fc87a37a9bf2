//! Small helpers shared by the driver and the notifier.

use crate::fetch::DEFAULT_USER_AGENT;
use rand::{Rng, rng};

/// Pick one of `agents` at random, or the built-in default when there are none.
pub fn pick_user_agent<'a>(agents: &[&'a str]) -> &'a str {
    if agents.is_empty() {
        return DEFAULT_USER_AGENT;
    }
    agents[rng().random_range(0..agents.len())]
}

/// Truncate a string for logging purposes.
///
/// Long strings keep their first `max` characters and get `"…(+N bytes)"`
/// appended, N being the number of bytes cut.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 100), "short");
        assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
        // never splits a multi-byte character
        assert_eq!(truncate_for_log("ééé", 1), "é…(+4 bytes)");
    }

    #[test]
    fn test_pick_user_agent() {
        assert_eq!(pick_user_agent(&[]), DEFAULT_USER_AGENT);
        assert_eq!(pick_user_agent(&["UA"]), "UA");
        let agents = ["A", "B", "C"];
        for _ in 0..20 {
            assert!(agents.contains(&pick_user_agent(&agents)));
        }
    }
}
