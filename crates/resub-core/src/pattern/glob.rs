//! Glob to regex translation.

use regex_lite::Regex;

use super::PatternError;

/// Compile a glob into a regex anchored at both ends. Every regex
/// metacharacter is escaped before `*` is widened to `.*`.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, PatternError> {
    let translated = pattern
        .split('*')
        .map(regex_lite::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{translated}$")).map_err(|e| PatternError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}
