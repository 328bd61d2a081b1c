//! Wildcard URL and domain matching.
//!
//! Patterns are globs: `*` matches any substring, every other character is
//! literal. A pattern must cover the whole URL; a list matches if any entry does.

mod domain;
mod glob;
mod path;

pub use domain::extract_domain;
pub use glob::glob_to_regex;
pub use path::file_name_from_url;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    /// Pattern could not be compiled into a matcher.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    /// No hostname could be derived from the pattern.
    #[error("no host in pattern {0:?}")]
    NoHost(String),
}

/// True when `url` matches any pattern. An empty list never matches; a pattern
/// that fails to compile is skipped.
pub fn matches(url: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| match glob_to_regex(p) {
        Ok(re) => re.is_match(url),
        Err(e) => {
            tracing::warn!("skipping pattern: {}", e);
            false
        }
    })
}
