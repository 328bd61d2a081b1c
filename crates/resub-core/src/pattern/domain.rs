//! Hostname extraction from URL patterns (used to scope rules).

use super::PatternError;

/// Hostname of a URL pattern.
///
/// Strips one trailing `*` and one trailing `/`, then parses as a URL. If that
/// fails, falls back to dropping an `http(s)://` prefix and taking everything
/// before the first `/`; a host that is all wildcards counts as none. Callers
/// treat an error as "no domain constraint".
pub fn extract_domain(pattern: &str) -> Result<String, PatternError> {
    let mut base = pattern;
    if let Some(s) = base.strip_suffix('*') {
        base = s;
    }
    if let Some(s) = base.strip_suffix('/') {
        base = s;
    }

    if let Ok(parsed) = url::Url::parse(base) {
        if let Some(host) = parsed.host_str() {
            if !host.is_empty() {
                return Ok(host.to_string());
            }
        }
    }

    let without_scheme = pattern
        .strip_prefix("https://")
        .or_else(|| pattern.strip_prefix("http://"))
        .unwrap_or(pattern);
    let host = without_scheme.split('/').next().unwrap_or("");
    if host.is_empty() || host.chars().all(|c| c == '*') {
        return Err(PatternError::NoHost(pattern.to_string()));
    }
    Ok(host.to_string())
}
