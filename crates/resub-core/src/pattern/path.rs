//! Filename extraction from request URLs.

/// Last path segment of `url` (query and fragment dropped).
///
/// Falls back to the text after the last `/` when the URL does not parse.
pub fn file_name_from_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        return parsed
            .path()
            .rsplit('/')
            .next()
            .unwrap_or("")
            .to_string();
    }
    url.rsplit('/').next().unwrap_or(url).to_string()
}
