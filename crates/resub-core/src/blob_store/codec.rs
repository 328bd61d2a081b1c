//! Text encoding of stored payloads (base64 and data URLs).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// MIME type used when a stored file is turned back into a data URL.
pub fn mime_for(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".js") || lower.ends_with(".mjs") {
        "application/javascript"
    } else if lower.ends_with(".css") {
        "text/css"
    } else if lower.ends_with(".json") {
        "application/json"
    } else if lower.ends_with(".html") {
        "text/html"
    } else {
        "application/octet-stream"
    }
}

pub fn encode_data_url(mime: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(data))
}

/// Decode a base64 payload. Accepts a bare base64 string or a `data:` URL.
pub fn decode_payload(s: &str) -> Result<Vec<u8>, String> {
    let b64 = if s.starts_with("data:") {
        match s.split_once(',') {
            Some((header, body)) if header.ends_with(";base64") => body,
            Some(_) => return Err("data URL is not base64-encoded".to_string()),
            None => return Err("data URL has no payload separator".to_string()),
        }
    } else {
        s
    };
    STANDARD.decode(b64.as_bytes()).map_err(|e| e.to_string())
}

pub fn encode_chunk(data: &[u8]) -> String {
    STANDARD.encode(data)
}
