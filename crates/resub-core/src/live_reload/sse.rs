//! Server-sent event framing and the dev server's message payload.

use serde::Deserialize;

use super::LiveReloadError;

/// Incremental `text/event-stream` parser. Feed raw bytes; complete events'
/// `data` fields come out joined with `\n`.
#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        for &b in bytes {
            if b != b'\n' {
                self.line.push(b);
                continue;
            }
            if self.line.last() == Some(&b'\r') {
                self.line.pop();
            }
            let line = String::from_utf8_lossy(&self.line).into_owned();
            self.line.clear();
            if line.is_empty() {
                if !self.data.is_empty() {
                    out.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
            // Comments, `event:`, `id:` and `retry:` lines are ignored.
        }
        out
    }
}

/// `{event, filePath}` as pushed by the dev server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadMessage {
    pub event: String,
    pub file_path: String,
}

impl ReloadMessage {
    pub fn parse(data: &str) -> Result<Self, LiveReloadError> {
        serde_json::from_str(data).map_err(|e| LiveReloadError::Parse(format!("{}: {}", e, data)))
    }

    pub fn is_change(&self) -> bool {
        self.event == "change"
    }
}
