//! Event-stream transports.

use std::cell::Cell;
use std::collections::VecDeque;
use std::str;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use super::sse::SseParser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Response headers accepted; the stream is live.
    Open,
    /// One event's `data` payload.
    Data(String),
    /// The connection ended; the channel closes after this.
    Closed(String),
}

/// Opens server-push streams.
pub trait EventSource: Send + Sync {
    /// Connect to `url`. Dropping the receiver tears the connection down.
    fn open(&self, url: &str) -> mpsc::Receiver<StreamEvent>;
}

/// Streams with libcurl on a dedicated thread.
#[derive(Debug, Clone)]
pub struct CurlEventSource {
    connect_timeout: Duration,
}

impl Default for CurlEventSource {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl CurlEventSource {
    pub fn new() -> Self {
        Self::default()
    }
}

fn status_code(header_line: &str) -> Option<u32> {
    if !header_line.starts_with("HTTP/") {
        return None;
    }
    header_line.split_whitespace().nth(1)?.parse().ok()
}

fn perform_stream(
    easy: &mut curl::easy::Easy,
    status: &Cell<u32>,
    parser: &mut SseParser,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), curl::Error> {
    let mut transfer = easy.transfer();
    transfer.header_function(|data| {
        if let Ok(line) = str::from_utf8(data) {
            if let Some(code) = status_code(line) {
                status.set(code);
            } else if line.trim().is_empty() && (200..300).contains(&status.get()) {
                return tx.blocking_send(StreamEvent::Open).is_ok();
            }
        }
        true
    })?;
    transfer.write_function(|data| {
        if !(200..300).contains(&status.get()) {
            return Ok(data.len());
        }
        for payload in parser.feed(data) {
            if tx.blocking_send(StreamEvent::Data(payload)).is_err() {
                return Ok(0);
            }
        }
        Ok(data.len())
    })?;
    // Idle streams never call the write callback; poll for a dropped receiver here.
    transfer.progress_function(|_, _, _, _| !tx.is_closed())?;
    transfer.perform()
}

fn stream_blocking(url: &str, connect_timeout: Duration, tx: &mpsc::Sender<StreamEvent>) -> String {
    let status = Cell::new(0u32);
    let mut parser = SseParser::new();
    let mut easy = curl::easy::Easy::new();
    let result = (|| -> Result<(), curl::Error> {
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.connect_timeout(connect_timeout)?;
        easy.progress(true)?;
        let mut headers = curl::easy::List::new();
        headers.append("Accept: text/event-stream")?;
        easy.http_headers(headers)?;
        perform_stream(&mut easy, &status, &mut parser, tx)
    })();

    match result {
        Err(e) => e.to_string(),
        Ok(()) if !(200..300).contains(&status.get()) => format!("HTTP {}", status.get()),
        Ok(()) => "stream ended".to_string(),
    }
}

impl EventSource for CurlEventSource {
    fn open(&self, url: &str) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        let url = url.to_string();
        let connect_timeout = self.connect_timeout;
        std::thread::spawn(move || {
            let reason = stream_blocking(&url, connect_timeout, &tx);
            tracing::debug!(url = %url, reason = %reason, "event stream closed");
            let _ = tx.blocking_send(StreamEvent::Closed(reason));
        });
        rx
    }
}

/// Replays canned event sequences, one per `open`. When the scripts run out,
/// every further connection is refused immediately.
#[derive(Debug, Default)]
pub struct ScriptedEventSource {
    scripts: Mutex<VecDeque<(Vec<StreamEvent>, bool)>>,
    held: Mutex<Vec<mpsc::Sender<StreamEvent>>>,
    opens: AtomicUsize,
}

impl ScriptedEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection that emits `events`. With `hold_open` the stream
    /// stays up after the last event instead of ending.
    pub fn push(&self, events: Vec<StreamEvent>, hold_open: bool) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((events, hold_open));
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }
}

impl EventSource for ScriptedEventSource {
    fn open(&self, _url: &str) -> mpsc::Receiver<StreamEvent> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        let (events, hold_open) = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| (vec![StreamEvent::Closed("connection refused".to_string())], false));
        let (tx, rx) = mpsc::channel(events.len() + 1);
        for e in events {
            let _ = tx.try_send(e);
        }
        if hold_open {
            self.held
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(tx);
        }
        rx
    }
}
