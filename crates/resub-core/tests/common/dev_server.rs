//! Minimal dev server for integration tests: `/sse` streams reload events,
//! every other path serves a static asset.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone, Default)]
struct Shared {
    assets: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    /// `None` closes the stream.
    streams: Arc<Mutex<Vec<mpsc::Sender<Option<String>>>>>,
    sse_connections: Arc<AtomicUsize>,
}

pub struct DevServer {
    /// e.g. "http://127.0.0.1:12345" (no trailing slash).
    pub base_url: String,
    shared: Shared,
}

impl DevServer {
    /// Starts the server on a background thread; it runs until the process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let shared = Shared::default();
        let accept = shared.clone();
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let shared = accept.clone();
                thread::spawn(move || handle(stream, &shared));
            }
        });
        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            shared,
        }
    }

    pub fn set_asset(&self, name: &str, body: &[u8]) {
        self.shared
            .assets
            .lock()
            .unwrap()
            .insert(format!("/{}", name), body.to_vec());
    }

    /// Send `{"event":"change","filePath":...}` to every open stream.
    pub fn push_change(&self, file_path: &str) {
        let data = format!(r#"{{"event":"change","filePath":"{}"}}"#, file_path);
        self.broadcast(Some(data));
    }

    pub fn push_raw(&self, data: &str) {
        self.broadcast(Some(data.to_string()));
    }

    /// Close every open stream (simulates a dev server restart).
    pub fn close_streams(&self) {
        self.broadcast(None);
    }

    fn broadcast(&self, msg: Option<String>) {
        let mut streams = self.shared.streams.lock().unwrap();
        streams.retain(|tx| tx.send(msg.clone()).is_ok());
        if msg.is_none() {
            streams.clear();
        }
    }

    pub fn sse_connections(&self) -> usize {
        self.shared.sse_connections.load(Ordering::SeqCst)
    }
}

fn handle(mut stream: TcpStream, shared: &Shared) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    if path == "/sse" {
        serve_events(stream, shared);
        return;
    }
    let body = shared.assets.lock().unwrap().get(&path).cloned();
    match body {
        Some(body) => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        }
        None => {
            let _ = stream.write_all(
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
        }
    }
}

fn serve_events(mut stream: TcpStream, shared: &Shared) {
    let (tx, rx) = mpsc::channel();
    shared.streams.lock().unwrap().push(tx);
    shared.sse_connections.fetch_add(1, Ordering::SeqCst);
    let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }
    loop {
        let chunk = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Some(data)) => format!("data: {}\n\n", data),
            Ok(None) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => ": ping\n\n".to_string(),
        };
        if stream.write_all(chunk.as_bytes()).is_err() {
            return;
        }
    }
}
