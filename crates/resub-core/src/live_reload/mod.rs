//! Live reload of dev-server packages over a server-sent event stream.
//!
//! A subscription connects to `{devUrl}/sse`, re-fetches the affected asset on
//! every `change` message and injects it into the page. Each time the stream
//! opens, the main script and stylesheet are refreshed so changes made while
//! disconnected are picked up. Reconnects use a fixed delay and stop for good
//! once the retry budget is spent.

mod client;
mod sse;
mod state;
mod transport;

pub use client::{asset_for_change, LiveReloadClient, Subscription};
pub use sse::{ReloadMessage, SseParser};
pub use state::{ConnectionState, ReconnectDecision, ReconnectPolicy};
pub use transport::{CurlEventSource, EventSource, ScriptedEventSource, StreamEvent};

use thiserror::Error;

use crate::fetch::FetchError;
use crate::inject::InjectError;

#[derive(Debug, Error)]
pub enum LiveReloadError {
    #[error("event stream: {0}")]
    Transport(String),
    #[error("malformed reload message: {0}")]
    Parse(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Inject(#[from] InjectError),
}
