use std::time::Duration;

use crate::config::LiveReloadConfig;

/// Connection lifecycle of a live-reload subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Reconnecting,
    /// Retry budget used up; no further connections.
    Exhausted,
    /// Torn down by the caller.
    Disconnected,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Exhausted | ConnectionState::Disconnected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Fixed-delay reconnect policy with a hard cap on retries.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &LiveReloadConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            delay: cfg.retry_interval(),
        }
    }

    /// Decide after a closure, given how many retries were already made.
    pub fn decide(&self, retries_so_far: u32) -> ReconnectDecision {
        if retries_so_far >= self.max_retries {
            ReconnectDecision::GiveUp
        } else {
            ReconnectDecision::RetryAfter(self.delay)
        }
    }
}
