use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::sse::ReloadMessage;
use super::state::{ConnectionState, ReconnectDecision, ReconnectPolicy};
use super::transport::{EventSource, StreamEvent};
use super::LiveReloadError;
use crate::fetch::AssetFetcher;
use crate::inject::{split_file_names, PageHandle, ResourceInjector};
use crate::model::{DevConfig, CSS_SUFFIX, UMD_SUFFIX, WORKER_SUFFIX};

/// Dev-server asset to refresh when `file_path` changed:
/// `(file name to inject, suffix appended to the package name in the URL)`.
/// Anything that is not a stylesheet or worker rebuilds the main bundle.
pub fn asset_for_change(package_name: &str, file_path: &str) -> (String, &'static str) {
    let parts = split_file_names(file_path);
    let suffix = if parts.is_css {
        CSS_SUFFIX
    } else if parts.is_worker {
        // `.umd.worker.js`, the same canonical worker name stored packages use.
        WORKER_SUFFIX
    } else {
        UMD_SUFFIX
    };
    (format!("{}{}", package_name, suffix), suffix)
}

struct Shared {
    cancelled: AtomicBool,
    retry_count: AtomicU32,
    reloads: AtomicUsize,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Terminal states are never overwritten.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|s| {
            if s.is_terminal() || *s == next {
                return false;
            }
            *s = next;
            true
        });
    }
}

struct Session {
    shared: Arc<Shared>,
    source: Arc<dyn EventSource>,
    fetcher: Arc<dyn AssetFetcher>,
    injector: ResourceInjector,
    policy: ReconnectPolicy,
    page: Arc<dyn PageHandle>,
    dev: DevConfig,
}

impl Session {
    async fn run(self) {
        let url = self.dev.event_stream_url();
        loop {
            if self.shared.is_cancelled() {
                return;
            }
            self.shared.set_state(ConnectionState::Connecting);
            let mut events = self.source.open(&url);
            let reason = loop {
                match events.recv().await {
                    Some(StreamEvent::Open) => {
                        self.shared.set_state(ConnectionState::Open);
                        tracing::info!(package = %self.dev.package_name, url = %url, "live reload connected");
                        self.reload(UMD_SUFFIX).await;
                        self.reload(CSS_SUFFIX).await;
                    }
                    Some(StreamEvent::Data(data)) => self.on_message(&data).await,
                    Some(StreamEvent::Closed(reason)) => break reason,
                    None => break "stream ended".to_string(),
                }
                if self.shared.is_cancelled() {
                    return;
                }
            };
            drop(events);
            let err = LiveReloadError::Transport(reason);
            tracing::warn!(package = %self.dev.package_name, "{}", err);
            self.shared.set_state(ConnectionState::Closed);
            if self.shared.is_cancelled() {
                return;
            }

            let retries = self.shared.retry_count.load(Ordering::Acquire);
            match self.policy.decide(retries) {
                ReconnectDecision::RetryAfter(delay) => {
                    self.shared.retry_count.fetch_add(1, Ordering::AcqRel);
                    self.shared.set_state(ConnectionState::Reconnecting);
                    tracing::info!(
                        package = %self.dev.package_name,
                        attempt = retries + 1,
                        max = self.policy.max_retries,
                        "reconnecting in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                ReconnectDecision::GiveUp => {
                    tracing::error!(
                        package = %self.dev.package_name,
                        max = self.policy.max_retries,
                        "live reload gave up after max retries"
                    );
                    self.shared.set_state(ConnectionState::Exhausted);
                    return;
                }
            }
        }
    }

    async fn on_message(&self, data: &str) {
        let msg = match ReloadMessage::parse(data) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("{}", e);
                return;
            }
        };
        if !msg.is_change() {
            tracing::debug!(event = %msg.event, "ignoring reload event");
            return;
        }
        let (_, suffix) = asset_for_change(&self.dev.package_name, &msg.file_path);
        tracing::debug!(file = %msg.file_path, "source changed");
        self.reload(suffix).await;
    }

    /// Fetch `{devUrl}/{package}{suffix}` and inject it. Errors are logged.
    async fn reload(&self, suffix: &str) {
        if let Err(e) = self.try_reload(suffix).await {
            tracing::warn!(package = %self.dev.package_name, "reload failed: {}", e);
        }
    }

    async fn try_reload(&self, suffix: &str) -> Result<(), LiveReloadError> {
        if self.shared.is_cancelled() {
            return Ok(());
        }
        let file_name = format!("{}{}", self.dev.package_name, suffix);
        let content = self.fetcher.fetch(&self.dev.asset_url(suffix)).await?;
        if self.shared.is_cancelled() {
            return Ok(());
        }
        self.injector.inject(self.page.as_ref(), &file_name, &content)?;
        self.shared.reloads.fetch_add(1, Ordering::AcqRel);
        tracing::info!(file = %file_name, bytes = content.len(), "live reloaded");
        Ok(())
    }
}

/// Starts live-reload subscriptions.
#[derive(Clone)]
pub struct LiveReloadClient {
    source: Arc<dyn EventSource>,
    fetcher: Arc<dyn AssetFetcher>,
    injector: ResourceInjector,
    policy: ReconnectPolicy,
}

impl LiveReloadClient {
    pub fn new(
        source: Arc<dyn EventSource>,
        fetcher: Arc<dyn AssetFetcher>,
        injector: ResourceInjector,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            source,
            fetcher,
            injector,
            policy,
        }
    }

    /// Connect to the dev server of `dev` and keep `page` in sync with it.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, dev: &DevConfig, page: Arc<dyn PageHandle>) -> Subscription {
        let (state, state_rx) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(Shared {
            cancelled: AtomicBool::new(false),
            retry_count: AtomicU32::new(0),
            reloads: AtomicUsize::new(0),
            state,
        });
        let session = Session {
            shared: shared.clone(),
            source: self.source.clone(),
            fetcher: self.fetcher.clone(),
            injector: self.injector.clone(),
            policy: self.policy,
            page,
            dev: dev.clone(),
        };
        let task = tokio::spawn(session.run());
        Subscription {
            shared,
            state_rx,
            task,
            package_name: dev.package_name.clone(),
        }
    }
}

/// Handle to a running subscription. Dropping it disconnects.
pub struct Subscription {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
    package_name: String,
}

impl Subscription {
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Reconnects made so far.
    pub fn retry_count(&self) -> u32 {
        self.shared.retry_count.load(Ordering::Acquire)
    }

    /// Successful injections so far.
    pub fn reload_count(&self) -> usize {
        self.shared.reloads.load(Ordering::Acquire)
    }

    /// Wait until the subscription is exhausted or disconnected.
    pub async fn wait_terminal(&self) -> ConnectionState {
        let mut rx = self.state_rx.clone();
        loop {
            let current = *rx.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    /// Tear down the stream. Callbacks already in flight become no-ops and
    /// the retry counter returns to zero.
    pub fn disconnect(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.task.abort();
        self.shared.retry_count.store(0, Ordering::Release);
        self.shared.state.send_replace(ConnectionState::Disconnected);
        tracing::debug!(package = %self.package_name, "live reload disconnected");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.shared.is_cancelled() {
            self.disconnect();
        }
    }
}
