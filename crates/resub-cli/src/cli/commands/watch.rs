//! `resub watch <package> <dev-url>` – follow a dev server until ctrl-c.

use anyhow::{bail, Result};
use resub_core::config::ResubConfig;
use resub_core::fetch::CurlFetcher;
use resub_core::inject::{MemoryPage, ResourceInjector};
use resub_core::live_reload::{
    ConnectionState, CurlEventSource, LiveReloadClient, ReconnectPolicy, Subscription,
};
use resub_core::model::DevConfig;
use std::sync::Arc;
use std::time::Duration;

fn report(sub: &Subscription, page: &MemoryPage) {
    for el in page.head().iter().chain(page.body().iter()) {
        let bytes = page.object(&el.src).map_or(0, |b| b.len());
        println!("  {} ({} bytes)", el.id, bytes);
    }
    println!("{} reload(s) so far", sub.reload_count());
}

pub async fn run_watch(cfg: &ResubConfig, package: &str, dev_url: &str) -> Result<()> {
    let client = LiveReloadClient::new(
        Arc::new(CurlEventSource::new()),
        Arc::new(CurlFetcher::new()),
        ResourceInjector::from_config(&cfg.inject),
        ReconnectPolicy::from_config(&cfg.live_reload),
    );
    let dev = DevConfig {
        package_name: package.to_string(),
        dev_url: dev_url.to_string(),
    };
    let page = Arc::new(MemoryPage::new());
    let sub = client.start(&dev, page.clone());
    println!("Watching {} (ctrl-c to stop)", dev.event_stream_url());

    let mut tick = tokio::time::interval(Duration::from_millis(250));
    let mut last_state = sub.state();
    let mut last_reloads = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                sub.disconnect();
                println!("Disconnected");
                return Ok(());
            }
            end = sub.wait_terminal() => {
                if end == ConnectionState::Exhausted {
                    bail!(
                        "gave up after {} reconnect attempts",
                        sub.retry_count()
                    );
                }
                return Ok(());
            }
            _ = tick.tick() => {
                let state = sub.state();
                if state != last_state {
                    println!("{:?}", state);
                    last_state = state;
                }
                let reloads = sub.reload_count();
                if reloads != last_reloads {
                    last_reloads = reloads;
                    report(&sub, &page);
                }
            }
        }
    }
}
