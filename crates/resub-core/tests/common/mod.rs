#![allow(dead_code)]

pub mod dev_server;

use resub_core::inject::{Capability, PluginModule};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Plugin module that counts its installs.
#[derive(Debug, Default)]
pub struct CountingModule {
    installs: AtomicUsize,
}

impl CountingModule {
    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::Relaxed)
    }
}

impl PluginModule for CountingModule {
    fn install(&self, _capability: &Capability) {
        self.installs.fetch_add(1, Ordering::Relaxed);
    }
}

/// Poll `check` until it holds or ~4 s pass.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
