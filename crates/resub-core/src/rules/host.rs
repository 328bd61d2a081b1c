//! The host's dynamic rule table.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use super::rule::Rule;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct HostError(pub String);

#[async_trait]
pub trait RuleHost: Send + Sync {
    /// Every dynamic rule currently installed.
    async fn installed(&self) -> Result<Vec<Rule>, HostError>;

    /// Remove `remove_ids` then add `add` as one update.
    async fn update(&self, remove_ids: &[u32], add: &[Rule]) -> Result<(), HostError>;
}

/// Rule table kept in memory. Rejects duplicate ids like a browser host does.
#[derive(Debug, Default)]
pub struct MemoryRuleHost {
    rules: Mutex<Vec<Rule>>,
    fail_updates: AtomicBool,
    updates: AtomicUsize,
}

impl MemoryRuleHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::Relaxed);
    }

    /// Number of `update` calls, failed ones included.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<Rule> {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RuleHost for MemoryRuleHost {
    async fn installed(&self) -> Result<Vec<Rule>, HostError> {
        Ok(self.snapshot())
    }

    async fn update(&self, remove_ids: &[u32], add: &[Rule]) -> Result<(), HostError> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        if self.fail_updates.load(Ordering::Relaxed) {
            return Err(HostError("rule update rejected by host".to_string()));
        }
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let removed: HashSet<u32> = remove_ids.iter().copied().collect();
        let mut next: Vec<Rule> = rules
            .iter()
            .filter(|r| !removed.contains(&r.id))
            .cloned()
            .collect();
        let mut ids: HashSet<u32> = next.iter().map(|r| r.id).collect();
        for rule in add {
            if !ids.insert(rule.id) {
                return Err(HostError(format!("duplicate rule id {}", rule.id)));
            }
            next.push(rule.clone());
        }
        *rules = next;
        Ok(())
    }
}
