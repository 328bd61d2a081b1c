//! Network rules that block or redirect requests for substituted assets.
//!
//! Every install replaces the whole dynamic rule table: the engine lists what
//! is installed, then removes all of it and adds the new batch in one host
//! update. There is no incremental diff. Concurrent installs are not
//! serialised; the last one to complete wins.

mod build;
mod host;
mod rule;

pub use build::{build_adhoc_rules, build_rules, ADHOC_ID_BASE, RULE_PRIORITY};
pub use host::{HostError, MemoryRuleHost, RuleHost};
pub use rule::{Action, Condition, RedirectTarget, ResourceType, Rule, UrlTransform};

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule install failed: {0}")]
    InstallFailed(String),
    #[error("package rules exceed the id band (max {limit})")]
    IdBandExhausted { limit: u32 },
    #[error("invalid redirect target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },
}

pub struct RuleEngine {
    host: Arc<dyn RuleHost>,
}

impl RuleEngine {
    pub fn new(host: Arc<dyn RuleHost>) -> Self {
        Self { host }
    }

    /// Replace every installed rule with `rules`. On failure the previous
    /// rules should be treated as gone; the next navigation retries.
    pub async fn install_atomic(&self, rules: &[Rule]) -> Result<(), RuleError> {
        let existing = self
            .host
            .installed()
            .await
            .map_err(|e| RuleError::InstallFailed(e.to_string()))?;
        let remove_ids: Vec<u32> = existing.iter().map(|r| r.id).collect();
        self.host
            .update(&remove_ids, rules)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "rule install failed");
                RuleError::InstallFailed(e.to_string())
            })?;
        tracing::info!(removed = remove_ids.len(), added = rules.len(), "rules installed");
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<(), RuleError> {
        self.install_atomic(&[]).await
    }

    pub async fn installed(&self) -> Result<Vec<Rule>, RuleError> {
        self.host
            .installed()
            .await
            .map_err(|e| RuleError::InstallFailed(e.to_string()))
    }
}
