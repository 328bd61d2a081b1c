//! Declarative network rules in the host's JSON shape.

use serde::{Deserialize, Serialize};
use url::Url;

use super::RuleError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: u32,
    pub priority: u32,
    pub action: Action,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Block,
    Redirect { redirect: RedirectTarget },
}

/// `{"url": ...}` or `{"transform": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectTarget {
    Url(String),
    Transform(UrlTransform),
}

/// Origin rewrite; path and query of the matched request are kept.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UrlTransform {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

impl UrlTransform {
    /// Transform that sends requests to the origin of `url`.
    pub fn to_origin(url: &str) -> Result<Self, RuleError> {
        let parsed = Url::parse(url).map_err(|e| RuleError::InvalidTarget {
            target: url.to_string(),
            reason: e.to_string(),
        })?;
        let host = parsed.host_str().ok_or_else(|| RuleError::InvalidTarget {
            target: url.to_string(),
            reason: "no host".to_string(),
        })?;
        Ok(Self {
            scheme: Some(parsed.scheme().to_string()),
            host: Some(host.to_string()),
            port: parsed.port().map(|p| p.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub url_filter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_types: Option<Vec<ResourceType>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Script,
    Stylesheet,
    Xmlhttprequest,
    Websocket,
    Other,
}

impl Rule {
    pub fn is_block(&self) -> bool {
        matches!(self.action, Action::Block)
    }

    /// Rule with its id zeroed, for comparing batches by content.
    pub fn without_id(&self) -> Rule {
        Rule { id: 0, ..self.clone() }
    }
}
