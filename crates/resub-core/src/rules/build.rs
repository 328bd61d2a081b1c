//! Rule batches computed from application state.

use url::Url;

use super::rule::{Action, Condition, RedirectTarget, ResourceType, Rule, UrlTransform};
use super::RuleError;
use crate::model::{Application, PackageSource, UrlReplacement, CSS_SUFFIX};

/// First id of the ad-hoc replacement band. Package rules stay below it.
pub const ADHOC_ID_BASE: u32 = 10_000;
pub const RULE_PRIORITY: u32 = 1;

/// Files of a package source that need blocking. Dev servers always provide
/// the main script and stylesheet; their worker is never blocked.
fn present_files(source: &PackageSource<'_>) -> Vec<String> {
    let canonical = source.canonical_files();
    match source {
        PackageSource::Stored(pkg) => canonical
            .iter()
            .filter(|f| pkg.has_file(f))
            .map(str::to_string)
            .collect(),
        PackageSource::Dev(_) => vec![canonical.main, canonical.css],
    }
}

fn resource_type_for(file_name: &str) -> ResourceType {
    if file_name.ends_with(CSS_SUFFIX) {
        ResourceType::Stylesheet
    } else {
        ResourceType::Script
    }
}

/// Block rules for every enabled application matching `page_url`. Ids run
/// from 1 in application, package and file order.
pub fn build_rules(apps: &[Application], page_url: &str) -> Result<Vec<Rule>, RuleError> {
    let mut rules = Vec::new();
    for app in apps.iter().filter(|a| a.enabled && a.matches_url(page_url)) {
        let domains = app.rule_domains();
        let domains = (!domains.is_empty()).then_some(domains);
        for source in app.package_sources() {
            for file in present_files(&source) {
                let id = rules.len() as u32 + 1;
                if id >= ADHOC_ID_BASE {
                    return Err(RuleError::IdBandExhausted { limit: ADHOC_ID_BASE - 1 });
                }
                rules.push(Rule {
                    id,
                    priority: RULE_PRIORITY,
                    action: Action::Block,
                    condition: Condition {
                        resource_types: Some(vec![resource_type_for(&file)]),
                        url_filter: format!("*{}", file),
                        domains: domains.clone(),
                    },
                });
            }
        }
        tracing::debug!(app = %app.id, rules = rules.len(), "package rules built");
    }
    Ok(rules)
}

/// A target that is only an origin (`http://host:port` or with a bare `/`)
/// rewrites the origin and keeps the request path.
fn redirect_target(target_url: &str) -> Result<RedirectTarget, RuleError> {
    let origin_only = Url::parse(target_url)
        .map(|u| u.path() == "/" && u.query().is_none() && !target_url.ends_with("/*"))
        .unwrap_or(false);
    if origin_only {
        Ok(RedirectTarget::Transform(UrlTransform::to_origin(target_url)?))
    } else {
        Ok(RedirectTarget::Url(target_url.to_string()))
    }
}

/// Redirect rules for enabled ad-hoc replacements, ids `10000 + i`.
/// Replacements with an unusable target are skipped.
pub fn build_adhoc_rules(replacements: &[UrlReplacement]) -> Vec<Rule> {
    let mut rules = Vec::new();
    for r in replacements.iter().filter(|r| r.enabled) {
        let redirect = match redirect_target(&r.target_url) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(replacement = %r.id, error = %e, "skipping url replacement");
                continue;
            }
        };
        rules.push(Rule {
            id: ADHOC_ID_BASE + rules.len() as u32,
            priority: RULE_PRIORITY,
            action: Action::Redirect { redirect },
            condition: Condition {
                url_filter: r.source_url.clone(),
                domains: None,
                resource_types: Some(vec![
                    ResourceType::Xmlhttprequest,
                    ResourceType::SubFrame,
                    ResourceType::Websocket,
                    ResourceType::Other,
                ]),
            },
        });
    }
    rules
}
