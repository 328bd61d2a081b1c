//! Persisted application state.

use anyhow::{Context, Result};

use crate::kv::{get_json, set_json, KvStore};
use crate::model::{Application, UrlReplacement};

pub const APPS_KEY: &str = "appState";
pub const URL_REPLACEMENTS_KEY: &str = "urlReplacements";

pub async fn load_apps(kv: &dyn KvStore) -> Result<Vec<Application>> {
    Ok(get_json(kv, APPS_KEY)
        .await
        .context("failed to load applications")?
        .unwrap_or_default())
}

pub async fn save_apps(kv: &dyn KvStore, apps: &[Application]) -> Result<()> {
    set_json(kv, APPS_KEY, &apps)
        .await
        .context("failed to save applications")
}

pub async fn load_replacements(kv: &dyn KvStore) -> Result<Vec<UrlReplacement>> {
    Ok(get_json(kv, URL_REPLACEMENTS_KEY)
        .await
        .context("failed to load url replacements")?
        .unwrap_or_default())
}

pub async fn save_replacements(kv: &dyn KvStore, replacements: &[UrlReplacement]) -> Result<()> {
    set_json(kv, URL_REPLACEMENTS_KEY, &replacements)
        .await
        .context("failed to save url replacements")
}
