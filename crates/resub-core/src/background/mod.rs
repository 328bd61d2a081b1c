//! The background controller: owns persisted state and drives rule
//! installation, injection and live reload for page navigations.

mod messages;
mod state;

pub use messages::{
    AppInitResponse, Message, ReplacementPayload, Reply, ResourceResponse, UpdateResponse,
};
pub use state::{APPS_KEY, URL_REPLACEMENTS_KEY};

use anyhow::{anyhow, bail, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, RwLock};

use crate::blob_store::{codec, pack, AssetStore, BlobError, ChunkedBlobStore, PackReport};
use crate::config::ResubConfig;
use crate::fetch::AssetFetcher;
use crate::inject::{PageHandle, ResourceInjector};
use crate::kv::KvStore;
use crate::live_reload::{EventSource, LiveReloadClient, ReconnectPolicy, Subscription};
use crate::model::{
    find_matching, Application, DevConfig, Package, PackageSource, ReplacementInfo, UrlReplacement,
    CSS_SUFFIX, UMD_SUFFIX,
};
use crate::pattern;
use crate::rules::{build_adhoc_rules, build_rules, Rule, RuleEngine, RuleHost};

/// Host capabilities the background runs against.
pub struct Services {
    pub kv: Arc<dyn KvStore>,
    pub rule_host: Arc<dyn RuleHost>,
    pub event_source: Arc<dyn EventSource>,
    pub fetcher: Arc<dyn AssetFetcher>,
}

pub struct Background {
    config: ResubConfig,
    kv: Arc<dyn KvStore>,
    assets: AssetStore,
    rules: RuleEngine,
    injector: ResourceInjector,
    live_reload: LiveReloadClient,
    apps: RwLock<Vec<Application>>,
    replacements: RwLock<Vec<UrlReplacement>>,
    /// Package rules of the last install; ad-hoc rules are recomputed each time.
    package_rules: Mutex<Vec<Rule>>,
    last_page_url: Mutex<Option<String>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    notices: broadcast::Sender<Message>,
}

/// Block rules for the application that decides `url`: the first match, and
/// only while it is enabled. Later matches are neither blocked nor injected.
fn page_rules(apps: &[Application], url: &str) -> Result<Vec<Rule>> {
    match find_matching(apps, url) {
        Some(app) => Ok(build_rules(std::slice::from_ref(app), url)?),
        None => Ok(Vec::new()),
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Background {
    /// Load persisted state and install the ad-hoc replacement rules.
    pub async fn open(config: ResubConfig, services: Services) -> Result<Self> {
        let blobs = ChunkedBlobStore::new(services.kv.clone(), config.storage.clone());
        let injector = ResourceInjector::from_config(&config.inject);
        let live_reload = LiveReloadClient::new(
            services.event_source,
            services.fetcher,
            injector.clone(),
            ReconnectPolicy::from_config(&config.live_reload),
        );
        let (notices, _) = broadcast::channel(64);
        let bg = Self {
            kv: services.kv,
            assets: AssetStore::new(blobs),
            rules: RuleEngine::new(services.rule_host),
            injector,
            live_reload,
            apps: RwLock::new(Vec::new()),
            replacements: RwLock::new(Vec::new()),
            package_rules: Mutex::new(Vec::new()),
            last_page_url: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            notices,
            config,
        };
        bg.reload_state().await?;
        if let Err(e) = bg.install(Vec::new()).await {
            tracing::warn!("initial rule install failed: {:#}", e);
        }
        Ok(bg)
    }

    /// Re-read applications and replacements from the store.
    pub async fn reload_state(&self) -> Result<()> {
        let apps = state::load_apps(self.kv.as_ref()).await?;
        let replacements = state::load_replacements(self.kv.as_ref()).await?;
        tracing::info!(
            apps = apps.len(),
            replacements = replacements.len(),
            "state loaded"
        );
        *self.apps.write().await = apps;
        *self.replacements.write().await = replacements;
        Ok(())
    }

    pub fn config(&self) -> &ResubConfig {
        &self.config
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    /// Observer feed: `REPLACEMENT_UPDATED` and `GET_FILE_LIST` messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.notices.subscribe()
    }

    fn notify(&self, msg: Message) {
        // No receivers is fine.
        let _ = self.notices.send(msg);
    }

    pub async fn applications(&self) -> Vec<Application> {
        self.apps.read().await.clone()
    }

    pub async fn application(&self, id: &str) -> Option<Application> {
        self.apps.read().await.iter().find(|a| a.id == id).cloned()
    }

    /// Answer a request message. Outbound-only messages are rejected.
    pub async fn handle(&self, msg: Message, page: Arc<dyn PageHandle>) -> Result<Reply> {
        match msg {
            Message::AppInit { url } => Ok(Reply::AppInit(self.on_app_init(&url, page).await)),
            Message::GetResource { file_name, url } => {
                Ok(Reply::Resource(self.get_resource(&file_name, &url).await))
            }
            Message::ToggleEnabled { id, enabled } => {
                let app = self.toggle_enabled(&id, enabled).await?;
                Ok(Reply::Updated(UpdateResponse { success: true, app }))
            }
            Message::UpdateMatchPattern { id, pattern } => {
                let app = self.update_match_pattern(&id, &pattern).await?;
                Ok(Reply::Updated(UpdateResponse { success: true, app }))
            }
            Message::GetFileList { .. } | Message::ReplacementUpdated(_) => {
                bail!("message is sent by the background, not to it")
            }
        }
    }

    async fn match_app(&self, url: &str) -> Option<Application> {
        find_matching(&self.apps.read().await, url).cloned()
    }

    /// Navigation to `url`: decide, install rules, inject stored content and
    /// start live reload for dev packages. If no decision is reached within
    /// the init timeout nothing is injected.
    pub async fn on_app_init(&self, url: &str, page: Arc<dyn PageHandle>) -> AppInitResponse {
        let decision = match tokio::time::timeout(self.config.init_timeout(), self.match_app(url)).await {
            Ok(d) => d,
            Err(_) => {
                tracing::warn!(url, "app init timed out; page left unmodified");
                return AppInitResponse::no_match();
            }
        };
        *self
            .last_page_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(url.to_string());

        let Some(app) = decision else {
            tracing::debug!(url, "no application matches");
            self.stop_subscriptions_except(&[]);
            if let Err(e) = self.install(Vec::new()).await {
                tracing::warn!("{:#}", e);
            }
            return AppInitResponse::no_match();
        };

        if !app.enabled {
            tracing::info!(app = %app.id, "application disabled; clearing rules");
            self.stop_subscriptions_except(&[]);
            if let Err(e) = self.install(Vec::new()).await {
                tracing::warn!("{:#}", e);
            }
            return AppInitResponse {
                is_pattern: true,
                app: Some(app),
            };
        }

        if let Err(e) = self.apply(&app, url, page).await {
            tracing::error!(app = %app.id, "substitution not applied: {:#}", e);
        }
        AppInitResponse {
            is_pattern: true,
            app: Some(app),
        }
    }

    async fn apply(&self, app: &Application, url: &str, page: Arc<dyn PageHandle>) -> Result<()> {
        let package_rules = build_rules(std::slice::from_ref(app), url)?;
        let blocked: Vec<String> = package_rules
            .iter()
            .map(|r| r.condition.url_filter.trim_start_matches('*').to_string())
            .collect();
        self.install(package_rules).await?;
        self.notify(Message::ReplacementUpdated(ReplacementPayload::Files {
            files: blocked,
        }));

        let dev_configs: Vec<DevConfig> = app.dev_configs.clone();
        self.stop_subscriptions_except(&dev_configs);
        for source in app.package_sources() {
            match source {
                PackageSource::Dev(dev) => self.ensure_subscription(dev, page.clone()),
                PackageSource::Stored(pkg) => self.inject_package(pkg, page.as_ref()).await,
            }
        }

        let data = self.file_list(app).await;
        self.notify(Message::GetFileList { data });
        Ok(())
    }

    async fn inject_package(&self, pkg: &Package, page: &dyn PageHandle) {
        let canonical = pkg.canonical_files();
        for file in canonical.iter().filter(|f| pkg.has_file(f)) {
            let result = match pkg.files.get(file) {
                Some(bytes) => self.injector.inject(page, file, bytes),
                None => self.injector.inject_stored(page, &self.assets, file).await,
            };
            if let Err(e) = result {
                tracing::warn!(package = %pkg.name, file, "injection failed: {}", e);
            }
        }
    }

    fn ensure_subscription(&self, dev: &DevConfig, page: Arc<dyn PageHandle>) {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Each navigation gets a fresh page; replacing the entry drops (and
        // disconnects) the previous subscription.
        let sub = self.live_reload.start(dev, page);
        subs.insert(dev.package_name.clone(), sub);
    }

    fn stop_subscriptions_except(&self, keep: &[DevConfig]) {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|name, _| keep.iter().any(|d| &d.package_name == name));
    }

    /// Package names with a live-reload subscription.
    pub fn live_packages(&self) -> Vec<String> {
        let subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = subs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Replace the installed rules with `package_rules` plus the enabled
    /// ad-hoc replacements.
    async fn install(&self, package_rules: Vec<Rule>) -> Result<()> {
        let mut batch = package_rules.clone();
        batch.extend(build_adhoc_rules(&self.replacements.read().await));
        *self
            .package_rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = package_rules;
        if batch.is_empty() {
            self.rules.clear_all().await?;
        } else {
            self.rules.install_atomic(&batch).await?;
        }
        Ok(())
    }

    /// Rebuild and install rules for the last navigated URL.
    async fn reinstall(&self) -> Result<()> {
        let url = self
            .last_page_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let package_rules = match url {
            Some(u) => page_rules(&self.apps.read().await, &u)?,
            None => Vec::new(),
        };
        self.install(package_rules).await
    }

    /// The batch `install` would submit for a navigation to `url`.
    pub async fn rules_for(&self, url: &str) -> Result<Vec<Rule>> {
        let mut batch = page_rules(&self.apps.read().await, url)?;
        batch.extend(build_adhoc_rules(&self.replacements.read().await));
        Ok(batch)
    }

    /// Package rules currently installed by this background.
    pub fn installed_package_rules(&self) -> Vec<Rule> {
        self.package_rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Filename → data URL (stored) or dev-server URL (dev) for `app`.
    pub async fn file_list(&self, app: &Application) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        for source in app.package_sources() {
            match source {
                PackageSource::Dev(dev) => {
                    let canonical = source.canonical_files();
                    data.insert(canonical.main, dev.asset_url(UMD_SUFFIX));
                    data.insert(canonical.css, dev.asset_url(CSS_SUFFIX));
                }
                PackageSource::Stored(pkg) => {
                    for file in pkg.canonical_files().iter().filter(|f| pkg.has_file(f)) {
                        match self.stored_data_url(pkg, file).await {
                            Ok(url) => {
                                data.insert(file.to_string(), url);
                            }
                            Err(e) => tracing::warn!(file, "not listed: {}", e),
                        }
                    }
                }
            }
        }
        data
    }

    async fn stored_data_url(&self, pkg: &Package, file: &str) -> Result<String, BlobError> {
        match pkg.files.get(file) {
            Some(bytes) => Ok(codec::encode_data_url(codec::mime_for(file), bytes)),
            None => self.assets.data_url(file).await,
        }
    }

    /// Serve `asset_{file_name}`, falling back to the canonical file of a
    /// package of the app matching `url` when the requested name ends with it.
    /// `file_name` may be a path or URL; an empty one is taken from `url`.
    /// Files of a package replaced by a dev server are reported missing.
    pub async fn get_resource(&self, file_name: &str, url: &str) -> ResourceResponse {
        let requested = if file_name.is_empty() {
            pattern::file_name_from_url(url)
        } else {
            pattern::file_name_from_url(file_name)
        };
        if requested.is_empty() {
            return ResourceResponse::missing();
        }
        let file_name = requested.as_str();
        let apps = self.apps.read().await;
        let candidates: Vec<&Application> = match find_matching(&apps, url) {
            Some(app) => vec![app],
            None => apps.iter().collect(),
        };
        if candidates.iter().any(|app| app.shadows_file(file_name)) {
            tracing::debug!(file = file_name, "stored file shadowed by dev server");
            return ResourceResponse::missing();
        }

        match self.assets.data_url(file_name).await {
            Ok(data_url) => return ResourceResponse::found(data_url),
            Err(BlobError::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(file = file_name, "resource unavailable: {}", e);
                return ResourceResponse::failed(e.to_string());
            }
        }

        for app in candidates {
            for source in app.package_sources() {
                let PackageSource::Stored(pkg) = source else {
                    continue;
                };
                let canonical = pkg.canonical_files();
                let Some(matched) = canonical.match_suffix(file_name) else {
                    continue;
                };
                if !pkg.has_file(matched) {
                    continue;
                }
                return match self.stored_data_url(pkg, matched).await {
                    Ok(data_url) => {
                        self.notify(Message::ReplacementUpdated(ReplacementPayload::Replacements {
                            replacements: vec![ReplacementInfo {
                                original_url: url.to_string(),
                                replaced_url: format!("asset_{}", matched),
                                app_id: app.id.clone(),
                                app_name: app.name.clone(),
                            }],
                        }));
                        ResourceResponse::found(data_url)
                    }
                    Err(BlobError::NotFound(_)) => ResourceResponse::missing(),
                    Err(e) => ResourceResponse::failed(e.to_string()),
                };
            }
        }
        ResourceResponse::missing()
    }

    async fn update_app<F>(&self, id: &str, change: F) -> Result<Application>
    where
        F: FnOnce(&mut Application) -> Result<()>,
    {
        let updated = {
            let mut apps = self.apps.write().await;
            let app = apps
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| anyhow!("no application with id {}", id))?;
            change(app)?;
            app.updated_at = now_ms();
            let updated = app.clone();
            state::save_apps(self.kv.as_ref(), &apps).await?;
            updated
        };
        if !updated.enabled {
            self.stop_subscriptions_except(&[]);
        }
        if let Err(e) = self.reinstall().await {
            tracing::warn!("rule reinstall failed: {:#}", e);
        }
        Ok(updated)
    }

    /// Set `enabled`, or flip it when `None`.
    pub async fn toggle_enabled(&self, id: &str, enabled: Option<bool>) -> Result<Application> {
        let app = self
            .update_app(id, |app| {
                app.enabled = enabled.unwrap_or(!app.enabled);
                Ok(())
            })
            .await?;
        tracing::info!(app = %app.id, enabled = app.enabled, "application toggled");
        Ok(app)
    }

    /// Replace the application's URL patterns with `pattern`.
    pub async fn update_match_pattern(&self, id: &str, pattern: &str) -> Result<Application> {
        pattern::glob_to_regex(pattern).context("invalid match pattern")?;
        let app = self
            .update_app(id, |app| {
                app.url_patterns = vec![pattern.to_string()];
                Ok(())
            })
            .await?;
        tracing::info!(app = %app.id, pattern, "match pattern updated");
        Ok(app)
    }

    /// Insert or replace an application by id.
    pub async fn upsert_application(&self, mut app: Application) -> Result<()> {
        for p in &app.url_patterns {
            pattern::glob_to_regex(p).with_context(|| format!("invalid pattern in {}", app.id))?;
        }
        let now = now_ms();
        if app.created_at == 0 {
            app.created_at = now;
        }
        app.updated_at = now;
        {
            let mut apps = self.apps.write().await;
            match apps.iter_mut().find(|a| a.id == app.id) {
                Some(existing) => *existing = app,
                None => apps.push(app),
            }
            state::save_apps(self.kv.as_ref(), &apps).await?;
        }
        self.reinstall().await
    }

    /// Move a package's files into the asset store and attach it to `app_id`.
    /// If a canonical file does not fit, nothing is attached and the files
    /// already written are removed.
    pub async fn add_package(&self, app_id: &str, mut package: Package) -> Result<PackReport> {
        if self.application(app_id).await.is_none() {
            bail!("no application with id {}", app_id);
        }
        let files: Vec<(String, Vec<u8>)> = std::mem::take(&mut package.files).into_iter().collect();
        let report = pack::save_batch(&self.assets, &files, &self.config.storage.important_patterns)
            .await
            .context("failed to probe storage usage")?;

        let canonical = package.canonical_files();
        let missing: Vec<&str> = canonical
            .iter()
            .filter(|c| {
                files.iter().any(|(n, _)| n.as_str() == *c)
                    && !report.saved.iter().any(|s| s.as_str() == *c)
            })
            .collect();
        if !missing.is_empty() {
            for name in &report.saved {
                if let Err(e) = self.assets.remove(name).await {
                    tracing::warn!(file = %name, "cleanup failed: {}", e);
                }
            }
            bail!(
                "package {} not stored: {} did not fit in storage",
                package.name,
                missing.join(", ")
            );
        }

        package.asset_files = report.saved.clone();
        if package.uploaded_at == 0 {
            package.uploaded_at = now_ms();
        }
        self.update_app(app_id, |app| {
            app.packages.retain(|p| p.id != package.id);
            app.packages.push(package);
            Ok(())
        })
        .await?;
        Ok(report)
    }

    /// Detach a package and delete its stored files.
    pub async fn remove_package(&self, app_id: &str, package_id: &str) -> Result<()> {
        let app = self
            .application(app_id)
            .await
            .ok_or_else(|| anyhow!("no application with id {}", app_id))?;
        let pkg = app
            .packages
            .iter()
            .find(|p| p.id == package_id)
            .ok_or_else(|| anyhow!("no package {} in {}", package_id, app_id))?;
        for file in &pkg.asset_files {
            self.assets
                .remove(file)
                .await
                .with_context(|| format!("failed to remove {}", file))?;
        }
        self.update_app(app_id, |app| {
            app.packages.retain(|p| p.id != package_id);
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Point a package name of `app_id` at a dev server.
    pub async fn set_dev_config(&self, app_id: &str, dev: DevConfig) -> Result<Application> {
        self.update_app(app_id, |app| {
            app.dev_configs.retain(|d| d.package_name != dev.package_name);
            app.dev_configs.push(dev);
            Ok(())
        })
        .await
    }

    pub async fn url_replacements(&self) -> Vec<UrlReplacement> {
        self.replacements.read().await.clone()
    }

    /// Persist ad-hoc replacements and reinstall rules.
    pub async fn set_url_replacements(&self, replacements: Vec<UrlReplacement>) -> Result<()> {
        state::save_replacements(self.kv.as_ref(), &replacements).await?;
        let enabled: Vec<UrlReplacement> = replacements.iter().filter(|r| r.enabled).cloned().collect();
        *self.replacements.write().await = replacements;
        let package_rules = self.installed_package_rules();
        self.install(package_rules).await?;
        self.notify(Message::ReplacementUpdated(ReplacementPayload::Replacements {
            replacements: enabled
                .iter()
                .map(|r| ReplacementInfo {
                    original_url: r.source_url.clone(),
                    replaced_url: r.target_url.clone(),
                    app_id: String::new(),
                    app_name: String::new(),
                })
                .collect(),
        }));
        Ok(())
    }
}
