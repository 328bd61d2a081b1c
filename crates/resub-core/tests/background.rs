//! Integration tests for the background controller against in-memory hosts.

mod common;

use common::{eventually, CountingModule};
use resub_core::background::{
    Background, Message, ReplacementPayload, Reply, Services, APPS_KEY,
};
use resub_core::config::ResubConfig;
use resub_core::fetch::MemoryFetcher;
use resub_core::inject::{MemoryPage, PageHandle};
use async_trait::async_trait;
use resub_core::kv::{KvError, KvStore, MemoryKvStore, SqliteKvStore};
use resub_core::live_reload::{ScriptedEventSource, StreamEvent};
use resub_core::model::{Application, DevConfig, Package, PackageConfig, UrlReplacement};
use resub_core::rules::{Action, MemoryRuleHost, RedirectTarget, ResourceType, ADHOC_ID_BASE};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct Harness {
    bg: Background,
    kv: Arc<MemoryKvStore>,
    host: Arc<MemoryRuleHost>,
    events: Arc<ScriptedEventSource>,
    fetcher: Arc<MemoryFetcher>,
}

async fn harness_with(config: ResubConfig) -> Harness {
    let kv = Arc::new(MemoryKvStore::new());
    let host = Arc::new(MemoryRuleHost::new());
    let events = Arc::new(ScriptedEventSource::new());
    let fetcher = Arc::new(MemoryFetcher::new());
    let bg = Background::open(
        config,
        Services {
            kv: kv.clone(),
            rule_host: host.clone(),
            event_source: events.clone(),
            fetcher: fetcher.clone(),
        },
    )
    .await
    .unwrap();
    Harness {
        bg,
        kv,
        host,
        events,
        fetcher,
    }
}

async fn harness() -> Harness {
    harness_with(ResubConfig::default()).await
}

fn app(id: &str, pattern: &str) -> Application {
    Application {
        id: id.into(),
        name: format!("{} app", id),
        enabled: true,
        url_patterns: vec![pattern.into()],
        packages: Vec::new(),
        dev_configs: Vec::new(),
        created_at: 0,
        updated_at: 0,
    }
}

fn package(name: &str, files: &[(&str, &[u8])]) -> Package {
    Package {
        id: format!("pkg-{}", name),
        name: name.into(),
        files: files
            .iter()
            .map(|(n, b)| (n.to_string(), b.to_vec()))
            .collect::<BTreeMap<_, _>>(),
        asset_files: Vec::new(),
        config: PackageConfig::new(name),
        uploaded_at: 0,
    }
}

fn page() -> Arc<MemoryPage> {
    Arc::new(MemoryPage::new())
}

#[tokio::test]
async fn widget_navigation_blocks_and_injects() {
    let h = harness().await;
    h.bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();
    let report = h
        .bg
        .add_package("a1", package("widget", &[("widget.umd.js", b"window.widget={}")]))
        .await
        .unwrap();
    assert!(report.is_complete());

    let page = page();
    page.expose_capability("vue");
    let module = Arc::new(CountingModule::default());
    page.register_module("widget", module.clone());

    let mut notices = h.bg.subscribe();
    let resp = h.bg.on_app_init("https://site.example/page", page.clone()).await;
    assert!(resp.is_pattern);
    assert_eq!(resp.app.unwrap().id, "a1");

    let rules = h.host.snapshot();
    assert_eq!(rules.len(), 1);
    let rule = &rules[0];
    assert_eq!(rule.id, 1);
    assert!(rule.is_block());
    assert_eq!(rule.condition.url_filter, "*widget.umd.js");
    assert_eq!(rule.condition.domains, Some(vec!["site.example".to_string()]));
    assert_eq!(rule.condition.resource_types, Some(vec![ResourceType::Script]));

    let body = page.body();
    assert_eq!(body.len(), 1);
    assert_eq!(body[0].id, "widget-script");
    assert_eq!(page.object(&body[0].src).unwrap(), b"window.widget={}");
    assert_eq!(module.installs(), 1);

    match notices.recv().await.unwrap() {
        Message::ReplacementUpdated(ReplacementPayload::Files { files }) => {
            assert_eq!(files, vec!["widget.umd.js".to_string()])
        }
        other => panic!("unexpected notice {:?}", other),
    }
    match notices.recv().await.unwrap() {
        Message::GetFileList { data } => {
            assert!(data["widget.umd.js"].starts_with("data:application/javascript;base64,"))
        }
        other => panic!("unexpected notice {:?}", other),
    }
}

#[tokio::test]
async fn only_the_deciding_application_is_blocked() {
    let h = harness().await;
    h.bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();
    h.bg.upsert_application(app("a2", "https://site.example/*"))
        .await
        .unwrap();
    h.bg.add_package("a1", package("widget", &[("widget.umd.js", b"w")]))
        .await
        .unwrap();
    h.bg.add_package("a2", package("chart", &[("chart.umd.js", b"c")]))
        .await
        .unwrap();

    let page = page();
    let resp = h.bg.on_app_init("https://site.example/", page.clone()).await;
    assert_eq!(resp.app.unwrap().id, "a1");
    let filters: Vec<String> = h
        .host
        .snapshot()
        .into_iter()
        .map(|r| r.condition.url_filter)
        .collect();
    assert_eq!(filters, vec!["*widget.umd.js"]);
    assert_eq!(page.count_id("widget-script"), 1);
    assert_eq!(page.count_id("chart-script"), 0);

    let previewed = h.bg.rules_for("https://site.example/").await.unwrap();
    assert_eq!(previewed, h.host.snapshot());
}

#[tokio::test]
async fn disabled_first_match_clears_rules_everywhere() {
    let h = harness().await;
    let mut first = app("a1", "https://site.example/*");
    first.enabled = false;
    h.bg.upsert_application(first).await.unwrap();
    h.bg.upsert_application(app("a2", "https://site.example/*"))
        .await
        .unwrap();
    h.bg.add_package("a2", package("chart", &[("chart.umd.js", b"c")]))
        .await
        .unwrap();

    let page = page();
    let resp = h.bg.on_app_init("https://site.example/", page.clone()).await;
    assert!(resp.is_pattern);
    assert_eq!(resp.app.unwrap().id, "a1");
    assert!(h.host.snapshot().is_empty());
    assert!(h.bg.rules_for("https://site.example/").await.unwrap().is_empty());
    assert!(page.body().is_empty());
}

/// Key/value store whose next write waits until released.
struct StallingKv {
    inner: MemoryKvStore,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl StallingKv {
    fn new() -> Self {
        Self {
            inner: MemoryKvStore::new(),
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl KvStore for StallingKv {
    async fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        self.inner.get(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, KvError> {
        self.inner.get_many(keys).await
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<(), KvError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.set(entries).await
    }

    async fn remove(&self, keys: &[String]) -> Result<(), KvError> {
        self.inner.remove(keys).await
    }

    async fn bytes_in_use(&self) -> Result<u64, KvError> {
        self.inner.bytes_in_use().await
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.inner.quota_bytes()
    }
}

#[tokio::test]
async fn late_decision_leaves_page_unmodified() {
    let mut config = ResubConfig::default();
    config.init_timeout_ms = 50;
    let kv = Arc::new(StallingKv::new());
    let host = Arc::new(MemoryRuleHost::new());
    let bg = Background::open(
        config,
        Services {
            kv: kv.clone(),
            rule_host: host.clone(),
            event_source: Arc::new(ScriptedEventSource::new()),
            fetcher: Arc::new(MemoryFetcher::new()),
        },
    )
    .await
    .unwrap();
    bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();
    bg.add_package("a1", package("widget", &[("widget.umd.js", b"js")]))
        .await
        .unwrap();

    // The upsert holds the application list while its write is stalled.
    kv.armed.store(true, Ordering::SeqCst);
    let page = page();
    let stalled = bg.upsert_application(app("a2", "https://other.example/*"));
    let navigate = async {
        kv.entered.notified().await;
        let resp = bg.on_app_init("https://site.example/", page.clone()).await;
        kv.release.notify_one();
        resp
    };
    let (upserted, resp) = tokio::join!(stalled, navigate);
    upserted.unwrap();

    assert!(!resp.is_pattern);
    assert!(resp.app.is_none());
    assert!(host.snapshot().is_empty());
    assert!(page.body().is_empty() && page.head().is_empty());
}

#[tokio::test]
async fn navigation_twice_installs_the_same_rules() {
    let h = harness().await;
    h.bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();
    h.bg.add_package(
        "a1",
        package("widget", &[("widget.umd.js", b"js"), ("widget.css", b"css")]),
    )
    .await
    .unwrap();

    let first_page = page();
    h.bg.on_app_init("https://site.example/a", first_page.clone()).await;
    let first = h.host.snapshot();
    h.bg.on_app_init("https://site.example/a", first_page.clone()).await;
    assert_eq!(h.host.snapshot(), first);
    assert_eq!(first_page.count_id("widget-script"), 1);
    assert_eq!(first_page.count_id("widget-style"), 1);
    assert_eq!(first_page.live_objects(), 2);
}

#[tokio::test]
async fn unmatched_url_leaves_page_alone() {
    let h = harness().await;
    h.bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();
    let page = page();
    let resp = h.bg.on_app_init("https://other.example/", page.clone()).await;
    assert!(!resp.is_pattern);
    assert!(resp.app.is_none());
    assert!(h.host.snapshot().is_empty());
    assert!(page.body().is_empty() && page.head().is_empty());
}

#[tokio::test]
async fn toggle_disables_and_clears_rules() {
    let h = harness().await;
    h.bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();
    h.bg.add_package("a1", package("widget", &[("widget.umd.js", b"js")]))
        .await
        .unwrap();
    h.bg.on_app_init("https://site.example/", page()).await;
    assert_eq!(h.host.snapshot().len(), 1);

    let reply = h
        .bg
        .handle(
            Message::ToggleEnabled {
                id: "a1".into(),
                enabled: None,
            },
            page(),
        )
        .await
        .unwrap();
    let Reply::Updated(update) = reply else {
        panic!("expected update reply");
    };
    assert!(update.success);
    assert!(!update.app.enabled);
    assert!(h.host.snapshot().is_empty());

    let page = page();
    let resp = h.bg.on_app_init("https://site.example/", page.clone()).await;
    assert!(resp.is_pattern);
    assert!(!resp.app.unwrap().enabled);
    assert!(page.body().is_empty());
    assert!(h.host.snapshot().is_empty());

    // Persisted, not just cached.
    let stored = h.kv.get(APPS_KEY).await.unwrap().unwrap();
    assert_eq!(stored[0]["enabled"], false);
}

#[tokio::test]
async fn update_match_pattern_replaces_patterns() {
    let h = harness().await;
    h.bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();
    let updated = h
        .bg
        .update_match_pattern("a1", "https://*.corp.example/app/*")
        .await
        .unwrap();
    assert_eq!(updated.url_patterns, vec!["https://*.corp.example/app/*"]);
    assert!(updated.updated_at >= updated.created_at);

    let resp = h
        .bg
        .on_app_init("https://eu.corp.example/app/home", page())
        .await;
    assert!(resp.is_pattern);
    let resp = h.bg.on_app_init("https://site.example/", page()).await;
    assert!(!resp.is_pattern);

    assert!(h.bg.update_match_pattern("missing", "https://x/*").await.is_err());
}

#[tokio::test]
async fn get_resource_falls_back_to_canonical_suffix() {
    let h = harness().await;
    h.bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();
    h.bg.add_package("a1", package("widget", &[("widget.umd.js", b"js!")]))
        .await
        .unwrap();
    let mut notices = h.bg.subscribe();

    let reply = h
        .bg
        .handle(
            Message::GetResource {
                file_name: "widget.umd.js".into(),
                url: "https://site.example/".into(),
            },
            page(),
        )
        .await
        .unwrap();
    let Reply::Resource(direct) = reply else {
        panic!("expected resource reply");
    };
    assert!(direct.exists);
    assert_eq!(
        direct.data_url.as_deref(),
        Some("data:application/javascript;base64,anMh")
    );

    let hashed = h
        .bg
        .get_resource("static/js/v2.widget.umd.js", "https://site.example/")
        .await;
    assert!(hashed.exists);
    assert_eq!(hashed.data_url, direct.data_url);
    match notices.recv().await.unwrap() {
        Message::ReplacementUpdated(ReplacementPayload::Replacements { replacements }) => {
            assert_eq!(replacements.len(), 1);
            assert_eq!(replacements[0].replaced_url, "asset_widget.umd.js");
            assert_eq!(replacements[0].app_id, "a1");
        }
        other => panic!("unexpected notice {:?}", other),
    }

    let from_url = h
        .bg
        .get_resource("", "https://cdn.example/js/widget.umd.js?v=2")
        .await;
    assert_eq!(from_url.data_url, direct.data_url);

    let missing = h.bg.get_resource("nothing.js", "https://site.example/").await;
    assert!(!missing.exists);
    assert!(missing.error.is_none());
}

#[tokio::test]
async fn package_that_does_not_fit_is_rolled_back() {
    let mut config = ResubConfig::default();
    config.storage.quota_bytes = 20_000;
    config.storage.safety_buffer_bytes = 1_000;
    let h = harness_with(config).await;
    h.bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();

    let css = vec![b'x'; 50_000];
    let err = h
        .bg
        .add_package(
            "a1",
            package("widget", &[("widget.umd.js", b"small"), ("widget.css", &css)]),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("widget.css"), "{}", err);
    assert!(!h.bg.assets().exists("widget.umd.js").await.unwrap());
    assert!(h.bg.application("a1").await.unwrap().packages.is_empty());
}

#[tokio::test]
async fn remove_package_deletes_assets() {
    let h = harness().await;
    h.bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();
    h.bg.add_package("a1", package("widget", &[("widget.umd.js", b"js")]))
        .await
        .unwrap();
    assert!(h.bg.assets().exists("widget.umd.js").await.unwrap());

    h.bg.remove_package("a1", "pkg-widget").await.unwrap();
    assert!(!h.bg.assets().exists("widget.umd.js").await.unwrap());
    assert!(h.bg.application("a1").await.unwrap().packages.is_empty());
    assert!(h.bg.remove_package("a1", "pkg-widget").await.is_err());
}

#[tokio::test]
async fn dev_config_starts_live_reload_and_shadows_package() {
    let h = harness().await;
    h.bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();
    h.bg.add_package("a1", package("widget", &[("widget.umd.js", b"stored")]))
        .await
        .unwrap();
    h.bg.set_dev_config(
        "a1",
        DevConfig {
            package_name: "widget".into(),
            dev_url: "http://localhost:5173/".into(),
        },
    )
    .await
    .unwrap();
    h.fetcher
        .insert("http://localhost:5173/widget.umd.js", b"from dev");
    h.fetcher.insert("http://localhost:5173/widget.css", b".dev{}");
    h.events.push(vec![StreamEvent::Open], true);

    let page = page();
    h.bg.on_app_init("https://site.example/", page.clone()).await;

    let filters: Vec<String> = h
        .host
        .snapshot()
        .into_iter()
        .map(|r| r.condition.url_filter)
        .collect();
    assert_eq!(filters, vec!["*widget.umd.js", "*widget.css"]);
    assert_eq!(h.bg.live_packages(), vec!["widget".to_string()]);

    eventually("dev content injected", || {
        page.body()
            .first()
            .and_then(|e| page.object(&e.src))
            .map_or(false, |b| b == b"from dev")
    })
    .await;
    assert_eq!(page.count_id("widget-script"), 1);
    assert_eq!(h.events.open_count(), 1);

    // The stored bundle is not served while the dev server replaces it.
    let shadowed = h.bg.get_resource("widget.umd.js", "https://site.example/").await;
    assert!(!shadowed.exists);
    assert!(shadowed.data_url.is_none());
    let hashed = h
        .bg
        .get_resource("static/v2.widget.umd.js", "https://site.example/")
        .await;
    assert!(!hashed.exists);

    h.bg.toggle_enabled("a1", Some(false)).await.unwrap();
    assert!(h.bg.live_packages().is_empty());
    assert!(h.host.snapshot().is_empty());
}

#[tokio::test]
async fn url_replacements_use_their_own_id_band() {
    let h = harness().await;
    h.bg.upsert_application(app("a1", "https://site.example/*"))
        .await
        .unwrap();
    h.bg.add_package("a1", package("widget", &[("widget.umd.js", b"js")]))
        .await
        .unwrap();
    h.bg.on_app_init("https://site.example/", page()).await;

    let mut notices = h.bg.subscribe();
    h.bg.set_url_replacements(vec![
        UrlReplacement {
            id: "r1".into(),
            source_url: "https://cdn.example/lib.js".into(),
            target_url: "http://localhost:8080/lib.js".into(),
            enabled: true,
        },
        UrlReplacement {
            id: "r2".into(),
            source_url: "https://api.example/".into(),
            target_url: "http://localhost:9000/".into(),
            enabled: true,
        },
        UrlReplacement {
            id: "r3".into(),
            source_url: "https://off.example/".into(),
            target_url: "http://localhost:1/".into(),
            enabled: false,
        },
    ])
    .await
    .unwrap();

    let mut ids: Vec<u32> = h.host.snapshot().iter().map(|r| r.id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, ADHOC_ID_BASE, ADHOC_ID_BASE + 1]);

    let adhoc = h
        .host
        .snapshot()
        .into_iter()
        .find(|r| r.id == ADHOC_ID_BASE)
        .unwrap();
    assert!(matches!(
        adhoc.action,
        Action::Redirect {
            redirect: RedirectTarget::Url(ref u)
        } if u == "http://localhost:8080/lib.js"
    ));

    match notices.recv().await.unwrap() {
        Message::ReplacementUpdated(ReplacementPayload::Replacements { replacements }) => {
            assert_eq!(replacements.len(), 2)
        }
        other => panic!("unexpected notice {:?}", other),
    }

    // Ad-hoc rules survive navigation to an unmatched page.
    h.bg.on_app_init("https://elsewhere.example/", page()).await;
    let ids: Vec<u32> = h.host.snapshot().iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![ADHOC_ID_BASE, ADHOC_ID_BASE + 1]);
}

#[tokio::test]
async fn outbound_messages_are_rejected() {
    let h = harness().await;
    let page: Arc<dyn PageHandle> = page();
    let err = h
        .bg
        .handle(
            Message::GetFileList {
                data: BTreeMap::new(),
            },
            page,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("sent by the background"));
}

#[tokio::test]
async fn state_survives_reopen_with_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state.db");

    let open = |kv: Arc<SqliteKvStore>| async move {
        Background::open(
            ResubConfig::default(),
            Services {
                kv,
                rule_host: Arc::new(MemoryRuleHost::new()),
                event_source: Arc::new(ScriptedEventSource::new()),
                fetcher: Arc::new(MemoryFetcher::new()),
            },
        )
        .await
        .unwrap()
    };

    {
        let kv = Arc::new(SqliteKvStore::open_at(&db, None).await.unwrap());
        let bg = open(kv).await;
        bg.upsert_application(app("a1", "https://site.example/*"))
            .await
            .unwrap();
        bg.add_package("a1", package("widget", &[("widget.umd.js", b"persisted")]))
            .await
            .unwrap();
    }

    let kv = Arc::new(SqliteKvStore::open_at(&db, None).await.unwrap());
    let bg = open(kv).await;
    let apps = bg.applications().await;
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].packages[0].asset_files, vec!["widget.umd.js"]);
    assert_eq!(bg.assets().get("widget.umd.js").await.unwrap(), b"persisted");
}
