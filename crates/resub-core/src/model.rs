//! Applications, packages and dev configs as persisted under `appState`.
//!
//! Field names serialise in camelCase so state written by the admin surface
//! round-trips unchanged. Package file contents are stored base64-encoded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pattern;

/// Suffix of the main script derived from `outputName`.
pub const UMD_SUFFIX: &str = ".umd.js";
/// Suffix of the stylesheet derived from `outputName`.
pub const CSS_SUFFIX: &str = ".css";
/// Suffix of the worker script derived from `outputName`.
pub const WORKER_SUFFIX: &str = ".umd.worker.js";

/// A named configuration of URL patterns plus packages controlling substitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub url_patterns: Vec<String>,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub dev_configs: Vec<DevConfig>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

/// Build configuration shipped inside a package (`outputName` plus anything else).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageConfig {
    pub output_name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PackageConfig {
    pub fn new(output_name: impl Into<String>) -> Self {
        Self {
            output_name: output_name.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// An uploaded bundle of files keyed by filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: String,
    pub name: String,
    #[serde(with = "files_base64", default)]
    pub files: BTreeMap<String, Vec<u8>>,
    /// Files moved out to the asset store; their bytes are no longer in `files`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asset_files: Vec<String>,
    pub config: PackageConfig,
    #[serde(default)]
    pub uploaded_at: i64,
}

/// Points a package name at a live development server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevConfig {
    pub package_name: String,
    pub dev_url: String,
}

impl DevConfig {
    /// Dev server URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.dev_url.trim_end_matches('/')
    }

    pub fn event_stream_url(&self) -> String {
        format!("{}/sse", self.base_url())
    }

    /// URL of a dev-server asset: `{devUrl}/{packageName}{suffix}`.
    pub fn asset_url(&self, suffix: &str) -> String {
        format!("{}/{}{}", self.base_url(), self.package_name, suffix)
    }
}

/// Emitted to observers when content is substituted. Not used for control decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementInfo {
    pub original_url: String,
    pub replaced_url: String,
    pub app_id: String,
    pub app_name: String,
}

/// Ad-hoc URL replacement compiled into the reserved rule-ID band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlReplacement {
    pub id: String,
    pub source_url: String,
    pub target_url: String,
    pub enabled: bool,
}

/// The three filenames derived from an `outputName`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalFiles {
    pub main: String,
    pub css: String,
    pub worker: String,
}

impl CanonicalFiles {
    pub fn for_output(output_name: &str) -> Self {
        Self {
            main: format!("{output_name}{UMD_SUFFIX}"),
            css: format!("{output_name}{CSS_SUFFIX}"),
            worker: format!("{output_name}{WORKER_SUFFIX}"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [self.main.as_str(), self.css.as_str(), self.worker.as_str()].into_iter()
    }

    /// Canonical name that `requested` ends with, if any. Longest suffix wins so
    /// `x.umd.worker.js` is never mistaken for a shorter match.
    pub fn match_suffix(&self, requested: &str) -> Option<&str> {
        [self.worker.as_str(), self.main.as_str(), self.css.as_str()]
            .into_iter()
            .find(|c| requested.ends_with(c))
    }
}

/// Where a package's replacement content comes from.
#[derive(Debug, Clone, Copy)]
pub enum PackageSource<'a> {
    /// Uploaded archive, content held in `files` / the asset store.
    Stored(&'a Package),
    /// Live dev server; always fresh.
    Dev(&'a DevConfig),
}

impl<'a> PackageSource<'a> {
    /// Base name the canonical filenames derive from.
    pub fn output_name(&self) -> &'a str {
        match self {
            PackageSource::Stored(p) => &p.config.output_name,
            PackageSource::Dev(d) => &d.package_name,
        }
    }

    pub fn canonical_files(&self) -> CanonicalFiles {
        CanonicalFiles::for_output(self.output_name())
    }
}

impl Package {
    pub fn canonical_files(&self) -> CanonicalFiles {
        CanonicalFiles::for_output(&self.config.output_name)
    }

    /// True when the package carries `file_name`, inline or in the asset store.
    pub fn has_file(&self, file_name: &str) -> bool {
        self.files.contains_key(file_name) || self.asset_files.iter().any(|f| f == file_name)
    }
}

impl Application {
    /// True when `url` matches any of this application's patterns.
    pub fn matches_url(&self, url: &str) -> bool {
        pattern::matches(url, &self.url_patterns)
    }

    /// Effective package list: every dev config, then each stored package not
    /// shadowed by a dev config of the same name.
    pub fn package_sources(&self) -> Vec<PackageSource<'_>> {
        let mut out: Vec<PackageSource<'_>> =
            self.dev_configs.iter().map(PackageSource::Dev).collect();
        for pkg in &self.packages {
            if self.is_shadowed(pkg) {
                tracing::debug!(package = %pkg.name, "dev config shadows stored package");
                continue;
            }
            out.push(PackageSource::Stored(pkg));
        }
        out
    }

    fn is_shadowed(&self, pkg: &Package) -> bool {
        self.dev_configs
            .iter()
            .any(|d| d.package_name == pkg.name || d.package_name == pkg.config.output_name)
    }

    /// True when `file_name` belongs to a stored package that a dev config
    /// currently replaces.
    pub fn shadows_file(&self, file_name: &str) -> bool {
        self.packages
            .iter()
            .any(|p| p.has_file(file_name) && self.is_shadowed(p))
    }

    /// Domains to scope rules to. Patterns whose domain cannot be extracted are
    /// dropped (no constraint from that pattern).
    pub fn rule_domains(&self) -> Vec<String> {
        let mut domains = Vec::new();
        for p in &self.url_patterns {
            match pattern::extract_domain(p) {
                Ok(d) => {
                    if !domains.contains(&d) {
                        domains.push(d);
                    }
                }
                Err(e) => tracing::warn!(pattern = %p, "no domain constraint: {}", e),
            }
        }
        domains
    }
}

/// First enabled-or-not application whose patterns match `url`.
pub fn find_matching<'a>(apps: &'a [Application], url: &str) -> Option<&'a Application> {
    apps.iter().find(|a| a.matches_url(url))
}

mod files_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        files: &BTreeMap<String, Vec<u8>>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&str, String> = files
            .iter()
            .map(|(k, v)| (k.as_str(), STANDARD.encode(v)))
            .collect();
        encoded.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(d)?;
        encoded
            .into_iter()
            .map(|(k, v)| {
                STANDARD
                    .decode(v.as_bytes())
                    .map(|bytes| (k.clone(), bytes))
                    .map_err(|e| D::Error::custom(format!("file {k}: {e}")))
            })
            .collect()
    }
}
