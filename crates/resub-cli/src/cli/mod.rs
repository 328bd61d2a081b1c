//! CLI for resub.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use resub_core::background::{Background, Services};
use resub_core::config::{self, ResubConfig};
use resub_core::fetch::CurlFetcher;
use resub_core::kv::SqliteKvStore;
use resub_core::live_reload::CurlEventSource;
use resub_core::rules::MemoryRuleHost;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use commands::{
    run_add_app, run_add_dev, run_add_package, run_add_replacement, run_apps, run_get, run_put,
    run_remove, run_rules, run_set_pattern, run_toggle, run_usage, run_watch,
};

/// Top-level CLI for resub.
#[derive(Debug, Parser)]
#[command(name = "resub")]
#[command(about = "resub: substitute page bundles with local builds", long_about = None)]
pub struct Cli {
    /// Trace-level logging for resub crates (RUST_LOG still wins).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// List applications.
    Apps,

    /// Enable or disable an application (flips it without --enabled).
    Toggle {
        /// Application identifier.
        id: String,
        /// Set explicitly instead of flipping.
        #[arg(long)]
        enabled: Option<bool>,
    },

    /// Replace an application's URL patterns with a single pattern.
    SetPattern {
        /// Application identifier.
        id: String,
        /// Glob such as `https://*.example.com/*`.
        pattern: String,
    },

    /// Print the rule batch a navigation to URL would install, as JSON.
    Rules {
        /// Page URL.
        url: String,
    },

    /// Store a file in the asset store under NAME.
    Put {
        /// Asset name (usually the file name the page requests).
        name: String,
        /// File to read.
        path: PathBuf,
    },

    /// Write a stored asset to a file.
    Get {
        /// Asset name.
        name: String,
        /// Output path.
        out: PathBuf,
    },

    /// Delete a stored asset and its chunks.
    Remove {
        /// Asset name.
        name: String,
    },

    /// Show storage usage against the quota.
    Usage,

    /// Follow a dev server and log every live reload until ctrl-c.
    Watch {
        /// Package name; assets are fetched as `{package}.umd.js` etc.
        package: String,
        /// Dev server base URL, e.g. http://localhost:5173.
        dev_url: String,
    },

    /// Create or replace an application.
    AddApp {
        /// Application identifier.
        id: String,
        /// URL pattern the application applies to.
        pattern: String,
        /// Display name (defaults to the id).
        #[arg(long)]
        name: Option<String>,
        /// Create the application disabled.
        #[arg(long)]
        disabled: bool,
    },

    /// Upload build output files as a package of an application.
    AddPackage {
        /// Application identifier.
        app_id: String,
        /// Base name of the canonical files (`{output}.umd.js`, `{output}.css`, ...).
        #[arg(long, value_name = "NAME")]
        output_name: String,
        /// Files to upload.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Serve a package of an application from a dev server.
    AddDev {
        /// Application identifier.
        app_id: String,
        /// Package name to shadow.
        package: String,
        /// Dev server base URL.
        dev_url: String,
    },

    /// Redirect one URL to another regardless of application.
    AddReplacement {
        /// URL to redirect.
        source: String,
        /// Target URL; an origin-only target keeps the request path.
        target: String,
    },
}

/// Open the persisted state with rule installs kept in-process.
async fn open_background(cfg: ResubConfig) -> Result<Background> {
    let kv = SqliteKvStore::open_default(None).await?;
    Background::open(
        cfg,
        Services {
            kv: Arc::new(kv),
            rule_host: Arc::new(MemoryRuleHost::new()),
            event_source: Arc::new(CurlEventSource::new()),
            fetcher: Arc::new(CurlFetcher::new()),
        },
    )
    .await
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        if let CliCommand::Watch { package, dev_url } = &self.command {
            return run_watch(&cfg, package, dev_url).await;
        }

        let bg = open_background(cfg).await?;
        match self.command {
            CliCommand::Apps => run_apps(&bg).await?,
            CliCommand::Toggle { id, enabled } => run_toggle(&bg, &id, enabled).await?,
            CliCommand::SetPattern { id, pattern } => run_set_pattern(&bg, &id, &pattern).await?,
            CliCommand::Rules { url } => run_rules(&bg, &url).await?,
            CliCommand::Put { name, path } => run_put(&bg, &name, &path).await?,
            CliCommand::Get { name, out } => run_get(&bg, &name, &out).await?,
            CliCommand::Remove { name } => run_remove(&bg, &name).await?,
            CliCommand::Usage => run_usage(&bg).await?,
            CliCommand::AddApp {
                id,
                pattern,
                name,
                disabled,
            } => run_add_app(&bg, &id, &pattern, name, !disabled).await?,
            CliCommand::AddPackage {
                app_id,
                output_name,
                files,
            } => {
                let paths: Vec<&Path> = files.iter().map(PathBuf::as_path).collect();
                run_add_package(&bg, &app_id, &output_name, &paths).await?;
            }
            CliCommand::AddDev {
                app_id,
                package,
                dev_url,
            } => run_add_dev(&bg, &app_id, &package, &dev_url).await?,
            CliCommand::AddReplacement { source, target } => {
                run_add_replacement(&bg, &source, &target).await?
            }
            CliCommand::Watch { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
