//! Commands that create applications, packages, dev configs and replacements.

use anyhow::{bail, Context, Result};
use resub_core::background::Background;
use resub_core::model::{Application, DevConfig, Package, PackageConfig, UrlReplacement};
use std::collections::BTreeMap;
use std::path::Path;

/// Create `id`, or update name, pattern and enabled flag of an existing one.
/// Packages and dev configs of an existing application are kept.
pub async fn run_add_app(
    bg: &Background,
    id: &str,
    pattern: &str,
    name: Option<String>,
    enabled: bool,
) -> Result<()> {
    let existing = bg.application(id).await;
    let app = Application {
        id: id.to_string(),
        name: name.unwrap_or_else(|| id.to_string()),
        enabled,
        url_patterns: vec![pattern.to_string()],
        packages: existing
            .as_ref()
            .map(|a| a.packages.clone())
            .unwrap_or_default(),
        dev_configs: existing
            .as_ref()
            .map(|a| a.dev_configs.clone())
            .unwrap_or_default(),
        created_at: existing.as_ref().map_or(0, |a| a.created_at),
        updated_at: 0,
    };
    bg.upsert_application(app).await?;
    println!(
        "{} application {}",
        if existing.is_some() { "Updated" } else { "Added" },
        id
    );
    Ok(())
}

pub async fn run_add_package(
    bg: &Background,
    app_id: &str,
    output_name: &str,
    paths: &[&Path],
) -> Result<()> {
    let mut files = BTreeMap::new();
    for path in paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("not a file path: {}", path.display()))?;
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        files.insert(name.to_string(), data);
    }
    let package = Package {
        id: uuid::Uuid::new_v4().to_string(),
        name: output_name.to_string(),
        files,
        asset_files: Vec::new(),
        config: PackageConfig::new(output_name),
        uploaded_at: 0,
    };
    let report = bg.add_package(app_id, package).await?;
    println!("Stored {} file(s) for {}", report.saved.len(), output_name);
    for name in &report.skipped {
        println!("  skipped (no space): {}", name);
    }
    for (name, reason) in &report.failed {
        println!("  failed: {}: {}", name, reason);
    }
    Ok(())
}

pub async fn run_add_dev(bg: &Background, app_id: &str, package: &str, dev_url: &str) -> Result<()> {
    if !(dev_url.starts_with("http://") || dev_url.starts_with("https://")) {
        bail!("dev url must be http(s): {}", dev_url);
    }
    let dev = DevConfig {
        package_name: package.to_string(),
        dev_url: dev_url.to_string(),
    };
    let stream = dev.event_stream_url();
    bg.set_dev_config(app_id, dev).await?;
    println!("{} in {} now follows {}", package, app_id, stream);
    Ok(())
}

pub async fn run_add_replacement(bg: &Background, source: &str, target: &str) -> Result<()> {
    let mut replacements = bg.url_replacements().await;
    replacements.retain(|r| r.source_url != source);
    replacements.push(UrlReplacement {
        id: uuid::Uuid::new_v4().to_string(),
        source_url: source.to_string(),
        target_url: target.to_string(),
        enabled: true,
    });
    bg.set_url_replacements(replacements).await?;
    println!("Redirecting {} to {}", source, target);
    Ok(())
}
