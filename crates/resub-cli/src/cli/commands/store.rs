//! Asset store commands: put, get, remove, usage.

use anyhow::{Context, Result};
use resub_core::background::Background;
use std::path::Path;

pub async fn run_put(bg: &Background, name: &str, path: &Path) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    bg.assets().put(name, &data).await?;
    println!("Stored {} ({} bytes)", name, data.len());
    Ok(())
}

pub async fn run_get(bg: &Background, name: &str, out: &Path) -> Result<()> {
    let data = bg.assets().get(name).await?;
    tokio::fs::write(out, &data)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("Wrote {} bytes to {}", data.len(), out.display());
    Ok(())
}

pub async fn run_remove(bg: &Background, name: &str) -> Result<()> {
    bg.assets().remove(name).await?;
    println!("Removed {}", name);
    Ok(())
}

pub async fn run_usage(bg: &Background) -> Result<()> {
    let usage = bg.assets().usage().await?;
    let pct = if usage.quota == 0 {
        0.0
    } else {
        usage.used as f64 * 100.0 / usage.quota as f64
    };
    println!(
        "{} of {} bytes used ({:.1}%), {} available",
        usage.used,
        usage.quota,
        pct,
        usage.available()
    );
    Ok(())
}
