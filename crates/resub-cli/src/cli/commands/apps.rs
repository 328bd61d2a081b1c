//! `resub apps`, `resub toggle` and `resub set-pattern`.

use anyhow::Result;
use resub_core::background::Background;
use resub_core::model::Application;

fn describe_sources(app: &Application) -> String {
    let mut parts: Vec<String> = app
        .dev_configs
        .iter()
        .map(|d| format!("{} (dev {})", d.package_name, d.base_url()))
        .collect();
    parts.extend(app.packages.iter().map(|p| p.name.clone()));
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(", ")
    }
}

pub async fn run_apps(bg: &Background) -> Result<()> {
    let apps = bg.applications().await;
    if apps.is_empty() {
        println!("No applications.");
        return Ok(());
    }
    println!("{:<16} {:<8} {:<32} {}", "ID", "ENABLED", "PATTERNS", "PACKAGES");
    for app in apps {
        println!(
            "{:<16} {:<8} {:<32} {}",
            app.id,
            if app.enabled { "yes" } else { "no" },
            app.url_patterns.join(" "),
            describe_sources(&app)
        );
    }
    Ok(())
}

pub async fn run_toggle(bg: &Background, id: &str, enabled: Option<bool>) -> Result<()> {
    let app = bg.toggle_enabled(id, enabled).await?;
    println!(
        "{} {}",
        if app.enabled { "Enabled" } else { "Disabled" },
        app.id
    );
    Ok(())
}

pub async fn run_set_pattern(bg: &Background, id: &str, pattern: &str) -> Result<()> {
    let app = bg.update_match_pattern(id, pattern).await?;
    println!("{} now matches {}", app.id, app.url_patterns.join(" "));
    Ok(())
}
