//! `resub rules <url>` – print the rule batch for a navigation.

use anyhow::Result;
use resub_core::background::Background;

pub async fn run_rules(bg: &Background, url: &str) -> Result<()> {
    let rules = bg.rules_for(url).await?;
    println!("{}", serde_json::to_string_pretty(&rules)?);
    Ok(())
}
