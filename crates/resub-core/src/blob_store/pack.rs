//! Saving a package's files under a shared quota budget.

use super::budget::QuotaBudget;
use super::{estimated_encoded_size, AssetStore, BlobError};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PackReport {
    pub saved: Vec<String>,
    /// Files not attempted because the budget ran out.
    pub skipped: Vec<String>,
    /// Files whose write failed, with the error text.
    pub failed: Vec<(String, String)>,
}

impl PackReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }
}

fn is_important(name: &str, important: &[String]) -> bool {
    important.iter().any(|p| name.contains(p.as_str()))
}

/// Important files first, then ascending size. Stable for equal keys.
pub fn prioritize<'a>(
    files: &'a [(String, Vec<u8>)],
    important: &[String],
) -> Vec<&'a (String, Vec<u8>)> {
    let mut ordered: Vec<_> = files.iter().collect();
    ordered.sort_by_key(|(name, data)| (!is_important(name, important), data.len()));
    ordered
}

/// Write `files` in priority order until the first one that doesn't fit in
/// `quota - used - safety_buffer`.
pub async fn save_batch(
    assets: &AssetStore,
    files: &[(String, Vec<u8>)],
    important: &[String],
) -> Result<PackReport, BlobError> {
    let usage = assets.usage().await?;
    let budget = QuotaBudget::new(
        usage.quota,
        usage.used,
        assets.blobs().limits().safety_buffer_bytes,
    );
    tracing::debug!(
        files = files.len(),
        remaining = budget.remaining(),
        "saving package files"
    );

    let mut report = PackReport::default();
    let mut ordered = prioritize(files, important).into_iter();
    for (name, data) in ordered.by_ref() {
        let estimate = estimated_encoded_size(data.len() as u64);
        if !budget.try_reserve(estimate) {
            tracing::warn!(
                file = %name,
                estimate,
                remaining = budget.remaining(),
                "quota budget exhausted"
            );
            report.skipped.push(name.clone());
            break;
        }
        match assets.put(name, data).await {
            Ok(()) => report.saved.push(name.clone()),
            Err(e) => {
                budget.release(estimate);
                tracing::warn!(file = %name, error = %e, "failed to save file");
                report.failed.push((name.clone(), e.to_string()));
            }
        }
    }
    report.skipped.extend(ordered.map(|(name, _)| name.clone()));

    tracing::info!(
        saved = report.saved.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "package files saved"
    );
    Ok(report)
}
