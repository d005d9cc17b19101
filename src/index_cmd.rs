//! `coach index` and `coach reset`.

use anyhow::{Context, Result};

use trail_coach_core::index::BuildReport;

use crate::config::Config;
use crate::knowledge::load_knowledge_base;
use crate::progress::ProgressMode;
use crate::worker::{open_cache, Coach};

/// Build the index (or load it from the cache) and print the build report.
pub async fn run_index(config: &Config, mode: ProgressMode) -> Result<()> {
    let knowledge_base = load_knowledge_base(&config.knowledge.path)?;
    let mut coach = Coach::from_config(config).await?;
    let reporter = mode.reporter();

    let report = coach
        .initialize(knowledge_base, reporter.as_ref())
        .await
        .context("Index build failed")?;

    print!("{}", format_report(&report, coach.cache().backend_name()));
    Ok(())
}

/// Clear the persistent cache so the next start re-embeds everything.
pub async fn run_reset(config: &Config) -> Result<()> {
    let cache = open_cache(&config.cache).await?;
    cache.clear().await.context("Failed to clear the index cache")?;
    println!("Index cache cleared ({}).", cache.backend_name());
    Ok(())
}

fn format_report(report: &BuildReport, backend: &str) -> String {
    let mut out = format!(
        "Index {} ({} entries, {} phrasings)\n",
        report.source.as_str(),
        report.entries,
        report.phrasings
    );
    out.push_str(&format!("  version:   {}\n", report.version));
    out.push_str(&format!("  embedded:  {}\n", report.embedded));
    if report.dropped > 0 {
        out.push_str(&format!("  dropped:   {}\n", report.dropped));
    }
    let written = if report.cache_written { "written" } else { "unchanged" };
    out.push_str(&format!("  cache:     {} ({})\n", backend, written));
    out
}
