use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use engine::MagickEngine;
use photo_core::config::AppConfig;
use photo_core::{Converter, Outcome, Planner, RunSummary};
use std::path::Path;
use std::sync::Arc;
use storage::maintenance::{self, CompactSummary};
use storage::{report, HistoryEntry, Ledger, LedgerStats, Page};

/// Opens the writable ledger and wires the real engine. A missing ImageMagick
/// stops here, before anything is touched.
async fn converter(cfg: &AppConfig) -> Result<Converter> {
    let engine = MagickEngine::discover(cfg.engine.timeout())?;
    let ledger = Ledger::open(&cfg.database.path)
        .await
        .with_context(|| format!("opening ledger {}", cfg.database.path))?;
    Ok(Converter::new(cfg, Arc::new(engine), ledger))
}

pub async fn run_location(cfg: &AppConfig, location: &str, json: bool) -> Result<()> {
    let converter = converter(cfg).await?;
    let summary = converter.run(location).await?;
    println!("{}", render_summary(&summary, json)?);
    Ok(())
}

pub async fn retry(cfg: &AppConfig, path: &Path, json: bool) -> Result<()> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let converter = converter(cfg).await?;
    let outcome = converter.retry_file(&path).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "path": path,
                "status": outcome.status(),
                "detail": describe(&outcome),
            }))?
        );
    } else {
        println!("{}: {} {}", path.display(), outcome.status(), describe(&outcome));
    }
    Ok(())
}

/// Destination-path filter for one location, for the report queries.
fn location_filter(cfg: &AppConfig, location: Option<&str>) -> Result<Option<String>> {
    let planner = Planner::new(&cfg.library);
    Ok(location
        .map(|key| planner.output_root(key))
        .transpose()?
        .map(|p| p.to_string_lossy().into_owned()))
}

pub async fn stats(cfg: &AppConfig, location: Option<&str>, json: bool) -> Result<()> {
    let filter = location_filter(cfg, location)?;
    let ledger = Ledger::open_read_only(&cfg.database.path).await?;
    let stats = report::stats(ledger.pool(), filter.as_deref()).await?;
    ledger.close().await;
    println!("{}", render_stats(&stats, json)?);
    Ok(())
}

pub async fn history(
    cfg: &AppConfig,
    page: Page,
    location: Option<&str>,
    json: bool,
) -> Result<()> {
    let filter = location_filter(cfg, location)?;
    let ledger = Ledger::open_read_only(&cfg.database.path).await?;
    let entries = report::history(ledger.pool(), page, filter.as_deref()).await?;
    ledger.close().await;
    println!("{}", render_history(&entries, json)?);
    Ok(())
}

pub async fn compact(cfg: &AppConfig, json: bool) -> Result<()> {
    let ledger = Ledger::open(&cfg.database.path).await?;
    let summary = maintenance::compact(ledger.pool()).await?;
    ledger.close().await;
    println!("{}", render_compact(&summary, json)?);
    Ok(())
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::AlreadyDone => "(already converted)".to_string(),
        Outcome::SkippedDup { origin } => format!("(copied from {})", origin.display()),
        Outcome::Converted { dims, .. } => format!("{}x{}", dims.width, dims.height),
        Outcome::Failed { step, message } => format!("{step}: {message}"),
    }
}

fn timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|t| t.format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub fn render_summary(summary: &RunSummary, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(summary)?);
    }
    Ok(format!(
        "{}: {} candidates, {} converted, {} already done, {} duplicates, {} failed, {} temp files swept ({:.1}s)",
        summary.location,
        summary.candidates,
        summary.converted,
        summary.already_done,
        summary.skipped_dup,
        summary.failed,
        summary.swept,
        summary.elapsed_ms as f64 / 1000.0
    ))
}

pub fn render_stats(stats: &LedgerStats, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(stats)?);
    }
    let last = stats
        .last_run
        .map(timestamp)
        .unwrap_or_else(|| "never".to_string());
    Ok(format!(
        "files converted: {}\nspace saved: {:.2} MB\nsuccess rate (last 100): {:.1}%\nlast run: {}",
        stats.total_files, stats.total_saved_mb, stats.success_rate, last
    ))
}

pub fn render_history(entries: &[HistoryEntry], json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(entries)?);
    }
    if entries.is_empty() {
        return Ok("no conversions recorded".to_string());
    }
    let lines: Vec<String> = entries
        .iter()
        .map(|e| {
            format!(
                "{}  {:<12}  {}  {} -> {}  {:.2} MB",
                timestamp(e.converted_at),
                e.status.as_str(),
                e.src_name,
                e.original_size(),
                e.new_size(),
                e.saved_mb
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

pub fn render_compact(summary: &CompactSummary, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(summary)?);
    }
    Ok(format!(
        "compacted {} groups, deleted {} rows",
        summary.groups, summary.deleted
    ))
}
