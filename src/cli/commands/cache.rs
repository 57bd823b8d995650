//! CLI commands for `kiln cache`
//!
//! Every subcommand is scoped to the current project's dependency entries
//! in the scratch root.

use anyhow::Result;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::CommandContext;
use crate::config::defaults::VENDOR_KIND;
use crate::core::cache::{format_size, CacheEntry};
use crate::error::KilnError;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Execute `kiln cache info`
pub fn execute_info(ctx: &CommandContext) -> Result<()> {
    let cache = ctx.pipeline()?.cache();
    let info = cache.info(VENDOR_KIND);

    if ctx.output.json {
        let entries: Vec<serde_json::Value> = info.entries.iter().map(entry_json).collect();
        return ctx.output.json(&serde_json::json!({
            "path": info.path,
            "size_bytes": info.size_bytes,
            "item_count": info.item_count,
            "entries": entries,
        }));
    }
    if ctx.output.quiet {
        return Ok(());
    }

    println!("Cache Information\n");
    println!("Location: {}", info.path.display());
    println!("Size: {}", info.format_size());
    println!("Items: {}", info.item_count);
    for entry in &info.entries {
        println!(
            "  {}  {:>10}  {}",
            entry.fingerprint.as_str(),
            format_size(entry.size_bytes),
            age(entry)
        );
    }
    Ok(())
}

/// Execute `kiln cache clean`
pub fn execute_clean(ctx: &CommandContext) -> Result<()> {
    let cache = ctx.pipeline()?.cache();
    let freed = cache.clear(VENDOR_KIND).map_err(KilnError::from)?;

    if ctx.output.json {
        return ctx
            .output
            .json(&serde_json::json!({ "freed_bytes": freed }));
    }
    if freed > 0 {
        ctx.output
            .success(&format!("Cache cleared ({} freed)", format_size(freed)));
    } else {
        ctx.output.success("Cache was already empty");
    }
    Ok(())
}

/// Execute `kiln cache evict --older-than-days N`
pub fn execute_evict(ctx: &CommandContext, older_than_days: u64) -> Result<()> {
    let cache = ctx.pipeline()?.cache();
    let older_than = Duration::from_secs(older_than_days.saturating_mul(SECS_PER_DAY));
    let report = cache
        .evict(VENDOR_KIND, older_than)
        .map_err(KilnError::from)?;

    if ctx.output.json {
        return ctx.output.json(&serde_json::json!({
            "entries": report.entries,
            "staging_dirs": report.staging_dirs,
            "freed_bytes": report.freed_bytes,
        }));
    }
    ctx.output.success(&format!(
        "Evicted {} entr{} and {} abandoned staging dir(s) ({} freed)",
        report.entries,
        if report.entries == 1 { "y" } else { "ies" },
        report.staging_dirs,
        format_size(report.freed_bytes)
    ));
    Ok(())
}

fn created_unix(entry: &CacheEntry) -> Option<u64> {
    entry
        .created_at
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}

fn entry_json(entry: &CacheEntry) -> serde_json::Value {
    serde_json::json!({
        "fingerprint": entry.fingerprint,
        "path": entry.path,
        "size_bytes": entry.size_bytes,
        "created_at_unix": created_unix(entry),
        "written_by": entry.written_by,
    })
}

fn age(entry: &CacheEntry) -> String {
    let Some(age) = entry
        .created_at
        .and_then(|t| SystemTime::now().duration_since(t).ok())
    else {
        return "unknown age".to_string();
    };
    let days = age.as_secs() / SECS_PER_DAY;
    match days {
        0 => "today".to_string(),
        1 => "1 day old".to_string(),
        n => format!("{n} days old"),
    }
}
