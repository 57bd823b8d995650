//! Clean command implementation
//!
//! The dependency cache lives in the scratch root and is left alone; use
//! `kiln cache clean` for that.

use anyhow::Result;

use super::CommandContext;
use crate::core::clean::clean_project;
use crate::error::KilnError;

/// Execute `kiln clean`
pub fn execute(ctx: &CommandContext) -> Result<()> {
    let config = ctx.load_project()?;
    let result = clean_project(&ctx.project_dir, &config).map_err(KilnError::from)?;

    if ctx.output.json {
        return ctx.output.json(&serde_json::json!({
            "removed": result.removed,
            "skipped": result.skipped,
        }));
    }

    if result.removed.is_empty() {
        ctx.output.success("Nothing to clean");
    } else {
        for dir in &result.removed {
            ctx.output.info(&format!("  Removed {dir}/"));
        }
        ctx.output.success("Clean complete");
    }
    Ok(())
}
