//! Init command implementation

use anyhow::Result;

use super::CommandContext;
use crate::core::init::{init_project, InitOptions};
use crate::error::KilnError;

/// Execute `kiln init`
pub fn execute(ctx: &CommandContext, name: Option<String>, force: bool) -> Result<()> {
    let result =
        init_project(&ctx.project_dir, &InitOptions { name, force }).map_err(KilnError::from)?;

    if ctx.output.json {
        return ctx.output.json(&serde_json::json!({
            "project_file": result.project_file,
            "name": result.name,
            "gitignore_updated": result.gitignore_updated,
        }));
    }

    ctx.output.success(&format!(
        "Created {} for '{}'",
        result.project_file.display(),
        result.name
    ));
    if result.gitignore_updated {
        ctx.output.info("  Updated .gitignore");
    }
    ctx.output
        .info("  Edit the [dependencies] and [stages] commands, then run 'kiln build'");
    Ok(())
}
