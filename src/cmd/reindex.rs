//! Order repair command — `taskboard reindex`.

use anyhow::{Context, Result};

use taskboard::board::db::BoardDb;
use taskboard::config::BoardConfig;

pub fn cmd_reindex(config: &BoardConfig, workspace: Option<&str>) -> Result<()> {
    let db_path = &config.server.db_path;
    if !db_path.exists() {
        anyhow::bail!(
            "No database at {}. Run 'taskboard init' first.",
            db_path.display()
        );
    }
    let db = BoardDb::new(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    let reports = match workspace {
        Some(id) => db.reindex_workspace(id)?,
        None => db.reindex_all()?,
    };

    if reports.is_empty() {
        println!("All columns are densely ordered. Nothing to repair.");
        return Ok(());
    }
    for report in &reports {
        println!(
            "Repaired {} in workspace {}: {} task(s) renumbered",
            report.column, report.workspace_id, report.changed
        );
    }
    println!("Repaired {} column(s).", reports.len());
    Ok(())
}
