//! Database bootstrap command — `taskboard init`.

use anyhow::{Context, Result};

use taskboard::board::db::BoardDb;
use taskboard::config::BoardConfig;

pub fn cmd_init(config: &BoardConfig) -> Result<()> {
    let db_path = &config.server.db_path;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    BoardDb::new(db_path)
        .with_context(|| format!("Failed to initialize database at {}", db_path.display()))?;
    println!("Board database initialized at {}", db_path.display());
    Ok(())
}
