//! Configuration view and validation commands — `taskboard config`.

use anyhow::Result;
use std::path::Path;

use super::super::ConfigCommands;
use taskboard::config::{self, BoardConfig, Overrides};

pub fn cmd_config(
    project_dir: &Path,
    explicit: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config::config_path(project_dir));

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No taskboard.toml at {}; showing defaults", config_path.display());
            }
            println!("# Effective values (with env overrides)");
            println!();
            let resolved = BoardConfig::resolve(project_dir, explicit, &Overrides::default())?;
            print!("{}", resolved.to_toml_string()?);
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No taskboard.toml found. Using defaults (valid).");
                return Ok(());
            }

            let mut file = BoardConfig::load(&config_path)?;
            file.apply_env()?;
            let problems = file.validate();

            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
                anyhow::bail!("{} configuration problem(s)", problems.len());
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("taskboard.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            BoardConfig::default().save(&config_path)?;

            println!("Created taskboard.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, db_path, dev_mode");
            println!("  - [board] index_policy, ws_buffer");
            println!("  - [logging] level, format, dir");
        }
    }

    Ok(())
}
