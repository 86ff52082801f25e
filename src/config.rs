//! Layered configuration for the task board.
//!
//! Values resolve in this order (highest first):
//! 1. Command-line flags
//! 2. `TASKBOARD_*` environment variables (a `.env` file is loaded first)
//! 3. The TOML file (`.taskboard/taskboard.toml` or `--config <path>`)
//! 4. Compiled defaults
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! db_path = ".taskboard/board.db"
//! dev_mode = false
//!
//! [board]
//! index_policy = "reject"   # or "clamp"
//! ws_buffer = 256
//!
//! [logging]
//! level = "info"
//! format = "pretty"         # or "json"
//! dir = ".taskboard/logs"   # optional, enables a daily rolling file
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::board::ordering::IndexPolicy;
use crate::board::server::ServerConfig;

pub const CONFIG_DIR_NAME: &str = ".taskboard";
pub const CONFIG_FILE_NAME: &str = "taskboard.toml";

/// Directory holding the config file and, by default, the database.
pub fn config_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR_NAME)
}

/// Default location of the config file for a project directory.
pub fn config_path(project_dir: &Path) -> PathBuf {
    config_dir(project_dir).join(CONFIG_FILE_NAME)
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Permissive CORS and bind on all interfaces
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR_NAME).join("board.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

/// `[board]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSection {
    /// How out-of-range move indices are handled
    #[serde(default)]
    pub index_policy: IndexPolicy,
    /// Notification bus capacity per server
    #[serde(default = "default_ws_buffer")]
    pub ws_buffer: usize,
}

fn default_ws_buffer() -> usize {
    256
}

impl Default for BoardSection {
    fn default() -> Self {
        Self {
            index_policy: IndexPolicy::default(),
            ws_buffer: default_ws_buffer(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Write logs to a daily rolling file in this directory instead of stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

/// Command-line overrides; `None` leaves the lower layers in charge.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<PathBuf>,
    pub dev_mode: Option<bool>,
    pub index_policy: Option<IndexPolicy>,
    pub log_level: Option<String>,
}

/// Root of `taskboard.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub board: BoardSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl BoardConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskboard.toml")
    }

    /// Load `taskboard.toml` from `dir`, or defaults if there is none.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve every layer for a run of the binary.
    ///
    /// An explicit `--config` path must exist; the default path may be absent.
    pub fn resolve(project_dir: &Path, explicit: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::load_or_default(&config_dir(project_dir))?,
        };
        config.apply_env()?;
        config.apply_overrides(overrides);

        let problems = config.validate();
        if !problems.is_empty() {
            anyhow::bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
        }
        Ok(config)
    }

    /// Save configuration to a TOML file, creating its directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.to_toml_string()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize taskboard.toml")
    }

    /// Apply `TASKBOARD_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("TASKBOARD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TASKBOARD_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid TASKBOARD_PORT '{}'", port))?;
        }
        if let Some(path) = lookup("TASKBOARD_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(dev) = lookup("TASKBOARD_DEV_MODE") {
            self.server.dev_mode = parse_bool(&dev)
                .with_context(|| format!("Invalid TASKBOARD_DEV_MODE '{}'", dev))?;
        }
        if let Some(policy) = lookup("TASKBOARD_INDEX_POLICY") {
            self.board.index_policy = policy.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(buffer) = lookup("TASKBOARD_WS_BUFFER") {
            self.board.ws_buffer = buffer
                .parse()
                .with_context(|| format!("Invalid TASKBOARD_WS_BUFFER '{}'", buffer))?;
        }
        if let Some(level) = lookup("TASKBOARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TASKBOARD_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Some(dir) = lookup("TASKBOARD_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(path) = &overrides.db_path {
            self.server.db_path = path.clone();
        }
        if let Some(dev) = overrides.dev_mode {
            self.server.dev_mode = dev;
        }
        if let Some(policy) = overrides.index_policy {
            self.board.index_policy = policy;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validate the configuration and return any problems.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.server.host.trim().is_empty() {
            problems.push("server.host must not be empty".to_string());
        }
        if self.board.ws_buffer == 0 {
            problems.push("board.ws_buffer must be at least 1".to_string());
        }
        if EnvFilter::try_new(&self.logging.level).is_err() {
            problems.push(format!(
                "Invalid logging.level '{}': expected a tracing filter such as 'info' or 'taskboard=debug'",
                self.logging.level
            ));
        }

        problems
    }

    /// Anchor relative paths at the project directory.
    pub fn rooted_at(mut self, project_dir: &Path) -> Self {
        self.server.db_path = project_dir.join(&self.server.db_path);
        if let Some(dir) = self.logging.dir.take() {
            self.logging.dir = Some(project_dir.join(dir));
        }
        self
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            db_path: self.server.db_path.clone(),
            dev_mode: self.server.dev_mode,
            index_policy: self.board.index_policy,
            ws_buffer: self.board.ws_buffer,
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("expected true or false"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BoardConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3141);
        assert_eq!(config.server.db_path, PathBuf::from(".taskboard/board.db"));
        assert!(!config.server.dev_mode);
        assert_eq!(config.board.index_policy, IndexPolicy::Reject);
        assert_eq!(config.board.ws_buffer, 256);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.logging.dir.is_none());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8080
db_path = "/var/lib/taskboard/board.db"
dev_mode = true

[board]
index_policy = "clamp"
ws_buffer = 64

[logging]
level = "debug"
format = "json"
dir = "/var/log/taskboard"
"#;
        let config = BoardConfig::parse(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert!(config.server.dev_mode);
        assert_eq!(config.board.index_policy, IndexPolicy::Clamp);
        assert_eq!(config.board.ws_buffer, 64);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.dir, Some(PathBuf::from("/var/log/taskboard")));
    }

    #[test]
    fn test_parse_partial_keeps_defaults() {
        let config = BoardConfig::parse("[board]\nindex_policy = \"clamp\"\n").unwrap();
        assert_eq!(config.board.index_policy, IndexPolicy::Clamp);
        assert_eq!(config.board.ws_buffer, 256);
        assert_eq!(config.server, ServerSection::default());
        assert_eq!(config.logging, LoggingSection::default());
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(BoardConfig::parse("").unwrap(), BoardConfig::default());
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        let err = BoardConfig::parse("[board]\nindex_policy = \"wrap\"\n").unwrap_err();
        assert!(err.to_string().contains("taskboard.toml"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = BoardConfig::parse("[server]\nport = 8080\nhost = \"10.0.0.1\"\n").unwrap();
        config
            .apply_env_with(env(&[
                ("TASKBOARD_PORT", "9000"),
                ("TASKBOARD_DEV_MODE", "yes"),
                ("TASKBOARD_INDEX_POLICY", "Clamp"),
                ("TASKBOARD_LOG_FORMAT", "json"),
                ("TASKBOARD_LOG_DIR", "/tmp/logs"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "10.0.0.1"); // from file
        assert!(config.server.dev_mode);
        assert_eq!(config.board.index_policy, IndexPolicy::Clamp);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.dir, Some(PathBuf::from("/tmp/logs")));
    }

    #[test]
    fn test_env_rejects_bad_values() {
        let mut config = BoardConfig::default();
        let err = config
            .apply_env_with(env(&[("TASKBOARD_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(err.to_string().contains("TASKBOARD_PORT"));

        let mut config = BoardConfig::default();
        assert!(
            config
                .apply_env_with(env(&[("TASKBOARD_DEV_MODE", "maybe")]))
                .is_err()
        );
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = BoardConfig::default();
        config
            .apply_env_with(env(&[("TASKBOARD_PORT", "9000"), ("TASKBOARD_LOG_LEVEL", "warn")]))
            .unwrap();
        config.apply_overrides(&Overrides {
            port: Some(7000),
            db_path: Some(PathBuf::from("other.db")),
            ..Default::default()
        });

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.db_path, PathBuf::from("other.db"));
        assert_eq!(config.logging.level, "warn"); // not overridden on CLI
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = BoardConfig::default();
        config.board.ws_buffer = 0;
        config.logging.level = "taskboard=loud".to_string();
        let problems = config.validate();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("ws_buffer"));
    }

    #[test]
    fn test_save_and_load_or_default() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            BoardConfig::load_or_default(&config_dir(dir.path())).unwrap(),
            BoardConfig::default()
        );

        let mut config = BoardConfig::default();
        config.server.port = 4000;
        config.save(&config_path(dir.path())).unwrap();

        let loaded = BoardConfig::load_or_default(&config_dir(dir.path())).unwrap();
        assert_eq!(loaded.server.port, 4000);
    }

    #[test]
    fn test_resolve_requires_explicit_file_to_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = BoardConfig::resolve(dir.path(), Some(&missing), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_rooted_at_keeps_absolute_paths() {
        let mut config = BoardConfig::default();
        config.logging.dir = Some(PathBuf::from("/var/log/taskboard"));
        let config = config.rooted_at(Path::new("/srv/project"));
        assert_eq!(
            config.server.db_path,
            PathBuf::from("/srv/project/.taskboard/board.db")
        );
        assert_eq!(config.logging.dir, Some(PathBuf::from("/var/log/taskboard")));
    }

    #[test]
    fn test_server_config_mapping() {
        let mut config = BoardConfig::default();
        config.board.index_policy = IndexPolicy::Clamp;
        config.board.ws_buffer = 32;
        let server = config.server_config();
        assert_eq!(server.port, 3141);
        assert_eq!(server.index_policy, IndexPolicy::Clamp);
        assert_eq!(server.ws_buffer, 32);
    }
}
