use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable consulted when `bot.token` is not set.
pub const TOKEN_ENV: &str = "DISCORD_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Bot connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Bot token (falls back to `DISCORD_TOKEN`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Command prefix.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// User ids allowed to manage snippets. Empty means the application owner.
    #[serde(default)]
    pub owners: Vec<u64>,
    /// Enables the owner-only `debug` command and its dev environment.
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_prefix() -> String {
    "!".to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            prefix: default_prefix(),
            owners: Vec::new(),
            dev_mode: false,
        }
    }
}

impl BotConfig {
    /// Token from the config file, or from the environment.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()))
    }
}

/// Snippet database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file (defaults to `~/.instacmd/instacmd.db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Snippet compiler settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Directory `import` statements resolve against while compiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_dir: Option<PathBuf>,
    /// Operation ceiling per script run. Unset means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_operations: Option<u64>,
}

/// Bounded waits for operator input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Yes/no prompt before replacing an existing snippet.
    #[serde(default = "default_confirm_secs")]
    pub confirm_secs: u64,
    /// Waiting for the code message after a bare `create`.
    #[serde(default = "default_followup_secs")]
    pub followup_secs: u64,
}

fn default_confirm_secs() -> u64 {
    30
}

fn default_followup_secs() -> u64 {
    900
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            confirm_secs: default_confirm_secs(),
            followup_secs: default_followup_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn confirm(&self) -> Duration {
        Duration::from_secs(self.confirm_secs)
    }

    pub fn followup(&self) -> Duration {
        Duration::from_secs(self.followup_secs)
    }
}

/// Top-level instacmd configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstaCmdConfig {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scripting: ScriptingConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl InstaCmdConfig {
    /// Database path, resolved against the config directory when unset.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("instacmd.db")),
        }
    }

    /// Module directory, resolved against the config directory when unset.
    pub fn module_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.scripting.module_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("modules")),
        }
    }
}

/// Resolve the instacmd config directory (~/.instacmd/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".instacmd"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.instacmd/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<InstaCmdConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<InstaCmdConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(InstaCmdConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: InstaCmdConfig = json5::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InstaCmdConfig::default();
        assert_eq!(config.bot.prefix, "!");
        assert!(config.bot.owners.is_empty());
        assert!(!config.bot.dev_mode);
        assert_eq!(config.timeouts.confirm(), Duration::from_secs(30));
        assert_eq!(config.timeouts.followup(), Duration::from_secs(900));
        assert!(config.scripting.max_operations.is_none());
    }

    #[test]
    fn test_json5_parse() {
        let json5_str = r#"{
            bot: {
                prefix: "?",
                owners: [1234, 5678],
                dev_mode: true,
            },
            scripting: { module_dir: "/srv/instacmd/modules", max_operations: 100000 },
            timeouts: { confirm_secs: 10 },
        }"#;
        let config: InstaCmdConfig = json5::from_str(json5_str).unwrap();
        assert_eq!(config.bot.prefix, "?");
        assert_eq!(config.bot.owners, vec![1234, 5678]);
        assert!(config.bot.dev_mode);
        assert_eq!(config.scripting.max_operations, Some(100000));
        assert_eq!(
            config.module_dir().unwrap(),
            PathBuf::from("/srv/instacmd/modules")
        );
        assert_eq!(config.timeouts.confirm_secs, 10);
        // Unspecified keys keep their defaults.
        assert_eq!(config.timeouts.followup_secs, 900);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.json5")).unwrap();
        assert_eq!(config.bot.prefix, "!");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(
            &path,
            "// comments are fine\n{ bot: { prefix: '$' }, storage: { path: 'snippets.db' } }",
        )
        .unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.bot.prefix, "$");
        assert_eq!(loaded.database_path().unwrap(), PathBuf::from("snippets.db"));
    }

    #[test]
    fn test_config_token_wins_over_env() {
        let config = BotConfig {
            token: Some("from-file".into()),
            ..BotConfig::default()
        };
        assert_eq!(config.resolve_token().as_deref(), Some("from-file"));
    }
}
