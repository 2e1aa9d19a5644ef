//! Configuration loading and config file resolution
//!
//! Config file resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. `TSGEN_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/tsgen/config.toml` on Linux)
//! 4. Compiled defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "TSGEN_CONFIG";

/// Role a source document plays during extraction
///
/// Only deal-specific documents can yield an accepted, resolved value on
/// their own. Policy documents supply defaults. Reference documents are
/// format guidance and never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    DealSpecific,
    Policy,
    Reference,
}

impl SourceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceRole::DealSpecific => "deal_specific",
            SourceRole::Policy => "policy",
            SourceRole::Reference => "reference",
        }
    }
}

/// Maps file names in the data directory to a source key and role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRule {
    /// Key used in prompts and in the schema's source priority list
    pub key: String,
    /// Case-insensitive file name pattern (`*` and `?` wildcards)
    pub pattern: String,
    pub role: SourceRole,
}

impl SourceRule {
    pub fn new(key: impl Into<String>, pattern: impl Into<String>, role: SourceRole) -> Self {
        Self {
            key: key.into(),
            pattern: pattern.into(),
            role,
        }
    }
}

/// Default rules: the deal model spreadsheet export and the firm policy
pub fn default_source_rules() -> Vec<SourceRule> {
    vec![
        SourceRule::new("deal_model", "model*", SourceRole::DealSpecific),
        SourceRule::new("deal_model", "deal_model*", SourceRole::DealSpecific),
        SourceRule::new("firm_policy", "firm_policy*", SourceRole::Policy),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Language model endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Transport timeout for a single call
    pub timeout_secs: u64,
    pub api_key: Option<String>,
    /// USD per million prompt tokens
    pub input_cost_per_million: f64,
    /// USD per million completion tokens
    pub output_cost_per_million: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.1,
            timeout_secs: 120,
            api_key: None,
            input_cost_per_million: 2.50,
            output_cost_per_million: 10.00,
        }
    }
}

/// Complete TOML configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Directory holding the source documents
    pub data_dir: PathBuf,
    /// Directory receiving finalized artifacts
    pub output_dir: PathBuf,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub sources: Vec<SourceRule>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("outputs"),
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            sources: default_source_rules(),
        }
    }
}

impl TomlConfig {
    /// Check value ranges and rule consistency
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(Error::Config(format!(
                "model.temperature must be between 0.0 and 2.0, got {}",
                self.model.temperature
            )));
        }
        if self.model.timeout_secs == 0 {
            return Err(Error::Config("model.timeout_secs must be positive".to_string()));
        }
        if self.model.input_cost_per_million < 0.0 || self.model.output_cost_per_million < 0.0 {
            return Err(Error::Config("model cost rates cannot be negative".to_string()));
        }

        let mut roles: HashMap<&str, SourceRole> = HashMap::new();
        for rule in &self.sources {
            if rule.key.trim().is_empty() || rule.pattern.trim().is_empty() {
                return Err(Error::Config(
                    "source rules need a non-empty key and pattern".to_string(),
                ));
            }
            // The same key may appear under several patterns, never with two roles
            match roles.get(rule.key.as_str()) {
                Some(role) if *role != rule.role => {
                    return Err(Error::Config(format!(
                        "source key '{}' is declared with two roles",
                        rule.key
                    )));
                }
                _ => {
                    roles.insert(rule.key.as_str(), rule.role);
                }
            }
        }
        Ok(())
    }
}

/// Platform default config file path (may not exist)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tsgen").join("config.toml"))
}

/// Resolve which config file to load, if any
///
/// An explicit path (CLI or environment) is returned even when missing so
/// that the caller can report it. The platform default is only returned
/// when the file exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|p| p.exists())
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config {}: {}", path.display(), e))
    })?;
    let config: TomlConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Load configuration following the resolution priority order
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            info!("Loading configuration from {}", path.display());
            load_toml_config(&path)
        }
        None => {
            // Priority 4: Compiled defaults
            debug!("No config file found, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write a config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
