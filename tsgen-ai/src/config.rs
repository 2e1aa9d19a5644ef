//! Configuration resolution for tsgen-ai
//!
//! Model API key priority: `TSGEN_API_KEY` → `OPENAI_API_KEY` → TOML `[model] api_key`.

use tracing::{info, warn};
use tsgen_common::config::TomlConfig;
use tsgen_common::{Error, Result};

pub const API_KEY_ENV_VAR: &str = "TSGEN_API_KEY";
pub const OPENAI_KEY_ENV_VAR: &str = "OPENAI_API_KEY";

/// Resolve the model API key from environment and TOML
///
/// Warns when more than one source carries a key; the highest-priority
/// source wins.
pub fn resolve_api_key(config: &TomlConfig) -> Result<String> {
    let candidates: Vec<(&str, Option<String>)> = vec![
        (API_KEY_ENV_VAR, std::env::var(API_KEY_ENV_VAR).ok()),
        (OPENAI_KEY_ENV_VAR, std::env::var(OPENAI_KEY_ENV_VAR).ok()),
        ("TOML", config.model.api_key.clone()),
    ];

    let valid: Vec<(&str, String)> = candidates
        .into_iter()
        .filter_map(|(source, key)| key.filter(|k| is_valid_key(k)).map(|k| (source, k)))
        .collect();

    if valid.len() > 1 {
        let names: Vec<&str> = valid.iter().map(|(source, _)| *source).collect();
        warn!(
            "Model API key found in multiple sources: {}. Using {} (highest priority).",
            names.join(", "),
            names[0]
        );
    }

    match valid.into_iter().next() {
        Some((source, key)) => {
            info!("Model API key loaded from {}", source);
            Ok(key.trim().to_string())
        }
        None => Err(Error::Config(format!(
            "Model API key not configured. Set one of:\n\
             1. Environment: {}=your-key\n\
             2. Environment: {}=your-key\n\
             3. TOML config: [model] api_key = \"your-key\"",
            API_KEY_ENV_VAR, OPENAI_KEY_ENV_VAR
        ))),
    }
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
