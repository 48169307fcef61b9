//! Engine configuration loading.
//!
//! The engine reads `{data_dir}/config.toml` once at startup. Configuration
//! problems are never fatal: a missing file is normal, and a malformed one
//! is logged and replaced with [`EngineConfig::default()`] so the engine
//! always comes up.

use std::path::Path;

use stagecraft_types::config::EngineConfig;

/// Load engine configuration from `{data_dir}/config.toml`, falling back to
/// defaults when the file is absent or unreadable. Fields missing from the
/// file take their individual defaults.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let path = data_dir.join("config.toml");
    match read_config(&path).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            tracing::debug!(path = %path.display(), "no config.toml, using defaults");
            EngineConfig::default()
        }
        Err(reason) => {
            tracing::warn!(path = %path.display(), reason, "ignoring config.toml, using defaults");
            EngineConfig::default()
        }
    }
}

/// `Ok(None)` means the file does not exist; `Err` carries the reason a
/// present file could not be used.
async fn read_config(path: &Path) -> Result<Option<EngineConfig>, String> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(format!("read failed: {err}")),
    };
    toml::from_str(&content)
        .map(Some)
        .map_err(|err| format!("parse failed: {err}"))
}
