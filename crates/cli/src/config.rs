//! `fieldsync.toml`: engine settings plus where the local store lives.
//!
//! ```toml
//! [engine]
//! debounce_ms = 250
//! temp_id_prefix = "tmp_"
//!
//! [store]
//! path = "fieldsync-store.json"
//! ```

use std::path::{Path, PathBuf};

use fieldsync_engine::EngineConfig;
use serde::Deserialize;

pub(crate) const DEFAULT_CONFIG_FILE: &str = "fieldsync.toml";
const DEFAULT_STORE_FILE: &str = "fieldsync-store.json";

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct CliConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreSettings,
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StoreSettings {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_FILE)
}

/// Read the config file.
///
/// An explicitly named file must exist; the default `fieldsync.toml` is
/// optional.
pub(crate) fn read_config(explicit: Option<&Path>) -> Result<CliConfig, String> {
    let path = explicit.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if explicit.is_none() && e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(CliConfig::default());
        }
        Err(e) => return Err(format!("could not read '{}': {}", path.display(), e)),
    };
    let config: CliConfig = toml::from_str(&content)
        .map_err(|e| format!("could not parse '{}': {}", path.display(), e))?;
    config
        .engine
        .validate()
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    Ok(config)
}
