//! Engine configuration.
//!
//! Loaded from the `[engine]` table of a TOML file; every field has a
//! default so an absent table (or file) yields a working configuration.
//!
//! ```toml
//! [engine]
//! debounce_ms = 250
//! temp_id_prefix = "tmp_"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DEBOUNCE_MS: u64 = 250;
pub const DEFAULT_TEMP_ID_PREFIX: &str = "tmp_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("could not parse '{path}': {message}")]
    Parse { path: String, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet period after the last field edit before it is queued.
    pub debounce_ms: u64,
    /// Marker that distinguishes temporary identifiers from server ones.
    pub temp_id_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            temp_id_prefix: DEFAULT_TEMP_ID_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Parse the `[engine]` table out of a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        file.engine.validate()?;
        Ok(file.engine)
    }

    /// Read a TOML config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temp_id_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "temp_id_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_table_absent() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(250));
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let config = EngineConfig::from_toml_str("[engine]\ndebounce_ms = 40\n").unwrap();
        assert_eq!(config.debounce_ms, 40);
        assert_eq!(config.temp_id_prefix, "tmp_");
    }

    #[test]
    fn unrelated_tables_are_ignored() {
        let config =
            EngineConfig::from_toml_str("[store]\npath = \"x.json\"\n[engine]\ntemp_id_prefix = \"local-\"\n")
                .unwrap();
        assert_eq!(config.temp_id_prefix, "local-");
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let err = EngineConfig::from_toml_str("[engine]\ntemp_id_prefix = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = EngineConfig::load(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
