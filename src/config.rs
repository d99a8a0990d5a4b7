// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Engine configuration options

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Cannot read configuration '{path}': {source}")]
    Io {
        /// File that was requested
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid configuration document
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for expression caching and form settling behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum number of compiled expressions kept per form (0 disables caching)
    pub expression_cache_size: usize,

    /// Upper bound on re-evaluation passes in a single settle
    pub max_settle_passes: usize,

    /// Widget types that never receive a default when they become visible
    pub no_init_form_types: Vec<String>,

    /// Widget types mounted as selectable fields even before options arrive
    pub select_form_types: Vec<String>,

    /// Log swallowed evaluation failures at `warn` instead of `debug`
    pub log_expression_failures: bool,
}

impl EngineConfig {
    /// Create a configuration optimized for low memory usage
    pub fn low_memory() -> Self {
        Self {
            expression_cache_size: 64,
            ..Self::default()
        }
    }

    /// Create a configuration with expression caching disabled
    pub fn disabled_cache() -> Self {
        Self {
            expression_cache_size: 0,
            ..Self::default()
        }
    }

    /// Whether compiled expressions are memoized
    pub fn cache_enabled(&self) -> bool {
        self.expression_cache_size > 0
    }

    /// Parse a JSON configuration document; missing keys take their defaults
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expression_cache_size: 1_000,
            max_settle_passes: 16,
            no_init_form_types: vec!["checkbox".to_string()],
            select_form_types: ["select", "multiselect", "radio", "autocomplete"]
                .map(String::from)
                .to_vec(),
            log_expression_failures: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.expression_cache_size, 1_000);
        assert_eq!(config.max_settle_passes, 16);
        assert_eq!(config.no_init_form_types, vec!["checkbox".to_string()]);
        assert!(config.cache_enabled());
    }

    #[test]
    fn test_engine_config_presets() {
        assert_eq!(EngineConfig::low_memory().expression_cache_size, 64);
        assert!(!EngineConfig::disabled_cache().cache_enabled());
        assert_eq!(EngineConfig::disabled_cache().max_settle_passes, 16);
    }

    #[test]
    fn test_engine_config_from_json() {
        let config =
            EngineConfig::from_json(r#"{"maxSettlePasses": 4, "noInitFormTypes": []}"#).unwrap();
        assert_eq!(config.max_settle_passes, 4);
        assert!(config.no_init_form_types.is_empty());
        assert_eq!(config.expression_cache_size, 1_000);

        assert!(matches!(
            EngineConfig::from_json("{"),
            Err(ConfigError::Json(_))
        ));
    }
}
