//! Configuration loading and defaults.
//!
//! Settings come from `edify.toml` in the working directory, then from
//! `~/.edify/edify.toml`; every field has a default, so no config file is
//! required at all. Parse problems are reported, not swallowed: the
//! caller decides whether to fall back to defaults.

use std::path::{Path, PathBuf};

use edify_types::Temperature;
use serde::Deserialize;
use thiserror::Error;

use crate::round::RoundOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EdifyConfig {
    pub engine: EngineConfig,
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
}

/// Knobs for the model backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit model file. When unset, the largest `.gguf` in the
    /// working directory is used.
    pub model_path: Option<PathBuf>,
    pub context_size: u32,
    pub gpu_layers: u32,
}

/// Knobs for the discovery cycle.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Added to the temperature after a cycle that persists nothing.
    pub temperature_step: f32,
    pub temperature_cap: f32,
    /// Sampling calls a repeated line's leading token stays banned.
    pub ban_duration: u32,
    /// Maximum sampled tokens per generation pass.
    pub round_token_budget: usize,
    /// Treat only end-of-sequence as a stop; some templates emit
    /// end-of-turn mid-answer.
    pub strict_turn_stop: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: Option<PathBuf>,
    /// Directory for the session log and the background cycle log.
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            context_size: 8192,
            gpu_layers: 99,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature_step: 0.3,
            temperature_cap: 1.5,
            ban_duration: edify_session::DEFAULT_BAN_CALLS,
            round_token_budget: 4096,
            strict_turn_stop: false,
        }
    }
}

impl EdifyConfig {
    /// Loads the first config file found, or `Ok(None)` when none exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        for path in candidate_paths() {
            if path.exists() {
                return Self::load_from(&path).map(Some);
            }
        }
        Ok(None)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl EngineConfig {
    /// The model to load: the configured path, or the largest `.gguf`
    /// in the working directory.
    #[must_use]
    pub fn resolve_model(&self) -> Option<PathBuf> {
        if let Some(path) = &self.model_path {
            return Some(path.clone());
        }
        std::env::current_dir()
            .ok()
            .and_then(|dir| discover_model_path(&dir))
    }
}

impl GenerationConfig {
    #[must_use]
    pub fn round_options(&self, temperature: Temperature) -> RoundOptions {
        RoundOptions {
            temperature,
            token_budget: self.round_token_budget,
            ban_calls: self.ban_duration,
            strict_turn_stop: self.strict_turn_stop,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn resolve_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(default_db_path)
    }

    #[must_use]
    pub fn resolve_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(default_log_dir)
    }

    /// Log file for the interactive session.
    #[must_use]
    pub fn session_log(&self) -> PathBuf {
        self.resolve_log_dir().join("edify.log")
    }

    /// Where background cycles narrate when nobody is watching.
    #[must_use]
    pub fn background_log(&self) -> PathBuf {
        self.resolve_log_dir().join("background_generation.log")
    }
}

/// `~/.edify/edify.db`, or a working-directory file without a home.
#[must_use]
pub fn default_db_path() -> PathBuf {
    dirs::home_dir().map_or_else(
        || PathBuf::from("edify.db"),
        |home| home.join(".edify").join("edify.db"),
    )
}

/// `~/.edify/logs`, or a working-directory `logs` without a home.
#[must_use]
pub fn default_log_dir() -> PathBuf {
    dirs::home_dir().map_or_else(
        || PathBuf::from("logs"),
        |home| home.join(".edify").join("logs"),
    )
}

/// Largest `.gguf` file in `dir`. Size is the stand-in for "the model the
/// user cares about" when several are lying around.
#[must_use]
pub fn discover_model_path(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"))
            && let Ok(meta) = entry.metadata()
            && best.as_ref().is_none_or(|(size, _)| meta.len() > *size)
        {
            best = Some((meta.len(), path));
        }
    }
    best.map(|(_, path)| path)
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("edify.toml")];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".edify").join("edify.toml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: EdifyConfig = toml::from_str("").expect("empty config parses");
        assert_eq!(config.engine.context_size, 8192);
        assert_eq!(config.engine.gpu_layers, 99);
        assert!((config.generation.temperature_step - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.generation.ban_duration, 6);
        assert_eq!(config.generation.round_token_budget, 4096);
        assert!(!config.generation.strict_turn_stop);
        assert!(config.storage.db_path.is_none());
    }

    #[test]
    fn partial_section_keeps_sibling_defaults() {
        let config: EdifyConfig = toml::from_str(
            "[generation]\ntemperature_step = 0.5\n\n[storage]\ndb_path = \"facts.db\"\n",
        )
        .expect("config parses");
        assert!((config.generation.temperature_step - 0.5).abs() < f32::EPSILON);
        assert!((config.generation.temperature_cap - 1.5).abs() < f32::EPSILON);
        assert_eq!(config.storage.resolve_db_path(), PathBuf::from("facts.db"));
    }

    #[test]
    fn round_options_mirror_the_generation_section() {
        let generation = GenerationConfig {
            round_token_budget: 1024,
            ban_duration: 3,
            strict_turn_stop: true,
            ..GenerationConfig::default()
        };
        let options = generation.round_options(Temperature::new(0.6));
        assert_eq!(options.token_budget, 1024);
        assert_eq!(options.ban_calls, 3);
        assert!(options.strict_turn_stop);
        assert!((options.temperature.value() - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn load_from_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = EdifyConfig::load_from(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn load_from_reports_bad_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("edify.toml");
        std::fs::write(&path, "[generation\n").expect("write");
        assert!(matches!(
            EdifyConfig::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn model_discovery_prefers_the_largest_gguf() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("small.gguf"), b"abc").expect("write");
        std::fs::write(dir.path().join("big.gguf"), b"abcdefghij").expect("write");
        std::fs::write(dir.path().join("notes.txt"), b"irrelevant").expect("write");

        let found = discover_model_path(dir.path()).expect("model found");
        assert_eq!(found.file_name().and_then(|n| n.to_str()), Some("big.gguf"));
    }

    #[test]
    fn model_discovery_handles_an_empty_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(discover_model_path(dir.path()).is_none());
    }

    #[test]
    fn explicit_model_path_wins_over_discovery() {
        let engine = EngineConfig {
            model_path: Some(PathBuf::from("/models/pinned.gguf")),
            ..EngineConfig::default()
        };
        assert_eq!(
            engine.resolve_model(),
            Some(PathBuf::from("/models/pinned.gguf"))
        );
    }
}
