/// Configuration module for gguf-embed.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Environment variable overriding `model.path`.
pub const MODEL_ENV: &str = "GGUF_EMBED_MODEL";

pub const DEFAULT_CONFIG_PATH: &str = "gguf-embed.json";

// ── Default value functions ──────────────────────────────────────────

fn default_n_ctx() -> i32 {
    2048
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    /// Path to a local `.gguf` file.
    #[serde(default)]
    pub path: String,

    /// Per-call context size; 0 uses the model's training context, capped.
    #[serde(default = "default_n_ctx")]
    pub n_ctx: i32,

    #[serde(default)]
    pub n_gpu_layers: i32,

    /// L2-normalize embeddings returned by `EmbedClient`.
    #[serde(default)]
    pub normalize: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            n_ctx: default_n_ctx(),
            n_gpu_layers: 0,
            normalize: false,
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `gguf-embed.json`. A missing
    /// file or invalid JSON yields the default config.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Apply `GGUF_EMBED_MODEL` if it is set.
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_model_override(std::env::var(MODEL_ENV).ok())
    }

    /// Replace `model.path` with a non-empty override.
    #[must_use]
    pub fn with_model_override(mut self, path: Option<String>) -> Self {
        if let Some(path) = path.filter(|p| !p.trim().is_empty()) {
            self.model.path = path;
        }
        self
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.model.path.trim().is_empty(), "model.path must be set");
        anyhow::ensure!(self.model.n_ctx >= 0, "model.n_ctx must not be negative");
        anyhow::ensure!(
            self.model.n_gpu_layers >= 0,
            "model.n_gpu_layers must not be negative"
        );
        if !is_gguf_path(&self.model.path) {
            warn!("model.path does not end in .gguf: {}", self.model.path);
        }
        Ok(())
    }
}

/// Whether `path` names a GGUF file by extension.
#[must_use]
pub fn is_gguf_path(path: &str) -> bool {
    Path::new(path.trim())
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gguf"))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.n_ctx, 2048);
        assert_eq!(config.model.n_gpu_layers, 0);
        assert!(config.model.path.is_empty());
        assert!(!config.model.normalize);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"model": {"path": "./model.gguf", "n_gpu_layers": 32}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.model.path, "./model.gguf");
        assert_eq!(config.model.n_gpu_layers, 32);
        // Other fields should have defaults
        assert_eq!(config.model.n_ctx, 2048);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.model.n_ctx, 2048);
    }

    #[test]
    fn test_load_invalid_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert!(config.model.path.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.model.path = "/models/nomic.gguf".to_string();
        config.model.normalize = true;
        config.save(path).unwrap();

        let loaded = Config::load(path).unwrap();
        assert_eq!(loaded.model.path, "/models/nomic.gguf");
        assert!(loaded.model.normalize);
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_err(), "empty path must be rejected");

        config.model.path = "model.gguf".to_string();
        assert!(config.validate().is_ok());

        config.model.n_ctx = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_override() {
        let config = Config::default().with_model_override(Some("/tmp/a.gguf".to_string()));
        assert_eq!(config.model.path, "/tmp/a.gguf");

        let config = config.with_model_override(Some("  ".to_string()));
        assert_eq!(config.model.path, "/tmp/a.gguf", "blank override is ignored");

        let config = config.with_model_override(None);
        assert_eq!(config.model.path, "/tmp/a.gguf");
    }

    #[test]
    fn test_is_gguf_path() {
        assert!(is_gguf_path("models/embeddinggemma-300M-Q8_0.gguf"));
        assert!(is_gguf_path("MODEL.GGUF"));
        assert!(!is_gguf_path("model.onnx"));
        assert!(!is_gguf_path(""));
    }
}
