//! Layered configuration: built-in defaults, then an optional TOML file, then environment.
//!
//! | Source | Example |
//! |--------|---------|
//! | file (`GROWTHLAB_CONFIG`, default `config/growthlab[.toml]`) | `[governor]\nmax_concurrent = 3` |
//! | env (prefix `GROWTHLAB`, separator `__`) | `GROWTHLAB__BREAKER__COOLDOWN_SECS=60` |
//!
//! The API key is never read from the file; see [`GeminiSettings::api_key_from_env`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};

const DEFAULT_CONFIG_PATH: &str = "config/growthlab";

/// Admission and retry policy for the request governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorSettings {
    /// Admission slots (P).
    pub max_concurrent: usize,
    /// Retries after the first attempt (K).
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 3,
            base_delay_ms: 3000,
            backoff_multiplier: 2.5,
        }
    }
}

impl GovernorSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self { cooldown_secs: 120 }
    }
}

impl BreakerSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Background generation cadence and rolling-collection sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub interval_secs: u64,
    pub primary_capacity: usize,
    pub secondary_capacity: usize,
    /// Chance (0.0–1.0) that a tick also produces a secondary item.
    pub secondary_probability: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            primary_capacity: 50,
            secondary_capacity: 10,
            secondary_probability: 0.2,
        }
    }
}

impl SchedulerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// REST and live endpoints of the inference backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiSettings {
    pub api_base: String,
    pub live_url: String,
    pub model: String,
    pub live_model: String,
    pub video_model: String,
    pub request_timeout_secs: u64,
    /// Poll cadence for long-running operations.
    pub poll_interval_secs: u64,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            live_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            live_model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            video_model: "veo-3.1-fast-generate-preview".to_string(),
            request_timeout_secs: 60,
            poll_interval_secs: 10,
        }
    }
}

impl GeminiSettings {
    /// API key from the environment: `GROWTHLAB_API_KEY`, then `GEMINI_API_KEY`, then `API_KEY`.
    pub fn api_key_from_env() -> Option<String> {
        ["GROWTHLAB_API_KEY", "GEMINI_API_KEY", "API_KEY"]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .map(|k| k.trim().to_string())
            .find(|k| !k.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Audio pipeline parameters for the live voice session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSettings {
    /// Samples per outbound block.
    pub block_size: usize,
    pub input_rate: u32,
    pub output_rate: u32,
    /// Encoded frames allowed to queue ahead of the send path before the oldest is dropped.
    pub send_queue: usize,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            block_size: 4096,
            input_rate: 16000,
            output_rate: 24000,
            send_queue: 8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthConfig {
    #[serde(default)]
    pub governor: GovernorSettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub gemini: GeminiSettings,
    #[serde(default)]
    pub live: LiveSettings,
}

impl GrowthConfig {
    /// Load config from file and environment. Precedence: env > `GROWTHLAB_CONFIG` file > defaults.
    pub fn load() -> ServiceResult<Self> {
        let config_path =
            std::env::var("GROWTHLAB_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load with an explicit file path (missing file => defaults + env).
    pub fn load_from(path: &Path) -> ServiceResult<Self> {
        let defaults = config::Config::try_from(&GrowthConfig::default())?;
        let builder = config::Config::builder().add_source(defaults);

        let builder = if path.exists() || path.with_extension("toml").exists() {
            builder.add_source(config::File::from(path).required(false))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("GROWTHLAB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(built.try_deserialize()?)
    }

    /// Write the effective config as TOML (e.g. to seed a config file from defaults).
    pub fn save(&self, path: &Path) -> ServiceResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ServiceError::Config(format!("serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ServiceError::Config(format!("create {}: {}", parent.display(), e)))?;
            }
        }
        std::fs::write(path, content)
            .map_err(|e| ServiceError::Config(format!("write {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_policy() {
        let cfg = GrowthConfig::default();
        assert_eq!(cfg.governor.max_retries, 3);
        assert_eq!(cfg.governor.base_delay(), Duration::from_millis(3000));
        assert_eq!(cfg.breaker.cooldown(), Duration::from_secs(120));
        assert_eq!(cfg.scheduler.primary_capacity, 50);
        assert_eq!(cfg.scheduler.secondary_capacity, 10);
        assert_eq!(cfg.live.block_size, 4096);
        assert_eq!(cfg.live.input_rate, 16000);
        assert_eq!(cfg.live.output_rate, 24000);
    }

    #[test]
    fn test_load_from_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growthlab.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[governor]\nmax_concurrent = 7\n\n[scheduler]\ninterval_secs = 5").unwrap();

        let cfg = GrowthConfig::load_from(&path).unwrap();
        assert_eq!(cfg.governor.max_concurrent, 7);
        assert_eq!(cfg.scheduler.interval_secs, 5);
        // untouched sections keep defaults
        assert_eq!(cfg.breaker.cooldown_secs, 120);
        assert_eq!(cfg.governor.backoff_multiplier, 2.5);
    }

    #[test]
    fn test_saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("growthlab.toml");
        let mut cfg = GrowthConfig::default();
        cfg.breaker.cooldown_secs = 30;
        cfg.live.send_queue = 4;
        cfg.save(&path).unwrap();

        let loaded = GrowthConfig::load_from(&path).unwrap();
        assert_eq!(loaded.breaker.cooldown_secs, 30);
        assert_eq!(loaded.live.send_queue, 4);
        assert_eq!(loaded.gemini.model, cfg.gemini.model);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = GrowthConfig::load_from(Path::new("/nonexistent/growthlab")).unwrap();
        assert_eq!(cfg.governor, GovernorSettings::default());
    }
}
