//! Application configuration.
//!
//! Values come from `BRIDGETALK_*` environment variables with defaults tuned
//! for a local Ollama instance. Nothing here is cached: callers build an
//! `AppConfig` once at startup and pass the pieces down.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "BridgeTalk";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Realm used when a request carries no tenant information.
pub const DEFAULT_REALM: &str = "default";

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "qwen2.5:7b";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 30;

/// True for debug builds.
pub fn is_dev() -> bool {
    cfg!(debug_assertions)
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    if is_dev() {
        "bridgetalk=debug,info"
    } else {
        "bridgetalk=info,warn"
    }
}

/// Get the application data directory.
///
/// `BRIDGETALK_DATA_DIR` overrides the default `~/BridgeTalk/`.
pub fn app_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("BRIDGETALK_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Language model settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Timeout for a single non-streaming request.
    pub request_timeout: Duration,
    /// Maximum silence between two streamed chunks before the stream is
    /// treated as failed.
    pub stream_idle_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            request_timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
            stream_idle_timeout: Duration::from_secs(DEFAULT_STREAM_IDLE_TIMEOUT_SECS),
        }
    }
}

/// On-disk locations.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// SQLite file holding translation records.
    pub fn translations_db(&self) -> PathBuf {
        self.data_dir.join("translations.db")
    }

    /// Directory holding one checkpoint database per realm.
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub default_realm: String,
}

impl AppConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = LlmConfig::default();
        let llm = LlmConfig {
            base_url: env_string("BRIDGETALK_OLLAMA_URL").unwrap_or(defaults.base_url),
            model: env_string("BRIDGETALK_MODEL").unwrap_or(defaults.model),
            temperature: env_parse("BRIDGETALK_TEMPERATURE", DEFAULT_TEMPERATURE),
            request_timeout: Duration::from_secs(env_parse(
                "BRIDGETALK_LLM_TIMEOUT_SECS",
                DEFAULT_LLM_TIMEOUT_SECS,
            )),
            stream_idle_timeout: Duration::from_secs(env_parse(
                "BRIDGETALK_STREAM_IDLE_TIMEOUT_SECS",
                DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
            )),
        };

        Self {
            llm,
            storage: StorageConfig {
                data_dir: app_data_dir(),
            },
            default_realm: env_string("BRIDGETALK_REALM")
                .unwrap_or_else(|| DEFAULT_REALM.to_string()),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env_string(key) {
        None => default,
        Some(raw) => parse_or_default(key, &raw, default),
    }
}

fn parse_or_default<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: &str, default: T) -> T {
    raw.parse().unwrap_or_else(|_| {
        tracing::warn!(key, value = raw, %default, "Unparsable config value, using default");
        default
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_defaults_target_local_ollama() {
        let llm = LlmConfig::default();
        assert_eq!(llm.base_url, "http://localhost:11434");
        assert_eq!(llm.request_timeout, Duration::from_secs(60));
        assert_eq!(llm.stream_idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn storage_paths_live_under_data_dir() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/tmp/bt"),
        };
        assert_eq!(storage.translations_db(), PathBuf::from("/tmp/bt/translations.db"));
        assert_eq!(storage.checkpoints_dir(), PathBuf::from("/tmp/bt/checkpoints"));
    }

    #[test]
    fn unparsable_value_falls_back() {
        assert_eq!(parse_or_default("X", "not-a-number", 42u64), 42);
        assert_eq!(parse_or_default("X", "7", 42u64), 7);
        assert!((parse_or_default("X", "0.2", 0.7f32) - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn app_name_is_bridgetalk() {
        assert_eq!(APP_NAME, "BridgeTalk");
    }

    #[test]
    fn log_filter_targets_crate() {
        assert!(default_log_filter().starts_with("bridgetalk="));
    }
}
