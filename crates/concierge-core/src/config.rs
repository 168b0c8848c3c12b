use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConciergeError, Result};

/// Top-level configuration for the Concierge service.
///
/// Loaded from `~/.concierge/config.toml` by default. Each section corresponds
/// to a bounded context or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConciergeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl ConciergeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConciergeConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ConciergeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite store and the API token.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// API server port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.concierge/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
        }
    }
}

/// Conversation continuity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Idle window after which a user's conversation state is discarded.
    pub idle_timeout_minutes: u32,
    /// Minimum spacing between lazy sweeps of idle state.
    pub sweep_interval_seconds: u64,
    /// Longest accepted user message.
    pub max_message_chars: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 30,
            sweep_interval_seconds: 300,
            max_message_chars: 8000,
        }
    }
}

/// Language-model completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Whether model-driven turns are available at all.
    pub enabled: bool,
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Model name sent with each request.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    /// Send the previous response id with each request, for servers that
    /// keep conversation state (`previous_response_id`).
    pub chain_responses: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
            request_timeout_secs: 60,
            chain_responses: false,
        }
    }
}

/// Smart router (fast path) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Try the deterministic fast path before the model.
    pub fast_path_enabled: bool,
    /// Duration given to events created without an explicit end.
    pub default_event_minutes: i64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            fast_path_enabled: true,
            default_event_minutes: 60,
        }
    }
}

/// Entity storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend: "memory" or "sqlite".
    pub backend: String,
    /// SQLite file name, relative to `general.data_dir` unless absolute.
    pub sqlite_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            sqlite_path: "concierge.db".to_string(),
        }
    }
}

/// Contact search-result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub search_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_ttl_seconds: 120,
        }
    }
}
