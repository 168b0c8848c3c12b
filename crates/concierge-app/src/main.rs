//! Concierge application binary - composition root.
//!
//! 1. Resolve CLI flags and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the entity store (memory or SQLite) and the search cache
//! 4. Wire the operation router, smart router, model client and chat service
//! 5. Start the conversation sweeper and the axum API server

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use concierge_action::{OperationRouter, RouterSettings, SmartRouter};
use concierge_api::auth::load_or_generate_token;
use concierge_api::routes;
use concierge_api::state::AppState;
use concierge_chat::{
    ChatService, ChatSettings, CompletionService, ConversationTracker, MemoryConversationStore,
    OpenAiClient,
};
use concierge_core::config::ConciergeConfig;
use concierge_core::error::ConciergeError;
use concierge_storage::{Database, EntityStore, MemorySearchCache, MemoryStore, SqliteStore};

use crate::cli::CliArgs;

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

fn open_store(config: &ConciergeConfig, data_dir: &std::path::Path) -> Result<Arc<dyn EntityStore>, ConciergeError> {
    match config.storage.backend.as_str() {
        "memory" => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        "sqlite" => {
            let path = data_dir.join(&config.storage.sqlite_path);
            let db = Database::new(&path)?;
            tracing::info!(path = %path.display(), "SQLite database opened");
            Ok(Arc::new(SqliteStore::new(Arc::new(db))))
        }
        other => Err(ConciergeError::Config(format!(
            "Unknown storage backend '{}'; expected memory or sqlite",
            other
        ))),
    }
}

/// Evict idle conversation state on a fixed interval.
async fn conversation_sweeper(chat: Arc<ChatService>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        match chat.sweep().await {
            Ok(removed) if removed > 0 => tracing::debug!(removed, "Idle conversations evicted"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Conversation sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ConciergeConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(ref backend) = args.storage {
        config.storage.backend = backend.clone();
    }
    config.general.port = args.resolve_port(config.general.port);
    let log_level = args.resolve_log_level(&config.general.log_level);

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting Concierge v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let store = open_store(&config, &data_dir)?;

    // Operation router with optional search cache.
    let settings = RouterSettings {
        default_event_minutes: config.router.default_event_minutes,
        ..RouterSettings::default()
    };
    let mut router = OperationRouter::new(store, settings);
    if config.cache.enabled {
        let ttl = Duration::from_secs(config.cache.search_ttl_seconds);
        router = router.with_cache(Arc::new(MemorySearchCache::new(ttl)));
        tracing::info!(ttl_secs = config.cache.search_ttl_seconds, "Contact search cache enabled");
    }

    // Language model.
    let llm: Option<Arc<dyn CompletionService>> = match OpenAiClient::from_config(&config.llm) {
        Ok(client) => {
            tracing::info!(model = %config.llm.model, base_url = %config.llm.base_url, "Model client ready");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Model-driven turns disabled; only the fast path will answer");
            None
        }
    };
    let model_available = llm.is_some();

    // Chat service.
    let tracker = ConversationTracker::new(
        Arc::new(MemoryConversationStore::new()),
        config.conversation.idle_timeout_minutes,
    );
    let chat = ChatService::new(
        Arc::new(router),
        SmartRouter::new(config.router.default_event_minutes),
        tracker,
        llm,
        ChatSettings {
            max_message_chars: config.conversation.max_message_chars,
            fast_path_enabled: config.router.fast_path_enabled,
        },
    );

    let token = load_or_generate_token(&data_dir.join("api_token"));
    let state = AppState::new(chat, token, model_available, config.general.port);

    // === Background tasks ===
    let sweeper_chat = Arc::clone(&state.chat);
    let sweep_secs = config.conversation.sweep_interval_seconds;
    tokio::spawn(async move {
        conversation_sweeper(sweeper_chat, sweep_secs).await;
    });

    // === API server ===
    if let Err(e) = routes::start_server(&config, state, shutdown_signal()).await {
        tracing::error!(error = %e, "API server stopped");
        tracing::error!("Try: CONCIERGE_PORT={} concierge", config.general.port.saturating_add(1));
        return Err(e.into());
    }

    Ok(())
}
