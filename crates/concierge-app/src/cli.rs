//! CLI argument definitions for the Concierge server.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Concierge - a conversational front end to your CRM data.
#[derive(Parser, Debug)]
#[command(name = "concierge", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for the SQLite database and API token.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Storage backend override: memory or sqlite.
    #[arg(long = "storage")]
    pub storage: Option<String>,
}

impl CliArgs {
    /// Priority: --config flag > CONCIERGE_CONFIG env var > ~/.concierge/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CONCIERGE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Priority: --port flag > CONCIERGE_PORT env var > config file value > 3040.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("CONCIERGE_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        if config_port != 0 {
            return config_port;
        }
        3040
    }

    /// `None` keeps the config file value.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".concierge").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".concierge").join("config.toml");
    }
    PathBuf::from("config.toml")
}
