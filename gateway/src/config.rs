//! Gateway-level configuration loading: resolves the config file path from
//! the environment, the way `services/forwarder/src/main.rs` resolves its
//! config path, and defers to `proxy_core::config` for parsing/validation.

use std::path::PathBuf;

use proxy_core::config::EngineConfig;
use proxy_core::ConfigError;

pub fn config_path() -> PathBuf {
    std::env::var("GATEWAY_CONFIG")
        .unwrap_or_else(|_| "config.toml".to_owned())
        .into()
}

pub fn load() -> Result<EngineConfig, ConfigError> {
    let path = config_path();
    if path.exists() {
        proxy_core::config::load_config_from_path(&path)
    } else {
        tracing::warn!(path = %path.display(), "config file not found, starting with an empty configuration");
        proxy_core::config::load_config_from_str("")
    }
}
