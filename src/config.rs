//! Library configuration
//!
//! Centralized configuration with environment variable support and sensible
//! defaults. The embedding application may also construct [`Config`] directly.

use std::env;

/// Chat subsystem configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Store configuration
    pub store: StoreConfig,
}

/// Conversation store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub db_path: String,
    /// Capacity of the change-notification broadcast channel
    pub event_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            store: StoreConfig {
                db_path: env::var("MARKET_CHAT_DB").unwrap_or_else(|_| {
                    // Default to ~/.market-chat or current directory
                    if let Some(home) = env::var_os("HOME") {
                        format!("{}/.market-chat/chat.db", home.to_string_lossy())
                    } else {
                        ".market-chat/chat.db".to_string()
                    }
                }),
                event_capacity: env::var("MARKET_CHAT_EVENT_CAPACITY")
                    .ok()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(64),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_defaults() {
        std::env::remove_var("MARKET_CHAT_DB");
        std::env::remove_var("MARKET_CHAT_EVENT_CAPACITY");
        let config = Config::from_env();
        assert!(config.store.db_path.ends_with("chat.db"));
        assert_eq!(config.store.event_capacity, 64);
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("MARKET_CHAT_DB", "/tmp/test-chat.db");
        std::env::set_var("MARKET_CHAT_EVENT_CAPACITY", "8");
        let config = Config::from_env();
        assert_eq!(config.store.db_path, "/tmp/test-chat.db");
        assert_eq!(config.store.event_capacity, 8);
        std::env::remove_var("MARKET_CHAT_DB");
        std::env::remove_var("MARKET_CHAT_EVENT_CAPACITY");
    }

    #[test]
    #[serial]
    fn test_config_invalid_capacity_falls_back() {
        std::env::set_var("MARKET_CHAT_EVENT_CAPACITY", "not-a-number");
        let config = Config::from_env();
        assert_eq!(config.store.event_capacity, 64);
        std::env::remove_var("MARKET_CHAT_EVENT_CAPACITY");
    }
}
