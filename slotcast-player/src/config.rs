use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub terminal_name: String,
    pub server_url: String,
    pub secret_key: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_schedule_tick")]
    pub schedule_tick_secs: u64,
    #[serde(default = "default_idle_poll")]
    pub idle_poll_secs: u64,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    #[serde(default = "default_max_item_retries")]
    pub max_item_retries: u32,
    #[serde(default = "default_playlist_poll_interval")]
    pub playlist_poll_interval_secs: u64,
    pub mpv_socket_path: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_schedule_tick() -> u64 {
    15
}

fn default_idle_poll() -> u64 {
    5
}

fn default_retry_backoff() -> u64 {
    3
}

fn default_max_item_retries() -> u32 {
    3
}

fn default_playlist_poll_interval() -> u64 {
    60
}

fn default_cache_dir() -> String {
    "cache".to_string()
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_template() -> &'static str {
        r#"terminal_name = "lobby-01"
server_url = "ws://127.0.0.1:8080/ws"
secret_key = "change-me"
heartbeat_interval_secs = 30
schedule_tick_secs = 15
idle_poll_secs = 5
retry_backoff_secs = 3
max_item_retries = 3
playlist_poll_interval_secs = 60
mpv_socket_path = "/tmp/slotcast-mpv-socket"
# Downloaded media and the last playlist snapshot live here.
cache_dir = "cache"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_parses() {
        let config: Config = toml::from_str(Config::default_template()).unwrap();
        assert_eq!(config.terminal_name, "lobby-01");
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.max_item_retries, 3);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"terminal_name = "t"
server_url = "ws://localhost:8080/ws"
secret_key = "s"
mpv_socket_path = "/tmp/mpv"
"#,
        )
        .unwrap();
        assert_eq!(config.idle_poll_secs, 5);
        assert_eq!(config.retry_backoff_secs, 3);
        assert_eq!(config.playlist_poll_interval_secs, 60);
        assert_eq!(config.cache_dir, "cache");
    }
}
