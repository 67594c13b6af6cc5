use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub campaigns: CampaignsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub https: Option<HttpsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpsConfig {
    pub enabled: bool,
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Seconds without a heartbeat before a terminal is reported offline.
    pub threshold_secs: i64,
    pub monitor_interval_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            threshold_secs: 65,
            monitor_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignsConfig {
    pub expiry_sweep_secs: u64,
}

impl Default for CampaignsConfig {
    fn default() -> Self {
        Self {
            expiry_sweep_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_template() -> &'static str {
        r#"[server]
host = "0.0.0.0"
port = 8080

[server.https]
enabled = false
cert_path = "certs/cert.pem"
key_path = "certs/key.pem"

[database]
# URL for the SQLite database. Ensure the directory exists.
url = "sqlite://slotcast.db"

[liveness]
# A terminal is offline once its last heartbeat is older than this.
threshold_secs = 65
monitor_interval_secs = 30

[campaigns]
expiry_sweep_secs = 60

[logging]
level = "info"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_template_parses() {
        let config: Config = toml::from_str(Config::default_template()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.liveness.threshold_secs, 65);
        assert!(!config.server.https.unwrap().enabled);
    }

    #[test]
    fn test_load_without_optional_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[server]
host = "127.0.0.1"
port = 9000

[database]
url = "sqlite://test.db"

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.liveness.threshold_secs, 65);
        assert_eq!(config.campaigns.expiry_sweep_secs, 60);
        assert!(config.server.https.is_none());
    }
}
