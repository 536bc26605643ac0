use std::env;
use std::sync::Arc;
use toml::Table;

/// Process-wide configuration: `dbnum` is the load-bearing field from §6
/// (`SELECT` bounds-checks against it); the rest is ambient server
/// plumbing in the teacher's style (`from_toml` + env var overrides).
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Number of databases the server exposes.
    pub dbnum: u32,
    /// Cron loop frequency, in Hz, for periodic stats logging.
    pub hz: u32,
}

pub type ConfigRef = Arc<Config>;

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 6379,
            dbnum: 16,
            hz: 10,
        }
    }
}

impl Config {
    pub fn new() -> Config {
        let mut config = Config::default();
        if let Ok(v) = env::var("KEYFERRY_HOST") {
            config.host = v;
        }
        if let Ok(v) = env::var("KEYFERRY_PORT").and_then(|v| v.parse().map_err(|_| env::VarError::NotPresent)) {
            config.port = v;
        }
        if let Ok(v) = env::var("KEYFERRY_DBNUM").and_then(|v| v.parse().map_err(|_| env::VarError::NotPresent)) {
            config.dbnum = v;
        }
        config
    }

    pub fn from_toml(file: &str) -> std::io::Result<Config> {
        let toml = std::fs::read_to_string(file)?;
        let table: Table = toml
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        let mut config = Config::default();
        if let Some(v) = table.get("host").and_then(|v| v.as_str()) {
            config.host = v.to_string();
        }
        if let Some(v) = table.get("port").and_then(|v| v.as_integer()) {
            config.port = v as u16;
        }
        if let Some(v) = table.get("dbnum").and_then(|v| v.as_integer()) {
            config.dbnum = v as u32;
        }
        if let Some(v) = table.get("hz").and_then(|v| v.as_integer()) {
            config.hz = v as u32;
        }
        Ok(config)
    }
}
