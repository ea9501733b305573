use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Application configuration, layered from `config/default.toml`, an optional
/// per-run-mode file, then `APP_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub log_level: String,
    /// Prefix of generated warranty codes (`PREFIX-YYMM-NNNNN`).
    pub warranty_code_prefix: String,
    /// Days after delivery during which a return may still be filed.
    pub return_window_days: i64,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub auto_migrate: bool,
    /// Per-request deadline enforced at the HTTP layer.
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8080)?
            .set_default("database_url", "sqlite::memory:")?
            .set_default("log_level", "info")?
            .set_default("warranty_code_prefix", "VC")?
            .set_default("return_window_days", 30)?
            .set_default("db_max_connections", 10)?
            .set_default("db_min_connections", 1)?
            .set_default("auto_migrate", true)?
            .set_default("request_timeout_secs", 30)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("APP"))
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_files() {
        let config = AppConfig::load().expect("default config");
        assert_eq!(config.return_window_days, 30);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(!config.warranty_code_prefix.is_empty());
    }
}
