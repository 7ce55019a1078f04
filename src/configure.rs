use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub listen_addr: String,
    pub gateway_base_url: String,
    pub gateway_key: String,
    pub gateway_timeout_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub reconcile_interval_ms: u64,
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    let s = Config::builder()
        // Set defaults
        .set_default("log_level", "info")?
        .set_default("log_to_file", false)?
        .set_default("log_file", "log/crossledger.log")?
        .set_default("listen_addr", "0.0.0.0:8080")?
        .set_default("gateway_base_url", "http://localhost:9400")?
        .set_default("gateway_key", "dev-key")?
        .set_default("gateway_timeout_ms", 5000i64)?
        .set_default("retry_max_attempts", 4i64)?
        .set_default("retry_base_delay_ms", 200i64)?
        .set_default("retry_max_delay_ms", 5000i64)?
        .set_default("reconcile_interval_ms", 30000i64)?
        // Add configuration from a file
        .add_source(File::with_name("config/config.yaml").required(false))
        // Add configuration from environment variables
        .add_source(config::Environment::with_prefix("APP"))
        .build()?;

    s.try_deserialize()
}
