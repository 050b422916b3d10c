use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub gateway: GatewaySettings,
    pub notify: NotifyConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// "memory" or "postgres"
    pub backend: String,
    /// Required when backend is "postgres"
    pub url: Option<String>,
}

/// Merchant-side gateway settings. The signing secret only ever travels
/// through here; it must not appear in logs or responses.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewaySettings {
    pub merchant_code: String,
    pub secret: String,
    pub pay_url: String,
    pub return_url: String,
    pub client_result_url: String,
    pub currency: String,
    pub locale: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    pub from_address: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_seconds: u64,
}

fn default_sweep_interval() -> u64 {
    60
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Default to 'development' env
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of ROVA)
            // Eg.. `ROVA_SERVER__PORT=9090` would set the server port
            .add_source(config::Environment::with_prefix("ROVA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
