use std::net::SocketAddr;

use anyhow::Result;

use crate::queue::DEFAULT_QUEUE_CAPACITY;

#[derive(Debug, Clone)]
pub struct Config {
    pub framework_name: String,
    pub api_listen_addr: SocketAddr,
    pub data_dir: String,
    pub offer_queue_capacity: usize,
    /// When set, the whole framework is being torn down: every hosted run
    /// is uninstalled and the framework deregisters once the last one is
    /// gone.
    pub uninstall: bool,
    pub default_spec_type: Option<String>,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let framework_name =
            std::env::var("FLOTILLA_FRAMEWORK_NAME").unwrap_or_else(|_| "flotilla".to_string());

        let api_listen_addr = std::env::var("FLOTILLA_API_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string())
            .parse()?;

        let data_dir =
            std::env::var("FLOTILLA_DATA_DIR").unwrap_or_else(|_| "/var/lib/flotilla".to_string());

        let offer_queue_capacity = std::env::var("FLOTILLA_OFFER_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);

        let uninstall = std::env::var("FLOTILLA_UNINSTALL")
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let default_spec_type = std::env::var("FLOTILLA_DEFAULT_SPEC_TYPE").ok();

        let log_level = std::env::var("FLOTILLA_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            framework_name,
            api_listen_addr,
            data_dir,
            offer_queue_capacity,
            uninstall,
            default_spec_type,
            log_level,
        })
    }
}
