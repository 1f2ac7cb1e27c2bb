use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::driver::{CdpConfig, PaperConfig};

/// Main configuration structure
///
/// Bid parameters are deliberately absent: they only ever arrive from the controller.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller websocket endpoint
    pub url: String,
    /// Fixed delay before each reconnect attempt
    pub reconnect_delay_ms: u64,
    /// Give up on a single connect attempt after this long
    pub connect_timeout_ms: u64,
    /// Keepalive ping period; 0 disables
    pub ping_interval_secs: u64,
}

impl ControllerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765".to_string(),
            reconnect_delay_ms: 5000,
            connect_timeout_ms: 10_000,
            ping_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriverMode {
    /// Simulated page, nothing leaves the process
    #[default]
    Paper,
    /// Live browser tab over DevTools
    Cdp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub mode: DriverMode,
    /// Interval between identity lookups at startup
    pub identify_poll_ms: u64,
    /// Lookups before giving up on the page
    pub identify_max_attempts: u32,
    pub cdp: CdpConfig,
    pub paper: PaperConfig,
}

impl DriverConfig {
    pub fn identify_poll(&self) -> Duration {
        Duration::from_millis(self.identify_poll_ms)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            mode: DriverMode::Paper,
            identify_poll_ms: 500,
            identify_max_attempts: 120,
            cdp: CdpConfig::default(),
            paper: PaperConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rotated log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("controller.url", "ws://localhost:8765")?
            .set_default("controller.reconnect_delay_ms", 5000)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("AUTOBID_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (AUTOBID_CONTROLLER__URL, etc.)
            .add_source(
                Environment::with_prefix("AUTOBID")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
