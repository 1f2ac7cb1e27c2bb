use thiserror::Error;

/// Main error type for the bidding agent
#[derive(Error, Debug)]
pub enum AutobidError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Connection timeout: {0}")]
    ConnectTimeout(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Control channel errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    // Page errors
    #[error("Page driver error: {0}")]
    Driver(String),

    #[error("Page info unavailable: {0}")]
    PageInfo(String),

    // Validation errors
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for AutobidError
pub type Result<T> = std::result::Result<T, AutobidError>;
