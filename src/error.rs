use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("API error: {message}")]
    Api { message: String },

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Provider is already streaming")]
    AlreadyStreaming,
}

pub type Result<T> = std::result::Result<T, RouterError>;
