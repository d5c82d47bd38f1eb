use std::io;

/// Custom error type for bazaar_ratelimit operations
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Helper type for Results that use RateLimitError
pub type Result<T> = std::result::Result<T, RateLimitError>;
