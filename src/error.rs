use thiserror::Error;

/// Input rejected before any work is attempted. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid window specification '{input}': expected <integer><unit> with unit s, m, h or d")]
    InvalidWindow { input: String },

    #[error("unsupported window unit '{unit}' in '{input}': expected one of s, m, h, d")]
    UnsupportedWindowUnit { input: String, unit: String },

    #[error("invalid symbol '{input}': {reason}")]
    InvalidSymbol { input: String, reason: &'static str },

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },
}

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("provider {provider} unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("connection ceiling exhausted for {provider}/{credential}: {scope} limit reached")]
    ConnectionExhausted {
        provider: String,
        credential: String,
        scope: &'static str,
    },

    #[error("cache backend unavailable during {operation}: {reason}")]
    CacheBackendUnavailable {
        operation: &'static str,
        reason: String,
    },

    #[error("critical broadcast failure for {target}: {reason} ({recommendation})")]
    CriticalBroadcast {
        target: String,
        reason: String,
        recommendation: &'static str,
    },

    #[error("rate limit exceeded for {key}: {current}/{limit}")]
    RateLimited { key: String, current: u64, limit: u64 },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("client send failed: {0}")]
    Send(String),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may retry the operation that produced this error.
    ///
    /// Validation and configuration failures are permanent; provider, pool,
    /// cache-backend, rate-limit and timeout failures are transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. }
                | Self::ConnectionExhausted { .. }
                | Self::CacheBackendUnavailable { .. }
                | Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::Io(_)
                | Self::WebSocket(_)
        )
    }

    pub(crate) fn provider_unavailable(provider: impl ToString, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn backend(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::CacheBackendUnavailable {
            operation,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}
