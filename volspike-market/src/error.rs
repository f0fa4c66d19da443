use thiserror::Error;

/// All errors generated in `volspike-market`.
///
/// Nothing here is fatal to a running aggregator: every failure path
/// degrades to "keep the previous data and try again later". Foreign error
/// types that are not `Clone` are carried as their rendered message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("failed to decode upstream payload: {0}")]
    Decode(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("cache io error: {0}")]
    Cache(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<reqwest::Error> for MarketError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}

impl From<serde_json::Error> for MarketError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<std::io::Error> for MarketError {
    fn from(value: std::io::Error) -> Self {
        Self::Cache(value.to_string())
    }
}
