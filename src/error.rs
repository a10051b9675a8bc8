use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    /// Malformed feed record. Contained at the ingestor, never fatal.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("historical fetch failed: {0}")]
    Fetch(String),

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::WebSocket(e.to_string())
    }
}
