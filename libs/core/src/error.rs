use std::sync::Arc;

use thiserror::Error;

/// Outcome error for connections and the payloads queued on them.
///
/// Cloneable: a latched connection error is handed to every payload that
/// was waiting on the connection.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("{0} timeout exceeded")]
    Timeout(&'static str),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Payload dropped by send queue overflow")]
    Dropped,

    #[error("No tokio runtime available")]
    NoRuntime,

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
