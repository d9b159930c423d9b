use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Driver rejected {operation}: {reason}")]
    Driver { operation: &'static str, reason: String },

    #[error("Arbiter inbox closed")]
    InboxClosed,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn driver(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Driver {
            operation,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
