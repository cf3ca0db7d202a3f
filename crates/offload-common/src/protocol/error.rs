use thiserror::Error;

#[derive(Error, Debug)]
pub enum OffloadError {
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("No compute node available")]
    NoCapacity,

    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unexpected tag: expected {expected}, got {got}")]
    UnexpectedTag { expected: String, got: i8 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Node store error: {0}")]
    Store(String),

    #[error("Provisioning error: {0}")]
    Provisioning(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<std::string::FromUtf8Error> for OffloadError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        OffloadError::Protocol(format!("field is not valid UTF-8: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, OffloadError>;
