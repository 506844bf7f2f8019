use thiserror::Error;

/// The five error kinds this server surfaces, per the RESP/command/RDB layers.
#[derive(Debug, Error)]
pub enum RedisError {
    #[error("ERR Protocol error: {0}")]
    Protocol(String),

    #[error("ERR {0}")]
    Validation(String),

    #[error("ERR {0}")]
    Stream(String),

    #[error("RDB error: {0}")]
    Rdb(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RedisError {
    /// Render as the text that follows the leading `-` in a RESP error frame.
    pub fn reply_text(&self) -> String {
        match self {
            RedisError::Protocol(msg) => format!("ERR Protocol error: {}", msg),
            RedisError::Validation(msg) => format!("ERR {}", msg),
            RedisError::Stream(msg) => msg.clone(),
            RedisError::Rdb(msg) => format!("ERR {}", msg),
            RedisError::Io(e) => format!("ERR {}", e),
        }
    }
}
