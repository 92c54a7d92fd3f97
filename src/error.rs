use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Protocol error: {reason} ({} bytes)", bytes.len())]
    Protocol { reason: String, bytes: Vec<u8> },

    #[error("Job {id} unfulfilled: {reason}")]
    Unfulfilled { id: String, reason: String },

    #[error("Result for {id} unavailable after {attempts} lookups")]
    ResultUnavailable { id: String, attempts: u32 },

    #[error("Broadcast queue full (capacity {0})")]
    QueueFull(usize),

    #[error("Broadcast queue closed")]
    QueueClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine is stopped")]
    EngineStopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwarmError {
    pub fn protocol(reason: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        SwarmError::Protocol {
            reason: reason.into(),
            bytes: bytes.into(),
        }
    }

    pub fn unfulfilled(id: impl Into<String>, reason: impl Into<String>) -> Self {
        SwarmError::Unfulfilled {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;
