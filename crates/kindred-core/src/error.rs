use kindred_memory::MemoryError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no conversation memory for {0}")]
    MissingMemory(String),
    #[error("identity store failure: {0}")]
    Identity(String),
    #[error("match store failure: {0}")]
    Match(String),
    #[error("message store failure: {0}")]
    Store(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<MemoryError> for SessionError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::NotFound(conversation_id) => SessionError::MissingMemory(conversation_id),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
