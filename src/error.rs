use thiserror::Error;

/// Single error currency for the strategy engine.
///
/// Variants are grouped to match the five failure classes the engine
/// distinguishes: configuration problems are fatal at construction,
/// transient I/O is caught at the narrowest scope and recorded on the
/// cycle result, domain refusals mean "no mutation happened, try again
/// later", fatal I/O bubbles all the way to the scheduler, and data-shape
/// errors are treated the same as transient I/O by callers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("domain refusal: {0}")]
    DomainRefusal(String),

    #[error("fatal I/O error: {0}")]
    FatalIo(String),

    #[error("unexpected data shape: {0}")]
    DataShape(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::FatalIo(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::FatalIo(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::DataShape(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
