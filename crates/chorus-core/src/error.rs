use thiserror::Error;

/// Errors raised at the fallible edges of the core: roster files, config
/// files and the conversation store. Parsing and resolution never fail.
#[derive(Debug, Error)]
pub enum ChorusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("roster file is malformed: {0}")]
    RosterFormat(#[from] serde_yaml::Error),

    #[error("invalid roster: {0}")]
    InvalidRoster(String),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("unknown conversation mode '{0}' (expected generic or themed)")]
    UnknownMode(String),
}

pub type ChorusResult<T> = Result<T, ChorusError>;
