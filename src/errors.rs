use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptHostError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("invalid proxy URL: {0}")]
    InvalidProxy(String),

    #[error("invalid selector: {0}")]
    Selector(String),

    #[error("{0}")]
    ElementNotFound(String),

    #[error("compile error: {0}")]
    Compile(String),

    #[error("execute error: {0}")]
    Runtime(String),

    #[error("script returned error: {0}")]
    ScriptReported(String),

    #[error("result format error: {0}")]
    Validation(String),

    #[error("unsupported entry point: {0}")]
    UnsupportedEntryPoint(String),

    #[error("execution cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ScriptHostError>;

impl From<anyhow::Error> for ScriptHostError {
    fn from(err: anyhow::Error) -> Self {
        ScriptHostError::Other(err.to_string())
    }
}

impl ScriptHostError {
    /// Wrap any transport-level failure as an HTTP error.
    pub fn http<E: std::fmt::Display>(err: E) -> Self {
        ScriptHostError::Http(err.to_string())
    }
}
