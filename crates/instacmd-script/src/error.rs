use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// Parsing, module resolution or the top-level statements failed.
    #[error("{0}")]
    Compile(String),
    /// The snippet ran but produced nothing usable.
    #[error("Nothing detected. Make sure to return something")]
    EmptyResult,
    /// A snippet function failed after installation.
    #[error("{0}")]
    Runtime(String),
    #[error("failed to convert event payload: {0}")]
    Payload(String),
}
