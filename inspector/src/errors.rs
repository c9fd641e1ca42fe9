use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InspectorError {
    #[error("Transport error: {0}")]
    Transport(String),

    /// The agent closed the socket before the call settled.
    #[error("Connection closed by agent{}", .code.map(|c| format!(" (code {c})")).unwrap_or_default())]
    Closed { code: Option<u16> },

    /// An `Error`/`ErrorCode` frame from the agent.
    #[error("Agent error: {message}")]
    Protocol { code: Option<i64>, message: String },

    #[error("Code declined by agent: {0}")]
    Declined(String),

    /// The submitted code ran and reported an error value.
    #[error("Script error: {0}")]
    Script(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl InspectorError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, InspectorError::Timeout(_))
    }
}
