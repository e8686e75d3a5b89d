/// Shared error type used across all SerialAgent crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("mcp server {server}: {message}")]
    Mcp { server: String, message: String },

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("approval denied for tool {tool}: {reason}")]
    PolicyDenied { tool: String, reason: String },

    #[error("tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors that a retry policy at the call site may reasonably
    /// retry (transient external failures), as opposed to programming
    /// errors or policy decisions.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Http(_) | Error::Timeout(_) | Error::Provider { .. } | Error::Mcp { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
