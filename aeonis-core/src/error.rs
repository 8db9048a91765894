//! Error types for Aeonis

use thiserror::Error;

/// Result type alias for Aeonis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Aeonis operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Low-level git error that was not classified further
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// Repository, branch, commit or path is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote rejected the provisioned credential
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// On-disk working copy is unusable and must be re-cloned
    #[error("Corrupt working copy: {0}")]
    CorruptCache(String),

    /// Working copy could not be obtained for a reason not classified above
    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// Static scanner exited fatally or produced unparsable output
    #[error("Scanner failure: {0}")]
    ScannerFailure(String),

    /// Tool execution failed
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Tool arguments could not be parsed or resolved
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The model asked for a tool that does not exist
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A network git call or scanner run exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Data was present but could not be interpreted (e.g. non UTF-8 file)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Completion engine error
    #[error("Completion engine error: {0}")]
    Completion(String),

    /// Persistence collaborator error
    #[error("Store error: {0}")]
    Store(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable snake_case label used in structured tool error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Git(_) => "git",
            Error::NotFound(_) => "not_found",
            Error::AuthFailure(_) => "auth_failure",
            Error::CorruptCache(_) => "corrupt_cache",
            Error::RepositoryUnavailable(_) => "repository_unavailable",
            Error::ScannerFailure(_) => "scanner_failure",
            Error::ToolExecution(_) => "tool_execution_error",
            Error::InvalidArguments(_) => "invalid_arguments",
            Error::UnknownTool(_) => "unknown_tool",
            Error::Timeout(_) => "timeout",
            Error::InvalidData(_) => "invalid_data",
            Error::Config(_) => "config",
            Error::Completion(_) => "completion",
            Error::Store(_) => "store",
            Error::Other(_) => "other",
        }
    }

    /// Whether this error came from obtaining the working copy itself
    ///
    /// These are reported to the model generically so that remote URLs and
    /// credential details never end up in a conversation. Timeouts are not
    /// included since scans time out too; a git timeout during acquisition
    /// is wrapped in `RepositoryUnavailable`.
    pub fn is_repository_unavailable(&self) -> bool {
        matches!(
            self,
            Error::AuthFailure(_) | Error::CorruptCache(_) | Error::RepositoryUnavailable(_)
        )
    }
}
