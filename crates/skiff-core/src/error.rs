//! Error types for skiff operations.
//!
//! Record-level validation failures are not errors: backends report them in
//! [`ChunkOutcome::failed`](crate::types::ChunkOutcome) and the run continues.
//! Everything in [`ImportError`] aborts the run.

use thiserror::Error;

/// Result type alias for skiff operations.
pub type ImportResult<T> = Result<T, ImportError>;

/// Error raised by user-supplied hooks and value converters.
///
/// Carried through the pipeline untouched so callers can downcast it back to
/// the type their hook produced.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for user-supplied hooks.
pub type HookResult<T> = Result<T, HookError>;

/// Main error type for all skiff operations.
#[derive(Error, Debug)]
pub enum ImportError {
    /// Invalid configuration, detected before any I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The source could not be opened or decoded.
    #[error("Source read error: {message}")]
    SourceRead {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The storage backend failed hard (constraint outside validation,
    /// connectivity, I/O).
    #[error("Backend error: {message}")]
    Backend {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A user hook or value converter failed.
    #[error("Hook error: {0}")]
    Hook(#[source] HookError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Configuration (CFG_xxx)
    CfgInvalid,

    // Source (SRC_xxx)
    SrcNotFound,
    SrcMalformed,
    SrcEncoding,

    // Backend (DB_xxx)
    DbConstraintViolation,
    DbUnknownTarget,
    DbUnknownAttribute,
    DbOperationFailed,
    DbTransactionState,

    // Hooks (HOOK_xxx)
    HookFailed,

    // Internal
    Io,
    Serialization,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CfgInvalid => "CFG_001",
            ErrorCode::SrcNotFound => "SRC_001",
            ErrorCode::SrcMalformed => "SRC_002",
            ErrorCode::SrcEncoding => "SRC_003",
            ErrorCode::DbConstraintViolation => "DB_001",
            ErrorCode::DbUnknownTarget => "DB_002",
            ErrorCode::DbUnknownAttribute => "DB_003",
            ErrorCode::DbOperationFailed => "DB_004",
            ErrorCode::DbTransactionState => "DB_005",
            ErrorCode::HookFailed => "HOOK_001",
            ErrorCode::Io => "IO_001",
            ErrorCode::Serialization => "SER_001",
        }
    }
}

impl ImportError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a source read error for malformed input.
    pub fn source_read(message: impl Into<String>) -> Self {
        Self::SourceRead {
            message: message.into(),
            code: ErrorCode::SrcMalformed,
            source: None,
        }
    }

    /// Create a source read error wrapping the underlying cause.
    pub fn source_read_with(
        message: impl Into<String>,
        code: ErrorCode,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SourceRead {
            message: message.into(),
            code,
            source: Some(Box::new(source)),
        }
    }

    /// Create a generic backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create a backend error with a specific code and optional cause.
    pub fn backend_with(
        message: impl Into<String>,
        code: ErrorCode,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            code,
            source,
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration(_) => ErrorCode::CfgInvalid,
            Self::SourceRead { code, .. } => *code,
            Self::Backend { code, .. } => *code,
            Self::Hook(_) => ErrorCode::HookFailed,
            Self::Io(_) => ErrorCode::Io,
            Self::Serialization(_) => ErrorCode::Serialization,
        }
    }

    /// The original hook error, if this error came from a user hook.
    pub fn hook_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Hook(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Unwrap the original hook error, if this error came from a user hook.
    pub fn into_hook_error(self) -> Result<HookError, Self> {
        match self {
            Self::Hook(err) => Ok(err),
            other => Err(other),
        }
    }

    /// Whether this error was raised by a hard backend constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Backend {
                code: ErrorCode::DbConstraintViolation,
                ..
            }
        )
    }

    /// Get a user-friendly suggestion for resolving this error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Configuration(_) => Some("Please check the import options and column mapping"),
            Self::SourceRead { .. } => Some("Please check the source file's delimiter and encoding"),
            Self::Backend {
                code: ErrorCode::DbConstraintViolation,
                ..
            } => Some("Enable on_duplicate_key_ignore or deduplicate the source"),
            _ => None,
        }
    }
}
