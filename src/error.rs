//! Error types for depictio — Railway Programming
//!
//! All fallible operations return `Result<T, DepictioError>`.
//! No panics, no unwraps in production code paths.
//!
//! Variants map 1:1 onto the domain error kinds reported to callers
//! (`kind()`), so an error can always be rendered as
//! `{kind, detail, context}` at the boundary.

use thiserror::Error;

/// Unified error type for all depictio operations
#[derive(Error, Debug)]
pub enum DepictioError {
    // ─── Validation Errors ───

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Data collection not found: {0}")]
    DcNotFound(String),

    #[error("Data collection '{0}' has no materialized Delta table")]
    DcNotProcessed(String),

    #[error("Join '{join}': column '{column}' missing on {side} side")]
    MissingJoinColumn {
        join: String,
        side: String,
        column: String,
    },

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Invalid time '{value}': {detail}")]
    InvalidTime { value: String, detail: String },

    #[error("Invalid file {location}: {detail}")]
    InvalidFile { location: String, detail: String },

    // ─── Lookup / Mutation Errors ───

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    // ─── Infrastructure Errors ───

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scan failed at {location}: {detail}")]
    ScanIo { location: String, detail: String },

    #[error("Delta table error: {0}")]
    DeltaTable(String),

    #[error("Dataframe error: {0}")]
    Polars(String),

    #[error("Metadata store error: {0}")]
    Metadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Actor unavailable: {0}")]
    ActorUnavailable(String),
}

impl DepictioError {
    /// The language-agnostic error kind reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "config-invalid",
            Self::DcNotFound(_) => "dc-not-found",
            Self::DcNotProcessed(_) => "dc-not-processed",
            Self::MissingJoinColumn { .. } => "missing-join-column",
            Self::TypeError(_) => "type-error",
            Self::InvalidTime { .. } => "invalid-time",
            Self::InvalidFile { .. } => "invalid-file",
            Self::NotFound(_) => "not-found",
            Self::Conflict(_) => "conflict",
            Self::Auth(_) => "auth-error",
            Self::Io(_) | Self::DeltaTable(_) | Self::Polars(_) => "io-error",
            Self::ScanIo { .. } => "scan-io-error",
            Self::Metadata(_) | Self::Serialization(_) | Self::ActorUnavailable(_) => "io-error",
        }
    }
}

impl From<deltalake::DeltaTableError> for DepictioError {
    fn from(err: deltalake::DeltaTableError) -> Self {
        DepictioError::DeltaTable(err.to_string())
    }
}

impl From<polars::error::PolarsError> for DepictioError {
    fn from(err: polars::error::PolarsError) -> Self {
        DepictioError::Polars(err.to_string())
    }
}

impl From<mongodb::error::Error> for DepictioError {
    fn from(err: mongodb::error::Error) -> Self {
        DepictioError::Metadata(err.to_string())
    }
}

impl From<bson::ser::Error> for DepictioError {
    fn from(err: bson::ser::Error) -> Self {
        DepictioError::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for DepictioError {
    fn from(err: bson::de::Error) -> Self {
        DepictioError::Serialization(err.to_string())
    }
}

impl From<bson::oid::Error> for DepictioError {
    fn from(err: bson::oid::Error) -> Self {
        DepictioError::ConfigInvalid(format!("invalid object id: {err}"))
    }
}

impl From<serde_json::Error> for DepictioError {
    fn from(err: serde_json::Error) -> Self {
        DepictioError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for DepictioError {
    fn from(err: url::ParseError) -> Self {
        DepictioError::ConfigInvalid(format!("URL parse error: {err}"))
    }
}

impl From<regex::Error> for DepictioError {
    fn from(err: regex::Error) -> Self {
        DepictioError::ConfigInvalid(format!("invalid regex: {err}"))
    }
}

/// Result type alias for depictio operations
pub type Result<T> = std::result::Result<T, DepictioError>;
