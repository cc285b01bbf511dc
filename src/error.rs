//! Error taxonomy for the intake pipeline.
//!
//! Extraction failures degrade to the signal-only fallback, validation
//! failures feed the reconciliation loop, and only schema errors are fatal
//! (at startup). Handlers map these onto HTTP status codes in `main.rs`.

use thiserror::Error;

/// Schema source is malformed or contradictory. Fatal at startup.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to read schema: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse schema: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate field path: {0}")]
    DuplicatePath(String),

    #[error("mandatory field '{0}' is a container, not a leaf scalar")]
    MandatoryContainer(String),

    #[error("mandatory field '{0}' is a list, not a leaf scalar")]
    MandatoryList(String),

    #[error("enum field '{0}' has no options")]
    EmptyEnum(String),

    #[error("schema defines no fields")]
    Empty,
}

/// Extraction service or response-parse failure. Recoverable: the pipeline
/// falls back to a signal-only record.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("completion service error: {0}")]
    Service(String),

    #[error("completion request timed out")]
    Timeout,

    #[error("malformed completion response: {0}")]
    Malformed(String),
}

/// Missing mandatory data or an invalid supplied value. Recoverable via the
/// reconciliation loop; always names the offending paths.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("missing mandatory fields: {}", .0.join(", "))]
    MissingMandatory(Vec<String>),

    #[error("invalid value for '{path}': {reason}")]
    InvalidValue { path: String, reason: String },
}

/// Export failures. Fatal to the single export call only.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),
}

/// Caller-facing API errors for the session-driven pipeline surface.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unknown report id: {0}")]
    UnknownId(String),

    #[error("report is already finalized")]
    AlreadyFinalized,

    #[error("report is not finalized yet")]
    NotFinalized,

    #[error("invalid values supplied")]
    InvalidValues(Vec<ValidationError>),

    #[error(transparent)]
    Export(#[from] ExportError),
}
