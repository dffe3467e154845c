use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("unable to connect to the FinBIF API: {0}")]
    Connection(String),

    #[error("FinBIF API returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("malformed API response: {0}")]
    Malformed(String),

    #[error("query matches {total} occurrences, which exceeds the limit of {limit}")]
    LimitExceeded { total: u64, limit: u64 },

    #[error("access token is empty")]
    MissingAccessToken,

    #[error("invalid wildcard filter (expected key=value): {0}")]
    InvalidWildcard(String),

    #[error("invalid date range: {begin} is after {end}")]
    InvalidDateRange { begin: String, end: String },

    #[error("unsupported geometry: {0}")]
    UnsupportedGeometry(String),

    #[error("fetch produced no records to materialize")]
    EmptyResult,

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
