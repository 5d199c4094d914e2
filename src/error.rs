use thiserror::Error;

use crate::config::ConfigError;

/// Main library error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum Error {
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Stale cache miss: origin answered 304 Not Modified but nothing is stored for {key}")]
    StaleCacheMiss { key: String },

    #[error("Request timeout: {url} - {message}")]
    Timeout { url: String, message: String },

    #[error("{message}")]
    Client {
        url: String,
        status: Option<u16>,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("No cache key available for this result")]
    NoCacheKeyAvailable,

    #[error("Invalid URL: {url} - {details}")]
    InvalidUrl { url: String, details: String },

    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure was a transport timeout, as opposed to any other client failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// HTTP status carried by a client error, if the origin answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Client { status, .. } => *status,
            _ => None,
        }
    }
}

/// Errors raised while turning a fetched body into objects.
///
/// Cloneable so a lazy result can memoize a failed evaluation and hand the
/// same error back on every later observation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("{type_name} rejected representation: {reason}")]
    Rejected { type_name: String, reason: String },
}

/// Content was present but could not be parsed as the declared type
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Conversion error: field '{field}' expected {target_type}, found {raw_text:?}")]
pub struct ConversionError {
    pub field: String,
    pub raw_text: String,
    pub target_type: &'static str,
}

/// Document parsing error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("Malformed document at byte {position}: {details}")]
    Malformed { position: u64, details: String },

    #[error("Document has no root element")]
    MissingRoot,

    #[error("Document is not valid UTF-8: {details}")]
    Encoding { details: String },

    #[error("Document parser refused input: {details}")]
    Refused { details: String },

    #[error("Elements nested deeper than {limit} levels")]
    TooDeep { limit: usize },
}

/// Schema definition error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Duplicate field '{field}' in schema {schema}")]
    DuplicateField { schema: String, field: String },

    #[error("Unknown schema: {name}")]
    UnknownSchema { name: String },

    #[error(transparent)]
    InvalidSelector(#[from] SelectorError),
}

/// A path expression that cannot be understood
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid selector '{selector}': {details}")]
pub struct SelectorError {
    pub selector: String,
    pub details: String,
}

/// Cache store error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store read error: {key} - {details}")]
    ReadError { key: String, details: String },

    #[error("Store write error: {key} - {details}")]
    WriteError { key: String, details: String },

    #[error("Store corruption detected: {key} - {details}")]
    Corruption { key: String, details: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

/// Mapping result type alias
pub type MappingResult<T> = std::result::Result<T, MappingError>;

/// Store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;
