//! Error types for fetching, extracting and reading resource dumps

use thiserror::Error;

/// Result type for ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error types for termhub ingestion
#[derive(Debug, Error)]
pub enum IngestError {
    /// Timeout or refused connection; the previous dump stays in place
    #[error("Transient network error for {address}: {message}")]
    TransientNetwork { address: String, message: String },

    /// The remote size probe failed
    #[error("Remote change check failed for {resource}: {message}")]
    RemoteChangeCheckFailed { resource: String, message: String },

    /// The download or its extraction failed; partial output was discarded
    #[error("Download failed for {address}: {message}")]
    DownloadFailed { address: String, message: String },

    /// Another process is updating the same dump files
    #[error("Concurrent update in progress for {resource} (sentinel {sentinel})")]
    ConcurrentUpdateInProgress { resource: String, sentinel: String },

    /// One record of a dump could not be parsed; iteration continues
    #[error("Malformed record in {source_name} at {location}: {message}")]
    MalformedRecord {
        source_name: String,
        location: String,
        message: String,
    },

    #[error("Invalid update recipe for {url}: {message}")]
    InvalidRecipe { url: String, message: String },

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Archive member(s) not found: {0:?}")]
    MissingMembers(Vec<String>),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Dump file missing for resource {resource}: {path}")]
    MissingDump { resource: String, path: String },

    #[error("Invalid renaming rule '{pattern}': {message}")]
    InvalidRenaming { pattern: String, message: String },

    #[error("Unknown postfilter: {0}")]
    UnknownPostfilter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Common error: {0}")]
    Common(#[from] termhub_common::TermhubError),
}

impl IngestError {
    pub fn malformed(
        source_name: impl Into<String>,
        location: impl std::fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        IngestError::MalformedRecord {
            source_name: source_name.into(),
            location: location.to_string(),
            message: message.into(),
        }
    }

    /// Whether a record reader may skip this error and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IngestError::MalformedRecord { .. })
    }

    /// Whether the failure is worth retrying on the next run without changes
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::TransientNetwork { .. })
    }
}

impl From<quick_xml::Error> for IngestError {
    fn from(err: quick_xml::Error) -> Self {
        IngestError::Xml(err.to_string())
    }
}

impl From<zip::result::ZipError> for IngestError {
    fn from(err: zip::result::ZipError) -> Self {
        IngestError::Pipeline(format!("zip: {}", err))
    }
}
