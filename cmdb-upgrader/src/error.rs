//! Upgrader Error Types

use cmdb_store::StoreError;
use thiserror::Error;

/// Upgrade errors
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// A unique constraint references an attribute the object does not define
    #[error("Object {object_id}: unique constraint {unique_id} references missing attribute {attribute_id}")]
    MissingAttribute {
        object_id: String,
        unique_id: u64,
        attribute_id: u64,
    },

    /// An attribute type has no physical predicate type
    #[error(
        "Object {object_id}: unique constraint {unique_id} uses property {property_id} of unsupported type {property_type}"
    )]
    UnsupportedPropertyType {
        object_id: String,
        unique_id: u64,
        property_id: String,
        property_type: String,
    },

    /// Malformed metadata row
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Storage failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A record could not be written to its destination
    #[error("Copy into {table} failed for record {record}: {source}")]
    Copy {
        table: String,
        record: String,
        #[source]
        source: StoreError,
    },

    /// A copy worker panicked
    #[error("Copy worker panicked: {0}")]
    WorkerPanicked(String),

    /// Unparseable version string
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Two steps registered for one version
    #[error("Duplicate upgrade step for version {0}")]
    DuplicateStep(String),

    /// A step failed; the watermark was not advanced past it
    #[error("Upgrade step {version} failed: {source}")]
    StepFailed {
        version: String,
        #[source]
        source: Box<UpgradeError>,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl UpgradeError {
    /// Create a metadata error
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Version of the failed step, if this error came from the orchestrator
    pub fn failed_version(&self) -> Option<&str> {
        match self {
            Self::StepFailed { version, .. } => Some(version),
            _ => None,
        }
    }
}

/// Upgrade result type
pub type UpgradeResult<T> = Result<T, UpgradeError>;
