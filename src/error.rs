use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::schema::UploadStatus;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unsupported file format for '{filename}': {detail}")]
    UnsupportedFormat { filename: String, detail: String },

    #[error("File '{filename}' is {size} bytes; accepted range is {min}..={max} bytes")]
    SizeOutOfBounds {
        filename: String,
        size: usize,
        min: usize,
        max: usize,
    },

    #[error("Failed to parse '{filename}': {reason}")]
    ParsingError { reason: String, filename: String },

    #[error("Classification failed for '{asset}': {reason}")]
    ClassificationError { asset: String, reason: String },

    #[error("Duplicate detection failed: {0}")]
    DuplicateDetectionError(String),

    #[error("Snapshot match failed: {0}")]
    SnapshotMatchError(String),

    #[error(transparent)]
    Finalize(#[from] FinalizeError),

    #[error("Review session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Review session {0} has expired")]
    SessionExpired(Uuid),

    #[error("Review session {id} is already {status}")]
    SessionClosed { id: Uuid, status: UploadStatus },

    #[error("Staged asset {0} not found")]
    StagedAssetNotFound(Uuid),

    #[error("Invalid edit for staged asset {id}: {reason}")]
    InvalidPatch { id: Uuid, reason: String },

    #[error("Cannot resolve duplicate group: {0}")]
    InvalidResolution(String),

    #[error("Oracle request failed: {0}")]
    OracleError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "gemini")]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FinalizeError {
    #[error("No assets selected for finalize")]
    NoAssetsSelected,

    #[error("Target snapshot {0} not found")]
    SnapshotNotFound(String),

    #[error("Merge mode requires a target snapshot")]
    MissingTargetSnapshot,

    #[error("Inserting assets into snapshot {snapshot_id} failed after {assets_saved} saved: {reason}")]
    InsertFailed {
        snapshot_id: String,
        reason: String,
        assets_saved: usize,
        rolled_back: bool,
    },
}

/// Serializable discriminant carried by boundary error records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    SizeOutOfBounds,
    ParsingError,
    ClassificationError,
    DuplicateDetectionError,
    SnapshotMatchError,
    NoAssetsSelected,
    SnapshotNotFound,
    FinalizeError,
    SessionNotFound,
    SessionExpired,
    SessionClosed,
    StagedAssetNotFound,
    InvalidRequest,
    OracleError,
    PersistenceError,
    ConfigError,
    Internal,
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            IngestError::SizeOutOfBounds { .. } => ErrorKind::SizeOutOfBounds,
            IngestError::ParsingError { .. } | IngestError::CsvError(_) => ErrorKind::ParsingError,
            IngestError::ClassificationError { .. } => ErrorKind::ClassificationError,
            IngestError::DuplicateDetectionError(_) => ErrorKind::DuplicateDetectionError,
            IngestError::SnapshotMatchError(_) => ErrorKind::SnapshotMatchError,
            IngestError::Finalize(FinalizeError::NoAssetsSelected) => ErrorKind::NoAssetsSelected,
            IngestError::Finalize(FinalizeError::SnapshotNotFound(_)) => {
                ErrorKind::SnapshotNotFound
            }
            IngestError::Finalize(_) => ErrorKind::FinalizeError,
            IngestError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            IngestError::SessionExpired(_) => ErrorKind::SessionExpired,
            IngestError::SessionClosed { .. } => ErrorKind::SessionClosed,
            IngestError::StagedAssetNotFound(_) => ErrorKind::StagedAssetNotFound,
            IngestError::InvalidPatch { .. } | IngestError::InvalidResolution(_) => {
                ErrorKind::InvalidRequest
            }
            IngestError::OracleError(_) => ErrorKind::OracleError,
            IngestError::PersistenceError(_) => ErrorKind::PersistenceError,
            IngestError::ConfigError(_) => ErrorKind::ConfigError,
            IngestError::SerializationError(_) | IngestError::IoError(_) => ErrorKind::Internal,
            #[cfg(feature = "gemini")]
            IngestError::HttpError(_) => ErrorKind::OracleError,
        }
    }

    pub(crate) fn parsing(filename: &str, reason: impl Into<String>) -> Self {
        IngestError::ParsingError {
            reason: reason.into(),
            filename: filename.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
