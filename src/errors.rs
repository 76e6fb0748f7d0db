use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::utils::retry::Transient;

/// Classification of a per-item failure, as recorded in the batch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    StoreUnavailable,
    NotFound,
    StaleVersion,
    WriteConflict,
    MetadataUnavailable,
    InvalidIdentifier,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::StoreUnavailable => "StoreUnavailable",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::StaleVersion => "StaleVersion",
            ErrorKind::WriteConflict => "WriteConflict",
            ErrorKind::MetadataUnavailable => "MetadataUnavailable",
            ErrorKind::InvalidIdentifier => "InvalidIdentifier",
        };
        f.write_str(name)
    }
}

/// Errors that fail a single crash in a batch. None of these abort the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RestoreError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Selected version is stale: {0}")]
    StaleVersion(String),

    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("Metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl RestoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RestoreError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            RestoreError::NotFound(_) => ErrorKind::NotFound,
            RestoreError::StaleVersion(_) => ErrorKind::StaleVersion,
            RestoreError::WriteConflict(_) => ErrorKind::WriteConflict,
            RestoreError::MetadataUnavailable(_) => ErrorKind::MetadataUnavailable,
            RestoreError::InvalidIdentifier(_) => ErrorKind::InvalidIdentifier,
        }
    }
}

/// Errors surfaced by a `VersionedStore` backend, one per network call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("no such version: {0}")]
    NoSuchVersion(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("store error: {0}")]
    Other(String),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<StoreError> for RestoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoSuchVersion(msg) => RestoreError::StaleVersion(msg),
            StoreError::PreconditionFailed(msg) => RestoreError::WriteConflict(msg),
            other => RestoreError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Errors from the crash metadata lookup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    #[error("metadata request failed: {0}")]
    Transient(String),

    #[error("metadata request rejected: {0}")]
    Rejected(String),

    #[error("metadata response malformed: {0}")]
    Malformed(String),
}

impl Transient for MetadataError {
    fn is_transient(&self) -> bool {
        matches!(self, MetadataError::Transient(_))
    }
}

impl From<MetadataError> for RestoreError {
    fn from(err: MetadataError) -> Self {
        RestoreError::MetadataUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RestoreError>;
