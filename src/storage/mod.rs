//! Versioned blob store seam.
//!
//! The restore engine only talks to storage through [`VersionedStore`], so the
//! S3 backend can be swapped for the in-memory fake in tests.

pub(crate) mod s3;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::StoreError;
use crate::restore::key::DocumentKey;

/// One historical state of a stored object, as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectVersion {
    pub key: DocumentKey,
    pub version_id: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    pub e_tag: Option<String>,
}

/// Where the next page of a version listing starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub key_marker: String,
    pub version_id_marker: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VersionPage {
    /// Versions of every key sharing the requested prefix, newest first per key.
    pub versions: Vec<ObjectVersion>,
    pub next: Option<PageCursor>,
}

/// Result of a HEAD request on a key or on one specific version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionHead {
    pub version_id: Option<String>,
    pub size_bytes: u64,
    pub e_tag: Option<String>,
}

#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Cheap reachability and permission check, run once before a batch starts.
    async fn probe(&self, prefix: &str) -> Result<(), StoreError>;

    /// One page of `list-object-versions` for keys starting with `key`.
    async fn list_version_page(
        &self,
        key: &DocumentKey,
        cursor: Option<&PageCursor>,
    ) -> Result<VersionPage, StoreError>;

    /// HEAD the current object (`version_id = None`) or a specific version.
    ///
    /// Returns `Ok(None)` when the key or version does not exist.
    async fn head_version(
        &self,
        key: &DocumentKey,
        version_id: Option<&str>,
    ) -> Result<Option<VersionHead>, StoreError>;

    /// Copies `version_id` of `key` onto `key` as a new current version.
    ///
    /// When `if_match` is set the copy only proceeds if the source ETag still
    /// matches. Returns the version id the copy created.
    async fn copy_version(
        &self,
        key: &DocumentKey,
        version_id: &str,
        if_match: Option<&str>,
    ) -> Result<String, StoreError>;
}
