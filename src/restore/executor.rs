// cr3restore/src/restore/executor.rs
use tracing::{info, warn};

use super::key::DocumentKey;
use super::versions::{RestoreDecision, list_versions};
use crate::errors::{RestoreError, Result};
use crate::storage::{ObjectVersion, VersionedStore};
use crate::utils::retry::RetryPolicy;

/// A completed promotion: `new_version_id` now holds the content of `source_version_id`.
///
/// `unverified` is set when the copy landed but the read-back afterwards failed,
/// so nobody could confirm that the copy is still current.
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    pub source_version_id: String,
    pub new_version_id: String,
    pub replaced_version_id: Option<String>,
    pub unverified: Option<RestoreError>,
}

/// Promotes the selected version of `decision.key` to be the current version.
///
/// Nothing is deleted: the copy lands as a new version on top of the history.
/// The sequence is
/// 1. HEAD the selected version (gone or changed => `StaleVersion`),
/// 2. HEAD the current version to remember what is being replaced,
/// 3. copy with `copy-source-if-match` on the selected ETag,
/// 4. re-list and check that only copies of the selected content sit on top of
///    the remembered version.
///
/// A retried copy whose first response was lost leaves two identical copies;
/// that still counts as restored. Any foreign version is a `WriteConflict`.
pub async fn restore(
    store: &dyn VersionedStore,
    retry: &RetryPolicy,
    decision: &RestoreDecision,
) -> Result<Promotion> {
    let key = &decision.key;
    let selected = decision.selected.as_ref().ok_or_else(|| {
        RestoreError::NotFound(format!("no valid version was selected for {}", key))
    })?;

    let source = retry
        .run("head_object", || {
            store.head_version(key, Some(selected.version_id.as_str()))
        })
        .await?
        .ok_or_else(|| {
            RestoreError::StaleVersion(format!(
                "version {} of {} no longer exists",
                selected.version_id, key
            ))
        })?;
    if source.size_bytes != selected.size_bytes {
        return Err(RestoreError::StaleVersion(format!(
            "version {} of {} is {} bytes, listed as {}",
            selected.version_id, key, source.size_bytes, selected.size_bytes
        )));
    }

    let replaced_version_id = retry
        .run("head_object", || store.head_version(key, None))
        .await?
        .and_then(|current| current.version_id);

    let if_match = source.e_tag.as_deref().or(selected.e_tag.as_deref());
    info!(
        key = %key,
        source = %selected.version_id,
        size_bytes = selected.size_bytes,
        last_modified = %selected.last_modified,
        "Restoring version"
    );
    let new_version_id = retry
        .run("copy_object", || {
            store.copy_version(key, &selected.version_id, if_match)
        })
        .await?;

    let expected = CopyExpectation {
        size_bytes: selected.size_bytes,
        new_version_id: &new_version_id,
        replaced_version_id: replaced_version_id.as_deref(),
    };
    let unverified = match list_versions(store, retry, key).await {
        Ok(versions) => {
            expected.check(key, &versions)?;
            None
        }
        Err(err) => {
            warn!(key = %key, restored = %new_version_id, "Restored but could not verify: {}", err);
            Some(err)
        }
    };

    Ok(Promotion {
        source_version_id: selected.version_id.clone(),
        new_version_id,
        replaced_version_id,
        unverified,
    })
}

/// What the history must look like after a successful copy.
struct CopyExpectation<'a> {
    size_bytes: u64,
    new_version_id: &'a str,
    replaced_version_id: Option<&'a str>,
}

impl CopyExpectation<'_> {
    /// Walks the versions newest first down to the remembered one. Every version on
    /// the way must look like our copy (same size and ETag).
    fn check(&self, key: &DocumentKey, newest_first: &[ObjectVersion]) -> Result<()> {
        let ours = newest_first
            .iter()
            .find(|v| v.version_id == self.new_version_id)
            .ok_or_else(|| {
                RestoreError::WriteConflict(format!(
                    "restored version {} of {} is not visible after restore",
                    self.new_version_id, key
                ))
            })?;
        if ours.size_bytes != self.size_bytes {
            return Err(RestoreError::WriteConflict(format!(
                "restored version {} of {} is {} bytes, expected {}",
                self.new_version_id, key, ours.size_bytes, self.size_bytes
            )));
        }

        for version in newest_first {
            if Some(version.version_id.as_str()) == self.replaced_version_id {
                return Ok(());
            }
            if version.size_bytes != ours.size_bytes || version.e_tag != ours.e_tag {
                warn!(key = %key, foreign = %version.version_id, restored = %self.new_version_id, "Restore superseded");
                return Err(RestoreError::WriteConflict(format!(
                    "version {} of {} ({} bytes) was written around restoring {}",
                    version.version_id, key, version.size_bytes, self.new_version_id
                )));
            }
            if self.replaced_version_id.is_none() && version.version_id == self.new_version_id {
                return Ok(());
            }
        }

        match self.replaced_version_id {
            Some(expected) => Err(RestoreError::WriteConflict(format!(
                "version {} of {} disappeared during restore",
                expected, key
            ))),
            None => Ok(()),
        }
    }
}
