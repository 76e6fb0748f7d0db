// cr3restore/src/restore/versions.rs
//! Version enumeration, validity classification and restore selection.

use serde::Serialize;
use tracing::debug;

use super::key::DocumentKey;
use crate::errors::Result;
use crate::storage::{ObjectVersion, PageCursor, VersionedStore};
use crate::utils::retry::RetryPolicy;

/// Anything at or below this many bytes is presumed to be an HTML error page, not a CR3 PDF.
pub const DEFAULT_THRESHOLD_BYTES: u64 = 10 * 1024;

/// The version chosen for promotion, or `None` when the history holds no valid version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreDecision {
    pub key: DocumentKey,
    pub selected: Option<ObjectVersion>,
}

/// Lists every version of `key`, newest first, following pagination to the end.
///
/// An unknown key yields an empty list. Neighbouring keys that merely share the
/// prefix (`123.pdf.bak`) are dropped.
pub async fn list_versions(
    store: &dyn VersionedStore,
    retry: &RetryPolicy,
    key: &DocumentKey,
) -> Result<Vec<ObjectVersion>> {
    let mut versions = Vec::new();
    let mut cursor: Option<PageCursor> = None;
    let mut pages = 0usize;

    loop {
        let page = retry
            .run("list_object_versions", || {
                store.list_version_page(key, cursor.as_ref())
            })
            .await?;
        pages += 1;

        versions.extend(page.versions.into_iter().filter(|v| v.key == *key));
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    sort_newest_first(&mut versions);
    debug!(key = %key, pages, versions = versions.len(), "Listed object versions");
    Ok(versions)
}

/// Stable sort by `last_modified`, newest first. Equal timestamps keep listing order.
pub fn sort_newest_first(versions: &mut [ObjectVersion]) {
    versions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
}

pub fn is_valid(version: &ObjectVersion, threshold_bytes: u64) -> bool {
    version.size_bytes > threshold_bytes
}

/// Picks the first valid version of a newest-first list.
pub fn select(key: &DocumentKey, versions: &[ObjectVersion], threshold_bytes: u64) -> RestoreDecision {
    RestoreDecision {
        key: key.clone(),
        selected: versions
            .iter()
            .find(|v| is_valid(v, threshold_bytes))
            .cloned(),
    }
}
