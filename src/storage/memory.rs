//! In-memory `VersionedStore` with failure injection, used by the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use super::{ObjectVersion, PageCursor, VersionHead, VersionPage, VersionedStore};
use crate::errors::StoreError;
use crate::restore::key::DocumentKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Head,
    Copy,
}

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    content: Vec<u8>,
    last_modified: DateTime<Utc>,
}

impl StoredVersion {
    fn e_tag(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.content.hash(&mut hasher);
        format!("\"{:016x}\"", hasher.finish())
    }

    fn to_listing(&self, key: &str) -> ObjectVersion {
        ObjectVersion {
            key: DocumentKey::from_store(key),
            version_id: self.version_id.clone(),
            size_bytes: self.content.len() as u64,
            last_modified: self.last_modified,
            e_tag: Some(self.e_tag()),
        }
    }
}

#[derive(Default)]
struct State {
    // Oldest version first, like the order of writes.
    objects: BTreeMap<String, Vec<StoredVersion>>,
    next_version: u64,
    ticks: i64,
    failures: HashMap<(Op, String), VecDeque<StoreError>>,
    probe_failure: Option<StoreError>,
    expire_after_listing: HashMap<String, String>,
    write_after_copy: HashMap<String, Vec<u8>>,
    lose_copy_response: HashSet<String>,
    copy_delays: HashMap<String, StdDuration>,
    copy_log: Vec<String>,
    fail_listing_after_copy: HashMap<String, StoreError>,
    calls: HashMap<Op, usize>,
    copies: usize,
}

impl State {
    fn write(&mut self, key: &str, content: Vec<u8>) -> String {
        self.next_version += 1;
        self.ticks += 1;
        let version_id = format!("v{}", self.next_version);
        let base = DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.objects.entry(key.to_string()).or_default().push(StoredVersion {
            version_id: version_id.clone(),
            content,
            last_modified: base + Duration::seconds(self.ticks),
        });
        version_id
    }

    fn take_failure(&mut self, op: Op, key: &str) -> Option<StoreError> {
        *self.calls.entry(op).or_default() += 1;
        self.failures
            .get_mut(&(op, key.to_string()))
            .and_then(|queue| queue.pop_front())
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
    page_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: page_size.max(1),
        }
    }

    /// Writes `size` bytes of `fill` as a new current version of `key`.
    pub fn put_sized(&self, key: &DocumentKey, size: usize, fill: u8) -> String {
        self.put(key, vec![fill; size])
    }

    pub fn put(&self, key: &DocumentKey, content: Vec<u8>) -> String {
        self.state.lock().unwrap().write(key.as_str(), content)
    }

    pub fn current_content(&self, key: &DocumentKey) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(key.as_str())
            .and_then(|versions| versions.last())
            .map(|v| v.content.clone())
    }

    pub fn current_version_id(&self, key: &DocumentKey) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(key.as_str())
            .and_then(|versions| versions.last())
            .map(|v| v.version_id.clone())
    }

    pub fn version_count(&self, key: &DocumentKey) -> usize {
        let state = self.state.lock().unwrap();
        state.objects.get(key.as_str()).map_or(0, Vec::len)
    }

    /// Number of successful copy (promotion) calls.
    pub fn copies(&self) -> usize {
        self.state.lock().unwrap().copies
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().unwrap().calls.get(&op).copied().unwrap_or(0)
    }

    /// Queues `err` to be returned by the next `op` call on `key`.
    pub fn inject(&self, op: Op, key: &DocumentKey, err: StoreError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .entry((op, key.as_str().to_string()))
            .or_default()
            .push_back(err);
    }

    pub fn fail_probe(&self, err: StoreError) {
        self.state.lock().unwrap().probe_failure = Some(err);
    }

    /// Deletes `version_id` right after the next listing of `key`, simulating a stale read.
    pub fn expire_after_listing(&self, key: &DocumentKey, version_id: &str) {
        self.state
            .lock()
            .unwrap()
            .expire_after_listing
            .insert(key.as_str().to_string(), version_id.to_string());
    }

    /// Has another writer put `content` on `key` right after the next copy lands.
    pub fn write_after_copy(&self, key: &DocumentKey, content: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .write_after_copy
            .insert(key.as_str().to_string(), content);
    }

    /// Makes the next copy on `key` land but report a transient failure, as when
    /// the response is lost on the wire.
    pub fn lose_copy_response(&self, key: &DocumentKey) {
        self.state
            .lock()
            .unwrap()
            .lose_copy_response
            .insert(key.as_str().to_string());
    }

    /// Every copy on `key` sleeps for `delay` before it lands.
    pub fn delay_copies(&self, key: &DocumentKey, delay: StdDuration) {
        self.state
            .lock()
            .unwrap()
            .copy_delays
            .insert(key.as_str().to_string(), delay);
    }

    /// Makes the first listing of `key` after the next copy fail with `err`.
    pub fn fail_listing_after_copy(&self, key: &DocumentKey, err: StoreError) {
        self.state
            .lock()
            .unwrap()
            .fail_listing_after_copy
            .insert(key.as_str().to_string(), err);
    }

    /// Keys in the order their copies landed.
    pub fn copy_log(&self) -> Vec<String> {
        self.state.lock().unwrap().copy_log.clone()
    }

    async fn pause_before_copy(&self, key: &DocumentKey) {
        let delay = self.state.lock().unwrap().copy_delays.get(key.as_str()).copied();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait]
impl VersionedStore for MemoryStore {
    async fn probe(&self, _prefix: &str) -> Result<(), StoreError> {
        match self.state.lock().unwrap().probe_failure.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn list_version_page(
        &self,
        key: &DocumentKey,
        cursor: Option<&PageCursor>,
    ) -> Result<VersionPage, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure(Op::List, key.as_str()) {
            return Err(err);
        }

        // Same ordering as S3: keys ascending, versions newest first within a key.
        let listing: Vec<ObjectVersion> = state
            .objects
            .range(key.as_str().to_string()..)
            .take_while(|(k, _)| k.starts_with(key.as_str()))
            .flat_map(|(k, versions)| versions.iter().rev().map(move |v| v.to_listing(k)))
            .collect();

        let start = match cursor {
            None => 0,
            Some(c) => listing
                .iter()
                .position(|v| {
                    v.key.as_str() == c.key_marker
                        && Some(v.version_id.as_str()) == c.version_id_marker.as_deref()
                })
                .map_or(listing.len(), |i| i + 1),
        };

        let versions: Vec<ObjectVersion> =
            listing.iter().skip(start).take(self.page_size).cloned().collect();
        let next = if start + versions.len() < listing.len() {
            versions.last().map(|last| PageCursor {
                key_marker: last.key.as_str().to_string(),
                version_id_marker: Some(last.version_id.clone()),
            })
        } else {
            None
        };

        if next.is_none() {
            if let Some(expired) = state.expire_after_listing.remove(key.as_str()) {
                if let Some(stored) = state.objects.get_mut(key.as_str()) {
                    stored.retain(|v| v.version_id != expired);
                }
            }
        }

        Ok(VersionPage { versions, next })
    }

    async fn head_version(
        &self,
        key: &DocumentKey,
        version_id: Option<&str>,
    ) -> Result<Option<VersionHead>, StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure(Op::Head, key.as_str()) {
            return Err(err);
        }
        let Some(versions) = state.objects.get(key.as_str()) else {
            return Ok(None);
        };
        let found = match version_id {
            None => versions.last(),
            Some(id) => versions.iter().find(|v| v.version_id == id),
        };
        Ok(found.map(|v| VersionHead {
            version_id: Some(v.version_id.clone()),
            size_bytes: v.content.len() as u64,
            e_tag: Some(v.e_tag()),
        }))
    }

    async fn copy_version(
        &self,
        key: &DocumentKey,
        version_id: &str,
        if_match: Option<&str>,
    ) -> Result<String, StoreError> {
        self.pause_before_copy(key).await;
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.take_failure(Op::Copy, key.as_str()) {
            return Err(err);
        }
        let source = state
            .objects
            .get(key.as_str())
            .and_then(|versions| versions.iter().find(|v| v.version_id == version_id))
            .cloned()
            .ok_or_else(|| StoreError::NoSuchVersion(format!("{}?versionId={}", key, version_id)))?;

        if let Some(expected) = if_match {
            if source.e_tag() != expected {
                return Err(StoreError::PreconditionFailed(format!(
                    "etag of {} is {}, expected {}",
                    version_id,
                    source.e_tag(),
                    expected
                )));
            }
        }

        let new_version = state.write(key.as_str(), source.content);
        state.copies += 1;
        state.copy_log.push(key.as_str().to_string());

        if let Some(content) = state.write_after_copy.remove(key.as_str()) {
            state.write(key.as_str(), content);
        }
        if let Some(err) = state.fail_listing_after_copy.remove(key.as_str()) {
            state
                .failures
                .entry((Op::List, key.as_str().to_string()))
                .or_default()
                .push_back(err);
        }
        if state.lose_copy_response.remove(key.as_str()) {
            return Err(StoreError::Transient(format!("response to copy of {} lost", key)));
        }

        Ok(new_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> DocumentKey {
        DocumentKey::from_store(raw)
    }

    #[tokio::test]
    async fn test_listing_pages_and_orders_like_s3() {
        let store = MemoryStore::with_page_size(2);
        let k = key("staging/cris-cr3-files/1.pdf");
        let v1 = store.put_sized(&k, 10, b'a');
        let v2 = store.put_sized(&k, 20, b'b');
        let v3 = store.put_sized(&k, 30, b'c');

        let first = store.list_version_page(&k, None).await.unwrap();
        let ids: Vec<_> = first.versions.iter().map(|v| v.version_id.clone()).collect();
        assert_eq!(ids, vec![v3, v2]);

        let second = store
            .list_version_page(&k, first.next.as_ref())
            .await
            .unwrap();
        assert_eq!(second.versions.len(), 1);
        assert_eq!(second.versions[0].version_id, v1);
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn test_copy_checks_etag() {
        let store = MemoryStore::new();
        let k = key("staging/cris-cr3-files/2.pdf");
        let v1 = store.put_sized(&k, 10, b'a');

        let err = store.copy_version(&k, &v1, Some("\"nope\"")).await.unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));
        assert_eq!(store.version_count(&k), 1);

        let err = store.copy_version(&k, "v999", None).await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchVersion(_)));
    }
}
