// cr3restore/src/restore/logic.rs
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use super::executor;
use super::key::{CrashId, DocumentKey, Environment};
use super::report::{MetadataStatus, RestoreAction, RestoreOutcome};
use super::versions::{list_versions, select};
use crate::errors::RestoreError;
use crate::metadata::MetadataSource;
use crate::storage::VersionedStore;
use crate::utils::retry::RetryPolicy;

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub environment: Environment,
    pub threshold_bytes: u64,
    /// Maximum number of crashes in flight at once; 1 processes strictly in order.
    pub concurrency: usize,
    pub dry_run: bool,
    pub retry: RetryPolicy,
}

/// Hands out one async lock per key so duplicate identifiers never restore concurrently.
#[derive(Default)]
struct KeyLocks {
    locks: Mutex<HashMap<DocumentKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &DocumentKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Drives enumerate, select and restore over a batch of crash identifiers.
///
/// Every identifier yields exactly one `RestoreOutcome`, in input order, no
/// matter how other identifiers fare.
pub struct BatchOrchestrator {
    store: Arc<dyn VersionedStore>,
    metadata: Option<Arc<dyn MetadataSource>>,
    settings: BatchSettings,
    key_locks: KeyLocks,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn VersionedStore>,
        metadata: Option<Arc<dyn MetadataSource>>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            store,
            metadata,
            settings,
            key_locks: KeyLocks::default(),
        }
    }

    pub async fn run(&self, identifiers: &[Value]) -> Vec<RestoreOutcome> {
        let mut indexed: Vec<(usize, RestoreOutcome)> = stream::iter(identifiers.iter().enumerate())
            .map(|(index, raw)| async move { (index, self.process_item(raw).await) })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn process_item(&self, raw: &Value) -> RestoreOutcome {
        let crash_id = match CrashId::parse(raw) {
            Ok(id) => id,
            Err(err) => {
                warn!(crash = %raw, "Skipping malformed identifier: {}", err);
                return RestoreOutcome::failed(raw.clone(), None, None, &err, MetadataStatus::NotQueried);
            }
        };
        let key = DocumentKey::derive(self.settings.environment, crash_id);
        let _key_guard = self.key_locks.acquire(&key).await;
        info!(crash_id = %crash_id, key = %key, "Processing crash");

        let store = self.store.as_ref();
        let retry = &self.settings.retry;

        let versions = match list_versions(store, retry, &key).await {
            Ok(versions) => versions,
            Err(err) => {
                warn!(crash_id = %crash_id, "Listing versions failed: {}", err);
                return RestoreOutcome::failed(raw.clone(), Some(key), None, &err, MetadataStatus::NotQueried);
            }
        };

        let metadata = self.lookup_metadata(crash_id).await;
        let decision = select(&key, &versions, self.settings.threshold_bytes);

        if decision.selected.is_none() {
            info!(crash_id = %crash_id, versions = versions.len(), "No valid previous version found");
            return RestoreOutcome::decided(raw.clone(), decision, RestoreAction::SkippedNotFound, None, metadata);
        }
        if self.settings.dry_run {
            return RestoreOutcome::decided(raw.clone(), decision, RestoreAction::WouldRestore, None, metadata);
        }

        match executor::restore(store, retry, &decision).await {
            Ok(promotion) => {
                info!(
                    crash_id = %crash_id,
                    source = %promotion.source_version_id,
                    new_version = %promotion.new_version_id,
                    replaced = ?promotion.replaced_version_id,
                    "Restored"
                );
                let action = match &promotion.unverified {
                    None => RestoreAction::Restored,
                    Some(_) => RestoreAction::RestoredUnverified,
                };
                let mut outcome = RestoreOutcome::decided(
                    raw.clone(),
                    decision,
                    action,
                    Some(promotion.new_version_id),
                    metadata,
                );
                outcome.error = promotion.unverified.as_ref().map(Into::into);
                outcome
            }
            Err(err) => {
                warn!(crash_id = %crash_id, "Restore failed: {}", err);
                RestoreOutcome::failed(raw.clone(), Some(key), Some(decision), &err, metadata)
            }
        }
    }

    async fn lookup_metadata(&self, crash_id: CrashId) -> MetadataStatus {
        let Some(source) = &self.metadata else {
            return MetadataStatus::NotQueried;
        };
        match source.fetch_metadata(crash_id).await {
            Ok(Some(metadata)) => MetadataStatus::Found(metadata),
            Ok(None) => MetadataStatus::Empty,
            Err(err) => {
                let err = RestoreError::from(err);
                warn!(crash_id = %crash_id, "{}", err);
                MetadataStatus::Unavailable((&err).into())
            }
        }
    }
}
