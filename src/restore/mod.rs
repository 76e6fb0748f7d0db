pub(crate) mod executor;
pub(crate) mod key;
pub(crate) mod logic;
pub(crate) mod report;
pub(crate) mod versions;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::metadata::{GraphqlMetadataClient, MetadataSource};
use crate::storage::VersionedStore;
use crate::storage::s3::S3Store;
use key::Environment;
use logic::{BatchOrchestrator, BatchSettings};
use report::BatchReport;

/// A validated request to restore the CR3 files of `crashes`.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub environment: Environment,
    pub crashes: Vec<Value>,
    pub dry_run: bool,
}

/// Public entry point for the restore process.
///
/// Setup failures (store unreachable, bad metadata client) are returned as errors
/// before any crash is touched. Per-crash failures end up in the report instead.
pub async fn run_restore_flow(app_config: &AppConfig, request: &RestoreRequest) -> Result<BatchReport> {
    let store: Arc<dyn VersionedStore> = Arc::new(S3Store::connect(&app_config.s3_storage).await);

    let metadata: Option<Arc<dyn MetadataSource>> = match &app_config.metadata_api {
        Some(api) => Some(Arc::new(
            GraphqlMetadataClient::new(api, app_config.restore_options.retry)
                .context("Failed to set up the crash metadata client")?,
        )),
        None => {
            println!("⚠️ No metadata API configured; CR3 metadata diagnostics are disabled.");
            None
        }
    };

    run_batch(store, metadata, app_config, request).await
}

/// Probes the store, then runs the batch. Split out so tests can inject fakes.
pub async fn run_batch(
    store: Arc<dyn VersionedStore>,
    metadata: Option<Arc<dyn MetadataSource>>,
    app_config: &AppConfig,
    request: &RestoreRequest,
) -> Result<BatchReport> {
    let prefix = request.environment.prefix();
    store.probe(&prefix).await.with_context(|| {
        format!(
            "Unable to reach bucket {} under {}; check S3 credentials",
            app_config.s3_storage.bucket_name, prefix
        )
    })?;
    println!(
        "✓ Bucket {} is reachable under {}",
        app_config.s3_storage.bucket_name, prefix
    );

    let options = &app_config.restore_options;
    let settings = BatchSettings {
        environment: request.environment,
        threshold_bytes: options.threshold_bytes,
        concurrency: options.concurrency,
        dry_run: request.dry_run,
        retry: options.retry,
    };

    let started_at = Utc::now();
    let orchestrator = BatchOrchestrator::new(store, metadata, settings);
    let outcomes = orchestrator.run(&request.crashes).await;

    Ok(BatchReport::new(
        request.environment,
        options.threshold_bytes,
        request.dry_run,
        started_at,
        outcomes,
    ))
}
