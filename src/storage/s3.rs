// cr3restore/src/storage/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use chrono::{DateTime, Utc};
use s3::config::Region;
use tracing::{debug, info, warn};

use super::{ObjectVersion, PageCursor, VersionHead, VersionPage, VersionedStore};
use crate::config::S3StorageConfig;
use crate::errors::StoreError;
use crate::restore::key::DocumentKey;

/// `VersionedStore` backed by an S3 (or S3-compatible) bucket with versioning enabled.
pub struct S3Store {
    client: s3::Client,
    bucket: String,
}

impl S3Store {
    pub async fn connect(storage: &S3StorageConfig) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(storage.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &storage.access_key_id,
                &storage.secret_access_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        if let Some(endpoint) = &storage.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(storage.force_path_style)
            .build();

        info!(
            bucket = %storage.bucket_name,
            region = %storage.region,
            endpoint = ?storage.endpoint_url,
            "S3 client configured"
        );

        Self {
            client: s3::Client::from_conf(s3_config),
            bucket: storage.bucket_name.clone(),
        }
    }

    fn copy_source(&self, key: &DocumentKey, version_id: &str) -> String {
        let encoded_key = key
            .as_str()
            .split('/')
            .map(|segment| url::form_urlencoded::byte_serialize(segment.as_bytes()).collect::<String>())
            .collect::<Vec<_>>()
            .join("/");
        let encoded_version: String =
            url::form_urlencoded::byte_serialize(version_id.as_bytes()).collect();
        format!("{}/{}?versionId={}", self.bucket, encoded_key, encoded_version)
    }
}

#[async_trait]
impl VersionedStore for S3Store {
    async fn probe(&self, prefix: &str) -> Result<(), StoreError> {
        debug!(bucket = %self.bucket, prefix, "Probing bucket");
        self.client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| classify_sdk_error("list_objects_v2", e))?;
        Ok(())
    }

    async fn list_version_page(
        &self,
        key: &DocumentKey,
        cursor: Option<&PageCursor>,
    ) -> Result<VersionPage, StoreError> {
        let output = self
            .client
            .list_object_versions()
            .bucket(&self.bucket)
            .prefix(key.as_str())
            .set_key_marker(cursor.map(|c| c.key_marker.clone()))
            .set_version_id_marker(cursor.and_then(|c| c.version_id_marker.clone()))
            .send()
            .await
            .map_err(|e| classify_sdk_error("list_object_versions", e))?;

        let versions = output
            .versions()
            .iter()
            .filter_map(|v| {
                let (Some(raw_key), Some(version_id)) = (v.key(), v.version_id()) else {
                    warn!(key = %key, "Skipping listed version without key or version id");
                    return None;
                };
                let last_modified = v
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                Some(ObjectVersion {
                    key: DocumentKey::from_store(raw_key),
                    version_id: version_id.to_string(),
                    size_bytes: v.size().unwrap_or(0).max(0) as u64,
                    last_modified,
                    e_tag: v.e_tag().map(str::to_string),
                })
            })
            .collect();

        let next = if output.is_truncated().unwrap_or(false) {
            output.next_key_marker().map(|marker| PageCursor {
                key_marker: marker.to_string(),
                version_id_marker: output.next_version_id_marker().map(str::to_string),
            })
        } else {
            None
        };

        Ok(VersionPage { versions, next })
    }

    async fn head_version(
        &self,
        key: &DocumentKey,
        version_id: Option<&str>,
    ) -> Result<Option<VersionHead>, StoreError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(VersionHead {
                version_id: output.version_id().map(str::to_string),
                size_bytes: output.content_length().unwrap_or(0).max(0) as u64,
                e_tag: output.e_tag().map(str::to_string),
            })),
            Err(err) => match classify_sdk_error("head_object", err) {
                StoreError::NoSuchVersion(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn copy_version(
        &self,
        key: &DocumentKey,
        version_id: &str,
        if_match: Option<&str>,
    ) -> Result<String, StoreError> {
        let output = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .copy_source(self.copy_source(key, version_id))
            .set_copy_source_if_match(if_match.map(str::to_string))
            .send()
            .await
            .map_err(|e| classify_sdk_error("copy_object", e))?;

        output.version_id().map(str::to_string).ok_or_else(|| {
            StoreError::Other(format!(
                "copy_object on s3://{}/{} returned no version id; is bucket versioning enabled?",
                self.bucket, key
            ))
        })
    }
}

/// Maps an SDK failure onto the store error taxonomy used for retries and reporting.
fn classify_sdk_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = format!("{}: {}", operation, DisplayErrorContext(&err));

    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            return StoreError::Transient(message);
        }
        SdkError::ConstructionFailure(_) => return StoreError::Other(message),
        _ => {}
    }

    let status = err.raw_response().map(|r| r.status().as_u16());
    classify_service_failure(err.code(), status, message)
}

fn classify_service_failure(code: Option<&str>, status: Option<u16>, message: String) -> StoreError {
    // Error codes are more specific than statuses: NoSuchBucket is a 404 too.
    match code {
        Some("NoSuchVersion" | "NoSuchKey" | "NotFound") => return StoreError::NoSuchVersion(message),
        Some("PreconditionFailed") => return StoreError::PreconditionFailed(message),
        Some(
            "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken"
            | "NoSuchBucket",
        ) => return StoreError::AccessDenied(message),
        Some("SlowDown" | "InternalError" | "ServiceUnavailable" | "RequestTimeout") => {
            return StoreError::Transient(message);
        }
        _ => {}
    }
    match status {
        Some(404 | 405) => StoreError::NoSuchVersion(message),
        Some(412) => StoreError::PreconditionFailed(message),
        Some(401 | 403) => StoreError::AccessDenied(message),
        Some(429 | 500..=599) => StoreError::Transient(message),
        _ => StoreError::Other(message),
    }
}
