// cr3restore/src/metadata/mod.rs
//! Best-effort lookup of the CR3 file metadata already recorded for a crash.
//!
//! The lookup is diagnostic only. It never gates a restore decision and its
//! failure never fails an item.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::MetadataApiConfig;
use crate::errors::MetadataError;
use crate::restore::key::CrashId;
use crate::utils::retry::RetryPolicy;

const CR3_METADATA_QUERY: &str = r#"
query get_cr3_metadata($crashId: Int) {
    atd_txdot_crashes(where: {crash_id: {_eq: $crashId}}) {
        cr3_file_metadata
    }
}
"#;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// `Ok(None)` means the lookup worked but nothing is recorded for this crash.
    async fn fetch_metadata(&self, crash_id: CrashId) -> Result<Option<Value>, MetadataError>;
}

/// Queries the crash database's GraphQL endpoint.
pub struct GraphqlMetadataClient {
    http: reqwest::Client,
    endpoint: Url,
    admin_secret: String,
    retry: RetryPolicy,
}

impl GraphqlMetadataClient {
    pub fn new(config: &MetadataApiConfig, retry: RetryPolicy) -> Result<Self, MetadataError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MetadataError::Rejected(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            admin_secret: config.admin_secret.clone(),
            retry,
        })
    }

    async fn post_query(&self, body: &Value) -> Result<GraphqlResponse, MetadataError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header("X-Hasura-Admin-Secret", &self.admin_secret)
            .json(body)
            .send()
            .await
            .map_err(|e| MetadataError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(MetadataError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(MetadataError::Rejected(format!("HTTP {}", status)));
        }

        response
            .json::<GraphqlResponse>()
            .await
            .map_err(|e| MetadataError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl MetadataSource for GraphqlMetadataClient {
    async fn fetch_metadata(&self, crash_id: CrashId) -> Result<Option<Value>, MetadataError> {
        let body = json!({
            "query": CR3_METADATA_QUERY,
            "variables": { "crashId": crash_id.get() },
        });
        let body = &body;

        let response = self
            .retry
            .run("get_cr3_metadata", || self.post_query(body))
            .await?;
        debug!(crash_id = %crash_id, "Fetched CR3 metadata");
        extract_cr3_metadata(response)
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorEntry {
    message: String,
}

fn extract_cr3_metadata(response: GraphqlResponse) -> Result<Option<Value>, MetadataError> {
    if !response.errors.is_empty() {
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(MetadataError::Rejected(messages.join("; ")));
    }

    let crashes = response
        .data
        .as_ref()
        .and_then(|data| data.get("atd_txdot_crashes"))
        .and_then(Value::as_array)
        .ok_or_else(|| MetadataError::Malformed("missing atd_txdot_crashes".to_string()))?;

    Ok(crashes
        .first()
        .and_then(|crash| crash.get("cr3_file_metadata"))
        .filter(|metadata| !metadata.is_null())
        .cloned())
}
