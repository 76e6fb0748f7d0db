// cr3restore/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::restore::versions::DEFAULT_THRESHOLD_BYTES;
use crate::utils::retry::RetryPolicy;

pub const DEFAULT_BUCKET: &str = "atd-vision-zero-editor";
pub const DEFAULT_REGION: &str = "us-east-1";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonMetadataApiConfig {
    pub endpoint: Option<String>,
    pub admin_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRestoreOptions {
    pub threshold_bytes: Option<u64>,
    pub concurrency: Option<usize>,
    pub max_attempts: Option<usize>,
    pub retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub s3_storage: Option<JsonS3StorageConfig>,
    pub metadata_api: Option<JsonMetadataApiConfig>,
    pub restore_options: Option<JsonRestoreOptions>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct S3StorageConfig {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

#[derive(Debug, Clone)]
pub struct MetadataApiConfig {
    pub endpoint: Url,
    pub admin_secret: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreOptions {
    pub threshold_bytes: u64,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            threshold_bytes: DEFAULT_THRESHOLD_BYTES,
            concurrency: 1,
            retry: RetryPolicy::default(),
        }
    }
}

impl RestoreOptions {
    /// Applies command-line overrides, which win over the config file.
    pub fn apply_overrides(&mut self, threshold_bytes: Option<u64>, concurrency: Option<usize>) -> Result<()> {
        if let Some(threshold) = threshold_bytes {
            self.threshold_bytes = threshold;
        }
        if let Some(concurrency) = concurrency {
            if concurrency == 0 {
                anyhow::bail!("--concurrency must be at least 1");
            }
            self.concurrency = concurrency;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub s3_storage: S3StorageConfig,
    pub metadata_api: Option<MetadataApiConfig>,
    pub restore_options: RestoreOptions,
}

impl AppConfig {
    /// Loads `config_path` if it exists, filling missing values from the environment.
    ///
    /// A missing file is only an error when `required` is set (the path was given explicitly).
    pub fn load(config_path: &Path, required: bool) -> Result<Self> {
        let raw_json_config = if config_path.exists() {
            let config_content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
            serde_json::from_str::<RawJsonConfig>(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else if required {
            anyhow::bail!("Config file {} does not exist", config_path.display());
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using environment only");
            RawJsonConfig::default()
        };

        Self::from_raw(raw_json_config, |name| env::var(name).ok())
    }

    /// Resolves the raw file contents against `lookup_env` (variable name to value).
    pub fn from_raw(raw: RawJsonConfig, lookup_env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |value: Option<String>| value.filter(|s| !s.trim().is_empty());
        let from_env = |name: &str| non_empty(lookup_env(name));

        let s3_raw = raw.s3_storage.unwrap_or_default();
        let access_key_id = non_empty(s3_raw.access_key_id)
            .or_else(|| from_env("AWS_ACCESS_KEY_ID"))
            .context("S3 access key missing: set s3_storage.access_key_id in config.json or AWS_ACCESS_KEY_ID")?;
        let secret_access_key = non_empty(s3_raw.secret_access_key)
            .or_else(|| from_env("AWS_SECRET_ACCESS_KEY"))
            .context("S3 secret key missing: set s3_storage.secret_access_key in config.json or AWS_SECRET_ACCESS_KEY")?;
        let endpoint_url = non_empty(s3_raw.endpoint_url).or_else(|| from_env("AWS_ENDPOINT_URL"));
        if let Some(endpoint) = &endpoint_url {
            Url::parse(endpoint).with_context(|| format!("Invalid S3 endpoint_url: {}", endpoint))?;
        }

        let s3_storage = S3StorageConfig {
            bucket_name: non_empty(s3_raw.bucket_name).unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            region: non_empty(s3_raw.region)
                .or_else(|| from_env("AWS_REGION"))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key_id,
            secret_access_key,
            endpoint_url,
            force_path_style: s3_raw.force_path_style.unwrap_or(false),
        };

        let metadata_raw = raw.metadata_api.unwrap_or_default();
        let metadata_endpoint = non_empty(metadata_raw.endpoint).or_else(|| from_env("HASURA_ENDPOINT"));
        let metadata_secret = non_empty(metadata_raw.admin_secret).or_else(|| from_env("HASURA_ADMIN_KEY"));
        let metadata_api = match (metadata_endpoint, metadata_secret) {
            (Some(endpoint), Some(admin_secret)) => {
                let endpoint = Url::parse(&endpoint)
                    .with_context(|| format!("Invalid metadata endpoint: {}", endpoint))?;
                if !matches!(endpoint.scheme(), "http" | "https") {
                    anyhow::bail!("Metadata endpoint must be http(s), got {}", endpoint);
                }
                Some(MetadataApiConfig { endpoint, admin_secret })
            }
            (Some(_), None) => anyhow::bail!(
                "Metadata endpoint is set but the admin secret is missing: set metadata_api.admin_secret or HASURA_ADMIN_KEY"
            ),
            (None, Some(_)) => anyhow::bail!(
                "Metadata admin secret is set but the endpoint is missing: set metadata_api.endpoint or HASURA_ENDPOINT"
            ),
            (None, None) => None,
        };

        let options_raw = raw.restore_options.unwrap_or_default();
        let defaults = RestoreOptions::default();
        let concurrency = options_raw.concurrency.unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            anyhow::bail!("restore_options.concurrency must be at least 1");
        }
        let max_attempts = options_raw.max_attempts.unwrap_or(defaults.retry.max_attempts());
        if max_attempts == 0 {
            anyhow::bail!("restore_options.max_attempts must be at least 1");
        }
        let restore_options = RestoreOptions {
            threshold_bytes: options_raw.threshold_bytes.unwrap_or(defaults.threshold_bytes),
            concurrency,
            retry: RetryPolicy::new(
                max_attempts,
                Duration::from_millis(options_raw.retry_base_delay_ms.unwrap_or(200)),
            ),
        };

        Ok(AppConfig {
            s3_storage,
            metadata_api,
            restore_options,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CrashFile {
    crashes: Vec<Value>,
}

/// Reads `{"crashes": [id0, id1, ...]}`. Entries are validated one by one later,
/// so a single malformed id does not reject the whole file.
pub fn load_crash_list(path: &Path) -> Result<Vec<Value>> {
    if !path.is_file() {
        anyhow::bail!("Crashes file {} is not available on disk", path.display());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read crashes file at {}", path.display()))?;
    let crash_file: CrashFile = serde_json::from_str(&content).with_context(|| {
        format!(
            "Crashes file {} is invalid; expected {{\"crashes\": [crash_id, ...]}}",
            path.display()
        )
    })?;
    Ok(crash_file.crashes)
}
