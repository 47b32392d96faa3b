//! UploadThing client implementation.

use std::collections::BTreeMap;
use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::descriptor::FileDescriptor;
use crate::error::{StorageError, StorageResult};
use crate::retry::{RetryPolicy, RetryState};

/// Default UploadThing API origin.
pub const DEFAULT_API_URL: &str = "https://api.uploadthing.com";

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-uploadthing-api-key";

const PRESIGN_ROUTE: &str = "v6/uploadFiles";

/// Configuration for the UploadThing client.
#[derive(Clone)]
pub struct UploadThingConfig {
    /// API key; checked when an upload starts, not at construction
    pub api_key: Option<String>,
    /// API origin (overridable for testing)
    pub api_url: Url,
}

impl std::fmt::Debug for UploadThingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadThingConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url.as_str())
            .finish()
    }
}

impl UploadThingConfig {
    /// Create config from environment variables.
    ///
    /// A missing `UPLOADTHING_API_KEY` is not an error here; uploads fail
    /// with [`StorageError::ConfigError`] instead.
    pub fn from_env() -> StorageResult<Self> {
        let api_key = std::env::var("UPLOADTHING_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        let api_url = std::env::var("UPLOADTHING_API_URL")
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        Self::new(api_key, &api_url)
    }

    pub fn new(api_key: Option<String>, api_url: &str) -> StorageResult<Self> {
        // Trailing slash so that route joins append instead of replacing
        let normalized = if api_url.ends_with('/') {
            api_url.to_string()
        } else {
            format!("{}/", api_url)
        };
        let api_url = Url::parse(&normalized).map_err(|e| {
            StorageError::config_error(format!("invalid UploadThing API URL {}: {}", api_url, e))
        })?;

        Ok(Self { api_key, api_url })
    }
}

/// Presign request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PresignRequest<'a> {
    content_disposition: &'static str,
    acl: &'static str,
    files: &'a [FileDescriptor],
}

/// Presign response body.
#[derive(Debug, Deserialize)]
struct PresignResponse {
    #[serde(default)]
    data: Vec<PresignedFile>,
}

/// Single-use upload target returned by the presign endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedFile {
    /// Direct upload URL
    pub url: String,
    /// Form fields that must accompany the upload
    #[serde(default, deserialize_with = "deserialize_fields")]
    pub fields: BTreeMap<String, String>,
    /// Public URL the file is served from once uploaded
    pub file_url: String,
    #[serde(default)]
    pub key: Option<String>,
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadResult {
    /// Public URL of the uploaded file
    pub public_url: String,
    /// Generated name the file was uploaded under
    pub file_name: String,
    /// Storage key, when the provider returns one
    pub file_key: Option<String>,
    /// Number of attempts made, including the successful one
    pub attempts: u32,
}

impl UploadResult {
    /// Retries performed before the upload succeeded.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// UploadThing storage client.
#[derive(Clone)]
pub struct UploadThingClient {
    client: Client,
    api_key: Option<String>,
    presign_url: Url,
}

impl UploadThingClient {
    /// Create a new client from configuration.
    pub fn new(config: UploadThingConfig) -> StorageResult<Self> {
        Self::with_http_client(config, Client::new())
    }

    /// Create a client that reuses an existing HTTP client.
    pub fn with_http_client(config: UploadThingConfig, client: Client) -> StorageResult<Self> {
        let presign_url = config.api_url.join(PRESIGN_ROUTE).map_err(|e| {
            StorageError::config_error(format!("invalid presign URL: {}", e))
        })?;

        Ok(Self {
            client,
            api_key: config.api_key,
            presign_url,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(UploadThingConfig::from_env()?)
    }

    /// Whether an API key is configured.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    /// Upload a local file, retrying failed attempts with exponential backoff.
    ///
    /// Each attempt generates a new file name, re-reads the whole file and
    /// performs the presign and upload requests from scratch. A missing API
    /// key fails immediately without touching the network. When every
    /// attempt fails, the error of the last attempt is returned.
    pub async fn upload_with_retry(
        &self,
        path: impl AsRef<Path>,
        policy: &RetryPolicy,
    ) -> StorageResult<UploadResult> {
        let path = path.as_ref();
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            StorageError::config_error("UPLOADTHING_API_KEY environment variable not set")
        })?;

        let mut state = RetryState::new();

        while state.can_attempt(policy) {
            if state.attempt > 0 {
                let delay = policy.delay_for_attempt(state.attempt);
                info!(
                    "Retry attempt {}/{} after {:.1}s delay",
                    state.attempt,
                    policy.max_retries,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt_upload(path, api_key).await {
                Ok(mut result) => {
                    result.attempts = state.attempt.saturating_add(1);
                    info!("File uploaded successfully: {}", result.public_url);
                    return Ok(result);
                }
                Err(e) => {
                    warn!("Upload attempt {} failed: {}", state.attempt.saturating_add(1), e);
                    state.record_failure(e);
                }
            }
        }

        Err(state.into_error())
    }

    /// One presign + upload round trip.
    async fn attempt_upload(&self, path: &Path, api_key: &str) -> StorageResult<UploadResult> {
        let descriptor = FileDescriptor::for_path(path).await?;
        let content = tokio::fs::read(path).await?;

        debug!(
            "Uploading {} as {} ({} bytes)",
            path.display(),
            descriptor.generated_name,
            descriptor.size_bytes
        );

        let presigned = self.presign(api_key, &descriptor).await?;
        self.upload_to_presigned(&presigned, &descriptor, content).await?;

        Ok(UploadResult {
            public_url: presigned.file_url,
            file_name: descriptor.generated_name,
            file_key: presigned.key,
            attempts: 1,
        })
    }

    /// Request a presigned upload target for one file.
    async fn presign(
        &self,
        api_key: &str,
        descriptor: &FileDescriptor,
    ) -> StorageResult<PresignedFile> {
        let body = PresignRequest {
            content_disposition: "inline",
            acl: "public-read",
            files: std::slice::from_ref(descriptor),
        };

        let response = self
            .client
            .post(self.presign_url.clone())
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError::presign_failed(e.to_string()))?;

        let response = check_status(response)
            .await
            .map_err(StorageError::presign_failed)?;

        let parsed: PresignResponse = response
            .json()
            .await
            .map_err(|e| StorageError::invalid_response(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::invalid_response("presign response contained no files"))
    }

    /// Submit the file and its form fields to the presigned URL.
    async fn upload_to_presigned(
        &self,
        presigned: &PresignedFile,
        descriptor: &FileDescriptor,
        content: Vec<u8>,
    ) -> StorageResult<()> {
        let mut form = Form::new();
        for (name, value) in &presigned.fields {
            form = form.text(name.clone(), value.clone());
        }

        let mut part = Part::bytes(content).file_name(descriptor.generated_name.clone());
        if let Some(mime) = &descriptor.mime_type {
            part = part.mime_str(mime)?;
        }
        // The file must be the last part of the form
        form = form.part("file", part);

        let response = self
            .client
            .post(&presigned.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        check_status(response)
            .await
            .map_err(StorageError::upload_failed)?;

        Ok(())
    }
}

/// Turn a non-success response into a message with status and body.
async fn check_status(response: Response) -> Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        Err(format!("HTTP {}", status))
    } else {
        Err(format!("HTTP {}: {}", status, body))
    }
}

/// Accept string, number and boolean field values, stringifying non-strings.
fn deserialize_fields<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k, s)),
            serde_json::Value::Null => None,
            other => Some((k, other.to_string())),
        })
        .collect())
}
