//! Object storage client for recorded audio.

use anyhow::{anyhow, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Signed URLs are short-lived; the transcription function downloads the
/// clip immediately, so sixty seconds is plenty.
pub const SIGNED_URL_TTL_SECS: u64 = 60;

/// Result of an upload: the object path inside the bucket plus the storage
/// id the backend assigned.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub path: String,
    pub id: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "Id", alias = "id", default)]
    id: Option<String>,
    #[serde(rename = "Key", alias = "key", default)]
    key: Option<String>,
}

#[derive(Serialize)]
struct SignRequest {
    #[serde(rename = "expiresIn")]
    expires_in: u64,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

#[derive(Clone)]
pub struct StorageClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl StorageClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
        }
    }

    /// Upload raw bytes to `{bucket}/{path}`.
    pub async fn upload(
        &self,
        access_token: &str,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<StoredObject> {
        let url = format!("{}/storage/v1/object/{bucket}/{path}", self.base_url);
        debug!(bucket, path, len = bytes.len(), "uploading recording");
        let resp = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Audio upload failed ({status}): {body}"));
        }
        let parsed: UploadResponse = resp.json().await.unwrap_or(UploadResponse {
            id: None,
            key: None,
        });
        Ok(StoredObject {
            path: parsed
                .key
                .map(|k| k.trim_start_matches(&format!("{bucket}/")).to_string())
                .unwrap_or_else(|| path.to_string()),
            id: parsed.id.unwrap_or_else(|| path.to_string()),
        })
    }

    /// Mint a time-limited download URL for an uploaded object. The backend
    /// returns a relative path, which is joined onto the storage base here.
    pub async fn signed_url(&self, access_token: &str, bucket: &str, path: &str) -> Result<String> {
        let url = format!("{}/storage/v1/object/sign/{bucket}/{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .json(&SignRequest {
                expires_in: SIGNED_URL_TTL_SECS,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Audio upload signing failed ({status}): {body}"
            ));
        }
        let parsed: SignResponse = resp.json().await?;
        let relative = parsed.signed_url.trim_start_matches('/');
        Ok(format!("{}/storage/v1/{relative}", self.base_url))
    }
}
