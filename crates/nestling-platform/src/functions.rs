//! Invocation of the hosted edge functions.

use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::debug;

use nestling_schema::{InviteResponse, TranscribeResponse};

#[derive(Serialize)]
struct TranscribeRequest<'a> {
    #[serde(rename = "audioUrl")]
    audio_url: &'a str,
    #[serde(rename = "fileId")]
    file_id: &'a str,
    duration: f64,
}

#[derive(Serialize)]
struct InviteRequest<'a> {
    email: &'a str,
    role: &'a str,
}

/// Client for `{base}/functions/v1`. The functions run with the caller's
/// token, so all tenant scoping happens server-side.
#[derive(Clone)]
pub struct FunctionsClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl FunctionsClient {
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

    fn endpoint(&self, name: &str) -> String {
        format!("{}/functions/v1/{name}", self.base_url)
    }

    async fn invoke<T, B>(&self, access_token: &str, name: &str, body: &B) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        B: Serialize,
    {
        debug!(function = name, "invoking edge function");
        let resp = self
            .http
            .post(self.endpoint(name))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await?;
        // Functions report failures inside the body; only transport-level
        // trouble surfaces as a non-2xx without a parseable payload.
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str(&text) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => {
                Err(anyhow!("Function {name} failed ({status}): {text}"))
            }
            Err(e) => Err(anyhow!("Function {name} returned malformed body: {e}")),
        }
    }

    /// Transcribe an uploaded recording and extract its events.
    pub async fn transcribe_audio(
        &self,
        access_token: &str,
        audio_url: &str,
        file_id: &str,
        duration_secs: f64,
    ) -> Result<TranscribeResponse> {
        self.invoke(
            access_token,
            "transcribe-audio",
            &TranscribeRequest {
                audio_url,
                file_id,
                duration: duration_secs,
            },
        )
        .await
    }

    /// Invite another caregiver into the caller's tenant.
    pub async fn invite_partner(
        &self,
        access_token: &str,
        email: &str,
        role: &str,
    ) -> Result<InviteResponse> {
        self.invoke(access_token, "invite-partner", &InviteRequest { email, role })
            .await
    }
}
