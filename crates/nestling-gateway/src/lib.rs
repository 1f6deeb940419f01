//! Capture orchestration: turns one audio clip into persisted, displayed
//! timeline events, and serves the authoritative timeline back.
//!
//! Everything network-facing goes through [`nestling_platform`]; everything
//! display-facing comes out as [`TimelineEvent`]s merged into the local
//! cache, so the timeline stays readable while offline.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use nestling_core::{to_timeline_event, AudioClip, CaptureOutcome, ProcessPipeline};
use nestling_memory::TimelineCache;
use nestling_platform::Platform;
use nestling_schema::{Baby, Invitation, InviteResponse, Session, TimelineEvent};

/// Stage of the capture flow a failure is attributed to. Derived from error
/// text because the transcription function reports its stage as a free-form
/// string and local stages only exist as error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStep {
    Authentication,
    TenantLookup,
    AudioUpload,
    Transcription,
    EventSave,
    Unknown,
}

impl FailedStep {
    /// Substring classification, first match wins.
    pub fn classify(message: &str) -> Self {
        if message.contains("Authentication") {
            Self::Authentication
        } else if message.contains("Tenant") {
            Self::TenantLookup
        } else if message.contains("upload") {
            Self::AudioUpload
        } else if message.contains("Transcription") {
            Self::Transcription
        } else if message.contains("Event save") {
            Self::EventSave
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::TenantLookup => "tenant-lookup",
            Self::AudioUpload => "audio-upload",
            Self::Transcription => "transcription",
            Self::EventSave => "event-save",
            Self::Unknown => "unknown",
        }
    }
}

/// What the capture pipeline reports when any stage fails. The message is
/// user-facing; the step is for logs and callers that branch on the stage.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CaptureError {
    pub step: FailedStep,
    pub message: String,
}

/// Orchestrator over the platform clients and the local cache. Cloning is
/// cheap; all members share their underlying handles.
#[derive(Clone)]
pub struct Gateway {
    platform: Platform,
    cache: TimelineCache,
    bucket: String,
}

impl Gateway {
    pub fn new(platform: Platform, cache: TimelineCache, bucket: impl Into<String>) -> Self {
        Self {
            platform,
            cache,
            bucket: bucket.into(),
        }
    }

    pub fn cache(&self) -> &TimelineCache {
        &self.cache
    }

    fn session(&self) -> Result<Session> {
        self.platform
            .sessions
            .current()
            .ok_or_else(|| anyhow!("Authentication required - please sign in"))
    }

    async fn tenant(&self, session: &Session) -> Result<String> {
        self.platform
            .db
            .tenant_for_user(&session.access_token, &session.user.id)
            .await
    }

    /// The timeline for one calendar day: server rows merged over whatever
    /// the cache already holds, newest first. A fetch failure falls back to
    /// the cache alone.
    pub async fn timeline_for_day(&self, day_start: DateTime<Local>) -> Result<Vec<TimelineEvent>> {
        let session = self.session()?;
        let tenant_id = self.tenant(&session).await?;
        let since = day_start.with_timezone(&Utc);
        let until = since + Duration::days(1);

        match self
            .platform
            .db
            .events_in_range(
                &session.access_token,
                &tenant_id,
                &since.to_rfc3339(),
                &until.to_rfc3339(),
            )
            .await
        {
            Ok(rows) => {
                let now = Local::now();
                let mut events: Vec<TimelineEvent> = rows
                    .iter()
                    .map(|row| to_timeline_event(row, now.clone()))
                    .collect();
                // Server rows are settled history, not fresh arrivals.
                for event in &mut events {
                    event.is_new = false;
                }
                self.cache.merge(events);
            }
            Err(e) => {
                warn!(error = %e, "timeline fetch failed, serving cached events");
            }
        }
        Ok(self.cache.sorted_for_display())
    }

    /// One-shot acknowledgement of entrance animations.
    pub fn clear_new_flags(&self) {
        self.cache.clear_new_flags();
    }

    pub async fn babies(&self) -> Result<Vec<Baby>> {
        let session = self.session()?;
        let tenant_id = self.tenant(&session).await?;
        self.platform
            .db
            .babies_for_tenant(&session.access_token, &tenant_id)
            .await
    }

    pub async fn add_baby(&self, name: &str, birthdate: Option<chrono::NaiveDate>) -> Result<Baby> {
        let session = self.session()?;
        let tenant_id = self.tenant(&session).await?;
        let baby = Baby {
            id: None,
            tenant_id,
            name: name.to_string(),
            birthdate,
            created_at: None,
        };
        let stored = self
            .platform
            .db
            .insert_baby(&session.access_token, &baby)
            .await?;

        // A first baby profile is what completes onboarding. Failing to
        // record the flag is not worth failing the insert over.
        if !session.user.user_metadata.onboarding_completed {
            let mut metadata = session.user.user_metadata.clone();
            metadata.onboarding_completed = true;
            if let Err(e) = self
                .platform
                .auth
                .update_user(&session.access_token, metadata)
                .await
            {
                warn!(error = %e, "baby saved but onboarding flag not recorded");
            }
        }
        Ok(stored)
    }

    /// Pending and past invitations for the caller's tenant, newest first.
    pub async fn invitations(&self) -> Result<Vec<Invitation>> {
        let session = self.session()?;
        let tenant_id = self.tenant(&session).await?;
        self.platform
            .db
            .invitations_for_tenant(&session.access_token, &tenant_id)
            .await
    }

    /// Invite a co-caregiver. The code in the response is shown verbatim.
    pub async fn invite(&self, email: &str, role: &str) -> Result<InviteResponse> {
        let session = self.session()?;
        let resp = self
            .platform
            .functions
            .invite_partner(&session.access_token, email, role)
            .await?;
        if !resp.success {
            let message = resp
                .error
                .or(resp.message)
                .unwrap_or_else(|| "Invitation failed".to_string());
            return Err(anyhow!(message));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ProcessPipeline for Gateway {
    /// Full capture flow for one clip: upload, sign, transcribe, merge. Any
    /// error aborts the remaining stages and comes back as a [`CaptureError`]
    /// with the stage classified from the message.
    async fn process(&self, clip: AudioClip, duration_secs: u64) -> Result<CaptureOutcome> {
        match self.process_inner(clip, duration_secs).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let message = e.to_string();
                let step = FailedStep::classify(&message);
                warn!(step = step.as_str(), error = %message, "capture failed");
                Err(CaptureError { step, message }.into())
            }
        }
    }
}

impl Gateway {
    async fn process_inner(&self, clip: AudioClip, duration_secs: u64) -> Result<CaptureOutcome> {
        let session = self.session()?;
        let tenant_id = self.tenant(&session).await?;

        let object_path = format!("{tenant_id}/{}.webm", Uuid::new_v4());
        let stored = self
            .platform
            .storage
            .upload(
                &session.access_token,
                &self.bucket,
                &object_path,
                clip.bytes,
                &clip.content_type,
            )
            .await?;
        let audio_url = self
            .platform
            .storage
            .signed_url(&session.access_token, &self.bucket, &stored.path)
            .await?;

        let resp = self
            .platform
            .functions
            .transcribe_audio(
                &session.access_token,
                &audio_url,
                &stored.id,
                duration_secs as f64,
            )
            .await?;
        if !resp.success {
            let message = resp
                .error
                .clone()
                .unwrap_or_else(|| "Transcription failed".to_string());
            return Err(anyhow!(message));
        }

        let now = Local::now();
        let events: Vec<TimelineEvent> = resp
            .events
            .iter()
            .map(|event| to_timeline_event(event, now.clone()))
            .collect();
        let event_ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
        info!(
            count = events.len(),
            transcription = resp.transcription.as_deref().unwrap_or(""),
            "clip processed"
        );

        // Cache first so the timeline shows the new entries even if the
        // next server fetch fails.
        self.cache.merge(events.clone());

        Ok(CaptureOutcome {
            event_ids,
            events,
            transcription: resp.transcription,
        })
    }
}
