//! Identity types as the hosted session provider reports them.
//!
//! Session presence and the `onboarding_completed` metadata flag are the
//! only authorization signals this codebase reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds, as the token endpoint reports it.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|at| now.timestamp() >= at)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub onboarding_completed: bool,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn session_without_expiry_never_expires() {
        let session: Session = serde_json::from_str(
            r#"{
                "access_token": "tok",
                "user": { "id": "u1" }
            }"#,
        )
        .unwrap();
        assert!(!session.is_expired(Utc::now()));
        assert!(!session.user.user_metadata.onboarding_completed);
    }

    #[test]
    fn session_expiry_is_inclusive() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let session = Session {
            access_token: "tok".into(),
            refresh_token: None,
            expires_at: Some(at.timestamp()),
            user: User {
                id: "u1".into(),
                email: None,
                user_metadata: UserMetadata::default(),
            },
        };
        assert!(session.is_expired(at));
        assert!(!session.is_expired(at - chrono::Duration::seconds(1)));
    }

    #[test]
    fn user_metadata_flag_roundtrip() {
        let raw = r#"{
            "id": "u1",
            "email": "parent@example.com",
            "user_metadata": { "onboarding_completed": true, "full_name": "Sam" }
        }"#;
        let user: User = serde_json::from_str(raw).unwrap();
        assert!(user.user_metadata.onboarding_completed);
        assert_eq!(user.user_metadata.full_name.as_deref(), Some("Sam"));
    }
}
