//! Identity/session client plus the application-level session container.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use serde::Serialize;
use tokio::sync::watch;

use nestling_schema::{Session, User, UserMetadata};

/// The one place the current session lives.
///
/// Constructed once at startup and threaded through everything that needs
/// auth state. Consumers either read the current value or subscribe for
/// changes; updates are last-write-wins, which is all the single-user,
/// single-device context needs.
#[derive(Clone)]
pub struct SessionStore {
    tx: Arc<watch::Sender<Option<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    /// Subscribe to session changes; the receiver sees the latest value.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }

    pub fn set(&self, session: Option<Session>) {
        // send_replace never fails and notifies even without receivers.
        self.tx.send_replace(session);
    }

    pub fn access_token(&self) -> Option<String> {
        self.tx.borrow().as_ref().map(|s| s.access_token.clone())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct MagicLinkRequest<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct UpdateUserRequest {
    data: UserMetadata,
}

/// Client for the hosted identity provider. Successful sign-in/out also
/// update the shared [`SessionStore`], so subscribers observe every
/// transition.
#[derive(Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    sessions: SessionStore,
}

impl AuthClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        sessions: SessionStore,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            sessions,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let resp = self
            .http
            .post(self.endpoint("token?grant_type=password"))
            .header("apikey", &self.anon_key)
            .json(&PasswordGrant { email, password })
            .send()
            .await?;
        let session = self.parse_session(resp).await?;
        self.sessions.set(Some(session.clone()));
        Ok(session)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session> {
        let resp = self
            .http
            .post(self.endpoint("signup"))
            .header("apikey", &self.anon_key)
            .json(&PasswordGrant { email, password })
            .send()
            .await?;
        let session = self.parse_session(resp).await?;
        self.sessions.set(Some(session.clone()));
        Ok(session)
    }

    /// Build the browser URL that starts an OAuth sign-in with the named
    /// provider ("google", "apple"). The flow completes out of band; the
    /// session arrives through the provider's redirect, not this client.
    pub fn oauth_authorize_url(&self, provider: &str, redirect_to: Option<&str>) -> String {
        let mut url = format!("{}?provider={provider}", self.endpoint("authorize"));
        if let Some(redirect) = redirect_to {
            url.push_str("&redirect_to=");
            url.push_str(redirect);
        }
        url
    }

    /// Request a magic sign-in link; completion happens out of band.
    pub async fn request_magic_link(&self, email: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.endpoint("magiclink"))
            .header("apikey", &self.anon_key)
            .json(&MagicLinkRequest { email })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(self.error_from(resp).await);
        }
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<()> {
        if let Some(token) = self.sessions.access_token() {
            let resp = self
                .http
                .post(self.endpoint("logout"))
                .header("apikey", &self.anon_key)
                .bearer_auth(&token)
                .send()
                .await?;
            if !resp.status().is_success() && resp.status() != StatusCode::UNAUTHORIZED {
                return Err(self.error_from(resp).await);
            }
        }
        self.sessions.set(None);
        Ok(())
    }

    pub async fn get_user(&self, access_token: &str) -> Result<User> {
        let resp = self
            .http
            .get(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(self.error_from(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// Update user metadata; used to flip `onboarding_completed`.
    pub async fn update_user(&self, access_token: &str, metadata: UserMetadata) -> Result<User> {
        let resp = self
            .http
            .put(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .json(&UpdateUserRequest { data: metadata })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(self.error_from(resp).await);
        }
        let user: User = resp.json().await?;
        // Keep the cached session's view of the user current.
        if let Some(mut session) = self.sessions.current() {
            session.user = user.clone();
            self.sessions.set(Some(session));
        }
        Ok(user)
    }

    async fn parse_session(&self, resp: reqwest::Response) -> Result<Session> {
        if !resp.status().is_success() {
            return Err(self.error_from(resp).await);
        }
        Ok(resp.json().await?)
    }

    async fn error_from(&self, resp: reqwest::Response) -> anyhow::Error {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("error_description")
                    .or_else(|| v.get("msg"))
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str().map(String::from))
            })
            .unwrap_or(body);
        anyhow!("Authentication error ({status}): {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_body() -> serde_json::Value {
        serde_json::json!({
            "access_token": "tok-123",
            "refresh_token": "ref-456",
            "expires_at": 4102444800i64,
            "user": {
                "id": "u1",
                "email": "parent@example.com",
                "user_metadata": { "onboarding_completed": true }
            }
        })
    }

    #[tokio::test]
    async fn sign_in_updates_the_session_store() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(header("apikey", "anon"))
            .and(body_partial_json(
                serde_json::json!({ "email": "parent@example.com" }),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_body()))
            .mount(&server)
            .await;

        let sessions = SessionStore::new();
        let mut watcher = sessions.subscribe();
        let client = AuthClient::new(
            reqwest::Client::new(),
            server.uri(),
            "anon",
            sessions.clone(),
        );

        let session = client
            .sign_in_with_password("parent@example.com", "pw")
            .await
            .unwrap();
        assert_eq!(session.access_token, "tok-123");
        assert!(session.user.user_metadata.onboarding_completed);

        assert!(watcher.has_changed().unwrap());
        assert_eq!(sessions.access_token().as_deref(), Some("tok-123"));
    }

    #[tokio::test]
    async fn sign_up_stores_the_new_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .and(header("apikey", "anon"))
            .and(body_partial_json(
                serde_json::json!({ "email": "parent@example.com" }),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_body()))
            .mount(&server)
            .await;

        let sessions = SessionStore::new();
        let client = AuthClient::new(
            reqwest::Client::new(),
            server.uri(),
            "anon",
            sessions.clone(),
        );
        let session = client.sign_up("parent@example.com", "pw").await.unwrap();
        assert_eq!(session.access_token, "tok-123");
        assert_eq!(sessions.access_token().as_deref(), Some("tok-123"));
    }

    #[test]
    fn oauth_authorize_url_names_the_provider() {
        let sessions = SessionStore::new();
        let client = AuthClient::new(
            reqwest::Client::new(),
            "https://x.test/",
            "anon",
            sessions,
        );
        assert_eq!(
            client.oauth_authorize_url("google", None),
            "https://x.test/auth/v1/authorize?provider=google"
        );
        assert_eq!(
            client.oauth_authorize_url("apple", Some("nestling://auth")),
            "https://x.test/auth/v1/authorize?provider=apple&redirect_to=nestling://auth"
        );
    }

    #[tokio::test]
    async fn sign_in_failure_surfaces_the_provider_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                serde_json::json!({ "error_description": "Invalid login credentials" }),
            ))
            .mount(&server)
            .await;

        let sessions = SessionStore::new();
        let client = AuthClient::new(reqwest::Client::new(), server.uri(), "anon", sessions.clone());
        let err = client
            .sign_in_with_password("parent@example.com", "nope")
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("Invalid login credentials"));
        assert!(sessions.current().is_none());
    }

    #[tokio::test]
    async fn sign_out_clears_the_store_even_when_expired_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let sessions = SessionStore::new();
        let client = AuthClient::new(reqwest::Client::new(), server.uri(), "anon", sessions.clone());
        let session: Session = serde_json::from_value(session_body()).unwrap();
        sessions.set(Some(session));

        client.sign_out().await.unwrap();
        assert!(sessions.current().is_none());
    }

    #[tokio::test]
    async fn last_write_wins_in_the_store() {
        let sessions = SessionStore::new();
        let a: Session = serde_json::from_value(session_body()).unwrap();
        let mut b = a.clone();
        b.access_token = "tok-later".into();

        sessions.set(Some(a));
        sessions.set(Some(b));
        assert_eq!(sessions.access_token().as_deref(), Some("tok-later"));
    }
}
