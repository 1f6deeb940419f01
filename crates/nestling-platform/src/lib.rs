//! Clients for the hosted backend platform.
//!
//! Authentication, relational storage, object storage and serverless
//! functions are all external, hosted capabilities; this crate holds the
//! thin HTTP clients that consume their contracts. Nothing here implements
//! those services.

pub mod auth;
pub mod db;
pub mod functions;
pub mod storage;

use serde::{Deserialize, Serialize};

pub use auth::{AuthClient, SessionStore};
pub use db::DbClient;
pub use functions::FunctionsClient;
pub use storage::{StorageClient, StoredObject};

/// Connection settings for the hosted platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Project base URL, e.g. "https://abc.example.co".
    pub base_url: String,
    /// Public (anon) API key sent with every request.
    pub anon_key: String,
    /// Storage bucket for voice recordings.
    #[serde(default = "default_bucket")]
    pub recordings_bucket: String,
}

fn default_bucket() -> String {
    "voice-recordings".to_string()
}

fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .unwrap_or_default()
}

/// One handle per platform concern, sharing a connection pool and the
/// session container.
#[derive(Clone)]
pub struct Platform {
    pub auth: AuthClient,
    pub db: DbClient,
    pub storage: StorageClient,
    pub functions: FunctionsClient,
    pub sessions: SessionStore,
}

impl Platform {
    pub fn new(config: &PlatformConfig) -> Self {
        let http = build_http_client();
        let sessions = SessionStore::new();
        Self {
            auth: AuthClient::new(
                http.clone(),
                &config.base_url,
                &config.anon_key,
                sessions.clone(),
            ),
            db: DbClient::new(http.clone(), &config.base_url, &config.anon_key),
            storage: StorageClient::new(http.clone(), &config.base_url, &config.anon_key),
            functions: FunctionsClient::new(http, &config.base_url, &config.anon_key),
            sessions,
        }
    }
}
