//! Row-level REST access for tenant, event, baby and invitation tables.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::debug;

use nestling_schema::{Baby, ExtractedEvent, Invitation};

#[derive(Deserialize)]
struct TenantRow {
    tenant_id: String,
}

/// Client for the row API under `{base}/rest/v1`. Every call carries the
/// project key plus the caller's access token, so row-level policies apply.
#[derive(Clone)]
pub struct DbClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl DbClient {
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

    fn endpoint(&self, table_and_query: &str) -> String {
        format!("{}/rest/v1/{table_and_query}", self.base_url)
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        table_and_query: &str,
    ) -> Result<Vec<T>> {
        let resp = self
            .http
            .get(self.endpoint(table_and_query))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Row query failed ({status}): {body}"));
        }
        Ok(resp.json().await?)
    }

    /// Resolve the tenant a user belongs to.
    ///
    /// The membership table is checked first; accounts created before
    /// memberships existed only have the column on their user row, so that
    /// is the fallback. No row in either place is an error a caller can
    /// classify by the word "Tenant".
    pub async fn tenant_for_user(&self, access_token: &str, user_id: &str) -> Result<String> {
        let query = format!("users_to_tenants?select=tenant_id&user_id=eq.{user_id}&limit=1");
        let rows: Vec<TenantRow> = self.get_rows(access_token, &query).await?;
        if let Some(row) = rows.into_iter().next() {
            return Ok(row.tenant_id);
        }

        debug!(user_id, "no membership row, falling back to the users table");
        let query = format!("users?select=tenant_id&id=eq.{user_id}&limit=1");
        let rows: Vec<TenantRow> = self.get_rows(access_token, &query).await?;
        rows.into_iter()
            .next()
            .map(|row| row.tenant_id)
            .ok_or_else(|| anyhow!("Tenant not found for user {user_id}"))
    }

    /// Persisted events for a tenant inside `[since, until)`, newest first,
    /// one 50-row page.
    pub async fn events_in_range(
        &self,
        access_token: &str,
        tenant_id: &str,
        since: &str,
        until: &str,
    ) -> Result<Vec<ExtractedEvent>> {
        let query = format!(
            "events?select=*&tenant_id=eq.{tenant_id}\
             &start_time=gte.{since}&start_time=lt.{until}\
             &order=start_time.desc&limit=50"
        );
        self.get_rows(access_token, &query).await
    }

    pub async fn babies_for_tenant(
        &self,
        access_token: &str,
        tenant_id: &str,
    ) -> Result<Vec<Baby>> {
        let query = format!("babies?select=*&tenant_id=eq.{tenant_id}&order=created_at.asc");
        self.get_rows(access_token, &query).await
    }

    /// Insert a baby profile and return the stored row.
    pub async fn insert_baby(&self, access_token: &str, baby: &Baby) -> Result<Baby> {
        let resp = self
            .http
            .post(self.endpoint("babies"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .header("Prefer", "return=representation")
            .json(baby)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Baby insert failed ({status}): {body}"));
        }
        let mut rows: Vec<Baby> = resp.json().await?;
        rows.pop()
            .ok_or_else(|| anyhow!("Baby insert returned no row"))
    }

    pub async fn invitations_for_tenant(
        &self,
        access_token: &str,
        tenant_id: &str,
    ) -> Result<Vec<Invitation>> {
        let query =
            format!("invitations?select=*&tenant_id=eq.{tenant_id}&order=created_at.desc");
        self.get_rows(access_token, &query).await
    }
}
