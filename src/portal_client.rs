use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use url::Url;
use uuid::Uuid;

use crate::config::PortalConfig;
use crate::errors::{PortalError, ResultExt};
use crate::models::{AuthChange, AuthEventKind, Identity};
use crate::remote::{RemoteDataService, CHANGE_CHANNEL_CAPACITY};

/// Client for a Supabase-style hosted backend: `/auth/v1` credential flows,
/// `/rest/v1` row queries, `/functions/v1` serverless procedures.
///
/// Holds the access token in-process and publishes [`AuthChange`]
/// notifications on its broadcast channel after successful credential calls,
/// so the session controller observes its own actions the same way it
/// observes externally-triggered changes.
pub struct HttpPortalService {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
    changes: broadcast::Sender<AuthChange>,
}

impl HttpPortalService {
    /// Creates a new `HttpPortalService` from endpoint configuration.
    pub fn new(config: &PortalConfig) -> Result<Self, PortalError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PortalError::RemoteApi(format!("Failed to create portal client: {}", e)))?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: RwLock::new(None),
            changes,
        })
    }

    fn bearer_token(&self) -> Option<String> {
        self.access_token.read().map(|t| t.clone()).unwrap_or(None)
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.access_token.write() {
            *slot = token;
        }
    }

    fn publish(&self, kind: AuthEventKind, identity: Option<Identity>) {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.changes.send(AuthChange { kind, identity });
    }

    /// Builds a `/rest/v1` query URL with equality filters, optional
    /// descending order and row limit.
    fn rows_url(
        &self,
        table: &str,
        filters: &[(&str, String)],
        order_desc: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Url, PortalError> {
        let mut params: Vec<(String, String)> = vec![("select".to_string(), "*".to_string())];
        for (column, value) in filters {
            params.push((column.to_string(), format!("eq.{}", value)));
        }
        if let Some(column) = order_desc {
            params.push(("order".to_string(), format!("{}.desc", column)));
        }
        if let Some(n) = limit {
            params.push(("limit".to_string(), n.to_string()));
        }

        Url::parse_with_params(&format!("{}/rest/v1/{}", self.base_url, table), &params)
            .map_err(|e| PortalError::RemoteApi(format!("Failed to build URL: {}", e)))
    }

    /// Attaches the `apikey` header plus a bearer token: the session token
    /// when signed in, the publishable key otherwise.
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self.bearer_token().unwrap_or_else(|| self.api_key.clone());
        request
            .header("apikey", self.api_key.clone())
            .header("Authorization", format!("Bearer {}", bearer))
    }

    /// Extracts the identity from an auth-endpoint user payload.
    fn identity_from_user(user: &Value) -> Result<Identity, PortalError> {
        let id = user
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| PortalError::RemoteApi("User payload missing 'id' field".to_string()))?;

        let email = user
            .get("email")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from);

        let email_confirmed_at = user
            .get("email_confirmed_at")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok());

        let metadata = user
            .get("user_metadata")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        Ok(Identity {
            id,
            email,
            email_confirmed_at,
            metadata,
        })
    }

    /// Maps an auth-endpoint error body onto the credential-error taxonomy.
    fn credential_error(status: reqwest::StatusCode, body: &str) -> PortalError {
        let lowered = body.to_lowercase();
        if lowered.contains("not confirmed") {
            PortalError::EmailNotConfirmed(body.to_string())
        } else if lowered.contains("already registered") || lowered.contains("already been registered")
        {
            PortalError::EmailInUse(body.to_string())
        } else if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::UNAUTHORIZED
            || lowered.contains("invalid_grant")
            || lowered.contains("invalid login credentials")
        {
            PortalError::InvalidCredentials(body.to_string())
        } else {
            PortalError::RemoteApi(format!("Auth endpoint returned {}: {}", status, body))
        }
    }
}

#[async_trait]
impl RemoteDataService for HttpPortalService {
    async fn get_session(&self) -> Result<Option<Identity>, PortalError> {
        let Some(token) = self.bearer_token() else {
            return Ok(None);
        };

        let url = format!("{}/auth/v1/user", self.base_url);
        tracing::debug!("Fetching current session user: {}", url);

        let response = self
            .client
            .get(&url)
            .header("apikey", self.api_key.clone())
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .context("Session fetch failed")?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            // Token expired or revoked; treat as signed out.
            self.set_token(None);
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PortalError::RemoteApi(format!(
                "Session endpoint returned {}: {}",
                status, error_text
            )));
        }

        let user: Value = response
            .json()
            .await
            .map_err(|e| PortalError::RemoteApi(format!("Failed to parse user payload: {}", e)))?;

        Self::identity_from_user(&user).map(Some)
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, PortalError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        tracing::info!("Signing in {} via password grant", email);

        let response = self
            .client
            .post(&url)
            .header("apikey", self.api_key.clone())
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .context("Sign-in request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!("Sign-in rejected ({}): {}", status, error_text);
            return Err(Self::credential_error(status, &error_text));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PortalError::RemoteApi(format!("Failed to parse token response: {}", e)))?;

        let token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                PortalError::RemoteApi("Token response missing 'access_token'".to_string())
            })?;
        let user = body
            .get("user")
            .ok_or_else(|| PortalError::RemoteApi("Token response missing 'user'".to_string()))?;
        let identity = Self::identity_from_user(user)?;

        self.set_token(Some(token.to_string()));
        self.publish(AuthEventKind::SignedIn, Some(identity.clone()));
        tracing::info!("Signed in: {}", identity.id);
        Ok(identity)
    }

    async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<Identity, PortalError> {
        let url = format!("{}/auth/v1/signup", self.base_url);
        tracing::info!("Signing up {}", email);

        let response = self
            .client
            .post(&url)
            .header("apikey", self.api_key.clone())
            .json(&json!({ "email": email, "password": password, "data": metadata }))
            .send()
            .await
            .context("Sign-up request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!("Sign-up rejected ({}): {}", status, error_text);
            return Err(Self::credential_error(status, &error_text));
        }

        let body: Value = response.json().await.map_err(|e| {
            PortalError::RemoteApi(format!("Failed to parse sign-up response: {}", e))
        })?;

        // The endpoint returns either the bare user object or a
        // {user, access_token} pair when email confirmation is disabled.
        let user = body.get("user").unwrap_or(&body);
        let identity = Self::identity_from_user(user)?;

        if let Some(token) = body.get("access_token").and_then(|v| v.as_str()) {
            self.set_token(Some(token.to_string()));
            self.publish(AuthEventKind::SignedIn, Some(identity.clone()));
        }

        tracing::info!("Signed up: {}", identity.id);
        Ok(identity)
    }

    async fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_path: &str,
    ) -> Result<String, PortalError> {
        // The authorize endpoint is a browser redirect, not an API call;
        // building the URL is the whole client-side operation.
        let url = Url::parse_with_params(
            &format!("{}/auth/v1/authorize", self.base_url),
            &[("provider", provider), ("redirect_to", redirect_path)],
        )
        .map_err(|e| PortalError::RemoteApi(format!("Failed to build URL: {}", e)))?;

        tracing::info!("Starting OAuth flow via {} -> {}", provider, redirect_path);
        Ok(url.to_string())
    }

    async fn sign_out(&self) -> Result<(), PortalError> {
        let token = self.bearer_token();

        // The local session ends no matter what the remote says.
        self.set_token(None);
        self.publish(AuthEventKind::SignedOut, None);

        let Some(token) = token else {
            return Ok(());
        };

        let url = format!("{}/auth/v1/logout", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("apikey", self.api_key.clone())
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .context("Sign-out request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PortalError::RemoteApi(format!(
                "Logout endpoint returned {}: {}",
                status, error_text
            )));
        }

        tracing::info!("Signed out");
        Ok(())
    }

    async fn select_one(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Option<Value>, PortalError> {
        let url = self.rows_url(table, filters, None, Some(1))?;
        tracing::debug!("select_one {} {:?}", table, filters);

        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .context(format!("Query on '{}' failed", table))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PortalError::RemoteApi(format!(
                "Query on '{}' returned {}: {}",
                table, status, error_text
            )));
        }

        let mut rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| PortalError::RemoteApi(format!("Failed to parse rows: {}", e)))?;

        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn select_many(
        &self,
        table: &str,
        filters: &[(&str, String)],
        order_desc: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, PortalError> {
        let url = self.rows_url(table, filters, order_desc, limit)?;
        tracing::debug!("select_many {} {:?}", table, filters);

        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .context(format!("Query on '{}' failed", table))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PortalError::RemoteApi(format!(
                "Query on '{}' returned {}: {}",
                table, status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PortalError::RemoteApi(format!("Failed to parse rows: {}", e)))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), PortalError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        tracing::debug!("insert into {}", table);

        let response = self
            .authorized(self.client.post(&url))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .context(format!("Insert into '{}' failed", table))?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PortalError::Conflict(error_text));
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PortalError::RemoteApi(format!(
                "Insert into '{}' returned {}: {}",
                table, status, error_text
            )));
        }

        Ok(())
    }

    async fn invoke(&self, function: &str, payload: Value) -> Result<Value, PortalError> {
        let url = format!("{}/functions/v1/{}", self.base_url, function);
        tracing::info!("Invoking function '{}'", function);

        let response = self
            .authorized(self.client.post(&url))
            .json(&payload)
            .send()
            .await
            .context(format!("Function '{}' failed", function))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(PortalError::RemoteApi(format!(
                "Function '{}' returned {}: {}",
                function, status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PortalError::RemoteApi(format!("Failed to parse function response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PortalConfig {
        PortalConfig {
            api_base_url: "https://example.portal.co".to_string(),
            api_key: "anon-key".to_string(),
            default_return_path: "/dashboard".to_string(),
        }
    }

    #[tokio::test]
    async fn test_client_creation() {
        let service = HttpPortalService::new(&test_config());
        assert!(service.is_ok());
    }

    #[test]
    fn test_rows_url_shape() {
        let service = HttpPortalService::new(&test_config()).unwrap();
        let url = service
            .rows_url(
                "subscriptions",
                &[("user_id", "abc".to_string())],
                Some("created_at"),
                Some(5),
            )
            .unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("select=*"));
        assert!(query.contains("user_id=eq.abc"));
        assert!(query.contains("order=created_at.desc"));
        assert!(query.contains("limit=5"));
    }

    #[test]
    fn test_credential_error_mapping() {
        let err = HttpPortalService::credential_error(
            reqwest::StatusCode::BAD_REQUEST,
            "Invalid login credentials",
        );
        assert!(matches!(err, PortalError::InvalidCredentials(_)));

        let err = HttpPortalService::credential_error(
            reqwest::StatusCode::UNPROCESSABLE_ENTITY,
            "User already registered",
        );
        assert!(matches!(err, PortalError::EmailInUse(_)));

        let err = HttpPortalService::credential_error(
            reqwest::StatusCode::FORBIDDEN,
            "Email not confirmed",
        );
        assert!(matches!(err, PortalError::EmailNotConfirmed(_)));
    }
}
