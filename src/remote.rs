use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::errors::PortalError;
use crate::models::{AuthChange, Identity};

/// Capacity of the auth-change broadcast channel. Changes are rare and
/// consumers drain immediately, so a small buffer is enough.
pub const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Contract of the hosted backend this crate consumes: session retrieval,
/// auth-change subscription, credential flows, row queries against named
/// collections, and named serverless procedures.
///
/// Implemented by [`crate::portal_client::HttpPortalService`] for real
/// deployments and by in-memory fakes in tests.
#[async_trait]
pub trait RemoteDataService: Send + Sync + 'static {
    /// Returns the current session's identity, if one exists.
    async fn get_session(&self) -> Result<Option<Identity>, PortalError>;

    /// Registers for auth-change notifications. Each call returns an
    /// independent receiver; dropping it is the unsubscribe.
    fn subscribe_changes(&self) -> broadcast::Receiver<AuthChange>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, PortalError>;

    /// Creates an account. `metadata` is forwarded verbatim as the
    /// provider-side user metadata (e.g. `{"full_name": "..."}`).
    async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<Identity, PortalError>;

    /// Starts an OAuth redirect flow; returns the URL to send the browser to.
    async fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_path: &str,
    ) -> Result<String, PortalError>;

    async fn sign_out(&self) -> Result<(), PortalError>;

    /// Single-row query: the first row of `table` matching every equality
    /// filter, or `None`.
    async fn select_one(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Option<Value>, PortalError>;

    /// Multi-row query with an optional descending order column and row
    /// limit. Rows come back in the order the backend returns them.
    async fn select_many(
        &self,
        table: &str,
        filters: &[(&str, String)],
        order_desc: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, PortalError>;

    /// Appends a row to `table`.
    async fn insert(&self, table: &str, row: Value) -> Result<(), PortalError>;

    /// Invokes a named serverless procedure with a JSON payload.
    async fn invoke(&self, function: &str, payload: Value) -> Result<Value, PortalError>;
}

/// Degraded-mode service used when no remote endpoint is configured.
///
/// Reads resolve empty so the UI can settle, mutations return a uniform
/// `ServiceUnavailable`, and the change channel never fires.
pub struct UnconfiguredService {
    changes: broadcast::Sender<AuthChange>,
}

impl UnconfiguredService {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { changes }
    }
}

impl Default for UnconfiguredService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteDataService for UnconfiguredService {
    async fn get_session(&self) -> Result<Option<Identity>, PortalError> {
        Ok(None)
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<Identity, PortalError> {
        Err(PortalError::ServiceUnavailable)
    }

    async fn sign_up_with_password(
        &self,
        _email: &str,
        _password: &str,
        _metadata: Value,
    ) -> Result<Identity, PortalError> {
        Err(PortalError::ServiceUnavailable)
    }

    async fn sign_in_with_oauth(
        &self,
        _provider: &str,
        _redirect_path: &str,
    ) -> Result<String, PortalError> {
        Err(PortalError::ServiceUnavailable)
    }

    async fn sign_out(&self) -> Result<(), PortalError> {
        Err(PortalError::ServiceUnavailable)
    }

    async fn select_one(
        &self,
        _table: &str,
        _filters: &[(&str, String)],
    ) -> Result<Option<Value>, PortalError> {
        Ok(None)
    }

    async fn select_many(
        &self,
        _table: &str,
        _filters: &[(&str, String)],
        _order_desc: Option<&str>,
        _limit: Option<u32>,
    ) -> Result<Vec<Value>, PortalError> {
        Ok(Vec::new())
    }

    async fn insert(&self, _table: &str, _row: Value) -> Result<(), PortalError> {
        Err(PortalError::ServiceUnavailable)
    }

    async fn invoke(&self, _function: &str, _payload: Value) -> Result<Value, PortalError> {
        Err(PortalError::ServiceUnavailable)
    }
}

/// Races `fut` against `deadline` and resolves to `fallback` on timeout or
/// error instead of propagating either.
///
/// Background lookups must never leave the UI waiting forever, so a hung or
/// failing remote call settles as the fallback value and is only logged.
pub async fn with_deadline<T, F>(what: &str, deadline: Duration, fut: F, fallback: T) -> T
where
    F: Future<Output = Result<T, PortalError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            tracing::warn!("{} failed, using fallback: {}", what, e);
            fallback
        }
        Err(_) => {
            tracing::warn!("{} timed out after {:?}, using fallback", what, deadline);
            fallback
        }
    }
}
