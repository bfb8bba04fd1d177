/// Shared test double for the hosted backend: canned session, row tables
/// held in memory, inserted rows recorded for assertions, and a broadcast
/// channel tests can push auth changes through.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use portal_session::errors::PortalError;
use portal_session::models::{AuthChange, AuthEventKind, Identity};
use portal_session::remote::{RemoteDataService, CHANGE_CHANNEL_CAPACITY};

pub struct FakeRemote {
    pub session: Mutex<Option<Identity>>,
    /// When set, `get_session` never resolves (simulates a hung network).
    pub hang_session: bool,
    /// When set, every row query sleeps this long before answering.
    pub row_delay: Option<Duration>,
    /// When set, inserts fail with a unique-constraint conflict.
    pub insert_conflict: bool,
    /// When set, the remote half of sign-out fails.
    pub sign_out_fails: bool,
    pub tables: Mutex<HashMap<String, Vec<Value>>>,
    pub inserts: Mutex<Vec<(String, Value)>>,
    pub select_calls: AtomicUsize,
    changes: broadcast::Sender<AuthChange>,
}

#[allow(dead_code)]
impl FakeRemote {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            session: Mutex::new(None),
            hang_session: false,
            row_delay: None,
            insert_conflict: false,
            sign_out_fails: false,
            tables: Mutex::new(HashMap::new()),
            inserts: Mutex::new(Vec::new()),
            select_calls: AtomicUsize::new(0),
            changes,
        }
    }

    pub fn with_session(identity: Identity) -> Self {
        let remote = Self::new();
        *remote.session.lock().unwrap() = Some(identity);
        remote
    }

    pub fn push_row(&self, table: &str, row: Value) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Delivers an auth change to every subscriber, as the real backend's
    /// change feed would.
    pub fn emit(&self, kind: AuthEventKind, identity: Option<Identity>) {
        let _ = self.changes.send(AuthChange { kind, identity });
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.lock().unwrap().len()
    }

    fn matching_rows(&self, table: &str, filters: &[(&str, String)]) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| {
                        filters.iter().all(|(column, value)| {
                            row.get(*column).and_then(|v| v.as_str()) == Some(value.as_str())
                        })
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn test_identity(email: Option<&str>) -> Identity {
    Identity {
        id: Uuid::new_v4(),
        email: email.map(String::from),
        email_confirmed_at: None,
        metadata: serde_json::Map::new(),
    }
}

#[async_trait]
impl RemoteDataService for FakeRemote {
    async fn get_session(&self) -> Result<Option<Identity>, PortalError> {
        if self.hang_session {
            std::future::pending::<()>().await;
        }
        Ok(self.session.lock().unwrap().clone())
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        _password: &str,
    ) -> Result<Identity, PortalError> {
        let identity = self.session.lock().unwrap().clone();
        match identity {
            Some(identity) => {
                self.emit(AuthEventKind::SignedIn, Some(identity.clone()));
                Ok(identity)
            }
            None => Err(PortalError::InvalidCredentials(format!(
                "No account for {}",
                email
            ))),
        }
    }

    async fn sign_up_with_password(
        &self,
        email: &str,
        _password: &str,
        metadata: Value,
    ) -> Result<Identity, PortalError> {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            email_confirmed_at: None,
            metadata: metadata.as_object().cloned().unwrap_or_default(),
        };
        *self.session.lock().unwrap() = Some(identity.clone());
        Ok(identity)
    }

    async fn sign_in_with_oauth(
        &self,
        provider: &str,
        redirect_path: &str,
    ) -> Result<String, PortalError> {
        Ok(format!(
            "https://fake.example/authorize?provider={}&redirect_to={}",
            provider, redirect_path
        ))
    }

    async fn sign_out(&self) -> Result<(), PortalError> {
        if self.sign_out_fails {
            return Err(PortalError::RemoteApi("logout endpoint down".to_string()));
        }
        *self.session.lock().unwrap() = None;
        self.emit(AuthEventKind::SignedOut, None);
        Ok(())
    }

    async fn select_one(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Option<Value>, PortalError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.row_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.matching_rows(table, filters).into_iter().next())
    }

    async fn select_many(
        &self,
        table: &str,
        filters: &[(&str, String)],
        _order_desc: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Value>, PortalError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.row_delay {
            tokio::time::sleep(delay).await;
        }
        let mut rows = self.matching_rows(table, filters);
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), PortalError> {
        if self.insert_conflict {
            return Err(PortalError::Conflict("duplicate key".to_string()));
        }
        self.inserts
            .lock()
            .unwrap()
            .push((table.to_string(), row.clone()));
        self.push_row(table, row);
        Ok(())
    }

    async fn invoke(&self, _function: &str, _payload: Value) -> Result<Value, PortalError> {
        Ok(json!({ "ok": true }))
    }
}
