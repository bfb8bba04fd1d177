use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use regex::Regex;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::errors::PortalError;
use crate::hydrator;
use crate::models::{AuthChange, AuthEventKind, Identity, ReferralStats, SessionSnapshot};
use crate::referral::{self, is_valid_referral_code, ReferralAttributor};
use crate::remote::RemoteDataService;
use crate::session_store::SessionStore;
use crate::storage::KeyValueStore;

/// Internal paths users may be returned to after an OAuth round trip.
pub const ALLOWED_RETURN_PATHS: &[&str] = &[
    "/",
    "/dashboard",
    "/profile",
    "/bookings",
    "/settings",
    "/referrals",
];
/// Safe path used when a requested return path is not allow-listed.
pub const DEFAULT_RETURN_PATH: &str = "/dashboard";

const MIN_PASSWORD_LEN: usize = 8;

/// Validate email address shape before handing it to the auth service.
pub fn is_valid_email(email: &str) -> bool {
    // Basic checks
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    // RFC 5322 simplified email regex
    let email_regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).unwrap();

    email_regex.is_match(email)
}

/// Coerces a requested post-OAuth return path onto the fixed allow-list.
///
/// Absolute URLs and unknown paths both resolve to the default path, so this
/// parameter cannot be used as an open redirect.
pub fn sanitize_return_path(requested: &str) -> &'static str {
    if url::Url::parse(requested).is_ok() {
        // Parsed as an absolute URL: external target, never allowed.
        return DEFAULT_RETURN_PATH;
    }
    ALLOWED_RETURN_PATHS
        .iter()
        .copied()
        .find(|path| *path == requested)
        .unwrap_or(DEFAULT_RETURN_PATH)
}

struct ControllerInner<R: RemoteDataService, K: KeyValueStore> {
    remote: Arc<R>,
    store: SessionStore,
    attributor: ReferralAttributor<K>,
    /// Cleared on shutdown; checked before every state mutation so no
    /// notification lands after teardown.
    alive: AtomicBool,
}

/// Composition root: owns the auth-change subscription, drives hydration and
/// referral attribution, and exposes the only session surface the rest of
/// the application may rely on.
///
/// Session state transitions flow exclusively through the auth-change
/// channel; explicit actions return their result to the caller but do not
/// mutate the store directly (except `sign_out`, which clears local state
/// before the remote call settles).
pub struct SessionController<R: RemoteDataService, K: KeyValueStore> {
    inner: Arc<ControllerInner<R, K>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<R: RemoteDataService, K: KeyValueStore> SessionController<R, K> {
    pub fn new(remote: Arc<R>, storage: K) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                remote,
                store: SessionStore::new(),
                attributor: ReferralAttributor::new(storage),
                alive: AtomicBool::new(true),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Bootstraps the session and starts the auth-change listener.
    ///
    /// The initial session fetch settles within its deadline (hung calls
    /// resolve as signed out); hydration for a restored identity runs in the
    /// background so the caller is not held up.
    pub async fn start(&self) {
        {
            let guard = self.listener.lock().expect("listener lock poisoned");
            if guard.is_some() {
                return;
            }
        }

        let (identity, generation) = self.inner.store.initialize(self.inner.remote.as_ref()).await;
        if let Some(identity) = identity {
            if self.inner.store.begin_profile_load(generation) {
                spawn_hydration(self.inner.clone(), identity, generation);
            }
        }

        let mut changes = self.inner.remote.subscribe_changes();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if !inner.alive.load(Ordering::SeqCst) {
                            break;
                        }
                        handle_change(&inner, change);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Auth change listener lagged, skipped {}", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Ok(mut guard) = self.listener.lock() {
            *guard = Some(handle);
        }
    }

    /// Stops the listener. No notification is applied after this returns.
    pub fn shutdown(&self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.listener.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    /// Read snapshot of the session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.store.snapshot()
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, PortalError> {
        if !is_valid_email(email) {
            return Err(PortalError::BadRequest("Invalid email address".to_string()));
        }
        self.inner.remote.sign_in_with_password(email, password).await
    }

    /// Creates an account. When a referral code was supplied (or previously
    /// captured by the landing page), a referral attempt is stored locally
    /// for the attributor to consume on the first sign-in notification.
    pub async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        referral_code: Option<&str>,
    ) -> Result<Identity, PortalError> {
        if !is_valid_email(email) {
            return Err(PortalError::BadRequest("Invalid email address".to_string()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(PortalError::BadRequest(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let explicit = referral_code
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(String::from);
        if let Some(ref code) = explicit {
            if !is_valid_referral_code(code) {
                return Err(PortalError::BadRequest("Invalid referral code".to_string()));
            }
        }
        let code = explicit.or_else(|| self.inner.attributor.captured_code());

        let metadata = json!({ "full_name": full_name });
        let identity = self
            .inner
            .remote
            .sign_up_with_password(email, password, metadata)
            .await?;

        if let Some(code) = code {
            self.inner.attributor.record_attempt(&code);
        }
        Ok(identity)
    }

    /// Starts an OAuth flow; returns the redirect URL for the browser.
    /// The return path is coerced onto the allow-list before it leaves the
    /// process.
    pub async fn sign_in_with_oauth(
        &self,
        provider: &str,
        return_path: &str,
    ) -> Result<String, PortalError> {
        let path = sanitize_return_path(return_path);
        self.inner.remote.sign_in_with_oauth(provider, path).await
    }

    /// Signs out. Local identity, profile and subscription are cleared and
    /// the attribution latch reset before the remote call settles; the
    /// remote outcome is returned to the caller.
    pub async fn sign_out(&self) -> Result<(), PortalError> {
        self.inner.store.set_identity(None);
        self.inner.attributor.reset();

        let result = self.inner.remote.sign_out().await;
        if let Err(ref e) = result {
            tracing::warn!("Remote sign-out failed (local session cleared): {}", e);
        }
        result
    }

    /// Re-runs hydration for the current identity. No-op when signed out;
    /// a result arriving after the session moved on is discarded.
    pub async fn refresh_profile(&self) {
        let Some(identity) = self.inner.store.identity() else {
            return;
        };
        let generation = self.inner.store.generation();
        if !self.inner.store.begin_profile_load(generation) {
            return;
        }

        let (profile, subscription) = hydrator::hydrate(self.inner.remote.as_ref(), &identity).await;
        if !self.inner.alive.load(Ordering::SeqCst) {
            return;
        }
        self.inner.store.apply_hydration(generation, profile, subscription);
    }

    /// Aggregate referral stats for the signed-in user. User-invoked, so
    /// errors propagate (unlike the background attribution path).
    pub async fn referral_stats(&self) -> Result<ReferralStats, PortalError> {
        let Some(identity) = self.inner.store.identity() else {
            return Err(PortalError::Unauthorized("Not signed in".to_string()));
        };
        referral::referral_stats(self.inner.remote.as_ref(), &identity).await
    }
}

impl<R: RemoteDataService, K: KeyValueStore> Drop for SessionController<R, K> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Applies one auth-change notification. Sign-out clears state in the same
/// call; hydration and attribution run as background tasks so a later
/// notification is never queued behind a slow lookup.
fn handle_change<R: RemoteDataService, K: KeyValueStore>(
    inner: &Arc<ControllerInner<R, K>>,
    change: AuthChange,
) {
    match change.kind {
        AuthEventKind::SignedOut => {
            inner.store.set_identity(None);
            tracing::info!("Signed out; session state cleared");
        }
        AuthEventKind::SignedIn => {
            let Some(identity) = change.identity else {
                tracing::warn!("Sign-in notification without an identity, ignoring");
                return;
            };
            tracing::info!("Signed in: {}", identity.id);
            let generation = inner.store.set_identity(Some(identity.clone()));
            inner.store.begin_profile_load(generation);
            spawn_hydration(inner.clone(), identity.clone(), generation);
            spawn_attribution(inner.clone(), identity);
        }
        AuthEventKind::TokenRefreshed | AuthEventKind::UserUpdated => {
            let Some(identity) = change.identity.or_else(|| inner.store.identity()) else {
                return;
            };
            let generation = inner.store.set_identity(Some(identity.clone()));
            inner.store.begin_profile_load(generation);
            spawn_hydration(inner.clone(), identity, generation);
        }
    }
}

fn spawn_hydration<R: RemoteDataService, K: KeyValueStore>(
    inner: Arc<ControllerInner<R, K>>,
    identity: Identity,
    generation: u64,
) {
    tokio::spawn(async move {
        let (profile, subscription) = hydrator::hydrate(inner.remote.as_ref(), &identity).await;
        if !inner.alive.load(Ordering::SeqCst) {
            return;
        }
        inner.store.apply_hydration(generation, profile, subscription);
    });
}

fn spawn_attribution<R: RemoteDataService, K: KeyValueStore>(
    inner: Arc<ControllerInner<R, K>>,
    identity: Identity,
) {
    tokio::spawn(async move {
        if !inner.alive.load(Ordering::SeqCst) {
            return;
        }
        inner
            .attributor
            .attribute(inner.remote.as_ref(), &identity)
            .await;
    });
}
