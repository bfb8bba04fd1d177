use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use regex::Regex;

use crate::errors::PortalError;
use crate::models::{
    Identity, Profile, RefereeType, ReferralAttempt, ReferralEvent, ReferralStats, ReferralStatus,
};
use crate::remote::RemoteDataService;
use crate::storage::KeyValueStore;

/// Session-scoped slot holding the attempt awaiting attribution. Single
/// overwrite-on-write register, not a queue.
pub const PENDING_ATTEMPT_KEY: &str = "pending_referral";
/// Durable slot written by the external capture mechanism (landing-page
/// query param). Only read here.
pub const CAPTURED_CODE_KEY: &str = "referral_code";
/// Attempts older than this are discarded unconsumed.
pub const ATTEMPT_TTL_SECONDS: i64 = 3600;

/// Validates the shape of a referral code before it is stored or sent
/// remotely.
pub fn is_valid_referral_code(code: &str) -> bool {
    if code.is_empty() || code.len() > 16 {
        return false;
    }
    let code_regex = Regex::new(r"^[A-Za-z0-9_-]{4,16}$").unwrap();
    code_regex.is_match(code)
}

/// Converts a locally-held referral code into at most one remote
/// `ReferralEvent`, once per browser-session lifetime, only for genuine
/// first-time sign-ins.
///
/// Every failure path is internal: the attempt is discarded and the error
/// logged, never propagated, because referral crediting must never block the
/// authentication flow.
pub struct ReferralAttributor<K: KeyValueStore> {
    store: K,
    processed: AtomicBool,
}

impl<K: KeyValueStore> ReferralAttributor<K> {
    pub fn new(store: K) -> Self {
        Self {
            store,
            processed: AtomicBool::new(false),
        }
    }

    /// Stores an attempt for the given code, stamped with the current time.
    /// Called by the sign-up action when a code was supplied or captured.
    pub fn record_attempt(&self, code: &str) {
        let attempt = ReferralAttempt::new(code.trim());
        match serde_json::to_string(&attempt) {
            Ok(serialized) => {
                self.store.set(PENDING_ATTEMPT_KEY, &serialized);
                tracing::debug!("Stored referral attempt for code {}", attempt.code);
            }
            Err(e) => tracing::warn!("Failed to store referral attempt: {}", e),
        }
    }

    /// Referral code captured durably by the landing page, if any.
    pub fn captured_code(&self) -> Option<String> {
        self.store
            .get(CAPTURED_CODE_KEY)
            .map(|code| code.trim().to_string())
            .filter(|code| is_valid_referral_code(code))
    }

    /// Clears the once-per-session latch. Called on sign-out so a later
    /// sign-up in the same session can attribute again.
    pub fn reset(&self) {
        self.processed.store(false, Ordering::SeqCst);
    }

    fn load_attempt(&self) -> Option<ReferralAttempt> {
        let serialized = self.store.get(PENDING_ATTEMPT_KEY)?;
        match serde_json::from_str(&serialized) {
            Ok(attempt) => Some(attempt),
            Err(e) => {
                // A malformed slot can never become valid; drop it.
                tracing::debug!("Discarding malformed referral attempt: {}", e);
                self.store.remove(PENDING_ATTEMPT_KEY);
                None
            }
        }
    }

    fn clear_attempt(&self) {
        self.store.remove(PENDING_ATTEMPT_KEY);
    }

    /// Runs the attribution pipeline for a freshly signed-in identity.
    ///
    /// Triggered only on a sign-in notification, never on token refresh or
    /// user update. All remote steps run sequentially; whatever the outcome,
    /// the local attempt is deleted (attempts are not retried across page
    /// loads).
    pub async fn attribute<R: RemoteDataService>(&self, remote: &R, identity: &Identity) {
        // Once-per-session guard against duplicate event delivery.
        if self.processed.load(Ordering::SeqCst) {
            return;
        }

        let Some(attempt) = self.load_attempt() else {
            return;
        };

        if attempt.age(Utc::now()).num_seconds() > ATTEMPT_TTL_SECONDS {
            tracing::debug!("Referral attempt for code {} expired, discarding", attempt.code);
            self.clear_attempt();
            return;
        }

        // Local guards passed; latch before any remote call so a second
        // delivery of the same sign-in cannot start another crediting pass.
        self.processed.store(true, Ordering::SeqCst);

        if let Err(e) = credit(remote, identity, &attempt).await {
            tracing::warn!("Referral attribution abandoned: {}", e);
        }
        self.clear_attempt();
    }
}

/// Remote half of the pipeline: referrer lookup, self-referral and duplicate
/// guards, referee-type resolution, single insert.
async fn credit<R: RemoteDataService>(
    remote: &R,
    identity: &Identity,
    attempt: &ReferralAttempt,
) -> Result<(), PortalError> {
    let Some(referrer_row) = remote
        .select_one("profiles", &[("referral_code", attempt.code.clone())])
        .await?
    else {
        tracing::debug!("Referral code {} matches no profile", attempt.code);
        return Ok(());
    };
    let referrer: Profile = serde_json::from_value(referrer_row)
        .map_err(|e| PortalError::RemoteApi(format!("Malformed referrer row: {}", e)))?;

    if referrer.id == identity.id {
        tracing::debug!("Self-referral rejected for {}", identity.id);
        return Ok(());
    }

    // Fast-path duplicate check. The unique constraint on referred_id at the
    // storage layer is the authoritative guard; this avoids a pointless
    // insert on the common duplicate-delivery path.
    let existing = remote
        .select_one("referral_events", &[("referred_id", identity.id.to_string())])
        .await?;
    if existing.is_some() {
        tracing::debug!("Referral already recorded for {}", identity.id);
        return Ok(());
    }

    // Referee type comes from the new profile's role; lookup failures
    // default to the client side.
    let referee_role = remote
        .select_one("profiles", &[("id", identity.id.to_string())])
        .await
        .ok()
        .flatten()
        .and_then(|row| serde_json::from_value::<Profile>(row).ok())
        .map(|profile| profile.role)
        .unwrap_or_default();
    let referee_type = RefereeType::from(referee_role);
    let status = match referee_type {
        RefereeType::Client => ReferralStatus::Validated,
        RefereeType::Entrepreneur => ReferralStatus::Pending,
    };

    let event = ReferralEvent {
        referrer_id: referrer.id,
        referred_id: identity.id,
        referee_type,
        status,
        created_at: Utc::now(),
    };
    let row = serde_json::to_value(&event)
        .map_err(|e| PortalError::RemoteApi(format!("Failed to encode referral event: {}", e)))?;

    match remote.insert("referral_events", row).await {
        Ok(()) => {
            tracing::info!(
                "Referral recorded: {} referred {} ({:?})",
                event.referrer_id,
                event.referred_id,
                event.status
            );
            Ok(())
        }
        Err(PortalError::Conflict(_)) => {
            // Lost a check-then-insert race; the row already exists.
            tracing::debug!("Concurrent duplicate referral for {}, ignoring", identity.id);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Aggregates the referral events the given identity has originated.
pub async fn referral_stats<R: RemoteDataService>(
    remote: &R,
    identity: &Identity,
) -> Result<ReferralStats, PortalError> {
    let rows = remote
        .select_many(
            "referral_events",
            &[("referrer_id", identity.id.to_string())],
            Some("created_at"),
            None,
        )
        .await?;

    let mut stats = ReferralStats::default();
    for row in rows {
        let Ok(event) = serde_json::from_value::<ReferralEvent>(row) else {
            continue;
        };
        stats.total += 1;
        match event.status {
            ReferralStatus::Validated => stats.validated += 1,
            ReferralStatus::Pending => stats.pending += 1,
            ReferralStatus::Rejected => {}
        }
    }
    Ok(stats)
}
