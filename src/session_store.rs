use std::sync::RwLock;
use std::time::Duration;

use crate::models::{Identity, Profile, SessionSnapshot, Subscription};
use crate::remote::{with_deadline, RemoteDataService};

/// Bounded wait for the initial session fetch. A hung network call must not
/// leave the UI in an infinite loading state; past the deadline the user is
/// treated as signed out.
pub const SESSION_BOOTSTRAP_DEADLINE: Duration = Duration::from_millis(5000);

struct SessionState {
    identity: Option<Identity>,
    profile: Option<Profile>,
    subscription: Option<Subscription>,
    is_loading: bool,
    is_profile_loading: bool,
    /// Bumped on every identity transition. Hydration results carry the
    /// generation observed at launch and are dropped on mismatch, so a slow
    /// lookup can never repopulate state owned by a newer identity.
    generation: u64,
}

/// Single source of truth for the authenticated identity and its dependent
/// profile/subscription state. All session mutation funnels through here.
pub struct SessionStore {
    state: RwLock<SessionState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState {
                identity: None,
                profile: None,
                subscription: None,
                is_loading: true,
                is_profile_loading: false,
                generation: 0,
            }),
        }
    }

    /// Requests the current session with a bounded wait.
    ///
    /// Timeouts and remote errors both settle as "no session"; they are
    /// logged inside the deadline combinator and never surfaced. The loading
    /// flag clears unconditionally. Returns the resolved identity plus the
    /// generation to use for the follow-up hydration.
    pub async fn initialize<R: RemoteDataService>(
        &self,
        remote: &R,
    ) -> (Option<Identity>, u64) {
        let identity = with_deadline(
            "Session bootstrap",
            SESSION_BOOTSTRAP_DEADLINE,
            remote.get_session(),
            None,
        )
        .await;

        let generation = self.set_identity(identity.clone());
        if let Ok(mut state) = self.state.write() {
            state.is_loading = false;
        }
        (identity, generation)
    }

    /// Installs a new identity (or none) and returns the new generation.
    ///
    /// Clearing the identity also clears profile and subscription in the
    /// same critical section: no stale profile may be observed after a
    /// sign-out notification.
    pub fn set_identity(&self, identity: Option<Identity>) -> u64 {
        let mut state = self.state.write().expect("session state lock poisoned");
        if identity.is_none() {
            state.profile = None;
            state.subscription = None;
            state.is_profile_loading = false;
        }
        state.identity = identity;
        state.generation += 1;
        state.generation
    }

    /// Current generation, for guards taken outside an identity transition.
    pub fn generation(&self) -> u64 {
        self.state
            .read()
            .expect("session state lock poisoned")
            .generation
    }

    /// Marks a hydration pass as in flight, but only if the session has not
    /// moved past the generation the pass was planned under. Returns whether
    /// the pass should proceed.
    pub fn begin_profile_load(&self, generation: u64) -> bool {
        let mut state = self.state.write().expect("session state lock poisoned");
        if state.generation != generation {
            return false;
        }
        state.is_profile_loading = true;
        true
    }

    /// Applies a hydration result if the session has not moved on since the
    /// pass was launched. Returns whether the result was applied.
    pub fn apply_hydration(
        &self,
        generation: u64,
        profile: Profile,
        subscription: Option<Subscription>,
    ) -> bool {
        let mut state = self.state.write().expect("session state lock poisoned");
        if state.generation != generation {
            tracing::debug!(
                "Discarding stale hydration result (generation {} != {})",
                generation,
                state.generation
            );
            return false;
        }
        state.profile = Some(profile);
        state.subscription = subscription;
        state.is_profile_loading = false;
        true
    }

    /// Current identity, cloned out of the store.
    pub fn identity(&self) -> Option<Identity> {
        self.state
            .read()
            .expect("session state lock poisoned")
            .identity
            .clone()
    }

    /// Read snapshot for the UI layer. `is_pro` is derived here, never
    /// stored.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().expect("session state lock poisoned");
        let is_pro = state
            .subscription
            .as_ref()
            .map(|s| s.status.is_pro())
            .unwrap_or(false);
        SessionSnapshot {
            identity: state.identity.clone(),
            profile: state.profile.clone(),
            subscription: state.subscription.clone(),
            is_loading: state.is_loading,
            is_profile_loading: state.is_profile_loading,
            is_pro,
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Role, SubscriptionStatus};
    use serde_json::Map;
    use uuid::Uuid;

    fn identity() -> Identity {
        Identity {
            id: Uuid::new_v4(),
            email: Some("a@b.com".to_string()),
            email_confirmed_at: None,
            metadata: Map::new(),
        }
    }

    fn profile_for(id: Uuid) -> Profile {
        Profile {
            id,
            email: None,
            full_name: "Test".to_string(),
            role: Role::Client,
            referral_code: None,
            pro_months_balance: 0,
            is_verified: false,
            avatar_path: None,
        }
    }

    #[test]
    fn test_sign_out_clears_dependents_synchronously() {
        let store = SessionStore::new();
        let ident = identity();
        let generation = store.set_identity(Some(ident.clone()));
        assert!(store.apply_hydration(generation, profile_for(ident.id), None));
        assert!(store.snapshot().profile.is_some());

        store.set_identity(None);
        let snapshot = store.snapshot();
        assert!(snapshot.identity.is_none());
        assert!(snapshot.profile.is_none());
        assert!(snapshot.subscription.is_none());
    }

    #[test]
    fn test_stale_hydration_discarded_after_transition() {
        let store = SessionStore::new();
        let ident = identity();
        let stale_generation = store.set_identity(Some(ident.clone()));
        store.set_identity(None);

        assert!(!store.apply_hydration(stale_generation, profile_for(ident.id), None));
        assert!(store.snapshot().profile.is_none());
    }

    #[test]
    fn test_snapshot_derives_is_pro() {
        let store = SessionStore::new();
        let ident = identity();
        let generation = store.set_identity(Some(ident.clone()));
        store.apply_hydration(
            generation,
            profile_for(ident.id),
            Some(crate::models::Subscription {
                status: SubscriptionStatus::Trialing,
                plan: None,
                current_period_end: None,
                created_at: None,
            }),
        );
        assert!(store.snapshot().is_pro);
    }
}
