use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

// ============ Auth Models ============

/// The authenticated principal as known to the remote auth service.
///
/// Created externally on sign-in/sign-up; this crate treats it as read-only
/// and holds it for the lifetime of the authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Stable unique identifier assigned by the auth service.
    pub id: Uuid,
    /// Email address, when the provider supplies one.
    pub email: Option<String>,
    /// Set once the email address has been confirmed.
    pub email_confirmed_at: Option<DateTime<Utc>>,
    /// Provider-supplied metadata (e.g. `full_name`). Opaque key/value map.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Identity {
    /// Reads a string field out of the provider metadata map.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Kind of auth-change notification delivered by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// A single auth-change notification: what happened plus the identity (if
/// any) after the change.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub kind: AuthEventKind,
    pub identity: Option<Identity>,
}

// ============ Profile Models ============

/// Application-level role of a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Client,
    Entrepreneur,
}

/// Application-level user record, keyed by `Identity::id`.
///
/// Exactly one profile exists per identity. A profile may also be synthesized
/// in memory as a fallback when the remote lookup fails or times out; a
/// fallback is never written back to the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Equal to the owning `Identity::id`.
    pub id: Uuid,
    pub email: Option<String>,
    pub full_name: String,
    #[serde(default)]
    pub role: Role,
    /// Unique per profile; the join key for referral attribution.
    pub referral_code: Option<String>,
    /// Months of Pro access earned through referrals. Only ever incremented
    /// server-side.
    #[serde(default)]
    pub pro_months_balance: u32,
    #[serde(default)]
    pub is_verified: bool,
    pub avatar_path: Option<String>,
}

// ============ Subscription Models ============

/// Billing status as reported by the payment processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    /// Any status this crate does not model further.
    Other(String),
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Other(s) => s,
        }
    }

    /// Whether this status grants Pro entitlements.
    pub fn is_pro(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }
}

impl From<&str> for SubscriptionStatus {
    fn from(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            other => SubscriptionStatus::Other(other.to_string()),
        }
    }
}

impl Serialize for SubscriptionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SubscriptionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SubscriptionStatus::from(s.as_str()))
    }
}

/// Billing state record associated with an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub status: SubscriptionStatus,
    pub plan: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

// ============ Referral Models ============

/// Ephemeral local record of a referral code pending attribution.
///
/// Lives in a single overwrite-on-write storage slot; discarded unconsumed
/// once older than the attribution TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralAttempt {
    pub code: String,
    pub stored_at: DateTime<Utc>,
}

impl ReferralAttempt {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            stored_at: Utc::now(),
        }
    }

    /// Age of the attempt relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.stored_at
    }
}

/// Which side of the marketplace the referred user signed up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefereeType {
    Client,
    Entrepreneur,
}

impl From<Role> for RefereeType {
    fn from(role: Role) -> Self {
        match role {
            Role::Client => RefereeType::Client,
            Role::Entrepreneur => RefereeType::Entrepreneur,
        }
    }
}

/// Lifecycle state of a referral event.
///
/// Client referees validate immediately; entrepreneur referees stay pending
/// until an external event (e.g. a paid subscription) validates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Validated,
    Pending,
    Rejected,
}

/// Durable remote record of a completed referral attribution. Append-only;
/// at most one per referred identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralEvent {
    pub referrer_id: Uuid,
    pub referred_id: Uuid,
    pub referee_type: RefereeType,
    pub status: ReferralStatus,
    pub created_at: DateTime<Utc>,
}

/// Aggregate view of the referral events a user has originated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferralStats {
    pub total: u32,
    pub validated: u32,
    pub pending: u32,
}

// ============ Session Snapshot ============

/// Read snapshot of the session state exposed to the UI layer.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub subscription: Option<Subscription>,
    /// True until the initial session bootstrap settles.
    pub is_loading: bool,
    /// True while a profile hydration pass is in flight.
    pub is_profile_loading: bool,
    /// Derived: the surfaced subscription is `active` or `trialing`.
    pub is_pro: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_status_mapping() {
        assert_eq!(
            SubscriptionStatus::from("active"),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from("past_due"),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            SubscriptionStatus::from("incomplete"),
            SubscriptionStatus::Other("incomplete".to_string())
        );
    }

    #[test]
    fn test_pro_statuses() {
        assert!(SubscriptionStatus::Active.is_pro());
        assert!(SubscriptionStatus::Trialing.is_pro());
        assert!(!SubscriptionStatus::Canceled.is_pro());
        assert!(!SubscriptionStatus::Other("paused".to_string()).is_pro());
    }

    #[test]
    fn test_status_serializes_as_plain_string() {
        let sub = Subscription {
            status: SubscriptionStatus::Trialing,
            plan: Some("pro_monthly".to_string()),
            current_period_end: None,
            created_at: None,
        };
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["status"], "trialing");
    }
}
