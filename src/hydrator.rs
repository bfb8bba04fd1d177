use std::time::Duration;

use serde_json::Value;

use crate::errors::PortalError;
use crate::models::{Identity, Profile, Role, Subscription};
use crate::remote::{with_deadline, RemoteDataService};

/// Bounded wait for the profile row lookup.
pub const PROFILE_DEADLINE: Duration = Duration::from_millis(5000);
/// Bounded wait for the subscription rows lookup.
pub const SUBSCRIPTION_DEADLINE: Duration = Duration::from_millis(3000);
/// How many most-recent subscription rows to inspect for a qualifying one.
pub const SUBSCRIPTION_LOOKBACK: u32 = 5;
/// Display name used when neither provider metadata nor the email yields one.
pub const FALLBACK_NAME: &str = "Member";

/// Resolves profile and subscription for an identity.
///
/// The profile settles first (remote row or in-memory fallback, never an
/// error); the subscription lookup runs afterward and degrades to `None` on
/// its own without disturbing the profile.
pub async fn hydrate<R: RemoteDataService>(
    remote: &R,
    identity: &Identity,
) -> (Profile, Option<Subscription>) {
    let profile = with_deadline(
        "Profile lookup",
        PROFILE_DEADLINE,
        fetch_profile(remote, identity),
        fallback_profile(identity),
    )
    .await;

    let subscription = with_deadline(
        "Subscription lookup",
        SUBSCRIPTION_DEADLINE,
        fetch_subscription(remote, identity),
        None,
    )
    .await;

    (profile, subscription)
}

/// Synthesizes an in-memory profile when the remote row is unavailable.
///
/// The fallback is never written back remotely. Name preference: provider
/// metadata, then the email local-part, then a fixed placeholder.
pub fn fallback_profile(identity: &Identity) -> Profile {
    let full_name = identity
        .metadata_str("full_name")
        .map(str::to_string)
        .or_else(|| {
            identity
                .email
                .as_deref()
                .and_then(|email| email.split('@').next())
                .filter(|local| !local.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| FALLBACK_NAME.to_string());

    Profile {
        id: identity.id,
        email: identity.email.clone(),
        full_name,
        role: Role::Client,
        referral_code: None,
        pro_months_balance: 0,
        is_verified: false,
        avatar_path: None,
    }
}

async fn fetch_profile<R: RemoteDataService>(
    remote: &R,
    identity: &Identity,
) -> Result<Profile, PortalError> {
    let row = remote
        .select_one("profiles", &[("id", identity.id.to_string())])
        .await?;

    match row {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| PortalError::RemoteApi(format!("Malformed profile row: {}", e))),
        None => {
            tracing::debug!("No profile row for {}, synthesizing fallback", identity.id);
            Ok(fallback_profile(identity))
        }
    }
}

async fn fetch_subscription<R: RemoteDataService>(
    remote: &R,
    identity: &Identity,
) -> Result<Option<Subscription>, PortalError> {
    let rows = remote
        .select_many(
            "subscriptions",
            &[("user_id", identity.id.to_string())],
            Some("created_at"),
            Some(SUBSCRIPTION_LOOKBACK),
        )
        .await?;

    Ok(pick_subscription(rows))
}

/// First row (in returned, most-recent-first order) whose status qualifies
/// for Pro; malformed rows are skipped rather than failing the lookup.
pub(crate) fn pick_subscription(rows: Vec<Value>) -> Option<Subscription> {
    for row in rows {
        match serde_json::from_value::<Subscription>(row) {
            Ok(subscription) if subscription.status.is_pro() => return Some(subscription),
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Skipping malformed subscription row: {}", e);
                continue;
            }
        }
    }
    None
}
