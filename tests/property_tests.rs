/// Property-based tests using proptest
/// Covers the input validators, the OAuth return-path coercion, fallback
/// name derivation, and the referral-attempt TTL boundary.
use chrono::{Duration as ChronoDuration, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use portal_session::controller::{is_valid_email, sanitize_return_path, ALLOWED_RETURN_PATHS};
use portal_session::hydrator::{fallback_profile, FALLBACK_NAME};
use portal_session::models::{Identity, ReferralAttempt};
use portal_session::referral::{is_valid_referral_code, ATTEMPT_TTL_SECONDS};

fn identity_with_email(email: Option<String>) -> Identity {
    Identity {
        id: Uuid::new_v4(),
        email,
        email_confirmed_at: None,
        metadata: serde_json::Map::new(),
    }
}

// Property: validators should never panic, whatever the input
proptest! {
    #[test]
    fn email_validation_never_panics(email in "\\PC*") {
        let _ = is_valid_email(&email);
    }

    #[test]
    fn referral_code_validation_never_panics(code in "\\PC*") {
        let _ = is_valid_referral_code(&code);
    }

    #[test]
    fn well_formed_codes_are_accepted(code in "[A-Za-z0-9_-]{4,16}") {
        prop_assert!(is_valid_referral_code(&code));
    }
}

// Property: the return path is always a member of the allow-list
proptest! {
    #[test]
    fn sanitized_path_is_always_allow_listed(requested in "\\PC*") {
        let sanitized = sanitize_return_path(&requested);
        prop_assert!(ALLOWED_RETURN_PATHS.contains(&sanitized));
    }

    #[test]
    fn allow_listed_paths_pass_through(idx in 0..ALLOWED_RETURN_PATHS.len()) {
        let path = ALLOWED_RETURN_PATHS[idx];
        prop_assert_eq!(sanitize_return_path(path), path);
    }
}

// Property: fallback name derivation
proptest! {
    #[test]
    fn fallback_name_is_email_local_part(
        local in "[a-z][a-z0-9]{0,7}",
        domain in "[a-z]{1,8}",
        tld in "[a-z]{2,4}"
    ) {
        let email = format!("{}@{}.{}", local, domain, tld);
        let profile = fallback_profile(&identity_with_email(Some(email)));
        prop_assert_eq!(profile.full_name, local);
    }

    #[test]
    fn fallback_name_is_never_empty(email in proptest::option::of("\\PC{0,20}")) {
        let profile = fallback_profile(&identity_with_email(email));
        prop_assert!(!profile.full_name.is_empty());
    }
}

#[test]
fn fallback_name_placeholder_without_email() {
    let profile = fallback_profile(&identity_with_email(None));
    assert_eq!(profile.full_name, FALLBACK_NAME);
}

// Property: the TTL boundary is exact
proptest! {
    #[test]
    fn attempt_expiry_matches_ttl(age_seconds in 0i64..100_000) {
        let now = Utc::now();
        let attempt = ReferralAttempt {
            code: "FRIEND1".to_string(),
            stored_at: now - ChronoDuration::seconds(age_seconds),
        };
        let expired = attempt.age(now).num_seconds() > ATTEMPT_TTL_SECONDS;
        prop_assert_eq!(expired, age_seconds > ATTEMPT_TTL_SECONDS);
    }
}
