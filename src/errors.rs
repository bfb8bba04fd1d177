use std::fmt;

/// Application-specific error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    /// Remote row or RPC endpoint failure.
    RemoteApi(String),
    /// Credentials rejected by the auth service.
    InvalidCredentials(String),
    /// Email address already registered.
    EmailInUse(String),
    /// Email address not confirmed yet.
    EmailNotConfirmed(String),
    /// Invalid input (malformed email, short password, bad referral code).
    BadRequest(String),
    /// Deadline elapsed waiting on the remote service.
    Timeout(String),
    /// A write collided with an existing row (unique-constraint conflict).
    Conflict(String),
    /// Operation requires an authenticated session.
    Unauthorized(String),
    /// No remote service configured.
    ServiceUnavailable,
}

impl fmt::Display for PortalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalError::RemoteApi(msg) => write!(f, "Remote API error: {}", msg),
            PortalError::InvalidCredentials(msg) => write!(f, "Invalid credentials: {}", msg),
            PortalError::EmailInUse(msg) => write!(f, "Email already in use: {}", msg),
            PortalError::EmailNotConfirmed(msg) => write!(f, "Email not confirmed: {}", msg),
            PortalError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            PortalError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            PortalError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            PortalError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            PortalError::ServiceUnavailable => write!(f, "Remote service unavailable"),
        }
    }
}

impl std::error::Error for PortalError {}

impl From<reqwest::Error> for PortalError {
    /// Converts a `reqwest::Error` into a `PortalError`.
    ///
    /// Client-level timeouts map to `Timeout` so callers can fall back the
    /// same way they do for deadline races.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PortalError::Timeout(err.to_string())
        } else {
            PortalError::RemoteApi(err.to_string())
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `PortalError` type.
pub trait ResultExt<T> {
    /// Add context to an error message.
    fn context(self, context: impl Into<String>) -> Result<T, PortalError>;
}

impl<T> ResultExt<T> for Result<T, PortalError> {
    fn context(self, context: impl Into<String>) -> Result<T, PortalError> {
        self.map_err(|e| match e {
            PortalError::RemoteApi(msg) => {
                PortalError::RemoteApi(format!("{}: {}", context.into(), msg))
            }
            PortalError::Timeout(msg) => {
                PortalError::Timeout(format!("{}: {}", context.into(), msg))
            }
            other => other,
        })
    }
}

impl<T> ResultExt<T> for Result<T, reqwest::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, PortalError> {
        self.map_err(PortalError::from).context(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_prepends_message() {
        let err: Result<(), PortalError> = Err(PortalError::RemoteApi("500".to_string()));
        let wrapped = err.context("fetching profile").unwrap_err();
        assert_eq!(
            wrapped,
            PortalError::RemoteApi("fetching profile: 500".to_string())
        );
    }

    #[test]
    fn test_context_leaves_credential_errors_alone() {
        let err: Result<(), PortalError> =
            Err(PortalError::InvalidCredentials("bad password".to_string()));
        let wrapped = err.context("signing in").unwrap_err();
        assert_eq!(
            wrapped,
            PortalError::InvalidCredentials("bad password".to_string())
        );
    }
}
