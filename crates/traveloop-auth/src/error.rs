//! Error taxonomy for authentication operations.
//!
//! Expected failures (bad credentials, duplicate accounts) carry the exact
//! user-facing messages the UI shows. Provider outages and storage faults
//! map to their own variants so callers can tell "try again" from "fix your
//! input"; anything else is `Unknown` and means the operation did not
//! complete.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("User with this email already exists")]
    DuplicateAccount,

    #[error("Authentication service unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Session storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Unexpected authentication error: {0}")]
    Unknown(#[from] anyhow::Error),
}

/// Maximum length for error response bodies carried in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl AuthError {
    /// Truncate a response body to avoid logging excessive data. The body
    /// is arbitrary service output, so the cut must land on a char boundary.
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut cut = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..cut],
                body.len()
            )
        }
    }

    /// Map an HTTP status from the identity service to the taxonomy.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            400 | 401 => AuthError::InvalidCredentials,
            409 | 422 => AuthError::DuplicateAccount,
            429 => AuthError::ProviderUnavailable("rate limited".to_string()),
            500..=599 => AuthError::ProviderUnavailable(truncated),
            _ => AuthError::Unknown(anyhow::anyhow!("status {}: {}", status, truncated)),
        }
    }

    /// Expected failures are recoverable locally and shown to the user;
    /// everything else means the operation did not complete.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials | AuthError::DuplicateAccount
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            AuthError::ProviderUnavailable(err.to_string())
        } else {
            AuthError::Unknown(err.into())
        }
    }
}
