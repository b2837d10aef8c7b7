//! Remote identity provider backed by a hosted identity service.
//!
//! Speaks the GoTrue-style REST surface the Traveloop web client uses:
//! password grant for sign-in, signup and logout endpoints, and a user
//! endpoint to validate a restored token. Every operation is a single
//! round trip; there are no retries.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::AuthError;
use crate::provider::{IdentityProvider, SessionChange, CHANGE_CHANNEL_CAPACITY};
use crate::session::{Session, SessionRecord};
use crate::store::{MemorySessionStore, SessionStore};

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: UserPayload,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    email: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    name: Option<String>,
}

impl UserPayload {
    fn into_session(self) -> Session {
        Session {
            id: self.id,
            email: self.email,
            name: self.user_metadata.name,
            role: self.role,
        }
    }
}

pub struct RemoteProvider {
    client: Client,
    base_url: String,
    api_key: String,
    store: Arc<dyn SessionStore>,
    changes: broadcast::Sender<SessionChange>,
}

impl RemoteProvider {
    /// Create a provider for the identity service at `base_url`, keeping
    /// the restored session in memory only.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, AuthError> {
        Self::with_store(base_url, api_key, MemorySessionStore::new())
    }

    /// Create a provider with an explicit session store so a token survives
    /// restarts.
    pub fn with_store(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            store,
            changes,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    /// Check if a response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, AuthError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::from_status(status, &body))
        }
    }

    /// Signup failures share a 400/422 status with other validation errors;
    /// the body tells a duplicate account apart.
    fn classify_signup_error(status: StatusCode, body: &str) -> AuthError {
        let lowered = body.to_lowercase();
        if lowered.contains("already registered") || lowered.contains("already exists") {
            AuthError::DuplicateAccount
        } else {
            AuthError::from_status(status, body)
        }
    }

    async fn establish(&self, token: TokenResponse) -> Result<Session, AuthError> {
        let session = token.user.into_session();
        self.store
            .save(&SessionRecord::new(
                session.clone(),
                Some(token.access_token),
            ))
            .await?;
        let _ = self.changes.send(SessionChange::Established(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl IdentityProvider for RemoteProvider {
    /// Validate the persisted token against the user endpoint. A rejected
    /// token clears the record and reports no session; a network failure
    /// propagates so the caller can decide.
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(record) = self.store.load().await? else {
            return Ok(None);
        };
        let Some(token) = record.access_token else {
            return Ok(Some(record.session));
        };

        let response = self
            .client
            .get(self.url("user"))
            .header("apikey", &self.api_key)
            .bearer_auth(&token)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("persisted token rejected, clearing session record");
            self.store.clear().await?;
            return Ok(None);
        }

        let response = Self::check_response(response).await?;
        let user: UserPayload = response
            .json()
            .await
            .map_err(|e| AuthError::Unknown(e.into()))?;

        // The service may report a differing session (refreshed identity);
        // the fresh copy silently replaces the persisted one.
        let session = user.into_session();
        if session != record.session {
            self.store
                .save(&SessionRecord::new(session.clone(), Some(token)))
                .await?;
        }
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let response = self
            .client
            .post(self.url("token?grant_type=password"))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Unknown(e.into()))?;

        info!(email = %token.user.email, "remote sign-in succeeded");
        self.establish(token).await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Session, AuthError> {
        let mut body = serde_json::json!({ "email": email, "password": password });
        if let Some(name) = name {
            body["data"] = serde_json::json!({ "name": name });
        }

        let response = self
            .client
            .post(self.url("signup"))
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Self::classify_signup_error(status, &text));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Unknown(e.into()))?;

        info!(email = %token.user.email, "remote account created");
        self.establish(token).await
    }

    /// Revoke the token with the service. The local record is cleared
    /// first so a failed revocation can never leave a restorable session
    /// behind.
    async fn sign_out(&self) -> Result<(), AuthError> {
        let record = self.store.load().await?;
        self.store.clear().await?;
        let _ = self.changes.send(SessionChange::Ended);

        let Some(token) = record.and_then(|r| r.access_token) else {
            return Ok(());
        };

        let response = self
            .client
            .post(self.url("logout"))
            .header("apikey", &self.api_key)
            .bearer_auth(&token)
            .header(header::CONTENT_LENGTH, 0)
            .send()
            .await?;

        if let Err(e) = Self::check_response(response).await {
            warn!(error = %e, "remote sign-out failed after local clear");
            return Err(e);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================
