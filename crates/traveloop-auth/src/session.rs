//! Session types shared across the crate.
//!
//! A `Session` describes the currently authenticated principal. `AuthState`
//! is the observable state machine published by the `SessionManager`, and
//! `SessionRecord` is the envelope the storage backends persist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated principal: an opaque stable id plus identifying
/// attributes. Absence of a session means unauthenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Observable authentication state.
///
/// `Initializing` is only ever observed between construction of the
/// `SessionManager` and the completion of its one-shot startup session
/// check; after that the state is permanently `Authenticated` or
/// `Unauthenticated` until teardown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Initializing,
    Authenticated(Session),
    Unauthenticated,
}

impl AuthState {
    /// True only during the initial startup session check.
    pub fn is_loading(&self) -> bool {
        matches!(self, AuthState::Initializing)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }

    /// The current session, if any.
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

/// Persisted session envelope: the session itself, the provider access
/// token when the backend issues one, and the creation timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: Session,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session: Session, access_token: Option<String>) -> Self {
        Self {
            session,
            access_token,
            created_at: Utc::now(),
        }
    }
}
