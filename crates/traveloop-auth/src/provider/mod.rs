//! Identity provider abstraction.
//!
//! The `SessionManager` delegates every authentication operation to an
//! `IdentityProvider`. Two adapters exist behind the same interface:
//! - `LocalProvider`: no-backend demo mode over JSON account records
//! - `RemoteProvider`: a hosted identity service over HTTP
//!
//! Providers also push `SessionChange` notifications for session changes
//! that happen outside a direct call (token refresh, revocation).

pub mod local;
pub mod remote;

pub use local::LocalProvider;
pub use remote::RemoteProvider;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::AuthError;
use crate::session::Session;

/// Capacity of the change-notification channel. Session changes are rare;
/// a small buffer only has to absorb short bursts.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// A provider-initiated session change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Established(Session),
    Ended,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// One-shot query for an existing session, used at startup.
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Session, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Subscribe to session-change notifications. Dropping the receiver
    /// unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;
}
