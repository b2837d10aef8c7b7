//! Session and authentication core for Traveloop.
//!
//! This crate provides:
//! - `SessionManager`: the single source of truth for the current session,
//!   with login/register/logout, startup restoration, and a read-only
//!   watch subscription for consumers
//! - `IdentityProvider`: the external identity service abstraction, with a
//!   local demo adapter and a remote HTTP adapter
//! - `SessionStore`: typed, swappable persistence for the session record
//!
//! Expected authentication failures surface as `AuthError` values carrying
//! user-facing messages; they never panic the caller.

pub mod config;
pub mod error;
pub mod manager;
pub mod provider;
pub mod session;
pub mod store;

pub use config::{Backend, Config};
pub use error::AuthError;
pub use manager::SessionManager;
pub use provider::{IdentityProvider, LocalProvider, RemoteProvider, SessionChange};
pub use session::{AuthState, Session, SessionRecord};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
