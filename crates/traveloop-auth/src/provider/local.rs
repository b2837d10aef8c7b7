//! Local identity provider for the no-backend demo mode.
//!
//! Accounts live in a `users.json` file under the data directory with
//! argon2id password hashes; the current session goes through the
//! `SessionStore`. Raw passwords are never written anywhere. An optional
//! simulated latency mimics a real provider round trip.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::error::AuthError;
use crate::provider::{IdentityProvider, SessionChange, CHANGE_CHANNEL_CAPACITY};
use crate::session::{Session, SessionRecord};
use crate::store::{FileSessionStore, SessionStore};

/// Account records file name in the data directory
const USERS_FILE: &str = "users.json";

/// Role assigned to accounts created through registration
const DEFAULT_ROLE: &str = "user";

/// Length of the random suffix in generated account ids
const ID_SUFFIX_LEN: usize = 9;

/// A registered account. The password is stored as an argon2id hash only.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredAccount {
    id: String,
    email: String,
    password_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    role: String,
    created_at: DateTime<Utc>,
}

impl StoredAccount {
    fn to_session(&self) -> Session {
        Session {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            role: Some(self.role.clone()),
        }
    }
}

pub struct LocalProvider {
    users_path: PathBuf,
    store: Arc<dyn SessionStore>,
    changes: broadcast::Sender<SessionChange>,
    latency: Duration,
    // Serializes read-modify-write cycles on the accounts file
    accounts_lock: Mutex<()>,
}

impl LocalProvider {
    /// Create a provider keeping accounts and the session file under
    /// `data_dir`.
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        let data_dir = data_dir.into();
        let store = Arc::new(FileSessionStore::new(&data_dir));
        Self::with_store(data_dir, store)
    }

    /// Create a provider with an explicit session store.
    pub fn with_store<P: Into<PathBuf>>(data_dir: P, store: Arc<dyn SessionStore>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            users_path: data_dir.into().join(USERS_FILE),
            store,
            changes,
            latency: Duration::ZERO,
            accounts_lock: Mutex::new(()),
        }
    }

    /// Simulate provider round-trip latency on every operation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn load_accounts(&self) -> Result<Vec<StoredAccount>, AuthError> {
        if !self.users_path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.users_path)
            .await
            .map_err(|e| AuthError::Storage(e.into()))?;
        serde_json::from_str(&contents).map_err(|e| AuthError::Storage(e.into()))
    }

    async fn save_accounts(&self, accounts: &[StoredAccount]) -> Result<(), AuthError> {
        if let Some(parent) = self.users_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AuthError::Storage(e.into()))?;
        }
        let contents =
            serde_json::to_string_pretty(accounts).map_err(|e| AuthError::Storage(e.into()))?;
        fs::write(&self.users_path, contents)
            .await
            .map_err(|e| AuthError::Storage(e.into()))?;
        Ok(())
    }

    async fn establish(&self, session: Session) -> Result<Session, AuthError> {
        self.store
            .save(&SessionRecord::new(session.clone(), None))
            .await?;
        let _ = self.changes.send(SessionChange::Established(session.clone()));
        Ok(session)
    }

    fn hash_password(password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::Unknown(anyhow::anyhow!("password hashing failed: {e}")))
    }

    fn verify_password(password: &str, hash: &str) -> bool {
        PasswordHash::new(hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    fn new_account_id() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(char::from)
            .collect();
        format!(
            "user_{}_{}",
            Utc::now().timestamp_millis(),
            suffix.to_lowercase()
        )
    }
}

#[async_trait]
impl IdentityProvider for LocalProvider {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        self.simulate_latency().await;
        Ok(self.store.load().await?.map(|record| record.session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.simulate_latency().await;

        let accounts = self.load_accounts().await?;
        let account = accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email.trim()))
            .ok_or(AuthError::InvalidCredentials)?;

        if !Self::verify_password(password, &account.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        info!(email = %account.email, "local sign-in succeeded");
        self.establish(account.to_session()).await
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<Session, AuthError> {
        self.simulate_latency().await;

        let email = email.trim();
        let _guard = self.accounts_lock.lock().await;

        let mut accounts = self.load_accounts().await?;
        if accounts.iter().any(|a| a.email.eq_ignore_ascii_case(email)) {
            return Err(AuthError::DuplicateAccount);
        }

        let account = StoredAccount {
            id: Self::new_account_id(),
            email: email.to_string(),
            password_hash: Self::hash_password(password)?,
            name: name.map(str::to_string),
            role: DEFAULT_ROLE.to_string(),
            created_at: Utc::now(),
        };
        accounts.push(account.clone());
        self.save_accounts(&accounts).await?;

        info!(email = %account.email, id = %account.id, "local account created");
        self.establish(account.to_session()).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.simulate_latency().await;
        self.store.clear().await?;
        debug!("local session cleared");
        let _ = self.changes.send(SessionChange::Ended);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================
