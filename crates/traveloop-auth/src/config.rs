//! Authentication backend configuration.
//!
//! Loaded from the environment (after the caller runs `dotenvy::dotenv()`):
//! - `TRAVELOOP_BACKEND`: `local` (default) or `remote`
//! - `TRAVELOOP_API_URL` / `TRAVELOOP_API_KEY`: required for `remote`
//! - `TRAVELOOP_DATA_DIR`: overrides the default data directory

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::provider::{IdentityProvider, LocalProvider, RemoteProvider};
use crate::store::FileSessionStore;

/// Application name used for the data directory path
const APP_NAME: &str = "traveloop";

const ENV_BACKEND: &str = "TRAVELOOP_BACKEND";
const ENV_API_URL: &str = "TRAVELOOP_API_URL";
const ENV_API_KEY: &str = "TRAVELOOP_API_KEY";
const ENV_DATA_DIR: &str = "TRAVELOOP_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// No-backend demo mode over local account records
    Local,
    /// Hosted identity service over HTTP
    Remote,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let backend = match std::env::var(ENV_BACKEND).ok().as_deref() {
            None | Some("local") => Backend::Local,
            Some("remote") => Backend::Remote,
            Some(other) => bail!("unknown {} value: {}", ENV_BACKEND, other),
        };
        let api_url = std::env::var(ENV_API_URL).ok();
        let api_key = std::env::var(ENV_API_KEY).ok();
        let data_dir = std::env::var(ENV_DATA_DIR).ok().map(PathBuf::from);

        if backend == Backend::Remote && (api_url.is_none() || api_key.is_none()) {
            bail!(
                "remote backend requires {} and {} to be set",
                ENV_API_URL,
                ENV_API_KEY
            );
        }

        Ok(Self {
            backend,
            api_url,
            api_key,
            data_dir,
        })
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir().context("Could not find data directory")?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Build the identity provider this configuration selects.
    pub fn build_provider(&self) -> Result<Arc<dyn IdentityProvider>> {
        let data_dir = self.data_dir()?;
        match self.backend {
            Backend::Local => Ok(Arc::new(LocalProvider::new(data_dir))),
            Backend::Remote => {
                // Presence checked in from_env; guard anyway for hand-built configs.
                let api_url = self
                    .api_url
                    .as_ref()
                    .context("remote backend requires an API URL")?;
                let api_key = self
                    .api_key
                    .as_ref()
                    .context("remote backend requires an API key")?;
                let store = Arc::new(FileSessionStore::new(&data_dir));
                Ok(Arc::new(RemoteProvider::with_store(
                    api_url, api_key, store,
                )?))
            }
        }
    }
}
