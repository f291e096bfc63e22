//! Opaque API key validation against the hashed key store.

use std::sync::Arc;

use crate::context::{AuthContext, AuthMethod};
use crate::crypto::hash_secret;
use crate::error::{AuthError, Result};
use crate::keystore::KeyStore;

pub struct ApiKeyResolver {
    store: Arc<KeyStore>,
}

impl ApiKeyResolver {
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self { store }
    }

    /// Only the hash of the presented secret ever touches the store;
    /// plaintext keys are never persisted or logged.
    pub fn resolve(&self, presented: &str) -> Result<AuthContext> {
        if presented.is_empty() {
            return Err(AuthError::MissingKey);
        }

        let hash = hash_secret(presented);
        let stored = self.store.lookup(&hash).ok_or(AuthError::UnknownKey)?;

        if stored.revoked_at.is_some() {
            return Err(AuthError::RevokedKey);
        }

        let now = chrono::Utc::now().timestamp();
        if let Some(expires_at) = stored.expires_at {
            if expires_at <= now {
                return Err(AuthError::ExpiredKey);
            }
        }

        self.store.touch(&stored.id, now);

        Ok(AuthContext {
            method: AuthMethod::ApiKey,
            principal_id: stored.id,
            roles: stored.roles,
            expires_at: stored.expires_at,
        })
    }
}
