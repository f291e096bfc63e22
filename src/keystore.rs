//! In-memory API key store, indexed by key hash.
//!
//! Keys are provisioned by bootstrap/ops tooling; the store only ever
//! sees hashes of the plaintext (see `crypto::hash_secret`), so raw
//! keys exist nowhere but the moment of creation.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::Serialize;
use uuid::Uuid;

use crate::crypto::hash_secret;

#[derive(Debug, Clone, Serialize)]
pub struct StoredApiKey {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub roles: HashSet<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<i64>,
}

/// Generate a new opaque API key. Not JWT-shaped on purpose: the
/// bearer slot disambiguates by token shape.
pub fn generate_api_key() -> String {
    format!("mg_{}", Uuid::new_v4().simple())
}

#[derive(Default)]
pub struct KeyStore {
    /// key hash → stored key
    keys: RwLock<HashMap<String, StoredApiKey>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and store a new key. Returns the record and the plaintext
    /// key; the plaintext is never visible again after this call.
    pub fn create(
        &self,
        name: &str,
        roles: HashSet<String>,
        expires_at: Option<i64>,
    ) -> (StoredApiKey, String) {
        let plaintext = generate_api_key();
        let record = self.provision(name, &plaintext, roles, expires_at);
        (record, plaintext)
    }

    /// Store a key with caller-supplied plaintext (bootstrap, tests).
    pub fn provision(
        &self,
        name: &str,
        plaintext: &str,
        roles: HashSet<String>,
        expires_at: Option<i64>,
    ) -> StoredApiKey {
        let record = StoredApiKey {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            key_hash: hash_secret(plaintext),
            roles,
            created_at: chrono::Utc::now().timestamp(),
            last_used_at: None,
            expires_at,
            revoked_at: None,
        };
        let mut keys = self.keys.write().unwrap_or_else(|p| p.into_inner());
        keys.insert(record.key_hash.clone(), record.clone());
        record
    }

    /// Look up a key by the hash of its plaintext.
    pub fn lookup(&self, key_hash: &str) -> Option<StoredApiKey> {
        let keys = self.keys.read().unwrap_or_else(|p| p.into_inner());
        keys.get(key_hash).cloned()
    }

    /// Record that a key was used. Best-effort bookkeeping; callers
    /// fire this off the request path.
    pub fn touch(&self, key_id: &str, now: i64) {
        let mut keys = self.keys.write().unwrap_or_else(|p| p.into_inner());
        match keys.values_mut().find(|k| k.id == key_id) {
            Some(key) => key.last_used_at = Some(now),
            None => tracing::debug!(key_id, "last-used update for unknown key"),
        }
    }

    pub fn revoke(&self, key_id: &str) -> bool {
        let mut keys = self.keys.write().unwrap_or_else(|p| p.into_inner());
        match keys.values_mut().find(|k| k.id == key_id) {
            Some(key) => {
                key.revoked_at = Some(chrono::Utc::now().timestamp());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_generated_keys_are_opaque() {
        let key = generate_api_key();
        assert!(key.starts_with("mg_"));
        assert!(!key.contains('.'));
    }

    #[test]
    fn test_create_and_lookup_by_hash() {
        let store = KeyStore::new();
        let (record, plaintext) = store.create("ci", roles(&["service"]), None);

        let found = store.lookup(&hash_secret(&plaintext)).expect("key should exist");
        assert_eq!(found.id, record.id);
        assert!(found.roles.contains("service"));

        assert!(store.lookup(&hash_secret("mg_wrong")).is_none());
    }

    #[test]
    fn test_touch_updates_last_used() {
        let store = KeyStore::new();
        let (record, _) = store.create("ci", roles(&["service"]), None);
        assert!(store.lookup(&record.key_hash).unwrap().last_used_at.is_none());

        store.touch(&record.id, 1234);
        assert_eq!(store.lookup(&record.key_hash).unwrap().last_used_at, Some(1234));
    }

    #[test]
    fn test_revoke() {
        let store = KeyStore::new();
        let (record, _) = store.create("ci", roles(&[]), None);
        assert!(store.revoke(&record.id));
        assert!(store.lookup(&record.key_hash).unwrap().revoked_at.is_some());
        assert!(!store.revoke("no-such-id"));
    }
}
