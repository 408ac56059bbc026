//! Encrypted session vault
//!
//! The vault keeps one serialized session bundle under a fixed storage key,
//! encrypted with AES-256-GCM. The encryption key is derived from a
//! deploy-configuration secret, so this deters casual inspection of the
//! store but is not a boundary against a local attacker with the build
//! config in hand.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::kv::{KvError, KvStore, Subscription};

/// Storage key the encrypted session blob lives under
const SESSION_STORAGE_KEY: &str = "session";

/// Environment variable supplying the vault secret
const SECRET_ENV_VAR: &str = "SKYLARK_SESSION_SECRET";

/// Development fallback when no secret is configured
const FALLBACK_SECRET: &str = "skylark-dev-session-secret";

/// AES-GCM nonce size in bytes
const NONCE_LEN: usize = 12;

/// Vault error types
#[derive(Debug, Error)]
pub enum VaultError {
    /// Underlying key-value store error
    #[error("Store error: {0}")]
    Store(#[from] KvError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Encryption failed
    #[error("Encryption failed")]
    Encryption,

    /// Persisted blob could not be decoded or decrypted
    #[error("Persisted session is corrupt: {0}")]
    Corrupt(String),
}

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Vault configuration
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Secret the encryption key is derived from
    pub secret: String,
    /// Storage key for the session blob
    pub storage_key: String,
}

impl VaultConfig {
    /// Create a configuration with an explicit secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into(), storage_key: SESSION_STORAGE_KEY.to_string() }
    }

    /// Read the secret from deploy configuration, falling back to the
    /// development default when unset
    pub fn from_env() -> Self {
        let secret =
            std::env::var(SECRET_ENV_VAR).unwrap_or_else(|_| FALLBACK_SECRET.to_string());
        Self::new(secret)
    }
}

/// Encrypted session vault over a [`KvStore`]
///
/// Vaults built over clones of the same store share one persisted-storage
/// scope; [`SessionVault::watch`] is how one of them observes the others'
/// writes and removals.
pub struct SessionVault {
    kv: KvStore,
    cipher: Aes256Gcm,
    storage_key: String,
}

impl SessionVault {
    /// Create a vault over the given store
    pub fn new(kv: KvStore, config: &VaultConfig) -> Self {
        let key = Sha256::digest(config.secret.as_bytes());
        // Sha256 output is exactly the AES-256 key size.
        let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key");

        Self { kv, cipher, storage_key: config.storage_key.clone() }
    }

    /// Encrypt and persist a session bundle, replacing any previous one
    pub fn store<T: Serialize>(&self, value: &T) -> Result<()> {
        let plaintext = serde_json::to_vec(value)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| VaultError::Encryption)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        self.kv.set(&self.storage_key, &BASE64.encode(blob))?;
        debug!(key = %self.storage_key, "Session bundle persisted");
        Ok(())
    }

    /// Load and decrypt the persisted session bundle
    ///
    /// Returns `Ok(None)` when nothing is persisted. A blob that cannot be
    /// decoded, decrypted, or deserialized yields [`VaultError::Corrupt`];
    /// callers treat that as "no session" and clear the vault.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let Some(encoded) = self.kv.get::<String>(&self.storage_key)? else {
            return Ok(None);
        };

        let blob = BASE64
            .decode(&encoded)
            .map_err(|e| VaultError::Corrupt(format!("base64: {e}")))?;

        if blob.len() < NONCE_LEN {
            return Err(VaultError::Corrupt("blob shorter than nonce".to_string()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::Corrupt("decryption failed".to_string()))?;

        let value = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::Corrupt(format!("deserialize: {e}")))?;

        Ok(Some(value))
    }

    /// Remove the persisted session bundle, returning whether one existed
    pub fn clear(&self) -> Result<bool> {
        let existed = self.kv.remove(&self.storage_key)?;
        if existed {
            debug!(key = %self.storage_key, "Session bundle cleared");
        }
        Ok(existed)
    }

    /// Check whether a session bundle is persisted
    pub fn is_populated(&self) -> Result<bool> {
        Ok(self.kv.contains(&self.storage_key)?)
    }

    /// Subscribe to changes of the session blob
    ///
    /// Fires for stores and clears issued through any vault sharing this
    /// storage scope.
    pub fn watch(&self) -> Subscription {
        self.kv.watch(&self.storage_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Bundle {
        access: String,
        refresh: String,
        did: String,
    }

    fn bundle() -> Bundle {
        Bundle {
            access: "access_token".to_string(),
            refresh: "refresh_token".to_string(),
            did: "did:plc:abc123".to_string(),
        }
    }

    fn vault(secret: &str) -> SessionVault {
        SessionVault::new(KvStore::in_memory().unwrap(), &VaultConfig::new(secret))
    }

    #[test]
    fn test_store_and_load() {
        let vault = vault("secret");

        vault.store(&bundle()).unwrap();
        let loaded: Option<Bundle> = vault.load().unwrap();
        assert_eq!(loaded, Some(bundle()));
    }

    #[test]
    fn test_load_empty() {
        let vault = vault("secret");
        let loaded: Option<Bundle> = vault.load().unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_blob_is_not_plaintext() {
        let kv = KvStore::in_memory().unwrap();
        let vault = SessionVault::new(kv.clone(), &VaultConfig::new("secret"));

        vault.store(&bundle()).unwrap();

        let raw: String = kv.get(SESSION_STORAGE_KEY).unwrap().unwrap();
        assert!(!raw.contains("access_token"));
        assert!(!raw.contains("did:plc:abc123"));
    }

    #[test]
    fn test_wrong_key_is_corrupt() {
        let kv = KvStore::in_memory().unwrap();

        let writer = SessionVault::new(kv.clone(), &VaultConfig::new("secret-a"));
        writer.store(&bundle()).unwrap();

        let reader = SessionVault::new(kv, &VaultConfig::new("secret-b"));
        let result: Result<Option<Bundle>> = reader.load();
        assert!(matches!(result, Err(VaultError::Corrupt(_))));
    }

    #[test]
    fn test_garbage_blob_is_corrupt() {
        let kv = KvStore::in_memory().unwrap();
        kv.set(SESSION_STORAGE_KEY, &"not even base64!!".to_string()).unwrap();

        let vault = SessionVault::new(kv, &VaultConfig::new("secret"));
        let result: Result<Option<Bundle>> = vault.load();
        assert!(matches!(result, Err(VaultError::Corrupt(_))));
    }

    #[test]
    fn test_clear() {
        let vault = vault("secret");

        vault.store(&bundle()).unwrap();
        assert!(vault.is_populated().unwrap());

        assert!(vault.clear().unwrap());
        assert!(!vault.is_populated().unwrap());
        assert!(!vault.clear().unwrap());
    }

    #[test]
    fn test_watch_sees_clear_from_sibling() {
        let kv = KvStore::in_memory().unwrap();
        let a = SessionVault::new(kv.clone(), &VaultConfig::new("secret"));
        let b = SessionVault::new(kv, &VaultConfig::new("secret"));

        a.store(&bundle()).unwrap();

        let mut sub = b.watch();
        a.clear().unwrap();

        assert!(sub.changed_blocking());
    }
}
