// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-installation device identity: an Ed25519 key pair kept in the
//! credential store and used to sign refresh requests.
//!
//! The server binds a refresh token to the public key registered at login,
//! so a leaked refresh token is useless from another device. Regenerating
//! the pair silently breaks that binding, so [`DeviceIdentity::ensure_keypair`]
//! only generates when no secret key is stored at all.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{SessionError, SessionResult};
use crate::store::{CredentialStore, StorageKeys};

/// Ed25519 seed length.
pub const SECRET_KEY_LEN: usize = 32;

/// Source of cryptographically secure random bytes.
pub trait RandomSource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> anyhow::Result<()>;
}

/// The operating system CSPRNG, via `ring`.
#[derive(Debug)]
pub struct SystemRandomSource {
    rng: ring::rand::SystemRandom,
}

impl SystemRandomSource {
    pub fn new() -> Self {
        Self { rng: ring::rand::SystemRandom::new() }
    }
}

impl Default for SystemRandomSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for SystemRandomSource {
    fn fill(&self, dest: &mut [u8]) -> anyhow::Result<()> {
        ring::rand::SecureRandom::fill(&self.rng, dest)
            .map_err(|_| anyhow::anyhow!("system random source unavailable"))
    }
}

/// A device key pair. The secret half is the 32-byte Ed25519 seed.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceKeyPair {
    pub public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
}

impl DeviceKeyPair {
    fn from_seed(seed: &[u8]) -> SessionResult<Self> {
        let pair = signing_key(seed)?;
        Ok(Self { public_key: pair.public_key().as_ref().to_vec(), secret_key: seed.to_vec() })
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(&self.public_key)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key)
    }
}

impl fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKeyPair")
            .field("public_key", &self.fingerprint())
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Short, log-safe identifier for a public key: hex of the first 8 bytes of
/// its SHA-256.
pub fn fingerprint(public_key: &[u8]) -> String {
    Sha256::digest(public_key).iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Serialize `payload` with object keys in sorted order, at every depth.
pub fn canonical_bytes<T: Serialize + ?Sized>(payload: &T) -> SessionResult<Vec<u8>> {
    let value = serde_json::to_value(payload)
        .map_err(|e| SessionError::Crypto(format!("serialize payload: {e}")))?;
    serde_json::to_vec(&sorted(value))
        .map_err(|e| SessionError::Crypto(format!("serialize payload: {e}")))
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// Check a detached signature produced by [`DeviceIdentity::sign`].
pub fn verify<T: Serialize + ?Sized>(public_key: &[u8], payload: &T, signature: &[u8]) -> bool {
    let Ok(message) = canonical_bytes(payload) else {
        return false;
    };
    UnparsedPublicKey::new(&ED25519, public_key).verify(&message, signature).is_ok()
}

fn signing_key(seed: &[u8]) -> SessionResult<Ed25519KeyPair> {
    if seed.len() != SECRET_KEY_LEN {
        return Err(SessionError::Crypto(format!(
            "secret key must be {SECRET_KEY_LEN} bytes, got {}",
            seed.len()
        )));
    }
    Ed25519KeyPair::from_seed_unchecked(seed)
        .map_err(|e| SessionError::Crypto(format!("rejected secret key: {e}")))
}

fn decode_key(name: &str, encoded: &str) -> SessionResult<Vec<u8>> {
    BASE64.decode(encoded).map_err(|_| SessionError::Crypto(format!("stored {name} is not base64")))
}

/// Owns the installation's key pair.
pub struct DeviceIdentity {
    store: Arc<dyn CredentialStore>,
    rng: Arc<dyn RandomSource>,
    /// Serializes provisioning so concurrent first-run callers share one pair.
    provision: Mutex<()>,
}

impl DeviceIdentity {
    pub fn new(store: Arc<dyn CredentialStore>, rng: Arc<dyn RandomSource>) -> Self {
        Self { store, rng, provision: Mutex::new(()) }
    }

    /// Return the stored key pair, creating it on first use.
    ///
    /// A stored secret key is authoritative: a missing or mismatched public
    /// key is re-derived from it rather than regenerating the pair. A fresh
    /// pair is generated only when no secret key is stored.
    pub async fn ensure_keypair(&self) -> SessionResult<DeviceKeyPair> {
        let _guard = self.provision.lock().await;

        let secret = self.stored(StorageKeys::DEVICE_SECRET_KEY).await?;
        let public = self.stored(StorageKeys::DEVICE_PUBLIC_KEY).await?;

        if let Some(secret) = secret {
            let pair = DeviceKeyPair::from_seed(&decode_key("secret key", &secret)?)?;
            let public_matches = match public.as_deref() {
                Some(p) => {
                    decode_key("public key", p).ok().as_deref() == Some(&pair.public_key[..])
                }
                None => false,
            };
            if !public_matches {
                warn!(
                    fingerprint = %pair.fingerprint(),
                    "device public key missing or stale, re-deriving from secret key"
                );
                self.store
                    .set(StorageKeys::DEVICE_PUBLIC_KEY, &pair.public_key_base64())
                    .await
                    .map_err(SessionError::storage)?;
            }
            return Ok(pair);
        }

        let mut seed = [0u8; SECRET_KEY_LEN];
        self.rng
            .fill(&mut seed)
            .map_err(|e| SessionError::Crypto(format!("generate device key: {e:#}")))?;
        let pair = DeviceKeyPair::from_seed(&seed)?;
        let secret_b64 = BASE64.encode(&pair.secret_key);
        let public_b64 = pair.public_key_base64();
        self.store
            .set_many(&[
                (StorageKeys::DEVICE_SECRET_KEY, secret_b64.as_str()),
                (StorageKeys::DEVICE_PUBLIC_KEY, public_b64.as_str()),
            ])
            .await
            .map_err(SessionError::storage)?;

        info!(fingerprint = %pair.fingerprint(), "provisioned device key pair");
        Ok(pair)
    }

    /// The stored public key, or `None` if none was ever provisioned.
    pub async fn public_key(&self) -> SessionResult<Option<Vec<u8>>> {
        match self.stored(StorageKeys::DEVICE_PUBLIC_KEY).await? {
            Some(encoded) => decode_key("public key", &encoded).map(Some),
            None => Ok(None),
        }
    }

    /// Detached signature over the canonical serialization of `payload`.
    ///
    /// Fails with [`SessionError::MissingKey`] until [`Self::ensure_keypair`]
    /// has run.
    pub async fn sign<T: Serialize + ?Sized + Sync>(&self, payload: &T) -> SessionResult<Vec<u8>> {
        let secret =
            self.stored(StorageKeys::DEVICE_SECRET_KEY).await?.ok_or(SessionError::MissingKey)?;
        let key = signing_key(&decode_key("secret key", &secret)?)?;
        let message = canonical_bytes(payload)?;
        Ok(key.sign(&message).as_ref().to_vec())
    }

    async fn stored(&self, key: &str) -> SessionResult<Option<String>> {
        self.store.get(key).await.map_err(SessionError::storage)
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
