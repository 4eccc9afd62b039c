// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secure credential storage: the key/value seam plus two backends.
//!
//! [`MemoryStore`] keeps everything in process; [`FileStore`] persists a JSON
//! map with atomic writes (write tmp + rename) so a crash never leaves a
//! half-written session behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Storage keys used by the session subsystem.
pub struct StorageKeys;

impl StorageKeys {
    pub const ACCESS_TOKEN: &'static str = "access_token";
    pub const REFRESH_TOKEN: &'static str = "refresh_token";
    pub const DEVICE_ID: &'static str = "device_id";
    /// Base64 Ed25519 seed.
    pub const DEVICE_SECRET_KEY: &'static str = "device_secret_key";
    /// Base64 Ed25519 public key.
    pub const DEVICE_PUBLIC_KEY: &'static str = "device_public_key";
    /// JSON-serialized signed-in user.
    pub const CURRENT_USER: &'static str = "current_user";

    /// Everything a sign-out removes. Device keys are deliberately absent.
    pub const SESSION: [&'static str; 4] =
        [Self::ACCESS_TOKEN, Self::REFRESH_TOKEN, Self::DEVICE_ID, Self::CURRENT_USER];
}

/// Durable, per-installation key/value store for credentials.
///
/// Implementations must be safe to share across tasks. `set_many` and
/// `delete_many` must apply atomically when the backend can; the default
/// bodies fall back to one call per key.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    async fn set_many(&self, entries: &[(&str, &str)]) -> anyhow::Result<()> {
        for (key, value) in entries {
            self.set(key, value).await?;
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[&str]) -> anyhow::Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries.write().await.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> anyhow::Result<()> {
        let mut map = self.entries.write().await;
        for (key, value) in entries {
            map.insert((*key).to_owned(), (*value).to_owned());
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[&str]) -> anyhow::Result<()> {
        let mut map = self.entries.write().await;
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// JSON-file store. Loaded on first access, rewritten whole on every change.
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cache: Mutex::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to the current map and persist the result. The write
    /// lock is held across load, change and save.
    async fn update<F>(&self, change: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut HashMap<String, String>) -> bool,
    {
        let mut cache = self.cache.lock().await;
        let mut map = match cache.take() {
            Some(map) => map,
            None => load(&self.path)?,
        };
        // On a failed save the cache stays empty and the next access reloads from disk.
        if change(&mut map) {
            save(&self.path, &map)?;
        }
        *cache = Some(map);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(load(&self.path)?);
        }
        Ok(cache.as_ref().and_then(|map| map.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.update(|map| map.insert(key.to_owned(), value.to_owned()).as_deref() != Some(value))
            .await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.update(|map| map.remove(key).is_some()).await
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> anyhow::Result<()> {
        self.update(|map| {
            let mut changed = false;
            for (key, value) in entries {
                changed |= map.insert((*key).to_owned(), (*value).to_owned()).as_deref()
                    != Some(*value);
            }
            changed
        })
        .await
    }

    async fn delete_many(&self, keys: &[&str]) -> anyhow::Result<()> {
        self.update(|map| {
            let mut changed = false;
            for key in keys {
                changed |= map.remove(*key).is_some();
            }
            changed
        })
        .await
    }
}

/// Read the credential map. A missing file is an empty store.
fn load(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no credential file yet");
            return Ok(HashMap::new());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("read {}", path.display()));
        }
    };
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Write the credential map atomically (unique tmp file + rename).
///
/// The temp name carries PID and a counter so concurrent writers from two
/// stores on the same path never share a tmp file.
fn save(path: &Path, map: &HashMap<String, String>) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(map)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    write_private(&tmp_path, json.as_bytes())
        .with_context(|| format!("write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path).with_context(|| format!("rename to {}", path.display()))?;
    debug!(path = %path.display(), entries = map.len(), "persisted credentials");
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file =
        std::fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
