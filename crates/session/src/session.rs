// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session facade: one handle over store, endpoint, device identity and
//! refresh coordination.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::coordinator::{RefreshCoordinator, RefreshPhase, DEFAULT_REFRESH_TIMEOUT};
use crate::device::{self, DeviceIdentity, RandomSource, SystemRandomSource};
use crate::endpoint::{
    AuthEndpoint, DeviceRegistration, LoginRequest, RefreshRequest, RegisteredDevice,
    SessionUser, SignedPayload, TokenPair,
};
use crate::error::{SessionError, SessionResult};
use crate::jwt::{self, DEFAULT_SKEW_SECS};
use crate::store::{CredentialStore, StorageKeys};

/// Tunables for [`SessionTokens`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Seconds before `exp` at which the access token is refreshed.
    pub skew_secs: u64,
    /// Bound on one refresh, network call and persistence included.
    pub refresh_timeout: Duration,
    /// Fail a refresh instead of sending it unsigned when the device key is
    /// unavailable.
    pub require_signature: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            skew_secs: DEFAULT_SKEW_SECS,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            require_signature: false,
        }
    }
}

/// Point-in-time view of the stored session. Carries no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub signed_in: bool,
    pub user: Option<SessionUser>,
    pub device_id: Option<String>,
    pub has_refresh_token: bool,
    pub access_token_fresh: bool,
    /// Seconds until the stored access token's `exp`.
    pub access_token_expires_in: Option<u64>,
    pub device_fingerprint: Option<String>,
    pub refresh_phase: RefreshPhase,
}

/// Keeps a client authenticated.
///
/// Cheap to clone; clones share the store, the coordinator and the write
/// gate, so concurrent callers on any clone are deduplicated together.
#[derive(Clone)]
pub struct SessionTokens {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn AuthEndpoint>,
    identity: Arc<DeviceIdentity>,
    coordinator: Arc<RefreshCoordinator>,
    /// Serializes persisting a refreshed pair against sign-out and login, so
    /// a refresh that loses the race cannot bring cleared tokens back.
    write_gate: Arc<Mutex<()>>,
    settings: SessionSettings,
}

/// Builder for [`SessionTokens`] with non-default settings or randomness.
pub struct SessionTokensBuilder {
    settings: SessionSettings,
    rng: Option<Arc<dyn RandomSource>>,
}

impl SessionTokensBuilder {
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn random_source(mut self, rng: Arc<dyn RandomSource>) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn build(
        self,
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn AuthEndpoint>,
    ) -> SessionTokens {
        let rng = self.rng.unwrap_or_else(|| Arc::new(SystemRandomSource::new()));
        SessionTokens {
            identity: Arc::new(DeviceIdentity::new(Arc::clone(&store), rng)),
            coordinator: RefreshCoordinator::new(self.settings.refresh_timeout),
            write_gate: Arc::new(Mutex::new(())),
            store,
            endpoint,
            settings: self.settings,
        }
    }
}

impl SessionTokens {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn AuthEndpoint>,
        settings: SessionSettings,
    ) -> Self {
        Self::builder().settings(settings).build(store, endpoint)
    }

    pub fn builder() -> SessionTokensBuilder {
        SessionTokensBuilder { settings: SessionSettings::default(), rng: None }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// A usable access token, refreshing first when the stored one is stale.
    ///
    /// Concurrent callers that find the token stale share a single refresh
    /// and all observe its outcome.
    pub async fn get_valid_access_token(&self) -> SessionResult<String> {
        if let Some(token) = self.fresh_access_token().await? {
            debug!("stored access token is fresh");
            return Ok(token);
        }

        let this = self.clone();
        let pair =
            self.coordinator.run(move |epoch| async move { this.refresh(epoch).await }).await?;
        Ok(pair.access_token)
    }

    /// Body of one refresh, run by the coordinator's leader under `epoch`.
    async fn refresh(&self, epoch: u64) -> SessionResult<TokenPair> {
        let refresh_token = self.stored(StorageKeys::REFRESH_TOKEN).await?;
        let device_id = self.stored(StorageKeys::DEVICE_ID).await?;

        // A refresh that finished between the caller's check and this
        // election already stored a fresh token.
        if let Some(access_token) = self.fresh_access_token().await? {
            debug!(epoch, "access token became fresh before refresh started");
            return Ok(TokenPair {
                access_token,
                refresh_token: refresh_token.unwrap_or_default(),
                device_id: device_id.unwrap_or_default(),
            });
        }

        let missing_context = |missing| SessionError::MissingRefreshContext { missing };
        let refresh_token = refresh_token.ok_or(missing_context(StorageKeys::REFRESH_TOKEN))?;
        let device_id = device_id.ok_or(missing_context(StorageKeys::DEVICE_ID))?;
        let user_id = self.current_user().await?.map(|u| u.id).ok_or(missing_context("user_id"))?;

        let payload = SignedPayload {
            user_id,
            device_id,
            refresh_token,
            timestamp: jwt::now_secs(),
        };
        let request = match self.identity.sign(&payload).await {
            Ok(signature) => RefreshRequest::signed(payload, BASE64.encode(signature)),
            Err(e) if self.settings.require_signature => return Err(e),
            Err(e) => {
                warn!(err = %e, device_id = %payload.device_id, "sending unsigned refresh");
                RefreshRequest::unsigned(payload.user_id, payload.device_id, payload.refresh_token)
            }
        };

        let pair = self.endpoint.refresh(&request).await?;

        let _gate = self.write_gate.lock().await;
        if !self.coordinator.is_current(epoch) {
            debug!(epoch, "session reset during refresh, dropping new tokens");
            return Err(SessionError::SessionInvalidated);
        }
        self.store
            .set_many(&[
                (StorageKeys::ACCESS_TOKEN, pair.access_token.as_str()),
                (StorageKeys::REFRESH_TOKEN, pair.refresh_token.as_str()),
                (StorageKeys::DEVICE_ID, pair.device_id.as_str()),
            ])
            .await
            .map_err(SessionError::storage)?;
        info!(epoch, user_id = %request.user_id, device_id = %pair.device_id, "session refreshed");
        Ok(pair)
    }

    /// Clear the session. The device key pair is kept.
    ///
    /// An in-flight refresh is abandoned and its waiters receive
    /// [`SessionError::SessionInvalidated`].
    pub async fn sign_out(&self) -> SessionResult<()> {
        let _gate = self.write_gate.lock().await;
        let interrupted = self.coordinator.reset();
        self.store.delete_many(&StorageKeys::SESSION).await.map_err(SessionError::storage)?;
        info!(interrupted, "signed out");
        Ok(())
    }

    /// Authenticate with email and password and store the new session.
    ///
    /// The device public key is sent along so the server can bind the
    /// refresh token to this installation.
    pub async fn login(&self, email: &str, password: &str) -> SessionResult<SessionUser> {
        let public_key = match self.identity.ensure_keypair().await {
            Ok(pair) => Some(pair.public_key_base64()),
            Err(e) if self.settings.require_signature => return Err(e),
            Err(e) => {
                warn!(err = %e, "logging in without a device key");
                None
            }
        };
        let device_id = self.stored(StorageKeys::DEVICE_ID).await?;

        let request = LoginRequest {
            email: email.to_owned(),
            password: password.to_owned(),
            public_key,
            device_id,
        };
        let response = self.endpoint.login(&request).await?;
        let user_json = serde_json::to_string(&response.user)
            .map_err(|e| SessionError::Storage(format!("encode current user: {e}")))?;

        let _gate = self.write_gate.lock().await;
        self.coordinator.reset();
        self.store
            .set_many(&[
                (StorageKeys::ACCESS_TOKEN, response.tokens.access_token.as_str()),
                (StorageKeys::REFRESH_TOKEN, response.tokens.refresh_token.as_str()),
                (StorageKeys::DEVICE_ID, response.tokens.device_id.as_str()),
                (StorageKeys::CURRENT_USER, user_json.as_str()),
            ])
            .await
            .map_err(SessionError::storage)?;
        info!(user_id = %response.user.id, device_id = %response.tokens.device_id, "signed in");
        Ok(response.user)
    }

    /// Register this installation's public key with the server and store
    /// the device id it assigns.
    pub async fn register_device(&self, name: Option<&str>) -> SessionResult<RegisteredDevice> {
        let user = self.current_user().await?.ok_or(SessionError::NotSignedIn)?;
        let keys = self.identity.ensure_keypair().await?;
        let access_token = self.get_valid_access_token().await?;

        let registration = DeviceRegistration {
            user_id: user.id,
            public_key: keys.public_key_base64(),
            device_id: self.stored(StorageKeys::DEVICE_ID).await?,
            name: name.map(str::to_owned),
        };
        let registered = self.endpoint.register_device(&registration, &access_token).await?;

        let _gate = self.write_gate.lock().await;
        if self.stored(StorageKeys::CURRENT_USER).await?.is_none() {
            return Err(SessionError::SessionInvalidated);
        }
        self.store
            .set(StorageKeys::DEVICE_ID, &registered.device_id)
            .await
            .map_err(SessionError::storage)?;
        info!(
            device_id = %registered.device_id,
            fingerprint = %keys.fingerprint(),
            "registered device"
        );
        Ok(registered)
    }

    /// The signed-in user, if any.
    pub async fn current_user(&self) -> SessionResult<Option<SessionUser>> {
        match self.stored(StorageKeys::CURRENT_USER).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| SessionError::Storage(format!("decode current user: {e}"))),
            None => Ok(None),
        }
    }

    pub async fn status(&self) -> SessionResult<SessionStatus> {
        let now = jwt::now_secs();
        let access_token = self.stored(StorageKeys::ACCESS_TOKEN).await?;
        let has_refresh_token = self.stored(StorageKeys::REFRESH_TOKEN).await?.is_some();
        let user = self.current_user().await?;
        let device_fingerprint =
            self.identity.public_key().await?.map(|key| device::fingerprint(&key));

        Ok(SessionStatus {
            signed_in: user.is_some() && has_refresh_token,
            user,
            device_id: self.stored(StorageKeys::DEVICE_ID).await?,
            has_refresh_token,
            access_token_fresh: access_token
                .as_deref()
                .is_some_and(|t| !jwt::is_expired_at(t, self.settings.skew_secs, now)),
            access_token_expires_in: access_token.as_deref().and_then(|t| jwt::expires_in(t, now)),
            device_fingerprint,
            refresh_phase: self.coordinator.phase(),
        })
    }

    async fn fresh_access_token(&self) -> SessionResult<Option<String>> {
        let token = self.stored(StorageKeys::ACCESS_TOKEN).await?;
        Ok(token.filter(|t| !jwt::is_expired_or_near_expiry(t, self.settings.skew_secs)))
    }

    async fn stored(&self, key: &str) -> SessionResult<Option<String>> {
        self.store.get(key).await.map_err(SessionError::storage)
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
