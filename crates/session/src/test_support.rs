// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token builders and a scripted auth endpoint.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Once;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::endpoint::{
    AuthEndpoint, DeviceRegistration, LoginRequest, LoginResponse, RefreshRequest,
    RegisteredDevice, SessionUser, TokenPair,
};
use crate::error::{SessionError, SessionResult};
use crate::jwt::now_secs;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// An unsigned JWT whose payload is `claims`.
pub fn jwt_with(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{body}.sig")
}

/// A JWT expiring `secs` from now (negative for already expired).
pub fn token_expiring_in(secs: i64) -> String {
    jwt_with(serde_json::json!({ "sub": "user-1", "exp": now_secs() + secs }))
}

pub fn pair(access_token: impl Into<String>, refresh_token: &str, device_id: &str) -> TokenPair {
    TokenPair {
        access_token: access_token.into(),
        refresh_token: refresh_token.to_owned(),
        device_id: device_id.to_owned(),
    }
}

pub fn user(id: &str) -> SessionUser {
    SessionUser { id: id.to_owned(), email: Some(format!("{id}@example.com")), display_name: None }
}

/// [`AuthEndpoint`] that answers from scripts and records what it was asked.
///
/// Refresh results are consumed in order; the last one repeats. While the
/// gate is held (see [`FakeEndpoint::hold`]) refresh calls park until
/// [`FakeEndpoint::release`].
pub struct FakeEndpoint {
    refresh_results: Mutex<VecDeque<SessionResult<TokenPair>>>,
    login_result: Mutex<SessionResult<LoginResponse>>,
    register_result: Mutex<SessionResult<RegisteredDevice>>,
    refresh_calls: AtomicU32,
    login_calls: AtomicU32,
    refresh_requests: Mutex<Vec<RefreshRequest>>,
    login_requests: Mutex<Vec<LoginRequest>>,
    registrations: Mutex<Vec<(DeviceRegistration, String)>>,
    gate: watch::Sender<bool>,
}

impl Default for FakeEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEndpoint {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            refresh_results: Mutex::new(VecDeque::from([Err(SessionError::Network(
                "no refresh scripted".into(),
            ))])),
            login_result: Mutex::new(Err(SessionError::Network("no login scripted".into()))),
            register_result: Mutex::new(Err(SessionError::Network(
                "no registration scripted".into(),
            ))),
            refresh_calls: AtomicU32::new(0),
            login_calls: AtomicU32::new(0),
            refresh_requests: Mutex::new(Vec::new()),
            login_requests: Mutex::new(Vec::new()),
            registrations: Mutex::new(Vec::new()),
            gate,
        }
    }

    pub fn refresh_returns(self, results: Vec<SessionResult<TokenPair>>) -> Self {
        *self.refresh_results.lock() = results.into();
        self
    }

    pub fn login_returns(self, result: SessionResult<LoginResponse>) -> Self {
        *self.login_result.lock() = result;
        self
    }

    pub fn register_returns(self, result: SessionResult<RegisteredDevice>) -> Self {
        *self.register_result.lock() = result;
        self
    }

    /// Park subsequent refresh calls until [`Self::release`].
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_requests(&self) -> Vec<RefreshRequest> {
        self.refresh_requests.lock().clone()
    }

    pub fn login_requests(&self) -> Vec<LoginRequest> {
        self.login_requests.lock().clone()
    }

    pub fn registrations(&self) -> Vec<(DeviceRegistration, String)> {
        self.registrations.lock().clone()
    }

    fn next_refresh(&self) -> SessionResult<TokenPair> {
        let mut results = self.refresh_results.lock();
        if results.len() > 1 {
            results.pop_front().unwrap_or(Err(SessionError::RefreshAborted))
        } else {
            results.front().cloned().unwrap_or(Err(SessionError::RefreshAborted))
        }
    }
}

#[async_trait]
impl AuthEndpoint for FakeEndpoint {
    async fn login(&self, request: &LoginRequest) -> SessionResult<LoginResponse> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_requests.lock().push(request.clone());
        self.login_result.lock().clone()
    }

    async fn refresh(&self, request: &RefreshRequest) -> SessionResult<TokenPair> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_requests.lock().push(request.clone());
        let mut gate = self.gate.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = gate.wait_for(|open| *open).await;
        self.next_refresh()
    }

    async fn register_device(
        &self,
        registration: &DeviceRegistration,
        access_token: &str,
    ) -> SessionResult<RegisteredDevice> {
        self.registrations.lock().push((registration.clone(), access_token.to_owned()));
        self.register_result.lock().clone()
    }
}
