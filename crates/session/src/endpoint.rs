// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote auth endpoint: wire types and the HTTP client.

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};

/// Access token, refresh token and the device id the server bound them to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub device_id: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// The signed-in user, as stored under `current_user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// The tuple a device signs when asking for a refresh.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload {
    pub user_id: String,
    pub device_id: String,
    pub refresh_token: String,
    /// Unix seconds at signing time.
    pub timestamp: i64,
}

impl fmt::Debug for SignedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedPayload")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("refresh_token", &"<redacted>")
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Body of `POST /auth/refresh`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub user_id: String,
    pub device_id: String,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Base64 detached Ed25519 signature over the canonical [`SignedPayload`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl RefreshRequest {
    pub fn unsigned(user_id: String, device_id: String, refresh_token: String) -> Self {
        Self { user_id, device_id, refresh_token, timestamp: None, signature: None }
    }

    pub fn signed(payload: SignedPayload, signature: String) -> Self {
        Self {
            user_id: payload.user_id,
            device_id: payload.device_id,
            refresh_token: payload.refresh_token,
            timestamp: Some(payload.timestamp),
            signature: Some(signature),
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

impl fmt::Debug for RefreshRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshRequest")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("signed", &self.is_signed())
            .finish_non_exhaustive()
    }
}

/// Body of `POST /auth/login`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Base64 device public key, when one could be provisioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Device id from a previous session on this installation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("has_public_key", &self.public_key.is_some())
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: SessionUser,
}

/// Body of `POST /auth/devices`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub user_id: String,
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredDevice {
    pub device_id: String,
}

/// The remote side of authentication.
#[async_trait]
pub trait AuthEndpoint: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> SessionResult<LoginResponse>;

    async fn refresh(&self, request: &RefreshRequest) -> SessionResult<TokenPair>;

    async fn register_device(
        &self,
        registration: &DeviceRegistration,
        access_token: &str,
    ) -> SessionResult<RegisteredDevice>;
}

/// [`AuthEndpoint`] over HTTPS + JSON.
#[derive(Clone)]
pub struct HttpAuthEndpoint {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAuthEndpoint {
    /// Build a client for `base_url`. Needs a process-wide rustls crypto
    /// provider to be installed first.
    pub fn new(base_url: impl Into<String>) -> SessionResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("jotter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SessionError::Network(format!("build http client: {e}")))?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B, bearer: Option<&str>) -> SessionResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let mut request = self.http.post(self.url(path)).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(|e| SessionError::Network(e.to_string()))?;
        let status = resp.status();
        let text =
            resp.text().await.map_err(|e| SessionError::Network(format!("read body: {e}")))?;

        if !status.is_success() {
            let detail = summarize_body(&text);
            warn!(path, status = status.as_u16(), %detail, "auth endpoint rejected request");
            return Err(SessionError::RemoteRejected { status: status.as_u16(), detail });
        }

        debug!(path, status = status.as_u16(), "auth endpoint ok");
        serde_json::from_str(&text).map_err(|e| SessionError::RemoteRejected {
            status: status.as_u16(),
            detail: format!("malformed body: {}", json_error_kind(&e)),
        })
    }
}

#[async_trait]
impl AuthEndpoint for HttpAuthEndpoint {
    async fn login(&self, request: &LoginRequest) -> SessionResult<LoginResponse> {
        self.post_json("/auth/login", request, None).await
    }

    async fn refresh(&self, request: &RefreshRequest) -> SessionResult<TokenPair> {
        self.post_json("/auth/refresh", request, None).await
    }

    async fn register_device(
        &self,
        registration: &DeviceRegistration,
        access_token: &str,
    ) -> SessionResult<RegisteredDevice> {
        self.post_json("/auth/devices", registration, Some(access_token)).await
    }
}

fn json_error_kind(e: &serde_json::Error) -> &'static str {
    use serde_json::error::Category;
    match e.classify() {
        Category::Io => "io",
        Category::Syntax => "syntax",
        Category::Data => "unexpected shape",
        Category::Eof => "empty or truncated",
    }
}

/// Describe an error body without echoing it: bodies can carry tokens back.
/// Keeps an OAuth-style `error` code when the body has one.
fn summarize_body(body: &str) -> String {
    let digest: String =
        Sha256::digest(body.as_bytes()).iter().take(8).map(|b| format!("{b:02x}")).collect();
    let code = serde_json::from_str::<serde_json::Value>(body).ok().and_then(|v| {
        v.get("error")
            .and_then(|e| e.as_str())
            .filter(|e| e.len() <= 64 && e.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'))
            .map(str::to_owned)
    });
    match code {
        Some(code) => format!("{code} (len={},digest={digest})", body.len()),
        None => format!("len={},digest={digest}", body.len()),
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
