// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a mock auth server and assertion helpers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::net::TcpListener;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// An unsigned JWT for `sub` expiring `secs` from now.
pub fn jwt_expiring_in(sub: &str, secs: i64) -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let body = URL_SAFE_NO_PAD.encode(json!({ "sub": sub, "exp": now + secs }).to_string());
    format!("{header}.{body}.sig")
}

/// Counters for a running [`mock_auth_server`].
#[derive(Clone, Default)]
pub struct AuthCalls {
    pub login: Arc<AtomicU32>,
    pub refresh: Arc<AtomicU32>,
    pub register: Arc<AtomicU32>,
}

impl AuthCalls {
    pub fn refresh_count(&self) -> u32 {
        self.refresh.load(Ordering::SeqCst)
    }
}

/// Auth API stand-in. Login accepts any password but `wrong`; refresh
/// rejects the refresh token `revoked`; device registration needs a bearer.
/// Issued access tokens expire after `access_ttl_secs`.
pub async fn mock_auth_server(access_ttl_secs: i64) -> anyhow::Result<(String, AuthCalls)> {
    let calls = AuthCalls::default();

    let login_calls = Arc::clone(&calls.login);
    let refresh_calls = Arc::clone(&calls.refresh);
    let register_calls = Arc::clone(&calls.register);
    let app = Router::new()
        .route(
            "/auth/login",
            post(move |Json(body): Json<Value>| {
                let n = login_calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if body["password"] == "wrong" {
                        let reply = json!({ "error": "invalid_credentials" });
                        return (StatusCode::UNAUTHORIZED, Json(reply));
                    }
                    let reply = json!({
                        "accessToken": jwt_expiring_in("user-1", access_ttl_secs),
                        "refreshToken": format!("refresh-login-{n}"),
                        "deviceId": body["deviceId"].as_str().unwrap_or("dev-1"),
                        "user": { "id": "user-1", "email": body["email"] },
                    });
                    (StatusCode::OK, Json(reply))
                }
            }),
        )
        .route(
            "/auth/refresh",
            post(move |Json(body): Json<Value>| {
                let n = refresh_calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if body["refreshToken"] == "revoked" {
                        let reply = json!({ "error": "invalid_grant" });
                        return (StatusCode::UNAUTHORIZED, Json(reply));
                    }
                    let reply = json!({
                        "accessToken": jwt_expiring_in("user-1", 3600),
                        "refreshToken": format!("refresh-{n}"),
                        "deviceId": body["deviceId"],
                    });
                    (StatusCode::OK, Json(reply))
                }
            }),
        )
        .route(
            "/auth/devices",
            post(move |headers: HeaderMap| {
                register_calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    let bearer = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|v| v.starts_with("Bearer "));
                    if !bearer {
                        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "no_token" })));
                    }
                    (StatusCode::CREATED, Json(json!({ "deviceId": "dev-registered" })))
                }
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    Ok((format!("http://{addr}"), calls))
}

/// Assert that an expression evaluates to `Err` whose Display string
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
