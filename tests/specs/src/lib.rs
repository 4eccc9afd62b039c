// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Runs the real `jotter` binary as a subprocess against an in-process mock
//! of the auth API, with its state in a temporary directory.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Upper bound on a single CLI invocation.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve the path to the compiled `jotter` binary.
pub fn jotter_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("jotter")
}

/// An unsigned JWT expiring `secs` from now.
pub fn jwt_expiring_in(secs: i64) -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let body = URL_SAFE_NO_PAD.encode(json!({ "sub": "user-1", "exp": now + secs }).to_string());
    format!("{header}.{body}.sig")
}

/// In-process stand-in for the auth API.
pub struct MockAuthApi {
    url: String,
    refresh_calls: Arc<AtomicU32>,
    refresh_bodies: Arc<Mutex<Vec<Value>>>,
    login_bodies: Arc<Mutex<Vec<Value>>>,
}

impl MockAuthApi {
    /// Serve login, refresh and device registration. Tokens issued at login
    /// expire after `login_ttl_secs`; refreshed tokens after an hour.
    pub async fn start(login_ttl_secs: i64) -> anyhow::Result<Self> {
        let refresh_calls = Arc::new(AtomicU32::new(0));
        let refresh_bodies = Arc::new(Mutex::new(Vec::new()));
        let login_bodies = Arc::new(Mutex::new(Vec::new()));

        let logins = Arc::clone(&login_bodies);
        let refreshes = Arc::clone(&refresh_bodies);
        let counter = Arc::clone(&refresh_calls);
        let app = Router::new()
            .route(
                "/auth/login",
                post(move |Json(body): Json<Value>| {
                    logins.lock().push(body.clone());
                    async move {
                        if body["password"] == "wrong" {
                            let reply = json!({ "error": "invalid_credentials" });
                            return (StatusCode::UNAUTHORIZED, Json(reply));
                        }
                        let reply = json!({
                            "accessToken": jwt_expiring_in(login_ttl_secs),
                            "refreshToken": "refresh-0",
                            "deviceId": "dev-1",
                            "user": { "id": "user-1", "email": body["email"] },
                        });
                        (StatusCode::OK, Json(reply))
                    }
                }),
            )
            .route(
                "/auth/refresh",
                post(move |Json(body): Json<Value>| {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    refreshes.lock().push(body.clone());
                    async move {
                        let reply = json!({
                            "accessToken": jwt_expiring_in(3600),
                            "refreshToken": format!("refresh-{n}"),
                            "deviceId": body["deviceId"],
                        });
                        (StatusCode::OK, Json(reply))
                    }
                }),
            )
            .route(
                "/auth/devices",
                post(|| async { (StatusCode::CREATED, Json(json!({ "deviceId": "dev-2" }))) }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self { url: format!("http://{addr}"), refresh_calls, refresh_bodies, login_bodies })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_bodies(&self) -> Vec<Value> {
        self.refresh_bodies.lock().clone()
    }

    pub fn login_bodies(&self) -> Vec<Value> {
        self.login_bodies.lock().clone()
    }
}

/// A `jotter` installation: one state directory, one API.
pub struct Jotter {
    api_url: String,
    state_dir: tempfile::TempDir,
}

impl Jotter {
    pub fn new(api_url: &str) -> anyhow::Result<Self> {
        Ok(Self { api_url: api_url.to_owned(), state_dir: tempfile::tempdir()? })
    }

    pub fn state_dir(&self) -> &Path {
        self.state_dir.path()
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir.path().join("credentials.json")
    }

    /// Run the binary with `args` and wait for it to exit.
    pub async fn run(&self, args: &[&str]) -> anyhow::Result<Output> {
        let binary = jotter_binary();
        anyhow::ensure!(binary.exists(), "jotter binary not found at {}", binary.display());

        let child = tokio::process::Command::new(&binary)
            .args(args)
            .env("JOTTER_API_URL", &self.api_url)
            .env("JOTTER_STATE_DIR", self.state_dir.path())
            .env("JOTTER_LOG_LEVEL", "warn")
            .env_remove("JOTTER_PASSWORD")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(TIMEOUT, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => anyhow::bail!("jotter {args:?} did not exit within {TIMEOUT:?}"),
        }
    }

    /// Run and require success, returning trimmed stdout.
    pub async fn ok(&self, args: &[&str]) -> anyhow::Result<String> {
        let output = self.run(args).await?;
        anyhow::ensure!(
            output.status.success(),
            "jotter {args:?} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(String::from_utf8(output.stdout)?.trim().to_owned())
    }
}
