// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Failures surfaced by the session subsystem.
///
/// `Clone` so the leader of a refresh can hand the very same value to every
/// waiter. Messages never contain token or key material.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Refresh token, device id or user id is not stored. The caller must
    /// run a full login, not retry.
    #[error("missing refresh context: no {missing} stored")]
    MissingRefreshContext { missing: &'static str },

    /// Signing was attempted before a device key pair was provisioned.
    #[error("device secret key is missing")]
    MissingKey,

    /// The auth endpoint could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The auth endpoint answered with a non-success status or an unusable body.
    #[error("auth endpoint rejected request ({status}): {detail}")]
    RemoteRejected { status: u16, detail: String },

    /// The refresh call did not complete within the configured bound.
    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),

    /// The session was signed out (or replaced) while a refresh was in flight.
    #[error("session invalidated")]
    SessionInvalidated,

    /// The refresh task ended without producing an outcome.
    #[error("refresh task aborted")]
    RefreshAborted,

    /// The credential store failed.
    #[error("credential store: {0}")]
    Storage(String),

    /// Key decoding or derivation failed.
    #[error("crypto: {0}")]
    Crypto(String),

    /// The operation needs a signed-in session.
    #[error("not signed in")]
    NotSignedIn,
}

impl SessionError {
    pub(crate) fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    /// Whether the caller should send the user back through login rather
    /// than retrying.
    pub fn requires_login(&self) -> bool {
        match self {
            Self::MissingRefreshContext { .. } | Self::NotSignedIn | Self::SessionInvalidated => {
                true
            }
            Self::RemoteRejected { status, .. } => matches!(status, 401 | 403),
            _ => false,
        }
    }

    /// Stable machine-readable code, used by the CLI's JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingRefreshContext { .. } => "MISSING_REFRESH_CONTEXT",
            Self::MissingKey => "MISSING_KEY",
            Self::Network(_) => "NETWORK",
            Self::RemoteRejected { .. } => "REMOTE_REJECTED",
            Self::Timeout(_) => "TIMEOUT",
            Self::SessionInvalidated => "SESSION_INVALIDATED",
            Self::RefreshAborted => "REFRESH_ABORTED",
            Self::Storage(_) => "STORAGE",
            Self::Crypto(_) => "CRYPTO",
            Self::NotSignedIn => "NOT_SIGNED_IN",
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
