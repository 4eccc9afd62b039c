// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Jotter session tokens: keeps a client authenticated against the journal API.
//!
//! The access token is a short-lived JWT, the refresh token a long-lived
//! opaque string. [`SessionTokens::get_valid_access_token`] is the entry
//! point: it returns the stored token while it is fresh and otherwise joins
//! (or leads) a single-flight refresh through [`RefreshCoordinator`]. Every
//! refresh is bound to this installation by an Ed25519 signature from the
//! [`DeviceIdentity`] key pair.

pub mod coordinator;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod jwt;
pub mod session;
pub mod store;

#[cfg(test)]
mod test_support;

pub use coordinator::{RefreshCoordinator, RefreshPhase};
pub use device::{DeviceIdentity, DeviceKeyPair, RandomSource, SystemRandomSource};
pub use endpoint::{
    AuthEndpoint, DeviceRegistration, HttpAuthEndpoint, LoginRequest, LoginResponse,
    RefreshRequest, RegisteredDevice, SessionUser, SignedPayload, TokenPair,
};
pub use error::{SessionError, SessionResult};
pub use session::{SessionSettings, SessionStatus, SessionTokens, SessionTokensBuilder};
pub use store::{CredentialStore, FileStore, MemoryStore, StorageKeys};
