// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight refresh coordination.
//!
//! The first caller to find the coordinator `Idle` flips it to `Refreshing`
//! and spawns the refresh as its own task; everyone (that caller included)
//! then waits on a watch channel for the one outcome. Because the work runs
//! in a spawned task, a caller that gives up waiting never cancels the
//! refresh for the others.
//!
//! ```text
//! Idle ──request──▶ Refreshing ──success(pair) / failure(err) / timeout──▶ Idle
//!                        │
//!                        └──reset (sign-out)──▶ Idle, waiters get SessionInvalidated
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::endpoint::TokenPair;
use crate::error::{SessionError, SessionResult};

/// Default bound on a single refresh, network call and persistence included.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// The single outcome shared by every caller of one refresh.
pub type RefreshOutcome = SessionResult<TokenPair>;

/// Observable phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPhase {
    Idle,
    Refreshing,
}

enum Phase {
    Idle,
    Refreshing { tx: watch::Sender<Option<RefreshOutcome>>, task: AbortHandle },
}

struct Inner {
    phase: Phase,
    /// Bumped by [`RefreshCoordinator::reset`]. Outcomes from an older epoch
    /// are discarded.
    epoch: u64,
}

/// Deduplicates concurrent refresh attempts and fans out the result.
pub struct RefreshCoordinator {
    inner: Mutex<Inner>,
    timeout: Duration,
}

impl RefreshCoordinator {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self { inner: Mutex::new(Inner { phase: Phase::Idle, epoch: 0 }), timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn phase(&self) -> RefreshPhase {
        match self.inner.lock().phase {
            Phase::Idle => RefreshPhase::Idle,
            Phase::Refreshing { .. } => RefreshPhase::Refreshing,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Whether no reset happened since `epoch` was handed to a refresh.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.inner.lock().epoch == epoch
    }

    /// Join the in-flight refresh, or start one with `refresh` if idle.
    ///
    /// `refresh` receives the epoch it runs under and is only invoked when
    /// this caller becomes the leader. It must persist its result before
    /// returning: the outcome is released to waiters as soon as it resolves.
    pub async fn run<F, Fut>(self: &Arc<Self>, refresh: F) -> RefreshOutcome
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = RefreshOutcome> + Send + 'static,
    {
        let mut rx = {
            let mut inner = self.inner.lock();
            let joined = match &inner.phase {
                Phase::Refreshing { tx, .. } => Some(tx.subscribe()),
                Phase::Idle => None,
            };
            match joined {
                Some(rx) => {
                    debug!(epoch = inner.epoch, "joining in-flight refresh");
                    rx
                }
                None => {
                    let epoch = inner.epoch;
                    let (tx, rx) = watch::channel(None);
                    let task = self.spawn_leader(epoch, refresh(epoch));
                    inner.phase = Phase::Refreshing { tx, task };
                    debug!(epoch, "leading refresh");
                    rx
                }
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(SessionError::RefreshAborted))
    }

    /// Spawn the refresh plus a supervisor that publishes its outcome.
    ///
    /// The supervisor holds `inner` only after the refresh resolves, so
    /// spawning while the caller holds the lock cannot deadlock.
    fn spawn_leader<Fut>(self: &Arc<Self>, epoch: u64, refresh: Fut) -> AbortHandle
    where
        Fut: Future<Output = RefreshOutcome> + Send + 'static,
    {
        let work = tokio::spawn(refresh);
        let abort = work.abort_handle();
        let abort_on_timeout = work.abort_handle();
        let this = Arc::clone(self);
        let timeout = self.timeout;

        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, work).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) if e.is_cancelled() => Err(SessionError::SessionInvalidated),
                Ok(Err(_)) => Err(SessionError::RefreshAborted),
                Err(_) => {
                    abort_on_timeout.abort();
                    warn!(epoch, ?timeout, "refresh timed out");
                    Err(SessionError::Timeout(timeout))
                }
            };
            this.complete(epoch, outcome);
        });

        abort
    }

    /// Publish `outcome` to every waiter and return to `Idle`, unless a reset
    /// already superseded this refresh.
    fn complete(&self, epoch: u64, outcome: RefreshOutcome) {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            debug!(epoch, current = inner.epoch, "discarding outcome of superseded refresh");
            return;
        }
        match std::mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::Refreshing { tx, .. } => {
                match &outcome {
                    Ok(pair) => info!(epoch, device_id = %pair.device_id, "refresh completed"),
                    Err(e) => warn!(epoch, err = %e, "refresh failed"),
                }
                tx.send_replace(Some(outcome));
            }
            Phase::Idle => {}
        }
    }

    /// Force the coordinator back to `Idle`.
    ///
    /// Any in-flight refresh is aborted and its waiters receive
    /// [`SessionError::SessionInvalidated`]. Returns whether a refresh was
    /// in flight.
    pub fn reset(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        match std::mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::Refreshing { tx, task } => {
                task.abort();
                info!(epoch = inner.epoch, "reset with refresh in flight");
                tx.send_replace(Some(Err(SessionError::SessionInvalidated)));
                true
            }
            Phase::Idle => false,
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
