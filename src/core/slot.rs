// src/core/slot.rs

//! Defines `SessionSlot`, the gate that lets exactly one operation at a time
//! reach the controller.
//!
//! Waiting is built on a single-permit `tokio::sync::Semaphore`, which queues
//! waiters in FIFO order. The permit is forgotten on grant and returned by
//! `release`, so every grant is balanced by exactly one successful release and
//! a stray release can never mint a second permit.

use crate::core::CmmdError;
use crate::core::metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, error, warn};

/// What an acquirer does when the slot is taken.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SlotPolicy {
    /// Block until the slot frees up or the acquire timeout elapses.
    #[default]
    Wait,
    /// Fail immediately with `SlotBusy`.
    FailFast,
}

/// A snapshot of the slot for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Busy {
        owner: u64,
        since: Instant,
        /// The owning handler stopped waiting; the operation itself is still running.
        abandoned: bool,
    },
}

impl SlotState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SlotState::Idle)
    }
}

#[derive(Debug)]
struct Holder {
    owner: u64,
    since: Instant,
    abandoned: bool,
}

#[derive(Debug)]
struct SlotInner {
    permits: Semaphore,
    holder: Mutex<Option<Holder>>,
    policy: SlotPolicy,
    granted: AtomicU64,
    released: AtomicU64,
}

/// The one-at-a-time execution gate. Cheap to clone; all clones share one slot.
#[derive(Debug, Clone)]
pub struct SessionSlot {
    inner: Arc<SlotInner>,
}

impl SessionSlot {
    pub fn new(policy: SlotPolicy) -> Self {
        Self {
            inner: Arc::new(SlotInner {
                permits: Semaphore::new(1),
                holder: Mutex::new(None),
                policy,
                granted: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    pub fn policy(&self) -> SlotPolicy {
        self.inner.policy
    }

    /// Acquires the slot for `owner`.
    ///
    /// Returns a guard on success, `SlotBusy` under the fail-fast policy,
    /// `SlotAcquireTimeout` when `timeout` elapses under the wait policy, and
    /// `SlotReentrant` if `owner` already holds the slot for a run it is still
    /// waiting on. An owner whose previous run was abandoned waits like anyone else.
    pub async fn acquire(&self, owner: u64, timeout: Duration) -> Result<SlotGuard, CmmdError> {
        if let Some(holder) = self.inner.holder.lock().as_ref()
            && holder.owner == owner
            && !holder.abandoned
        {
            warn!("Session {} tried to acquire the controller slot it already holds.", owner);
            return Err(CmmdError::SlotReentrant(owner));
        }

        let permit = match self.inner.policy {
            SlotPolicy::FailFast => match self.inner.permits.try_acquire() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => return Err(CmmdError::SlotBusy),
                Err(TryAcquireError::Closed) => return Err(CmmdError::ShuttingDown),
            },
            SlotPolicy::Wait => {
                match tokio::time::timeout(timeout, self.inner.permits.acquire()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(CmmdError::ShuttingDown),
                    Err(_) => return Err(CmmdError::SlotAcquireTimeout(timeout)),
                }
            }
        };
        permit.forget();

        {
            let mut holder = self.inner.holder.lock();
            if let Some(stale) = holder.as_ref() {
                error!(
                    "CRITICAL: controller slot granted to session {} while still recorded as held by session {}.",
                    owner, stale.owner
                );
            }
            *holder = Some(Holder {
                owner,
                since: Instant::now(),
                abandoned: false,
            });
        }
        self.inner.granted.fetch_add(1, Ordering::SeqCst);
        metrics::SLOT_BUSY.set(1.0);
        debug!("Controller slot granted to session {}.", owner);

        Ok(SlotGuard {
            slot: self.clone(),
            owner,
            released: false,
        })
    }

    /// Transitions Busy -> Idle on behalf of `owner`.
    ///
    /// Releasing a slot that `owner` does not hold is an invariant violation: it
    /// is logged and returned as an error, and the slot is left untouched.
    pub fn release(&self, owner: u64) -> Result<(), CmmdError> {
        let mut holder = self.inner.holder.lock();
        let current = holder.as_ref().map(|h| (h.owner, h.since));
        match current {
            Some((holder_id, since)) if holder_id == owner => {
                let held_for = since.elapsed();
                *holder = None;
                drop(holder);
                self.inner.released.fetch_add(1, Ordering::SeqCst);
                metrics::SLOT_BUSY.set(0.0);
                self.inner.permits.add_permits(1);
                debug!(
                    "Controller slot released by session {} after {:?}.",
                    owner, held_for
                );
                Ok(())
            }
            other => {
                let current = other.map(|(holder_id, _)| holder_id);
                error!(
                    "CRITICAL: session {} released the controller slot, but it is held by {:?}.",
                    owner, current
                );
                Err(CmmdError::SlotNotOwner {
                    caller: owner,
                    holder: current,
                })
            }
        }
    }

    /// Records that `owner` has stopped waiting for its in-flight run.
    pub fn mark_abandoned(&self, owner: u64) {
        if let Some(holder) = self.inner.holder.lock().as_mut()
            && holder.owner == owner
            && !holder.abandoned
        {
            holder.abandoned = true;
            metrics::ABANDONED_RUNS_TOTAL.inc();
            warn!(
                "Session {} abandoned its run after {:?}; the controller stays occupied until it returns.",
                owner,
                holder.since.elapsed()
            );
        }
    }

    pub fn state(&self) -> SlotState {
        match self.inner.holder.lock().as_ref() {
            None => SlotState::Idle,
            Some(h) => SlotState::Busy {
                owner: h.owner,
                since: h.since,
                abandoned: h.abandoned,
            },
        }
    }

    /// Total grants and releases since creation. Equal whenever the slot is idle.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.inner.granted.load(Ordering::SeqCst),
            self.inner.released.load(Ordering::SeqCst),
        )
    }

    /// Waits until the slot is idle, for at most `timeout`. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.inner.permits.acquire()).await,
            Ok(Ok(_))
        )
    }
}

/// Proof of holding the slot. Releases on drop if not released explicitly, so
/// the slot is freed on every exit path, including panics and task aborts.
///
/// Move the guard into the code that talks to the controller: the slot then
/// stays held exactly as long as the controller is busy.
#[derive(Debug)]
pub struct SlotGuard {
    slot: SessionSlot,
    owner: u64,
    released: bool,
}

impl SlotGuard {
    pub fn owner(&self) -> u64 {
        self.owner
    }

    /// Releases the slot now, reporting an invariant violation if there is one.
    pub fn release(mut self) -> Result<(), CmmdError> {
        self.released = true;
        self.slot.release(self.owner)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.released {
            // Errors are already logged by `release`.
            let _ = self.slot.release(self.owner);
        }
    }
}
