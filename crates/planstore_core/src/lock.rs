//! Per-resource mutual exclusion with FIFO hand-off and timeouts.
//!
//! Keys are plain strings (see [`crate::layout::ProjectLayout`] for the key
//! scheme). A key is held either exclusively by one caller or shared by any
//! number of [`LockMode::Shared`] callers. Waiters for the same key are granted
//! the lock strictly in arrival order, so a queued exclusive waiter holds back
//! shared callers that arrive after it. Different keys never block one another and no cross-key deadlock
//! detection is attempted; callers that need several keys must take them in a
//! consistent order.

use crate::error::{LockErrorKind, Result, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::debug;

/// How a key is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LockMode {
    Exclusive,
    Shared,
}

/// Current holder of a key.
#[derive(Debug, Clone)]
struct Holder {
    ticket: u64,
    mode: LockMode,
    thread: ThreadId,
    acquired_at: DateTime<Utc>,
    timeout: Duration,
}

#[derive(Debug, Default)]
struct KeyQueue {
    holders: Vec<Holder>,
    waiting: VecDeque<(u64, LockMode)>,
}

impl KeyQueue {
    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.waiting.is_empty()
    }

    /// `ticket` is next in line and compatible with the current holders.
    fn can_grant(&self, ticket: u64, mode: LockMode) -> bool {
        if self.waiting.front().map(|(t, _)| *t) != Some(ticket) {
            return false;
        }
        match mode {
            LockMode::Exclusive => self.holders.is_empty(),
            LockMode::Shared => self.holders.iter().all(|h| h.mode == LockMode::Shared),
        }
    }
}

#[derive(Debug, Default)]
struct LockTable {
    keys: HashMap<String, KeyQueue>,
    disposed: bool,
}

/// Snapshot of one held lock, for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    /// Resource key.
    pub key: String,
    /// Ticket of the holder.
    pub holder: u64,
    pub mode: LockMode,
    /// When the lock was granted.
    pub acquired_at: DateTime<Utc>,
    /// Timeout the holder acquired with.
    pub timeout_ms: u64,
    /// Number of queued waiters.
    pub waiters: usize,
}

/// Process-local lock manager.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    next_ticket: AtomicU64,
}

impl LockManager {
    /// Creates an empty lock manager.
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Acquires `key` exclusively, waiting at most `timeout` behind earlier
    /// waiters.
    ///
    /// # Errors
    ///
    /// - `Lock{Timeout}` if the lock is not granted in time.
    /// - `Lock{Deadlock}` if the calling thread already holds `key`.
    /// - `Lock{Acquire}` if the manager has been disposed.
    pub fn acquire(&self, key: &str, timeout: Duration) -> Result<LockHandle<'_>> {
        self.acquire_with(key, LockMode::Exclusive, timeout)
    }

    /// Acquires `key` alongside other shared holders. Fails like
    /// [`LockManager::acquire`].
    pub fn acquire_shared(&self, key: &str, timeout: Duration) -> Result<LockHandle<'_>> {
        self.acquire_with(key, LockMode::Shared, timeout)
    }

    fn acquire_with(&self, key: &str, mode: LockMode, timeout: Duration) -> Result<LockHandle<'_>> {
        let deadline = Instant::now() + timeout;
        let me = thread::current().id();
        let mut table = self.table();

        if table.disposed {
            return Err(disposed_error(key));
        }

        let queue = table.keys.entry(key.to_string()).or_default();
        if queue.holders.iter().any(|h| h.thread == me) {
            return Err(StoreError::Lock {
                kind: LockErrorKind::Deadlock,
                key: key.to_string(),
                message: "lock is already held by the calling thread".to_string(),
                timeout_ms: None,
            });
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        queue.waiting.push_back((ticket, mode));
        if !queue.holders.is_empty() {
            debug!(key, ticket, waiters = queue.waiting.len(), "lock contended, queueing");
        }

        loop {
            if table.disposed {
                return Err(disposed_error(key));
            }

            let Some(queue) = table.keys.get_mut(key) else {
                // dispose() dropped the queue while we slept
                return Err(disposed_error(key));
            };

            if queue.can_grant(ticket, mode) {
                queue.waiting.pop_front();
                queue.holders.push(Holder {
                    ticket,
                    mode,
                    thread: me,
                    acquired_at: Utc::now(),
                    timeout,
                });
                if mode == LockMode::Shared {
                    // the next waiter may be shared too
                    self.released.notify_all();
                }
                return Ok(LockHandle {
                    manager: self,
                    key: key.to_string(),
                    ticket,
                    released: false,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                queue.waiting.retain(|(t, _)| *t != ticket);
                if queue.is_idle() {
                    table.keys.remove(key);
                }
                // our departure may put someone else at the front
                self.released.notify_all();
                debug!(key, ticket, "lock wait timed out");
                return Err(StoreError::Lock {
                    kind: LockErrorKind::Timeout,
                    key: key.to_string(),
                    message: format!("not acquired within {}ms", timeout.as_millis()),
                    timeout_ms: Some(timeout.as_millis() as u64),
                });
            }

            table = self
                .released
                .wait_timeout(table, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Releases a handle explicitly.
    ///
    /// Dropping the handle has the same effect; this form surfaces the error
    /// when the lock was already taken away by [`LockManager::dispose`].
    pub fn release(&self, mut handle: LockHandle<'_>) -> Result<()> {
        handle.released = true;
        self.release_ticket(&handle.key, handle.ticket)
    }

    fn release_ticket(&self, key: &str, ticket: u64) -> Result<()> {
        let mut table = self.table();
        let position = table
            .keys
            .get(key)
            .and_then(|q| q.holders.iter().position(|h| h.ticket == ticket));

        let Some(position) = position else {
            return Err(StoreError::Lock {
                kind: LockErrorKind::Release,
                key: key.to_string(),
                message: "handle does not own this lock".to_string(),
                timeout_ms: None,
            });
        };

        if let Some(queue) = table.keys.get_mut(key) {
            queue.holders.remove(position);
            if queue.is_idle() {
                table.keys.remove(key);
            }
        }
        self.released.notify_all();
        Ok(())
    }

    /// Runs `f` while holding `key`; the lock is released on every exit path,
    /// including errors and panics.
    pub fn with_lock<T, F>(&self, key: &str, timeout: Duration, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let _handle = self.acquire(key, timeout)?;
        f()
    }

    /// Releases every held lock and rejects all queued and future acquirers.
    ///
    /// Intended for shutdown and test teardown.
    pub fn dispose(&self) {
        let mut table = self.table();
        if !table.disposed {
            debug!(keys = table.keys.len(), "disposing lock manager");
        }
        table.disposed = true;
        table.keys.clear();
        self.released.notify_all();
    }

    /// Returns true once [`LockManager::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.table().disposed
    }

    /// Returns true if `key` currently has a holder.
    pub fn is_locked(&self, key: &str) -> bool {
        self.table()
            .keys
            .get(key)
            .is_some_and(|q| !q.holders.is_empty())
    }

    /// Returns true if the calling thread holds `key` in any mode.
    pub fn held_by_current_thread(&self, key: &str) -> bool {
        let me = thread::current().id();
        self.table()
            .keys
            .get(key)
            .is_some_and(|q| q.holders.iter().any(|h| h.thread == me))
    }

    /// Lists currently held locks, sorted by key.
    pub fn held_locks(&self) -> Vec<LockInfo> {
        let table = self.table();
        let mut held: Vec<LockInfo> = table
            .keys
            .iter()
            .flat_map(|(key, q)| {
                q.holders.iter().map(move |h| LockInfo {
                    key: key.clone(),
                    holder: h.ticket,
                    mode: h.mode,
                    acquired_at: h.acquired_at,
                    timeout_ms: h.timeout.as_millis() as u64,
                    waiters: q.waiting.len(),
                })
            })
            .collect();
        held.sort_by(|a, b| a.key.cmp(&b.key).then(a.holder.cmp(&b.holder)));
        held
    }
}

fn disposed_error(key: &str) -> StoreError {
    StoreError::Lock {
        kind: LockErrorKind::Acquire,
        key: key.to_string(),
        message: "lock manager has been disposed".to_string(),
        timeout_ms: None,
    }
}

/// RAII guard for an acquired key.
///
/// The key is released when the handle is dropped.
#[derive(Debug)]
pub struct LockHandle<'a> {
    manager: &'a LockManager,
    key: String,
    ticket: u64,
    released: bool,
}

impl LockHandle<'_> {
    /// Resource key held by this handle.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockHandle<'_> {
    fn drop(&mut self) {
        if !self.released {
            // after dispose() the lock is already gone; nothing to report
            let _ = self.manager.release_ticket(&self.key, self.ticket);
        }
    }
}
