//! Per-call-chain project identity.
//!
//! A scope set with [`ExecutionContext::run_with_context`] is visible to
//! everything that runs on the same thread until the closure returns. Work
//! moved to another thread keeps the scope only when it is carried explicitly
//! with [`ContextSnapshot`] or [`ExecutionContext::spawn`], so two concurrent
//! call chains never observe each other's project.

use crate::error::{ConflictKind, Result, StoreError};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;

/// Validated project identifier: 3-50 chars of `[a-z0-9-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Parses and validates a project id.
    pub fn parse(id: &str) -> Result<Self> {
        let valid_len = (3..=50).contains(&id.len());
        let valid_chars = id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
        if !valid_len || !valid_chars {
            return Err(StoreError::validation(
                "projectId",
                format!("'{id}' must be 3-50 characters of lowercase letters, digits and hyphens"),
            ));
        }
        Ok(Self(id.to_string()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Active scope per context instance on this thread.
    static ACTIVE_SCOPES: RefCell<HashMap<u64, ProjectId>> = RefCell::new(HashMap::new());
}

/// Guard that restores the enclosing scope on drop.
///
/// Not `Send`: a scope belongs to the thread that entered it.
#[must_use = "the scope ends when the guard is dropped"]
pub struct ScopeGuard {
    context_id: u64,
    previous: Option<ProjectId>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        ACTIVE_SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            match self.previous.take() {
                Some(previous) => {
                    scopes.insert(self.context_id, previous);
                }
                None => {
                    scopes.remove(&self.context_id);
                }
            }
        });
    }
}

fn enter_scope(context_id: u64, project: ProjectId) -> ScopeGuard {
    let previous = ACTIVE_SCOPES.with(|scopes| scopes.borrow_mut().insert(context_id, project));
    ScopeGuard {
        context_id,
        previous,
        _not_send: PhantomData,
    }
}

fn active_scope(context_id: u64) -> Option<ProjectId> {
    ACTIVE_SCOPES.with(|scopes| scopes.borrow().get(&context_id).cloned())
}

/// Carrier of the active project identity.
#[derive(Debug)]
pub struct ExecutionContext {
    id: u64,
    default_project: RwLock<Option<ProjectId>>,
    disabled: AtomicBool,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ExecutionContext {
    /// Creates a context whose fallback project is `default_project`.
    pub fn new(default_project: Option<ProjectId>) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            default_project: RwLock::new(default_project),
            disabled: AtomicBool::new(false),
        }
    }

    fn default_read(&self) -> RwLockReadGuard<'_, Option<ProjectId>> {
        self.default_project
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn default_write(&self) -> RwLockWriteGuard<'_, Option<ProjectId>> {
        self.default_project
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.is_disabled() {
            return Err(StoreError::conflict(
                ConflictKind::State,
                "execution context has been disabled",
            ));
        }
        Ok(())
    }

    /// Runs `f` with `project_id` as the active project on this thread.
    ///
    /// Nested calls shadow the outer scope and restore it when they return,
    /// including on panic.
    pub fn run_with_context<T, F>(&self, project_id: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        let _guard = self.enter(project_id)?;
        Ok(f())
    }

    /// Enters a scope until the returned guard is dropped.
    pub fn enter(&self, project_id: &str) -> Result<ScopeGuard> {
        self.ensure_enabled()?;
        let project = ProjectId::parse(project_id)?;
        Ok(enter_scope(self.id, project))
    }

    /// Nearest enclosing scope, else the fallback project.
    pub fn current_project_id(&self) -> Option<ProjectId> {
        active_scope(self.id).or_else(|| self.default_read().clone())
    }

    /// Project of the innermost scope on this thread, ignoring the fallback.
    pub fn scoped_project_id(&self) -> Option<ProjectId> {
        active_scope(self.id)
    }

    /// Replaces the fallback project.
    pub fn set_default_project_id(&self, project_id: &str) -> Result<()> {
        self.ensure_enabled()?;
        let project = ProjectId::parse(project_id)?;
        *self.default_write() = Some(project);
        Ok(())
    }

    /// Clears the fallback and rejects new scopes from now on.
    ///
    /// Scopes already entered stay active until their guards drop.
    pub fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
        *self.default_write() = None;
    }

    /// Returns true once [`ExecutionContext::disable`] has run.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Spawns a thread that inherits the caller's scope.
    pub fn spawn<F, T>(&self, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let snapshot = ContextSnapshot::capture(self);
        std::thread::spawn(move || snapshot.run(f))
    }
}

/// Scope captured on one thread, to be re-entered on another.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    context_id: u64,
    project: Option<ProjectId>,
}

impl ContextSnapshot {
    /// Captures the calling thread's scope for `context`.
    pub fn capture(context: &ExecutionContext) -> Self {
        Self {
            context_id: context.id,
            project: active_scope(context.id),
        }
    }

    /// Project captured, if a scope was active.
    pub fn project_id(&self) -> Option<&ProjectId> {
        self.project.as_ref()
    }

    /// Runs `f` inside the captured scope on the current thread.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self
            .project
            .clone()
            .map(|project| enter_scope(self.context_id, project));
        f()
    }
}
