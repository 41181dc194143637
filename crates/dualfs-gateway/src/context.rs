//! Per-caller execution contexts.
//!
//! A [`CallContext`] names one unit of sequential execution (a thread, a task, a request
//! handler) and carries the mode the next facade call runs in. Pending async results are
//! keyed by [`ContextId`] rather than by thread, so the same scheme works for threads and
//! for cooperatively scheduled tasks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of one unit of sequential execution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps an id chosen by the caller, e.g. a scheduler's task id.
    pub fn new(id: u64) -> Self {
        ContextId(id)
    }

    /// Returns the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// How a facade call is executed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Block until the backing operation completes.
    #[default]
    Sync,
    /// Start the backing operation and stash its handle for later retrieval.
    Async,
}

/// The caller's execution context.
///
/// Contexts are synchronous by default. [`asynchronous`](Self::asynchronous) returns a copy
/// with the same id in async mode, scoping the toggle to the calls made through that copy.
#[derive(Clone, Debug)]
pub struct CallContext {
    id: ContextId,
    mode: ExecMode,
    cancel: Option<CancellationToken>,
}

impl CallContext {
    /// Creates a synchronous context with a fresh id.
    pub fn new() -> Self {
        Self::with_id(ContextId::next())
    }

    /// Creates a synchronous context with a caller-chosen id.
    pub fn with_id(id: ContextId) -> Self {
        Self {
            id,
            mode: ExecMode::Sync,
            cancel: None,
        }
    }

    /// Attaches a cancellation token observed by every call made through this context.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The context id.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The execution mode.
    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    /// True in async mode.
    pub fn is_async(&self) -> bool {
        self.mode == ExecMode::Async
    }

    /// The attached cancellation token, if any.
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    /// Same context, async mode.
    pub fn asynchronous(&self) -> CallContext {
        CallContext {
            id: self.id,
            mode: ExecMode::Async,
            cancel: self.cancel.clone(),
        }
    }

    /// Same context, sync mode.
    pub fn synchronous(&self) -> CallContext {
        CallContext {
            id: self.id,
            mode: ExecMode::Sync,
            cancel: self.cancel.clone(),
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}
