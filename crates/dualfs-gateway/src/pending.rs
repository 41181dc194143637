//! Pending results of async-mode calls.

use dashmap::DashMap;
use std::any::Any;
use std::future::Future;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::context::ContextId;
use crate::error::{GatewayError, Result};

pub(crate) type AnyValue = Box<dyn Any + Send>;

/// Drives `fut` to completion on `runtime`, blocking the calling thread.
///
/// Plain threads block directly. Threads of a multi-threaded runtime hand their worker
/// duties off first. A single-threaded runtime's own thread cannot block without stalling
/// every task on it, so the call is refused there.
pub(crate) fn block_on_runtime<F: Future>(
    runtime: &Handle,
    op: &'static str,
    fut: F,
) -> Result<F::Output> {
    match Handle::try_current() {
        Err(_) => Ok(runtime.block_on(fut)),
        Ok(current) => match current.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Err(GatewayError::BlockingInAsyncContext { op }),
            _ => Ok(tokio::task::block_in_place(|| runtime.block_on(fut))),
        },
    }
}

/// Handle to a backing operation started in async mode.
///
/// Retrieved once through the facade's pending accessor. It can be waited on from a
/// blocking thread, awaited from async code, polled, or aborted. Dropping it detaches the
/// operation, which still runs to completion.
#[derive(Debug)]
pub struct PendingOp {
    op: &'static str,
    context: ContextId,
    handle: JoinHandle<Result<AnyValue>>,
    runtime: Handle,
}

impl PendingOp {
    pub(crate) fn new(
        op: &'static str,
        context: ContextId,
        handle: JoinHandle<Result<AnyValue>>,
        runtime: Handle,
    ) -> Self {
        Self {
            op,
            context,
            handle,
            runtime,
        }
    }

    /// Name of the operation.
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// Context that issued the operation.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// True once the operation has completed, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the backing operation.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Blocks the calling thread until the operation completes and returns its result.
    ///
    /// `T` must be the result type of the operation that was issued, e.g. `bool` for
    /// `delete` or `()` for `mkdirs`. Async code should prefer [`join`](Self::join); from a
    /// task on a single-threaded runtime this returns
    /// [`GatewayError::BlockingInAsyncContext`].
    pub fn wait<T: 'static>(self) -> Result<T> {
        let runtime = self.runtime.clone();
        let op = self.op;
        block_on_runtime(&runtime, op, self.join())?
    }

    /// Awaits the operation and returns its result.
    pub async fn join<T: 'static>(self) -> Result<T> {
        let op = self.op;
        match self.handle.await {
            Ok(Ok(value)) => value
                .downcast::<T>()
                .map(|v| *v)
                .map_err(|_| GatewayError::PendingTypeMismatch { op }),
            Ok(Err(e)) => Err(e),
            Err(e) if e.is_cancelled() => Err(GatewayError::Cancelled { op }),
            Err(e) => Err(GatewayError::backing(op, Box::new(e))),
        }
    }
}

/// Per-context table of pending operations, at most one per context.
#[derive(Debug, Default)]
pub(crate) struct PendingSlots {
    slots: DashMap<ContextId, PendingOp>,
}

impl PendingSlots {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stores `op`, replacing whatever the context had not yet retrieved.
    pub(crate) fn store(&self, op: PendingOp) {
        let context = op.context;
        let issued = op.op;
        if let Some(previous) = self.slots.insert(context, op) {
            debug!(
                "{}: {} replaces unretrieved pending {}",
                context, issued, previous.op
            );
        }
    }

    pub(crate) fn take(&self, context: ContextId) -> Option<PendingOp> {
        self.slots.remove(&context).map(|(_, op)| op)
    }

    pub(crate) fn contains(&self, context: ContextId) -> bool {
        self.slots.contains_key(&context)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn spawn_value<T: Send + 'static>(
        rt: &tokio::runtime::Runtime,
        ctx: ContextId,
        op: &'static str,
        value: T,
    ) -> PendingOp {
        let handle = rt.spawn(async move { Ok(Box::new(value) as AnyValue) });
        PendingOp::new(op, ctx, handle, rt.handle().clone())
    }

    #[test]
    fn test_wait_returns_typed_value() {
        let rt = runtime();
        let pending = spawn_value(&rt, ContextId::new(1), "delete", true);
        assert_eq!(pending.op(), "delete");
        assert!(pending.wait::<bool>().unwrap());
    }

    #[test]
    fn test_wait_with_wrong_type_reports_mismatch() {
        let rt = runtime();
        let pending = spawn_value(&rt, ContextId::new(1), "delete", true);
        assert!(matches!(
            pending.wait::<u64>(),
            Err(GatewayError::PendingTypeMismatch { op: "delete" })
        ));
    }

    #[test]
    fn test_abort_reports_cancelled() {
        let rt = runtime();
        let handle = rt.spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(Box::new(()) as AnyValue)
        });
        let pending = PendingOp::new("format", ContextId::new(1), handle, rt.handle().clone());
        pending.abort();
        assert!(matches!(
            pending.wait::<()>(),
            Err(GatewayError::Cancelled { op: "format" })
        ));
    }

    #[test]
    fn test_wait_from_runtime_task() {
        let rt = runtime();
        let pending = spawn_value(&rt, ContextId::new(1), "size", 7u64);
        let waited = rt
            .block_on(rt.spawn(async move { pending.wait::<u64>() }))
            .unwrap();
        assert_eq!(waited.unwrap(), 7);
    }

    #[test]
    fn test_wait_on_single_threaded_task_is_refused() {
        let rt = runtime();
        let pending = spawn_value(&rt, ContextId::new(1), "size", 7u64);
        let local = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let res = local.block_on(async move { pending.wait::<u64>() });
        assert!(matches!(
            res,
            Err(GatewayError::BlockingInAsyncContext { op: "size" })
        ));
    }

    #[test]
    fn test_slot_overwrite_keeps_latest() {
        let rt = runtime();
        let slots = PendingSlots::new();
        let ctx = ContextId::new(5);

        slots.store(spawn_value(&rt, ctx, "mkdirs", ()));
        slots.store(spawn_value(&rt, ctx, "delete", false));
        assert_eq!(slots.len(), 1);

        let pending = slots.take(ctx).unwrap();
        assert_eq!(pending.op(), "delete");
        assert!(!slots.contains(ctx));
        assert!(slots.take(ctx).is_none());
    }

    #[test]
    fn test_slots_are_per_context() {
        let rt = runtime();
        let slots = PendingSlots::new();
        slots.store(spawn_value(&rt, ContextId::new(1), "mkdirs", ()));
        slots.store(spawn_value(&rt, ContextId::new(2), "delete", true));

        assert_eq!(slots.take(ContextId::new(1)).unwrap().op(), "mkdirs");
        assert_eq!(slots.take(ContextId::new(2)).unwrap().op(), "delete");
    }
}
