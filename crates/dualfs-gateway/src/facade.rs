//! Optional-async filesystem facade.
//!
//! [`FsGateway`] re-exposes a [`FileSystemBackend`] under one method set that runs either
//! synchronously or asynchronously depending on the caller's [`CallContext`]:
//!
//! * sync mode: the backing operation is driven to completion on the calling thread and
//!   its result (or a [`GatewayError::Backing`]) is returned;
//! * async mode: the operation is spawned on the runtime, its [`PendingOp`] is stored in
//!   the slot of the calling context, and [`CallResult::Pending`] is returned at once.
//!
//! Only one pending operation is kept per context; a later async call replaces an earlier
//! one that was never retrieved. Read accessors bypass the distinction and forward directly.
//!
//! Sync-mode calls and [`PendingOp::wait`] block the calling thread. From a task on a
//! multi-threaded runtime the worker is handed off before blocking; from a task on a
//! single-threaded runtime the call fails with [`GatewayError::BlockingInAsyncContext`].
//! Async code should prefer async mode and [`PendingOp::join`].
//!
//! A pending operation stays in its context's slot until it is taken or discarded, so a
//! context that issues async calls and is then abandoned should call
//! [`FsGateway::discard_pending`].

use dualfs_meta::{FsPath, ModeTable, ProxyPaths};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::backend::{FileSystemBackend, FsTask};
use crate::context::CallContext;
use crate::error::{BackingResult, GatewayError, Result};
use crate::pending::{block_on_runtime, AnyValue, PendingOp, PendingSlots};
use crate::types::{
    AppendOptions, BlockLocation, CreateOptions, FileInfo, FsConfiguration, FsMetrics,
    InputHandle, OutputHandle, PathSummary, Properties,
};

/// Outcome of a facade call.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult<T> {
    /// The operation completed (sync mode).
    Ready(T),
    /// The operation was started and its handle stored for the calling context (async mode).
    Pending,
}

impl<T> CallResult<T> {
    /// True for [`CallResult::Pending`].
    pub fn is_pending(&self) -> bool {
        matches!(self, CallResult::Pending)
    }

    /// The value of a completed call.
    pub fn ready(self) -> Option<T> {
        match self {
            CallResult::Ready(v) => Some(v),
            CallResult::Pending => None,
        }
    }
}

/// Filesystem facade supporting per-call sync or async execution.
pub struct FsGateway<B: FileSystemBackend> {
    backend: Arc<B>,
    runtime: Handle,
    async_supported: bool,
    pending: PendingSlots,
    table: Option<ModeTable>,
}

impl<B: FileSystemBackend> FsGateway<B> {
    /// Creates a facade supporting async mode; operations run on `runtime`.
    ///
    /// `runtime` must be multi-threaded: a blocked sync caller relies on its workers to
    /// drive timers and IO.
    pub fn new(backend: Arc<B>, runtime: Handle) -> Result<Self> {
        if runtime.runtime_flavor() == RuntimeFlavor::CurrentThread {
            return Err(GatewayError::UnsupportedRuntime {
                reason: "a current-thread runtime cannot drive operations for blocked callers",
            });
        }
        Ok(Self {
            backend,
            runtime,
            async_supported: true,
            pending: PendingSlots::new(),
            table: None,
        })
    }

    /// Creates a facade that rejects async-mode calls.
    pub fn sync_only(backend: Arc<B>, runtime: Handle) -> Result<Self> {
        Ok(Self {
            async_supported: false,
            ..Self::new(backend, runtime)?
        })
    }

    /// Attaches the filesystem's mode table, enabling [`proxy_paths`](Self::proxy_paths)
    /// and [`is_proxy`](Self::is_proxy).
    pub fn with_mode_table(mut self, table: ModeTable) -> Self {
        self.table = Some(table);
        self
    }

    /// Whether this facade accepts async-mode calls.
    pub fn is_async_supported(&self) -> bool {
        self.async_supported
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Takes the operation most recently started in async mode by `ctx`.
    ///
    /// Returns `None` if the context has nothing pending or already took it.
    pub fn take_pending(&self, ctx: &CallContext) -> Option<PendingOp> {
        self.pending.take(ctx.id())
    }

    /// True if `ctx` has an unretrieved pending operation.
    pub fn has_pending(&self, ctx: &CallContext) -> bool {
        self.pending.contains(ctx.id())
    }

    /// Drops whatever `ctx` left pending. The operation itself keeps running detached.
    ///
    /// Returns true if there was something to drop.
    pub fn discard_pending(&self, ctx: &CallContext) -> bool {
        self.pending.take(ctx.id()).is_some()
    }

    /// Number of contexts holding an unretrieved pending operation.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Runs `fut` according to the context's mode.
    fn save_or_get<T, F>(&self, ctx: &CallContext, op: &'static str, fut: F) -> Result<CallResult<T>>
    where
        T: Send + 'static,
        F: Future<Output = BackingResult<T>> + Send + 'static,
    {
        let cancel = ctx.cancellation().cloned();
        let guarded = async move {
            match cancel {
                Some(token) => tokio::select! {
                    res = fut => res.map_err(|e| GatewayError::from_backing(op, e)),
                    _ = token.cancelled() => Err(GatewayError::Cancelled { op }),
                },
                None => fut.await.map_err(|e| GatewayError::from_backing(op, e)),
            }
        };

        if !ctx.is_async() {
            return block_on_runtime(&self.runtime, op, guarded)?.map(CallResult::Ready);
        }

        if !self.async_supported {
            return Err(GatewayError::AsyncNotSupported);
        }

        let handle = self
            .runtime
            .spawn(async move { guarded.await.map(|v| Box::new(v) as AnyValue) });
        self.pending
            .store(PendingOp::new(op, ctx.id(), handle, self.runtime.clone()));
        Ok(CallResult::Pending)
    }

    /// Creates a file. Completes with the output stream handle.
    pub fn create(
        &self,
        ctx: &CallContext,
        path: &FsPath,
        opts: CreateOptions,
    ) -> Result<CallResult<OutputHandle>> {
        let backend = self.backend.clone();
        let path = path.clone();
        self.save_or_get(ctx, "create", async move { backend.create(&path, opts).await })
    }

    /// Opens a file for appending. Completes with the output stream handle.
    pub fn append(
        &self,
        ctx: &CallContext,
        path: &FsPath,
        opts: AppendOptions,
    ) -> Result<CallResult<OutputHandle>> {
        let backend = self.backend.clone();
        let path = path.clone();
        self.save_or_get(ctx, "append", async move { backend.append(&path, opts).await })
    }

    /// Deletes a path. Completes with `true` if something was deleted.
    pub fn delete(
        &self,
        ctx: &CallContext,
        path: &FsPath,
        recursive: bool,
    ) -> Result<CallResult<bool>> {
        let backend = self.backend.clone();
        let path = path.clone();
        self.save_or_get(ctx, "delete", async move {
            backend.delete(&path, recursive).await
        })
    }

    /// Moves a path.
    pub fn rename(&self, ctx: &CallContext, src: &FsPath, dest: &FsPath) -> Result<CallResult<()>> {
        let backend = self.backend.clone();
        let src = src.clone();
        let dest = dest.clone();
        self.save_or_get(ctx, "rename", async move { backend.rename(&src, &dest).await })
    }

    /// Creates a directory and its parents.
    pub fn mkdirs(
        &self,
        ctx: &CallContext,
        path: &FsPath,
        props: Properties,
    ) -> Result<CallResult<()>> {
        let backend = self.backend.clone();
        let path = path.clone();
        self.save_or_get(ctx, "mkdirs", async move { backend.mkdirs(&path, props).await })
    }

    /// Sets access and modification times.
    pub fn set_times(
        &self,
        ctx: &CallContext,
        path: &FsPath,
        access_time: i64,
        modification_time: i64,
    ) -> Result<CallResult<()>> {
        let backend = self.backend.clone();
        let path = path.clone();
        self.save_or_get(ctx, "set_times", async move {
            backend
                .set_times(&path, access_time, modification_time)
                .await
        })
    }

    /// Merges properties into an entry. Completes with its new status, `None` if missing.
    pub fn update(
        &self,
        ctx: &CallContext,
        path: &FsPath,
        props: Properties,
    ) -> Result<CallResult<Option<FileInfo>>> {
        let backend = self.backend.clone();
        let path = path.clone();
        self.save_or_get(ctx, "update", async move { backend.update(&path, props).await })
    }

    /// Removes all content.
    pub fn format(&self, ctx: &CallContext) -> Result<CallResult<()>> {
        let backend = self.backend.clone();
        self.save_or_get(ctx, "format", async move { backend.format().await })
    }

    /// Runs a task over the files below `paths`.
    pub fn execute<T: FsTask>(
        &self,
        ctx: &CallContext,
        task: T,
        paths: Vec<FsPath>,
    ) -> Result<CallResult<T::Output>> {
        let backend = self.backend.clone();
        self.save_or_get(ctx, "execute", async move { backend.execute(task, paths).await })
    }

    /// Waits for background deletes to finish.
    pub fn await_deletes(&self, ctx: &CallContext) -> Result<CallResult<()>> {
        let backend = self.backend.clone();
        self.save_or_get(ctx, "await_deletes", async move { backend.await_deletes().await })
    }

    /// Opens a file for reading.
    pub fn open(&self, path: &FsPath, buffer_size: Option<usize>) -> Result<InputHandle> {
        self.backend
            .open(path, buffer_size)
            .map_err(|e| GatewayError::from_backing("open", e))
    }

    /// Status of a path.
    pub fn info(&self, path: &FsPath) -> Result<Option<FileInfo>> {
        self.backend
            .info(path)
            .map_err(|e| GatewayError::from_backing("info", e))
    }

    /// True if the path exists.
    pub fn exists(&self, path: &FsPath) -> Result<bool> {
        self.backend
            .exists(path)
            .map_err(|e| GatewayError::from_backing("exists", e))
    }

    /// Length of a file or subtree.
    pub fn size(&self, path: &FsPath) -> Result<u64> {
        self.backend
            .size(path)
            .map_err(|e| GatewayError::from_backing("size", e))
    }

    /// Direct children of a directory.
    pub fn list_paths(&self, path: &FsPath) -> Result<Vec<FsPath>> {
        self.backend
            .list_paths(path)
            .map_err(|e| GatewayError::from_backing("list_paths", e))
    }

    /// Status of the direct children of a directory.
    pub fn list_files(&self, path: &FsPath) -> Result<Vec<FileInfo>> {
        self.backend
            .list_files(path)
            .map_err(|e| GatewayError::from_backing("list_files", e))
    }

    /// Aggregate counts for a subtree.
    pub fn summary(&self, path: &FsPath) -> Result<PathSummary> {
        self.backend
            .summary(path)
            .map_err(|e| GatewayError::from_backing("summary", e))
    }

    /// Hosts storing a byte range of a file.
    pub fn affinity(&self, path: &FsPath, start: u64, len: u64) -> Result<Vec<BlockLocation>> {
        self.backend
            .affinity(path, start, len)
            .map_err(|e| GatewayError::from_backing("affinity", e))
    }

    /// Filesystem-wide counters.
    pub fn metrics(&self) -> Result<FsMetrics> {
        self.backend
            .metrics()
            .map_err(|e| GatewayError::from_backing("metrics", e))
    }

    /// Resets the counters.
    pub fn reset_metrics(&self) -> Result<()> {
        self.backend
            .reset_metrics()
            .map_err(|e| GatewayError::from_backing("reset_metrics", e))
    }

    /// Static configuration of the backend.
    pub fn configuration(&self) -> FsConfiguration {
        self.backend.configuration()
    }

    /// Filesystem name.
    pub fn name(&self) -> String {
        self.backend.configuration().name
    }

    /// Bytes per affinity group.
    pub fn group_block_size(&self) -> u64 {
        self.backend.configuration().group_block_size()
    }

    /// Free-form filesystem properties.
    pub fn properties(&self) -> Properties {
        self.backend.properties()
    }

    /// Bytes used by file data.
    pub fn used_space_size(&self) -> Result<u64> {
        self.backend
            .used_space_size()
            .map_err(|e| GatewayError::from_backing("used_space_size", e))
    }

    /// Default mode and prefix overrides of the attached mode table.
    pub fn proxy_paths(&self) -> Result<ProxyPaths> {
        Ok(self.mode_table()?.snapshot()?.proxy_paths())
    }

    /// True if the path is served by the secondary filesystem alone.
    pub fn is_proxy(&self, path: &FsPath) -> Result<bool> {
        Ok(self.mode_table()?.snapshot()?.is_proxy(path))
    }

    fn mode_table(&self) -> Result<&ModeTable> {
        self.table
            .as_ref()
            .ok_or_else(|| GatewayError::UnknownFileSystem {
                name: self.name(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecMode;
    use crate::memory::MemoryBackend;
    use dualfs_meta::{FsMode, PathModeResolver};
    use std::time::{Duration, Instant};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn p(s: &str) -> FsPath {
        FsPath::parse(s).unwrap()
    }

    fn gateway(rt: &tokio::runtime::Runtime) -> FsGateway<MemoryBackend> {
        FsGateway::new(Arc::new(MemoryBackend::new("igfs")), rt.handle().clone()).unwrap()
    }

    #[test]
    fn test_sync_mkdirs_and_info() {
        let rt = runtime();
        let fs = gateway(&rt);
        let ctx = CallContext::new();

        let res = fs.mkdirs(&ctx, &p("/a/b"), Properties::new()).unwrap();
        assert_eq!(res, CallResult::Ready(()));
        assert!(fs.exists(&p("/a")).unwrap());
        assert!(fs.info(&p("/a/b")).unwrap().unwrap().is_dir);
        assert!(!fs.has_pending(&ctx));
    }

    #[test]
    fn test_sync_failure_surfaces_backing_error() {
        let rt = runtime();
        let fs = gateway(&rt);
        let ctx = CallContext::new();

        let err = fs.rename(&ctx, &p("/missing"), &p("/other")).unwrap_err();
        assert!(matches!(err, GatewayError::Backing { op: "rename", .. }));
    }

    #[test]
    fn test_async_call_returns_pending_and_result_is_retrievable() {
        let rt = runtime();
        let fs = gateway(&rt);
        let ctx = CallContext::new();

        fs.mkdirs(&ctx, &p("/d"), Properties::new()).unwrap();
        let res = fs.delete(&ctx.asynchronous(), &p("/d"), true).unwrap();
        assert!(res.is_pending());
        assert!(fs.has_pending(&ctx));

        let pending = fs.take_pending(&ctx).unwrap();
        assert_eq!(pending.op(), "delete");
        assert!(pending.wait::<bool>().unwrap());
        assert!(!fs.exists(&p("/d")).unwrap());
        assert!(fs.take_pending(&ctx).is_none());
    }

    #[test]
    fn test_async_failure_discoverable_through_handle() {
        let rt = runtime();
        let fs = gateway(&rt);
        let ctx = CallContext::new();

        assert!(fs
            .rename(&ctx.asynchronous(), &p("/missing"), &p("/x"))
            .unwrap()
            .is_pending());
        let err = fs.take_pending(&ctx).unwrap().wait::<()>().unwrap_err();
        assert!(err.is_backing());
    }

    #[test]
    fn test_second_async_call_overwrites_first() {
        let rt = runtime();
        let fs = gateway(&rt);
        let ctx = CallContext::new();
        let actx = ctx.asynchronous();

        let _ = fs.mkdirs(&actx, &p("/one"), Properties::new()).unwrap();
        let _ = fs.delete(&actx, &p("/nothing"), false).unwrap();
        assert_eq!(fs.pending_count(), 1);

        let pending = fs.take_pending(&ctx).unwrap();
        assert_eq!(pending.op(), "delete");
        assert!(!pending.wait::<bool>().unwrap());
    }

    #[test]
    fn test_async_call_does_not_block_on_slow_backend() {
        let rt = runtime();
        let backend = Arc::new(MemoryBackend::new("igfs"));
        backend.set_latency(Duration::from_secs(30));
        let fs = FsGateway::new(backend, rt.handle().clone()).unwrap();
        let ctx = CallContext::new();

        let started = Instant::now();
        let res = fs.mkdirs(&ctx.asynchronous(), &p("/slow"), Properties::new());
        assert!(res.unwrap().is_pending());
        assert!(started.elapsed() < Duration::from_secs(5));

        let pending = fs.take_pending(&ctx).unwrap();
        assert!(!pending.is_finished());
        pending.abort();
        assert!(matches!(
            pending.wait::<()>(),
            Err(GatewayError::Cancelled { op: "mkdirs" })
        ));
    }

    #[test]
    fn test_sync_only_rejects_async_mode() {
        let rt = runtime();
        let fs = FsGateway::sync_only(
            Arc::new(MemoryBackend::new("igfs")),
            rt.handle().clone(),
        )
        .unwrap();
        let ctx = CallContext::new();
        assert!(!fs.is_async_supported());
        assert!(matches!(
            fs.format(&ctx.asynchronous()),
            Err(GatewayError::AsyncNotSupported)
        ));
        assert_eq!(fs.format(&ctx).unwrap(), CallResult::Ready(()));
    }

    #[test]
    fn test_cancelling_sync_wait_cancels_operation() {
        let rt = runtime();
        let backend = Arc::new(MemoryBackend::new("igfs"));
        backend.set_latency(Duration::from_millis(500));
        let fs = FsGateway::new(backend.clone(), rt.handle().clone()).unwrap();

        let token = tokio_util::sync::CancellationToken::new();
        let ctx = CallContext::new().with_cancellation(token.clone());
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            token.cancel();
        });

        let err = fs.mkdirs(&ctx, &p("/never"), Properties::new()).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, GatewayError::Cancelled { op: "mkdirs" }));

        // The backing future was dropped before it could apply the change.
        std::thread::sleep(Duration::from_millis(700));
        assert!(!backend.exists(&p("/never")).unwrap());
    }

    #[test]
    fn test_contexts_do_not_share_slots() {
        let rt = runtime();
        let fs = gateway(&rt);
        let a = CallContext::new();
        let b = CallContext::new();

        let _ = fs.mkdirs(&a.asynchronous(), &p("/a"), Properties::new()).unwrap();
        let _ = fs.mkdirs(&b.asynchronous(), &p("/b"), Properties::new()).unwrap();

        assert_eq!(fs.pending_count(), 2);
        fs.take_pending(&a).unwrap().wait::<()>().unwrap();
        fs.take_pending(&b).unwrap().wait::<()>().unwrap();
        assert!(fs.exists(&p("/a")).unwrap());
        assert!(fs.exists(&p("/b")).unwrap());
    }

    #[test]
    fn test_execute_runs_task_sync_and_async() {
        struct CountFiles;
        impl FsTask for CountFiles {
            type Output = usize;
            fn run(&self, files: Vec<FileInfo>) -> BackingResult<usize> {
                Ok(files.len())
            }
        }

        let rt = runtime();
        let fs = gateway(&rt);
        fs.backend().put_file(&p("/data/x"), 10).unwrap();
        fs.backend().put_file(&p("/data/y"), 20).unwrap();
        let ctx = CallContext::new();

        let res = fs.execute(&ctx, CountFiles, vec![p("/data")]).unwrap();
        assert_eq!(res.ready(), Some(2));

        let _ = fs.execute(&ctx.asynchronous(), CountFiles, vec![p("/data/x")]).unwrap();
        assert_eq!(fs.take_pending(&ctx).unwrap().wait::<usize>().unwrap(), 1);
    }

    #[test]
    fn test_reads_are_forwarded() {
        let rt = runtime();
        let fs = gateway(&rt);
        fs.backend().put_file(&p("/f"), 100).unwrap();

        assert_eq!(fs.size(&p("/f")).unwrap(), 100);
        assert_eq!(fs.open(&p("/f"), None).unwrap().length, 100);
        assert_eq!(fs.list_paths(&FsPath::root()).unwrap(), vec![p("/f")]);
        assert_eq!(fs.used_space_size().unwrap(), 100);
        assert_eq!(fs.name(), "igfs");
        assert!(matches!(
            fs.open(&p("/missing"), None),
            Err(GatewayError::Backing { op: "open", .. })
        ));
    }

    #[test]
    fn test_proxy_paths_require_mode_table() {
        let rt = runtime();
        let fs = gateway(&rt);
        assert!(matches!(
            fs.proxy_paths(),
            Err(GatewayError::UnknownFileSystem { .. })
        ));

        let table = ModeTable::with_resolver(PathModeResolver::from_modes(
            "igfs",
            FsMode::DualAsync,
            vec![(p("/remote"), FsMode::Proxy)],
        ));
        let fs = fs.with_mode_table(table);
        assert!(fs.is_proxy(&p("/remote/x")).unwrap());
        assert!(!fs.is_proxy(&p("/local")).unwrap());
        assert_eq!(fs.proxy_paths().unwrap().default_mode, FsMode::DualAsync);
    }

    #[test]
    fn test_sync_call_from_runtime_task() {
        let rt = runtime();
        let fs = Arc::new(gateway(&rt));
        let task_fs = fs.clone();

        let res = rt
            .block_on(rt.spawn(async move {
                task_fs.mkdirs(&CallContext::new(), &p("/x"), Properties::new())
            }))
            .unwrap();
        assert_eq!(res.unwrap(), CallResult::Ready(()));
        assert!(fs.exists(&p("/x")).unwrap());
    }

    #[test]
    fn test_sync_call_from_single_threaded_task_is_refused() {
        let rt = runtime();
        let fs = gateway(&rt);
        let local = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let res = local.block_on(async {
            fs.mkdirs(&CallContext::new(), &p("/x"), Properties::new())
        });
        assert!(matches!(
            res,
            Err(GatewayError::BlockingInAsyncContext { op: "mkdirs" })
        ));
        assert!(!fs.exists(&p("/x")).unwrap());
    }

    #[test]
    fn test_current_thread_runtime_rejected() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let backend = Arc::new(MemoryBackend::new("igfs"));
        assert!(matches!(
            FsGateway::new(backend.clone(), rt.handle().clone()),
            Err(GatewayError::UnsupportedRuntime { .. })
        ));
        assert!(FsGateway::sync_only(backend, rt.handle().clone()).is_err());
    }

    #[test]
    fn test_discard_pending_frees_slot() {
        let rt = runtime();
        let fs = gateway(&rt);
        let ctx = CallContext::new();

        let _ = fs.mkdirs(&ctx.asynchronous(), &p("/left"), Properties::new()).unwrap();
        assert!(fs.discard_pending(&ctx));
        assert_eq!(fs.pending_count(), 0);
        assert!(!fs.discard_pending(&ctx));
    }

    #[test]
    fn test_context_mode_defaults_to_sync() {
        assert_eq!(CallContext::new().mode(), ExecMode::Sync);
    }
}
