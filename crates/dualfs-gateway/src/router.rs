//! Mode-aware routing between a primary and a secondary filesystem.
//!
//! [`DualModeBackend`] is itself a [`FileSystemBackend`]. Every path-scoped call resolves
//! the path's mode against the filesystem's current [`ModeTable`] snapshot and is sent to
//! the primary store, the secondary store, or both:
//!
//! | mode       | mutations                             | reads     |
//! |------------|---------------------------------------|-----------|
//! | PRIMARY    | primary                               | primary   |
//! | PROXY      | secondary                             | secondary |
//! | DUAL_SYNC  | secondary, then primary               | primary   |
//! | DUAL_ASYNC | primary, secondary mirrored in background | primary |
//!
//! Filesystem-wide operations and reads always go to the primary.

use async_trait::async_trait;
use dualfs_meta::{FsMode, FsPath, ModeTable};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{FileSystemBackend, FsTask};
use crate::error::{BackingResult, GatewayError};
use crate::types::{
    AppendOptions, BlockLocation, CreateOptions, FileInfo, FsConfiguration, FsMetrics,
    InputHandle, OutputHandle, PathSummary, Properties,
};

/// Routes filesystem calls by path mode.
pub struct DualModeBackend<P, S = P> {
    primary: Arc<P>,
    secondary: Option<Arc<S>>,
    table: ModeTable,
    mirrors: Mutex<Vec<JoinHandle<()>>>,
}

enum Target<'a, P, S> {
    Primary(&'a Arc<P>),
    Secondary(&'a Arc<S>),
}

impl<P: FileSystemBackend, S: FileSystemBackend> DualModeBackend<P, S> {
    /// Routes over both stores.
    pub fn new(primary: Arc<P>, secondary: Arc<S>, table: ModeTable) -> Self {
        Self {
            primary,
            secondary: Some(secondary),
            table,
            mirrors: Mutex::new(Vec::new()),
        }
    }

    /// Routes over the primary alone; paths needing the secondary fail with
    /// [`GatewayError::SecondaryUnavailable`].
    pub fn primary_only(primary: Arc<P>, table: ModeTable) -> Self {
        Self {
            primary,
            secondary: None,
            table,
            mirrors: Mutex::new(Vec::new()),
        }
    }

    /// The primary store.
    pub fn primary(&self) -> &Arc<P> {
        &self.primary
    }

    /// The secondary store, if configured.
    pub fn secondary(&self) -> Option<&Arc<S>> {
        self.secondary.as_ref()
    }

    /// The mode table consulted on every call.
    pub fn mode_table(&self) -> &ModeTable {
        &self.table
    }

    /// Resolves the mode of a path against the current snapshot.
    pub fn mode_of(&self, op: &str, path: &FsPath) -> BackingResult<FsMode> {
        let mode = self.table.resolve(path)?;
        debug!("{}: {} {} -> {}", self.table.name(), op, path, mode);
        Ok(mode)
    }

    /// Waits for every background mirror started so far.
    pub async fn flush_mirrors(&self) {
        let pending: Vec<JoinHandle<()>> = match self.mirrors.lock() {
            Ok(mut mirrors) => mirrors.drain(..).collect(),
            Err(_) => return,
        };
        for handle in pending {
            let _ = handle.await;
        }
    }

    fn secondary_for(&self, path: &FsPath, mode: FsMode) -> BackingResult<&Arc<S>> {
        self.secondary.as_ref().ok_or_else(|| {
            GatewayError::SecondaryUnavailable {
                path: path.clone(),
                mode,
            }
            .into()
        })
    }

    fn read_target(&self, op: &str, path: &FsPath) -> BackingResult<Target<'_, P, S>> {
        match self.mode_of(op, path)? {
            FsMode::Proxy => Ok(Target::Secondary(self.secondary_for(path, FsMode::Proxy)?)),
            FsMode::Primary | FsMode::DualSync | FsMode::DualAsync => {
                Ok(Target::Primary(&self.primary))
            }
        }
    }

    fn track_mirror(&self, handle: JoinHandle<()>) {
        if let Ok(mut mirrors) = self.mirrors.lock() {
            mirrors.retain(|h| !h.is_finished());
            mirrors.push(handle);
        }
    }

    /// Applies one mutation according to `mode`.
    ///
    /// `on_secondary` runs before `on_primary` in DUAL_SYNC so that a secondary failure
    /// leaves the primary untouched.
    async fn mutate<T, FP, FutP, FS, FutS>(
        &self,
        op: &'static str,
        path: &FsPath,
        mode: FsMode,
        on_primary: FP,
        on_secondary: FS,
    ) -> BackingResult<T>
    where
        T: Send + 'static,
        FP: FnOnce(Arc<P>) -> FutP + Send,
        FutP: Future<Output = BackingResult<T>> + Send,
        FS: FnOnce(Arc<S>) -> FutS + Send,
        FutS: Future<Output = BackingResult<T>> + Send + 'static,
    {
        match mode {
            FsMode::Primary => on_primary(self.primary.clone()).await,
            FsMode::Proxy => {
                let secondary = self.secondary_for(path, mode)?.clone();
                on_secondary(secondary).await
            }
            FsMode::DualSync => {
                let secondary = self.secondary_for(path, mode)?.clone();
                on_secondary(secondary).await?;
                on_primary(self.primary.clone()).await
            }
            FsMode::DualAsync => {
                let secondary = self.secondary_for(path, mode)?.clone();
                let res = on_primary(self.primary.clone()).await?;
                let mirror = on_secondary(secondary);
                let name = self.table.name().to_string();
                let target = path.clone();
                self.track_mirror(tokio::spawn(async move {
                    if let Err(e) = mirror.await {
                        warn!("{}: secondary {} of {} failed: {}", name, op, target, e);
                    }
                }));
                Ok(res)
            }
        }
    }
}

#[async_trait]
impl<P: FileSystemBackend, S: FileSystemBackend> FileSystemBackend for DualModeBackend<P, S> {
    async fn create(&self, path: &FsPath, opts: CreateOptions) -> BackingResult<OutputHandle> {
        let mode = self.mode_of("create", path)?;
        let (p1, p2, opts2) = (path.clone(), path.clone(), opts.clone());
        self.mutate(
            "create",
            path,
            mode,
            move |b| async move { b.create(&p1, opts).await },
            move |b| async move { b.create(&p2, opts2).await },
        )
        .await
    }

    async fn append(&self, path: &FsPath, opts: AppendOptions) -> BackingResult<OutputHandle> {
        let mode = self.mode_of("append", path)?;
        let (p1, p2, opts2) = (path.clone(), path.clone(), opts.clone());
        self.mutate(
            "append",
            path,
            mode,
            move |b| async move { b.append(&p1, opts).await },
            move |b| async move { b.append(&p2, opts2).await },
        )
        .await
    }

    async fn delete(&self, path: &FsPath, recursive: bool) -> BackingResult<bool> {
        let mode = self.mode_of("delete", path)?;
        let (p1, p2) = (path.clone(), path.clone());
        self.mutate(
            "delete",
            path,
            mode,
            move |b| async move { b.delete(&p1, recursive).await },
            move |b| async move { b.delete(&p2, recursive).await },
        )
        .await
    }

    async fn rename(&self, src: &FsPath, dest: &FsPath) -> BackingResult<()> {
        let src_mode = self.mode_of("rename", src)?;
        let dest_mode = self.mode_of("rename", dest)?;
        if src_mode != dest_mode {
            return Err(GatewayError::ModeMismatch {
                src: src.clone(),
                src_mode,
                dest: dest.clone(),
                dest_mode,
            }
            .into());
        }
        let (s1, d1, s2, d2) = (src.clone(), dest.clone(), src.clone(), dest.clone());
        self.mutate(
            "rename",
            src,
            src_mode,
            move |b| async move { b.rename(&s1, &d1).await },
            move |b| async move { b.rename(&s2, &d2).await },
        )
        .await
    }

    async fn mkdirs(&self, path: &FsPath, props: Properties) -> BackingResult<()> {
        let mode = self.mode_of("mkdirs", path)?;
        let (p1, p2, props2) = (path.clone(), path.clone(), props.clone());
        self.mutate(
            "mkdirs",
            path,
            mode,
            move |b| async move { b.mkdirs(&p1, props).await },
            move |b| async move { b.mkdirs(&p2, props2).await },
        )
        .await
    }

    async fn set_times(
        &self,
        path: &FsPath,
        access_time: i64,
        modification_time: i64,
    ) -> BackingResult<()> {
        let mode = self.mode_of("set_times", path)?;
        let (p1, p2) = (path.clone(), path.clone());
        self.mutate(
            "set_times",
            path,
            mode,
            move |b| async move { b.set_times(&p1, access_time, modification_time).await },
            move |b| async move { b.set_times(&p2, access_time, modification_time).await },
        )
        .await
    }

    async fn update(&self, path: &FsPath, props: Properties) -> BackingResult<Option<FileInfo>> {
        let mode = self.mode_of("update", path)?;
        let (p1, p2, props2) = (path.clone(), path.clone(), props.clone());
        self.mutate(
            "update",
            path,
            mode,
            move |b| async move { b.update(&p1, props).await },
            move |b| async move { b.update(&p2, props2).await },
        )
        .await
    }

    async fn format(&self) -> BackingResult<()> {
        self.primary.format().await
    }

    async fn execute<T: FsTask>(&self, task: T, paths: Vec<FsPath>) -> BackingResult<T::Output> {
        self.primary.execute(task, paths).await
    }

    async fn await_deletes(&self) -> BackingResult<()> {
        self.primary.await_deletes().await
    }

    fn open(&self, path: &FsPath, buffer_size: Option<usize>) -> BackingResult<InputHandle> {
        match self.read_target("open", path)? {
            Target::Primary(b) => b.open(path, buffer_size),
            Target::Secondary(b) => b.open(path, buffer_size),
        }
    }

    fn info(&self, path: &FsPath) -> BackingResult<Option<FileInfo>> {
        match self.read_target("info", path)? {
            Target::Primary(b) => b.info(path),
            Target::Secondary(b) => b.info(path),
        }
    }

    fn exists(&self, path: &FsPath) -> BackingResult<bool> {
        match self.read_target("exists", path)? {
            Target::Primary(b) => b.exists(path),
            Target::Secondary(b) => b.exists(path),
        }
    }

    fn size(&self, path: &FsPath) -> BackingResult<u64> {
        match self.read_target("size", path)? {
            Target::Primary(b) => b.size(path),
            Target::Secondary(b) => b.size(path),
        }
    }

    fn list_paths(&self, path: &FsPath) -> BackingResult<Vec<FsPath>> {
        match self.read_target("list_paths", path)? {
            Target::Primary(b) => b.list_paths(path),
            Target::Secondary(b) => b.list_paths(path),
        }
    }

    fn list_files(&self, path: &FsPath) -> BackingResult<Vec<FileInfo>> {
        match self.read_target("list_files", path)? {
            Target::Primary(b) => b.list_files(path),
            Target::Secondary(b) => b.list_files(path),
        }
    }

    fn summary(&self, path: &FsPath) -> BackingResult<PathSummary> {
        match self.read_target("summary", path)? {
            Target::Primary(b) => b.summary(path),
            Target::Secondary(b) => b.summary(path),
        }
    }

    fn affinity(&self, path: &FsPath, start: u64, len: u64) -> BackingResult<Vec<BlockLocation>> {
        match self.read_target("affinity", path)? {
            Target::Primary(b) => b.affinity(path, start, len),
            Target::Secondary(b) => b.affinity(path, start, len),
        }
    }

    fn metrics(&self) -> BackingResult<FsMetrics> {
        self.primary.metrics()
    }

    fn reset_metrics(&self) -> BackingResult<()> {
        self.primary.reset_metrics()
    }

    fn configuration(&self) -> FsConfiguration {
        self.primary.configuration()
    }

    fn properties(&self) -> Properties {
        self.primary.properties()
    }

    fn used_space_size(&self) -> BackingResult<u64> {
        self.primary.used_space_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use dualfs_meta::PathModeResolver;

    fn p(s: &str) -> FsPath {
        FsPath::parse(s).unwrap()
    }

    fn router() -> (
        Arc<MemoryBackend>,
        Arc<MemoryBackend>,
        DualModeBackend<MemoryBackend>,
    ) {
        let table = ModeTable::with_resolver(PathModeResolver::from_modes(
            "igfs",
            FsMode::Primary,
            vec![
                (p("/proxy"), FsMode::Proxy),
                (p("/sync"), FsMode::DualSync),
                (p("/async"), FsMode::DualAsync),
            ],
        ));
        let primary = Arc::new(MemoryBackend::new("igfs"));
        let secondary = Arc::new(MemoryBackend::new("hdfs"));
        let router = DualModeBackend::new(primary.clone(), secondary.clone(), table);
        (primary, secondary, router)
    }

    #[tokio::test]
    async fn test_primary_mode_touches_primary_only() {
        let (primary, secondary, router) = router();
        router.mkdirs(&p("/local/d"), Properties::new()).await.unwrap();
        assert!(primary.exists(&p("/local/d")).unwrap());
        assert!(!secondary.exists(&p("/local")).unwrap());
    }

    #[tokio::test]
    async fn test_proxy_mode_forwards_to_secondary() {
        let (primary, secondary, router) = router();
        router.mkdirs(&p("/proxy/d"), Properties::new()).await.unwrap();
        assert!(secondary.exists(&p("/proxy/d")).unwrap());
        assert!(!primary.exists(&p("/proxy")).unwrap());
        assert!(router.exists(&p("/proxy/d")).unwrap());
    }

    #[tokio::test]
    async fn test_dual_sync_writes_secondary_first() {
        let (primary, secondary, router) = router();
        router.mkdirs(&p("/sync/d"), Properties::new()).await.unwrap();
        assert!(primary.exists(&p("/sync/d")).unwrap());
        assert!(secondary.exists(&p("/sync/d")).unwrap());

        secondary.fail_next("delete");
        assert!(router.delete(&p("/sync/d"), true).await.is_err());
        assert!(primary.exists(&p("/sync/d")).unwrap());
    }

    #[tokio::test]
    async fn test_dual_async_mirrors_in_background() {
        let (primary, secondary, router) = router();
        router.mkdirs(&p("/async/d"), Properties::new()).await.unwrap();
        assert!(primary.exists(&p("/async/d")).unwrap());

        router.flush_mirrors().await;
        assert!(secondary.exists(&p("/async/d")).unwrap());
    }

    #[tokio::test]
    async fn test_dual_async_mirror_failure_does_not_fail_call() {
        let (primary, secondary, router) = router();
        secondary.fail_next("mkdirs");
        router.mkdirs(&p("/async/d"), Properties::new()).await.unwrap();
        router.flush_mirrors().await;
        assert!(primary.exists(&p("/async/d")).unwrap());
        assert!(!secondary.exists(&p("/async/d")).unwrap());
    }

    #[tokio::test]
    async fn test_rename_across_modes_rejected() {
        let (_, _, router) = router();
        router.mkdirs(&p("/local/a"), Properties::new()).await.unwrap();
        let err = router.rename(&p("/local/a"), &p("/proxy/a")).await.unwrap_err();
        let err = err.downcast::<GatewayError>().unwrap();
        assert!(matches!(
            *err,
            GatewayError::ModeMismatch {
                src_mode: FsMode::Primary,
                dest_mode: FsMode::Proxy,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_secondary_reported() {
        let primary = Arc::new(MemoryBackend::new("igfs"));
        let table = ModeTable::with_resolver(PathModeResolver::from_modes(
            "igfs",
            FsMode::Primary,
            vec![(p("/proxy"), FsMode::Proxy)],
        ));
        let router: DualModeBackend<MemoryBackend> = DualModeBackend::primary_only(primary, table);

        router.mkdirs(&p("/ok"), Properties::new()).await.unwrap();
        let err = router.mkdirs(&p("/proxy/x"), Properties::new()).await.unwrap_err();
        assert!(matches!(
            *err.downcast::<GatewayError>().unwrap(),
            GatewayError::SecondaryUnavailable { mode: FsMode::Proxy, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_table_reports_no_providers() {
        let router = DualModeBackend::new(
            Arc::new(MemoryBackend::new("igfs")),
            Arc::new(MemoryBackend::new("hdfs")),
            ModeTable::empty("igfs"),
        );
        let err = router.exists(&p("/x")).unwrap_err();
        assert!(err.downcast_ref::<dualfs_meta::ConfigError>().is_some());
    }

    #[tokio::test]
    async fn test_filesystem_wide_calls_use_primary() {
        let (primary, secondary, router) = router();
        secondary.put_file(&p("/proxy/big"), 1000).unwrap();
        primary.put_file(&p("/small"), 10).unwrap();

        assert_eq!(router.used_space_size().unwrap(), 10);
        assert_eq!(router.configuration().name, "igfs");
        router.format().await.unwrap();
        assert!(!primary.exists(&p("/small")).unwrap());
        assert!(secondary.exists(&p("/proxy/big")).unwrap());
    }
}
