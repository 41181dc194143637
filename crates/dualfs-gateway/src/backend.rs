//! Backing filesystem abstraction.
//!
//! The gateway never stores data itself. Everything is forwarded to a
//! [`FileSystemBackend`]: mutating and long-running operations are async, reads are
//! plain synchronous calls.

use async_trait::async_trait;
use dualfs_meta::FsPath;

use crate::error::BackingResult;
use crate::types::{
    AppendOptions, BlockLocation, CreateOptions, FileInfo, FsConfiguration, FsMetrics,
    InputHandle, OutputHandle, PathSummary, Properties,
};

/// A computation run by the backend over the files below a set of paths.
pub trait FsTask: Send + Sync + 'static {
    /// Result of the task.
    type Output: Send + 'static;

    /// Runs the task over every regular file found below the requested paths.
    fn run(&self, files: Vec<FileInfo>) -> BackingResult<Self::Output>;
}

/// Filesystem operations the gateway forwards to.
#[async_trait]
pub trait FileSystemBackend: Send + Sync + 'static {
    /// Creates a file and opens it for writing.
    async fn create(&self, path: &FsPath, opts: CreateOptions) -> BackingResult<OutputHandle>;

    /// Opens a file for appending.
    async fn append(&self, path: &FsPath, opts: AppendOptions) -> BackingResult<OutputHandle>;

    /// Deletes a file or directory; `Ok(false)` if nothing was there.
    async fn delete(&self, path: &FsPath, recursive: bool) -> BackingResult<bool>;

    /// Moves a file or directory.
    async fn rename(&self, src: &FsPath, dest: &FsPath) -> BackingResult<()>;

    /// Creates a directory and any missing parents.
    async fn mkdirs(&self, path: &FsPath, props: Properties) -> BackingResult<()>;

    /// Sets access and modification times (milliseconds since the epoch).
    async fn set_times(
        &self,
        path: &FsPath,
        access_time: i64,
        modification_time: i64,
    ) -> BackingResult<()>;

    /// Merges properties into an existing entry; `Ok(None)` if the path does not exist.
    async fn update(&self, path: &FsPath, props: Properties) -> BackingResult<Option<FileInfo>>;

    /// Removes all content.
    async fn format(&self) -> BackingResult<()>;

    /// Runs a task over the files below `paths`.
    async fn execute<T: FsTask>(&self, task: T, paths: Vec<FsPath>) -> BackingResult<T::Output>;

    /// Completes once every pending background delete has finished.
    async fn await_deletes(&self) -> BackingResult<()>;

    /// Opens a file for reading.
    fn open(&self, path: &FsPath, buffer_size: Option<usize>) -> BackingResult<InputHandle>;

    /// Status of a path, `None` if it does not exist.
    fn info(&self, path: &FsPath) -> BackingResult<Option<FileInfo>>;

    /// True if the path exists.
    fn exists(&self, path: &FsPath) -> BackingResult<bool>;

    /// Length of a file, or the total length of the files below a directory.
    fn size(&self, path: &FsPath) -> BackingResult<u64>;

    /// Direct children of a directory.
    fn list_paths(&self, path: &FsPath) -> BackingResult<Vec<FsPath>>;

    /// Status of the direct children of a directory.
    fn list_files(&self, path: &FsPath) -> BackingResult<Vec<FileInfo>>;

    /// Aggregate counts for a subtree.
    fn summary(&self, path: &FsPath) -> BackingResult<PathSummary>;

    /// Hosts storing the byte range `[start, start + len)` of a file.
    fn affinity(&self, path: &FsPath, start: u64, len: u64) -> BackingResult<Vec<BlockLocation>>;

    /// Filesystem-wide counters.
    fn metrics(&self) -> BackingResult<FsMetrics>;

    /// Resets the counters.
    fn reset_metrics(&self) -> BackingResult<()>;

    /// Static configuration.
    fn configuration(&self) -> FsConfiguration;

    /// Free-form filesystem properties.
    fn properties(&self) -> Properties;

    /// Bytes used by file data.
    fn used_space_size(&self) -> BackingResult<u64>;
}
