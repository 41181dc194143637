//! In-memory backing filesystem.
//!
//! Used as the primary and secondary store in tests and by the routing self-test of the
//! `check` command. Entries live in one ordered map keyed by absolute path. Async operations
//! can be slowed down or made to fail on demand to exercise the facade and router.

use async_trait::async_trait;
use dualfs_meta::FsPath;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, trace};

use crate::backend::{FileSystemBackend, FsTask};
use crate::error::BackingResult;
use crate::types::{
    AppendOptions, BlockLocation, CreateOptions, FileInfo, FsConfiguration, FsMetrics,
    InputHandle, OutputHandle, PathSummary, Properties,
};

/// Failures reported by [`MemoryBackend`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// No entry at the path.
    #[error("no such file or directory: {0}")]
    NotFound(FsPath),
    /// An entry already exists at the path.
    #[error("already exists: {0}")]
    AlreadyExists(FsPath),
    /// A directory was required.
    #[error("not a directory: {0}")]
    NotADirectory(FsPath),
    /// A regular file was required.
    #[error("is a directory: {0}")]
    IsADirectory(FsPath),
    /// Non-recursive delete of a non-empty directory.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(FsPath),
    /// The root or a move into its own subtree.
    #[error("cannot move {src} to {dest}")]
    InvalidRename {
        /// Source path.
        src: FsPath,
        /// Destination path.
        dest: FsPath,
    },
    /// Failure injected with [`MemoryBackend::fail_next`].
    #[error("injected failure in {0}")]
    Injected(String),
    /// A writer panicked while holding the entry table.
    #[error("entry table poisoned")]
    Poisoned,
}

type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, Clone)]
struct Entry {
    is_dir: bool,
    length: u64,
    block_size: u32,
    access_time: i64,
    modification_time: i64,
    properties: Properties,
}

impl Entry {
    fn dir(properties: Properties) -> Self {
        let now = now_millis();
        Self {
            is_dir: true,
            length: 0,
            block_size: 0,
            access_time: now,
            modification_time: now,
            properties,
        }
    }

    fn file(length: u64, block_size: u32, properties: Properties) -> Self {
        let now = now_millis();
        Self {
            is_dir: false,
            length,
            block_size,
            access_time: now,
            modification_time: now,
            properties,
        }
    }

    fn info(&self, path: &FsPath) -> FileInfo {
        FileInfo {
            path: path.clone(),
            is_dir: self.is_dir,
            length: self.length,
            block_size: self.block_size,
            access_time: self.access_time,
            modification_time: self.modification_time,
            properties: self.properties.clone(),
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Filesystem kept entirely in process memory.
pub struct MemoryBackend {
    name: String,
    block_size: u32,
    group_size: u32,
    hosts: Vec<String>,
    properties: Properties,
    entries: RwLock<BTreeMap<FsPath, Entry>>,
    next_stream: AtomicU64,
    opened_for_write: AtomicU64,
    opened_for_read: AtomicU64,
    latency_ms: AtomicU64,
    fail_next: Mutex<HashSet<String>>,
    journal: Mutex<Vec<String>>,
}

impl MemoryBackend {
    /// Default bytes per block.
    pub const DEFAULT_BLOCK_SIZE: u32 = 65536;
    /// Default blocks per affinity group.
    pub const DEFAULT_GROUP_SIZE: u32 = 1024;

    /// Creates an empty filesystem holding only the root directory.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_geometry(name, Self::DEFAULT_BLOCK_SIZE, Self::DEFAULT_GROUP_SIZE)
    }

    /// Creates an empty filesystem with the given block and group sizes.
    pub fn with_geometry(name: impl Into<String>, block_size: u32, group_size: u32) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(FsPath::root(), Entry::dir(Properties::new()));
        Self {
            name: name.into(),
            block_size,
            group_size,
            hosts: vec!["localhost".to_string()],
            properties: Properties::new(),
            entries: RwLock::new(entries),
            next_stream: AtomicU64::new(1),
            opened_for_write: AtomicU64::new(0),
            opened_for_read: AtomicU64::new(0),
            latency_ms: AtomicU64::new(0),
            fail_next: Mutex::new(HashSet::new()),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the hosts reported by [`FileSystemBackend::affinity`]; affinity groups
    /// are assigned to hosts round-robin.
    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        if !hosts.is_empty() {
            self.hosts = hosts;
        }
        self
    }

    /// Sets a filesystem property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Delays every subsequent async operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes the next call of the named async operation fail.
    pub fn fail_next(&self, op: &str) {
        if let Ok(mut ops) = self.fail_next.lock() {
            ops.insert(op.to_string());
        }
    }

    /// Async operations applied so far, as `"<op> <path>"` lines.
    pub fn journal(&self) -> Vec<String> {
        self.journal
            .lock()
            .map(|j| j.clone())
            .unwrap_or_default()
    }

    /// Writes a file of `length` bytes, creating missing parents.
    pub fn put_file(&self, path: &FsPath, length: u64) -> Result<()> {
        let mut entries = self.write()?;
        if let Some(parent) = path.parent() {
            ensure_dirs(&mut entries, &parent, &Properties::new())?;
        }
        if entries.get(path).is_some_and(|e| e.is_dir) {
            return Err(MemoryError::IsADirectory(path.clone()));
        }
        entries.insert(
            path.clone(),
            Entry::file(length, self.block_size, Properties::new()),
        );
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<FsPath, Entry>>> {
        self.entries.read().map_err(|_| MemoryError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<FsPath, Entry>>> {
        self.entries.write().map_err(|_| MemoryError::Poisoned)
    }

    /// Applies latency and injected failures, then journals the call.
    async fn enter(&self, op: &str, path: Option<&FsPath>) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let injected = self
            .fail_next
            .lock()
            .map(|mut ops| ops.remove(op))
            .unwrap_or(false);
        if injected {
            debug!("{}: injected {} failure", self.name, op);
            return Err(MemoryError::Injected(op.to_string()));
        }
        let line = match path {
            Some(p) => format!("{} {}", op, p),
            None => op.to_string(),
        };
        trace!("{}: {}", self.name, line);
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(line);
        }
        Ok(())
    }

    fn stream_id(&self) -> u64 {
        self.next_stream.fetch_add(1, Ordering::SeqCst)
    }

    fn do_create(&self, path: &FsPath, opts: CreateOptions) -> Result<OutputHandle> {
        let mut entries = self.write()?;
        match entries.get(path) {
            Some(e) if e.is_dir => return Err(MemoryError::IsADirectory(path.clone())),
            Some(_) if !opts.overwrite => return Err(MemoryError::AlreadyExists(path.clone())),
            _ => {}
        }
        if let Some(parent) = path.parent() {
            ensure_dirs(&mut entries, &parent, &Properties::new())?;
        }
        let block_size = opts.block_size.unwrap_or(self.block_size);
        entries.insert(path.clone(), Entry::file(0, block_size, opts.properties));
        self.opened_for_write.fetch_add(1, Ordering::SeqCst);
        Ok(OutputHandle {
            path: path.clone(),
            stream_id: self.stream_id(),
        })
    }

    fn do_append(&self, path: &FsPath, opts: AppendOptions) -> Result<OutputHandle> {
        {
            let mut entries = self.write()?;
            match entries.get(path) {
                Some(e) if e.is_dir => return Err(MemoryError::IsADirectory(path.clone())),
                Some(_) => {}
                None if opts.create => {
                    if let Some(parent) = path.parent() {
                        ensure_dirs(&mut entries, &parent, &Properties::new())?;
                    }
                    entries.insert(
                        path.clone(),
                        Entry::file(0, self.block_size, opts.properties),
                    );
                }
                None => return Err(MemoryError::NotFound(path.clone())),
            }
        }
        self.opened_for_write.fetch_add(1, Ordering::SeqCst);
        Ok(OutputHandle {
            path: path.clone(),
            stream_id: self.stream_id(),
        })
    }

    fn do_delete(&self, path: &FsPath, recursive: bool) -> Result<bool> {
        let mut entries = self.write()?;
        let Some(entry) = entries.get(path) else {
            return Ok(false);
        };
        let subtree: Vec<FsPath> = entries
            .keys()
            .filter(|k| *k != path && k.starts_with(path))
            .cloned()
            .collect();
        if entry.is_dir && !subtree.is_empty() && !recursive {
            return Err(MemoryError::DirectoryNotEmpty(path.clone()));
        }
        for key in &subtree {
            entries.remove(key);
        }
        if path.is_root() {
            return Ok(!subtree.is_empty());
        }
        entries.remove(path);
        Ok(true)
    }

    fn do_rename(&self, src: &FsPath, dest: &FsPath) -> Result<()> {
        let mut entries = self.write()?;
        if src.is_root() || dest.starts_with(src) {
            return Err(MemoryError::InvalidRename {
                src: src.clone(),
                dest: dest.clone(),
            });
        }
        if !entries.contains_key(src) {
            return Err(MemoryError::NotFound(src.clone()));
        }
        if entries.contains_key(dest) {
            return Err(MemoryError::AlreadyExists(dest.clone()));
        }
        if let Some(parent) = dest.parent() {
            ensure_dirs(&mut entries, &parent, &Properties::new())?;
        }

        let moved: Vec<FsPath> = entries
            .keys()
            .filter(|k| k.starts_with(src))
            .cloned()
            .collect();
        for old in moved {
            let Some(entry) = entries.remove(&old) else {
                continue;
            };
            let suffix = &old.as_str()[src.as_str().len()..];
            let new = FsPath::parse(&format!("{}{}", dest.as_str(), suffix))
                .map_err(|_| MemoryError::NotFound(old.clone()))?;
            entries.insert(new, entry);
        }
        Ok(())
    }

    fn do_mkdirs(&self, path: &FsPath, props: Properties) -> Result<()> {
        let mut entries = self.write()?;
        ensure_dirs(&mut entries, path, &props)
    }

    fn do_set_times(&self, path: &FsPath, access_time: i64, modification_time: i64) -> Result<()> {
        let mut entries = self.write()?;
        let entry = entries
            .get_mut(path)
            .ok_or_else(|| MemoryError::NotFound(path.clone()))?;
        entry.access_time = access_time;
        entry.modification_time = modification_time;
        Ok(())
    }

    fn do_update(&self, path: &FsPath, props: Properties) -> Result<Option<FileInfo>> {
        let mut entries = self.write()?;
        Ok(entries.get_mut(path).map(|entry| {
            entry.properties.extend(props);
            entry.info(path)
        }))
    }

    fn do_format(&self) -> Result<()> {
        let mut entries = self.write()?;
        entries.retain(|k, _| k.is_root());
        Ok(())
    }

    fn files_below(&self, paths: &[FsPath]) -> Result<Vec<FileInfo>> {
        let entries = self.read()?;
        let mut found = BTreeMap::new();
        for path in paths {
            if !entries.contains_key(path) {
                return Err(MemoryError::NotFound(path.clone()));
            }
            for (k, e) in entries.range(path.clone()..) {
                if !k.starts_with(path) {
                    continue;
                }
                if !e.is_dir {
                    found.insert(k.clone(), e.info(k));
                }
            }
        }
        Ok(found.into_values().collect())
    }

    fn children(&self, path: &FsPath) -> Result<Vec<FileInfo>> {
        let entries = self.read()?;
        match entries.get(path) {
            None => return Err(MemoryError::NotFound(path.clone())),
            Some(e) if !e.is_dir => return Err(MemoryError::NotADirectory(path.clone())),
            Some(_) => {}
        }
        Ok(entries
            .iter()
            .filter(|(k, _)| k.parent().as_ref() == Some(path))
            .map(|(k, e)| e.info(k))
            .collect())
    }

    fn subtree_summary(&self, path: &FsPath) -> Result<PathSummary> {
        let entries = self.read()?;
        if !entries.contains_key(path) {
            return Err(MemoryError::NotFound(path.clone()));
        }
        let mut summary = PathSummary {
            path: Some(path.clone()),
            ..PathSummary::default()
        };
        for (_, e) in entries.iter().filter(|(k, _)| k.starts_with(path)) {
            if e.is_dir {
                summary.directories_count += 1;
            } else {
                summary.files_count += 1;
                summary.total_length += e.length;
            }
        }
        Ok(summary)
    }
}

/// Creates `path` and its missing ancestors as directories, merging `props` into `path`.
fn ensure_dirs(
    entries: &mut BTreeMap<FsPath, Entry>,
    path: &FsPath,
    props: &Properties,
) -> Result<()> {
    let mut current = FsPath::root();
    for component in path.components() {
        current = current
            .join(component)
            .map_err(|_| MemoryError::NotFound(path.clone()))?;
        match entries.get(&current) {
            Some(e) if !e.is_dir => return Err(MemoryError::NotADirectory(current)),
            Some(_) => {}
            None => {
                entries.insert(current.clone(), Entry::dir(Properties::new()));
            }
        }
    }
    if let Some(entry) = entries.get_mut(path) {
        entry.properties.extend(props.clone());
    }
    Ok(())
}

#[async_trait]
impl FileSystemBackend for MemoryBackend {
    async fn create(&self, path: &FsPath, opts: CreateOptions) -> BackingResult<OutputHandle> {
        self.enter("create", Some(path)).await?;
        Ok(self.do_create(path, opts)?)
    }

    async fn append(&self, path: &FsPath, opts: AppendOptions) -> BackingResult<OutputHandle> {
        self.enter("append", Some(path)).await?;
        Ok(self.do_append(path, opts)?)
    }

    async fn delete(&self, path: &FsPath, recursive: bool) -> BackingResult<bool> {
        self.enter("delete", Some(path)).await?;
        Ok(self.do_delete(path, recursive)?)
    }

    async fn rename(&self, src: &FsPath, dest: &FsPath) -> BackingResult<()> {
        self.enter("rename", Some(src)).await?;
        Ok(self.do_rename(src, dest)?)
    }

    async fn mkdirs(&self, path: &FsPath, props: Properties) -> BackingResult<()> {
        self.enter("mkdirs", Some(path)).await?;
        Ok(self.do_mkdirs(path, props)?)
    }

    async fn set_times(
        &self,
        path: &FsPath,
        access_time: i64,
        modification_time: i64,
    ) -> BackingResult<()> {
        self.enter("set_times", Some(path)).await?;
        Ok(self.do_set_times(path, access_time, modification_time)?)
    }

    async fn update(&self, path: &FsPath, props: Properties) -> BackingResult<Option<FileInfo>> {
        self.enter("update", Some(path)).await?;
        Ok(self.do_update(path, props)?)
    }

    async fn format(&self) -> BackingResult<()> {
        self.enter("format", None).await?;
        Ok(self.do_format()?)
    }

    async fn execute<T: FsTask>(&self, task: T, paths: Vec<FsPath>) -> BackingResult<T::Output> {
        self.enter("execute", paths.first()).await?;
        let files = self.files_below(&paths)?;
        task.run(files)
    }

    async fn await_deletes(&self) -> BackingResult<()> {
        self.enter("await_deletes", None).await?;
        Ok(())
    }

    fn open(&self, path: &FsPath, _buffer_size: Option<usize>) -> BackingResult<InputHandle> {
        let length = {
            let entries = self.read()?;
            match entries.get(path) {
                None => return Err(MemoryError::NotFound(path.clone()).into()),
                Some(e) if e.is_dir => return Err(MemoryError::IsADirectory(path.clone()).into()),
                Some(e) => e.length,
            }
        };
        self.opened_for_read.fetch_add(1, Ordering::SeqCst);
        Ok(InputHandle {
            path: path.clone(),
            stream_id: self.stream_id(),
            length,
        })
    }

    fn info(&self, path: &FsPath) -> BackingResult<Option<FileInfo>> {
        Ok(self.read()?.get(path).map(|e| e.info(path)))
    }

    fn exists(&self, path: &FsPath) -> BackingResult<bool> {
        Ok(self.read()?.contains_key(path))
    }

    fn size(&self, path: &FsPath) -> BackingResult<u64> {
        Ok(self.subtree_summary(path)?.total_length)
    }

    fn list_paths(&self, path: &FsPath) -> BackingResult<Vec<FsPath>> {
        Ok(self.children(path)?.into_iter().map(|f| f.path).collect())
    }

    fn list_files(&self, path: &FsPath) -> BackingResult<Vec<FileInfo>> {
        Ok(self.children(path)?)
    }

    fn summary(&self, path: &FsPath) -> BackingResult<PathSummary> {
        Ok(self.subtree_summary(path)?)
    }

    fn affinity(&self, path: &FsPath, start: u64, len: u64) -> BackingResult<Vec<BlockLocation>> {
        let length = {
            let entries = self.read()?;
            match entries.get(path) {
                None => return Err(MemoryError::NotFound(path.clone()).into()),
                Some(e) if e.is_dir => return Err(MemoryError::IsADirectory(path.clone()).into()),
                Some(e) => e.length,
            }
        };

        let block = self.block_size.max(1) as u64;
        let end = start.saturating_add(len).min(length);
        let mut locations = Vec::new();
        let mut offset = start;
        while offset < end {
            let index = offset / block;
            let block_end = ((index + 1) * block).min(end);
            let group = index / self.group_size.max(1) as u64;
            let host = &self.hosts[(group % self.hosts.len() as u64) as usize];
            locations.push(BlockLocation {
                start: offset,
                length: block_end - offset,
                hosts: vec![host.clone()],
            });
            offset = block_end;
        }
        Ok(locations)
    }

    fn metrics(&self) -> BackingResult<FsMetrics> {
        let summary = self.subtree_summary(&FsPath::root())?;
        Ok(FsMetrics {
            files_count: summary.files_count,
            directories_count: summary.directories_count,
            local_space_size: summary.total_length,
            files_opened_for_write: self.opened_for_write.load(Ordering::SeqCst),
            files_opened_for_read: self.opened_for_read.load(Ordering::SeqCst),
        })
    }

    fn reset_metrics(&self) -> BackingResult<()> {
        self.opened_for_write.store(0, Ordering::SeqCst);
        self.opened_for_read.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn configuration(&self) -> FsConfiguration {
        FsConfiguration {
            name: self.name.clone(),
            block_size: self.block_size,
            group_size: self.group_size,
        }
    }

    fn properties(&self) -> Properties {
        self.properties.clone()
    }

    fn used_space_size(&self) -> BackingResult<u64> {
        Ok(self.subtree_summary(&FsPath::root())?.total_length)
    }
}
