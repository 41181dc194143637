//! Value types exchanged with backing filesystems

use dualfs_meta::FsPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File or directory properties (owner, permissions, user metadata, ...).
pub type Properties = BTreeMap<String, String>;

/// Status of one file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Absolute path.
    pub path: FsPath,
    /// True for directories.
    pub is_dir: bool,
    /// File length in bytes, zero for directories.
    pub length: u64,
    /// Block size the file was written with.
    pub block_size: u32,
    /// Last access time, milliseconds since the epoch.
    pub access_time: i64,
    /// Last modification time, milliseconds since the epoch.
    pub modification_time: i64,
    /// File properties.
    pub properties: Properties,
}

/// Aggregate counts for a subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSummary {
    /// Root of the summarized subtree.
    pub path: Option<FsPath>,
    /// Regular files in the subtree.
    pub files_count: u64,
    /// Directories in the subtree, including the root when it is a directory.
    pub directories_count: u64,
    /// Sum of file lengths.
    pub total_length: u64,
}

/// Hosts holding one byte range of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    /// Offset of the range.
    pub start: u64,
    /// Length of the range.
    pub length: u64,
    /// Hosts storing the range.
    pub hosts: Vec<String>,
}

/// Filesystem-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsMetrics {
    /// Number of files.
    pub files_count: u64,
    /// Number of directories.
    pub directories_count: u64,
    /// Bytes stored locally.
    pub local_space_size: u64,
    /// Output streams opened.
    pub files_opened_for_write: u64,
    /// Input streams opened.
    pub files_opened_for_read: u64,
}

/// Static configuration reported by a backing filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsConfiguration {
    /// Filesystem name.
    pub name: String,
    /// Bytes per block.
    pub block_size: u32,
    /// Blocks per affinity group.
    pub group_size: u32,
}

impl FsConfiguration {
    /// Bytes per affinity group.
    pub fn group_block_size(&self) -> u64 {
        self.block_size as u64 * self.group_size as u64
    }
}

/// Options for creating a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Replace an existing file.
    pub overwrite: bool,
    /// Stream buffer size, backend default when `None`.
    pub buffer_size: Option<usize>,
    /// Replication factor, backend default when `None`.
    pub replication: Option<u32>,
    /// Block size, backend default when `None`.
    pub block_size: Option<u32>,
    /// Initial properties.
    pub properties: Properties,
}

impl CreateOptions {
    /// Options for `create(path, overwrite)`.
    pub fn overwrite(overwrite: bool) -> Self {
        Self {
            overwrite,
            ..Self::default()
        }
    }
}

/// Options for appending to a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Create the file if it does not exist.
    pub create: bool,
    /// Stream buffer size, backend default when `None`.
    pub buffer_size: Option<usize>,
    /// Properties applied when the file is created.
    pub properties: Properties,
}

/// Handle to an output stream opened by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputHandle {
    /// File being written.
    pub path: FsPath,
    /// Backend-local stream identifier.
    pub stream_id: u64,
}

/// Handle to an input stream opened by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputHandle {
    /// File being read.
    pub path: FsPath,
    /// Backend-local stream identifier.
    pub stream_id: u64,
    /// File length when the stream was opened.
    pub length: u64,
}
