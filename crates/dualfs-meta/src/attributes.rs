//! Per-node filesystem attribute records.
//!
//! An [`AttributeRecord`] describes how one node has configured a named filesystem
//! instance. Records are built once when the node starts hosting the instance, never
//! change afterwards, and are exchanged between nodes on membership events.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::error::{ConfigError, Result};
use crate::path::FsPath;
use crate::types::FsMode;

/// Configuration of one named filesystem instance on one node.
///
/// Equality and hashing consider only the filesystem name: two records for the same
/// instance are "the same record" even if they came from differently configured nodes.
#[derive(Clone, Debug)]
pub struct AttributeRecord {
    name: String,
    block_size: u32,
    group_size: u32,
    meta_store: String,
    data_store: String,
    default_mode: FsMode,
    path_modes: BTreeMap<FsPath, FsMode>,
    fragmentizer_enabled: bool,
}

impl AttributeRecord {
    /// Starts building a record for the named filesystem.
    pub fn builder(name: impl Into<String>) -> AttributeRecordBuilder {
        AttributeRecordBuilder::new(name)
    }

    /// Filesystem instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes per data block.
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Blocks per affinity group.
    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    /// Bytes per affinity group.
    pub fn group_block_size(&self) -> u64 {
        self.block_size as u64 * self.group_size as u64
    }

    /// Metadata store name.
    pub fn meta_store(&self) -> &str {
        &self.meta_store
    }

    /// Data store name.
    pub fn data_store(&self) -> &str {
        &self.data_store
    }

    /// Mode used when no path prefix matches.
    pub fn default_mode(&self) -> FsMode {
        self.default_mode
    }

    /// Prefix overrides, ordered by prefix.
    pub fn path_modes(&self) -> &BTreeMap<FsPath, FsMode> {
        &self.path_modes
    }

    /// Whether the background defragmenter runs for this instance.
    pub fn fragmentizer_enabled(&self) -> bool {
        self.fragmentizer_enabled
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        name: String,
        block_size: i32,
        group_size: i32,
        meta_store: String,
        data_store: String,
        default_mode: FsMode,
        path_modes: BTreeMap<FsPath, FsMode>,
        fragmentizer_enabled: bool,
    ) -> Result<Self> {
        let record = Self {
            name,
            block_size: positive("blockSize", block_size)?,
            group_size: positive("groupSize", group_size)?,
            meta_store,
            data_store,
            default_mode,
            path_modes,
            fragmentizer_enabled,
        };
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(invalid("name", "must not be empty"));
        }
        if self.meta_store.is_empty() {
            return Err(invalid("metaStoreName", "must not be empty"));
        }
        if self.data_store.is_empty() {
            return Err(invalid("dataStoreName", "must not be empty"));
        }
        Ok(())
    }
}

impl PartialEq for AttributeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for AttributeRecord {}

impl Hash for AttributeRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidAttribute {
        field,
        reason: reason.to_string(),
    }
}

fn positive(field: &'static str, value: i32) -> Result<u32> {
    if value <= 0 {
        return Err(ConfigError::InvalidAttribute {
            field,
            reason: format!("must be positive, got {}", value),
        });
    }
    Ok(value as u32)
}

/// Builder for [`AttributeRecord`]; all invariants are checked in [`build`](Self::build).
#[derive(Clone, Debug)]
pub struct AttributeRecordBuilder {
    name: String,
    block_size: u32,
    group_size: u32,
    meta_store: String,
    data_store: String,
    default_mode: FsMode,
    path_modes: Vec<(String, FsMode)>,
    fragmentizer_enabled: bool,
}

impl AttributeRecordBuilder {
    /// Default block size: 64 KiB.
    pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;
    /// Default affinity group size.
    pub const DEFAULT_GROUP_SIZE: u32 = 1024;

    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            block_size: Self::DEFAULT_BLOCK_SIZE,
            group_size: Self::DEFAULT_GROUP_SIZE,
            meta_store: String::new(),
            data_store: String::new(),
            default_mode: FsMode::DualAsync,
            path_modes: Vec::new(),
            fragmentizer_enabled: true,
        }
    }

    /// Sets the block size in bytes.
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the affinity group size in blocks.
    pub fn group_size(mut self, group_size: u32) -> Self {
        self.group_size = group_size;
        self
    }

    /// Sets the metadata store name.
    pub fn meta_store(mut self, name: impl Into<String>) -> Self {
        self.meta_store = name.into();
        self
    }

    /// Sets the data store name.
    pub fn data_store(mut self, name: impl Into<String>) -> Self {
        self.data_store = name.into();
        self
    }

    /// Sets the default mode.
    pub fn default_mode(mut self, mode: FsMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Adds a prefix override.
    pub fn path_mode(mut self, prefix: impl Into<String>, mode: FsMode) -> Self {
        self.path_modes.push((prefix.into(), mode));
        self
    }

    /// Enables or disables the fragmentizer.
    pub fn fragmentizer_enabled(mut self, enabled: bool) -> Self {
        self.fragmentizer_enabled = enabled;
        self
    }

    /// Validates and builds the record.
    pub fn build(self) -> Result<AttributeRecord> {
        let block_size = to_wire_int("blockSize", self.block_size)?;
        let group_size = to_wire_int("groupSize", self.group_size)?;

        let mut path_modes = BTreeMap::new();
        for (raw, mode) in self.path_modes {
            let prefix = FsPath::parse(&raw)?;
            if path_modes.insert(prefix.clone(), mode).is_some() {
                return Err(ConfigError::InvalidAttribute {
                    field: "pathModes",
                    reason: format!("duplicate prefix '{}'", prefix),
                });
            }
        }

        AttributeRecord::from_parts(
            self.name,
            block_size,
            group_size,
            self.meta_store,
            self.data_store,
            self.default_mode,
            path_modes,
            self.fragmentizer_enabled,
        )
    }
}

fn to_wire_int(field: &'static str, value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| ConfigError::InvalidAttribute {
        field,
        reason: format!("{} exceeds {}", value, i32::MAX),
    })
}
