//! Cluster-wide reconciliation of filesystem attribute records.
//!
//! Every node hosting a filesystem instance publishes its own [`AttributeRecord`]. The
//! fields that define data layout (block size, group size, store names) must agree
//! everywhere; routing fields may drift and are merged with the lowest-ordinal-wins rule
//! so that every node computes the same effective table without a consensus round.

use std::collections::BTreeMap;
use tracing::warn;

use crate::attributes::AttributeRecord;
use crate::error::{ConfigError, Result};
use crate::path::FsPath;
use crate::types::{FsMode, NodeId};

/// A routing field on which the providers of a filesystem disagree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModeSkew {
    /// Nodes configured different default modes.
    DefaultMode {
        /// Mode chosen by the tie-break.
        chosen: FsMode,
        /// Mode configured on each node.
        seen: BTreeMap<NodeId, FsMode>,
    },
    /// Nodes configured different modes for the same prefix.
    PathMode {
        /// The contested prefix.
        prefix: FsPath,
        /// Mode chosen by the tie-break.
        chosen: FsMode,
        /// Mode configured on each node that lists the prefix.
        seen: BTreeMap<NodeId, FsMode>,
    },
}

/// Cluster-reconciled configuration of one filesystem instance.
#[derive(Clone, Debug)]
pub struct EffectiveConfig {
    name: String,
    block_size: u32,
    group_size: u32,
    meta_store: String,
    data_store: String,
    default_mode: FsMode,
    path_modes: BTreeMap<FsPath, FsMode>,
    fragmentizer_enabled: bool,
    providers: Vec<NodeId>,
    skew: Vec<ModeSkew>,
}

impl EffectiveConfig {
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

    /// Effective default mode.
    pub fn default_mode(&self) -> FsMode {
        self.default_mode
    }

    /// Effective prefix overrides.
    pub fn path_modes(&self) -> &BTreeMap<FsPath, FsMode> {
        &self.path_modes
    }

    /// True only when every provider enables the fragmentizer.
    pub fn fragmentizer_enabled(&self) -> bool {
        self.fragmentizer_enabled
    }

    /// Nodes hosting the filesystem, in ascending order.
    pub fn providers(&self) -> &[NodeId] {
        &self.providers
    }

    /// Routing disagreements resolved by the tie-break.
    pub fn skew(&self) -> &[ModeSkew] {
        &self.skew
    }

    /// Builds an effective configuration from a single local record, as used before any
    /// remote node has been seen.
    pub fn local(node: NodeId, record: &AttributeRecord) -> Self {
        Self {
            name: record.name().to_string(),
            block_size: record.block_size(),
            group_size: record.group_size(),
            meta_store: record.meta_store().to_string(),
            data_store: record.data_store().to_string(),
            default_mode: record.default_mode(),
            path_modes: record.path_modes().clone(),
            fragmentizer_enabled: record.fragmentizer_enabled(),
            providers: vec![node],
            skew: Vec::new(),
        }
    }
}

/// Reconciles the records published by every provider of filesystem `name`.
///
/// Identity-critical fields are compared against the record of the lowest node id; the
/// first mismatch fails with [`ConfigError::IncompatibleConfig`]. Conflicting routing
/// fields resolve to the mode with the lowest wire ordinal. Path mode prefixes are the
/// union over all providers.
pub fn reconcile(name: &str, records: &BTreeMap<NodeId, AttributeRecord>) -> Result<EffectiveConfig> {
    let mut iter = records.iter();
    let (&first_node, first) = iter.next().ok_or_else(|| ConfigError::NoProviders {
        name: name.to_string(),
    })?;

    if first.name() != name {
        return Err(ConfigError::InvalidAttribute {
            field: "name",
            reason: format!(
                "node {} published '{}' while reconciling '{}'",
                first_node,
                first.name(),
                name
            ),
        });
    }

    for (&node, record) in iter {
        check_identity(name, first_node, first, node, record)?;
    }

    let mut effective = EffectiveConfig::local(first_node, first);
    effective.providers = records.keys().copied().collect();
    effective.fragmentizer_enabled = records.values().all(|r| r.fragmentizer_enabled());

    let defaults: BTreeMap<NodeId, FsMode> = records
        .iter()
        .map(|(node, r)| (*node, r.default_mode()))
        .collect();
    let chosen = lowest(&defaults);
    effective.default_mode = chosen;
    if defaults.values().any(|m| *m != chosen) {
        warn!(
            "Filesystem '{}' default mode differs across nodes {:?}, using {}",
            name, defaults, chosen
        );
        effective.skew.push(ModeSkew::DefaultMode {
            chosen,
            seen: defaults,
        });
    }

    let mut by_prefix: BTreeMap<&FsPath, BTreeMap<NodeId, FsMode>> = BTreeMap::new();
    for (node, record) in records {
        for (prefix, mode) in record.path_modes() {
            by_prefix.entry(prefix).or_default().insert(*node, *mode);
        }
    }

    effective.path_modes.clear();
    for (prefix, seen) in by_prefix {
        let chosen = lowest(&seen);
        effective.path_modes.insert(prefix.clone(), chosen);
        if seen.values().any(|m| *m != chosen) {
            warn!(
                "Filesystem '{}' mode for '{}' differs across nodes {:?}, using {}",
                name, prefix, seen, chosen
            );
            effective.skew.push(ModeSkew::PathMode {
                prefix: prefix.clone(),
                chosen,
                seen,
            });
        }
    }

    Ok(effective)
}

fn lowest(seen: &BTreeMap<NodeId, FsMode>) -> FsMode {
    seen.values().copied().min().unwrap_or(FsMode::Primary)
}

fn check_identity(
    name: &str,
    first_node: NodeId,
    first: &AttributeRecord,
    node: NodeId,
    record: &AttributeRecord,
) -> Result<()> {
    let mismatch = |field: &'static str, a: String, b: String| ConfigError::IncompatibleConfig {
        name: name.to_string(),
        field,
        first_node,
        first_value: a,
        other_node: node,
        other_value: b,
    };

    if record.name() != first.name() {
        return Err(mismatch(
            "name",
            first.name().to_string(),
            record.name().to_string(),
        ));
    }
    if record.block_size() != first.block_size() {
        return Err(mismatch(
            "blockSize",
            first.block_size().to_string(),
            record.block_size().to_string(),
        ));
    }
    if record.group_size() != first.group_size() {
        return Err(mismatch(
            "groupSize",
            first.group_size().to_string(),
            record.group_size().to_string(),
        ));
    }
    if record.meta_store() != first.meta_store() {
        return Err(mismatch(
            "metaStoreName",
            first.meta_store().to_string(),
            record.meta_store().to_string(),
        ));
    }
    if record.data_store() != first.data_store() {
        return Err(mismatch(
            "dataStoreName",
            first.data_store().to_string(),
            record.data_store().to_string(),
        ));
    }
    Ok(())
}
