//! Cluster attribute registry driven by membership events.
//!
//! Consumes node join/leave notifications from the discovery layer, keeps the attribute
//! records of every provider per filesystem, re-runs reconciliation for the filesystems a
//! change touches, and publishes the resulting resolvers through [`ModeTable`] handles.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info};

use crate::attributes::AttributeRecord;
use crate::error::{ConfigError, Result};
use crate::reconcile::{reconcile, EffectiveConfig};
use crate::resolver::PathModeResolver;
use crate::table::ModeTable;
use crate::types::NodeId;

/// Events delivered by the membership/discovery layer.
#[derive(Clone, Debug)]
pub enum MembershipEvent {
    /// A node joined (or re-announced itself) with the filesystems it hosts.
    NodeJoined {
        /// ID of the node that joined.
        node_id: NodeId,
        /// One record per filesystem the node hosts.
        records: Vec<AttributeRecord>,
    },
    /// A node left or was declared dead.
    NodeLeft {
        /// ID of the node that left.
        node_id: NodeId,
    },
}

#[derive(Default)]
struct RegistryState {
    records: BTreeMap<String, BTreeMap<NodeId, AttributeRecord>>,
    configs: BTreeMap<String, EffectiveConfig>,
    tables: HashMap<String, ModeTable>,
}

impl RegistryState {
    fn table(&mut self, name: &str) -> ModeTable {
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| ModeTable::empty(name))
            .clone()
    }
}

/// Tracks the attribute records of all providers and the effective configuration of every
/// filesystem they host.
///
/// Updates are serialized by one coarse lock; they happen only on membership changes.
/// Request paths read through [`ModeTable`] handles, which never take this lock.
pub struct ClusterAttributeRegistry {
    local_node_id: NodeId,
    state: Mutex<RegistryState>,
}

impl ClusterAttributeRegistry {
    /// Creates an empty registry for the given local node.
    pub fn new(local_node_id: NodeId) -> Self {
        Self {
            local_node_id,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// The local node's identifier.
    pub fn local_node_id(&self) -> NodeId {
        self.local_node_id
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies one membership event and returns the filesystems whose tables changed.
    pub fn apply(&self, event: MembershipEvent) -> Result<Vec<String>> {
        match event {
            MembershipEvent::NodeJoined { node_id, records } => self.join(node_id, records),
            MembershipEvent::NodeLeft { node_id } => Ok(self.leave(node_id)),
        }
    }

    /// Registers the local node's own records; fails if any of them conflicts with records
    /// already known from remote nodes.
    pub fn start_local(&self, records: Vec<AttributeRecord>) -> Result<Vec<String>> {
        self.join(self.local_node_id, records)
    }

    /// Admits a node's records.
    ///
    /// All affected filesystems are reconciled before anything is published. If any of them
    /// fails, none of the node's records are admitted and the error is returned; the tables
    /// keep their previous snapshots. A node that re-joins replaces its earlier records,
    /// including dropping filesystems it no longer hosts.
    pub fn join(&self, node_id: NodeId, records: Vec<AttributeRecord>) -> Result<Vec<String>> {
        let mut state = self.lock();

        let mut hosted: BTreeMap<String, AttributeRecord> = BTreeMap::new();
        for record in records {
            if hosted.insert(record.name().to_string(), record).is_some() {
                return Err(ConfigError::InvalidAttribute {
                    field: "name",
                    reason: format!("node {} published the same filesystem twice", node_id),
                });
            }
        }

        let mut affected: BTreeSet<String> = hosted.keys().cloned().collect();
        for (name, providers) in &state.records {
            if providers.contains_key(&node_id) {
                affected.insert(name.clone());
            }
        }

        let mut staged: Vec<(String, BTreeMap<NodeId, AttributeRecord>, Option<EffectiveConfig>)> =
            Vec::with_capacity(affected.len());
        for name in affected {
            let mut providers = state.records.get(&name).cloned().unwrap_or_default();
            match hosted.remove(&name) {
                Some(record) => {
                    providers.insert(node_id, record);
                }
                None => {
                    providers.remove(&node_id);
                }
            }

            let config = if providers.is_empty() {
                None
            } else {
                match reconcile(&name, &providers) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        error!("Rejecting attributes from node {}: {}", node_id, e);
                        return Err(e);
                    }
                }
            };
            staged.push((name, providers, config));
        }

        let mut changed = Vec::with_capacity(staged.len());
        for (name, providers, config) in staged {
            Self::install(&mut state, &name, providers, config);
            changed.push(name);
        }

        debug!("Node {} joined, rebuilt {:?}", node_id, changed);
        Ok(changed)
    }

    /// Drops every record of a departed node and rebuilds the tables it took part in.
    pub fn leave(&self, node_id: NodeId) -> Vec<String> {
        let mut state = self.lock();

        let affected: Vec<String> = state
            .records
            .iter()
            .filter(|(_, providers)| providers.contains_key(&node_id))
            .map(|(name, _)| name.clone())
            .collect();

        for name in &affected {
            let mut providers = state.records.get(name).cloned().unwrap_or_default();
            providers.remove(&node_id);

            // Removing a provider cannot introduce a new identity conflict.
            let config = if providers.is_empty() {
                None
            } else {
                match reconcile(name, &providers) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        error!("Reconcile of '{}' after node {} left failed: {}", name, node_id, e);
                        None
                    }
                }
            };
            Self::install(&mut state, name, providers, config);
        }

        debug!("Node {} left, rebuilt {:?}", node_id, affected);
        affected
    }

    fn install(
        state: &mut RegistryState,
        name: &str,
        providers: BTreeMap<NodeId, AttributeRecord>,
        config: Option<EffectiveConfig>,
    ) {
        let table = state.table(name);
        match config {
            Some(config) => {
                table.publish(PathModeResolver::new(&config));
                info!(
                    "Published mode table for '{}' ({} providers, default {})",
                    name,
                    config.providers().len(),
                    config.default_mode()
                );
                state.configs.insert(name.to_string(), config);
                state.records.insert(name.to_string(), providers);
            }
            None => {
                table.clear();
                info!("Filesystem '{}' has no providers left", name);
                state.configs.remove(name);
                state.records.remove(name);
            }
        }
    }

    /// Returns the shared table handle for a filesystem, creating an empty one if the
    /// filesystem is not known yet.
    pub fn table(&self, name: &str) -> ModeTable {
        self.lock().table(name)
    }

    /// Current effective configuration of a filesystem.
    pub fn effective(&self, name: &str) -> Result<EffectiveConfig> {
        self.lock()
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::NoProviders {
                name: name.to_string(),
            })
    }

    /// Nodes currently providing a filesystem, ascending.
    pub fn providers(&self, name: &str) -> Vec<NodeId> {
        self.lock()
            .records
            .get(name)
            .map(|providers| providers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Names of all filesystems with at least one provider.
    pub fn filesystems(&self) -> Vec<String> {
        self.lock().configs.keys().cloned().collect()
    }
}
