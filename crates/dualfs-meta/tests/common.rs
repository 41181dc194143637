//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use dualfs_meta::{
    AttributeRecord, ClusterAttributeRegistry, FsMode, MembershipEvent, NodeId, Result,
};

/// Builds a record with the layout used by most scenarios.
pub fn record(name: &str, default_mode: FsMode, path_modes: &[(&str, FsMode)]) -> AttributeRecord {
    let mut builder = AttributeRecord::builder(name)
        .block_size(65536)
        .group_size(128)
        .meta_store("M")
        .data_store("D")
        .default_mode(default_mode);
    for (prefix, mode) in path_modes {
        builder = builder.path_mode(*prefix, *mode);
    }
    builder.build().expect("valid test record")
}

/// In-process cluster: one registry per node, every event gossiped to all of them.
pub struct TestCluster {
    registries: Vec<ClusterAttributeRegistry>,
}

impl TestCluster {
    /// Create a new test cluster with the given number of nodes
    pub fn new(num_nodes: usize) -> Self {
        let registries = (0..num_nodes)
            .map(|i| ClusterAttributeRegistry::new(NodeId::new(i as u64 + 1)))
            .collect();
        Self { registries }
    }

    pub fn registry(&self, idx: usize) -> &ClusterAttributeRegistry {
        &self.registries[idx]
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.registries.iter().map(|r| r.local_node_id()).collect()
    }

    /// Delivers an event to every node and returns each node's outcome.
    pub fn gossip(&self, event: MembershipEvent) -> Vec<Result<Vec<String>>> {
        self.registries
            .iter()
            .map(|r| r.apply(event.clone()))
            .collect()
    }

    /// Announces `records` as hosted by node `idx` to the whole cluster.
    pub fn announce(&self, idx: usize, records: Vec<AttributeRecord>) -> Vec<Result<Vec<String>>> {
        let node_id = self.registries[idx].local_node_id();
        self.gossip(MembershipEvent::NodeJoined { node_id, records })
    }

    /// Removes node `idx` from every other node's view.
    pub fn depart(&self, idx: usize) {
        let node_id = self.registries[idx].local_node_id();
        let _ = self.gossip(MembershipEvent::NodeLeft { node_id });
    }
}
