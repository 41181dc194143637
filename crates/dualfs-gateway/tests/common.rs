//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use dualfs_gateway::{DualModeBackend, FsGateway, MemoryBackend};
use dualfs_meta::{AttributeRecord, ClusterAttributeRegistry, FsMode, FsPath, NodeId};
use std::sync::Arc;
use tokio::runtime::Runtime;

pub type Router = DualModeBackend<MemoryBackend>;

pub fn p(s: &str) -> FsPath {
    FsPath::parse(s).expect("valid test path")
}

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

/// One gateway node: registry, primary and secondary stores, router and facade.
pub struct TestGateway {
    pub runtime: Runtime,
    pub registry: ClusterAttributeRegistry,
    pub primary: Arc<MemoryBackend>,
    pub secondary: Arc<MemoryBackend>,
    pub gateway: FsGateway<Router>,
}

impl TestGateway {
    /// Starts node 1 hosting "igfs" with the given local record.
    pub fn start(local: AttributeRecord) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime");
        let registry = ClusterAttributeRegistry::new(NodeId::new(1));
        let name = local.name().to_string();
        registry.start_local(vec![local]).expect("local record");

        let table = registry.table(&name);
        let primary = Arc::new(MemoryBackend::new(name.as_str()));
        let secondary = Arc::new(MemoryBackend::new("secondary"));
        let router = Router::new(primary.clone(), secondary.clone(), table.clone());
        let gateway = FsGateway::new(Arc::new(router), runtime.handle().clone())
            .expect("multi-threaded runtime")
            .with_mode_table(table);

        Self {
            runtime,
            registry,
            primary,
            secondary,
            gateway,
        }
    }

    /// Waits for DUAL_ASYNC mirrors started so far.
    pub fn flush_mirrors(&self) {
        let router = self.gateway.backend().clone();
        self.runtime.block_on(async move { router.flush_mirrors().await });
    }
}
