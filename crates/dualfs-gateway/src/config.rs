//! Node configuration

use dualfs_meta::{AttributeRecord, FsMode, FsPath, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_worker_threads() -> usize {
    4
}

fn default_block_size() -> u32 {
    65536
}

fn default_group_size() -> u32 {
    1024
}

fn default_mode() -> FsMode {
    FsMode::DualAsync
}

/// Configuration of one gateway node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Cluster-unique id of this node.
    pub node_id: u64,
    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Whether a secondary filesystem is attached to this node.
    #[serde(default = "default_true")]
    pub secondary_enabled: bool,
    /// Runtime worker threads.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Filesystems this node provides.
    #[serde(default)]
    pub filesystems: Vec<FileSystemConfig>,
}

/// Local attributes of one filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSystemConfig {
    /// Filesystem name.
    pub name: String,
    /// Bytes per block.
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Blocks per affinity group.
    #[serde(default = "default_group_size")]
    pub group_size: u32,
    /// Metadata store name.
    pub meta_store: String,
    /// Data store name.
    pub data_store: String,
    /// Mode of paths not covered by `path_modes`.
    #[serde(default = "default_mode")]
    pub default_mode: FsMode,
    /// Whether the fragmentizer runs.
    #[serde(default = "default_true")]
    pub fragmentizer_enabled: bool,
    /// Per-prefix mode overrides.
    #[serde(default)]
    pub path_modes: BTreeMap<String, FsMode>,
}

impl FileSystemConfig {
    /// Builds this node's attribute record.
    pub fn to_record(&self) -> dualfs_meta::Result<AttributeRecord> {
        let mut builder = AttributeRecord::builder(&self.name)
            .block_size(self.block_size)
            .group_size(self.group_size)
            .meta_store(&self.meta_store)
            .data_store(&self.data_store)
            .default_mode(self.default_mode)
            .fragmentizer_enabled(self.fragmentizer_enabled);
        for (prefix, mode) in &self.path_modes {
            builder = builder.path_mode(prefix.as_str(), *mode);
        }
        builder.build()
    }

    fn modes(&self) -> impl Iterator<Item = FsMode> + '_ {
        std::iter::once(self.default_mode).chain(self.path_modes.values().copied())
    }
}

impl GatewayConfig {
    /// Loads a `.toml` or `.json` configuration file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: GatewayConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: GatewayConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Checks the configuration for errors that would make startup fail.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.filesystems.is_empty() {
            anyhow::bail!("no filesystems configured");
        }
        if self.worker_threads == 0 {
            anyhow::bail!("worker_threads must be positive");
        }

        let mut names = HashSet::new();
        for fs in &self.filesystems {
            if !names.insert(fs.name.as_str()) {
                anyhow::bail!("filesystem '{}' is configured twice", fs.name);
            }
            if fs.block_size == 0 || fs.group_size == 0 {
                anyhow::bail!("filesystem '{}': block_size and group_size must be positive", fs.name);
            }
            for prefix in fs.path_modes.keys() {
                if let Err(e) = FsPath::parse(prefix) {
                    anyhow::bail!("filesystem '{}': {}", fs.name, e);
                }
            }
            if !self.secondary_enabled {
                if let Some(mode) = fs.modes().find(|m| m.uses_secondary()) {
                    anyhow::bail!(
                        "filesystem '{}' uses {} but no secondary filesystem is enabled",
                        fs.name,
                        mode
                    );
                }
            }
            fs.to_record()?;
        }
        Ok(())
    }

    /// This node's id.
    pub fn node(&self) -> NodeId {
        NodeId::new(self.node_id)
    }

    /// Looks up a filesystem by name.
    pub fn filesystem(&self, name: &str) -> Option<&FileSystemConfig> {
        self.filesystems.iter().find(|fs| fs.name == name)
    }

    /// Builds the runtime that drives backing operations.
    pub fn build_runtime(&self) -> std::io::Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.worker_threads)
            .thread_name("dualfs-worker")
            .enable_all()
            .build()
    }

    /// Attribute records of every configured filesystem.
    pub fn records(&self) -> dualfs_meta::Result<Vec<AttributeRecord>> {
        self.filesystems.iter().map(FileSystemConfig::to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fs(name: &str) -> FileSystemConfig {
        FileSystemConfig {
            name: name.to_string(),
            block_size: 65536,
            group_size: 128,
            meta_store: "M".to_string(),
            data_store: "D".to_string(),
            default_mode: FsMode::Primary,
            fragmentizer_enabled: true,
            path_modes: BTreeMap::new(),
        }
    }

    fn config(filesystems: Vec<FileSystemConfig>) -> GatewayConfig {
        GatewayConfig {
            node_id: 1,
            log_level: "info".to_string(),
            secondary_enabled: true,
            worker_threads: 2,
            filesystems,
        }
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
node_id = 3
secondary_enabled = true

[[filesystems]]
name = "igfs"
group_size = 128
meta_store = "igfs-meta"
data_store = "igfs-data"

[filesystems.path_modes]
"/tmp" = "PRIMARY"
"/archive" = "PROXY"
            "#
        )
        .unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node(), NodeId::new(3));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.worker_threads, 4);

        let igfs = config.filesystem("igfs").unwrap();
        assert_eq!(igfs.block_size, 65536);
        assert_eq!(igfs.default_mode, FsMode::DualAsync);
        assert_eq!(igfs.path_modes.get("/archive"), Some(&FsMode::Proxy));
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{
                "node_id": 7,
                "log_level": "debug",
                "filesystems": [{{
                    "name": "igfs",
                    "meta_store": "M",
                    "data_store": "D",
                    "default_mode": "DUAL_SYNC"
                }}]
            }}"#
        )
        .unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.filesystems[0].default_mode, FsMode::DualSync);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(GatewayConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_and_duplicates() {
        assert!(config(vec![]).validate().is_err());
        assert!(config(vec![fs("a"), fs("a")]).validate().is_err());
        assert!(config(vec![fs("a"), fs("b")]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut bad = fs("a");
        bad.group_size = 0;
        assert!(config(vec![bad]).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let mut bad = fs("a");
        bad.path_modes.insert("relative/path".to_string(), FsMode::Proxy);
        assert!(config(vec![bad]).validate().is_err());
    }

    #[test]
    fn test_validate_requires_secondary_for_dual_modes() {
        let mut dual = fs("a");
        dual.path_modes.insert("/remote".to_string(), FsMode::Proxy);
        let mut cfg = config(vec![dual]);
        assert!(cfg.validate().is_ok());

        cfg.secondary_enabled = false;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("PROXY"));

        cfg.filesystems[0].path_modes.clear();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_build_runtime() {
        let rt = config(vec![fs("a")]).build_runtime().unwrap();
        assert_eq!(rt.block_on(async { 1 + 1 }), 2);
    }

    #[test]
    fn test_to_record() {
        let mut cfg = fs("igfs");
        cfg.path_modes.insert("/a/b".to_string(), FsMode::DualSync);
        let record = cfg.to_record().unwrap();
        assert_eq!(record.name(), "igfs");
        assert_eq!(record.group_block_size(), 65536 * 128);
        assert_eq!(
            record.path_modes().get(&FsPath::parse("/a/b").unwrap()),
            Some(&FsMode::DualSync)
        );
    }
}
