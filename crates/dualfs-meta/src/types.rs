use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConfigError, Result};

/// Represents a unique identifier for a cluster node hosting filesystem instances
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Creates a new NodeId from a raw u64 value
    pub fn new(id: u64) -> Self {
        NodeId(id)
    }

    /// Returns the raw u64 value of this node ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operating mode of a path: where its operations are served and how they are mirrored.
///
/// The discriminants are the wire ordinals exchanged between nodes and must never change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i8)]
pub enum FsMode {
    /// Served only by the local distributed store.
    Primary = 0,
    /// Forwarded entirely to the secondary filesystem.
    Proxy = 1,
    /// Mirrored to the secondary filesystem; the call waits for the mirror.
    DualSync = 2,
    /// Mirrored to the secondary filesystem; the call does not wait for the mirror.
    DualAsync = 3,
}

impl FsMode {
    /// All modes in ordinal order.
    pub const ALL: [FsMode; 4] = [
        FsMode::Primary,
        FsMode::Proxy,
        FsMode::DualSync,
        FsMode::DualAsync,
    ];

    /// Returns the wire ordinal of this mode.
    pub fn ordinal(self) -> i8 {
        self as i8
    }

    /// Maps a wire ordinal back to a mode, rejecting anything outside the known set.
    pub fn from_ordinal(ordinal: i8) -> Result<Self> {
        match ordinal {
            0 => Ok(FsMode::Primary),
            1 => Ok(FsMode::Proxy),
            2 => Ok(FsMode::DualSync),
            3 => Ok(FsMode::DualAsync),
            other => Err(ConfigError::UnknownMode(other)),
        }
    }

    /// True for both mirrored modes.
    pub fn is_dual(self) -> bool {
        match self {
            FsMode::DualSync | FsMode::DualAsync => true,
            FsMode::Primary | FsMode::Proxy => false,
        }
    }

    /// True when the local store takes part in serving the path.
    pub fn uses_primary(self) -> bool {
        match self {
            FsMode::Primary | FsMode::DualSync | FsMode::DualAsync => true,
            FsMode::Proxy => false,
        }
    }

    /// True when the secondary filesystem takes part in serving the path.
    pub fn uses_secondary(self) -> bool {
        match self {
            FsMode::Proxy | FsMode::DualSync | FsMode::DualAsync => true,
            FsMode::Primary => false,
        }
    }

    /// Returns the canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            FsMode::Primary => "PRIMARY",
            FsMode::Proxy => "PROXY",
            FsMode::DualSync => "DUAL_SYNC",
            FsMode::DualAsync => "DUAL_ASYNC",
        }
    }
}

impl fmt::Display for FsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_ordinals_are_fixed() {
        assert_eq!(FsMode::Primary.ordinal(), 0);
        assert_eq!(FsMode::Proxy.ordinal(), 1);
        assert_eq!(FsMode::DualSync.ordinal(), 2);
        assert_eq!(FsMode::DualAsync.ordinal(), 3);
    }

    #[test]
    fn test_from_ordinal_known() {
        for mode in FsMode::ALL {
            assert_eq!(FsMode::from_ordinal(mode.ordinal()).unwrap(), mode);
        }
    }

    #[test]
    fn test_from_ordinal_unknown() {
        assert_eq!(FsMode::from_ordinal(4), Err(ConfigError::UnknownMode(4)));
        assert_eq!(FsMode::from_ordinal(-1), Err(ConfigError::UnknownMode(-1)));
    }

    #[test]
    fn test_mode_participation() {
        assert!(FsMode::Primary.uses_primary());
        assert!(!FsMode::Primary.uses_secondary());
        assert!(!FsMode::Proxy.uses_primary());
        assert!(FsMode::Proxy.uses_secondary());
        assert!(FsMode::DualSync.is_dual());
        assert!(FsMode::DualAsync.is_dual());
        assert!(!FsMode::Proxy.is_dual());
    }

    #[test]
    fn test_mode_serde_names() {
        let json = serde_json::to_string(&FsMode::DualAsync).unwrap();
        assert_eq!(json, "\"DUAL_ASYNC\"");
        let mode: FsMode = serde_json::from_str("\"PROXY\"").unwrap();
        assert_eq!(mode, FsMode::Proxy);
    }

    #[test]
    fn test_node_id_display_and_order() {
        assert_eq!(NodeId::new(42).to_string(), "42");
        assert!(NodeId::new(1) < NodeId::new(2));
    }
}
