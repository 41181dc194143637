#![warn(missing_docs)]

//! DualFS metadata subsystem: filesystem attribute records, cluster reconciliation and
//! path-mode resolution

pub mod attributes;
pub mod codec;
pub mod error;
pub mod membership;
pub mod path;
pub mod reconcile;
pub mod resolver;
pub mod table;
pub mod types;

pub use attributes::{AttributeRecord, AttributeRecordBuilder};
pub use error::{ConfigError, Result};
pub use membership::{ClusterAttributeRegistry, MembershipEvent};
pub use path::FsPath;
pub use reconcile::{reconcile, EffectiveConfig, ModeSkew};
pub use resolver::{PathModeResolver, ProxyPaths};
pub use table::ModeTable;
pub use types::{FsMode, NodeId};
