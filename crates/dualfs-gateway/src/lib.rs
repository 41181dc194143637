#![warn(missing_docs)]

//! DualFS gateway: optional-async filesystem facade and mode-aware routing between the
//! primary store and a secondary filesystem

pub mod backend;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod facade;
pub mod memory;
pub mod pending;
pub mod router;
pub mod types;

pub use backend::{FileSystemBackend, FsTask};
pub use config::{FileSystemConfig, GatewayConfig};
pub use context::{CallContext, ContextId, ExecMode};
pub use error::{BackingError, BackingResult, GatewayError, Result};
pub use facade::{CallResult, FsGateway};
pub use memory::{MemoryBackend, MemoryError};
pub use pending::PendingOp;
pub use router::DualModeBackend;
pub use types::{
    AppendOptions, BlockLocation, CreateOptions, FileInfo, FsConfiguration, FsMetrics,
    InputHandle, OutputHandle, PathSummary, Properties,
};
