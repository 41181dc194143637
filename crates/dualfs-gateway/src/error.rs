//! Error types for the DualFS gateway

use dualfs_meta::{ConfigError, FsMode, FsPath};
use thiserror::Error;

/// Failure reported by a backing filesystem.
pub type BackingError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by backing filesystem operations.
pub type BackingResult<T> = std::result::Result<T, BackingError>;

/// Error types surfaced by the gateway to its callers.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The backing filesystem failed the operation.
    #[error("{op} failed: {source}")]
    Backing {
        /// Operation that failed.
        op: &'static str,
        /// Original failure from the backing filesystem.
        #[source]
        source: BackingError,
    },
    /// Filesystem configuration is invalid or could not be reconciled.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The caller cancelled the operation.
    #[error("{op} cancelled")]
    Cancelled {
        /// Operation that was cancelled.
        op: &'static str,
    },
    /// Async mode was requested from a facade built without async support.
    #[error("asynchronous mode is not supported by this filesystem")]
    AsyncNotSupported,
    /// A pending result was retrieved as the wrong type.
    #[error("pending result of {op} has a different type than requested")]
    PendingTypeMismatch {
        /// Operation whose result was requested.
        op: &'static str,
    },
    /// Source and destination of a rename resolve to different modes.
    #[error("cannot move '{src}' ({src_mode}) to '{dest}' ({dest_mode}): modes differ")]
    ModeMismatch {
        /// Rename source.
        src: FsPath,
        /// Mode of the source.
        src_mode: FsMode,
        /// Rename destination.
        dest: FsPath,
        /// Mode of the destination.
        dest_mode: FsMode,
    },
    /// The path needs the secondary filesystem but none is configured.
    #[error("'{path}' is in {mode} mode but no secondary filesystem is configured")]
    SecondaryUnavailable {
        /// Path being routed.
        path: FsPath,
        /// Mode the path resolved to.
        mode: FsMode,
    },
    /// No filesystem with that name is configured on this node.
    #[error("unknown filesystem: {name}")]
    UnknownFileSystem {
        /// The name that was looked up.
        name: String,
    },
    /// A blocking call was made from a thread that drives a single-threaded runtime.
    #[error("{op} would block the single-threaded runtime driving the calling task")]
    BlockingInAsyncContext {
        /// Operation that was refused.
        op: &'static str,
    },
    /// The facade was given a runtime that cannot drive operations for blocked callers.
    #[error("unsupported runtime: {reason}")]
    UnsupportedRuntime {
        /// Why the runtime was refused.
        reason: &'static str,
    },
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Wraps a backing failure for the named operation.
    pub fn backing(op: &'static str, source: BackingError) -> Self {
        GatewayError::Backing { op, source }
    }

    /// Converts a backing failure. Gateway and configuration errors raised by a routing
    /// layer below the facade are passed through as themselves.
    pub fn from_backing(op: &'static str, source: BackingError) -> Self {
        let source = match source.downcast::<GatewayError>() {
            Ok(err) => return *err,
            Err(source) => source,
        };
        match source.downcast::<ConfigError>() {
            Ok(err) => GatewayError::Config(*err),
            Err(source) => GatewayError::Backing { op, source },
        }
    }

    /// True for failures that originate in the backing filesystem.
    pub fn is_backing(&self) -> bool {
        matches!(self, GatewayError::Backing { .. })
    }

    /// Returns the backing failure's original cause, if this is a backing error.
    pub fn backing_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            GatewayError::Backing { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias using GatewayError as the error type.
pub type Result<T> = std::result::Result<T, GatewayError>;
