//! Error types for DualFS configuration handling

use thiserror::Error;

use crate::types::NodeId;

/// Configuration errors raised while building, decoding or reconciling filesystem attributes.
///
/// Every variant is fatal for the filesystem instance it concerns: a node must not start
/// serving a filesystem whose configuration failed to validate or reconcile.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No cluster node hosts the requested filesystem.
    #[error("no nodes provide filesystem '{name}'")]
    NoProviders {
        /// The filesystem name.
        name: String,
    },
    /// Two nodes disagree on a field that defines data layout.
    #[error(
        "incompatible configuration for filesystem '{name}': field '{field}' is {first_value} on node {first_node} but {other_value} on node {other_node}"
    )]
    IncompatibleConfig {
        /// The filesystem name.
        name: String,
        /// The diverging field.
        field: &'static str,
        /// Reference node the others are compared against.
        first_node: NodeId,
        /// Value on the reference node.
        first_value: String,
        /// Node holding the diverging value.
        other_node: NodeId,
        /// Value on the diverging node.
        other_value: String,
    },
    /// A mode ordinal outside the known set was decoded.
    #[error("unknown filesystem mode ordinal: {0}")]
    UnknownMode(i8),
    /// An attribute value violates its invariant.
    #[error("invalid attribute '{field}': {reason}")]
    InvalidAttribute {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// A path or path prefix is malformed.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The rejected input.
        path: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The binary attribute record could not be decoded.
    #[error("attribute decode error: {reason}")]
    DecodeError {
        /// The reason for the decode error.
        reason: String,
    },
    /// The binary attribute record uses a format version this node does not understand.
    #[error("unsupported attribute format version: {0}")]
    UnsupportedVersion(u8),
}

/// Result type alias using ConfigError as the error type.
pub type Result<T> = std::result::Result<T, ConfigError>;
