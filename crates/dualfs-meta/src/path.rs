//! Normalized absolute filesystem paths

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, Result};

/// Maximum encoded length of a path, in bytes.
pub const MAX_PATH_LEN: usize = 1024;

/// An absolute, normalized filesystem path.
///
/// Always starts with `/`, never ends with `/` unless it is the root, and contains no
/// empty, `.` or `..` components. Comparison is byte-wise and therefore case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FsPath(String);

impl FsPath {
    /// Returns the root path `/`.
    pub fn root() -> Self {
        FsPath("/".to_string())
    }

    /// Parses and normalizes a path.
    ///
    /// Duplicate separators are collapsed and `.` components dropped; `..` is rejected
    /// rather than resolved so that a prefix can never escape its own subtree.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| ConfigError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if !raw.starts_with('/') {
            return Err(invalid("path must start with '/'"));
        }
        if raw.len() > MAX_PATH_LEN {
            return Err(invalid("path exceeds 1024 bytes"));
        }
        if raw.contains('\0') {
            return Err(invalid("path cannot contain null bytes"));
        }

        let mut normalized = String::with_capacity(raw.len());
        for component in raw.split('/') {
            match component {
                "" | "." => continue,
                ".." => return Err(invalid("path cannot contain '..'")),
                name => {
                    normalized.push('/');
                    normalized.push_str(name);
                }
            }
        }

        if normalized.is_empty() {
            normalized.push('/');
        }
        Ok(FsPath(normalized))
    }

    /// Returns the normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `/`.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Iterates over the path components, root yields nothing.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Number of components; zero for the root.
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// Last component, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.components().last()
    }

    /// Parent path, `None` for the root.
    pub fn parent(&self) -> Option<FsPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(FsPath::root()),
            Some(idx) => Some(FsPath(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Appends a relative child (which may itself contain separators).
    pub fn join(&self, child: &str) -> Result<FsPath> {
        if self.is_root() {
            FsPath::parse(&format!("/{}", child))
        } else {
            FsPath::parse(&format!("{}/{}", self.0, child))
        }
    }

    /// Separator-aware prefix test: `/a/b` is a prefix of `/a/b` and `/a/b/c` but not of `/a/bc`.
    pub fn starts_with(&self, prefix: &FsPath) -> bool {
        if prefix.is_root() {
            return true;
        }
        match self.0.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FsPath {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        FsPath::parse(s)
    }
}

impl TryFrom<String> for FsPath {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self> {
        FsPath::parse(&s)
    }
}

impl From<FsPath> for String {
    fn from(path: FsPath) -> String {
        path.0
    }
}

impl AsRef<str> for FsPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
