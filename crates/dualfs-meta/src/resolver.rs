//! Path-mode resolution by longest matching prefix.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::path::FsPath;
use crate::reconcile::EffectiveConfig;
use crate::types::FsMode;

/// Default mode plus prefix overrides, as handed to clients that route on their own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPaths {
    /// Mode of paths no prefix matches.
    pub default_mode: FsMode,
    /// Prefix overrides, deepest prefix first.
    pub path_modes: Vec<(FsPath, FsMode)>,
}

/// Immutable prefix-to-mode table for one filesystem instance.
///
/// Built once from an [`EffectiveConfig`] and never modified; a membership change produces
/// a fresh resolver. Lookups walk the ancestors of the path, so the first hit is the
/// longest matching prefix.
#[derive(Clone, Debug)]
pub struct PathModeResolver {
    name: String,
    default_mode: FsMode,
    modes: HashMap<String, FsMode>,
}

impl PathModeResolver {
    /// Builds a resolver from a reconciled configuration.
    pub fn new(config: &EffectiveConfig) -> Self {
        Self::from_modes(
            config.name(),
            config.default_mode(),
            config.path_modes().iter().map(|(p, m)| (p.clone(), *m)),
        )
    }

    /// Builds a resolver from an explicit default mode and prefix list.
    pub fn from_modes(
        name: impl Into<String>,
        default_mode: FsMode,
        modes: impl IntoIterator<Item = (FsPath, FsMode)>,
    ) -> Self {
        Self {
            name: name.into(),
            default_mode,
            modes: modes
                .into_iter()
                .map(|(p, m)| (String::from(p), m))
                .collect(),
        }
    }

    /// Filesystem the table belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mode of paths no prefix matches.
    pub fn default_mode(&self) -> FsMode {
        self.default_mode
    }

    /// Resolves the mode of a path.
    pub fn resolve(&self, path: &FsPath) -> FsMode {
        if self.modes.is_empty() {
            return self.default_mode;
        }

        let mut candidate = path.as_str();
        loop {
            if let Some(mode) = self.modes.get(candidate) {
                return *mode;
            }
            match candidate.rfind('/') {
                Some(0) if candidate.len() > 1 => candidate = "/",
                Some(0) | None => break,
                Some(idx) => candidate = &candidate[..idx],
            }
        }

        self.default_mode
    }

    /// Parses `raw` and resolves it.
    pub fn resolve_str(&self, raw: &str) -> Result<FsMode> {
        Ok(self.resolve(&FsPath::parse(raw)?))
    }

    /// True when the path is served by the secondary filesystem alone.
    pub fn is_proxy(&self, path: &FsPath) -> bool {
        self.resolve(path) == FsMode::Proxy
    }

    /// Exports the table, deepest prefix first.
    pub fn proxy_paths(&self) -> ProxyPaths {
        let mut path_modes: Vec<(FsPath, FsMode)> = self
            .modes
            .iter()
            .filter_map(|(p, m)| FsPath::parse(p).ok().map(|p| (p, *m)))
            .collect();
        path_modes.sort_by(|(a, _), (b, _)| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));
        ProxyPaths {
            default_mode: self.default_mode,
            path_modes,
        }
    }

    /// Prefix overrides, deepest prefix first.
    pub fn path_modes(&self) -> Vec<(FsPath, FsMode)> {
        self.proxy_paths().path_modes
    }

    /// Number of prefix overrides.
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    /// True when only the default mode applies.
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }
}
