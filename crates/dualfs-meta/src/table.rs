//! Atomically published mode tables.

use arc_swap::ArcSwapOption;
use std::sync::Arc;

use crate::error::{ConfigError, Result};
use crate::path::FsPath;
use crate::resolver::PathModeResolver;
use crate::types::FsMode;

/// Shared handle to the current [`PathModeResolver`] of one filesystem.
///
/// Readers take lock-free snapshots; a membership change swaps in a whole new resolver,
/// so a reader holding a snapshot never observes a half-built table. The slot is empty
/// while no node provides the filesystem.
#[derive(Clone, Debug)]
pub struct ModeTable {
    name: Arc<str>,
    current: Arc<ArcSwapOption<PathModeResolver>>,
}

impl ModeTable {
    /// Creates an empty table for the named filesystem.
    pub fn empty(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            current: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// Creates a table already holding `resolver`.
    pub fn with_resolver(resolver: PathModeResolver) -> Self {
        let table = Self::empty(resolver.name());
        table.publish(resolver);
        table
    }

    /// Filesystem the table belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the current resolver.
    pub fn publish(&self, resolver: PathModeResolver) {
        self.current.store(Some(Arc::new(resolver)));
    }

    /// Empties the slot, e.g. after the last provider left.
    pub fn clear(&self) {
        self.current.store(None);
    }

    /// True once a resolver has been published and not cleared.
    pub fn is_available(&self) -> bool {
        self.current.load().is_some()
    }

    /// Returns the current resolver snapshot.
    pub fn snapshot(&self) -> Result<Arc<PathModeResolver>> {
        self.current
            .load_full()
            .ok_or_else(|| ConfigError::NoProviders {
                name: self.name.to_string(),
            })
    }

    /// Resolves a path against the current snapshot.
    pub fn resolve(&self, path: &FsPath) -> Result<FsMode> {
        Ok(self.snapshot()?.resolve(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn p(s: &str) -> FsPath {
        FsPath::parse(s).unwrap()
    }

    #[test]
    fn test_empty_table_reports_no_providers() {
        let table = ModeTable::empty("igfs");
        assert!(!table.is_available());
        assert!(matches!(
            table.resolve(&p("/a")),
            Err(ConfigError::NoProviders { .. })
        ));
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let table = ModeTable::with_resolver(PathModeResolver::from_modes(
            "igfs",
            FsMode::Primary,
            Vec::new(),
        ));
        let before = table.snapshot().unwrap();

        table.publish(PathModeResolver::from_modes(
            "igfs",
            FsMode::Proxy,
            Vec::new(),
        ));

        assert_eq!(before.resolve(&p("/x")), FsMode::Primary);
        assert_eq!(table.resolve(&p("/x")).unwrap(), FsMode::Proxy);
    }

    #[test]
    fn test_clear() {
        let table = ModeTable::with_resolver(PathModeResolver::from_modes(
            "igfs",
            FsMode::Primary,
            Vec::new(),
        ));
        table.clear();
        assert!(table.snapshot().is_err());
    }

    #[test]
    fn test_concurrent_readers_see_whole_tables() {
        let table = ModeTable::with_resolver(PathModeResolver::from_modes(
            "igfs",
            FsMode::Primary,
            vec![(p("/a"), FsMode::Primary)],
        ));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let snap = table.snapshot().unwrap();
                        // Each published table maps "/a" and the default to the same mode.
                        assert_eq!(snap.resolve(&p("/a/x")), snap.default_mode());
                    }
                })
            })
            .collect();

        for i in 0..200 {
            let mode = if i % 2 == 0 { FsMode::Proxy } else { FsMode::Primary };
            table.publish(PathModeResolver::from_modes(
                "igfs",
                mode,
                vec![(p("/a"), mode)],
            ));
        }

        for r in readers {
            r.join().unwrap();
        }
    }
}
