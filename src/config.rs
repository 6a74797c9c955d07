//! Global configuration options for the storage engine.

use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Global configuration options.
///
/// Retrieve the global [`Config`] with [`global_config`] and modify it with
/// [`global_config_mut`].
///
/// ## Parallel Export
/// > default: [`true`]
///
/// If enabled, bulk field export iterates realizations in parallel.
/// Realizations have no data dependency on one another, so this does not
/// change observable results; per-realization success and failure are still
/// reported independently.
///
/// ## Pretty Metadata
/// > default: [`false`]
///
/// If enabled, JSON metadata side-files are written with indentation. The
/// serialised content is deterministic either way.
#[derive(Debug)]
pub struct Config {
    parallel_export: bool,
    pretty_metadata: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallel_export: true,
            pretty_metadata: false,
        }
    }
}

impl Config {
    /// Get the [parallel export](#parallel-export) configuration.
    #[must_use]
    pub fn parallel_export(&self) -> bool {
        self.parallel_export
    }

    /// Set the [parallel export](#parallel-export) configuration.
    pub fn set_parallel_export(&mut self, parallel_export: bool) {
        self.parallel_export = parallel_export;
    }

    /// Get the [pretty metadata](#pretty-metadata) configuration.
    #[must_use]
    pub fn pretty_metadata(&self) -> bool {
        self.pretty_metadata
    }

    /// Set the [pretty metadata](#pretty-metadata) configuration.
    pub fn set_pretty_metadata(&mut self, pretty_metadata: bool) {
        self.pretty_metadata = pretty_metadata;
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

/// Returns a reference to the global configuration.
///
/// # Panics
/// Panics if the underlying lock has been poisoned.
pub fn global_config() -> RwLockReadGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .read()
        .unwrap()
}

/// Returns a mutable reference to the global configuration.
///
/// # Panics
/// Panics if the underlying lock has been poisoned.
pub fn global_config_mut() -> RwLockWriteGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .write()
        .unwrap()
}
