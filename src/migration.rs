//! On-disk schema migration.
//!
//! A storage root holds a version marker (`index.json`), experiment metadata
//! trees under `experiments/<uuid>/`, and ensemble mount points under
//! `ensembles/`. [`migrate`] upgrades the root from its stored schema version
//! to [`CURRENT_VERSION`], one forward-only step at a time.
//!
//! Every step is idempotent: execution is gated by the stored version marker,
//! not by tracking whether a given step already ran, so re-running a step must
//! produce identical output. A step that finds zero experiments is a no-op.
//! Malformed metadata is fatal; the study is presumed corrupt and must be
//! repaired manually.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

/// The schema version this engine reads and writes.
pub const CURRENT_VERSION: u32 = 3;

/// The canonical identity of one experiment.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ExperimentIndex {
    /// Unique experiment id.
    pub id: Uuid,
    /// Human-readable experiment name.
    pub name: String,
}

impl ExperimentIndex {
    /// Create a fresh identity with a random id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// A schema-migration error.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A disk error while rewriting the tree.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A malformed metadata file. Fatal: the study must be repaired manually.
    #[error("malformed metadata in {path}: {source}")]
    InvalidMetadata {
        /// The metadata file.
        path: PathBuf,
        /// The parse failure.
        source: serde_json::Error,
    },
    /// An experiment directory whose name is not a valid identity.
    #[error("experiment directory {0} is not a valid experiment id")]
    InvalidIdentity(PathBuf),
    /// The on-disk version is newer than this engine supports.
    #[error("on-disk schema version {0} is newer than supported version {CURRENT_VERSION}")]
    FromFuture(u32),
}

#[derive(Deserialize, Serialize)]
struct RootIndex {
    version: u32,
}

/// Upgrade the storage root at `root` to [`CURRENT_VERSION`].
///
/// Safe to call on every open: an up-to-date root is a no-op, as is a root
/// with no experiments. The version marker is bumped only after each step
/// completes, so an interrupted migration resumes at the failed step.
///
/// # Errors
/// Returns a [`MigrationError`] on malformed metadata, an unsupported
/// future version, or a disk error.
pub fn migrate(root: &Path) -> Result<(), MigrationError> {
    let mut version = read_version(root)?;
    if version > CURRENT_VERSION {
        return Err(MigrationError::FromFuture(version));
    }
    while version < CURRENT_VERSION {
        let next = version + 1;
        info!(from = version, to = next, root = %root.display(), "migrating storage schema");
        match next {
            2 => consolidate_realization_dirs(root)?,
            3 => rewrite_experiment_metadata(root)?,
            _ => {}
        }
        write_version(root, next)?;
        version = next;
    }
    Ok(())
}

/// The stored schema version of `root`. A root without a marker is version 1.
///
/// # Errors
/// Returns [`MigrationError::InvalidMetadata`] if the marker is malformed.
pub fn read_version(root: &Path) -> Result<u32, MigrationError> {
    let path = root.join("index.json");
    match fs::read(&path) {
        Ok(bytes) => {
            let index: RootIndex = serde_json::from_slice(&bytes)
                .map_err(|source| MigrationError::InvalidMetadata { path, source })?;
            Ok(index.version)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(1),
        Err(e) => Err(MigrationError::Io(e)),
    }
}

fn write_version(root: &Path, version: u32) -> Result<(), MigrationError> {
    fs::create_dir_all(root)?;
    let marker = serde_json::to_string_pretty(&RootIndex { version })
        .map_err(|source| MigrationError::InvalidMetadata {
            path: root.join("index.json"),
            source,
        })?;
    fs::write(root.join("index.json"), marker)?;
    Ok(())
}

/// Step to version 2: merge the legacy split per-realization layout
/// (`summary-<i>/`, `gen-data-<i>/`, `field-<i>/`) into `realization-<i>/`.
fn consolidate_realization_dirs(root: &Path) -> Result<(), MigrationError> {
    let ensembles = root.join("ensembles");
    if !ensembles.is_dir() {
        return Ok(());
    }
    for mount in WalkDir::new(&ensembles).min_depth(1).max_depth(1) {
        let mount = mount.map_err(into_io)?;
        if !mount.file_type().is_dir() {
            continue;
        }
        for entry in WalkDir::new(mount.path()).min_depth(1).max_depth(1) {
            let entry = entry.map_err(into_io)?;
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            let Some(iens) = split_layout_index(name) else {
                continue;
            };
            let target = mount.path().join(format!("realization-{iens}"));
            fs::create_dir_all(&target)?;
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                fs::rename(file.path(), target.join(file.file_name()))?;
            }
            fs::remove_dir(entry.path())?;
            debug!(from = name, iens, "consolidated split realization directory");
        }
    }
    Ok(())
}

/// The realization index of a legacy split-layout directory name, if it is one.
fn split_layout_index(name: &str) -> Option<usize> {
    for prefix in ["summary-", "gen-data-", "field-"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return rest.parse().ok();
        }
    }
    None
}

/// Step to version 3: drop the retired `template_file_path` parameter key,
/// backfill `update` and `name` defaults, regenerate each experiment's
/// identity file, and prune summary response entries with no keys.
fn rewrite_experiment_metadata(root: &Path) -> Result<(), MigrationError> {
    let experiments = root.join("experiments");
    if !experiments.is_dir() {
        return Ok(());
    }
    for experiment in WalkDir::new(&experiments).min_depth(1).max_depth(1) {
        let experiment = experiment.map_err(into_io)?;
        if !experiment.file_type().is_dir() {
            continue;
        }
        rewrite_parameters(experiment.path())?;
        regenerate_identity(experiment.path())?;
        prune_empty_summary_responses(experiment.path())?;
    }
    Ok(())
}

fn rewrite_parameters(experiment: &Path) -> Result<(), MigrationError> {
    let path = experiment.join("parameter.json");
    let Some(mut parameters) = read_json_value(&path)? else {
        return Ok(());
    };
    if let Some(parameters) = parameters.as_object_mut() {
        for config in parameters.values_mut() {
            if let Some(config) = config.as_object_mut() {
                config.remove("template_file_path");
                config
                    .entry("update")
                    .or_insert_with(|| Value::Bool(true));
                config
                    .entry("name")
                    .or_insert_with(|| Value::String("default".to_string()));
            }
        }
    }
    write_json_value(&path, &parameters)
}

fn regenerate_identity(experiment: &Path) -> Result<(), MigrationError> {
    let dir_name = experiment
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let id = Uuid::parse_str(&dir_name)
        .map_err(|_| MigrationError::InvalidIdentity(experiment.to_path_buf()))?;

    let path = experiment.join("index.json");
    // Keep an existing name if the old identity file carried one.
    let name = read_json_value(&path)?
        .as_ref()
        .and_then(|v| v.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("default")
        .to_string();
    let index = ExperimentIndex { id, name };
    let json = serde_json::to_value(&index).map_err(|source| MigrationError::InvalidMetadata {
        path: path.clone(),
        source,
    })?;
    write_json_value(&path, &json)
}

fn prune_empty_summary_responses(experiment: &Path) -> Result<(), MigrationError> {
    let path = experiment.join("responses.json");
    let Some(mut responses) = read_json_value(&path)? else {
        return Ok(());
    };
    if let Some(responses) = responses.as_object_mut() {
        responses.retain(|_, config| {
            let is_summary = config.get("kind").and_then(Value::as_str) == Some("summary");
            let has_keys = config
                .get("keys")
                .and_then(Value::as_array)
                .is_some_and(|keys| !keys.is_empty());
            !is_summary || has_keys
        });
    }
    write_json_value(&path, &responses)
}

fn read_json_value(path: &Path) -> Result<Option<Value>, MigrationError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|source| {
            MigrationError::InvalidMetadata {
                path: path.to_path_buf(),
                source,
            }
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MigrationError::Io(e)),
    }
}

fn write_json_value(path: &Path, value: &Value) -> Result<(), MigrationError> {
    let json =
        serde_json::to_string_pretty(value).map_err(|source| MigrationError::InvalidMetadata {
            path: path.to_path_buf(),
            source,
        })?;
    fs::write(path, json)?;
    Ok(())
}

fn into_io(err: walkdir::Error) -> MigrationError {
    MigrationError::Io(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_layout_names() {
        assert_eq!(split_layout_index("summary-3"), Some(3));
        assert_eq!(split_layout_index("gen-data-0"), Some(0));
        assert_eq!(split_layout_index("field-12"), Some(12));
        assert_eq!(split_layout_index("realization-1"), None);
        assert_eq!(split_layout_index("summary-x"), None);
    }

    #[test]
    fn empty_root_is_a_noop() {
        let tmp = tempfile::TempDir::new().unwrap();
        migrate(tmp.path()).unwrap();
        assert_eq!(read_version(tmp.path()).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn future_version_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join("index.json"), r#"{"version": 99}"#).unwrap();
        assert!(matches!(
            migrate(tmp.path()),
            Err(MigrationError::FromFuture(99))
        ));
    }
}
