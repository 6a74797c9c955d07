//! The per-realization file layout.
//!
//! A [`RealizationStore`] maps an address `(kind, key, realization)` to one
//! file under the mount point and reads or writes one array per call. It is
//! independent of ensemble width: padding and cross-realization assembly
//! belong to the [`Storage`](crate::ensemble::Storage) facade.
//!
//! Layout under the mount point:
//! - `gen-kw.earr` — one shared container for all keyword-vector parameters,
//!   one named variable per parameter (sub-keys are shared structure, so the
//!   realization axis lives inside the container).
//! - `realization-<i>/summary.earr` — that realization's summary container.
//! - `realization-<i>/gen-data.earr` — that realization's gen-data container.
//! - `realization-<i>/<key>.f64` — one flat blob per field or surface key.
//!
//! Every file is opened, read or written, and closed within one call; no
//! handle outlives an operation.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use derive_more::Display;
use ndarray::Array1;
use thiserror::Error;

use crate::{
    container::{decode_blob, encode_blob, ContainerError, Dataset, Variable},
    geometry::ExportError,
};

/// The kind of stored data; every address carries one.
///
/// All dispatch in the engine is on this tag.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum DataKind {
    /// Keyword-vector parameter.
    #[display("GEN_KW")]
    GenKw,
    /// 3-D grid-indexed field parameter.
    #[display("FIELD")]
    Field,
    /// 2-D surface parameter.
    #[display("SURFACE")]
    Surface,
    /// Time-series response.
    #[display("SUMMARY")]
    Summary,
    /// Named variable-length series response.
    #[display("GEN_DATA")]
    GenData,
}

impl DataKind {
    /// The container file name for kinds stored as a dataset, if any.
    #[must_use]
    pub const fn container_file(&self) -> Option<&'static str> {
        match self {
            Self::GenKw => Some("gen-kw.earr"),
            Self::Summary => Some("summary.earr"),
            Self::GenData => Some("gen-data.earr"),
            Self::Field | Self::Surface => None,
        }
    }
}

/// A storage engine error.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested key has no container. Recoverable: the caller may skip it.
    #[error("unable to load {kind} for key: {key}")]
    KeyNotFound {
        /// The kind of the request.
        kind: DataKind,
        /// The requested key.
        key: String,
    },
    /// The requested realization has no data for the key. Recoverable.
    #[error("unable to load {kind} for key: {key}, realization: {iens}")]
    RealizationNotFound {
        /// The kind of the request.
        kind: DataKind,
        /// The requested key.
        key: String,
        /// The requested realization index.
        iens: usize,
    },
    /// A realization index outside `[0, ensemble_size)`.
    #[error("realization index {iens} outside ensemble of size {ensemble_size}")]
    RealizationOutOfRange {
        /// The offending index.
        iens: usize,
        /// The fixed ensemble width.
        ensemble_size: usize,
    },
    /// Supplied data does not have the shape the operation requires.
    #[error("data shape {actual:?} does not match expected {expected:?}")]
    ShapeMismatch {
        /// The shape the operation requires.
        expected: Vec<usize>,
        /// The shape actually supplied or found.
        actual: Vec<usize>,
    },
    /// A disk or permission error. Fatal to the current operation.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A malformed JSON metadata side-file.
    #[error("error parsing metadata in {path}: {source}")]
    InvalidMetadata {
        /// The metadata file.
        path: PathBuf,
        /// The parse failure.
        source: serde_json::Error,
    },
    /// A malformed array container.
    #[error(transparent)]
    Container(#[from] ContainerError),
    /// The geometry writer rejected an export.
    #[error(transparent)]
    Export(#[from] ExportError),
    /// A bulk-export output pattern without a realization placeholder.
    #[error("output path pattern {0:?} contains no %d realization placeholder")]
    InvalidPathPattern(String),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

impl StorageError {
    /// Returns true for absence errors, which callers may treat as "skip".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound { .. } | Self::RealizationNotFound { .. }
        )
    }
}

/// Per-realization file access for one mount point.
#[derive(Clone, Debug)]
pub struct RealizationStore {
    mount_point: PathBuf,
}

impl RealizationStore {
    /// Create a store over `mount_point`. The directory itself is created
    /// lazily by the first write.
    #[must_use]
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
        }
    }

    /// The mount point directory.
    #[must_use]
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// The directory holding realization `iens`'s files.
    #[must_use]
    pub fn realization_path(&self, iens: usize) -> PathBuf {
        self.mount_point.join(format!("realization-{iens}"))
    }

    fn blob_path(&self, key: &str, iens: usize) -> PathBuf {
        self.realization_path(iens).join(format!("{key}.f64"))
    }

    fn shared_path(&self, kind: DataKind) -> PathBuf {
        // Shared containers sit at the mount root; only GenKw uses one.
        self.mount_point
            .join(kind.container_file().unwrap_or("gen-kw.earr"))
    }

    /// Write a field or surface blob for one realization.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if the realization directory cannot be
    /// created or the file cannot be written.
    pub fn write_blob(&self, key: &str, iens: usize, values: &[f64]) -> Result<(), StorageError> {
        let dir = self.realization_path(iens);
        fs::create_dir_all(&dir)?;
        fs::write(self.blob_path(key, iens), encode_blob(values))?;
        Ok(())
    }

    /// Read a field or surface blob for one realization.
    ///
    /// # Errors
    /// Returns [`StorageError::RealizationNotFound`] if the blob is absent.
    pub fn read_blob(
        &self,
        kind: DataKind,
        key: &str,
        iens: usize,
    ) -> Result<Array1<f64>, StorageError> {
        let path = self.blob_path(key, iens);
        let bytes = read_optional(&path)?.ok_or_else(|| StorageError::RealizationNotFound {
            kind,
            key: key.to_string(),
            iens,
        })?;
        Ok(Array1::from_vec(decode_blob(&bytes)?))
    }

    /// Returns true if a blob exists for `(key, iens)`. Never fails.
    #[must_use]
    pub fn blob_exists(&self, key: &str, iens: usize) -> bool {
        self.blob_path(key, iens).exists()
    }

    /// Write a per-realization container, replacing any existing one.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if the realization directory cannot be
    /// created or the file cannot be written.
    pub fn write_dataset(
        &self,
        kind: DataKind,
        iens: usize,
        dataset: &Dataset,
    ) -> Result<(), StorageError> {
        let file = container_file(kind);
        let dir = self.realization_path(iens);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(file), dataset.to_bytes()?)?;
        Ok(())
    }

    /// Read a per-realization container.
    ///
    /// # Errors
    /// Returns [`StorageError::RealizationNotFound`] if the container is
    /// absent for that realization.
    pub fn read_dataset(&self, kind: DataKind, iens: usize) -> Result<Dataset, StorageError> {
        let file = container_file(kind);
        let path = self.realization_path(iens).join(file);
        let bytes = read_optional(&path)?.ok_or_else(|| StorageError::RealizationNotFound {
            kind,
            key: file.to_string(),
            iens,
        })?;
        Ok(Dataset::from_bytes(&bytes)?)
    }

    /// Merge a variable into the ensemble-wide shared container for `kind`,
    /// creating the container if it does not exist.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] on write failure or a container error if
    /// the existing file is malformed.
    pub fn append_shared(
        &self,
        kind: DataKind,
        name: &str,
        variable: Variable,
    ) -> Result<(), StorageError> {
        let path = self.shared_path(kind);
        let mut dataset = match read_optional(&path)? {
            Some(bytes) => Dataset::from_bytes(&bytes)?,
            None => Dataset::new(),
        };
        dataset.insert(name, variable);
        fs::create_dir_all(&self.mount_point)?;
        fs::write(path, dataset.to_bytes()?)?;
        Ok(())
    }

    /// Read the ensemble-wide shared container for `kind`.
    ///
    /// # Errors
    /// Returns [`StorageError::KeyNotFound`] if the container has never been
    /// written.
    pub fn read_shared(&self, kind: DataKind) -> Result<Dataset, StorageError> {
        let path = self.shared_path(kind);
        let bytes = read_optional(&path)?.ok_or_else(|| StorageError::KeyNotFound {
            kind,
            key: container_file(kind).to_string(),
        })?;
        Ok(Dataset::from_bytes(&bytes)?)
    }

    /// Returns true if the shared container for `kind` exists. Never fails.
    #[must_use]
    pub fn shared_exists(&self, kind: DataKind) -> bool {
        self.shared_path(kind).exists()
    }
}

fn container_file(kind: DataKind) -> &'static str {
    kind.container_file().unwrap_or("data.earr")
}

/// Read a file, mapping "does not exist" to `None` and every other failure to
/// an error. Missing parent directories count as absence, not a crash.
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}
