//! The ensemble storage facade.
//!
//! [`Storage`] is the only entry point the rest of the system uses. It owns a
//! mount point (the root directory of one ensemble's persisted state), fixes
//! the `ensemble_size` (the realization-slot count), and aggregates
//! per-realization accesses across the ensemble: padding for partial
//! realization sets, prior/metadata side-files, and dataframe assembly for
//! statistical and plotting consumers.
//!
//! Absence is always surfaced as a not-found error, never as an empty or
//! zeroed array, so callers can distinguish "no realizations succeeded" from
//! "all realizations equal zero". Padded slots in keyword-vector containers
//! hold NaN, the designated "no value" marker.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use ndarray::{Array1, Array2, Array3, Axis, Ix2, Zip};
use rayon::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    config::global_config,
    container::{Dataset, Dimension, Variable},
    frame::ResponseFrame,
    geometry::{ExportFormat, GridProperty},
    migration::ExperimentIndex,
    realization::{DataKind, RealizationStore, StorageError},
    transform::{FieldTransform, Truncation, TruncationMode},
};

const GEN_KW_PRIORS_FILE: &str = "gen-kw-priors.json";
const FIELD_INFO_FILE: &str = "field-info.json";
const FIELD_GEOMETRY_FILE: &str = "field-info.egrid";
const SURFACE_INFO_FILE: &str = "surface-info.json";
const EXPERIMENT_INDEX_FILE: &str = "index.json";

/// The prior-distribution descriptor for one sub-key of a keyword-vector
/// parameter.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PriorDescriptor {
    /// The sub-key this prior applies to.
    pub key: String,
    /// The distribution family (e.g. `NORMAL`, `UNIFORM`).
    pub function: String,
    /// The distribution parameters, by name.
    pub parameters: BTreeMap<String, f64>,
}

/// Experiment-wide metadata for one field parameter key.
///
/// Written once per key and never mutated. The transform and truncation are
/// applied only at export time; stored field values are always raw.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FieldInfo {
    /// Grid columns.
    pub nx: usize,
    /// Grid rows.
    pub ny: usize,
    /// Grid layers.
    pub nz: usize,
    /// Name of the output transform (see [`FieldTransform::from_name`]).
    pub transform_out: String,
    /// Which truncation bounds are active.
    pub truncation_mode: TruncationMode,
    /// Lower truncation bound.
    pub truncation_min: f64,
    /// Upper truncation bound.
    pub truncation_max: f64,
}

/// Experiment-wide geometry descriptor for one surface parameter key.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SurfaceInfo {
    /// Surface columns.
    pub ncol: usize,
    /// Surface rows.
    pub nrow: usize,
}

/// The caller-visible outcome of a bulk field export.
///
/// Bulk export is deliberately partial-failure tolerant: one realization's
/// failure never suppresses another's export.
#[derive(Debug, Default)]
pub struct ExportSummary {
    succeeded: Vec<usize>,
    failed: Vec<(usize, StorageError)>,
}

impl ExportSummary {
    /// Realizations exported successfully, in request order.
    #[must_use]
    pub fn succeeded(&self) -> &[usize] {
        &self.succeeded
    }

    /// Realizations that failed, with the failure, in request order.
    #[must_use]
    pub fn failed(&self) -> &[(usize, StorageError)] {
        &self.failed
    }

    /// The number of successful exports.
    #[must_use]
    pub fn num_succeeded(&self) -> usize {
        self.succeeded.len()
    }

    /// The number of failed exports.
    #[must_use]
    pub fn num_failed(&self) -> usize {
        self.failed.len()
    }

    /// Returns true if every requested realization was exported.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The ensemble storage engine for one mount point.
#[derive(Debug)]
pub struct Storage {
    mount_point: PathBuf,
    ensemble_size: usize,
    experiment_path: PathBuf,
    store: RealizationStore,
}

impl Storage {
    /// Open (or initialise) the ensemble state rooted at `mount_point` with a
    /// fixed realization-slot count.
    ///
    /// Creates the `experiment/` subtree and its identity file on first open.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if the experiment directory cannot be
    /// created.
    pub fn open(mount_point: impl Into<PathBuf>, ensemble_size: usize) -> Result<Self, StorageError> {
        let mount_point = mount_point.into();
        let experiment_path = mount_point.join("experiment");
        fs::create_dir_all(&experiment_path)?;
        let index_path = experiment_path.join(EXPERIMENT_INDEX_FILE);
        if !index_path.exists() {
            let name = mount_point
                .file_name()
                .map_or_else(|| "default".to_string(), |n| n.to_string_lossy().to_string());
            write_json(&index_path, &ExperimentIndex::new(name))?;
        }
        let store = RealizationStore::new(&mount_point);
        Ok(Self {
            mount_point,
            ensemble_size,
            experiment_path,
            store,
        })
    }

    /// The mount point directory.
    #[must_use]
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// The fixed realization-slot count.
    #[must_use]
    pub const fn ensemble_size(&self) -> usize {
        self.ensemble_size
    }

    /// The experiment subtree holding shared, write-once metadata.
    #[must_use]
    pub fn experiment_path(&self) -> &Path {
        &self.experiment_path
    }

    /// The experiment's canonical identity.
    ///
    /// # Errors
    /// Returns [`StorageError::KeyNotFound`] if the identity file is absent.
    pub fn experiment_index(&self) -> Result<ExperimentIndex, StorageError> {
        read_json(&self.experiment_path.join(EXPERIMENT_INDEX_FILE))?.ok_or_else(|| {
            StorageError::KeyNotFound {
                kind: DataKind::GenKw,
                key: EXPERIMENT_INDEX_FILE.to_string(),
            }
        })
    }

    fn check_realization(&self, iens: usize) -> Result<(), StorageError> {
        if iens < self.ensemble_size {
            Ok(())
        } else {
            Err(StorageError::RealizationOutOfRange {
                iens,
                ensemble_size: self.ensemble_size,
            })
        }
    }

    /// Returns true iff at least one keyword-vector parameter container
    /// exists. Used to short-circuit "nothing to sample" paths.
    #[must_use]
    pub fn has_parameters(&self) -> bool {
        self.store.shared_exists(DataKind::GenKw)
    }

    /// Save one keyword-vector parameter for a (possibly partial) set of
    /// realizations.
    ///
    /// `data` has shape `(sub_keys.len(), realizations.len())`; each column is
    /// scattered to its true realization index, and slots for unsupplied
    /// realizations are padded with NaN. The prior descriptors are merged into
    /// the shared priors file keyed by parameter name, never disturbing other
    /// parameters' entries.
    ///
    /// # Errors
    /// Returns [`StorageError::ShapeMismatch`] on a shape inconsistency,
    /// [`StorageError::RealizationOutOfRange`] for an index outside the
    /// ensemble, and [`StorageError::Io`] on write failure.
    pub fn save_gen_kw(
        &self,
        name: &str,
        sub_keys: &[String],
        priors: &[PriorDescriptor],
        realizations: &[usize],
        data: &Array2<f64>,
    ) -> Result<(), StorageError> {
        if data.shape() != [sub_keys.len(), realizations.len()] {
            return Err(StorageError::ShapeMismatch {
                expected: vec![sub_keys.len(), realizations.len()],
                actual: data.shape().to_vec(),
            });
        }
        let mut padded = Array2::from_elem((sub_keys.len(), self.ensemble_size), f64::NAN);
        for (column, &iens) in realizations.iter().enumerate() {
            self.check_realization(iens)?;
            padded
                .index_axis_mut(Axis(1), iens)
                .assign(&data.index_axis(Axis(1), column));
        }

        // Merge with any previously saved realizations of this parameter: a
        // padded slot never overwrites stored data.
        if let Ok(dataset) = self.store.read_shared(DataKind::GenKw) {
            if let Some(existing) = dataset.variable(name) {
                if let Ok(existing) = existing.values.view().into_dimensionality::<Ix2>() {
                    if existing.dim() == padded.dim() {
                        Zip::from(&mut padded).and(&existing).for_each(|new, &old| {
                            if new.is_nan() {
                                *new = old;
                            }
                        });
                    }
                }
            }
        }

        let variable = Variable::new(
            vec![
                Dimension::labelled(&format!("{name}_keys"), sub_keys.to_vec()),
                Dimension::ticked("iens", (0..self.ensemble_size as i64).collect()),
            ],
            padded.into_dyn(),
        )?;
        self.store.append_shared(DataKind::GenKw, name, variable)?;

        // Read-merge-write: the file is the single source of truth per call.
        let priors_path = self.mount_point.join(GEN_KW_PRIORS_FILE);
        let mut all_priors: BTreeMap<String, Vec<PriorDescriptor>> =
            read_json(&priors_path)?.unwrap_or_default();
        all_priors.insert(name.to_string(), priors.to_vec());
        write_json(&priors_path, &all_priors)
    }

    /// Load the full prior-descriptor mapping, keyed by parameter name.
    ///
    /// # Errors
    /// Returns [`StorageError::KeyNotFound`] if the priors file has never
    /// been written.
    pub fn load_gen_kw_priors(
        &self,
    ) -> Result<BTreeMap<String, Vec<PriorDescriptor>>, StorageError> {
        read_json(&self.mount_point.join(GEN_KW_PRIORS_FILE))?.ok_or_else(|| {
            StorageError::KeyNotFound {
                kind: DataKind::GenKw,
                key: GEN_KW_PRIORS_FILE.to_string(),
            }
        })
    }

    /// Load one realization's values for a keyword-vector parameter, together
    /// with the sub-key list in saved order.
    ///
    /// # Errors
    /// Returns a not-found error if the container, the key, or that
    /// realization slot is absent. A padded (all-NaN) slot counts as absent.
    /// A container variable without sub-key labels is reported as corrupt.
    pub fn load_gen_kw_realization(
        &self,
        key: &str,
        iens: usize,
    ) -> Result<(Array1<f64>, Vec<String>), StorageError> {
        let dataset = match self.store.read_shared(DataKind::GenKw) {
            Ok(dataset) => dataset,
            Err(e) if e.is_not_found() => {
                return Err(StorageError::KeyNotFound {
                    kind: DataKind::GenKw,
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(e),
        };
        let variable = dataset
            .variable(key)
            .ok_or_else(|| StorageError::KeyNotFound {
                kind: DataKind::GenKw,
                key: key.to_string(),
            })?;
        let values = variable
            .values
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| StorageError::ShapeMismatch {
                expected: vec![variable.dims.len(), 2],
                actual: variable.values.shape().to_vec(),
            })?;
        let not_found = || StorageError::RealizationNotFound {
            kind: DataKind::GenKw,
            key: key.to_string(),
            iens,
        };
        if iens >= values.ncols() {
            return Err(not_found());
        }
        let column = values.index_axis(Axis(1), iens).to_owned();
        if column.iter().all(|v| v.is_nan()) {
            // A padded slot: never computed, not "computed as NaN".
            return Err(not_found());
        }
        let sub_keys = variable.dims[0].labels.clone().ok_or_else(|| {
            StorageError::Other(format!(
                "corrupt parameter container: {key} has no sub-key labels"
            ))
        })?;
        Ok((column, sub_keys))
    }

    /// Save one realization's summary response: values indexed by
    /// (named quantity, time axis), with the realization's own time axis.
    ///
    /// # Errors
    /// Returns [`StorageError::ShapeMismatch`] if `data` is not
    /// `(keys.len(), time_axis.len())`, or [`StorageError::Io`] on write
    /// failure.
    pub fn save_summary_data(
        &self,
        data: &Array2<f64>,
        keys: &[String],
        time_axis: &[i64],
        iens: usize,
    ) -> Result<(), StorageError> {
        self.check_realization(iens)?;
        if data.shape() != [keys.len(), time_axis.len()] {
            return Err(StorageError::ShapeMismatch {
                expected: vec![keys.len(), time_axis.len()],
                actual: data.shape().to_vec(),
            });
        }
        let mut dataset = Dataset::new();
        dataset.insert(
            "values",
            Variable::new(
                vec![
                    Dimension::labelled("data_key", keys.to_vec()),
                    Dimension::ticked("time", time_axis.to_vec()),
                ],
                data.clone().into_dyn(),
            )?,
        );
        self.store.write_dataset(DataKind::Summary, iens, &dataset)
    }

    /// Load summary data for the requested keys across realizations, as the
    /// analysis dataframe shape.
    ///
    /// Realizations without a summary container are skipped. Time axes may
    /// legitimately differ per realization (e.g. restarted simulations); the
    /// first realization actually present supplies the reference axis, and the
    /// others are aligned by position with NaN for missing positions.
    ///
    /// # Errors
    /// Returns [`StorageError::KeyNotFound`] if no realization has a summary
    /// container, or if none of the requested keys exist in any loaded
    /// realization.
    pub fn load_summary_data_as_df(
        &self,
        keys: &[String],
        realizations: &[usize],
    ) -> Result<ResponseFrame, StorageError> {
        let mut loaded: Vec<(usize, Vec<String>, Vec<i64>, Array2<f64>)> = Vec::new();
        for &iens in realizations {
            let dataset = match self.store.read_dataset(DataKind::Summary, iens) {
                Ok(dataset) => dataset,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let (data_keys, time_axis, values) = summary_parts(&dataset)?;
            loaded.push((iens, data_keys, time_axis, values));
        }
        let not_found = || StorageError::KeyNotFound {
            kind: DataKind::Summary,
            key: keys.join(", "),
        };
        let Some((_, _, reference_axis, _)) = loaded.first() else {
            return Err(not_found());
        };
        let reference_axis = reference_axis.clone();

        let present: Vec<String> = keys
            .iter()
            .filter(|key| loaded.iter().any(|(_, ks, _, _)| ks.contains(key)))
            .cloned()
            .collect();
        if present.is_empty() {
            return Err(not_found());
        }

        let axis_len = reference_axis.len();
        let mut index = Vec::with_capacity(present.len() * axis_len);
        for key in &present {
            for &tick in &reference_axis {
                index.push((key.clone(), tick));
            }
        }
        let mut values = Array2::from_elem((index.len(), loaded.len()), f64::NAN);
        for (column, (_, data_keys, time_axis, data)) in loaded.iter().enumerate() {
            let common = axis_len.min(time_axis.len());
            for (key_index, key) in present.iter().enumerate() {
                let Some(row) = data_keys.iter().position(|k| k == key) else {
                    continue;
                };
                for position in 0..common {
                    values[[key_index * axis_len + position, column]] = data[[row, position]];
                }
            }
        }
        let columns = loaded.iter().map(|(iens, ..)| *iens).collect();
        ResponseFrame::new(index, columns, values)
    }

    /// Save one realization's gen-data response: named 1-D arrays of
    /// arbitrary, possibly varying, length.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] on write failure.
    pub fn save_gen_data(
        &self,
        data: &BTreeMap<String, Vec<f64>>,
        iens: usize,
    ) -> Result<(), StorageError> {
        self.check_realization(iens)?;
        let mut dataset = Dataset::new();
        for (name, values) in data {
            dataset.insert(
                name.clone(),
                Variable::new(
                    vec![Dimension::positional("index", values.len())],
                    Array1::from_vec(values.clone()).into_dyn(),
                )?,
            );
        }
        self.store.write_dataset(DataKind::GenData, iens, &dataset)
    }

    /// Load one gen-data key across realizations, stacking only realizations
    /// that actually have it. Returns the stacked array (row = position,
    /// column = realization) and the filtered realization list so callers can
    /// align column labels.
    ///
    /// # Errors
    /// Returns [`StorageError::KeyNotFound`] if zero realizations have the
    /// key, and [`StorageError::ShapeMismatch`] if stored lengths disagree.
    pub fn load_gen_data(
        &self,
        key: &str,
        realizations: &[usize],
    ) -> Result<(Array2<f64>, Vec<usize>), StorageError> {
        let mut columns: Vec<Array1<f64>> = Vec::new();
        let mut loaded: Vec<usize> = Vec::new();
        for &iens in realizations {
            let dataset = match self.store.read_dataset(DataKind::GenData, iens) {
                Ok(dataset) => dataset,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if let Some(variable) = dataset.variable(key) {
                columns.push(Array1::from_iter(variable.values.iter().copied()));
                loaded.push(iens);
            }
        }
        if columns.is_empty() {
            return Err(StorageError::KeyNotFound {
                kind: DataKind::GenData,
                key: key.to_string(),
            });
        }
        stack_columns(&columns).map(|stacked| (stacked, loaded))
    }

    /// Load several gen-data keys as one analysis dataframe, with the row
    /// axis (key, position) and columns aligned on the union of loaded
    /// realizations.
    ///
    /// # Errors
    /// Propagates [`StorageError::KeyNotFound`] from any requested key.
    pub fn load_gen_data_as_df(
        &self,
        keys: &[String],
        realizations: &[usize],
    ) -> Result<ResponseFrame, StorageError> {
        let mut frames = Vec::with_capacity(keys.len());
        for key in keys {
            let (data, loaded) = self.load_gen_data(key, realizations)?;
            let index = (0..data.nrows() as i64)
                .map(|position| (key.clone(), position))
                .collect();
            frames.push(ResponseFrame::new(index, loaded, data)?);
        }
        ResponseFrame::concat(&frames)
    }

    /// Record experiment-wide metadata for a field key and, at most once per
    /// experiment, copy in the shared grid-geometry file.
    ///
    /// Geometry is written once, ever: if the copied-in geometry file already
    /// exists the `grid_file` argument is ignored. The key's metadata is
    /// merged into the shared metadata file without disturbing other keys'
    /// entries, and repeated identical calls leave the file unchanged.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] on copy or write failure.
    pub fn save_field_info(
        &self,
        key: &str,
        grid_file: Option<&Path>,
        info: &FieldInfo,
    ) -> Result<(), StorageError> {
        fs::create_dir_all(&self.experiment_path)?;
        if let Some(grid_file) = grid_file {
            let target = self.experiment_path.join(FIELD_GEOMETRY_FILE);
            if !target.exists() {
                fs::copy(grid_file, target)?;
            }
        }
        let info_path = self.experiment_path.join(FIELD_INFO_FILE);
        let mut existing: BTreeMap<String, FieldInfo> = read_json(&info_path)?.unwrap_or_default();
        existing.insert(key.to_string(), info.clone());
        write_json(&info_path, &existing)
    }

    /// Save one realization's raw field values. No transform is applied at
    /// storage time.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if the realization directory cannot be
    /// created or the blob cannot be written.
    pub fn save_field_data(
        &self,
        name: &str,
        iens: usize,
        data: &Array3<f64>,
    ) -> Result<(), StorageError> {
        self.check_realization(iens)?;
        let flat: Vec<f64> = data.iter().copied().collect();
        self.store.write_blob(name, iens, &flat)
    }

    /// Load raw field values for the given realizations, stacked as
    /// (flat cell index, realization). No transform is applied.
    ///
    /// # Errors
    /// Returns [`StorageError::RealizationNotFound`] if any requested
    /// realization has no data for `key`.
    pub fn load_field(
        &self,
        key: &str,
        realizations: &[usize],
    ) -> Result<Array2<f64>, StorageError> {
        let columns = realizations
            .iter()
            .map(|&iens| self.store.read_blob(DataKind::Field, key, iens))
            .collect::<Result<Vec<_>, _>>()?;
        stack_columns(&columns)
    }

    /// Returns true if realization `iens` has raw data for field `key`.
    /// Never fails.
    #[must_use]
    pub fn field_has_data(&self, key: &str, iens: usize) -> bool {
        self.store.blob_exists(key, iens)
    }

    /// Returns true if experiment-wide metadata exists for field `key`.
    /// Never fails.
    #[must_use]
    pub fn field_has_info(&self, key: &str) -> bool {
        read_json::<BTreeMap<String, FieldInfo>>(&self.experiment_path.join(FIELD_INFO_FILE))
            .ok()
            .flatten()
            .is_some_and(|info| info.contains_key(key))
    }

    /// Record experiment-wide geometry metadata for a surface key.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] on write failure.
    pub fn save_surface_info(&self, key: &str, info: &SurfaceInfo) -> Result<(), StorageError> {
        fs::create_dir_all(&self.experiment_path)?;
        let info_path = self.experiment_path.join(SURFACE_INFO_FILE);
        let mut existing: BTreeMap<String, SurfaceInfo> =
            read_json(&info_path)?.unwrap_or_default();
        existing.insert(key.to_string(), info.clone());
        write_json(&info_path, &existing)
    }

    /// Save one realization's raw surface values.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] on write failure.
    pub fn save_surface_data(
        &self,
        name: &str,
        iens: usize,
        data: &Array2<f64>,
    ) -> Result<(), StorageError> {
        self.check_realization(iens)?;
        let flat: Vec<f64> = data.iter().copied().collect();
        self.store.write_blob(name, iens, &flat)
    }

    /// Load raw surface values for the given realizations, stacked as
    /// (flat cell index, realization).
    ///
    /// # Errors
    /// Returns [`StorageError::RealizationNotFound`] if any requested
    /// realization has no data for `key`.
    pub fn load_surface(
        &self,
        key: &str,
        realizations: &[usize],
    ) -> Result<Array2<f64>, StorageError> {
        let columns = realizations
            .iter()
            .map(|&iens| self.store.read_blob(DataKind::Surface, key, iens))
            .collect::<Result<Vec<_>, _>>()?;
        stack_columns(&columns)
    }

    /// Export one realization's field to a grid file: load raw values, apply
    /// the stored output transform, then the stored truncation, attach the
    /// shared geometry if present, and write in `format`.
    ///
    /// # Errors
    /// Returns a not-found error if the key's metadata or the realization's
    /// raw array is absent, and [`StorageError::Export`] if the geometry
    /// writer rejects the data.
    pub fn export_field(
        &self,
        key: &str,
        iens: usize,
        output_path: &Path,
        format: ExportFormat,
    ) -> Result<(), StorageError> {
        let info_path = self.experiment_path.join(FIELD_INFO_FILE);
        let info = read_json::<BTreeMap<String, FieldInfo>>(&info_path)?
            .and_then(|mut info| info.remove(key))
            .ok_or_else(|| StorageError::KeyNotFound {
                kind: DataKind::Field,
                key: key.to_string(),
            })?;

        let raw = self.store.read_blob(DataKind::Field, key, iens)?.into_dyn();
        let transformed = FieldTransform::from_name(&info.transform_out).transform(&raw);
        let truncation = Truncation::new(
            info.truncation_mode,
            info.truncation_min,
            info.truncation_max,
        );
        let truncated = truncation.truncate(&transformed);

        let mut property = GridProperty::new(
            key,
            info.nx,
            info.ny,
            info.nz,
            truncated.iter().copied().collect(),
        )?;
        let geometry_path = self.experiment_path.join(FIELD_GEOMETRY_FILE);
        if geometry_path.exists() {
            property.attach_geometry(&geometry_path)?;
        }
        property.to_file(output_path, format)?;
        Ok(())
    }

    /// Export a field for many realizations, continuing past per-realization
    /// failures. `output_pattern` must contain a `%d` placeholder for the
    /// realization index.
    ///
    /// Failures are logged and collected; the returned [`ExportSummary`]
    /// reports exactly which realizations succeeded and which failed. The
    /// loop runs in parallel when the global configuration allows it.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidPathPattern`] if the pattern lacks a
    /// placeholder. Per-realization failures do not abort the export.
    pub fn export_field_many(
        &self,
        key: &str,
        realizations: &[usize],
        output_pattern: &str,
        format: ExportFormat,
    ) -> Result<ExportSummary, StorageError> {
        if !output_pattern.contains("%d") {
            return Err(StorageError::InvalidPathPattern(output_pattern.to_string()));
        }
        let export_one = |&iens: &usize| {
            let path = PathBuf::from(output_pattern.replace("%d", &iens.to_string()));
            let result = self.export_field(key, iens, &path, format);
            (iens, path, result)
        };
        let outcomes: Vec<(usize, PathBuf, Result<(), StorageError>)> =
            if global_config().parallel_export() {
                realizations.par_iter().map(export_one).collect()
            } else {
                realizations.iter().map(export_one).collect()
            };

        let mut summary = ExportSummary::default();
        for (iens, path, result) in outcomes {
            match result {
                Ok(()) => {
                    debug!(key, iens, path = %path.display(), "exported field");
                    summary.succeeded.push(iens);
                }
                Err(error) => {
                    warn!(key, iens, %error, "field export failed");
                    summary.failed.push((iens, error));
                }
            }
        }
        Ok(summary)
    }
}

/// Extract (data keys, time axis, values) from a summary container.
fn summary_parts(dataset: &Dataset) -> Result<(Vec<String>, Vec<i64>, Array2<f64>), StorageError> {
    let corrupt = |what: &str| StorageError::Other(format!("corrupt summary container: {what}"));
    let variable = dataset
        .variable("values")
        .ok_or_else(|| corrupt("missing values variable"))?;
    let data_keys = variable.dims[0]
        .labels
        .clone()
        .ok_or_else(|| corrupt("missing data_key labels"))?;
    let time_axis = variable
        .dims
        .get(1)
        .and_then(|d| d.ticks.clone())
        .ok_or_else(|| corrupt("missing time axis"))?;
    let values = variable
        .values
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| corrupt("values are not 2-D"))?
        .to_owned();
    Ok((data_keys, time_axis, values))
}

/// Stack equal-length columns into (position, column) order.
fn stack_columns(columns: &[Array1<f64>]) -> Result<Array2<f64>, StorageError> {
    let rows = columns.first().map_or(0, |c| c.len());
    if let Some(mismatched) = columns.iter().find(|c| c.len() != rows) {
        return Err(StorageError::ShapeMismatch {
            expected: vec![rows],
            actual: vec![mismatched.len()],
        });
    }
    let mut stacked = Array2::zeros((rows, columns.len()));
    for (column, values) in columns.iter().enumerate() {
        stacked.index_axis_mut(Axis(1), column).assign(values);
    }
    Ok(stacked)
}

/// Read a JSON side-file: `None` if absent, an error if malformed.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::Io(e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StorageError::InvalidMetadata {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a JSON side-file, pretty-printed if the global configuration says so.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = if global_config().pretty_metadata() {
        serde_json::to_vec_pretty(value)
    } else {
        serde_json::to_vec(value)
    }
    .map_err(|source| StorageError::InvalidMetadata {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn open_creates_experiment_identity() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mount = tmp.path().join("ens-0");
        let storage = Storage::open(&mount, 4).unwrap();
        assert_eq!(storage.ensemble_size(), 4);
        let index = storage.experiment_index().unwrap();
        assert_eq!(index.name, "ens-0");
        // Reopening keeps the same identity.
        let reopened = Storage::open(&mount, 4).unwrap();
        assert_eq!(reopened.experiment_index().unwrap().id, index.id);
    }

    #[test]
    fn realization_bounds_are_enforced() {
        let tmp = tempfile::TempDir::new().unwrap();
        let storage = Storage::open(tmp.path().join("ens"), 2).unwrap();
        let err = storage
            .save_field_data("PORO", 2, &Array3::zeros((1, 1, 1)))
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::RealizationOutOfRange {
                iens: 2,
                ensemble_size: 2
            }
        ));
    }

    #[test]
    fn gen_kw_without_sub_key_labels_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let storage = Storage::open(tmp.path().join("ens"), 2).unwrap();
        // A container variable without a labelled key axis is corrupt, not an
        // empty parameter.
        let variable = Variable::new(
            vec![
                Dimension::positional("keys", 1),
                Dimension::ticked("iens", vec![0, 1]),
            ],
            array![[1.0, 2.0]].into_dyn(),
        )
        .unwrap();
        storage
            .store
            .append_shared(DataKind::GenKw, "PARAM", variable)
            .unwrap();
        let err = storage.load_gen_kw_realization("PARAM", 0).unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, StorageError::Other(_)));
    }

    #[test]
    fn gen_kw_shape_is_validated() {
        let tmp = tempfile::TempDir::new().unwrap();
        let storage = Storage::open(tmp.path().join("ens"), 2).unwrap();
        let err = storage
            .save_gen_kw(
                "PARAM",
                &["a".to_string()],
                &[],
                &[0, 1],
                &array![[1.0], [2.0]],
            )
            .unwrap_err();
        assert!(matches!(err, StorageError::ShapeMismatch { .. }));
    }
}
