//! The grid-geometry seam used by field export.
//!
//! The engine treats grid geometry as an external concern: the copied-in
//! geometry file is an opaque blob, and exported field values are handed to a
//! [`GridProperty`] writer tagged with the grid dimensions. The writer
//! enforces the value contract (finite values, matching cell count) and
//! surfaces violations as [`ExportError`], the per-realization failure class
//! that bulk export logs and skips.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use derive_more::Display;
use thiserror::Error;

/// A grid file format accepted by [`GridProperty::to_file`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ExportFormat {
    /// ASCII keyword format: the property name, whitespace-separated values,
    /// a terminating slash.
    #[display("grdecl")]
    Grdecl,
    /// Flat binary layout: length-prefixed name, cell count, little-endian
    /// `f64` payload.
    #[display("bgrdecl")]
    Bgrdecl,
}

/// One named property over an `ncol x nrow x nlay` grid, ready for export.
#[derive(Debug)]
pub struct GridProperty {
    name: String,
    ncol: usize,
    nrow: usize,
    nlay: usize,
    values: Vec<f64>,
    geometry: Option<PathBuf>,
}

impl GridProperty {
    /// Create a grid property, validating the value contract.
    ///
    /// # Errors
    /// Returns [`ExportError::CellCountMismatch`] if `values` does not hold
    /// exactly `ncol * nrow * nlay` elements, or
    /// [`ExportError::NonFiniteValue`] if any value is NaN or infinite.
    pub fn new(
        name: &str,
        ncol: usize,
        nrow: usize,
        nlay: usize,
        values: Vec<f64>,
    ) -> Result<Self, ExportError> {
        let cells = ncol * nrow * nlay;
        if values.len() != cells {
            return Err(ExportError::CellCountMismatch {
                name: name.to_string(),
                cells,
                values: values.len(),
            });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(ExportError::NonFiniteValue {
                name: name.to_string(),
                index,
            });
        }
        Ok(Self {
            name: name.to_string(),
            ncol,
            nrow,
            nlay,
            values,
            geometry: None,
        })
    }

    /// Attach the shared grid-geometry file.
    ///
    /// The file content is opaque to the engine; attachment only verifies
    /// that the file exists and is non-empty, mirroring what loading it
    /// through the external geometry library would reject.
    ///
    /// # Errors
    /// Returns [`ExportError::InvalidGeometry`] if the file is missing or
    /// empty.
    pub fn attach_geometry(&mut self, path: &Path) -> Result<(), ExportError> {
        let valid = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        if !valid {
            return Err(ExportError::InvalidGeometry(path.to_path_buf()));
        }
        self.geometry = Some(path.to_path_buf());
        Ok(())
    }

    /// The grid dimensions `(ncol, nrow, nlay)`.
    #[must_use]
    pub const fn dimensions(&self) -> (usize, usize, usize) {
        (self.ncol, self.nrow, self.nlay)
    }

    /// The attached geometry file, if any.
    #[must_use]
    pub fn geometry(&self) -> Option<&Path> {
        self.geometry.as_deref()
    }

    /// Write the property to `path` in `format`, creating parent directories.
    ///
    /// # Errors
    /// Returns [`ExportError::Io`] on any write failure.
    pub fn to_file(&self, path: &Path, format: ExportFormat) -> Result<(), ExportError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = std::io::BufWriter::new(fs::File::create(path)?);
        match format {
            ExportFormat::Grdecl => {
                writeln!(out, "{}", self.name)?;
                for row in self.values.chunks(6) {
                    let line = row
                        .iter()
                        .map(|v| format!("{v:.6}"))
                        .collect::<Vec<_>>()
                        .join(" ");
                    writeln!(out, " {line}")?;
                }
                writeln!(out, "/")?;
            }
            ExportFormat::Bgrdecl => {
                out.write_all(&(self.name.len() as u32).to_le_bytes())?;
                out.write_all(self.name.as_bytes())?;
                out.write_all(&(self.values.len() as u64).to_le_bytes())?;
                out.write_all(bytemuck::cast_slice(&self.values))?;
            }
        }
        out.flush()?;
        Ok(())
    }
}

/// An error exporting a grid property.
///
/// These are per-realization failures: bulk export records them and carries
/// on with the remaining realizations.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The value array does not match the grid cell count.
    #[error("property {name} has {values} values for a grid of {cells} cells")]
    CellCountMismatch {
        /// Property name.
        name: String,
        /// Expected cell count.
        cells: usize,
        /// Actual value count.
        values: usize,
    },
    /// A NaN or infinite value, which no grid file format accepts.
    #[error("property {name} has a non-finite value at index {index}")]
    NonFiniteValue {
        /// Property name.
        name: String,
        /// Flat index of the first offending value.
        index: usize,
    },
    /// The shared geometry file is missing or empty.
    #[error("invalid grid geometry file {0}")]
    InvalidGeometry(PathBuf),
    /// A write failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grdecl_layout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("out/PORO.grdecl");
        let prop = GridProperty::new("PORO", 2, 2, 2, vec![0.25; 8]).unwrap();
        prop.to_file(&path, ExportFormat::Grdecl).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "PORO");
        assert_eq!(lines.last(), Some(&"/"));
        // 8 values, 6 per line.
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn non_finite_rejected() {
        let err = GridProperty::new("PORO", 1, 1, 3, vec![0.1, f64::NAN, 0.3]).unwrap_err();
        assert!(matches!(
            err,
            ExportError::NonFiniteValue { index: 1, .. }
        ));
    }

    #[test]
    fn cell_count_mismatch_rejected() {
        let err = GridProperty::new("PORO", 2, 2, 2, vec![0.1; 7]).unwrap_err();
        assert!(matches!(err, ExportError::CellCountMismatch { .. }));
    }

    #[test]
    fn geometry_must_be_non_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let geometry = tmp.path().join("grid.egrid");
        let mut prop = GridProperty::new("PORO", 1, 1, 1, vec![1.0]).unwrap();
        assert!(prop.attach_geometry(&geometry).is_err());
        fs::write(&geometry, b"geometry blob").unwrap();
        prop.attach_geometry(&geometry).unwrap();
        assert_eq!(prop.geometry(), Some(geometry.as_path()));
    }
}
