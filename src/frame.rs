//! The tabular shape handed to analysis and plotting consumers.
//!
//! A [`ResponseFrame`] is the dataframe-ready view of loaded response data:
//! one row per (data key, axis coordinate) pair, one column per realization
//! id. Cells with no loaded value are NaN.

use itertools::Itertools;
use ndarray::{Array2, ArrayView1, Axis};

use crate::realization::StorageError;

/// A (key, axis) by realization table of loaded values.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseFrame {
    index: Vec<(String, i64)>,
    columns: Vec<usize>,
    values: Array2<f64>,
}

impl ResponseFrame {
    /// Create a frame from its parts.
    ///
    /// # Errors
    /// Returns [`StorageError::ShapeMismatch`] if `values` is not
    /// `index.len()` by `columns.len()`.
    pub fn new(
        index: Vec<(String, i64)>,
        columns: Vec<usize>,
        values: Array2<f64>,
    ) -> Result<Self, StorageError> {
        if values.shape() != [index.len(), columns.len()] {
            return Err(StorageError::ShapeMismatch {
                expected: vec![index.len(), columns.len()],
                actual: values.shape().to_vec(),
            });
        }
        Ok(Self {
            index,
            columns,
            values,
        })
    }

    /// The row index: (data key, axis coordinate) pairs.
    #[must_use]
    pub fn index(&self) -> &[(String, i64)] {
        &self.index
    }

    /// The column labels: realization ids.
    #[must_use]
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// The values, rows by columns.
    #[must_use]
    pub const fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// The number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the frame has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Look up one cell by key, axis coordinate, and realization id.
    #[must_use]
    pub fn get(&self, key: &str, axis: i64, iens: usize) -> Option<f64> {
        let row = self
            .index
            .iter()
            .position(|(k, a)| k == key && *a == axis)?;
        let col = self.columns.iter().position(|&c| c == iens)?;
        Some(self.values[[row, col]])
    }

    /// The column for realization `iens`, if present.
    #[must_use]
    pub fn column(&self, iens: usize) -> Option<ArrayView1<'_, f64>> {
        let col = self.columns.iter().position(|&c| c == iens)?;
        Some(self.values.index_axis(Axis(1), col))
    }

    /// Concatenate frames row-wise, aligning columns on the union of their
    /// realization ids. Cells a frame has no column for are NaN.
    ///
    /// # Errors
    /// Propagates [`StorageError::ShapeMismatch`] from frame construction;
    /// with well-formed inputs this cannot occur.
    pub fn concat(frames: &[Self]) -> Result<Self, StorageError> {
        let columns: Vec<usize> = frames
            .iter()
            .flat_map(|f| f.columns.iter().copied())
            .sorted_unstable()
            .dedup()
            .collect();
        let num_rows = frames.iter().map(ResponseFrame::num_rows).sum();
        let mut index = Vec::with_capacity(num_rows);
        let mut values = Array2::from_elem((num_rows, columns.len()), f64::NAN);
        let mut row_offset = 0;
        for frame in frames {
            index.extend(frame.index.iter().cloned());
            for (src_col, &iens) in frame.columns.iter().enumerate() {
                // Columns are sorted, so the lookup always succeeds.
                if let Ok(dst_col) = columns.binary_search(&iens) {
                    for src_row in 0..frame.num_rows() {
                        values[[row_offset + src_row, dst_col]] = frame.values[[src_row, src_col]];
                    }
                }
            }
            row_offset += frame.num_rows();
        }
        Self::new(index, columns, values)
    }
}
