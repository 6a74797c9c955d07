//! The on-disk container format for ensemble arrays.
//!
//! A [`Dataset`] holds named [`Variable`]s, each with named dimensions,
//! optional per-dimension coordinates, and an `f64` payload. On disk a dataset
//! is a single file: a fixed magic, a format version, a length-prefixed JSON
//! header describing every variable, then the concatenated little-endian `f64`
//! payloads in header order.
//!
//! The codec is pure: it maps datasets to and from byte buffers and knows
//! nothing about experiment structure, realizations, or file paths.

use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic bytes identifying an ensemble array container.
const MAGIC: &[u8; 4] = b"EARR";

/// Current container format version.
const FORMAT_VERSION: u32 = 1;

/// A named axis of a [`Variable`], optionally carrying coordinates.
///
/// String `labels` are used for key axes (e.g. parameter sub-keys) and integer
/// `ticks` for numeric axes (e.g. realization indices or a time axis). An axis
/// with neither is purely positional.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Dimension {
    /// Axis name.
    pub name: String,
    /// Axis length.
    pub len: usize,
    /// String coordinates, one per position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    /// Integer coordinates, one per position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticks: Option<Vec<i64>>,
}

impl Dimension {
    /// A purely positional axis.
    #[must_use]
    pub fn positional(name: &str, len: usize) -> Self {
        Self {
            name: name.to_string(),
            len,
            labels: None,
            ticks: None,
        }
    }

    /// An axis with string coordinates.
    #[must_use]
    pub fn labelled(name: &str, labels: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            len: labels.len(),
            labels: Some(labels),
            ticks: None,
        }
    }

    /// An axis with integer coordinates.
    #[must_use]
    pub fn ticked(name: &str, ticks: Vec<i64>) -> Self {
        Self {
            name: name.to_string(),
            len: ticks.len(),
            labels: None,
            ticks: Some(ticks),
        }
    }
}

/// An array with named, optionally labelled dimensions.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    /// The dimensions, outermost first.
    pub dims: Vec<Dimension>,
    /// The values, with one axis per dimension.
    pub values: ArrayD<f64>,
}

impl Variable {
    /// Create a variable, validating that `values` matches `dims`.
    ///
    /// # Errors
    /// Returns [`ContainerError::ShapeMismatch`] if the array shape does not
    /// match the dimension lengths, or if any coordinate list has the wrong
    /// length.
    pub fn new(dims: Vec<Dimension>, values: ArrayD<f64>) -> Result<Self, ContainerError> {
        let expected: Vec<usize> = dims.iter().map(|d| d.len).collect();
        let coords_consistent = dims.iter().all(|d| {
            d.labels.as_ref().map_or(true, |l| l.len() == d.len)
                && d.ticks.as_ref().map_or(true, |t| t.len() == d.len)
        });
        if values.shape() != expected.as_slice() || !coords_consistent {
            return Err(ContainerError::ShapeMismatch {
                expected,
                actual: values.shape().to_vec(),
            });
        }
        Ok(Self { dims, values })
    }

    /// The shape of the variable.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.values.shape().to_vec()
    }
}

/// A collection of named variables, the unit of container encoding.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    variables: BTreeMap<String, Variable>,
}

/// The JSON header of an encoded container.
#[derive(Deserialize, Serialize)]
struct Header {
    version: u32,
    variables: BTreeMap<String, HeaderVariable>,
}

#[derive(Deserialize, Serialize)]
struct HeaderVariable {
    dims: Vec<Dimension>,
    /// Offset of the payload in elements from the start of the payload block.
    offset: u64,
    /// Payload length in elements.
    len: u64,
}

impl Dataset {
    /// Create an empty dataset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the dataset has no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// The number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Insert a variable, replacing any existing variable with the same name.
    pub fn insert(&mut self, name: impl Into<String>, variable: Variable) {
        self.variables.insert(name.into(), variable);
    }

    /// Get a variable by name.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Iterate over variable names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Encode the dataset to container bytes.
    ///
    /// # Errors
    /// Returns a [`ContainerError`] if the header cannot be serialised.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ContainerError> {
        let mut payload: Vec<f64> = Vec::new();
        let mut header = Header {
            version: FORMAT_VERSION,
            variables: BTreeMap::new(),
        };
        for (name, variable) in &self.variables {
            let offset = payload.len() as u64;
            payload.extend(variable.values.iter().copied());
            header.variables.insert(
                name.clone(),
                HeaderVariable {
                    dims: variable.dims.clone(),
                    offset,
                    len: payload.len() as u64 - offset,
                },
            );
        }
        let header_bytes = serde_json::to_vec(&header)?;

        let mut bytes = Vec::with_capacity(16 + header_bytes.len() + payload.len() * 8);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&header_bytes);
        bytes.extend_from_slice(bytemuck::cast_slice(&payload));
        Ok(bytes)
    }

    /// Decode a dataset from container bytes.
    ///
    /// # Errors
    /// Returns a [`ContainerError`] if the magic, version, header, or payload
    /// lengths are invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ContainerError> {
        if bytes.len() < 16 {
            return Err(ContainerError::Truncated(bytes.len()));
        }
        if &bytes[0..4] != MAGIC {
            return Err(ContainerError::InvalidMagic);
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }
        let header_len = u64::from_le_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]);
        // The declared length is untrusted; a corrupt header must not overflow.
        let payload_start = usize::try_from(header_len)
            .ok()
            .and_then(|len| len.checked_add(16))
            .filter(|&start| start <= bytes.len())
            .ok_or(ContainerError::Truncated(bytes.len()))?;
        let header: Header = serde_json::from_slice(&bytes[16..payload_start])?;
        if header.version != FORMAT_VERSION {
            return Err(ContainerError::UnsupportedVersion(header.version));
        }
        if (bytes.len() - payload_start) % std::mem::size_of::<f64>() != 0 {
            return Err(ContainerError::Truncated(bytes.len()));
        }
        let payload: Vec<f64> = bytemuck::pod_collect_to_vec(&bytes[payload_start..]);

        let mut variables = BTreeMap::new();
        for (name, hv) in header.variables {
            let span = usize::try_from(hv.offset)
                .ok()
                .zip(usize::try_from(hv.len).ok())
                .and_then(|(start, len)| Some(start..start.checked_add(len)?))
                .filter(|span| span.end <= payload.len());
            let Some(span) = span else {
                return Err(ContainerError::PayloadOutOfBounds(name));
            };
            let (start, end) = (span.start, span.end);
            let shape: Vec<usize> = hv.dims.iter().map(|d| d.len).collect();
            let values = ArrayD::from_shape_vec(IxDyn(&shape), payload[start..end].to_vec())
                .map_err(|_| ContainerError::ShapeMismatch {
                    expected: shape.clone(),
                    actual: vec![hv.len as usize],
                })?;
            variables.insert(name, Variable::new(hv.dims, values)?);
        }
        Ok(Self { variables })
    }
}

/// Magic bytes identifying a flat field blob.
const BLOB_MAGIC: &[u8; 4] = b"ENSB";

/// Encode a flat `f64` blob, the storage format for field and surface grids.
#[must_use]
pub fn encode_blob(values: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16 + values.len() * 8);
    bytes.extend_from_slice(BLOB_MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(values.len() as u64).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(values));
    bytes
}

/// Decode a flat `f64` blob.
///
/// # Errors
/// Returns a [`ContainerError`] if the magic or version is invalid or the
/// payload does not hold exactly the declared element count.
pub fn decode_blob(bytes: &[u8]) -> Result<Vec<f64>, ContainerError> {
    if bytes.len() < 16 {
        return Err(ContainerError::Truncated(bytes.len()));
    }
    if &bytes[0..4] != BLOB_MAGIC {
        return Err(ContainerError::InvalidMagic);
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(ContainerError::UnsupportedVersion(version));
    }
    let len = u64::from_le_bytes([
        bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    ]);
    // The declared count is untrusted; a corrupt header must not overflow.
    let expected = usize::try_from(len)
        .ok()
        .and_then(|n| n.checked_mul(std::mem::size_of::<f64>()))
        .and_then(|n| n.checked_add(16));
    if expected != Some(bytes.len()) {
        return Err(ContainerError::Truncated(bytes.len()));
    }
    Ok(bytemuck::pod_collect_to_vec(&bytes[16..]))
}

/// An error encoding or decoding an ensemble array container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The buffer is too short to hold a container.
    #[error("container truncated at {0} bytes")]
    Truncated(usize),
    /// The buffer does not start with the container magic.
    #[error("invalid container magic")]
    InvalidMagic,
    /// The container was written with an unsupported format version.
    #[error("unsupported container format version {0}")]
    UnsupportedVersion(u32),
    /// The JSON header is malformed.
    #[error("invalid container header: {0}")]
    InvalidHeader(#[from] serde_json::Error),
    /// An array shape does not match its declared dimensions.
    #[error("array shape {actual:?} does not match dimensions {expected:?}")]
    ShapeMismatch {
        /// Lengths declared by the dimensions.
        expected: Vec<usize>,
        /// Actual array shape.
        actual: Vec<usize>,
    },
    /// A variable's payload extends beyond the end of the container.
    #[error("payload for variable {0} extends beyond the container end")]
    PayloadOutOfBounds(String),
}
