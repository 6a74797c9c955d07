//! An ensemble storage engine for simulation studies.
//!
//! `enstore` persists and retrieves the numerical state of an ensemble-based
//! simulation study: per-realization parameter values (sampled inputs) and
//! response values (simulation outputs). It gives every other subsystem
//! (sampling, forward-model execution, statistical update, plotting, export)
//! a stable, crash-tolerant view of what data exists for realization *i* and
//! key *k*.
//!
//! ## Getting Started
//! - [`ensemble::Storage`] is the facade every consumer goes through; open it
//!   over a mount point and a fixed ensemble size.
//! - [`migration::migrate`] upgrades an older storage root before the facade
//!   is used against it.
//!
//! ## Example
//! ```rust,no_run
//! let storage = enstore::ensemble::Storage::open("/path/to/ensemble", 100)?;
//! let (values, sub_keys) = storage.load_gen_kw_realization("PARAM", 3)?;
//! # Ok::<(), enstore::realization::StorageError>(())
//! ```
//!
//! ## Data kinds
//! Five physical data shapes live under one `(kind, key, realization)`
//! addressing scheme: keyword-vector parameters, 3-D field parameters, 2-D
//! surface parameters, summary (time-series) responses, and gen-data
//! (variable-length series) responses. See [`realization::DataKind`].
//!
//! ## Concurrency model
//! One process owns write access to a mount point at a time; the engine does
//! no locking of its own. Readers may run concurrently with each other. Every
//! file is opened, used, and closed within the scope of a single operation.

#![warn(unused_variables)]
#![warn(dead_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::missing_panics_doc)]

pub mod config;
pub mod container;
pub mod ensemble;
pub mod frame;
pub mod geometry;
pub mod migration;
pub mod realization;
pub mod transform;

pub use ensemble::{ExportSummary, FieldInfo, PriorDescriptor, Storage, SurfaceInfo};
pub use frame::ResponseFrame;
pub use geometry::ExportFormat;
pub use realization::{DataKind, StorageError};
