//! Observables: named, typed per-event measurements.
//!
//! # Main Types
//!
//! - [`TypedCell`] - one observable's current value behind a run-time type tag
//! - [`ObservableType`] / [`ScalarKind`] - the declared type of a cell
//! - [`TypeRegistry`] - codecs for structured (non-scalar) types
//! - [`ObservableTable`] - the per-worker table of cells plus event-scope fields
//! - [`TableRow`] - serializable snapshot of one event's row

pub mod cell;
pub mod id;
pub mod registry;
pub mod table;

pub use cell::{CellType, CellValue, ObservableType, ScalarKind, StructuredValue, TypedCell};
pub use id::{ObservableId, WorkerId};
pub use registry::{StructuredCodec, TypeRegistry};
pub use table::{ObservableInfo, ObservableTable, TableRow};
