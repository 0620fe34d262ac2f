//! Columnar observable table with a growable, lockable schema.
//!
//! Each worker owns one [`ObservableTable`]. Stages register their
//! observables while the table is unlocked; once the worker has resolved its
//! chain it calls [`ObservableTable::lock`] and from then on only values
//! change. Every event the current values plus the event-scope fields are
//! snapshotted into a [`TableRow`] for the runner.
//!
//! # Invariants
//!
//! - The number of observables never decreases.
//! - An index, once assigned, never changes and never moves to another name.
//! - No two observables share a name.
//! - Re-registering a name with a different type while unlocked replaces the
//!   cell in place (same index, value reset). That is lossy and logged, not
//!   an error.

use crate::error::{EngineError, Result};
use crate::event::{Event, EventHeader};
use crate::observable::cell::{CellType, ObservableType, TypedCell};
use crate::observable::id::ObservableId;
use crate::observable::registry::TypeRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Schema entry for one observable.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservableInfo {
    pub name: String,
    pub ty: ObservableType,
    pub description: String,
}

/// Snapshot of one event's table row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(flatten)]
    pub event: EventHeader,
    pub observables: BTreeMap<String, serde_json::Value>,
}

impl TableRow {
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.observables.get(name)
    }

    /// Numeric value of `name`, if present and numeric.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.observables.get(name).and_then(|v| v.as_f64())
    }
}

/// Per-worker observable storage.
pub struct ObservableTable {
    name: String,
    registry: Arc<TypeRegistry>,
    infos: Vec<ObservableInfo>,
    cells: Vec<TypedCell>,
    index: HashMap<String, ObservableId>,
    event: EventHeader,
    locked: bool,
}

impl ObservableTable {
    pub fn new(name: impl Into<String>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            name: name.into(),
            registry,
            infos: Vec::new(),
            cells: Vec::new(),
            index: HashMap::new(),
            event: EventHeader::default(),
            locked: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    // ── Schema ──

    /// Register `name` with a configuration type name.
    ///
    /// Returns the observable's index, or [`ObservableId::INVALID`] if the
    /// type name is unknown or the table is locked and `name` is new.
    pub fn add_observable(&mut self, name: &str, type_name: &str, description: &str) -> ObservableId {
        match ObservableType::resolve(type_name, &self.registry) {
            Some(ty) => self.add_observable_typed(name, ty, description),
            None => {
                tracing::error!(
                    "Cannot add observable '{}' to {}: type '{}' not found",
                    name,
                    self.name,
                    type_name
                );
                ObservableId::INVALID
            }
        }
    }

    /// Register `name` with an already resolved type.
    pub fn add_observable_typed(
        &mut self,
        name: &str,
        ty: ObservableType,
        description: &str,
    ) -> ObservableId {
        if let Some(&id) = self.index.get(name) {
            let info = &mut self.infos[id.index()];
            if info.ty != ty {
                if self.locked {
                    tracing::warn!(
                        "Observable '{}' is {} but was re-registered as {} after lock; keeping {}",
                        name,
                        info.ty,
                        ty,
                        info.ty
                    );
                } else {
                    match TypedCell::new(name, ty.clone(), &self.registry) {
                        Some(cell) => {
                            tracing::warn!(
                                "Observable '{}' changes type {} -> {}, current value dropped",
                                name,
                                info.ty,
                                ty
                            );
                            self.cells[id.index()] = cell;
                            info.ty = ty;
                            if !description.is_empty() {
                                info.description = description.to_string();
                            }
                        }
                        None => {
                            tracing::error!("Cannot migrate observable '{}': type {} not found", name, ty);
                        }
                    }
                }
            }
            return id;
        }

        if self.locked {
            tracing::debug!("Observable table {} is locked, '{}' not added", self.name, name);
            return ObservableId::INVALID;
        }

        let Some(cell) = TypedCell::new(name, ty.clone(), &self.registry) else {
            tracing::error!("Cannot add observable '{}': type {} not found", name, ty);
            return ObservableId::INVALID;
        };

        let id = ObservableId(self.cells.len() as u32);
        self.cells.push(cell);
        self.infos.push(ObservableInfo {
            name: name.to_string(),
            ty,
            description: description.to_string(),
        });
        self.index.insert(name.to_string(), id);
        id
    }

    /// Freeze the schema. Values stay writable.
    pub fn lock(&mut self) {
        if !self.locked {
            tracing::debug!(
                "Observable table {} locked with {} observables",
                self.name,
                self.infos.len()
            );
        }
        self.locked = true;
    }

    /// Drop every observable and unlock. The table can be rebuilt afterwards.
    pub fn clear(&mut self) {
        self.infos.clear();
        self.cells.clear();
        self.index.clear();
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Index of `name`, or [`ObservableId::INVALID`].
    pub fn observable_id(&self, name: &str) -> ObservableId {
        self.index.get(name).copied().unwrap_or(ObservableId::INVALID)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn info(&self, id: ObservableId) -> Option<&ObservableInfo> {
        self.infos.get(id.index())
    }

    pub fn observables(&self) -> &[ObservableInfo] {
        &self.infos
    }

    pub fn observable_type(&self, name: &str) -> Option<&ObservableType> {
        self.index
            .get(name)
            .map(|id| &self.infos[id.index()].ty)
    }

    pub fn cell(&self, id: ObservableId) -> Option<&TypedCell> {
        self.cells.get(id.index())
    }

    fn cell_mut(&mut self, id: ObservableId) -> Result<&mut TypedCell> {
        self.cells
            .get_mut(id.index())
            .ok_or_else(|| EngineError::UnknownObservable(format!("{:?}", id)))
    }

    // ── Values ──

    /// Write `value` into observable `id`. A mismatch is logged and leaves the
    /// cell unchanged.
    pub fn set_value<T: CellType>(&mut self, id: ObservableId, value: T) -> Result<()> {
        let result = self.cell_mut(id).and_then(|cell| cell.set(value));
        if let Err(e) = &result {
            tracing::warn!("{}: {}", self.name, e);
        }
        result
    }

    /// Write by name. On an unlocked table an unknown name is registered
    /// first, with `T`'s type.
    pub fn set_value_by_name<T: CellType>(&mut self, name: &str, value: T) -> Result<ObservableId> {
        let mut id = self.observable_id(name);
        if !id.is_valid() {
            if self.locked {
                return Err(EngineError::TableLocked(name.to_string()));
            }
            id = self.add_observable_typed(name, T::observable_type(), "");
            if !id.is_valid() {
                return Err(EngineError::UnknownType(T::observable_type().to_string()));
            }
        }
        self.set_value(id, value)?;
        Ok(id)
    }

    /// Read observable `id` as `T`.
    pub fn value<T: CellType>(&self, id: ObservableId) -> Result<T> {
        self.cells
            .get(id.index())
            .ok_or_else(|| EngineError::UnknownObservable(format!("{:?}", id)))?
            .get()
    }

    pub fn value_by_name<T: CellType>(&self, name: &str) -> Result<T> {
        let id = self.observable_id(name);
        if !id.is_valid() {
            return Err(EngineError::UnknownObservable(name.to_string()));
        }
        self.value(id)
    }

    /// Read observable `id`, logging and falling back to `T::default()` on
    /// any failure.
    pub fn value_or_default<T: CellType + Default>(&self, id: ObservableId) -> T {
        self.value(id).unwrap_or_else(|e| {
            tracing::warn!("{}: {}", self.name, e);
            T::default()
        })
    }

    /// Numeric view of observable `name`, for cuts.
    pub fn numeric_value(&self, name: &str) -> Option<f64> {
        self.index
            .get(name)
            .and_then(|id| self.cells[id.index()].as_f64())
    }

    /// Copy a type-erased value into observable `id`.
    pub fn assign(&mut self, id: ObservableId, source: &TypedCell) -> Result<()> {
        self.cell_mut(id)?.assign(source)
    }

    // ── Event-scope fields ──

    pub fn event_info(&self) -> &EventHeader {
        &self.event
    }

    /// Copy the event-scope fields of `event` into the table.
    pub fn set_event_info(&mut self, event: &dyn Event) {
        self.event.clone_from(event.header());
    }

    /// Copy the table's event-scope fields into `event`.
    pub fn fill_event(&self, event: &mut dyn Event) {
        event.header_mut().clone_from(&self.event);
    }

    /// Snapshot the current row.
    pub fn row(&self) -> TableRow {
        TableRow {
            event: self.event.clone(),
            observables: self
                .cells
                .iter()
                .map(|cell| (cell.name().to_string(), cell.to_json()))
                .collect(),
        }
    }

    /// Dump the current row to the log. Workers call this per event at
    /// `extreme` verbosity.
    pub fn log_observables(&self) {
        tracing::info!(
            "{} | event {} (sub {}) t={} tag='{}'",
            self.name,
            self.event.id,
            self.event.sub_id,
            self.event.timestamp,
            self.event.sub_event_tag
        );
        for cell in &self.cells {
            tracing::info!("  {:<45} {}", cell.name(), cell.to_json());
        }
    }
}

impl std::fmt::Debug for ObservableTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableTable")
            .field("name", &self.name)
            .field("observables", &self.infos.len())
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SampleEvent;

    fn table() -> ObservableTable {
        ObservableTable::new("test", Arc::new(TypeRegistry::with_defaults()))
    }

    #[test]
    fn test_add_assigns_indices_in_order() {
        let mut t = table();
        assert_eq!(t.add_observable("a", "double", ""), ObservableId(0));
        assert_eq!(t.add_observable("b", "int", ""), ObservableId(1));
        assert_eq!(t.add_observable("a", "double", ""), ObservableId(0));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_retype_while_unlocked() {
        let mut t = table();
        let id = t.add_observable("x", "double", "first");
        t.set_value(id, 3.0f64).unwrap();

        let again = t.add_observable("x", "int", "second");
        assert_eq!(again, id);
        assert_eq!(t.len(), 1);
        assert_eq!(t.observable_type("x"), Some(&ObservableType::Scalar(crate::observable::ScalarKind::Int)));
        assert_eq!(t.value::<i32>(id).unwrap(), 0);
        assert_eq!(t.info(id).unwrap().description, "second");
    }

    #[test]
    fn test_clear_releases_schema() {
        let mut t = table();
        t.add_observable("x", "double", "");
        t.lock();
        t.clear();
        assert!(t.is_empty());
        assert!(!t.is_locked());
        assert!(!t.contains("x"));
        assert_eq!(t.add_observable("y", "int", ""), ObservableId(0));
    }

    #[test]
    fn test_locked_table_refuses_new_names() {
        let mut t = table();
        let id = t.add_observable("x", "double", "");
        t.lock();

        assert_eq!(t.add_observable("y", "double", ""), ObservableId::INVALID);
        assert_eq!(t.len(), 1);
        // Existing names still resolve, and keep their type.
        assert_eq!(t.add_observable("x", "int", ""), id);
        assert_eq!(t.observable_type("x").unwrap().type_name(), "double");
    }

    #[test]
    fn test_unknown_type() {
        let mut t = table();
        assert_eq!(t.add_observable("h", "TH1D", ""), ObservableId::INVALID);
        assert!(t.is_empty());
    }

    #[test]
    fn test_set_by_name_grows_schema() {
        let mut t = table();
        let id = t.set_value_by_name("n_hits", 4i32).unwrap();
        assert_eq!(t.value_by_name::<i32>("n_hits").unwrap(), 4);
        assert_eq!(t.observable_type("n_hits").unwrap().type_name(), "int");

        t.lock();
        assert_eq!(t.set_value_by_name("n_hits", 5i32).unwrap(), id);
        assert!(matches!(
            t.set_value_by_name("late", 1.0f64),
            Err(EngineError::TableLocked(_))
        ));
    }

    #[test]
    fn test_mismatched_read_defaults() {
        let mut t = table();
        let id = t.add_observable("x", "double", "");
        t.set_value(id, 2.5f64).unwrap();
        assert!(t.set_value(id, 1i32).is_err());
        assert_eq!(t.value_or_default::<i32>(id), 0);
        assert_eq!(t.value::<f64>(id).unwrap(), 2.5);
        assert!(t.value::<f64>(ObservableId(7)).is_err());
    }

    #[test]
    fn test_event_info_round_trip() {
        let mut t = table();
        let mut event = SampleEvent::default().with_id(12);
        event.header.run_origin = 101;
        event.header.sub_event_tag = "cal".to_string();
        t.set_event_info(&event);
        assert_eq!(t.event_info().id, 12);

        let mut out = SampleEvent::default();
        t.fill_event(&mut out);
        assert_eq!(out.header, event.header);
    }

    #[test]
    fn test_row_snapshot() {
        let mut t = table();
        let a = t.add_observable("a", "double", "");
        let v = t.add_observable("v", "vector<int>", "");
        t.set_value(a, 1.5f64).unwrap();
        t.set_value(v, vec![1, 2]).unwrap();
        t.set_event_info(&SampleEvent::default().with_id(3));

        let row = t.row();
        assert_eq!(row.event.id, 3);
        assert_eq!(row.get_f64("a"), Some(1.5));
        assert_eq!(row.get("v"), Some(&serde_json::json!([1, 2])));

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["observables"]["a"], 1.5);
    }

    #[test]
    fn test_assign_from_cell() {
        let mut t = table();
        let id = t.add_observable("x", "double", "");
        let mut source = TypedCell::scalar("src", crate::observable::ScalarKind::Double);
        source.set(8.0f64).unwrap();
        t.assign(id, &source).unwrap();
        assert_eq!(t.numeric_value("x"), Some(8.0));
    }
}
