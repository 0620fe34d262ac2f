//! Pluggable registry for structured observable types.
//!
//! Scalars are a closed set known to [`ScalarKind`](super::ScalarKind).
//! Everything else (vectors, user structs) is looked up here by type name.
//! The table never needs to know the concrete Rust type: it only calls the
//! function pointers stored in a [`StructuredCodec`].

use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Type-erased constructor / cloner / renderer for one structured type.
pub struct StructuredCodec {
    type_name: String,
    create: fn() -> Box<dyn Any + Send>,
    clone: fn(&dyn Any) -> Option<Box<dyn Any + Send>>,
    to_json: fn(&dyn Any) -> serde_json::Value,
}

impl std::fmt::Debug for StructuredCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredCodec")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl StructuredCodec {
    /// Build the codec for `T`.
    pub fn of<T>(type_name: impl Into<String>) -> Self
    where
        T: Default + Clone + Serialize + Send + 'static,
    {
        Self {
            type_name: type_name.into(),
            create: create_default::<T>,
            clone: clone_value::<T>,
            to_json: value_to_json::<T>,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Fresh default-valued instance.
    pub fn create(&self) -> Box<dyn Any + Send> {
        (self.create)()
    }

    /// Deep copy. `None` if `value` is not of this codec's type.
    pub fn clone_value(&self, value: &dyn Any) -> Option<Box<dyn Any + Send>> {
        (self.clone)(value)
    }

    /// Render for row export. `Null` if `value` is not of this codec's type.
    pub fn to_json(&self, value: &dyn Any) -> serde_json::Value {
        (self.to_json)(value)
    }
}

fn create_default<T: Default + Send + 'static>() -> Box<dyn Any + Send> {
    Box::new(T::default())
}

fn clone_value<T: Clone + Send + 'static>(value: &dyn Any) -> Option<Box<dyn Any + Send>> {
    value
        .downcast_ref::<T>()
        .map(|v| Box::new(v.clone()) as Box<dyn Any + Send>)
}

fn value_to_json<T: Serialize + 'static>(value: &dyn Any) -> serde_json::Value {
    value
        .downcast_ref::<T>()
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or(serde_json::Value::Null)
}

/// Name → codec map for structured observable types.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    codecs: HashMap<String, Arc<StructuredCodec>>,
}

impl TypeRegistry {
    /// An empty registry (scalars only).
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Registry pre-populated with the vector types every stage may use.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<Vec<f64>>("vector<double>");
        registry.register::<Vec<i32>>("vector<int>");
        registry.register::<Vec<f32>>("vector<float>");
        registry
    }

    /// Register `T` under `name`. Re-registering a name replaces its codec.
    pub fn register<T>(&mut self, name: &str)
    where
        T: Default + Clone + Serialize + Send + 'static,
    {
        if self.codecs.contains_key(name) {
            tracing::debug!("Replacing structured type codec '{}'", name);
        }
        self.codecs
            .insert(name.to_string(), Arc::new(StructuredCodec::of::<T>(name)));
    }

    pub fn codec(&self, name: &str) -> Option<Arc<StructuredCodec>> {
        self.codecs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.codecs.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
