//! Type-erased value holder for a single observable.
//!
//! A [`TypedCell`] knows its declared [`ObservableType`] at run time and
//! refuses reads and writes through any other Rust type. Scalars are stored
//! inline in [`CellValue`]; structured values are boxed and managed through
//! the [`StructuredCodec`] they were created from.
//!
//! # Typed access
//!
//! Rust types opt into typed access by implementing [`CellType`]. All scalar
//! kinds and the default vector types are covered here; user types registered
//! in a [`TypeRegistry`] get an implementation from
//! [`structured_observable!`](crate::structured_observable).

use crate::error::{EngineError, Result};
use crate::observable::registry::{StructuredCodec, TypeRegistry};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Closed set of scalar observable kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Bool,
    /// 8-bit signed integer
    Char,
    /// 16-bit signed integer
    Short,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    /// 64-bit unsigned integer
    ULong,
    Float,
    Double,
    /// UTF-8 text
    Text,
}

impl ScalarKind {
    /// Parse a configuration type name. Accepts the C-style spellings used in
    /// pipeline files ("long long", "unsigned long long").
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.trim() {
            "bool" => ScalarKind::Bool,
            "char" => ScalarKind::Char,
            "short" => ScalarKind::Short,
            "int" => ScalarKind::Int,
            "long" | "long long" => ScalarKind::Long,
            "unsigned long long" | "unsigned long" | "ulong" => ScalarKind::ULong,
            "float" => ScalarKind::Float,
            "double" => ScalarKind::Double,
            "string" => ScalarKind::Text,
            _ => return None,
        })
    }

    /// Canonical type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Char => "char",
            ScalarKind::Short => "short",
            ScalarKind::Int => "int",
            ScalarKind::Long => "long",
            ScalarKind::ULong => "unsigned long long",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::Text => "string",
        }
    }

    /// Whether values of this kind can be compared against a cut range.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ScalarKind::Bool | ScalarKind::Text)
    }

    /// Zero value of this kind.
    pub fn zero(&self) -> CellValue {
        match self {
            ScalarKind::Bool => CellValue::Bool(false),
            ScalarKind::Char => CellValue::Char(0),
            ScalarKind::Short => CellValue::Short(0),
            ScalarKind::Int => CellValue::Int(0),
            ScalarKind::Long => CellValue::Long(0),
            ScalarKind::ULong => CellValue::ULong(0),
            ScalarKind::Float => CellValue::Float(0.0),
            ScalarKind::Double => CellValue::Double(0.0),
            ScalarKind::Text => CellValue::Text(String::new()),
        }
    }
}

/// Declared type of an observable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObservableType {
    Scalar(ScalarKind),
    /// Resolved through a [`TypeRegistry`] by name.
    Structured(String),
}

impl ObservableType {
    /// Resolve a configuration type name against the scalar set and `registry`.
    pub fn resolve(name: &str, registry: &TypeRegistry) -> Option<Self> {
        if let Some(kind) = ScalarKind::parse(name) {
            return Some(ObservableType::Scalar(kind));
        }
        let name = name.trim();
        registry
            .contains(name)
            .then(|| ObservableType::Structured(name.to_string()))
    }

    pub fn type_name(&self) -> &str {
        match self {
            ObservableType::Scalar(kind) => kind.type_name(),
            ObservableType::Structured(name) => name,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ObservableType::Scalar(kind) if kind.is_numeric())
    }
}

impl fmt::Display for ObservableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Boxed structured value plus the codec that knows how to copy and render it.
pub struct StructuredValue {
    data: Box<dyn Any + Send>,
    codec: Arc<StructuredCodec>,
}

impl StructuredValue {
    pub fn new(codec: Arc<StructuredCodec>) -> Self {
        Self {
            data: codec.create(),
            codec,
        }
    }

    pub fn type_name(&self) -> &str {
        self.codec.type_name()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        (*self.data).downcast_ref::<T>()
    }

    /// Replace the payload. Returns `false` (and leaves it untouched) if `T`
    /// is not the payload's concrete type.
    pub fn replace<T: Send + 'static>(&mut self, value: T) -> bool {
        if !(*self.data).is::<T>() {
            return false;
        }
        self.data = Box::new(value);
        true
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.codec.to_json(&*self.data)
    }
}

impl Clone for StructuredValue {
    fn clone(&self) -> Self {
        let data = self
            .codec
            .clone_value(&*self.data)
            .unwrap_or_else(|| self.codec.create());
        Self {
            data,
            codec: Arc::clone(&self.codec),
        }
    }
}

impl fmt::Debug for StructuredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructuredValue({})", self.type_name())
    }
}

/// Storage for one cell's current value.
#[derive(Debug, Clone)]
pub enum CellValue {
    Bool(bool),
    Char(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
    Text(String),
    Structured(StructuredValue),
}

impl CellValue {
    /// Numeric view used by cuts. `None` for bool, text and structured values.
    pub fn as_f64(&self) -> Option<f64> {
        Some(match self {
            CellValue::Char(v) => *v as f64,
            CellValue::Short(v) => *v as f64,
            CellValue::Int(v) => *v as f64,
            CellValue::Long(v) => *v as f64,
            CellValue::ULong(v) => *v as f64,
            CellValue::Float(v) => *v as f64,
            CellValue::Double(v) => *v,
            CellValue::Bool(_) | CellValue::Text(_) | CellValue::Structured(_) => return None,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            CellValue::Bool(v) => Value::from(*v),
            CellValue::Char(v) => Value::from(*v),
            CellValue::Short(v) => Value::from(*v),
            CellValue::Int(v) => Value::from(*v),
            CellValue::Long(v) => Value::from(*v),
            CellValue::ULong(v) => Value::from(*v),
            CellValue::Float(v) => Value::from(*v),
            CellValue::Double(v) => Value::from(*v),
            CellValue::Text(v) => Value::from(v.as_str()),
            CellValue::Structured(v) => v.to_json(),
        }
    }
}

/// Rust types that can be written to / read from a cell.
pub trait CellType: Sized + 'static {
    /// The declared type a cell needs for this Rust type. Also used when a
    /// write by name creates the observable lazily.
    fn observable_type() -> ObservableType;

    /// Write into `slot`. Returns `false` if the storage variant does not fit.
    fn store(self, slot: &mut CellValue) -> bool;

    /// Read from `slot`. `None` if the storage variant does not fit.
    fn load(slot: &CellValue) -> Option<Self>;
}

macro_rules! scalar_cell_type {
    ($t:ty, $variant:ident) => {
        impl CellType for $t {
            fn observable_type() -> ObservableType {
                ObservableType::Scalar(ScalarKind::$variant)
            }

            fn store(self, slot: &mut CellValue) -> bool {
                match slot {
                    CellValue::$variant(v) => {
                        *v = self;
                        true
                    }
                    _ => false,
                }
            }

            fn load(slot: &CellValue) -> Option<Self> {
                match slot {
                    CellValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

scalar_cell_type!(bool, Bool);
scalar_cell_type!(i8, Char);
scalar_cell_type!(i16, Short);
scalar_cell_type!(i32, Int);
scalar_cell_type!(i64, Long);
scalar_cell_type!(u64, ULong);
scalar_cell_type!(f32, Float);
scalar_cell_type!(f64, Double);
scalar_cell_type!(String, Text);

/// Implement [`CellType`] for a structured type registered under `$name`.
///
/// ```ignore
/// #[derive(Default, Clone, Serialize)]
/// struct Track { length: f64 }
///
/// eventflow_rs::structured_observable!(Track, "Track");
/// registry.register::<Track>("Track");
/// ```
#[macro_export]
macro_rules! structured_observable {
    ($t:ty, $name:expr) => {
        impl $crate::observable::CellType for $t {
            fn observable_type() -> $crate::observable::ObservableType {
                $crate::observable::ObservableType::Structured(::std::string::String::from($name))
            }

            fn store(self, slot: &mut $crate::observable::CellValue) -> bool {
                match slot {
                    $crate::observable::CellValue::Structured(s) => s.replace(self),
                    _ => false,
                }
            }

            fn load(slot: &$crate::observable::CellValue) -> ::std::option::Option<Self> {
                match slot {
                    $crate::observable::CellValue::Structured(s) => s.downcast_ref::<$t>().cloned(),
                    _ => ::std::option::Option::None,
                }
            }
        }
    };
}

structured_observable!(Vec<f64>, "vector<double>");
structured_observable!(Vec<i32>, "vector<int>");
structured_observable!(Vec<f32>, "vector<float>");

/// One observable's name, declared type and current value.
#[derive(Debug, Clone)]
pub struct TypedCell {
    name: String,
    ty: ObservableType,
    value: CellValue,
}

impl TypedCell {
    /// Allocate a default-valued cell. `None` if a structured type is not
    /// registered.
    pub fn new(name: impl Into<String>, ty: ObservableType, registry: &TypeRegistry) -> Option<Self> {
        let value = match &ty {
            ObservableType::Scalar(kind) => kind.zero(),
            ObservableType::Structured(type_name) => {
                CellValue::Structured(StructuredValue::new(registry.codec(type_name)?))
            }
        };
        Some(Self {
            name: name.into(),
            ty,
            value,
        })
    }

    /// Allocate a scalar cell; never fails.
    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            ty: ObservableType::Scalar(kind),
            value: kind.zero(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn observable_type(&self) -> &ObservableType {
        &self.ty
    }

    pub fn value(&self) -> &CellValue {
        &self.value
    }

    fn mismatch(&self, actual: &ObservableType) -> EngineError {
        EngineError::TypeMismatch {
            observable: self.name.clone(),
            expected: self.ty.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Write `value`. On a type mismatch the cell is left unchanged.
    pub fn set<T: CellType>(&mut self, value: T) -> Result<()> {
        let requested = T::observable_type();
        if requested != self.ty || !value.store(&mut self.value) {
            return Err(self.mismatch(&requested));
        }
        Ok(())
    }

    /// Read the current value as `T`.
    pub fn get<T: CellType>(&self) -> Result<T> {
        let requested = T::observable_type();
        if requested != self.ty {
            return Err(self.mismatch(&requested));
        }
        T::load(&self.value).ok_or_else(|| self.mismatch(&requested))
    }

    /// Copy the value of `other` into this cell; both must share a declared type.
    pub fn assign(&mut self, other: &TypedCell) -> Result<()> {
        if other.ty != self.ty {
            return Err(self.mismatch(&other.ty));
        }
        self.value = other.value.clone();
        Ok(())
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.value.to_json()
    }
}
