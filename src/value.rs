//! # Value Type System
//!
//! The engine's data model carries exactly two scalar kinds (`num`, `str`),
//! per the data model in `SPEC_FULL.md` §3, plus a synthetic group-of-rows
//! value produced by `GroupBy`'s `__group__` column. Unlike a columnar
//! storage engine, there is no need for a richer numeric type lattice here:
//! numeric values are `f64` throughout (aggregate math needs the precision
//! and the SQL-ish surface never distinguishes int from float).
//!
//! ## Usage
//!
//! ```rust
//! use queryengine::value::{Value, DataType};
//!
//! let v = Value::Num(3.0);
//! assert_eq!(v.data_type(), DataType::Num);
//! ```

use crate::tuple::Tuple;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The type lattice used for attribute/expression typing.
///
/// `Unknown` matches anything during schema lookup (see
/// [`crate::schema::Schema::idx`]); it never appears as the *final* type of
/// a disambiguated attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Num,
    Str,
    Unknown,
}

impl DataType {
    /// Whether `self` is compatible with `other` for attribute matching:
    /// equal, or either side is `Unknown`.
    pub fn compatible(self, other: DataType) -> bool {
        self == DataType::Unknown || other == DataType::Unknown || self == other
    }
}

/// A scalar or group value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Num(f64),
    Str(Arc<str>),
    /// The value of a `__group__` column: the member rows of one group,
    /// along with the schema those rows share. Never produced by user
    /// expressions directly — only by `GroupBy`.
    #[serde(skip)]
    Group(Arc<Vec<Tuple>>),
    Null,
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Num(_) => DataType::Num,
            Value::Str(_) => DataType::Str,
            Value::Group(_) => DataType::Unknown,
            Value::Null => DataType::Unknown,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&[Tuple]> {
        match self {
            Value::Group(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Null => false,
            Value::Group(rows) => !rows.is_empty(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Group(a), Value::Group(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// A hashable/equatable stand-in for [`Value`] (which carries an `f64` and
/// is not `Eq`), used everywhere a `Value` needs to sit in a `HashMap` key
/// or `HashSet` member: `GroupBy`'s bucket key, `HashJoin`'s probe index,
/// and `Distinct`'s seen-set, in both the interpreter (`exec.rs`) and the
/// emitted codegen (`codegen.rs`) — both paths hash the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Num(u64),
    Str(String),
    Null,
    Other,
}

impl ValueKey {
    pub fn from_value(v: &Value) -> ValueKey {
        match v {
            Value::Num(n) => ValueKey::Num(n.to_bits()),
            Value::Str(s) => ValueKey::Str(s.to_string()),
            Value::Null => ValueKey::Null,
            Value::Group(_) => ValueKey::Other,
        }
    }

    pub fn display(&self) -> String {
        match self {
            ValueKey::Num(bits) => f64::from_bits(*bits).to_string(),
            ValueKey::Str(s) => s.clone(),
            ValueKey::Null => "null".to_string(),
            ValueKey::Other => "?".to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Num(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Null => write!(f, "null"),
            Value::Group(rows) => write!(f, "<group of {} rows>", rows.len()),
        }
    }
}
