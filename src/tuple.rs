//! Row tuples.
//!
//! Grounded on `databass/tables.py`'s `ListTuple`: an ordered sequence of
//! values accessed positionally. Per the REDESIGN decision in
//! `DESIGN.md`, tuples here are plain owned values rather than a single
//! mutably-rebound object per operator; operators that need to retain rows
//! beyond one iteration step clone them explicitly.

use crate::value::Value;

/// A single row: ordered values, positionally aligned with a `Schema`.
#[derive(Debug, Clone, Default)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Tuple {
        Tuple { values }
    }

    pub fn empty() -> Tuple {
        Tuple { values: Vec::new() }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Concatenate two tuples (left values followed by right values), used
    /// by joins.
    pub fn concat(&self, other: &Tuple) -> Tuple {
        let mut values = self.values.clone();
        values.extend(other.values.iter().cloned());
        Tuple::new(values)
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl std::hash::Hash for Tuple {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for v in &self.values {
            match v {
                Value::Num(n) => n.to_bits().hash(state),
                Value::Str(s) => s.hash(state),
                Value::Null => 0u8.hash(state),
                Value::Group(rows) => rows.len().hash(state),
            }
        }
    }
}
