//! UDF registry.
//!
//! Grounded on `databass/udfs.py`'s `UDF`/`AggUDF`/`ScalarUDF` classes and
//! `UDFRegistry` singleton: two disjoint namespaces (scalar, aggregate),
//! name collisions forbidden across them, lazily initialized.

use crate::error::{EvalError, UdfError};
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// A scalar function: evaluated once per row, one value per argument.
pub type ScalarFn = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// An aggregate function: evaluated once per group, receives one column of
/// values per argument (the transposed per-row argument values of every
/// member row).
pub type AggFn = Arc<dyn Fn(&[Vec<Value>]) -> Result<Value, EvalError> + Send + Sync>;

#[derive(Clone)]
pub struct ScalarUdf {
    pub name: String,
    pub nargs: usize,
    pub func: ScalarFn,
}

#[derive(Clone)]
pub struct AggUdf {
    pub name: String,
    pub nargs: usize,
    pub func: AggFn,
}

pub struct UdfRegistry {
    scalars: RwLock<HashMap<String, ScalarUdf>>,
    aggregates: RwLock<HashMap<String, AggUdf>>,
}

impl UdfRegistry {
    fn empty() -> UdfRegistry {
        UdfRegistry {
            scalars: RwLock::new(HashMap::new()),
            aggregates: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide singleton, pre-populated with the built-in UDFs
    /// (`lower` scalar; `avg`, `count`, `sum`, `std`, `stddev` aggregate).
    pub fn global() -> &'static UdfRegistry {
        static REGISTRY: OnceLock<UdfRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            let reg = UdfRegistry::empty();
            reg.install_builtins();
            reg
        })
    }

    pub fn register_scalar(&self, udf: ScalarUdf) -> Result<(), UdfError> {
        if self.aggregates.read().contains_key(&udf.name) {
            return Err(UdfError::NamespaceCollision(udf.name));
        }
        if self.scalars.read().contains_key(&udf.name) {
            return Err(UdfError::DuplicateName(udf.name));
        }
        self.scalars.write().insert(udf.name.clone(), udf);
        Ok(())
    }

    pub fn register_aggregate(&self, udf: AggUdf) -> Result<(), UdfError> {
        if self.scalars.read().contains_key(&udf.name) {
            return Err(UdfError::NamespaceCollision(udf.name));
        }
        if self.aggregates.read().contains_key(&udf.name) {
            return Err(UdfError::DuplicateName(udf.name));
        }
        self.aggregates.write().insert(udf.name.clone(), udf);
        Ok(())
    }

    pub fn scalar(&self, name: &str) -> Result<ScalarUdf, EvalError> {
        self.scalars
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UdfNotFound(name.to_string()))
    }

    pub fn aggregate(&self, name: &str) -> Result<AggUdf, EvalError> {
        self.aggregates
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UdfNotFound(name.to_string()))
    }

    fn install_builtins(&self) {
        self.register_scalar(ScalarUdf {
            name: "lower".to_string(),
            nargs: 1,
            func: Arc::new(|args| {
                let s = args[0]
                    .as_str()
                    .ok_or_else(|| EvalError::TypeMismatch("lower() expects a string".into()))?;
                Ok(Value::str(s.to_lowercase()))
            }),
        })
        .expect("builtin registration cannot collide");

        self.register_aggregate(AggUdf {
            name: "count".to_string(),
            nargs: 1,
            func: Arc::new(|cols| Ok(Value::Num(cols[0].len() as f64))),
        })
        .expect("builtin registration cannot collide");

        self.register_aggregate(AggUdf {
            name: "sum".to_string(),
            nargs: 1,
            func: Arc::new(|cols| Ok(Value::Num(sum_column(&cols[0])?))),
        })
        .expect("builtin registration cannot collide");

        self.register_aggregate(AggUdf {
            name: "avg".to_string(),
            nargs: 1,
            func: Arc::new(|cols| {
                let col = &cols[0];
                if col.is_empty() {
                    return Err(EvalError::TypeMismatch(
                        "avg() of an empty group is undefined".into(),
                    ));
                }
                Ok(Value::Num(sum_column(col)? / col.len() as f64))
            }),
        })
        .expect("builtin registration cannot collide");

        let stddev_fn: AggFn = Arc::new(|cols| {
            let col = &cols[0];
            let n = col.len();
            if n < 2 {
                return Err(EvalError::TypeMismatch(
                    "std()/stddev() needs at least two rows in the group".into(),
                ));
            }
            let mean = sum_column(col)? / n as f64;
            let mut acc = 0.0;
            for v in col {
                let x = v
                    .as_num()
                    .ok_or_else(|| EvalError::TypeMismatch("std() expects numeric column".into()))?;
                acc += (x - mean) * (x - mean);
            }
            Ok(Value::Num((acc / (n as f64 - 1.0)).sqrt()))
        });

        self.register_aggregate(AggUdf {
            name: "std".to_string(),
            nargs: 1,
            func: stddev_fn.clone(),
        })
        .expect("builtin registration cannot collide");
        self.register_aggregate(AggUdf {
            name: "stddev".to_string(),
            nargs: 1,
            func: stddev_fn,
        })
        .expect("builtin registration cannot collide");
    }
}

fn sum_column(col: &[Value]) -> Result<f64, EvalError> {
    let mut acc = 0.0;
    for v in col {
        acc += v
            .as_num()
            .ok_or_else(|| EvalError::TypeMismatch("sum() expects a numeric column".into()))?;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_and_disjoint() {
        let reg = UdfRegistry::global();
        assert!(reg.scalar("lower").is_ok());
        assert!(reg.aggregate("sum").is_ok());
        assert!(reg.aggregate("lower").is_err());
    }

    #[test]
    fn sum_and_avg_and_count_builtins() {
        let reg = UdfRegistry::global();
        let col = vec![vec![Value::Num(1.0), Value::Num(2.0), Value::Num(3.0)]];
        assert_eq!(
            (reg.aggregate("sum").unwrap().func)(&col).unwrap().as_num(),
            Some(6.0)
        );
        assert_eq!(
            (reg.aggregate("count").unwrap().func)(&col).unwrap().as_num(),
            Some(3.0)
        );
        assert_eq!(
            (reg.aggregate("avg").unwrap().func)(&col).unwrap().as_num(),
            Some(2.0)
        );
    }

    #[test]
    fn avg_of_empty_group_errors() {
        let reg = UdfRegistry::global();
        let col: Vec<Vec<Value>> = vec![vec![]];
        assert!((reg.aggregate("avg").unwrap().func)(&col).is_err());
    }
}
