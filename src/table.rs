//! Tables and per-column statistics.
//!
//! Grounded on `databass/tables.py` (`ListTuple`/table row iteration) and
//! `databass/db.py` (`Database` walking CSV files into tables). `Stats`
//! supplies the per-column min/max/distinct/cardinality figures the
//! Selinger optimizer's selectivity model reads.

use crate::schema::Schema;
use crate::tuple::Tuple;
use crate::value::Value;
use std::collections::HashSet;

/// A row-oriented, fully in-memory relation.
#[derive(Debug, Clone)]
pub struct InMemoryTable {
    pub schema: Schema,
    pub rows: Vec<Tuple>,
}

impl InMemoryTable {
    pub fn new(schema: Schema, rows: Vec<Tuple>) -> InMemoryTable {
        InMemoryTable { schema, rows }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tuple> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Per-column statistics used by the optimizer's selectivity model.
    pub fn stats(&self) -> Stats {
        Stats::compute(&self.schema, &self.rows)
    }
}

/// Per-column statistics: min, max, distinct count, and the table's
/// cardinality (row count).
#[derive(Debug, Clone)]
pub struct Stats {
    pub cardinality: usize,
    columns: Vec<ColumnStats>,
}

#[derive(Debug, Clone)]
enum ColumnStats {
    Num { min: f64, max: f64 },
    Str { distinct: usize },
    Empty,
}

impl Stats {
    pub fn compute(schema: &Schema, rows: &[Tuple]) -> Stats {
        let ncols = schema.len();
        let mut columns = Vec::with_capacity(ncols);
        for i in 0..ncols {
            let col_type = schema.attrs[i].typ;
            use crate::value::DataType;
            let stats = match col_type {
                DataType::Num => {
                    let mut min = f64::INFINITY;
                    let mut max = f64::NEG_INFINITY;
                    let mut any = false;
                    for row in rows {
                        if let Some(Value::Num(n)) = row.get(i) {
                            any = true;
                            if *n < min {
                                min = *n;
                            }
                            if *n > max {
                                max = *n;
                            }
                        }
                    }
                    if any {
                        ColumnStats::Num { min, max }
                    } else {
                        ColumnStats::Empty
                    }
                }
                DataType::Str => {
                    let distinct: HashSet<&str> = rows
                        .iter()
                        .filter_map(|r| r.get(i).and_then(Value::as_str))
                        .collect();
                    ColumnStats::Str {
                        distinct: distinct.len(),
                    }
                }
                DataType::Unknown => ColumnStats::Empty,
            };
            columns.push(stats);
        }
        Stats {
            cardinality: rows.len(),
            columns,
        }
    }

    pub fn min_max(&self, idx: usize) -> Option<(f64, f64)> {
        match self.columns.get(idx) {
            Some(ColumnStats::Num { min, max }) => Some((*min, *max)),
            _ => None,
        }
    }

    pub fn distinct_count(&self, idx: usize) -> Option<usize> {
        match self.columns.get(idx) {
            Some(ColumnStats::Str { distinct }) => Some(*distinct),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attr;
    use crate::value::DataType;

    #[test]
    fn stats_compute_min_max_for_numeric_column() {
        let mut a = Attr::qualified("t", "x");
        a.typ = DataType::Num;
        let schema = Schema::new(vec![a]);
        let rows = vec![
            Tuple::new(vec![Value::Num(3.0)]),
            Tuple::new(vec![Value::Num(1.0)]),
            Tuple::new(vec![Value::Num(7.0)]),
        ];
        let stats = Stats::compute(&schema, &rows);
        assert_eq!(stats.cardinality, 3);
        assert_eq!(stats.min_max(0), Some((1.0, 7.0)));
    }
}
