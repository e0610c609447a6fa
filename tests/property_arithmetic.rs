//! Property-based tests (proptest) over randomly generated tables, per
//! spec.md's property-test section: `ORDER BY` monotonicity, `Distinct`
//! uniqueness, `Limit` exact counts, and `ThetaJoin(true)` cardinality.

use proptest::prelude::*;

use queryengine::catalog::Catalog;
use queryengine::config::EngineConfig;
use queryengine::plan::{NodeId, OpKind, PlanArena};
use queryengine::schema::{Attr, Schema};
use queryengine::table::InMemoryTable;
use queryengine::tuple::Tuple;
use queryengine::value::{DataType, Value};
use queryengine::{exec, execute};

fn num_attr(table: &str, name: &str) -> Attr {
    let mut a = Attr::qualified(table, name);
    a.typ = DataType::Num;
    a
}

fn register_single_column_table(name: &str, values: &[f64]) {
    let schema = Schema::new(vec![num_attr(name, "x")]);
    let rows = values.iter().map(|v| Tuple::new(vec![Value::Num(*v)])).collect();
    Catalog::global().register(name, InMemoryTable::new(schema, rows));
}

proptest! {
    /// `ORDER BY x ASC` output is monotonically non-decreasing in `x`.
    #[test]
    fn order_by_asc_is_monotonic(mut values in prop::collection::vec(-1_000.0f64..1_000.0, 0..200)) {
        // NaN can't appear (range excludes it), but guard anyway against
        // a future range change.
        values.retain(|v| !v.is_nan());
        register_single_column_table("prop_orderby", &values);
        let config = EngineConfig::default();
        let rows = execute("SELECT x FROM prop_orderby ORDER BY x", &config).unwrap();
        prop_assert_eq!(rows.len(), values.len());
        for w in rows.windows(2) {
            let a = w[0].get(0).unwrap().as_num().unwrap();
            let b = w[1].get(0).unwrap().as_num().unwrap();
            prop_assert!(a <= b);
        }
    }

    /// `Distinct` output carries no duplicate value-hashes.
    #[test]
    fn distinct_has_no_duplicate_hashes(values in prop::collection::vec(0i64..20, 0..200)) {
        let values: Vec<f64> = values.into_iter().map(|v| v as f64).collect();
        register_single_column_table("prop_distinct", &values);
        let config = EngineConfig::default();
        let rows = execute("SELECT DISTINCT x FROM prop_distinct", &config).unwrap();
        let mut seen = std::collections::HashSet::new();
        for row in &rows {
            let key = row.get(0).unwrap().as_num().unwrap().to_bits();
            prop_assert!(seen.insert(key), "duplicate value in Distinct output");
        }
        let expected_distinct: std::collections::HashSet<u64> =
            values.iter().map(|v| v.to_bits()).collect();
        prop_assert_eq!(rows.len(), expected_distinct.len());
    }

    /// `Limit(n, k)` emits exactly `min(n, max(0, |input| - k))` rows.
    #[test]
    fn limit_emits_exact_count(
        n_rows in 0usize..50,
        limit in 0i64..20,
        offset in 0i64..20,
    ) {
        let values: Vec<f64> = (0..n_rows).map(|i| i as f64).collect();
        register_single_column_table("prop_limit", &values);
        let config = EngineConfig::default();
        let sql = format!("SELECT x FROM prop_limit LIMIT {limit} OFFSET {offset}");
        let rows = execute(&sql, &config).unwrap();
        let expected = (limit as usize).min((n_rows as i64 - offset).max(0) as usize);
        prop_assert_eq!(rows.len(), expected);
    }

    /// `ThetaJoin(l, r, true)` emits `|l| x |r|` rows (a cross product).
    #[test]
    fn theta_join_true_is_a_cross_product(
        n_left in 0usize..12,
        n_right in 0usize..12,
    ) {
        let left: Vec<f64> = (0..n_left).map(|i| i as f64).collect();
        let right: Vec<f64> = (0..n_right).map(|i| (i * 2) as f64).collect();
        register_single_column_table("prop_join_l", &left);
        register_single_column_table("prop_join_r", &right);

        let mut arena = PlanArena::new();
        let l: NodeId = arena.insert(OpKind::Scan {
            tablename: "prop_join_l".into(),
            alias: "prop_join_l".into(),
        });
        let r: NodeId = arena.insert(OpKind::Scan {
            tablename: "prop_join_r".into(),
            alias: "prop_join_r".into(),
        });
        let join = arena.insert(OpKind::ThetaJoin {
            l,
            r,
            cond: queryengine::expr::Expr::Literal(Value::Num(1.0)),
        });
        let rows = exec::execute(&arena, join).unwrap();
        prop_assert_eq!(rows.len(), n_left * n_right);
    }
}
