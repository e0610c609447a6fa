//! # Query Engine
//!
//! A small relational query engine: a SQL-ish parser, a Selinger-style
//! cost-based optimizer, a row-at-a-time interpreter, and a produce/consume
//! code generator that emits a fused-loop Rust function equivalent to the
//! interpreted plan.
//!
//! ## Pipeline
//!
//! ```text
//! parse(sql) -> (PlanArena, NodeId)      parser::parse
//!            -> wrap in Yield
//!            -> optimize(...)            optimizer::optimize
//!            -> execute(...)             exec::execute
//!            -> compile_plan(...)        codegen::compile_plan (alternative to execute)
//! ```
//!
//! [`QueryEngine`] wires these stages together behind an [`EngineConfig`].
//! The stages are also usable directly through their own modules for
//! callers that need to inspect or rewrite the plan tree in between.

pub mod catalog;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod error;
pub mod exec;
pub mod expr;
pub mod optimizer;
pub mod parser;
pub mod plan;
pub mod schema;
pub mod table;
pub mod tuple;
pub mod udf;
pub mod value;

pub use compiler::Context;
pub use config::EngineConfig;
pub use error::{QueryError, QueryResult};
pub use plan::{NodeId, PlanArena};
pub use tuple::Tuple;

use plan::OpKind;

/// Wrap `root` in a [`plan::OpKind::Yield`] node, the plan-root marker both
/// the interpreter and the code generator treat as "emit this row" (see
/// `databass/ops.py`'s `Yield`, grounding `exec.rs`/`codegen.rs`).
fn wrap_yield(arena: &mut PlanArena, root: NodeId) -> NodeId {
    arena.insert_with_children(OpKind::Yield { child: root })
}

/// Parse `sql`, wrap it in `Yield`, and run it through the full optimizer
/// pipeline. Returns the arena and the (possibly rewritten) root id.
pub fn optimize(sql: &str, config: &EngineConfig) -> QueryResult<(PlanArena, NodeId)> {
    let (mut arena, root) = parser::parse(sql)?;
    let root = wrap_yield(&mut arena, root);
    let root = optimizer::optimize(&mut arena, root, config)?;
    Ok((arena, root))
}

/// Parse, optimize, and interpret `sql` row-at-a-time, returning its result
/// rows.
pub fn execute(sql: &str, config: &EngineConfig) -> QueryResult<Vec<Tuple>> {
    let (arena, root) = optimize(sql, config)?;
    Ok(exec::execute(&arena, root)?)
}

/// Parse, optimize, and compile `sql` to a standalone Rust function body
/// (per `config.codegen.function_name`) rather than interpreting it.
/// Equivalent to the teacher's `compile_and_write`, minus ever invoking
/// `rustc` on the result — the caller decides what to do with the text.
pub fn compile_to_string(sql: &str, config: &EngineConfig) -> QueryResult<String> {
    let (arena, root) = optimize(sql, config)?;
    let mut ctx = Context::new();
    codegen::compile_plan(&arena, root, &mut ctx)?;
    Ok(ctx.compiler.compile_to_func(&config.codegen.function_name))
}

/// Convenience wrapper bundling an [`EngineConfig`] with the pipeline
/// functions above, mirroring the teacher's engine-struct-plus-config
/// shape (parse -> optimize -> execute/compile, instead of the teacher's
/// parse -> build_ir -> optimize_ir -> execute_ir).
pub struct QueryEngine {
    config: EngineConfig,
}

impl QueryEngine {
    /// Construct an engine bound to `config`, walking
    /// `config.catalog.root_dir` for `*.csv` files per §6's catalog
    /// boundary unless `config.catalog.auto_register_csv` is `false`.
    /// Registration is idempotent (re-running it just overwrites the same
    /// table names), so constructing more than one `QueryEngine` against
    /// the same directory is harmless.
    pub fn new(config: EngineConfig) -> QueryEngine {
        if config.catalog.auto_register_csv {
            if let Err(err) = catalog::Catalog::global().auto_register_csv(&config.catalog.root_dir) {
                tracing::warn!(
                    root_dir = %config.catalog.root_dir.display(),
                    %err,
                    "CSV catalog auto-registration failed"
                );
            }
        }
        QueryEngine { config }
    }

    /// Load configuration the same way [`EngineConfig::load`] does
    /// (`config.toml` / `config.local.toml` / `QUERYENGINE_*` env vars).
    pub fn from_env() -> QueryResult<QueryEngine> {
        Ok(QueryEngine::new(EngineConfig::load()?))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse `sql` without optimizing it.
    pub fn parse(&self, sql: &str) -> QueryResult<(PlanArena, NodeId)> {
        Ok(parser::parse(sql)?)
    }

    pub fn optimize(&self, sql: &str) -> QueryResult<(PlanArena, NodeId)> {
        optimize(sql, &self.config)
    }

    pub fn execute(&self, sql: &str) -> QueryResult<Vec<Tuple>> {
        execute(sql, &self.config)
    }

    pub fn run(&self, sql: &str) -> QueryResult<Vec<Tuple>> {
        self.execute(sql)
    }

    pub fn compile_to_string(&self, sql: &str) -> QueryResult<String> {
        compile_to_string(sql, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_table() {
        use crate::schema::{Attr, Schema};
        use crate::table::InMemoryTable;
        use crate::value::{DataType, Value};

        let mut a = Attr::qualified("lib_t", "a");
        a.typ = DataType::Num;
        a.idx = Some(0);
        let mut b = Attr::qualified("lib_t", "b");
        b.typ = DataType::Num;
        b.idx = Some(1);
        catalog::Catalog::global().register(
            "lib_t",
            InMemoryTable::new(
                Schema::new(vec![a, b]),
                vec![
                    Tuple::new(vec![Value::Num(1.0), Value::Num(2.0)]),
                    Tuple::new(vec![Value::Num(3.0), Value::Num(4.0)]),
                ],
            ),
        );
    }

    #[test]
    fn select_one_round_trips_through_the_whole_pipeline() {
        let config = EngineConfig::default();
        let rows = execute("SELECT 1", &config).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0), Some(&crate::value::Value::Num(1.0)));
    }

    #[test]
    fn select_from_where_executes_against_the_catalog() {
        seed_table();
        let config = EngineConfig::default();
        let rows = execute("SELECT a, b FROM lib_t WHERE a > 1", &config).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0), Some(&crate::value::Value::Num(3.0)));
    }

    #[test]
    fn compile_to_string_emits_a_named_function() {
        let config = EngineConfig::default();
        let code = compile_to_string("SELECT 1", &config).unwrap();
        assert!(code.contains("fn compiled_q"));
    }
}
