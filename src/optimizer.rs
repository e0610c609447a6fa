//! Bottom-up schema init, attribute disambiguation, `From`-expansion, and
//! the Selinger-style cost-based join optimizer.
//!
//! Grounded on `databass/optimizer.py` for structure (`initialize_plan`,
//! `disambiguate_attrs`, `SelingerOpt.best_plan`/`best_initial_join`); the
//! cost/cardinality/selectivity formulas themselves are implemented per
//! `SPEC_FULL.md` §4.E, since the original leaves those as `XXX`/
//! `cost = 0` placeholder exercises rather than a working reference.

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::OptimizeError;
use crate::expr::{collect_attrs_mut, Expr, Op};
use crate::plan::{NodeId, OpKind, PlanArena, NO_PARENT};
use crate::schema::{Attr, Schema};
use crate::table::Stats;
use crate::value::DataType;
use std::collections::{HashMap, HashSet};

/// Run the full optimizer pipeline on `root`, returning the (possibly new,
/// in the case of `From`-expansion) root node id.
pub fn optimize(
    arena: &mut PlanArena,
    root: NodeId,
    config: &EngineConfig,
) -> Result<NodeId, OptimizeError> {
    let _span = tracing::info_span!("optimize").entered();
    initialize_plan(arena, root, config)?;
    disambiguate_attrs(arena, root)?;

    let mut root = root;
    while let Some(from_id) = find_from(arena, root) {
        tracing::debug!(?from_id, "expanding From node via Selinger optimizer");
        let new_root = expand_from(arena, from_id, config)?;
        if from_id == root {
            root = new_root;
        }
    }

    initialize_plan(arena, root, config)?;
    disambiguate_attrs(arena, root)?;
    verify_all_bound(arena, root)?;
    Ok(root)
}

fn reachable(arena: &PlanArena, root: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id.0) {
            continue;
        }
        out.push(id);
        stack.extend(arena.get(id).children());
    }
    out
}

/// Bottom-up schema initialization: clear every reachable node's schema,
/// then repeatedly compute the schema of any node whose children all have
/// schemas, until none remain. Bails out after `schema_init_cycle_guard`
/// iterations with no progress (defensive against a malformed/cyclic tree).
pub fn initialize_plan(
    arena: &mut PlanArena,
    root: NodeId,
    config: &EngineConfig,
) -> Result<(), OptimizeError> {
    let nodes = reachable(arena, root);
    for &id in &nodes {
        arena.get_mut(id).schema = None;
    }

    let guard = config.optimizer.schema_init_cycle_guard;
    let mut remaining: Vec<NodeId> = nodes.clone();
    let mut iterations = 0usize;
    while !remaining.is_empty() {
        iterations += 1;
        if iterations > guard {
            return Err(OptimizeError::SchemaInitCycle(guard));
        }
        let mut progressed = false;
        let mut next_remaining = Vec::new();
        for id in remaining {
            let ready = arena
                .get(id)
                .children()
                .iter()
                .all(|c| arena.get(*c).schema.is_some());
            if ready {
                let schema = compute_schema(arena, id)?;
                arena.get_mut(id).schema = Some(schema);
                progressed = true;
            } else {
                next_remaining.push(id);
            }
        }
        remaining = next_remaining;
        if !progressed && !remaining.is_empty() {
            return Err(OptimizeError::SchemaInitCycle(iterations));
        }
    }
    Ok(())
}

fn compute_schema(arena: &mut PlanArena, id: NodeId) -> Result<Schema, OptimizeError> {
    let kind = arena.get(id).kind.clone();
    match kind {
        OpKind::Scan { tablename, alias } => {
            let table = Catalog::global()
                .get(&tablename)
                .map_err(|e| OptimizeError::InvalidArgument(e.to_string()))?;
            Ok(table.schema.with_tablename(&alias))
        }
        OpKind::SubQuerySource { child, alias } => {
            Ok(arena.get(child).schema().with_tablename(&alias))
        }
        OpKind::TableFunctionSource { name } => Err(OptimizeError::UnsupportedOperator(format!(
            "TableFunctionSource('{name}') is a placeholder, not implemented"
        ))),
        OpKind::From { children } => {
            let mut schema = Schema::default();
            for c in children {
                schema = schema.concat(arena.get(c).schema());
            }
            Ok(schema)
        }
        OpKind::ThetaJoin { l, r, .. } | OpKind::HashJoin { l, r, .. } => {
            Ok(arena.get(l).schema().concat(arena.get(r).schema()))
        }
        OpKind::Project {
            child,
            mut exprs,
            mut aliases,
        } => {
            if let Some(c) = child {
                let child_schema = arena.get(c).schema().clone();
                expand_stars(&mut exprs, &mut aliases, &child_schema);
            } else if exprs.iter().any(|e| matches!(e, Expr::Star(_))) {
                return Err(OptimizeError::UnsupportedOperator(
                    "SELECT * with no FROM clause".to_string(),
                ));
            }
            set_default_aliases(&exprs, &mut aliases);
            if let OpKind::Project {
                exprs: e2,
                aliases: a2,
                ..
            } = &mut arena.get_mut(id).kind
            {
                *e2 = exprs.clone();
                *a2 = aliases.clone();
            }
            let attrs = exprs
                .iter()
                .zip(aliases.iter())
                .map(|(e, a)| {
                    let mut attr = Attr::new(a.clone());
                    attr.typ = e.get_type();
                    attr
                })
                .collect();
            Ok(Schema::new(attrs))
        }
        OpKind::GroupBy { child, group_exprs } => {
            let child_schema = arena.get(child).schema().clone();
            let mut seen = HashSet::new();
            let mut attrs = Vec::new();
            for e in &group_exprs {
                let mut refs = Vec::new();
                crate::expr::collect_attrs(e, &mut refs);
                for a in refs {
                    let key = (a.tablename.clone(), a.aname.clone());
                    if seen.insert(key) {
                        attrs.push(a.clone());
                    }
                }
            }
            let mut key_attr = Attr::new("__key__");
            key_attr.typ = DataType::Str;
            let mut group_attr = Attr::new("__group__");
            group_attr.group_schema = Some(Box::new(child_schema));
            attrs.push(key_attr);
            attrs.push(group_attr);
            Ok(Schema::new(attrs))
        }
        OpKind::Filter { child, .. }
        | OpKind::OrderBy { child, .. }
        | OpKind::Limit { child, .. }
        | OpKind::Distinct { child }
        | OpKind::Yield { child }
        | OpKind::Print { child } => Ok(arena.get(child).schema().clone()),
    }
}

fn expand_stars(exprs: &mut Vec<Expr>, aliases: &mut Vec<String>, child_schema: &Schema) {
    let mut new_exprs = Vec::new();
    let mut new_aliases = Vec::new();
    for (i, e) in exprs.iter().enumerate() {
        if let Expr::Star(tablename) = e {
            for attr in &child_schema.attrs {
                if let Some(t) = tablename {
                    if attr.tablename.as_deref() != Some(t.as_str()) {
                        continue;
                    }
                }
                new_exprs.push(Expr::Attr(attr.clone()));
                new_aliases.push(attr.aname.clone());
            }
        } else {
            new_exprs.push(e.clone());
            new_aliases.push(aliases.get(i).cloned().unwrap_or_default());
        }
    }
    *exprs = new_exprs;
    *aliases = new_aliases;
}

fn set_default_aliases(exprs: &[Expr], aliases: &mut Vec<String>) {
    aliases.resize(exprs.len(), String::new());
    for (i, alias) in aliases.iter_mut().enumerate() {
        if alias.is_empty() {
            *alias = match &exprs[i] {
                Expr::Attr(a) => a.aname.clone(),
                _ => format!("col{i}"),
            };
        }
    }
}

/// Collect every `Attr` this operator's expressions touch (operator-
/// specific set per `SPEC_FULL.md` §4.E).
fn disambiguation_targets(arena: &mut PlanArena, id: NodeId) -> Vec<&mut Attr> {
    let mut out = Vec::new();
    match &mut arena.get_mut(id).kind {
        OpKind::Filter { cond, .. } | OpKind::ThetaJoin { cond, .. } => {
            collect_attrs_mut(cond, &mut out)
        }
        OpKind::Project { exprs, .. } => {
            for e in exprs {
                collect_attrs_mut(e, &mut out);
            }
        }
        OpKind::OrderBy { exprs, .. } => {
            for e in exprs {
                collect_attrs_mut(e, &mut out);
            }
        }
        OpKind::GroupBy { group_exprs, .. } => {
            for e in group_exprs {
                collect_attrs_mut(e, &mut out);
            }
        }
        OpKind::HashJoin { lkey, rkey, .. } => {
            collect_attrs_mut(lkey, &mut out);
            collect_attrs_mut(rkey, &mut out);
        }
        _ => {}
    }
    out
}

/// Fill `tablename`, `typ`, `idx`, `gidx` on every `Attr` referenced by any
/// operator's expressions.
pub fn disambiguate_attrs(arena: &mut PlanArena, root: NodeId) -> Result<(), OptimizeError> {
    for id in reachable(arena, root) {
        let children = arena.get(id).children();
        // For Project/Filter/OrderBy/GroupBy (unary), there is one child
        // schema to search; for ThetaJoin/HashJoin (binary), candidates
        // from either side are offset so idx addresses the concatenated
        // tuple.
        let child_schemas: Vec<(Option<String>, Schema, usize)> = children
            .iter()
            .scan(0usize, |offset, c| {
                let schema = arena.get(*c).schema().clone();
                let len = schema.len();
                let item = (None, schema, *offset);
                *offset += len;
                Some(item)
            })
            .collect();

        let attrs = disambiguation_targets(arena, id);
        for attr in attrs {
            // Rebind unconditionally, even if `idx` is already set: the
            // `From`-expansion step rewrites the tree and can change a
            // schema's attribute order (e.g. swap which side of a join
            // ends up left vs. right), so a position bound against the
            // pre-expansion schema is not trustworthy after expansion.
            // `bind()` already tolerates re-binding the same attr against
            // the same tablename; it only rejects a tablename that
            // actually conflicts with one already recorded.
            if attr.is_agg_ref {
                bind_agg_ref(attr, &child_schemas)?;
            } else {
                bind_plain_ref(attr, &child_schemas)?;
            }
        }
    }
    Ok(())
}

fn bind_plain_ref(
    attr: &mut Attr,
    child_schemas: &[(Option<String>, Schema, usize)],
) -> Result<(), OptimizeError> {
    let mut candidates = Vec::new();
    for (_, schema, offset) in child_schemas {
        if let Some(local_idx) = schema.idx(attr) {
            candidates.push((schema.attrs[local_idx].clone(), offset + local_idx));
        }
    }
    match candidates.len() {
        0 => Ok(()),
        1 => {
            let (found, idx) = candidates.remove(0);
            bind(attr, &found, idx, None)
        }
        _ => Err(OptimizeError::AttributeAmbiguous(attr.display_name())),
    }
}

fn bind_agg_ref(
    attr: &mut Attr,
    child_schemas: &[(Option<String>, Schema, usize)],
) -> Result<(), OptimizeError> {
    // Aggregate refs only ever have one (direct) child.
    let Some((_, schema, _)) = child_schemas.first() else {
        return Ok(());
    };
    let Some(gidx) = schema
        .attrs
        .iter()
        .position(|a| a.aname == "__group__")
    else {
        return Ok(());
    };
    let group_schema = schema.attrs[gidx]
        .group_schema
        .as_ref()
        .expect("__group__ attribute always carries a group_schema");

    let mut candidates = Vec::new();
    for (i, candidate) in group_schema.attrs.iter().enumerate() {
        if attr.matches(candidate) {
            candidates.push((candidate.clone(), i));
        }
    }
    match candidates.len() {
        0 => Ok(()),
        1 => {
            let (found, idx) = candidates.remove(0);
            bind(attr, &found, idx, Some(gidx))
        }
        _ => Err(OptimizeError::AttributeAmbiguous(attr.display_name())),
    }
}

fn bind(attr: &mut Attr, found: &Attr, idx: usize, gidx: Option<usize>) -> Result<(), OptimizeError> {
    if let (Some(existing), Some(new)) = (&attr.tablename, &found.tablename) {
        if existing != new {
            return Err(OptimizeError::ConflictingTablename {
                attr: attr.aname.clone(),
                existing: existing.clone(),
                new: new.clone(),
            });
        }
    }
    attr.tablename = found.tablename.clone();
    attr.typ = found.typ;
    attr.idx = Some(idx);
    attr.gidx = gidx;
    Ok(())
}

fn verify_all_bound(arena: &PlanArena, root: NodeId) -> Result<(), OptimizeError> {
    for id in reachable(arena, root) {
        let mut attrs = Vec::new();
        match &arena.get(id).kind {
            OpKind::Filter { cond, .. } | OpKind::ThetaJoin { cond, .. } => {
                crate::expr::collect_attrs(cond, &mut attrs)
            }
            OpKind::Project { exprs, .. } => {
                for e in exprs {
                    crate::expr::collect_attrs(e, &mut attrs);
                }
            }
            OpKind::OrderBy { exprs, .. } => {
                for e in exprs {
                    crate::expr::collect_attrs(e, &mut attrs);
                }
            }
            OpKind::GroupBy { group_exprs, .. } => {
                for e in group_exprs {
                    crate::expr::collect_attrs(e, &mut attrs);
                }
            }
            OpKind::HashJoin { lkey, rkey, .. } => {
                crate::expr::collect_attrs(lkey, &mut attrs);
                crate::expr::collect_attrs(rkey, &mut attrs);
            }
            _ => {}
        }
        for a in attrs {
            if a.idx.is_none() {
                return Err(OptimizeError::AttributeUnbound(a.display_name()));
            }
        }
    }
    Ok(())
}

fn find_from(arena: &PlanArena, root: NodeId) -> Option<NodeId> {
    reachable(arena, root)
        .into_iter()
        .find(|id| matches!(arena.get(*id).kind, OpKind::From { .. }))
}

// ---------------------------------------------------------------------
// Selinger left-deep join optimizer
// ---------------------------------------------------------------------

fn is_base_scan(arena: &PlanArena, id: NodeId) -> bool {
    matches!(arena.get(id).kind, OpKind::Scan { .. })
}

fn source_alias(arena: &PlanArena, id: NodeId) -> Option<String> {
    match &arena.get(id).kind {
        OpKind::Scan { alias, .. } | OpKind::SubQuerySource { alias, .. } => Some(alias.clone()),
        _ => None,
    }
}

fn scan_descendants(arena: &PlanArena, id: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = vec![id];
    while let Some(n) = stack.pop() {
        if is_base_scan(arena, n) {
            out.push(n);
        }
        stack.extend(arena.get(n).children());
    }
    out
}

fn schema_has(arena: &PlanArena, id: NodeId, aname: &str) -> bool {
    arena
        .get(id)
        .schema
        .as_ref()
        .is_some_and(|s| s.attrs.iter().any(|a| a.aname == aname))
}

fn table_stats(arena: &PlanArena, id: NodeId) -> Option<Stats> {
    match &arena.get(id).kind {
        OpKind::Scan { tablename, .. } => Catalog::global().get(tablename).ok().map(|t| t.stats()),
        OpKind::SubQuerySource { child, .. } => table_stats(arena, *child),
        _ => None,
    }
}

fn selectivity_attr(arena: &PlanArena, config: &EngineConfig, source: NodeId, aname: &str) -> f64 {
    if !is_base_scan(arena, source) {
        return 1.0;
    }
    let Some(schema) = arena.get(source).schema.as_ref() else {
        return config.optimizer.default_selectivity;
    };
    let Some(idx) = schema.attrs.iter().position(|a| a.aname == aname) else {
        return config.optimizer.default_selectivity;
    };
    let Some(stats) = table_stats(arena, source) else {
        return config.optimizer.default_selectivity;
    };
    match schema.attrs[idx].typ {
        DataType::Num => stats
            .min_max(idx)
            .map(|(min, max)| 1.0 / (max - min + 1.0).max(1.0))
            .unwrap_or(config.optimizer.default_selectivity),
        DataType::Str => stats
            .distinct_count(idx)
            .map(|d| 1.0 / (d as f64).max(1.0))
            .unwrap_or(config.optimizer.default_selectivity),
        DataType::Unknown => config.optimizer.default_selectivity,
    }
}

fn attr_selectivity_any_side(
    arena: &PlanArena,
    config: &EngineConfig,
    l: NodeId,
    r: NodeId,
    aname: &str,
) -> f64 {
    if schema_has(arena, l, aname) {
        selectivity_attr(arena, config, l, aname)
    } else if schema_has(arena, r, aname) {
        selectivity_attr(arena, config, r, aname)
    } else {
        config.optimizer.default_selectivity
    }
}

fn selectivity(arena: &PlanArena, config: &EngineConfig, l: NodeId, r: NodeId, cond: &Expr) -> f64 {
    match cond {
        Expr::Literal(v) => {
            if v.is_truthy() {
                1.0
            } else {
                0.0
            }
        }
        Expr::Binary(Op::Eq, a, b) => match (a.as_ref(), b.as_ref()) {
            (Expr::Attr(attr_a), Expr::Attr(attr_b)) => {
                let sel_a = attr_selectivity_any_side(arena, config, l, r, &attr_a.aname);
                let sel_b = attr_selectivity_any_side(arena, config, l, r, &attr_b.aname);
                sel_a.min(sel_b)
            }
            _ => config.optimizer.default_selectivity,
        },
        _ => config.optimizer.default_selectivity,
    }
}

fn card(arena: &PlanArena, config: &EngineConfig, id: NodeId) -> f64 {
    match &arena.get(id).kind {
        OpKind::Scan { tablename, .. } => Catalog::global()
            .get(tablename)
            .map(|t| t.stats().cardinality as f64)
            .unwrap_or(0.05),
        OpKind::SubQuerySource { child, .. } => card(arena, config, *child),
        OpKind::ThetaJoin { l, r, cond } => {
            card(arena, config, *l) * card(arena, config, *r) * selectivity(arena, config, *l, *r, cond)
        }
        _ => 0.05,
    }
}

fn cost(arena: &PlanArena, config: &EngineConfig, id: NodeId) -> f64 {
    match &arena.get(id).kind {
        OpKind::Scan { .. } => card(arena, config, id),
        OpKind::SubQuerySource { child, .. } => cost(arena, config, *child),
        OpKind::ThetaJoin { l, r, .. } => {
            cost(arena, config, *l)
                + card(arena, config, *l) * cost(arena, config, *r)
                + config.optimizer.join_size_penalty * card(arena, config, id)
        }
        _ => card(arena, config, id),
    }
}

/// Map from an unordered pair of source tablenames/aliases to the
/// equi-join predicate between them, harvested from ancestor `Filter`
/// nodes above the `From` being expanded.
type PredicateIndex = HashMap<(String, String), Expr>;

fn build_predicate_index(arena: &PlanArena, from_id: NodeId) -> PredicateIndex {
    let mut index = PredicateIndex::new();
    let mut cursor = arena.get(from_id).parent;
    while cursor != NO_PARENT {
        if let OpKind::Filter { cond, .. } = &arena.get(cursor).kind {
            collect_equi_predicates(cond, &mut index);
        }
        cursor = arena.get(cursor).parent;
    }
    index
}

fn collect_equi_predicates(e: &Expr, index: &mut PredicateIndex) {
    match e {
        Expr::Binary(Op::And, l, r) => {
            collect_equi_predicates(l, index);
            collect_equi_predicates(r, index);
        }
        Expr::Paren(inner) => collect_equi_predicates(inner, index),
        Expr::Binary(Op::Eq, l, r) => {
            if let (Expr::Attr(la), Expr::Attr(ra)) = (l.as_ref(), r.as_ref()) {
                if let (Some(lt), Some(rt)) = (&la.tablename, &ra.tablename) {
                    if lt != rt {
                        let key = if lt < rt {
                            (lt.clone(), rt.clone())
                        } else {
                            (rt.clone(), lt.clone())
                        };
                        index.insert(key, e.clone());
                    }
                }
            }
        }
        _ => {}
    }
}

fn get_join_pred(arena: &PlanArena, l: NodeId, r: NodeId, index: &PredicateIndex) -> Expr {
    let Some(alias_r) = source_alias(arena, r) else {
        return Expr::Literal(crate::value::Value::Num(1.0));
    };
    let candidates: Vec<String> = if let Some(alias_l) = source_alias(arena, l) {
        vec![alias_l]
    } else {
        scan_descendants(arena, l)
            .into_iter()
            .filter_map(|s| source_alias(arena, s))
            .collect()
    };
    for alias_l in candidates {
        let key = if alias_l < alias_r {
            (alias_l.clone(), alias_r.clone())
        } else {
            (alias_r.clone(), alias_l.clone())
        };
        if let Some(pred) = index.get(&key) {
            return pred.clone();
        }
    }
    Expr::Literal(crate::value::Value::Num(1.0))
}

/// Replace the `From` node at `from_id` with a left-deep join tree built
/// by the Selinger search, splicing the result in place while preserving
/// the `From`'s former parent pointer.
fn expand_from(
    arena: &mut PlanArena,
    from_id: NodeId,
    config: &EngineConfig,
) -> Result<NodeId, OptimizeError> {
    let sources = match &arena.get(from_id).kind {
        OpKind::From { children } => children.clone(),
        _ => return Ok(from_id),
    };
    if sources.is_empty() {
        return Err(OptimizeError::InvalidArgument(
            "From with no sources".to_string(),
        ));
    }
    if sources.len() == 1 {
        arena.splice(from_id, sources[0]);
        return Ok(sources[0]);
    }

    let index = build_predicate_index(arena, from_id);

    let mut best: Option<(NodeId, f64)> = None;
    for &l in &sources {
        for &r in &sources {
            if l.0 == r.0 {
                continue;
            }
            let pred = get_join_pred(arena, l, r, &index);
            let candidate = arena.insert_with_children(OpKind::ThetaJoin { l, r, cond: pred });
            let schema = compute_schema(arena, candidate)?;
            arena.get_mut(candidate).schema = Some(schema);
            let c = cost(arena, config, candidate);
            if best.as_ref().is_none_or(|(_, bc)| c <= *bc) {
                best = Some((candidate, c));
            }
        }
    }
    let (mut best_plan, _) = best.expect("sources is non-empty, so at least one pair exists");
    let chosen_pair = match &arena.get(best_plan).kind {
        OpKind::ThetaJoin { l, r, .. } => (*l, *r),
        _ => unreachable!(),
    };
    let mut remaining: Vec<NodeId> = sources
        .into_iter()
        .filter(|s| *s != chosen_pair.0 && *s != chosen_pair.1)
        .collect();

    while !remaining.is_empty() {
        let mut round_best: Option<(NodeId, NodeId, f64)> = None;
        for &r in &remaining {
            let pred = get_join_pred(arena, best_plan, r, &index);
            let candidate =
                arena.insert_with_children(OpKind::ThetaJoin { l: best_plan, r, cond: pred });
            let schema = compute_schema(arena, candidate)?;
            arena.get_mut(candidate).schema = Some(schema);
            let c = cost(arena, config, candidate);
            if round_best.as_ref().is_none_or(|(_, _, bc)| c <= *bc) {
                round_best = Some((candidate, r, c));
            }
        }
        let (new_plan, used_r, _) = round_best.expect("remaining is non-empty");
        best_plan = new_plan;
        remaining.retain(|s| *s != used_r);
    }

    arena.splice(from_id, best_plan);
    Ok(best_plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attr;
    use crate::table::InMemoryTable;
    use crate::tuple::Tuple;
    use crate::value::Value;

    fn setup_two_tables() {
        let mut a1 = Attr::qualified("a", "x");
        a1.typ = DataType::Num;
        Catalog::global().register(
            "a",
            InMemoryTable::new(
                Schema::new(vec![a1]),
                (0..5).map(|i| Tuple::new(vec![Value::Num(i as f64)])).collect(),
            ),
        );
        let mut b1 = Attr::qualified("b", "x");
        b1.typ = DataType::Num;
        Catalog::global().register(
            "b",
            InMemoryTable::new(
                Schema::new(vec![b1]),
                (0..5).map(|i| Tuple::new(vec![Value::Num(i as f64)])).collect(),
            ),
        );
    }

    #[test]
    fn initialize_plan_is_idempotent() {
        setup_two_tables();
        let mut arena = PlanArena::new();
        let scan = arena.insert(OpKind::Scan {
            tablename: "a".into(),
            alias: "a".into(),
        });
        let config = EngineConfig::default();
        initialize_plan(&mut arena, scan, &config).unwrap();
        let first = arena.get(scan).schema().clone();
        initialize_plan(&mut arena, scan, &config).unwrap();
        let second = arena.get(scan).schema().clone();
        assert_eq!(first.len(), second.len());
        assert_eq!(first.attrs[0].aname, second.attrs[0].aname);
    }

    #[test]
    fn optimize_expands_from_into_join_tree() {
        setup_two_tables();
        let mut arena = PlanArena::new();
        let sa = arena.insert(OpKind::Scan {
            tablename: "a".into(),
            alias: "a".into(),
        });
        let sb = arena.insert(OpKind::Scan {
            tablename: "b".into(),
            alias: "b".into(),
        });
        let from = arena.insert_with_children(OpKind::From {
            children: vec![sa, sb],
        });
        let cond = Expr::Binary(
            Op::Eq,
            Box::new(Expr::Attr(Attr::qualified("a", "x"))),
            Box::new(Expr::Attr(Attr::qualified("b", "x"))),
        );
        let filter = arena.insert_with_children(OpKind::Filter { child: from, cond });
        let config = EngineConfig::default();
        let root = optimize(&mut arena, filter, &config).unwrap();
        assert_eq!(root, filter);
        if let OpKind::Filter { child, .. } = &arena.get(filter).kind {
            assert!(matches!(arena.get(*child).kind, OpKind::ThetaJoin { .. }));
        } else {
            panic!("expected Filter");
        }
    }

    /// Regression test: the Selinger tie-break (`c <= *bc`) favors the
    /// later-evaluated candidate, so `best_initial_join` can pick
    /// `ThetaJoin(b, a)` over `ThetaJoin(a, b)` even though the `Filter`
    /// above the (now-expanded) `From` was disambiguated against the
    /// *original* child order. The second `initialize_plan`/
    /// `disambiguate_attrs` pass after `From`-expansion must rebind every
    /// attr's `idx` against the rewritten schema, not just leave
    /// already-bound attrs alone.
    #[test]
    fn disambiguate_rebinds_idx_after_from_expansion_reorders_children() {
        setup_two_tables();
        let mut arena = PlanArena::new();
        let sa = arena.insert(OpKind::Scan {
            tablename: "a".into(),
            alias: "a".into(),
        });
        let sb = arena.insert(OpKind::Scan {
            tablename: "b".into(),
            alias: "b".into(),
        });
        let from = arena.insert_with_children(OpKind::From {
            children: vec![sa, sb],
        });
        let cond = Expr::Binary(
            Op::Eq,
            Box::new(Expr::Attr(Attr::qualified("a", "x"))),
            Box::new(Expr::Attr(Attr::qualified("b", "x"))),
        );
        let filter = arena.insert_with_children(OpKind::Filter { child: from, cond });
        let config = EngineConfig::default();
        let root = optimize(&mut arena, filter, &config).unwrap();

        let (join_id, cond) = match &arena.get(root).kind {
            OpKind::Filter { child, cond } => (*child, cond.clone()),
            _ => panic!("expected Filter"),
        };
        let join_schema = arena.get(join_id).schema();
        let (left_attr, right_attr) = match cond {
            Expr::Binary(Op::Eq, l, r) => (
                match *l {
                    Expr::Attr(a) => a,
                    _ => panic!("expected Attr"),
                },
                match *r {
                    Expr::Attr(a) => a,
                    _ => panic!("expected Attr"),
                },
            ),
            _ => panic!("expected Eq"),
        };
        // Whichever side of the join schema `a.x`/`b.x` actually landed on
        // (left-first or swapped by the tie-break), the bound `idx` must
        // point at that position, not at the position from the
        // pre-expansion schema.
        let a_expected_idx = join_schema
            .attrs
            .iter()
            .position(|at| at.tablename.as_deref() == Some("a") && at.aname == "x")
            .unwrap();
        let b_expected_idx = join_schema
            .attrs
            .iter()
            .position(|at| at.tablename.as_deref() == Some("b") && at.aname == "x")
            .unwrap();
        assert_eq!(left_attr.idx, Some(a_expected_idx));
        assert_eq!(right_attr.idx, Some(b_expected_idx));
    }
}
