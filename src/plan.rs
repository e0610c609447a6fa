//! The operator plan tree, represented as an arena of nodes indexed by id.
//!
//! Grounded on `databass/ops.py`'s operator class hierarchy (field shapes
//! per variant) and on the arena design note in `SPEC_FULL.md` §9: cyclic
//! parent pointers are awkward to own directly in Rust, so every operator
//! is stored in a `PlanArena` `Vec<Op>` and parent/child links are
//! `NodeId`s (plain indices), not owning references. Rewriting a node's
//! children without touching its parent (the optimizer's "preserve parent
//! pointers" dance) becomes simple index assignment.

use crate::expr::Expr;
use crate::schema::Schema;

/// An index into a [`PlanArena`]. `NodeId(usize::MAX)` is never a valid
/// index and is used as the "no parent" sentinel for the plan root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

pub const NO_PARENT: NodeId = NodeId(usize::MAX);

#[derive(Debug, Clone)]
pub enum OpKind {
    Scan {
        tablename: String,
        alias: String,
    },
    SubQuerySource {
        child: NodeId,
        alias: String,
    },
    TableFunctionSource {
        name: String,
    },
    /// Logical n-ary source list, expanded away by the optimizer before
    /// execution.
    From {
        children: Vec<NodeId>,
    },
    ThetaJoin {
        l: NodeId,
        r: NodeId,
        cond: Expr,
    },
    HashJoin {
        l: NodeId,
        r: NodeId,
        lkey: Expr,
        rkey: Expr,
    },
    Project {
        child: Option<NodeId>,
        exprs: Vec<Expr>,
        aliases: Vec<String>,
    },
    GroupBy {
        child: NodeId,
        group_exprs: Vec<Expr>,
    },
    Filter {
        child: NodeId,
        cond: Expr,
    },
    OrderBy {
        child: NodeId,
        exprs: Vec<Expr>,
        ascending: Vec<bool>,
    },
    Limit {
        child: NodeId,
        limit: Expr,
        offset: Expr,
    },
    Distinct {
        child: NodeId,
    },
    Yield {
        child: NodeId,
    },
    Print {
        child: NodeId,
    },
}

/// One node in the plan tree: its variant-specific fields, a (mutable)
/// parent pointer, and a schema filled in by `initialize_plan`.
#[derive(Debug, Clone)]
pub struct Op {
    pub kind: OpKind,
    pub parent: NodeId,
    pub schema: Option<Schema>,
}

impl Op {
    fn new(kind: OpKind) -> Op {
        Op {
            kind,
            parent: NO_PARENT,
            schema: None,
        }
    }

    /// The node's direct children, in evaluation order.
    pub fn children(&self) -> Vec<NodeId> {
        match &self.kind {
            OpKind::Scan { .. } | OpKind::TableFunctionSource { .. } => vec![],
            OpKind::SubQuerySource { child, .. }
            | OpKind::GroupBy { child, .. }
            | OpKind::Filter { child, .. }
            | OpKind::OrderBy { child, .. }
            | OpKind::Limit { child, .. }
            | OpKind::Distinct { child }
            | OpKind::Yield { child }
            | OpKind::Print { child } => vec![*child],
            OpKind::Project { child, .. } => child.into_iter().collect(),
            OpKind::From { children } => children.clone(),
            OpKind::ThetaJoin { l, r, .. } | OpKind::HashJoin { l, r, .. } => vec![*l, *r],
        }
    }

    pub fn schema(&self) -> &Schema {
        self.schema
            .as_ref()
            .expect("schema accessed before initialize_plan")
    }
}

/// An arena of plan nodes. Indices (`NodeId`s) are stable across
/// optimizer rewrites that only replace *subtrees* (append new nodes,
/// repoint a parent's child field); nothing is ever removed, so old ids
/// simply become unreachable garbage.
#[derive(Debug, Clone, Default)]
pub struct PlanArena {
    nodes: Vec<Op>,
}

impl PlanArena {
    pub fn new() -> PlanArena {
        PlanArena { nodes: Vec::new() }
    }

    pub fn insert(&mut self, kind: OpKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Op::new(kind));
        id
    }

    /// Insert a node and immediately set its children's `parent` field to
    /// point back at it — the common case when building a fresh subtree.
    pub fn insert_with_children(&mut self, kind: OpKind) -> NodeId {
        let children = Op::new(kind.clone()).children();
        let id = self.insert(kind);
        for c in children {
            self[c].parent = id;
        }
        id
    }

    pub fn get(&self, id: NodeId) -> &Op {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Op {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Replace `old`'s parent's child pointer (wherever it is) with `new`,
    /// and set `new`'s parent to `old`'s former parent — the "preserve
    /// parent pointers" rewrite the optimizer performs when expanding
    /// `From` into a join tree.
    pub fn splice(&mut self, old: NodeId, new: NodeId) {
        let parent = self.get(old).parent;
        self.get_mut(new).parent = parent;
        if parent != NO_PARENT {
            self.retarget_child(parent, old, new);
        }
    }

    fn retarget_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let replace = |id: &mut NodeId| {
            if *id == old {
                *id = new;
            }
        };
        match &mut self.get_mut(parent).kind {
            OpKind::SubQuerySource { child, .. }
            | OpKind::GroupBy { child, .. }
            | OpKind::Filter { child, .. }
            | OpKind::OrderBy { child, .. }
            | OpKind::Limit { child, .. }
            | OpKind::Distinct { child }
            | OpKind::Yield { child }
            | OpKind::Print { child } => replace(child),
            OpKind::Project { child, .. } => {
                if let Some(c) = child {
                    replace(c);
                }
            }
            OpKind::From { children } => {
                for c in children {
                    replace(c);
                }
            }
            OpKind::ThetaJoin { l, r, .. } | OpKind::HashJoin { l, r, .. } => {
                replace(l);
                replace(r);
            }
            OpKind::Scan { .. } | OpKind::TableFunctionSource { .. } => {}
        }
    }
}

impl std::ops::Index<NodeId> for PlanArena {
    type Output = Op;
    fn index(&self, id: NodeId) -> &Op {
        self.get(id)
    }
}

impl std::ops::IndexMut<NodeId> for PlanArena {
    fn index_mut(&mut self, id: NodeId) -> &mut Op {
        self.get_mut(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_preserves_parent_pointer_of_replacement() {
        let mut arena = PlanArena::new();
        let scan = arena.insert(OpKind::Scan {
            tablename: "t".into(),
            alias: "t".into(),
        });
        let filter = arena.insert_with_children(OpKind::Filter {
            child: scan,
            cond: Expr::Literal(crate::value::Value::Num(1.0)),
        });
        assert_eq!(arena.get(scan).parent, filter);

        let new_scan = arena.insert(OpKind::Scan {
            tablename: "t".into(),
            alias: "t2".into(),
        });
        arena.splice(scan, new_scan);
        assert_eq!(arena.get(new_scan).parent, filter);
        if let OpKind::Filter { child, .. } = &arena.get(filter).kind {
            assert_eq!(*child, new_scan);
        } else {
            panic!("expected Filter");
        }
    }
}
