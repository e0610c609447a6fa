//! Attributes and schemas.
//!
//! Grounded on `databass/schema.py`'s `Attr`/`Schema` pair: an `Attr` is the
//! fundamental reference unit (name, type, owning table, positional index);
//! a `Schema` is an ordered sequence of `Attr`s supporting name/tablename
//! lookup, deep copy, tablename rewrite, and rendering a constructor
//! expression string for emitted code.

use crate::value::DataType;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ATTR_ID: AtomicU64 = AtomicU64::new(1);

fn fresh_attr_id() -> u64 {
    NEXT_ATTR_ID.fetch_add(1, Ordering::Relaxed)
}

/// An attribute reference: either a schema-defining column, or an
/// occurrence of a column name inside an expression tree awaiting
/// disambiguation.
#[derive(Debug, Clone)]
pub struct Attr {
    pub id: u64,
    pub aname: String,
    pub typ: DataType,
    pub tablename: Option<String>,
    /// Positional index into the tuple that carries this attribute at
    /// execution time. Filled by disambiguation.
    pub idx: Option<usize>,
    /// True iff this reference appears inside an `AggFunc`'s argument
    /// tree, directing disambiguation to resolve it against the child's
    /// `__group__` column instead of the outer schema.
    pub is_agg_ref: bool,
    /// When `is_agg_ref`, the index of `__group__` in the child schema.
    pub gidx: Option<usize>,
    /// Only set for attributes literally named `__group__`, produced by
    /// `GroupBy`: the schema of the per-group sub-relation.
    pub group_schema: Option<Box<Schema>>,
}

impl Attr {
    pub fn new(aname: impl Into<String>) -> Attr {
        Attr {
            id: fresh_attr_id(),
            aname: aname.into(),
            typ: DataType::Unknown,
            tablename: None,
            idx: None,
            is_agg_ref: false,
            gidx: None,
            group_schema: None,
        }
    }

    pub fn qualified(tablename: impl Into<String>, aname: impl Into<String>) -> Attr {
        let mut a = Attr::new(aname);
        a.tablename = Some(tablename.into());
        a
    }

    /// Whether `self` (an occurrence inside an expression) matches `other`
    /// (a schema-defining attribute): equal names, and if `self` has a
    /// tablename, an equal tablename, and compatible types.
    pub fn matches(&self, other: &Attr) -> bool {
        if self.aname != other.aname {
            return false;
        }
        if let Some(t) = &self.tablename {
            if other.tablename.as_deref() != Some(t.as_str()) {
                return false;
            }
        }
        self.typ.compatible(other.typ)
    }

    /// A deep copy with a fresh stable id (schema attributes are never
    /// shared mutably between operators).
    pub fn copy(&self) -> Attr {
        Attr {
            id: fresh_attr_id(),
            aname: self.aname.clone(),
            typ: self.typ,
            tablename: self.tablename.clone(),
            idx: self.idx,
            is_agg_ref: self.is_agg_ref,
            gidx: self.gidx,
            group_schema: self.group_schema.clone(),
        }
    }

    pub fn display_name(&self) -> String {
        match &self.tablename {
            Some(t) => format!("{t}.{}", self.aname),
            None => self.aname.clone(),
        }
    }
}

/// An ordered sequence of schema-defining `Attr`s.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub attrs: Vec<Attr>,
}

impl Schema {
    pub fn new(attrs: Vec<Attr>) -> Schema {
        Schema { attrs }
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attr> {
        self.attrs.iter()
    }

    /// The first index whose schema attribute matches `attr`. Errors with
    /// the attribute's display name on zero or ambiguity is the caller's
    /// responsibility (disambiguation reports ambiguity across *several*
    /// schemas, not within one); this returns `None` on no match and the
    /// first match's index otherwise, consistent with "first index whose
    /// schema attribute matches" in the data model.
    pub fn idx(&self, attr: &Attr) -> Option<usize> {
        self.attrs.iter().position(|a| attr.matches(a))
    }

    /// Same lookup, ignoring tablename.
    pub fn get_type(&self, aname: &str) -> Option<DataType> {
        self.attrs.iter().find(|a| a.aname == aname).map(|a| a.typ)
    }

    /// Deep copy of the whole schema (fresh attribute ids).
    pub fn copy(&self) -> Schema {
        Schema {
            attrs: self.attrs.iter().map(Attr::copy).collect(),
        }
    }

    /// Rewrite every attribute's tablename in place (used by
    /// `SubQuerySource` to rename its child's schema to its alias).
    pub fn set_tablename(&mut self, tablename: &str) {
        for a in &mut self.attrs {
            a.tablename = Some(tablename.to_string());
        }
    }

    pub fn with_tablename(&self, tablename: &str) -> Schema {
        let mut s = self.copy();
        s.set_tablename(tablename);
        s
    }

    /// Concatenate two schemas (used by joins: left schema ++ right schema).
    pub fn concat(&self, other: &Schema) -> Schema {
        let mut attrs = self.attrs.clone();
        attrs.extend(other.attrs.iter().cloned());
        Schema { attrs }
    }

    pub fn push(&mut self, attr: Attr) {
        self.attrs.push(attr);
    }

    /// Render a Rust expression string that constructs a `Schema` matching
    /// this one, used by codegen to materialize schemas inside emitted
    /// functions (e.g. for `Project`'s output tuple).
    pub fn compile_constructor(&self) -> String {
        let fields: Vec<String> = self
            .attrs
            .iter()
            .map(|a| {
                format!(
                    "queryengine::schema::Attr::qualified({:?}, {:?})",
                    a.tablename.clone().unwrap_or_default(),
                    a.aname
                )
            })
            .collect();
        format!(
            "queryengine::schema::Schema::new(vec![{}])",
            fields.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_requires_equal_names_and_compatible_tablenames() {
        let outer = Attr::qualified("t", "a");
        let query_ref = Attr::new("a");
        assert!(query_ref.matches(&outer));

        let wrong_table = Attr::qualified("u", "a");
        assert!(!wrong_table.matches(&outer));
    }

    #[test]
    fn schema_idx_finds_first_match() {
        let schema = Schema::new(vec![Attr::qualified("t", "a"), Attr::qualified("t", "b")]);
        let query_ref = Attr::new("b");
        assert_eq!(schema.idx(&query_ref), Some(1));
    }

    #[test]
    fn concat_preserves_order() {
        let l = Schema::new(vec![Attr::qualified("l", "x")]);
        let r = Schema::new(vec![Attr::qualified("r", "y")]);
        let both = l.concat(&r);
        assert_eq!(both.len(), 2);
        assert_eq!(both.attrs[0].aname, "x");
        assert_eq!(both.attrs[1].aname, "y");
    }
}
