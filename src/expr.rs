//! Expression algebra.
//!
//! Grounded on `databass/exprs.py`: `Literal`, `Attr`, `Star`, `Paren`,
//! `Expr` (unary/binary operator application), `Between`, `AggFunc`,
//! `ScalarFunc`, each supporting both a direct row-at-a-time `eval` and a
//! code-generating `compile(ctx)`.

use crate::compiler::Context;
use crate::error::{CompileError, EvalError};
use crate::schema::Attr;
use crate::tuple::Tuple;
use crate::udf::UdfRegistry;
use crate::value::{DataType, Value};

/// Operators shared between unary and binary application, per the operator
/// table in `SPEC_FULL.md` §4.B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    // NB: derive(Debug) is also relied on by Expr::compile, which renders
    // `Op::{op:?}` into emitted source text — variant names must stay
    // valid Rust identifiers.
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Not,
}

impl Op {
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            Op::Eq | Op::Neq | Op::Lt | Op::Gt | Op::Le | Op::Ge | Op::And | Op::Or | Op::Not
        )
    }

    fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Eq => "==",
            Op::Neq => "!=",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Le => "<=",
            Op::Ge => ">=",
            Op::And => "&&",
            Op::Or => "||",
            Op::Not => "!",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Attr(Attr),
    Star(Option<String>),
    Paren(Box<Expr>),
    Unary(Op, Box<Expr>),
    Binary(Op, Box<Expr>, Box<Expr>),
    Between(Box<Expr>, Box<Expr>, Box<Expr>),
    AggFunc(String, Vec<Expr>),
    ScalarFunc(String, Vec<Expr>),
}

impl Expr {
    /// Construct an `AggFunc`, applying the "aggregate registration trick":
    /// every `Attr` under `args` is marked `is_agg_ref = true` so that
    /// disambiguation binds it against the child `GroupBy`'s `__group__`
    /// column rather than the outer schema.
    pub fn agg_func(name: impl Into<String>, mut args: Vec<Expr>) -> Expr {
        for a in &mut args {
            mark_agg_refs(a);
        }
        Expr::AggFunc(name.into(), args)
    }

    /// `Expr.get_type`: boolean/numeric operators -> `num`; `AggFunc` ->
    /// `num`; `ScalarFunc` -> `str` (conservative default); `Literal`
    /// inspects its value; `Attr` carries its own bound type.
    pub fn get_type(&self) -> DataType {
        match self {
            Expr::Literal(v) => v.data_type(),
            Expr::Attr(a) => a.typ,
            Expr::Star(_) => DataType::Unknown,
            Expr::Paren(e) => e.get_type(),
            Expr::Unary(_, _) | Expr::Binary(_, _, _) | Expr::Between(_, _, _) => DataType::Num,
            Expr::AggFunc(_, _) => DataType::Num,
            Expr::ScalarFunc(_, _) => DataType::Str,
        }
    }

    /// Direct row-at-a-time evaluation.
    pub fn eval(&self, row: &Tuple) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Attr(a) => {
                let idx = a.idx.ok_or(EvalError::UnboundAttr(0))?;
                row.get(idx).cloned().ok_or(EvalError::UnboundAttr(idx))
            }
            Expr::Star(_) => Err(EvalError::TypeMismatch(
                "Star must be expanded by Project before evaluation".to_string(),
            )),
            Expr::Paren(e) => e.eval(row),
            Expr::Unary(op, e) => {
                let v = e.eval(row)?;
                eval_unary(*op, &v)
            }
            Expr::Binary(op, l, r) => {
                let lv = l.eval(row)?;
                let rv = r.eval(row)?;
                eval_binary(*op, &lv, &rv)
            }
            Expr::Between(e, lo, hi) => {
                let v = e.eval(row)?;
                let lo = lo.eval(row)?;
                let hi = hi.eval(row)?;
                let ge_lo = eval_binary(Op::Ge, &v, &lo)?;
                let le_hi = eval_binary(Op::Le, &v, &hi)?;
                eval_binary(Op::And, &ge_lo, &le_hi)
            }
            Expr::ScalarFunc(name, args) => {
                let udf = UdfRegistry::global().scalar(name)?;
                if udf.nargs != args.len() {
                    return Err(EvalError::UdfArityMismatch {
                        name: name.clone(),
                        expected: udf.nargs,
                        got: args.len(),
                    });
                }
                let values: Result<Vec<Value>, EvalError> =
                    args.iter().map(|a| a.eval(row)).collect();
                (udf.func)(&values?)
            }
            Expr::AggFunc(name, args) => {
                let gidx = args
                    .iter()
                    .find_map(find_group_index)
                    .ok_or_else(|| {
                        EvalError::TypeMismatch(
                            "aggregate applied outside a GroupBy context".to_string(),
                        )
                    })?;
                let group_val = row.get(gidx).ok_or(EvalError::UnboundAttr(gidx))?;
                let members = group_val.as_group().ok_or_else(|| {
                    EvalError::TypeMismatch("__group__ column did not hold a group value".to_string())
                })?;
                let udf = UdfRegistry::global().aggregate(name)?;
                if udf.nargs != args.len() {
                    return Err(EvalError::UdfArityMismatch {
                        name: name.clone(),
                        expected: udf.nargs,
                        got: args.len(),
                    });
                }
                let mut columns: Vec<Vec<Value>> = Vec::with_capacity(args.len());
                for arg in args {
                    let mut col = Vec::with_capacity(members.len());
                    for member in members {
                        col.push(arg.eval(member)?);
                    }
                    columns.push(col);
                }
                (udf.func)(&columns)
            }
        }
    }

    /// Code-generating contract: pop the top `(v_in, v_out)` pair, emit
    /// code computing this expression's value into `v_out`, recursively
    /// compiling sub-expressions by pushing fresh `(v_in, v_tmp)` pairs.
    pub fn compile(&self, ctx: &mut Context) -> Result<(), CompileError> {
        let (v_in, v_out) = ctx.pop_io_vars()?;
        match self {
            Expr::Literal(v) => {
                ctx.add_line(format!("let {v_out} = {};", literal_rust(v)));
            }
            Expr::Attr(a) => {
                let idx = a
                    .idx
                    .ok_or_else(|| CompileError::UnboundAttr(a.display_name()))?;
                ctx.add_line(format!(
                    "let {v_out} = {v_in}.values()[{idx}].clone();"
                ));
            }
            Expr::Star(_) => {
                ctx.add_line(format!("let {v_out} = {v_in}.clone();"));
            }
            Expr::Paren(e) => {
                ctx.push_io_vars(v_in, v_out.clone());
                e.compile(ctx)?;
            }
            Expr::Unary(op, e) => {
                let v_tmp = ctx.new_var("tmp");
                ctx.push_io_vars(v_in, v_tmp.clone());
                e.compile(ctx)?;
                ctx.add_line(format!(
                    "let {v_out} = queryengine::expr::apply_unary(queryengine::expr::Op::{op:?}, &{v_tmp})?;"
                ));
            }
            Expr::Binary(op, l, r) => {
                let v_l = ctx.new_var("tmp");
                ctx.push_io_vars(v_in.clone(), v_l.clone());
                l.compile(ctx)?;
                let v_r = ctx.new_var("tmp");
                ctx.push_io_vars(v_in, v_r.clone());
                r.compile(ctx)?;
                ctx.add_line(format!(
                    "let {v_out} = queryengine::expr::apply_binary(queryengine::expr::Op::{op:?}, &{v_l}, &{v_r})?;"
                ));
            }
            Expr::Between(e, lo, hi) => {
                let v_e = ctx.new_var("tmp");
                ctx.push_io_vars(v_in.clone(), v_e.clone());
                e.compile(ctx)?;
                let v_lo = ctx.new_var("tmp");
                ctx.push_io_vars(v_in.clone(), v_lo.clone());
                lo.compile(ctx)?;
                let v_hi = ctx.new_var("tmp");
                ctx.push_io_vars(v_in, v_hi.clone());
                hi.compile(ctx)?;
                ctx.add_line(format!(
                    "let {v_out} = queryengine::expr::apply_between(&{v_e}, &{v_lo}, &{v_hi})?;"
                ));
            }
            Expr::ScalarFunc(name, args) => {
                let mut arg_vars = Vec::with_capacity(args.len());
                for a in args {
                    let v_a = ctx.new_var("tmp");
                    ctx.push_io_vars(v_in.clone(), v_a.clone());
                    a.compile(ctx)?;
                    arg_vars.push(v_a);
                }
                ctx.add_line(format!(
                    "let {v_out} = queryengine::udf::UdfRegistry::global().scalar({name:?})?.func.as_ref()(&[{}])?;",
                    arg_vars.join(", ")
                ));
            }
            Expr::AggFunc(name, args) => {
                let gidx = args
                    .iter()
                    .find_map(find_group_index)
                    .ok_or_else(|| {
                        CompileError::ProtocolViolation(
                            "aggregate has no bound group reference to compile against"
                                .to_string(),
                        )
                    })?;
                let v_group = ctx.new_var("group");
                ctx.add_line(format!(
                    "let {v_group} = {v_in}.values()[{gidx}].as_group().expect(\"__group__ column\");"
                ));
                let v_cols = ctx.new_var("cols");
                ctx.add_line(format!(
                    "let mut {v_cols}: Vec<Vec<queryengine::value::Value>> = Vec::with_capacity({});",
                    args.len()
                ));
                for a in args {
                    let v_col = ctx.new_var("col");
                    ctx.add_line(format!(
                        "let mut {v_col}: Vec<queryengine::value::Value> = Vec::with_capacity({v_group}.len());"
                    ));
                    let v_member = ctx.new_var("member");
                    ctx.add_line(format!("for {v_member} in {v_group} {{"));
                    let v_val = ctx.new_var("val");
                    ctx.push_io_vars(v_member.clone(), v_val.clone());
                    a.compile(ctx)?;
                    ctx.add_line(format!("{v_col}.push({v_val});"));
                    ctx.add_line("}");
                    ctx.add_line(format!("{v_cols}.push({v_col});"));
                }
                ctx.add_line(format!(
                    "let {v_out} = queryengine::udf::UdfRegistry::global().aggregate({name:?})?.func.as_ref()(&{v_cols})?;"
                ));
            }
        }
        Ok(())
    }
}

/// Mark every `Attr` in `e`'s subtree as an aggregate reference (see
/// `Expr::agg_func`).
fn mark_agg_refs(e: &mut Expr) {
    match e {
        Expr::Attr(a) => a.is_agg_ref = true,
        Expr::Paren(inner) => mark_agg_refs(inner),
        Expr::Unary(_, inner) => mark_agg_refs(inner),
        Expr::Binary(_, l, r) => {
            mark_agg_refs(l);
            mark_agg_refs(r);
        }
        Expr::Between(e, lo, hi) => {
            mark_agg_refs(e);
            mark_agg_refs(lo);
            mark_agg_refs(hi);
        }
        Expr::ScalarFunc(_, args) | Expr::AggFunc(_, args) => {
            for a in args {
                mark_agg_refs(a);
            }
        }
        Expr::Literal(_) | Expr::Star(_) => {}
    }
}

/// Walk `e` for the first aggregate-ref `Attr`'s `gidx` (the index of the
/// `__group__` column those attrs were disambiguated against).
fn find_group_index(e: &Expr) -> Option<usize> {
    match e {
        Expr::Attr(a) if a.is_agg_ref => a.gidx,
        Expr::Paren(inner) | Expr::Unary(_, inner) => find_group_index(inner),
        Expr::Binary(_, l, r) => find_group_index(l).or_else(|| find_group_index(r)),
        Expr::Between(e, lo, hi) => find_group_index(e)
            .or_else(|| find_group_index(lo))
            .or_else(|| find_group_index(hi)),
        Expr::ScalarFunc(_, args) | Expr::AggFunc(_, args) => {
            args.iter().find_map(find_group_index)
        }
        _ => None,
    }
}

/// Every `Attr` reachable from `e` (used by disambiguation to collect the
/// set of attribute references an operator's expressions touch).
pub fn collect_attrs<'a>(e: &'a Expr, out: &mut Vec<&'a Attr>) {
    match e {
        Expr::Attr(a) => out.push(a),
        Expr::Paren(inner) | Expr::Unary(_, inner) => collect_attrs(inner, out),
        Expr::Binary(_, l, r) => {
            collect_attrs(l, out);
            collect_attrs(r, out);
        }
        Expr::Between(e, lo, hi) => {
            collect_attrs(e, out);
            collect_attrs(lo, out);
            collect_attrs(hi, out);
        }
        Expr::ScalarFunc(_, args) | Expr::AggFunc(_, args) => {
            for a in args {
                collect_attrs(a, out);
            }
        }
        Expr::Literal(_) | Expr::Star(_) => {}
    }
}

/// Mutable variant of [`collect_attrs`], used by disambiguation to write
/// back `tablename`/`typ`/`idx`/`gidx`.
pub fn collect_attrs_mut<'a>(e: &'a mut Expr, out: &mut Vec<&'a mut Attr>) {
    match e {
        Expr::Attr(a) => out.push(a),
        Expr::Paren(inner) | Expr::Unary(_, inner) => collect_attrs_mut(inner, out),
        Expr::Binary(_, l, r) => {
            collect_attrs_mut(l, out);
            collect_attrs_mut(r, out);
        }
        Expr::Between(e, lo, hi) => {
            collect_attrs_mut(e, out);
            collect_attrs_mut(lo, out);
            collect_attrs_mut(hi, out);
        }
        Expr::ScalarFunc(_, args) | Expr::AggFunc(_, args) => {
            for a in args {
                collect_attrs_mut(a, out);
            }
        }
        Expr::Literal(_) | Expr::Star(_) => {}
    }
}

/// Thin wrappers with stable names, referenced by emitted code text (see
/// `Expr::compile`); identical to `eval_unary`/`eval_binary` but named for
/// what generated call sites need rather than what the interpreter calls.
pub fn apply_unary(op: Op, v: &Value) -> Result<Value, EvalError> {
    eval_unary(op, v)
}

pub fn apply_binary(op: Op, l: &Value, r: &Value) -> Result<Value, EvalError> {
    eval_binary(op, l, r)
}

pub fn apply_between(e: &Value, lo: &Value, hi: &Value) -> Result<Value, EvalError> {
    let ge_lo = eval_binary(Op::Ge, e, lo)?;
    let le_hi = eval_binary(Op::Le, e, hi)?;
    eval_binary(Op::And, &ge_lo, &le_hi)
}

pub fn eval_unary(op: Op, v: &Value) -> Result<Value, EvalError> {
    match op {
        Op::Add => as_num(v).map(Value::Num),
        Op::Sub => as_num(v).map(|n| Value::Num(-n)),
        Op::Not => Ok(Value::Num(if v.is_truthy() { 0.0 } else { 1.0 })),
        _ => Err(EvalError::TypeMismatch(format!(
            "operator {op:?} is not unary"
        ))),
    }
}

pub fn eval_binary(op: Op, l: &Value, r: &Value) -> Result<Value, EvalError> {
    match op {
        Op::Add => Ok(Value::Num(as_num(l)? + as_num(r)?)),
        Op::Sub => Ok(Value::Num(as_num(l)? - as_num(r)?)),
        Op::Mul => Ok(Value::Num(as_num(l)? * as_num(r)?)),
        Op::Div => {
            let rv = as_num(r)?;
            if rv == 0.0 {
                return Err(EvalError::TypeMismatch("division by zero".to_string()));
            }
            Ok(Value::Num(as_num(l)? / rv))
        }
        Op::Eq => Ok(bool_value(values_eq(l, r)?)),
        Op::Neq => Ok(bool_value(!values_eq(l, r)?)),
        Op::Lt => Ok(bool_value(compare(l, r)? == std::cmp::Ordering::Less)),
        Op::Gt => Ok(bool_value(compare(l, r)? == std::cmp::Ordering::Greater)),
        Op::Le => Ok(bool_value(compare(l, r)? != std::cmp::Ordering::Greater)),
        Op::Ge => Ok(bool_value(compare(l, r)? != std::cmp::Ordering::Less)),
        Op::And => Ok(bool_value(l.is_truthy() && r.is_truthy())),
        Op::Or => Ok(bool_value(l.is_truthy() || r.is_truthy())),
        Op::Not => Err(EvalError::TypeMismatch("`not` is not binary".to_string())),
    }
}

fn as_num(v: &Value) -> Result<f64, EvalError> {
    v.as_num()
        .ok_or_else(|| EvalError::TypeMismatch(format!("expected a number, got '{v}'")))
}

fn bool_value(b: bool) -> Value {
    Value::Num(if b { 1.0 } else { 0.0 })
}

fn values_eq(l: &Value, r: &Value) -> Result<bool, EvalError> {
    match (l, r) {
        (Value::Num(a), Value::Num(b)) => Ok(a == b),
        (Value::Str(a), Value::Str(b)) => Ok(a == b),
        (Value::Null, Value::Null) => Ok(true),
        _ => Err(EvalError::TypeMismatch(format!(
            "cannot compare '{l}' and '{r}'"
        ))),
    }
}

fn compare(l: &Value, r: &Value) -> Result<std::cmp::Ordering, EvalError> {
    l.partial_cmp(r)
        .ok_or_else(|| EvalError::TypeMismatch(format!("cannot order '{l}' and '{r}'")))
}

fn literal_rust(v: &Value) -> String {
    match v {
        Value::Num(n) => format!("queryengine::value::Value::Num({n:?})"),
        Value::Str(s) => format!("queryengine::value::Value::str({s:?})"),
        Value::Null => "queryengine::value::Value::Null".to_string(),
        Value::Group(_) => "queryengine::value::Value::Null /* unreachable: literal group */".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_between_is_inclusive_on_both_sides() {
        let e = Expr::Between(
            Box::new(Expr::Literal(Value::Num(5.0))),
            Box::new(Expr::Literal(Value::Num(5.0))),
            Box::new(Expr::Literal(Value::Num(10.0))),
        );
        let row = Tuple::empty();
        assert!(e.eval(&row).unwrap().is_truthy());

        let e2 = Expr::Between(
            Box::new(Expr::Literal(Value::Num(10.0))),
            Box::new(Expr::Literal(Value::Num(5.0))),
            Box::new(Expr::Literal(Value::Num(10.0))),
        );
        assert!(e2.eval(&row).unwrap().is_truthy());
    }

    #[test]
    fn division_by_zero_is_a_type_mismatch_error() {
        let e = Expr::Binary(
            Op::Div,
            Box::new(Expr::Literal(Value::Num(1.0))),
            Box::new(Expr::Literal(Value::Num(0.0))),
        );
        assert!(e.eval(&Tuple::empty()).is_err());
    }

    #[test]
    fn agg_func_marks_nested_attrs() {
        let mut attr = Attr::new("b");
        attr.idx = Some(0);
        let e = Expr::agg_func("sum", vec![Expr::Attr(attr)]);
        if let Expr::AggFunc(_, args) = &e {
            if let Expr::Attr(a) = &args[0] {
                assert!(a.is_agg_ref);
            } else {
                panic!("expected Attr");
            }
        } else {
            panic!("expected AggFunc");
        }
    }
}
