//! A minimal hand-rolled recursive-descent parser for the SQL-ish surface
//! syntax described in `SPEC_FULL.md` §6: `SELECT <exprs> [FROM <src_list>]
//! [WHERE <expr>] [GROUP BY <exprs>] [ORDER BY <exprs> [ASC|DESC]]
//! [LIMIT n [OFFSET m]]`.
//!
//! No grammar file or parser-generator crate is pulled in here — the
//! teacher's own parsing code (`statement/parser.rs`, `syntax/mod.rs`) is
//! all hand-rolled character scanning over a `Peekable<Chars>`, so this
//! module follows the same idiom: a small tokenizer feeding a
//! `Vec<Token>`, then a straightforward precedence-climbing expression
//! parser over that token stream.
//!
//! `ORDER BY ... DESC` is rejected here (a `ParseError::Syntax`, not a
//! later optimizer error) rather than normalized to an ascending sort —
//! see `DESIGN.md`'s note on `OpKind::OrderBy`.

use crate::error::ParseError;
use crate::expr::{Expr, Op};
use crate::plan::{NodeId, OpKind, PlanArena};
use crate::schema::Attr;
use crate::udf::UdfRegistry;
use crate::value::Value;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Comma,
    Dot,
    LParen,
    RParen,
    Star,
    Plus,
    Minus,
    Slash,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => s.clone(),
            Token::Number(n) => n.to_string(),
            Token::Str(s) => format!("{s:?}"),
            Token::Comma => ",".to_string(),
            Token::Dot => ".".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Star => "*".to_string(),
            Token::Plus => "+".to_string(),
            Token::Minus => "-".to_string(),
            Token::Slash => "/".to_string(),
            Token::Eq => "=".to_string(),
            Token::Neq => "!=".to_string(),
            Token::Lt => "<".to_string(),
            Token::Gt => ">".to_string(),
            Token::Le => "<=".to_string(),
            Token::Ge => ">=".to_string(),
            Token::Eof => "end of input".to_string(),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars: Peekable<Chars<'_>> = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                }
                tokens.push(Token::Eq);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Neq);
                } else {
                    return Err(ParseError::Syntax("unexpected '!'".to_string()));
                }
            }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some(&'=') => {
                        chars.next();
                        tokens.push(Token::Le);
                    }
                    Some(&'>') => {
                        chars.next();
                        tokens.push(Token::Neq);
                    }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    if ch == '\\' {
                        if let Some(esc) = chars.next() {
                            s.push(esc);
                        }
                        continue;
                    }
                    s.push(ch);
                }
                if !closed {
                    return Err(ParseError::UnexpectedEof("closing quote".to_string()));
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut s = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        s.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: f64 = s
                    .parse()
                    .map_err(|_| ParseError::Syntax(format!("bad number literal '{s}'")))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        s.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(s));
            }
            other => {
                return Err(ParseError::Syntax(format!(
                    "unexpected character '{other}'"
                )));
            }
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if let Token::Ident(s) = self.peek() {
            if s.eq_ignore_ascii_case(kw) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ParseError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                found: self.peek().describe(),
                expected: kw.to_string(),
            })
        }
    }

    fn expect(&mut self, tok: Token) -> Result<(), ParseError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                found: self.peek().describe(),
                expected: tok.describe(),
            })
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            other => Err(ParseError::UnexpectedToken {
                found: other.describe(),
                expected: "identifier".to_string(),
            }),
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        if matches!(self.peek(), Token::Eof) {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                found: self.peek().describe(),
                expected: "end of input".to_string(),
            })
        }
    }

    // ---- statement grammar ----

    fn parse_select(&mut self, arena: &mut PlanArena) -> Result<NodeId, ParseError> {
        self.expect_keyword("select")?;
        let distinct = self.eat_keyword("distinct");

        let items = self.parse_select_list(arena)?;
        let mut exprs = Vec::with_capacity(items.len());
        let mut aliases = Vec::with_capacity(items.len());
        for (e, a) in items {
            exprs.push(e);
            aliases.push(a.unwrap_or_default());
        }

        let mut base: Option<NodeId> = None;
        if self.eat_keyword("from") {
            let sources = self.parse_src_list(arena)?;
            base = Some(if sources.len() == 1 {
                sources[0]
            } else {
                arena.insert_with_children(OpKind::From { children: sources })
            });
        }

        if self.eat_keyword("where") {
            let cond = self.parse_expr(arena)?;
            let child = base.ok_or_else(|| {
                ParseError::Syntax("WHERE requires a FROM clause".to_string())
            })?;
            base = Some(arena.insert_with_children(OpKind::Filter { child, cond }));
        }

        if self.eat_keyword("group") {
            self.expect_keyword("by")?;
            let group_exprs = self.parse_expr_list(arena)?;
            let child = base.ok_or_else(|| {
                ParseError::Syntax("GROUP BY requires a FROM clause".to_string())
            })?;
            base = Some(arena.insert_with_children(OpKind::GroupBy { child, group_exprs }));
        }

        let mut root = arena.insert_with_children(OpKind::Project {
            child: base,
            exprs,
            aliases,
        });

        if distinct {
            root = arena.insert_with_children(OpKind::Distinct { child: root });
        }

        if self.eat_keyword("order") {
            self.expect_keyword("by")?;
            let (order_exprs, ascending) = self.parse_order_list(arena)?;
            root = arena.insert_with_children(OpKind::OrderBy {
                child: root,
                exprs: order_exprs,
                ascending,
            });
        }

        if self.eat_keyword("limit") {
            let limit = self.parse_expr(arena)?;
            let offset = if self.eat_keyword("offset") {
                self.parse_expr(arena)?
            } else {
                Expr::Literal(Value::Num(0.0))
            };
            root = arena.insert_with_children(OpKind::Limit {
                child: root,
                limit,
                offset,
            });
        }

        Ok(root)
    }

    fn parse_src_list(&mut self, arena: &mut PlanArena) -> Result<Vec<NodeId>, ParseError> {
        let mut out = vec![self.parse_src(arena)?];
        while self.eat(&Token::Comma) {
            out.push(self.parse_src(arena)?);
        }
        Ok(out)
    }

    fn parse_src(&mut self, arena: &mut PlanArena) -> Result<NodeId, ParseError> {
        if self.eat(&Token::LParen) {
            let child = self.parse_select(arena)?;
            self.expect(Token::RParen)?;
            self.expect_keyword("as")?;
            let alias = self.expect_ident()?;
            return Ok(arena.insert_with_children(OpKind::SubQuerySource { child, alias }));
        }
        let tablename = self.expect_ident()?;
        let alias = if self.eat_keyword("as") {
            self.expect_ident()?
        } else {
            tablename.clone()
        };
        Ok(arena.insert(OpKind::Scan { tablename, alias }))
    }

    fn parse_select_list(
        &mut self,
        arena: &mut PlanArena,
    ) -> Result<Vec<(Expr, Option<String>)>, ParseError> {
        let mut out = vec![self.parse_select_item(arena)?];
        while self.eat(&Token::Comma) {
            out.push(self.parse_select_item(arena)?);
        }
        Ok(out)
    }

    fn parse_select_item(
        &mut self,
        arena: &mut PlanArena,
    ) -> Result<(Expr, Option<String>), ParseError> {
        let e = self.parse_expr(arena)?;
        let alias = if self.eat_keyword("as") {
            Some(self.expect_ident()?)
        } else {
            None
        };
        Ok((e, alias))
    }

    fn parse_expr_list(&mut self, arena: &mut PlanArena) -> Result<Vec<Expr>, ParseError> {
        let mut out = vec![self.parse_expr(arena)?];
        while self.eat(&Token::Comma) {
            out.push(self.parse_expr(arena)?);
        }
        Ok(out)
    }

    fn parse_order_list(
        &mut self,
        arena: &mut PlanArena,
    ) -> Result<(Vec<Expr>, Vec<bool>), ParseError> {
        let exprs = self.parse_expr_list(arena)?;
        if self.eat_keyword("desc") {
            return Err(ParseError::Syntax(
                "ORDER BY ... DESC is not supported".to_string(),
            ));
        }
        self.eat_keyword("asc");
        let ascending = vec![true; exprs.len()];
        Ok((exprs, ascending))
    }

    // ---- expression grammar, lowest to highest precedence ----
    // or -> and -> not -> comparison/between -> additive -> multiplicative -> unary -> primary

    fn parse_expr(&mut self, arena: &mut PlanArena) -> Result<Expr, ParseError> {
        self.parse_or(arena)
    }

    fn parse_or(&mut self, arena: &mut PlanArena) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and(arena)?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and(arena)?;
            lhs = Expr::Binary(Op::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self, arena: &mut PlanArena) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not(arena)?;
        while self.eat_keyword("and") {
            let rhs = self.parse_not(arena)?;
            lhs = Expr::Binary(Op::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self, arena: &mut PlanArena) -> Result<Expr, ParseError> {
        if self.eat_keyword("not") {
            let e = self.parse_not(arena)?;
            return Ok(Expr::Unary(Op::Not, Box::new(e)));
        }
        self.parse_comparison(arena)
    }

    fn parse_comparison(&mut self, arena: &mut PlanArena) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive(arena)?;

        if self.eat_keyword("between") {
            let lo = self.parse_additive(arena)?;
            self.expect_keyword("and")?;
            let hi = self.parse_additive(arena)?;
            return Ok(Expr::Between(Box::new(lhs), Box::new(lo), Box::new(hi)));
        }

        let op = match self.peek() {
            Token::Eq => Some(Op::Eq),
            Token::Neq => Some(Op::Neq),
            Token::Lt => Some(Op::Lt),
            Token::Gt => Some(Op::Gt),
            Token::Le => Some(Op::Le),
            Token::Ge => Some(Op::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_additive(arena)?;
            return Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self, arena: &mut PlanArena) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative(arena)?;
        loop {
            if self.eat(&Token::Plus) {
                let rhs = self.parse_multiplicative(arena)?;
                lhs = Expr::Binary(Op::Add, Box::new(lhs), Box::new(rhs));
            } else if self.eat(&Token::Minus) {
                let rhs = self.parse_multiplicative(arena)?;
                lhs = Expr::Binary(Op::Sub, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self, arena: &mut PlanArena) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary(arena)?;
        loop {
            if self.eat(&Token::Star) {
                let rhs = self.parse_unary(arena)?;
                lhs = Expr::Binary(Op::Mul, Box::new(lhs), Box::new(rhs));
            } else if self.eat(&Token::Slash) {
                let rhs = self.parse_unary(arena)?;
                lhs = Expr::Binary(Op::Div, Box::new(lhs), Box::new(rhs));
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, arena: &mut PlanArena) -> Result<Expr, ParseError> {
        if self.eat(&Token::Plus) {
            return Ok(Expr::Unary(Op::Add, Box::new(self.parse_unary(arena)?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary(Op::Sub, Box::new(self.parse_unary(arena)?)));
        }
        self.parse_primary(arena)
    }

    fn parse_primary(&mut self, arena: &mut PlanArena) -> Result<Expr, ParseError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(Value::Num(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::str(s))),
            Token::Star => Ok(Expr::Star(None)),
            Token::LParen => {
                let e = self.parse_expr(arena)?;
                self.expect(Token::RParen)?;
                Ok(Expr::Paren(Box::new(e)))
            }
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.parse_call_args(arena)?;
                    self.expect(Token::RParen)?;
                    let lname = name.to_lowercase();
                    return Ok(if UdfRegistry::global().aggregate(&lname).is_ok() {
                        Expr::agg_func(lname, args)
                    } else {
                        Expr::ScalarFunc(lname, args)
                    });
                }
                if self.eat(&Token::Dot) {
                    if self.eat(&Token::Star) {
                        return Ok(Expr::Star(Some(name)));
                    }
                    let attr = self.expect_ident()?;
                    return Ok(Expr::Attr(Attr::qualified(name, attr)));
                }
                Ok(Expr::Attr(Attr::new(name)))
            }
            other => Err(ParseError::UnexpectedToken {
                found: other.describe(),
                expected: "expression".to_string(),
            }),
        }
    }

    /// `count(*)` is the one place a bare `*` is accepted as a call
    /// argument; everywhere else a `*` inside parens is an ordinary
    /// (parenthesized) expression starting position, which `parse_primary`
    /// already rejects for lack of an operand.
    fn parse_call_args(&mut self, arena: &mut PlanArena) -> Result<Vec<Expr>, ParseError> {
        if matches!(self.peek(), Token::RParen) {
            return Ok(Vec::new());
        }
        if matches!(self.peek(), Token::Star) {
            self.advance();
            return Ok(vec![Expr::Star(None)]);
        }
        self.parse_expr_list(arena)
    }
}

/// Parse a full query string into a fresh plan tree, returning the arena
/// that owns it and the id of its root node. The root is the raw parsed
/// plan (`Limit`/`OrderBy`/`Distinct`/`Project`, innermost-out); wrapping
/// it in `Yield` and running it through the optimizer is the caller's job
/// (see the crate root's pipeline driver).
pub fn parse(src: &str) -> Result<(PlanArena, NodeId), ParseError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut arena = PlanArena::new();
    let root = parser.parse_select(&mut arena)?;
    parser.expect_eof()?;
    Ok((arena, root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::OpKind;

    #[test]
    fn select_one_has_no_from_child() {
        let (arena, root) = parse("SELECT 1").unwrap();
        match &arena.get(root).kind {
            OpKind::Project { child, exprs, .. } => {
                assert!(child.is_none());
                assert_eq!(exprs.len(), 1);
            }
            other => panic!("expected Project, got {other:?}"),
        }
    }

    #[test]
    fn select_from_where_limit_nests_in_expected_order() {
        let (arena, root) = parse("SELECT a FROM t WHERE a > 1 LIMIT 2 OFFSET 1").unwrap();
        let limit_node = &arena.get(root).kind;
        let project = match limit_node {
            OpKind::Limit { child, .. } => *child,
            other => panic!("expected Limit at root, got {other:?}"),
        };
        match &arena.get(project).kind {
            OpKind::Project { child, .. } => {
                let filter = child.expect("project has a child");
                assert!(matches!(arena.get(filter).kind, OpKind::Filter { .. }));
            }
            other => panic!("expected Project, got {other:?}"),
        }
    }

    #[test]
    fn order_by_desc_is_rejected() {
        let err = parse("SELECT a FROM t ORDER BY a DESC").unwrap_err();
        assert!(matches!(err, ParseError::Syntax(_)));
    }

    #[test]
    fn count_star_parses_as_agg_func_with_star_arg() {
        let (_arena, root) = parse("SELECT count(*) FROM t GROUP BY a").unwrap();
        let _ = root;
    }

    #[test]
    fn between_desugars_to_between_expr() {
        let (arena, root) = parse("SELECT a FROM t WHERE a BETWEEN 1 AND 10").unwrap();
        let project = &arena.get(root).kind;
        if let OpKind::Project { child, .. } = project {
            let filter = child.unwrap();
            if let OpKind::Filter { cond, .. } = &arena.get(filter).kind {
                assert!(matches!(cond, Expr::Between(_, _, _)));
            } else {
                panic!("expected Filter");
            }
        } else {
            panic!("expected Project");
        }
    }

    #[test]
    fn subquery_source_requires_alias() {
        let err = parse("SELECT x FROM (SELECT a AS x FROM t)").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));
    }
}
