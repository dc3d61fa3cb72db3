//! Expression parsing: precedence climbing over the binary-operator table
//! (ported from `orz/lua/parse.py`'s PLY `precedence` tuple), plus
//! `simpleexp`/`suffixedexp`/`primaryexp` shaped after
//! `examples/CppCXY-lua-rs/crates/luars/src/compiler/expr_parser.rs`'s
//! `subexpr`/`simpleexp`/`suffixedexp` split.

use std::cell::RefCell;

use super::Parser;
use crate::ast::{BinOpKind, Call, Expr, Field, UnaryOpKind, Var};
use crate::error::Result;
use crate::lexer::token::TokenKind;

/// `(op, left binding power, right binding power)`. Left-assoc operators
/// recurse on the right with `limit = left_power` (equal-precedence chains
/// get consumed by the caller's loop, building a left-leaning tree);
/// right-assoc `^` recurses with `limit = left_power - 1` so a chain of
/// `^` nests on the right instead.
fn binop(kind: TokenKind) -> Option<(BinOpKind, u8, u8)> {
    Some(match kind {
        TokenKind::Or => (BinOpKind::Or, 1, 1),
        TokenKind::And => (BinOpKind::And, 2, 2),
        TokenKind::Lt => (BinOpKind::Lt, 3, 3),
        TokenKind::Gt => (BinOpKind::Gt, 3, 3),
        TokenKind::Le => (BinOpKind::Le, 3, 3),
        TokenKind::Ge => (BinOpKind::Ge, 3, 3),
        TokenKind::Eq => (BinOpKind::Eq, 3, 3),
        TokenKind::Ne => (BinOpKind::Ne, 3, 3),
        // `orz/lua/parse.py` lists CONCAT as `('left', 'CONCAT')` even
        // though real Lua defines `..` as right-associative — followed
        // here faithfully; see DESIGN.md's Open Question entry.
        TokenKind::Concat => (BinOpKind::Concat, 4, 4),
        TokenKind::Plus => (BinOpKind::Add, 5, 5),
        TokenKind::Minus => (BinOpKind::Sub, 5, 5),
        TokenKind::Star => (BinOpKind::Mul, 6, 6),
        TokenKind::Slash => (BinOpKind::Div, 6, 6),
        TokenKind::Percent => (BinOpKind::Mod, 6, 6),
        TokenKind::Caret => (BinOpKind::Pow, 8, 7),
        _ => return None,
    })
}

/// Comparisons are `nonassoc` in the original grammar: `a < b < c` is
/// rejected rather than silently read as `(a < b) < c`.
fn is_nonassoc(op: BinOpKind) -> bool {
    matches!(op, BinOpKind::Lt | BinOpKind::Gt | BinOpKind::Le | BinOpKind::Ge | BinOpKind::Eq | BinOpKind::Ne)
}

const UNARY_POWER: u8 = 7;

pub fn parse_expr(p: &mut Parser<'_>) -> Result<Expr> {
    parse_subexpr(p, 0)
}

fn parse_subexpr(p: &mut Parser<'_>, limit: u8) -> Result<Expr> {
    let mut left = if let Some(op) = unop(p.kind()) {
        let pos = p.pos_here();
        p.bump();
        let operand = parse_subexpr(p, UNARY_POWER)?;
        Expr::UnaryOp { pos, op, operand: Box::new(operand), op_symbol: RefCell::new(None) }
    } else {
        parse_simpleexp(p)?
    };

    loop {
        let Some((op, left_power, right_power)) = binop(p.kind()) else { break };
        if left_power <= limit {
            break;
        }
        let pos = p.pos_here();
        p.bump();
        let right_limit = if matches!(op, BinOpKind::Pow) { right_power } else { left_power };
        let right = parse_subexpr(p, right_limit)?;
        left = Expr::BinOp { pos, op, left: Box::new(left), right: Box::new(right), op_symbol: RefCell::new(None) };
        if is_nonassoc(op) {
            break;
        }
    }

    Ok(left)
}

fn unop(kind: TokenKind) -> Option<UnaryOpKind> {
    Some(match kind {
        TokenKind::Not => UnaryOpKind::Not,
        TokenKind::Hash => UnaryOpKind::Len,
        TokenKind::Minus => UnaryOpKind::Neg,
        _ => return None,
    })
}

/// `simpleexp` — literals, table/function literals, or a suffixed
/// prefix expression (`var`/`functioncall`/parenthesized).
fn parse_simpleexp(p: &mut Parser<'_>) -> Result<Expr> {
    let pos = p.pos_here();
    match p.kind() {
        TokenKind::Nil => {
            p.bump();
            Ok(Expr::Nil(pos))
        }
        TokenKind::True => {
            p.bump();
            Ok(Expr::True(pos))
        }
        TokenKind::False => {
            p.bump();
            Ok(Expr::False(pos))
        }
        TokenKind::Number => {
            let tok = p.bump();
            Ok(Expr::Number { pos, text: tok.text.to_string() })
        }
        TokenKind::Str => {
            let tok = p.bump();
            Ok(Expr::Str { pos, value: tok.bytes })
        }
        TokenKind::Ellipsis => {
            p.bump();
            Ok(Expr::Ellipsis { pos, symbol: RefCell::new(None) })
        }
        TokenKind::LBrace => parse_table(p),
        TokenKind::Function => {
            p.bump();
            let (args, body, varargs) = p.parse_funcbody()?;
            Ok(Expr::Lambda { pos, args, body, varargs, symtable: RefCell::new(None) })
        }
        _ => parse_suffixedexp(p),
    }
}

/// `prefixexp { '.' name | '[' exp ']' | ':' name args | args }` —
/// `orz`'s grammar splits `var`/`functioncall`/`prefixexp` into separate
/// nonterminals reached through left recursion; a single suffix loop over
/// one parsed primary expression is the direct-recursion equivalent.
pub fn parse_suffixedexp(p: &mut Parser<'_>) -> Result<Expr> {
    let mut expr = parse_primaryexp(p)?;
    loop {
        let pos = p.pos_here();
        match p.kind() {
            TokenKind::Dot => {
                p.bump();
                let attr = p.parse_name()?;
                expr = Expr::Var(Var::Attribute { pos, value: Box::new(expr), attr });
            }
            TokenKind::LBracket => {
                p.bump();
                let slice = parse_expr(p)?;
                p.expect(TokenKind::RBracket)?;
                expr = Expr::Var(Var::Subscript { pos, value: Box::new(expr), slice: Box::new(slice) });
            }
            TokenKind::Colon => {
                p.bump();
                let method = p.parse_name()?;
                let args = parse_args(p)?;
                expr = Expr::Call(Call {
                    pos,
                    func: Box::new(Expr::Method { pos, value: Box::new(expr), method }),
                    args,
                });
            }
            TokenKind::LParen | TokenKind::Str | TokenKind::LBrace => {
                let args = parse_args(p)?;
                expr = Expr::Call(Call { pos, func: Box::new(expr), args });
            }
            _ => break,
        }
    }
    Ok(expr)
}

fn parse_primaryexp(p: &mut Parser<'_>) -> Result<Expr> {
    let pos = p.pos_here();
    match p.kind() {
        TokenKind::LParen => {
            p.bump();
            let inner = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(inner)
        }
        TokenKind::Name => {
            let name = p.parse_name()?;
            Ok(Expr::Var(Var::Name(name)))
        }
        _ => Err(p.err_syntax_at(pos, format!("unexpected symbol near {}", p.kind().describe()))),
    }
}

pub fn parse_args(p: &mut Parser<'_>) -> Result<Vec<Expr>> {
    match p.kind() {
        TokenKind::LParen => {
            p.bump();
            let args = if p.check(TokenKind::RParen) {
                Vec::new()
            } else {
                p.parse_explist()?
            };
            p.expect(TokenKind::RParen)?;
            Ok(args)
        }
        TokenKind::LBrace => Ok(vec![parse_table(p)?]),
        TokenKind::Str => {
            let pos = p.pos_here();
            let tok = p.bump();
            Ok(vec![Expr::Str { pos, value: tok.bytes }])
        }
        _ => Err(p.err_syntax_at(p.pos_here(), "function arguments expected")),
    }
}

/// `{ fieldlist }`. A positional entry is a `Field` with `key: None`; a
/// `name = exp`/`[exp] = exp` entry carries its key — the same shape
/// `orz/lua/ast.py`'s `Field`/bare-expression list mixes, flattened here
/// into one uniform `Field` per slot.
fn parse_table(p: &mut Parser<'_>) -> Result<Expr> {
    let pos = p.pos_here();
    p.expect(TokenKind::LBrace)?;
    let mut fields = Vec::new();
    while !p.check(TokenKind::RBrace) {
        fields.push(parse_field(p)?);
        if !p.eat(TokenKind::Comma) && !p.eat(TokenKind::Semi) {
            break;
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(Expr::Table { pos, fields, luatable: RefCell::new(None) })
}

fn parse_field(p: &mut Parser<'_>) -> Result<Field> {
    let pos = p.pos_here();
    if p.check(TokenKind::LBracket) {
        p.bump();
        let key = parse_expr(p)?;
        p.expect(TokenKind::RBracket)?;
        p.expect(TokenKind::Assign)?;
        let value = parse_expr(p)?;
        return Ok(Field { pos, key: Some(key), value });
    }
    if p.check(TokenKind::Name) && p.peek_is(1, TokenKind::Assign) {
        let name = p.parse_name()?;
        p.expect(TokenKind::Assign)?;
        let value = parse_expr(p)?;
        return Ok(Field { pos, key: Some(Expr::Str { pos, value: name.id.into_bytes() }), value });
    }
    let value = parse_expr(p)?;
    Ok(Field { pos, key: None, value })
}
