//! Goto/label validation, ported 1:1 from `orz/lua/label.py`. Runs after
//! scope resolution and before codegen: every `Stat::Label` gets a fresh
//! bytecode `Label` handle, every `Stat::Goto` is matched against a label
//! visible in its own block or some enclosing block of the same function,
//! and a `goto` is rejected if it would jump into the scope of a local
//! declared after it.
//!
//! A label is visible to a `goto` anywhere in the same function, in the
//! same block or an enclosing one, but never across a function boundary
//! (`goto` cannot jump into or out of a nested function).

use std::collections::HashMap;

use crate::ast::{Call, Expr, Field, File, Stat, Var};
use crate::bytecode::assembly::Label as BLabel;
use crate::error::{CompileError, Location, Result};

/// One lexical block's label bookkeeping. `gotos` holds every `goto`
/// whose target hasn't been seen yet in this block, alongside a snapshot
/// of how many locals were in scope at the `goto` and the AST slot to
/// fill in once (if ever) the target resolves.
struct LabelTable<'a> {
    labels: HashMap<String, (crate::ast::Pos, BLabel)>,
    gotos: Vec<PendingGotoEntry<'a>>,
    locals: Vec<String>,
}

struct PendingGotoEntry<'a> {
    target: String,
    pos: crate::ast::Pos,
    nlocals: usize,
    slot: &'a std::cell::RefCell<Option<BLabel>>,
}

impl<'a> LabelTable<'a> {
    fn new() -> Self {
        LabelTable { labels: HashMap::new(), gotos: Vec::new(), locals: Vec::new() }
    }

    fn declare_locals(&mut self, names: impl IntoIterator<Item = String>) {
        self.locals.extend(names);
    }

    fn got_label(&mut self, ctx: &Ctx, name: &str, pos: crate::ast::Pos, target: &std::cell::RefCell<Option<BLabel>>) -> Result<()> {
        if let Some((other_pos, _)) = self.labels.get(name) {
            return Err(ctx.err_label(pos, format!("label '{name}' already defined on line {}", other_pos.line)));
        }
        let label = BLabel::new();
        *target.borrow_mut() = Some(label.clone());
        self.labels.insert(name.to_string(), (pos, label.clone()));

        let mut remaining = Vec::new();
        for goto in self.gotos.drain(..) {
            if goto.target == name {
                if goto.nlocals < self.locals.len() {
                    let local = &self.locals[goto.nlocals];
                    return Err(ctx.err_label(
                        goto.pos,
                        format!("<goto {name}> jumps into the scope of local '{local}'"),
                    ));
                }
                *goto.slot.borrow_mut() = Some(label.clone());
            } else {
                remaining.push(goto);
            }
        }
        self.gotos = remaining;
        Ok(())
    }

    fn got_goto(&mut self, name: &str, pos: crate::ast::Pos, slot: &'a std::cell::RefCell<Option<BLabel>>) {
        match self.labels.get(name) {
            Some((_, label)) => *slot.borrow_mut() = Some(label.clone()),
            None => self.gotos.push(PendingGotoEntry {
                target: name.to_string(),
                pos,
                nlocals: self.locals.len(),
                slot,
            }),
        }
    }

    /// Closes the block. At a function boundary (`is_last`) any remaining
    /// pending goto is a hard error — `goto` cannot escape a function.
    fn close(self, ctx: &Ctx, is_last: bool) -> Result<Vec<PendingGotoEntry<'a>>> {
        if is_last {
            if let Some(goto) = self.gotos.into_iter().next() {
                return Err(ctx.err_label(goto.pos, format!("no visible label '{}' for <goto>", goto.target)));
            }
            Ok(Vec::new())
        } else {
            Ok(self.gotos)
        }
    }
}

struct Ctx<'a> {
    filename: &'a str,
    source: &'a str,
}

impl<'a> Ctx<'a> {
    fn err_label(&self, pos: crate::ast::Pos, message: impl Into<String>) -> CompileError {
        let line_text = self.source.lines().nth(pos.line.saturating_sub(1) as usize).unwrap_or("");
        CompileError::label(Location::new(self.filename, pos.line, pos.column, line_text), message)
    }
}

/// Validates every `goto`/label pair in `file`, filling each `Stat::Label`
/// and `Stat::Goto`'s bytecode-target cell on success.
pub fn resolve(file: &File, filename: &str, source: &str) -> Result<()> {
    let ctx = Ctx { filename, source };
    visit_topblock(&ctx, &file.body)
}

/// A function-level (or file-level) body: starts a fresh label table and
/// rejects any goto left pending once the body ends, since labels never
/// cross a function boundary.
fn visit_topblock<'a>(ctx: &Ctx, body: &'a [Stat]) -> Result<()> {
    let mut table = LabelTable::new();
    visit_stats(ctx, &mut table, body)?;
    table.close(ctx, true)?;
    Ok(())
}

/// A nested block: its own label table, but any goto still unresolved at
/// close time bubbles up to `parent` re-evaluated against `parent`'s
/// current locals count, matching the "XXX" comment in the original —
/// a goto crossing a block boundary is checked against each enclosing
/// block's local count in turn, not just the block it started in.
fn visit_subblock<'a>(ctx: &Ctx, parent: &mut LabelTable<'a>, body: &'a [Stat]) -> Result<()> {
    let mut table = LabelTable::new();
    visit_stats(ctx, &mut table, body)?;
    for goto in table.close(ctx, false)? {
        parent.got_goto(&goto.target, goto.pos, goto.slot);
    }
    Ok(())
}

fn visit_stats<'a>(ctx: &Ctx, table: &mut LabelTable<'a>, body: &'a [Stat]) -> Result<()> {
    for stat in body {
        visit_stat(ctx, table, stat)?;
    }
    Ok(())
}

fn visit_stat<'a>(ctx: &Ctx, table: &mut LabelTable<'a>, stat: &'a Stat) -> Result<()> {
    match stat {
        Stat::Label { pos, name, target } => table.got_label(ctx, name, *pos, target)?,
        Stat::Goto { pos, target, label } => table.got_goto(target, *pos, label),
        Stat::Block { body, .. } => visit_subblock(ctx, table, body)?,
        Stat::While { test, body, .. } => {
            visit_lambdas_in_expr(ctx, test)?;
            visit_subblock(ctx, table, body)?;
        }
        Stat::Repeat { body, test, .. } => {
            visit_subblock(ctx, table, body)?;
            visit_lambdas_in_expr(ctx, test)?;
        }
        Stat::If { test, body, orelse, .. } => {
            visit_lambdas_in_expr(ctx, test)?;
            visit_subblock(ctx, table, body)?;
            visit_subblock(ctx, table, orelse)?;
        }
        Stat::For { start, stop, step, body, .. } => {
            visit_lambdas_in_expr(ctx, start)?;
            visit_lambdas_in_expr(ctx, stop)?;
            if let Some(step) = step {
                visit_lambdas_in_expr(ctx, step)?;
            }
            visit_subblock(ctx, table, body)?;
        }
        Stat::ForEach { iter, body, .. } => {
            for e in iter {
                visit_lambdas_in_expr(ctx, e)?;
            }
            visit_subblock(ctx, table, body)?;
        }
        Stat::Function { body, .. } => visit_topblock(ctx, body)?,
        Stat::FunctionLocal { name, body, .. } => {
            visit_topblock(ctx, body)?;
            table.declare_locals([name.id.clone()]);
        }
        Stat::AssignLocal { target, value, .. } => {
            for v in value {
                visit_lambdas_in_expr(ctx, v)?;
            }
            table.declare_locals(target.iter().map(|n| n.id.clone()));
        }
        Stat::Assign { target, value, .. } => {
            for v in value {
                visit_lambdas_in_expr(ctx, v)?;
            }
            for t in target {
                visit_lambdas_in_var(ctx, t)?;
            }
        }
        Stat::CallStatement { body, .. } => visit_lambdas_in_call(ctx, body)?,
        Stat::Return { value, .. } => {
            for v in value {
                visit_lambdas_in_expr(ctx, v)?;
            }
        }
        Stat::Break { .. } => {}
    }
    Ok(())
}

/// `orz/lua/label.py`'s visitor only ever dispatches on statement-level
/// AST types, so a `goto`/label pair hidden inside an anonymous function
/// literal is silently never checked there. This port additionally walks
/// into every `Lambda` found in an expression and validates its body as
/// its own top-level block — goto still cannot cross the function
/// boundary, it's just that the boundary itself is no longer a blind spot.
fn visit_lambdas_in_expr(ctx: &Ctx, expr: &Expr) -> Result<()> {
    match expr {
        Expr::Var(v) => visit_lambdas_in_var(ctx, v)?,
        Expr::Nil(_) | Expr::False(_) | Expr::True(_) | Expr::Number { .. } | Expr::Str { .. } | Expr::Ellipsis { .. } => {}
        Expr::Table { fields, .. } => {
            for Field { key, value, .. } in fields {
                if let Some(k) = key {
                    visit_lambdas_in_expr(ctx, k)?;
                }
                visit_lambdas_in_expr(ctx, value)?;
            }
        }
        Expr::Lambda { body, .. } => visit_topblock(ctx, body)?,
        Expr::BinOp { left, right, .. } => {
            visit_lambdas_in_expr(ctx, left)?;
            visit_lambdas_in_expr(ctx, right)?;
        }
        Expr::UnaryOp { operand, .. } => visit_lambdas_in_expr(ctx, operand)?,
        Expr::Call(c) => visit_lambdas_in_call(ctx, c)?,
        Expr::Method { value, .. } => visit_lambdas_in_expr(ctx, value)?,
    }
    Ok(())
}

fn visit_lambdas_in_var(ctx: &Ctx, var: &Var) -> Result<()> {
    match var {
        Var::Name(_) => {}
        Var::Subscript { value, slice, .. } => {
            visit_lambdas_in_expr(ctx, value)?;
            visit_lambdas_in_expr(ctx, slice)?;
        }
        Var::Attribute { value, .. } => visit_lambdas_in_expr(ctx, value)?,
    }
    Ok(())
}

fn visit_lambdas_in_call(ctx: &Ctx, call: &Call) -> Result<()> {
    visit_lambdas_in_expr(ctx, &call.func)?;
    for a in &call.args {
        visit_lambdas_in_expr(ctx, a)?;
    }
    Ok(())
}
