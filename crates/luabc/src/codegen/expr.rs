//! Expression and addressable-target (`Var`) lowering.

use super::{visit_exp, visit_fields, visit_function, visit_name, visit_symbol, Ctx, Env};
use crate::ast::{Call, Expr, Var};
use crate::bytecode::assembly::{Assembly, Const};
use crate::bytecode::opcode::Opcode;
use crate::error::Result;
use crate::number::{parse_numeral, LuaNumber};

pub(crate) fn visit_var(asm: &mut Assembly, env: &Env, var: &Var, context: Ctx) -> Result<()> {
    asm.set_lineno(var.pos().line);
    match var {
        Var::Name(name) => visit_name(asm, env, name, context),
        Var::Subscript { value, slice, .. } => {
            visit_expr(asm, &env.with_context(Ctx::Load), value)?;
            visit_expr(asm, &env.with_context(Ctx::Load), slice)?;
            match context {
                Ctx::Load => asm.emit(Opcode::BinarySubscr),
                Ctx::Store => asm.emit(Opcode::StoreSubscr),
                Ctx::Skip => {}
            }
        }
        Var::Attribute { value, attr, .. } => {
            visit_expr(asm, &env.with_context(Ctx::Load), value)?;
            asm.set_lineno(attr.pos.line);
            let sref = env.stringtable.borrow_mut().add(attr.id.as_bytes(), true);
            asm.load_const(Const::Str(sref));
            match context {
                Ctx::Load => asm.emit(Opcode::BinarySubscr),
                Ctx::Store => asm.emit(Opcode::StoreSubscr),
                Ctx::Skip => {}
            }
        }
    }
    Ok(())
}

pub(crate) fn visit_expr(asm: &mut Assembly, env: &Env, expr: &Expr) -> Result<()> {
    asm.set_lineno(expr.pos().line);
    match expr {
        Expr::Var(var) => visit_var(asm, env, var, env.context)?,
        Expr::Nil(_) => asm.load_const(Const::Nil),
        Expr::False(_) => asm.load_const(Const::Bool(false)),
        Expr::True(_) => asm.load_const(Const::Bool(true)),
        Expr::Number { text, .. } => match parse_numeral(text) {
            LuaNumber::Int(v) => asm.load_const(Const::Int(v)),
            LuaNumber::Float(v) => asm.load_const(Const::Float(v)),
        },
        Expr::Str { value, .. } => {
            let sref = env.stringtable.borrow_mut().add(value, false);
            asm.load_const(Const::Str(sref));
        }
        Expr::Ellipsis { symbol, .. } => {
            let symbol = symbol.borrow().clone().expect("'...' must be scope-resolved");
            visit_symbol(asm, &symbol, Ctx::Load);
        }
        Expr::Table { fields, luatable, .. } => visit_table(asm, env, fields, luatable)?,
        Expr::Lambda { args, body, symtable, pos, .. } => {
            visit_function(asm, env, "<lambda>", pos.line, args, body, symtable)?;
        }
        Expr::BinOp { left, right, op_symbol, .. } => {
            let op_symbol = op_symbol.borrow().clone().expect("binop must be scope-resolved");
            visit_symbol(asm, &op_symbol, Ctx::Load);
            visit_expr(asm, &env.with_context(Ctx::Load), left)?;
            visit_expr(asm, &env.with_context(Ctx::Load), right)?;
            asm.emit_imm(Opcode::CallFunction, 2);
        }
        Expr::UnaryOp { operand, op_symbol, .. } => {
            let op_symbol = op_symbol.borrow().clone().expect("unop must be scope-resolved");
            visit_symbol(asm, &op_symbol, Ctx::Load);
            visit_expr(asm, &env.with_context(Ctx::Load), operand)?;
            asm.emit_imm(Opcode::CallFunction, 1);
        }
        Expr::Call(call) => visit_call(asm, env, call)?,
        Expr::Method { value, method, .. } => {
            visit_expr(asm, &env.with_context(Ctx::Load), value)?;
            if env.context == Ctx::Load {
                asm.emit(Opcode::DupTop);
            }
            asm.set_lineno(method.pos.line);
            let sref = env.stringtable.borrow_mut().add(method.id.as_bytes(), true);
            asm.load_const(Const::Str(sref));
            match env.context {
                Ctx::Load => {
                    asm.emit(Opcode::BinarySubscr);
                    asm.emit(Opcode::RotTwo);
                }
                Ctx::Store => asm.emit(Opcode::StoreSubscr),
                Ctx::Skip => {}
            }
        }
    }
    Ok(())
}

pub(crate) fn visit_call(asm: &mut Assembly, env: &Env, call: &Call) -> Result<()> {
    visit_exp(asm, env, &call.func)?;

    let extra_args: i64 = if matches!(call.func.as_ref(), Expr::Method { .. }) { 1 } else { 0 };

    let Some((last, init)) = call.args.split_last() else {
        asm.emit_imm(Opcode::CallFunction, extra_args);
        return Ok(());
    };

    for a in init {
        visit_exp(asm, env, a)?;
    }

    visit_expr(asm, &env.with_context(Ctx::Load), last)?;

    if !matches!(last, Expr::Ellipsis { .. } | Expr::Call(_)) {
        asm.emit_imm(Opcode::CallFunction, (extra_args + call.args.len() as i64) & 0xff);
    } else {
        asm.emit_imm(Opcode::CallFunctionVar, (extra_args + (call.args.len() as i64 - 1)) & 0xff);
    }
    Ok(())
}

/// `LOAD_GLOBAL LuaTable; BUILD_MAP; <fields>; CALL_FUNCTION 2` when no
/// field needs runtime expansion; otherwise the fixed fields are built the
/// same way and a `FOR_ITER`-driven loop extends the map with the
/// trailing multi-valued field's values, keeping the running integer key
/// in sync via a small rotation dance ported from the original.
fn visit_table(
    asm: &mut Assembly,
    env: &Env,
    fields: &[crate::ast::Field],
    luatable: &std::cell::RefCell<Option<crate::symbol::Symbol>>,
) -> Result<()> {
    let luatable = luatable.borrow().clone().expect("table literal must be scope-resolved");
    visit_symbol(asm, &luatable, Ctx::Load);

    let trailing_multi = fields.last().is_some_and(|f| {
        f.key.is_none() && matches!(f.value, Expr::Call(_) | Expr::Ellipsis { .. })
    });

    if !trailing_multi {
        let next = visit_fields(asm, env, fields)?;
        asm.load_const(Const::Int(next));
        asm.emit_imm(Opcode::CallFunction, 2);
        return Ok(());
    }

    let (last, init) = fields.split_last().expect("trailing_multi implies at least one field");
    let next = visit_fields(asm, env, init)?;

    asm.load_const(Const::Int(next));

    visit_expr(asm, &env.with_context(Ctx::Load), &last.value)?;
    asm.emit(Opcode::GetIter);

    let (l_before, l_after) = (asm.get_label(), asm.get_label());
    asm.place_label(&l_before);

    let stacksize = asm.stacksize();
    asm.emit_jump(Opcode::ForIter, l_after.clone());

    asm.emit(Opcode::RotThree);
    asm.emit(Opcode::RotFour);
    asm.emit(Opcode::DupTop);
    asm.emit(Opcode::RotFour);
    asm.emit(Opcode::StoreMap);
    asm.emit(Opcode::RotThree);
    asm.load_const(Const::Int(1));
    asm.emit(Opcode::BinaryAdd);
    asm.emit(Opcode::RotTwo);

    asm.emit_jump(Opcode::JumpAbsolute, l_before);
    super::assert_stack(asm, stacksize)?;

    asm.set_stacksize(stacksize - 1);
    asm.place_label(&l_after);

    asm.emit_imm(Opcode::CallFunction, 2);
    Ok(())
}
