//! Statement lowering.

use super::{
    is_multi_value, prepare_assign, store_funcname, to_boolean, visit_call, visit_exp, visit_explist,
    visit_expr, visit_function, visit_symbol, visit_var, Ctx, Env,
};
use crate::ast::{Stat, Var};
use crate::bytecode::assembly::{Assembly, Const};
use crate::bytecode::opcode::Opcode;
use crate::error::{CompileError, Result};

pub(crate) fn visit_stat(asm: &mut Assembly, env: &Env, stat: &Stat) -> Result<()> {
    asm.set_lineno(stat.pos().line);
    match stat {
        Stat::Assign { target, value, .. } => visit_assign(asm, env, target, value)?,
        Stat::AssignLocal { target, value, .. } => visit_assign_local(asm, env, target, value)?,
        Stat::CallStatement { body, .. } => {
            visit_call(asm, &env.with_context(Ctx::Load), body)?;
            asm.emit(Opcode::PopTop);
        }
        Stat::Label { target, .. } => {
            let label = target.borrow().clone().expect("label must be resolved");
            asm.place_label(&label);
        }
        Stat::Goto { label, .. } => {
            let label = label.borrow().clone().expect("goto must be resolved");
            asm.emit_jump(Opcode::JumpAbsolute, label);
        }
        Stat::Block { body, .. } => super::visit_block(asm, env, body, false)?,
        Stat::While { test, body, .. } => visit_while(asm, env, test, body)?,
        Stat::Repeat { body, test, .. } => visit_repeat(asm, env, body, test)?,
        Stat::If { test, body, orelse, .. } => visit_if(asm, env, test, body, orelse)?,
        Stat::For { start, stop, step, target, body, loopvar, validate_forloop, .. } => {
            visit_for(asm, env, start, stop, step.as_ref(), target, body, loopvar, validate_forloop)?;
        }
        Stat::ForEach { iter, target, body, loopvar, .. } => {
            visit_foreach(asm, env, iter, target, body, loopvar)?;
        }
        Stat::Function { name, args, body, symtable, pos, .. } => {
            let leaf = funcname_leaf(name);
            visit_function(asm, env, &leaf.id, pos.line, args, body, symtable)?;
            store_funcname(asm, env, name)?;
        }
        Stat::FunctionLocal { name, args, body, symtable, pos, .. } => {
            visit_function(asm, env, &name.id, pos.line, args, body, symtable)?;
            crate::codegen::visit_name(asm, env, name, Ctx::Store);
        }
        Stat::Return { value, .. } => {
            visit_explist(asm, env, value)?;
            asm.emit(Opcode::ReturnValue);
        }
        Stat::Break { .. } => {
            let target = env.break_target.clone().expect("break must be inside a loop");
            asm.emit_jump(Opcode::JumpAbsolute, target);
        }
    }
    Ok(())
}

fn funcname_leaf(name: &crate::ast::FuncName) -> &crate::ast::Name {
    use crate::ast::FuncName;
    match name {
        FuncName::Name(n) => n,
        FuncName::Attribute { attr, .. } => attr,
        FuncName::Method { method, .. } => method,
    }
}

/// `a, b.x, t[k] = v1, v2, v3`. Every `Subscript`/`Attribute` target has
/// its container+key pair evaluated up front (in `Skip` context, so
/// neither a load nor a store opcode escapes), bundled through a
/// `BUILD_TUPLE`/`UNPACK_SEQUENCE` round trip that reorders them to match
/// the iteration order the store loop below needs, then the adjusted
/// right-hand-side tuple is walked with `GET_ITER`/`FOR_ITER` so plain
/// names and container stores interleave correctly.
fn visit_assign(asm: &mut Assembly, env: &Env, target: &[Var], value: &[crate::ast::Expr]) -> Result<()> {
    let mut subscript_count = 0usize;
    for t in target {
        if matches!(t, Var::Subscript { .. } | Var::Attribute { .. }) {
            subscript_count += 1;
            visit_var(asm, &env.with_context(Ctx::Skip), t, Ctx::Skip)?;
            asm.emit(Opcode::RotTwo);
        }
    }
    if subscript_count > 0 {
        asm.emit_imm(Opcode::BuildTuple, (subscript_count * 2) as i64);
        asm.emit_imm(Opcode::UnpackSequence, (subscript_count * 2) as i64);
    }

    visit_explist(asm, env, value)?;
    prepare_assign(asm, target.len(), value.len(), is_multi_value(value));

    asm.emit(Opcode::GetIter);

    let exit_label = asm.get_label();

    for t in target {
        asm.emit_jump(Opcode::ForIter, exit_label.clone());

        if matches!(t, Var::Subscript { .. } | Var::Attribute { .. }) {
            asm.emit(Opcode::RotFour);
            asm.emit(Opcode::RotFour);
            asm.emit(Opcode::StoreSubscr);
        } else {
            visit_var(asm, &env.with_context(Ctx::Store), t, Ctx::Store)?;
        }
    }

    asm.emit(Opcode::PopTop);
    super::assert_stack(asm, 0)?;

    asm.place_label(&exit_label);
    super::assert_stack(asm, 0)
}

fn visit_assign_local(asm: &mut Assembly, env: &Env, target: &[crate::ast::Name], value: &[crate::ast::Expr]) -> Result<()> {
    visit_explist(asm, env, value)?;
    prepare_assign(asm, target.len(), value.len(), is_multi_value(value));
    asm.emit_imm(Opcode::UnpackSequence, target.len() as i64);

    for n in target {
        crate::codegen::visit_name(asm, env, n, Ctx::Store);
    }
    Ok(())
}

fn visit_while(asm: &mut Assembly, env: &Env, test: &crate::ast::Expr, body: &[Stat]) -> Result<()> {
    let (l_before, l_after) = (asm.get_label(), asm.get_label());
    asm.place_label(&l_before);

    visit_expr(asm, &env.with_context(Ctx::Load), test)?;
    to_boolean(asm)?;
    super::assert_stack(asm, 1)?;

    asm.emit_jump(Opcode::PopJumpIfFalse, l_after.clone());

    super::visit_block(asm, &env.with_break(l_after.clone()), body, false)?;

    asm.emit_jump(Opcode::JumpAbsolute, l_before);
    asm.place_label(&l_after);
    Ok(())
}

fn visit_repeat(asm: &mut Assembly, env: &Env, body: &[Stat], test: &crate::ast::Expr) -> Result<()> {
    let (l_before, l_after) = (asm.get_label(), asm.get_label());
    asm.place_label(&l_before);

    super::visit_block(asm, &env.with_break(l_after.clone()), body, false)?;

    visit_expr(asm, &env.with_context(Ctx::Load), test)?;
    to_boolean(asm)?;
    super::assert_stack(asm, 1)?;

    asm.emit_jump(Opcode::PopJumpIfFalse, l_before);
    asm.place_label(&l_after);
    Ok(())
}

fn visit_if(asm: &mut Assembly, env: &Env, test: &crate::ast::Expr, body: &[Stat], orelse: &[Stat]) -> Result<()> {
    visit_expr(asm, &env.with_context(Ctx::Load), test)?;
    to_boolean(asm)?;

    let (l_before, l_after) = (asm.get_label(), asm.get_label());

    asm.emit_jump(Opcode::PopJumpIfFalse, l_before.clone());
    super::assert_stack(asm, 0)?;

    super::visit_block(asm, env, body, false)?;

    asm.emit_jump(Opcode::JumpAbsolute, l_after.clone());
    asm.place_label(&l_before);

    super::visit_block(asm, env, orelse, false)?;

    asm.place_label(&l_after);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn visit_for(
    asm: &mut Assembly,
    env: &Env,
    start: &crate::ast::Expr,
    stop: &crate::ast::Expr,
    step: Option<&crate::ast::Expr>,
    target: &crate::ast::Name,
    body: &[Stat],
    loopvar: &std::cell::RefCell<Option<(crate::symbol::Symbol, crate::symbol::Symbol, crate::symbol::Symbol)>>,
    validate_forloop: &std::cell::RefCell<Option<crate::symbol::Symbol>>,
) -> Result<()> {
    let validate = validate_forloop.borrow().clone().expect("for must be scope-resolved");
    visit_symbol(asm, &validate, Ctx::Load);
    visit_expr(asm, &env.with_context(Ctx::Load), start)?;
    visit_expr(asm, &env.with_context(Ctx::Load), stop)?;
    match step {
        Some(step) => visit_expr(asm, &env.with_context(Ctx::Load), step)?,
        None => {
            return Err(CompileError::internal("numeric for without a step expression"));
        }
    }
    asm.emit_imm(Opcode::CallFunction, 3);
    asm.emit_imm(Opcode::UnpackSequence, 3);

    let (var, limit, step) = loopvar.borrow().clone().expect("for must be scope-resolved");
    for symbol in [&var, &limit, &step] {
        visit_symbol(asm, symbol, Ctx::Store);
    }

    let (l_before, l_after) = (asm.get_label(), asm.get_label());
    let (l_smaller, l_body) = (asm.get_label(), asm.get_label());

    asm.place_label(&l_before);

    visit_symbol(asm, &step, Ctx::Load);
    asm.load_const(Const::Int(0));
    asm.emit_imm(Opcode::CompareOp, 4);
    asm.emit_jump(Opcode::PopJumpIfFalse, l_smaller.clone());

    visit_symbol(asm, &var, Ctx::Load);
    visit_symbol(asm, &limit, Ctx::Load);
    asm.emit_imm(Opcode::CompareOp, 4);
    asm.emit_jump(Opcode::PopJumpIfTrue, l_after.clone());
    asm.emit_jump(Opcode::JumpForward, l_body.clone());

    asm.place_label(&l_smaller);
    visit_symbol(asm, &step, Ctx::Load);
    asm.load_const(Const::Int(0));
    asm.emit_imm(Opcode::CompareOp, 0);
    asm.emit_jump(Opcode::PopJumpIfFalse, l_body.clone());

    visit_symbol(asm, &var, Ctx::Load);
    visit_symbol(asm, &limit, Ctx::Load);
    asm.emit_imm(Opcode::CompareOp, 0);
    asm.emit_jump(Opcode::PopJumpIfTrue, l_after.clone());

    asm.place_label(&l_body);
    visit_symbol(asm, &var, Ctx::Load);
    crate::codegen::visit_name(asm, env, target, Ctx::Store);

    super::visit_block(asm, &env.with_break(l_after.clone()), body, false)?;

    visit_symbol(asm, &var, Ctx::Load);
    visit_symbol(asm, &step, Ctx::Load);
    asm.emit(Opcode::BinaryAdd);
    visit_symbol(asm, &var, Ctx::Store);

    asm.emit_jump(Opcode::JumpAbsolute, l_before);
    asm.place_label(&l_after);
    Ok(())
}

fn visit_foreach(
    asm: &mut Assembly,
    env: &Env,
    iter: &[crate::ast::Expr],
    target: &[crate::ast::Name],
    body: &[Stat],
    loopvar: &std::cell::RefCell<Option<(crate::symbol::Symbol, crate::symbol::Symbol, crate::symbol::Symbol)>>,
) -> Result<()> {
    let (f, s, var) = loopvar.borrow().clone().expect("for-each must be scope-resolved");

    visit_explist(asm, &env.with_context(Ctx::Load), iter)?;
    prepare_assign(asm, 3, iter.len(), true);
    asm.emit_imm(Opcode::UnpackSequence, 3);

    for symbol in [&f, &s, &var] {
        visit_symbol(asm, symbol, Ctx::Store);
    }
    super::assert_stack(asm, 0)?;

    let (l_before, l_after) = (asm.get_label(), asm.get_label());
    asm.place_label(&l_before);

    visit_symbol(asm, &f, Ctx::Load);
    visit_symbol(asm, &s, Ctx::Load);
    visit_symbol(asm, &var, Ctx::Load);
    asm.emit_imm(Opcode::CallFunction, 2);

    prepare_assign(asm, target.len(), 1, true);
    asm.emit_imm(Opcode::UnpackSequence, target.len() as i64);

    for n in target {
        crate::codegen::visit_name(asm, env, n, Ctx::Store);
    }
    super::assert_stack(asm, 0)?;

    crate::codegen::visit_name(asm, env, &target[0], Ctx::Load);
    asm.load_const(Const::Nil);
    asm.emit_imm(Opcode::CompareOp, 8);
    asm.emit_jump(Opcode::PopJumpIfTrue, l_after.clone());
    super::assert_stack(asm, 0)?;

    crate::codegen::visit_name(asm, env, &target[0], Ctx::Load);
    visit_symbol(asm, &var, Ctx::Store);
    super::assert_stack(asm, 0)?;

    super::visit_block(asm, &env.with_break(l_after.clone()), body, false)?;

    asm.emit_jump(Opcode::JumpAbsolute, l_before);
    asm.place_label(&l_after);
    Ok(())
}
