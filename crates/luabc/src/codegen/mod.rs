//! AST-to-bytecode lowering, ported 1:1 from `orz/lua/compile.py`'s
//! visitor. Scope resolution and label validation have already run by the
//! time this module sees the tree, so every `Name`/`Stat::Label`/
//! `Stat::Goto`/`Stat::For`/`Stat::ForEach` annotation cell is filled in;
//! this pass only has to read them and emit instructions.

mod expr;
mod stmt;

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{File, FuncName, Name, Stat};
use crate::bytecode::assembly::{Assembly, Const, Label};
use crate::bytecode::opcode::Opcode;
use crate::bytecode::stringtable::StringTable;
use crate::error::Result;
use crate::scope::SymbolTable;
use crate::symbol::{NameKey, Symbol};

pub(crate) use expr::{visit_call, visit_expr, visit_var};
pub(crate) use stmt::visit_stat;

/// Whether a node is being visited to produce a value, to be assigned
/// into, or purely for its side effect of evaluating a container/key pair
/// (the original's `context=None`, used while preparing a multi-target
/// assignment's left-hand sides).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ctx {
    Load,
    Store,
    Skip,
}

/// Everything threaded through the recursive visit, mirroring
/// `compile.py`'s `Environment(asm, stringtable, break_target, context,
/// filename)`. `asm` itself is passed as an explicit `&mut` argument
/// instead of living here, since codegen routinely builds a brand new
/// `Assembly` for a nested function while this stays in scope.
#[derive(Clone)]
pub(crate) struct Env<'a> {
    pub stringtable: &'a RefCell<StringTable>,
    pub break_target: Option<Label>,
    pub context: Ctx,
    pub filename: &'a str,
}

impl<'a> Env<'a> {
    pub fn with_context(&self, context: Ctx) -> Env<'a> {
        Env { context, ..self.clone() }
    }

    pub fn with_break(&self, label: Label) -> Env<'a> {
        Env { break_target: Some(label), context: self.context, ..self.clone() }
    }
}

/// Compiles a fully resolved file into its top-level `Assembly` plus the
/// shared string table codegen interned names and literals into.
pub fn compile_file(file: &File, filename: &str) -> Result<(Assembly, StringTable)> {
    let symtable = file.symtable.borrow().clone().expect("file must be scope-resolved");
    let slots = symtable.slots.borrow_mut().take().expect("file must have slots assigned");

    let module_name = NameKey { name: "<module>".to_string(), s: RefCell::new(None) };
    let mut asm = Assembly::new(module_name, slots.names, slots.varnames, slots.freevars, slots.cellvars, 0, true);
    asm.set_lineno(1);

    let stringtable = RefCell::new(StringTable::new());
    let env = Env { stringtable: &stringtable, break_target: None, context: Ctx::Load, filename };

    visit_block(&mut asm, &env, &file.body, true)?;

    intern_function_tables(&mut asm, &stringtable);

    let mut table = stringtable.into_inner();
    table.close();
    Ok((asm, table))
}

/// Interns a function's four name tables plus its own name, matching the
/// bulk `name.s = stringtable.add(...)` loops at the end of `visit_function`
/// and the top-level `File` visitor.
fn intern_function_tables(asm: &mut Assembly, stringtable: &RefCell<StringTable>) {
    for key in asm.names.iter() {
        let sref = stringtable.borrow_mut().add(key.name.as_bytes(), true);
        *key.s.borrow_mut() = Some(sref);
    }
    for sym in asm.varnames.iter().chain(asm.freevars.iter()).chain(asm.cellvars.iter()) {
        let sref = stringtable.borrow_mut().add(sym.name().as_bytes(), true);
        sym.set_interned(sref);
    }
    let sref = stringtable.borrow_mut().add(asm.name.name.as_bytes(), true);
    *asm.name.s.borrow_mut() = Some(sref);
}

/// Loads or stores a resolved `Symbol` — `LOAD_FAST`/`STORE_FAST` for a
/// plain local, `LOAD_DEREF`/`STORE_DEREF` for one captured by a nested
/// function (or that is itself a free variable), `LOAD_GLOBAL`/
/// `STORE_GLOBAL` for an interpreter-level global. `Skip` context emits
/// nothing; `Attribute` symbols are never loaded through here (attribute
/// access lowers to a table subscript on a string constant instead).
pub(crate) fn visit_symbol(asm: &mut Assembly, symbol: &Symbol, context: Ctx) {
    if context == Ctx::Skip {
        return;
    }
    let op = match (symbol, context) {
        (Symbol::Local(l), Ctx::Load) => {
            if l.is_referenced.get() {
                Opcode::LoadDeref
            } else {
                Opcode::LoadFast
            }
        }
        (Symbol::Local(l), Ctx::Store) => {
            if l.is_referenced.get() {
                Opcode::StoreDeref
            } else {
                Opcode::StoreFast
            }
        }
        (Symbol::Free(_), Ctx::Load) => Opcode::LoadDeref,
        (Symbol::Free(_), Ctx::Store) => Opcode::StoreDeref,
        (Symbol::Global(_), Ctx::Load) => Opcode::LoadGlobal,
        (Symbol::Global(_), Ctx::Store) => Opcode::StoreGlobal,
        (Symbol::Attribute(_), _) => unreachable!("attribute symbols are addressed by const, not loaded"),
        (_, Ctx::Skip) => unreachable!(),
    };
    asm.emit_imm(op, symbol.slot() as i64);
}

/// Resolves a `Name` occurrence: a directly-bound symbol, or (for an
/// ordinary Lua global) a subscript into the `_ENV` upvalue keyed by the
/// name text.
pub(crate) fn visit_name(asm: &mut Assembly, env: &Env, name: &Name, context: Ctx) {
    let resolution = name.resolution.borrow();
    match resolution.as_ref().expect("name must be scope-resolved") {
        crate::ast::NameResolution::Direct(symbol) => visit_symbol(asm, symbol, context),
        crate::ast::NameResolution::Env { env: env_symbol } => {
            visit_symbol(asm, env_symbol, Ctx::Load);
            let sref = env.stringtable.borrow_mut().add(name.id.as_bytes(), true);
            asm.load_const(Const::Str(sref));
            match context {
                Ctx::Load => asm.emit(Opcode::BinarySubscr),
                Ctx::Store => asm.emit(Opcode::StoreSubscr),
                Ctx::Skip => {}
            }
        }
    }
}

/// Visits a single expression for its value, re-normalizing a possibly
/// multi-valued `Ellipsis`/`Call` result down to exactly one value: `TOS =
/// TOS or (None,)` then `TOS = TOS[0]`, so an empty result reads as `nil`
/// instead of underflowing the stack.
pub(crate) fn visit_exp(asm: &mut Assembly, env: &Env, expr: &crate::ast::Expr) -> Result<()> {
    visit_expr(asm, &env.with_context(Ctx::Load), expr)?;

    if is_multi_value_expr(expr) {
        let stacksize = asm.stacksize();
        let label = asm.get_label();
        asm.emit_jump(Opcode::JumpIfTrueOrPop, label.clone());

        asm.load_const(Const::Nil);
        asm.emit_imm(Opcode::BuildTuple, 1);
        assert_stack(asm, stacksize)?;

        asm.place_label(&label);

        asm.load_const(Const::Int(0));
        asm.emit(Opcode::BinarySubscr);
        assert_stack(asm, stacksize)?;
    }
    Ok(())
}

/// An explist is compiled as a single tuple on the stack: every expression
/// but the last is forced to exactly one value and concatenated together;
/// the last is left in its raw (possibly multi-valued) form and added on,
/// so the combined tuple's length can exceed the static expression count
/// when the trailing expression is a call or `...`.
pub(crate) fn visit_explist(asm: &mut Assembly, env: &Env, explist: &[crate::ast::Expr]) -> Result<()> {
    let Some((last, init)) = explist.split_last() else {
        asm.emit_imm(Opcode::BuildTuple, 0);
        return Ok(());
    };

    for e in init {
        visit_exp(asm, env, e)?;
    }
    asm.emit_imm(Opcode::BuildTuple, init.len() as i64);

    visit_expr(asm, &env.with_context(Ctx::Load), last)?;
    if !is_multi_value_expr(last) {
        asm.emit_imm(Opcode::BuildTuple, 1);
    }
    asm.emit(Opcode::BinaryAdd);
    Ok(())
}

/// Whether `nodes`'s trailing expression already yields a runtime tuple of
/// unknown length — an `Ellipsis` or a `Call`. Unlike `compile.py`'s
/// `is_multi_value`, which tests the type of the *list itself* against
/// `(ELLIPSIS, Call)` and so can never be true, this checks the actual
/// last expression: padding/truncation in `prepare_assign` only produces a
/// tuple of exactly `need` entries when this is right, and e.g.
/// `local a, b = f()` needs it to be true whenever `f()` doesn't return
/// exactly one value.
pub(crate) fn is_multi_value(nodes: &[crate::ast::Expr]) -> bool {
    nodes.last().is_some_and(is_multi_value_expr)
}

fn is_multi_value_expr(expr: &crate::ast::Expr) -> bool {
    matches!(expr, crate::ast::Expr::Ellipsis { .. } | crate::ast::Expr::Call(_))
}

pub(crate) fn visit_block(asm: &mut Assembly, env: &Env, stats: &[Stat], return_required: bool) -> Result<()> {
    for stat in stats {
        visit_stat(asm, env, stat)?;
        assert_stack(asm, 0)?;
    }

    if return_required && !matches!(stats.last(), Some(Stat::Return { .. })) {
        asm.emit_imm(Opcode::BuildTuple, 0);
        asm.emit(Opcode::ReturnValue);
    }
    Ok(())
}

/// Lowers a table constructor's field list into `BUILD_MAP` + one
/// `STORE_MAP` per field, assigning consecutive integer keys to positional
/// fields. `STORE_MAP` pops `(TOS=key, TOS1=value)`, so every field must
/// leave its key on top: a positional field pushes its value then its
/// synthetic integer key; a keyed field pushes key then value and
/// `ROT_TWO`s them back into the same key-on-top order. Returns the next
/// unused positional key, used by the caller to continue numbering a
/// trailing runtime-extension loop.
pub(crate) fn visit_fields(asm: &mut Assembly, env: &Env, fields: &[crate::ast::Field]) -> Result<i64> {
    asm.emit_imm(Opcode::BuildMap, fields.len() as i64);

    let mut next = 1i64;
    for field in fields {
        match &field.key {
            Some(key) => {
                visit_exp(asm, env, key)?;
                visit_exp(asm, env, &field.value)?;
                asm.emit(Opcode::RotTwo);
            }
            None => {
                visit_exp(asm, env, &field.value)?;
                asm.load_const(Const::Int(next));
                next += 1;
            }
        }
        asm.emit(Opcode::StoreMap);
    }
    Ok(next)
}

/// Pads the assignment-value tuple on top of the stack to exactly `need`
/// entries (wrapping with `(None,) * padding`) and/or truncates it with
/// `SLICE+2` when it might hold more.
pub(crate) fn prepare_assign(asm: &mut Assembly, need: usize, have: usize, multi_value: bool) {
    let mut padding = need as i64 - have as i64;
    if multi_value {
        padding += 1;
    }

    if padding > 0 {
        asm.load_const(Const::Nil);
        asm.emit_imm(Opcode::BuildTuple, 1);

        if padding > 1 {
            asm.load_const(Const::Int(padding));
            asm.emit(Opcode::BinaryMultiply);
        }
        asm.emit(Opcode::BinaryAdd);
    }

    if have > need || multi_value {
        asm.load_const(Const::Int(need as i64));
        asm.emit(Opcode::Slice2);
    }
}

/// Lowers Lua's three-valued truthiness (`nil`/`false` both falsy,
/// everything else truthy) to a real `0`/`1` on the stack.
pub(crate) fn to_boolean(asm: &mut Assembly) -> Result<()> {
    let stacksize = asm.stacksize();
    asm.emit(Opcode::DupTop);

    let (l1, l2, l3) = (asm.get_label(), asm.get_label(), asm.get_label());

    asm.load_const(Const::Nil);
    asm.emit_imm(Opcode::CompareOp, 8);
    asm.emit_jump(Opcode::PopJumpIfFalse, l1.clone());
    assert_stack(asm, stacksize)?;

    asm.emit(Opcode::PopTop);
    asm.load_const(Const::Bool(false));
    assert_stack(asm, stacksize)?;
    asm.emit_jump(Opcode::JumpForward, l3.clone());

    asm.place_label(&l1);
    asm.load_const(Const::Bool(false));
    asm.emit_imm(Opcode::CompareOp, 8);
    asm.emit_jump(Opcode::PopJumpIfFalse, l2.clone());
    assert_stack(asm, stacksize - 1)?;

    asm.load_const(Const::Bool(false));
    asm.emit_jump(Opcode::JumpForward, l3.clone());

    asm.set_stacksize(stacksize - 1);
    asm.place_label(&l2);
    asm.load_const(Const::Bool(true));
    assert_stack(asm, stacksize)?;

    asm.place_label(&l3);
    Ok(())
}

pub(crate) fn assert_stack(asm: &Assembly, expected: i32) -> Result<()> {
    if asm.stacksize() != expected {
        return Err(crate::error::CompileError::internal(format!(
            "stack imbalance: expected depth {expected}, got {}",
            asm.stacksize()
        )));
    }
    Ok(())
}

/// Builds a nested function's `Assembly`, folds it into the enclosing
/// one's constant pool, and emits the `MAKE_FUNCTION`/`MAKE_CLOSURE`
/// sequence that turns it into a value on the stack — `visit_function` in
/// the original, shared by `Stat::Function`, `Stat::FunctionLocal` and
/// `Expr::Lambda`.
pub(crate) fn visit_function(
    asm: &mut Assembly,
    env: &Env,
    name_text: &str,
    def_line: u32,
    args: &[Name],
    body: &[Stat],
    symtable_cell: &RefCell<Option<Rc<SymbolTable>>>,
) -> Result<()> {
    let symtable = symtable_cell.borrow().clone().expect("function must be scope-resolved");
    let slots = symtable.slots.borrow_mut().take().expect("function must have slots assigned");
    let argcount = args.len() as u32;

    let func_name = NameKey { name: name_text.to_string(), s: RefCell::new(None) };
    let mut nested = Assembly::new(func_name, slots.names, slots.varnames, slots.freevars, slots.cellvars, argcount, true);
    nested.set_lineno(def_line);

    let nested_env = Env { stringtable: env.stringtable, break_target: None, context: Ctx::Load, filename: env.filename };
    visit_block(&mut nested, &nested_env, body, true)?;

    intern_function_tables(&mut nested, env.stringtable);

    let freevars = nested.freevars.clone();
    let const_idx = asm.add_const(Const::Func(Box::new(nested)));

    for _ in 0..argcount {
        asm.load_const(Const::Nil);
    }

    if freevars.is_empty() {
        asm.emit_imm(Opcode::LoadConst, const_idx as i64);
        asm.emit_imm(Opcode::MakeFunction, argcount as i64);
    } else {
        for freevar in &freevars {
            if let Symbol::Free(f) = freevar {
                asm.emit_imm(Opcode::LoadClosure, f.parent.slot() as i64);
            }
        }
        asm.emit_imm(Opcode::BuildTuple, freevars.len() as i64);
        asm.emit_imm(Opcode::LoadConst, const_idx as i64);
        asm.emit_imm(Opcode::MakeClosure, argcount as i64);
    }
    Ok(())
}

/// Stores into whichever lvalue shape a function declaration's name takes
/// (`function t.a.b.c()` / `function t:m()` / `function f()`), mirroring
/// the original's reuse of `Attribute`/`Method`'s own `Store`-context
/// visit for function-name targets.
pub(crate) fn store_funcname(asm: &mut Assembly, env: &Env, name: &FuncName) -> Result<()> {
    match name {
        FuncName::Name(n) => {
            visit_name(asm, env, n, Ctx::Store);
            Ok(())
        }
        FuncName::Attribute { value, attr, .. } => {
            load_funcname_value(asm, env, value)?;
            asm.set_lineno(attr.pos.line);
            let sref = env.stringtable.borrow_mut().add(attr.id.as_bytes(), true);
            asm.load_const(Const::Str(sref));
            asm.emit(Opcode::StoreSubscr);
            Ok(())
        }
        FuncName::Method { value, method, .. } => {
            load_funcname_value(asm, env, value)?;
            asm.set_lineno(method.pos.line);
            let sref = env.stringtable.borrow_mut().add(method.id.as_bytes(), true);
            asm.load_const(Const::Str(sref));
            asm.emit(Opcode::StoreSubscr);
            Ok(())
        }
    }
}

/// Loads the `value` base of a (possibly chained) function name, so its
/// final `Attribute`/`Method` segment can be stored into.
fn load_funcname_value(asm: &mut Assembly, env: &Env, name: &FuncName) -> Result<()> {
    match name {
        FuncName::Name(n) => {
            visit_name(asm, env, n, Ctx::Load);
            Ok(())
        }
        FuncName::Attribute { value, attr, .. } => {
            load_funcname_value(asm, env, value)?;
            asm.set_lineno(attr.pos.line);
            let sref = env.stringtable.borrow_mut().add(attr.id.as_bytes(), true);
            asm.load_const(Const::Str(sref));
            asm.emit(Opcode::BinarySubscr);
            Ok(())
        }
        FuncName::Method { .. } => unreachable!("a method segment is never itself a base"),
    }
}
