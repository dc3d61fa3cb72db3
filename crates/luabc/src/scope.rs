//! Scope resolution pass, ported 1:1 from `orz/lua/scope.py`. Walks the
//! parsed tree once, building a `SymbolTable` per function and a
//! `BlockSymbolTable` per nested lexical block, resolving every `Name` to
//! a `Symbol`, and promoting captured locals to free variables on the way
//! up. Globals in source Lua are not host-level globals: every unresolved
//! name falls back to a subscript into the `_ENV` upvalue, matching Lua
//! 5.2 semantics.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Expr, File, FuncName, Name, NameResolution, Pos, Stat, Var};
use crate::error::{CompileError, Location, Result};
use crate::symbol::{calculate_slots, SlotAssignment, Symbol};

/// Shared behavior between a function-level `SymbolTable` and a nested
/// `BlockSymbolTable`: both resolve names by walking up to their parent,
/// and both can mint fresh `Global`/`Attribute`/`Local` symbols.
pub trait Scope {
    fn declare_local(&self, name: &str) -> Symbol;
    fn get_global(&self, name: &str) -> Symbol;
    fn get_attribute(&self, name: &str) -> Symbol;
    fn find(&self, name: &str) -> Option<Symbol>;
    fn get_loopvar(&self, n: u32) -> (Symbol, Symbol, Symbol);
    fn add_symbol(&self, symbol: Symbol) -> Symbol;
}

struct LoopVars {
    slots: RefCell<Vec<(Symbol, Symbol, Symbol)>>,
}

/// One function's symbol table: owns the flat `symbols` list later fed to
/// `calculate_slots`, and the per-name lookup cache. `parent` is whatever
/// scope was active where the function literal appears — a `SymbolTable`
/// for a top-level `function`, or a `BlockSymbolTable` for one nested in a
/// block — matching `SymbolTable(env.symtable)` in the original, which
/// accepts either.
pub struct SymbolTable {
    parent: Option<Rc<dyn Scope>>,
    table: RefCell<HashMap<String, Symbol>>,
    symbols: RefCell<Vec<Symbol>>,
    loopvars: LoopVars,
    pub slots: RefCell<Option<SlotAssignment>>,
}

impl SymbolTable {
    pub fn new(parent: Option<Rc<dyn Scope>>) -> Rc<Self> {
        Rc::new(SymbolTable {
            parent,
            table: RefCell::new(HashMap::new()),
            symbols: RefCell::new(Vec::new()),
            loopvars: LoopVars { slots: RefCell::new(Vec::new()) },
            slots: RefCell::new(None),
        })
    }

    /// Finalizes slot assignment for this function; must run after every
    /// nested block/function under it has already resolved its names.
    pub fn close(&self) {
        let assignment = calculate_slots(&self.symbols.borrow());
        *self.slots.borrow_mut() = Some(assignment);
    }

    fn find_local(&self, name: &str) -> Option<Symbol> {
        self.table.borrow().get(name).cloned()
    }
}

impl Scope for SymbolTable {
    fn declare_local(&self, name: &str) -> Symbol {
        let symbol = Symbol::new_local(name);
        self.symbols.borrow_mut().push(symbol.clone());
        self.table.borrow_mut().insert(name.to_string(), symbol.clone());
        symbol
    }

    fn get_global(&self, name: &str) -> Symbol {
        self.add_symbol(Symbol::new_global(name))
    }

    fn get_attribute(&self, name: &str) -> Symbol {
        self.add_symbol(Symbol::new_attribute(name))
    }

    fn add_symbol(&self, symbol: Symbol) -> Symbol {
        self.symbols.borrow_mut().push(symbol.clone());
        symbol
    }

    fn get_loopvar(&self, n: u32) -> (Symbol, Symbol, Symbol) {
        let mut vars = self.loopvars.slots.borrow_mut();
        while (n as usize) >= vars.len() {
            let i = vars.len();
            let tup = (
                self.declare_local(&format!(".{i}a")),
                self.declare_local(&format!(".{i}b")),
                self.declare_local(&format!(".{i}c")),
            );
            vars.push(tup);
        }
        vars[n as usize].clone()
    }

    fn find(&self, name: &str) -> Option<Symbol> {
        if let Some(sym) = self.find_local(name) {
            return Some(sym);
        }
        let parent = self.parent.as_ref()?;
        let found = parent.find(name)?;
        let resolved = match &found {
            Symbol::Global(_) => self.get_global(found.name()),
            Symbol::Local(_) | Symbol::Free(_) => {
                found.mark_referenced();
                self.add_symbol(Symbol::new_free(name, found))
            }
            Symbol::Attribute(_) => found,
        };
        self.table.borrow_mut().insert(name.to_string(), resolved.clone());
        Some(resolved)
    }
}

/// A lexical block within a function (`do ... end`, loop/if bodies):
/// declares no symbols of its own, just forwards allocation to the
/// enclosing function's `SymbolTable` while keeping a private name cache
/// so a `local x` shadows an outer `x` only within the block.
pub struct BlockSymbolTable {
    parent: Rc<dyn Scope>,
    table: RefCell<HashMap<String, Symbol>>,
}

impl BlockSymbolTable {
    pub fn new(parent: Rc<dyn Scope>) -> Rc<Self> {
        Rc::new(BlockSymbolTable { parent, table: RefCell::new(HashMap::new()) })
    }
}

impl Scope for BlockSymbolTable {
    fn declare_local(&self, name: &str) -> Symbol {
        let symbol = self.parent.add_symbol(Symbol::new_local(name));
        self.table.borrow_mut().insert(name.to_string(), symbol.clone());
        symbol
    }

    fn get_global(&self, name: &str) -> Symbol {
        self.parent.get_global(name)
    }

    fn get_attribute(&self, name: &str) -> Symbol {
        self.parent.get_attribute(name)
    }

    fn add_symbol(&self, symbol: Symbol) -> Symbol {
        self.parent.add_symbol(symbol)
    }

    fn get_loopvar(&self, n: u32) -> (Symbol, Symbol, Symbol) {
        self.parent.get_loopvar(n)
    }

    fn find(&self, name: &str) -> Option<Symbol> {
        if let Some(sym) = self.table.borrow().get(name).cloned() {
            return Some(sym);
        }
        let found = self.parent.find(name)?;
        self.table.borrow_mut().insert(name.to_string(), found.clone());
        Some(found)
    }
}

/// A `for` loop's body block: its hidden control-variable triple
/// (`.Na`/`.Nb`/`.Nc`) comes from one level deeper than its own block, to
/// avoid colliding with an enclosing loop's triple at the same index.
pub struct ForLoopBlockSymbolTable {
    parent: Rc<dyn Scope>,
    table: RefCell<HashMap<String, Symbol>>,
}

impl ForLoopBlockSymbolTable {
    pub fn new(parent: Rc<dyn Scope>) -> Rc<Self> {
        Rc::new(ForLoopBlockSymbolTable { parent, table: RefCell::new(HashMap::new()) })
    }
}

impl Scope for ForLoopBlockSymbolTable {
    fn declare_local(&self, name: &str) -> Symbol {
        let symbol = self.parent.add_symbol(Symbol::new_local(name));
        self.table.borrow_mut().insert(name.to_string(), symbol.clone());
        symbol
    }
    fn get_global(&self, name: &str) -> Symbol {
        self.parent.get_global(name)
    }
    fn get_attribute(&self, name: &str) -> Symbol {
        self.parent.get_attribute(name)
    }
    fn add_symbol(&self, symbol: Symbol) -> Symbol {
        self.parent.add_symbol(symbol)
    }
    fn find(&self, name: &str) -> Option<Symbol> {
        if let Some(sym) = self.table.borrow().get(name).cloned() {
            return Some(sym);
        }
        let found = self.parent.find(name)?;
        self.table.borrow_mut().insert(name.to_string(), found.clone());
        Some(found)
    }
    fn get_loopvar(&self, n: u32) -> (Symbol, Symbol, Symbol) {
        self.parent.get_loopvar(n + 1)
    }
}

/// Threaded through the whole pass purely for diagnostics (`...` misuse).
struct Ctx<'a> {
    filename: &'a str,
    source: &'a str,
}

impl<'a> Ctx<'a> {
    fn err_vararg(&self, pos: Pos, message: impl Into<String>) -> CompileError {
        let line_text = self.source.lines().nth(pos.line.saturating_sub(1) as usize).unwrap_or("");
        CompileError::vararg(Location::new(self.filename, pos.line, pos.column, line_text), message)
    }
}

/// Resolves every name in `file`, attaching a `SymbolTable` to `file`
/// itself and to every nested function/lambda, and recording each `Name`
/// occurrence's resolution in its `resolution` cell.
pub fn resolve(file: &File, filename: &str, source: &str) -> Result<Rc<SymbolTable>> {
    let ctx = Ctx { filename, source };
    let root = SymbolTable::new(None);
    root.table.borrow_mut().insert("_ENV".to_string(), root.get_global("_ENV"));

    for stat in &file.body {
        visit_stat(root.clone() as Rc<dyn Scope>, stat, &ctx)?;
    }

    root.close();
    *file.symtable.borrow_mut() = Some(root.clone());
    Ok(root)
}

fn visit_stat(scope: Rc<dyn Scope>, stat: &Stat, ctx: &Ctx) -> Result<()> {
    match stat {
        Stat::Assign { target, value, .. } => {
            for v in value {
                visit_expr(scope.clone(), v, ctx)?;
            }
            for t in target {
                visit_var(scope.clone(), t, ctx)?;
            }
        }
        Stat::AssignLocal { target, value, .. } => {
            for v in value {
                visit_expr(scope.clone(), v, ctx)?;
            }
            for name in target {
                scope.declare_local(&name.id);
            }
            for name in target {
                resolve_name(scope.clone(), name);
            }
        }
        Stat::CallStatement { body, .. } => visit_call(scope, body, ctx)?,
        Stat::Label { .. } | Stat::Goto { .. } | Stat::Break { .. } => {}
        Stat::Block { body, .. } => {
            let block = BlockSymbolTable::new(scope) as Rc<dyn Scope>;
            for s in body {
                visit_stat(block.clone(), s, ctx)?;
            }
        }
        Stat::While { test, body, .. } => {
            visit_expr(scope.clone(), test, ctx)?;
            let block = BlockSymbolTable::new(scope) as Rc<dyn Scope>;
            for s in body {
                visit_stat(block.clone(), s, ctx)?;
            }
        }
        Stat::Repeat { body, test, .. } => {
            let block = BlockSymbolTable::new(scope) as Rc<dyn Scope>;
            for s in body {
                visit_stat(block.clone(), s, ctx)?;
            }
            visit_expr(block, test, ctx)?;
        }
        Stat::If { test, body, orelse, .. } => {
            visit_expr(scope.clone(), test, ctx)?;
            let then_block = BlockSymbolTable::new(scope.clone()) as Rc<dyn Scope>;
            for s in body {
                visit_stat(then_block.clone(), s, ctx)?;
            }
            let else_block = BlockSymbolTable::new(scope) as Rc<dyn Scope>;
            for s in orelse {
                visit_stat(else_block.clone(), s, ctx)?;
            }
        }
        Stat::For { start, stop, step, target, body, loopvar, validate_forloop, .. } => {
            *validate_forloop.borrow_mut() = Some(scope.get_global("validate_forloop"));
            visit_expr(scope.clone(), start, ctx)?;
            visit_expr(scope.clone(), stop, ctx)?;
            if let Some(step) = step {
                visit_expr(scope.clone(), step, ctx)?;
            }
            *loopvar.borrow_mut() = Some(scope.get_loopvar(0));

            let block = ForLoopBlockSymbolTable::new(scope) as Rc<dyn Scope>;
            block.declare_local(&target.id);
            resolve_name(block.clone(), target);
            for s in body {
                visit_stat(block.clone(), s, ctx)?;
            }
        }
        Stat::ForEach { iter, target, body, loopvar, .. } => {
            for e in iter {
                visit_expr(scope.clone(), e, ctx)?;
            }
            *loopvar.borrow_mut() = Some(scope.get_loopvar(0));

            let block = ForLoopBlockSymbolTable::new(scope) as Rc<dyn Scope>;
            for name in target {
                block.declare_local(&name.id);
            }
            for name in target {
                resolve_name(block.clone(), name);
            }
            for s in body {
                visit_stat(block.clone(), s, ctx)?;
            }
        }
        Stat::Function { name, args, body, varargs, symtable, .. } => {
            visit_funcname(scope.clone(), name, ctx)?;
            visit_function(scope, args, body, *varargs, symtable, ctx)?;
        }
        Stat::FunctionLocal { name, args, body, varargs, symtable, .. } => {
            scope.declare_local(&name.id);
            resolve_name(scope.clone(), name);
            visit_function(scope, args, body, *varargs, symtable, ctx)?;
        }
        Stat::Return { value, .. } => {
            for v in value {
                visit_expr(scope.clone(), v, ctx)?;
            }
        }
    }
    Ok(())
}

fn visit_funcname(scope: Rc<dyn Scope>, name: &FuncName, ctx: &Ctx) -> Result<()> {
    match name {
        FuncName::Name(n) => {
            resolve_name(scope, n);
            Ok(())
        }
        FuncName::Attribute { value, .. } | FuncName::Method { value, .. } => {
            visit_funcname(scope, value, ctx)
        }
    }
}

fn visit_function(
    scope: Rc<dyn Scope>,
    args: &[Name],
    body: &[Stat],
    varargs: bool,
    symtable_slot: &RefCell<Option<Rc<SymbolTable>>>,
    ctx: &Ctx,
) -> Result<()> {
    let symtable = SymbolTable::new(Some(scope));

    for arg in args {
        symtable.declare_local(&arg.id);
    }
    symtable.declare_local(if varargs { "..." } else { "__...__" });

    let inner = symtable.clone() as Rc<dyn Scope>;
    for s in body {
        visit_stat(inner.clone(), s, ctx)?;
    }

    symtable.close();
    *symtable_slot.borrow_mut() = Some(symtable);
    Ok(())
}

/// Resolves a `Name` occurrence, recording either its direct symbol or an
/// `_ENV` subscript fallback — the Rust analogue of setting `node._env`
/// and `node.symbol` on the Python AST node in place.
fn resolve_name(scope: Rc<dyn Scope>, name: &Name) {
    let resolution = match scope.find(&name.id) {
        Some(symbol) => NameResolution::Direct(symbol),
        None => {
            let env = scope.find("_ENV").expect("_ENV must always resolve");
            NameResolution::Env { env }
        }
    };
    *name.resolution.borrow_mut() = Some(resolution);
}

fn visit_var(scope: Rc<dyn Scope>, var: &Var, ctx: &Ctx) -> Result<()> {
    match var {
        Var::Name(n) => {
            resolve_name(scope, n);
            Ok(())
        }
        Var::Subscript { value, slice, .. } => {
            visit_expr(scope.clone(), value, ctx)?;
            visit_expr(scope, slice, ctx)
        }
        Var::Attribute { value, .. } => visit_expr(scope, value, ctx),
    }
}

fn visit_call(scope: Rc<dyn Scope>, call: &crate::ast::Call, ctx: &Ctx) -> Result<()> {
    visit_expr(scope.clone(), &call.func, ctx)?;
    for a in &call.args {
        visit_expr(scope.clone(), a, ctx)?;
    }
    Ok(())
}

fn visit_expr(scope: Rc<dyn Scope>, expr: &Expr, ctx: &Ctx) -> Result<()> {
    match expr {
        Expr::Var(v) => visit_var(scope, v, ctx)?,
        Expr::Nil(_) | Expr::False(_) | Expr::True(_) | Expr::Number { .. } | Expr::Str { .. } => {}
        Expr::Ellipsis { pos, symbol } => {
            let found = scope.find("...").ok_or_else(|| {
                ctx.err_vararg(*pos, "cannot use '...' outside a vararg function")
            })?;
            *symbol.borrow_mut() = Some(found);
        }
        Expr::Table { fields, luatable, .. } => {
            *luatable.borrow_mut() = Some(scope.get_global("LuaTable"));
            for f in fields {
                if let Some(k) = &f.key {
                    visit_expr(scope.clone(), k, ctx)?;
                }
                visit_expr(scope.clone(), &f.value, ctx)?;
            }
        }
        Expr::Lambda { args, body, varargs, symtable, .. } => {
            visit_function(scope, args, body, *varargs, symtable, ctx)?;
        }
        Expr::BinOp { op, left, right, op_symbol, .. } => {
            *op_symbol.borrow_mut() = Some(scope.get_global(op.builtin_name()));
            visit_expr(scope.clone(), left, ctx)?;
            visit_expr(scope, right, ctx)?;
        }
        Expr::UnaryOp { op, operand, op_symbol, .. } => {
            *op_symbol.borrow_mut() = Some(scope.get_global(op.builtin_name()));
            visit_expr(scope, operand, ctx)?;
        }
        Expr::Call(c) => visit_call(scope, c, ctx)?,
        Expr::Method { value, .. } => visit_expr(scope, value, ctx)?,
    }
    Ok(())
}
