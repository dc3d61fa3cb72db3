//! Symbol model, ported 1:1 from `orz/symbol.py`: the slot-allocation
//! invariants (names/varnames/freevars/cellvars disjoint; a `Free` symbol's
//! slot is `len(cellvars) + freevars.index(symbol)`) are load-bearing for
//! the marshal format codegen produces, so this module keeps the original's
//! two-pass `calculate_slots` algorithm exactly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::bytecode::stringtable::StringRef;

/// A name bound in the global table (`_ENV`-independent in this compiler's
/// model — these are interpreter-level globals such as operator builtins).
#[derive(Debug, Clone)]
pub struct GlobalSymbol {
    pub name: String,
    pub slot: Cell<i32>,
}

/// A table/object attribute name (deduplicated alongside globals in the
/// `names` tuple).
#[derive(Debug, Clone)]
pub struct AttributeSymbol {
    pub name: String,
    pub slot: Cell<i32>,
}

/// A local variable. `is_referenced` is set once some enclosing function
/// captures it as a free variable, promoting it from `varnames` (fast slot)
/// to `cellvars` (cell slot).
#[derive(Debug)]
pub struct LocalSymbol {
    pub name: String,
    pub is_referenced: Cell<bool>,
    pub slot: Cell<i32>,
    /// Interned name text, assigned once the enclosing function's body is
    /// fully compiled (see `codegen::visit_function`).
    pub s: RefCell<Option<StringRef>>,
}

/// A variable captured from an enclosing function. `parent` is the `Local`
/// (or further-out `Free`) symbol in the enclosing scope being captured.
#[derive(Debug)]
pub struct FreeSymbol {
    pub name: String,
    pub parent: Symbol,
    pub slot: Cell<i32>,
    pub s: RefCell<Option<StringRef>>,
}

/// A plain deduplication key used when building the `names` tuple
/// (mirrors `orz.symbol.Name`, compared purely by name).
#[derive(Debug)]
pub struct NameKey {
    pub name: String,
    pub s: RefCell<Option<StringRef>>,
}

impl PartialEq for NameKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for NameKey {}

#[derive(Debug, Clone)]
pub enum Symbol {
    Global(Rc<GlobalSymbol>),
    Attribute(Rc<AttributeSymbol>),
    Local(Rc<LocalSymbol>),
    Free(Rc<FreeSymbol>),
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Global(s) => &s.name,
            Symbol::Attribute(s) => &s.name,
            Symbol::Local(s) => &s.name,
            Symbol::Free(s) => &s.name,
        }
    }

    pub fn slot(&self) -> i32 {
        match self {
            Symbol::Global(s) => s.slot.get(),
            Symbol::Attribute(s) => s.slot.get(),
            Symbol::Local(s) => s.slot.get(),
            Symbol::Free(s) => s.slot.get(),
        }
    }

    pub fn set_slot(&self, slot: i32) {
        match self {
            Symbol::Global(s) => s.slot.set(slot),
            Symbol::Attribute(s) => s.slot.set(slot),
            Symbol::Local(s) => s.slot.set(slot),
            Symbol::Free(s) => s.slot.set(slot),
        }
    }

    pub fn new_global(name: impl Into<String>) -> Symbol {
        Symbol::Global(Rc::new(GlobalSymbol { name: name.into(), slot: Cell::new(-1) }))
    }

    pub fn new_attribute(name: impl Into<String>) -> Symbol {
        Symbol::Attribute(Rc::new(AttributeSymbol { name: name.into(), slot: Cell::new(-1) }))
    }

    pub fn new_local(name: impl Into<String>) -> Symbol {
        Symbol::Local(Rc::new(LocalSymbol {
            name: name.into(),
            is_referenced: Cell::new(false),
            slot: Cell::new(-1),
            s: RefCell::new(None),
        }))
    }

    pub fn new_free(name: impl Into<String>, parent: Symbol) -> Symbol {
        Symbol::Free(Rc::new(FreeSymbol {
            name: name.into(),
            parent,
            slot: Cell::new(-1),
            s: RefCell::new(None),
        }))
    }

    /// Sets the interned-name `StringRef` cache on `Local`/`Free` symbols
    /// (no-op on `Global`/`Attribute`, which are only ever addressed by
    /// slot into the deduplicated `names` tuple).
    pub fn set_interned(&self, s: StringRef) {
        match self {
            Symbol::Local(l) => *l.s.borrow_mut() = Some(s),
            Symbol::Free(f) => *f.s.borrow_mut() = Some(s),
            _ => {}
        }
    }

    pub fn interned(&self) -> Option<StringRef> {
        match self {
            Symbol::Local(l) => l.s.borrow().clone(),
            Symbol::Free(f) => f.s.borrow().clone(),
            _ => None,
        }
    }

    pub fn mark_referenced(&self) {
        if let Symbol::Local(l) = self {
            l.is_referenced.set(true);
        }
    }

    /// Structural equality used by `calculate_slots`'s dedup passes:
    /// `Free` symbols compare by name plus the full parent chain (the
    /// original's `Free.__eq__`); everything else compares by identity,
    /// which `Rc::ptr_eq` gives us since every symbol is allocated once.
    pub fn same_symbol(&self, other: &Symbol) -> bool {
        match (self, other) {
            (Symbol::Global(a), Symbol::Global(b)) => Rc::ptr_eq(a, b),
            (Symbol::Attribute(a), Symbol::Attribute(b)) => Rc::ptr_eq(a, b),
            (Symbol::Local(a), Symbol::Local(b)) => Rc::ptr_eq(a, b),
            (Symbol::Free(a), Symbol::Free(b)) => {
                Rc::ptr_eq(a, b) || (a.name == b.name && a.parent.same_symbol(&b.parent))
            }
            _ => false,
        }
    }
}

/// Two-pass slot assignment, ported from `orz.symbol.calculate_slots`.
///
/// Pass 1: globals/attributes are deduped into `names` by first occurrence;
/// locals are split into `varnames` (never captured) or `cellvars`
/// (captured by a nested function) by `is_referenced`; frees are collected
/// into `freevars`, deduped by structural equality.
///
/// Pass 2: every `Free` symbol's slot becomes `len(cellvars) +
/// freevars.index(symbol)` — cell slots and free slots share one
/// contiguous index space in the marshal format's `LOAD_DEREF`/`STORE_DEREF`
/// addressing.
pub struct SlotAssignment {
    pub names: Vec<NameKey>,
    pub varnames: Vec<Symbol>,
    pub freevars: Vec<Symbol>,
    pub cellvars: Vec<Symbol>,
}

pub fn calculate_slots(symbols: &[Symbol]) -> SlotAssignment {
    let mut names: Vec<NameKey> = Vec::new();
    let mut varnames: Vec<Symbol> = Vec::new();
    let mut freevars: Vec<Symbol> = Vec::new();
    let mut cellvars: Vec<Symbol> = Vec::new();

    for symbol in symbols {
        match symbol {
            Symbol::Global(_) | Symbol::Attribute(_) => {
                let key = NameKey { name: symbol.name().to_string(), s: RefCell::new(None) };
                let idx = match names.iter().position(|n| n == &key) {
                    Some(i) => i,
                    None => {
                        names.push(key);
                        names.len() - 1
                    }
                };
                symbol.set_slot(idx as i32);
            }
            Symbol::Free(_) => {
                if !freevars.iter().any(|f| f.same_symbol(symbol)) {
                    freevars.push(symbol.clone());
                }
            }
            Symbol::Local(local) => {
                let slot = if local.is_referenced.get() {
                    let slot = cellvars.len();
                    cellvars.push(symbol.clone());
                    slot
                } else {
                    let slot = varnames.len();
                    varnames.push(symbol.clone());
                    slot
                };
                symbol.set_slot(slot as i32);
            }
        }
    }

    for symbol in symbols {
        if let Symbol::Free(_) = symbol {
            let idx = freevars.iter().position(|f| f.same_symbol(symbol)).unwrap();
            symbol.set_slot((cellvars.len() + idx) as i32);
        }
    }

    SlotAssignment { names, varnames, freevars, cellvars }
}
