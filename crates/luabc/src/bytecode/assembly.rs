//! Per-function bytecode builder and serializer, ported 1:1 from
//! `Assembly`/`Instruction`/`Label`/`assemble_lnotab` in `orz/asm.py`. A
//! function's `Assembly` accumulates instructions against a running stack
//! depth, tracks source lines in `lnotab`, and serializes itself (and any
//! nested function constants) straight into the host VM's marshal format.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::bytecode::opcode::{flag, marshal_tag, stack_effect, Opcode, HAVE_ARGUMENT};
use crate::bytecode::stringtable::{resolve, StringRef};
use crate::symbol::{NameKey, Symbol};

/// A jump target. Never itself emitted; its resolved address is filled in
/// by the `Opcode::Label` pseudo-instruction that marks its position.
#[derive(Debug, Clone)]
pub struct Label(Rc<Cell<Option<u32>>>);

impl Label {
    /// Labels are minted during the label/goto-validation pass, well
    /// before the `Assembly` that will place them exists, so this is a
    /// free constructor rather than an `Assembly` method.
    pub fn new() -> Self {
        Label(Rc::new(Cell::new(None)))
    }

    fn address(&self) -> u32 {
        self.0.get().expect("label used before being placed")
    }

    fn set_address(&self, addr: u32) {
        if let Some(existing) = self.0.get() {
            assert_eq!(existing, addr, "label placed at two different addresses");
            return;
        }
        self.0.set(Some(addr));
    }
}

/// A constant pool entry. `Func` holds a fully-built nested `Assembly`,
/// serialized recursively as a `CODE` object.
pub enum Const {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(StringRef),
    Func(Box<Assembly>),
}

enum Arg {
    None,
    Imm(i64),
    Jump(Label),
}

struct Instruction {
    op: Opcode,
    arg: Arg,
    address: u32,
}

/// A function body under construction: instructions, constants, the name
/// tables `calculate_slots` produced, and the running/max stack depth used
/// to size the host VM's frame.
pub struct Assembly {
    pub name: NameKey,
    pub flags: u32,
    pub argcount: u32,

    pub names: Vec<NameKey>,
    pub varnames: Vec<Symbol>,
    pub freevars: Vec<Symbol>,
    pub cellvars: Vec<Symbol>,

    instructions: Vec<Instruction>,
    consts: Vec<Const>,
    lnotab: Vec<(u32, u32)>,

    last_lineno: u32,
    last_address: i64,
    address_count: u32,

    current_stacksize: i32,
    max_stacksize: i32,
}

impl Assembly {
    pub fn new(
        name: NameKey,
        names: Vec<NameKey>,
        varnames: Vec<Symbol>,
        freevars: Vec<Symbol>,
        cellvars: Vec<Symbol>,
        argcount: u32,
        varargs: bool,
    ) -> Self {
        let mut flags = flag::OPTIMIZED | flag::NEWLOCALS;
        if varargs {
            flags |= flag::VARARGS;
        }
        if freevars.is_empty() && cellvars.is_empty() {
            flags |= flag::NOFREE;
        } else if !freevars.is_empty() {
            flags |= flag::NESTED;
        }

        Assembly {
            name,
            flags,
            argcount,
            names,
            varnames,
            freevars,
            cellvars,
            instructions: Vec::new(),
            consts: Vec::new(),
            lnotab: Vec::new(),
            last_lineno: 0,
            last_address: -1,
            address_count: 0,
            current_stacksize: 0,
            max_stacksize: 0,
        }
    }

    pub fn stacksize(&self) -> i32 {
        self.current_stacksize
    }

    /// Overrides the running stack depth directly. Needed at a handful of
    /// codegen join points (`to_boolean`'s branch merge, the table
    /// constructor's trailing-multi-value extension loop) where the
    /// natural push/pop accounting of the next instruction doesn't match
    /// the depth control flow actually produces there.
    pub fn set_stacksize(&mut self, value: i32) {
        if value > self.max_stacksize {
            self.max_stacksize = value;
        }
        self.current_stacksize = value;
    }

    /// Records a source line for the instruction about to be emitted at the
    /// current address, collapsing a duplicate entry for the same address
    /// the way the original overwrites its last `lnotab` pair.
    pub fn set_lineno(&mut self, lineno: u32) {
        if lineno >= self.last_lineno {
            if self.address_count as i64 == self.last_address {
                self.lnotab.pop();
            }
            self.lnotab.push((self.address_count, lineno));
            self.last_lineno = lineno;
            self.last_address = self.address_count as i64;
        }
    }

    pub fn get_label(&self) -> Label {
        Label::new()
    }

    /// Interns a constant, deduplicating scalar consts by value (matching
    /// CPython small-int/singleton caching closely enough to be harmless)
    /// and strings/nested functions by identity, the way `const is c`
    /// compares in the original.
    pub fn add_const(&mut self, const_: Const) -> u32 {
        for (i, c) in self.consts.iter().enumerate() {
            let same = match (c, &const_) {
                (Const::Nil, Const::Nil) => true,
                (Const::Bool(a), Const::Bool(b)) => a == b,
                (Const::Int(a), Const::Int(b)) => a == b,
                (Const::Float(a), Const::Float(b)) => a.to_bits() == b.to_bits(),
                (Const::Str(a), Const::Str(b)) => Rc::ptr_eq(a, b),
                _ => false,
            };
            if same {
                return i as u32;
            }
        }
        self.consts.push(const_);
        (self.consts.len() - 1) as u32
    }

    pub fn load_const(&mut self, const_: Const) {
        let idx = self.add_const(const_);
        self.emit_imm(Opcode::LoadConst, idx as i64);
    }

    /// Emits an opcode with no immediate argument (asserts the opcode truly
    /// takes none).
    pub fn emit(&mut self, op: Opcode) {
        assert!(!op.has_arg(), "{op:?} requires an argument");
        self.push_instruction(op, Arg::None, None);
    }

    /// Emits an opcode with an immediate (non-jump) argument.
    pub fn emit_imm(&mut self, op: Opcode, arg: i64) {
        assert!(op.has_arg(), "{op:?} takes no argument");
        self.push_instruction(op, Arg::Imm(arg), Some(arg));
    }

    /// Emits a jump to `label`, which may be placed before or after this
    /// point; its address is patched in during serialization.
    pub fn emit_jump(&mut self, op: Opcode, label: Label) {
        assert!(op.is_jrel() || op.is_jabs(), "{op:?} is not a jump opcode");
        self.push_instruction(op, Arg::Jump(label), None);
    }

    /// Places `label` at the current address (the original's
    /// `emit(Opcode.LABEL, label)`).
    pub fn place_label(&mut self, label: &Label) {
        label.set_address(self.address_count);
        self.instructions.push(Instruction {
            op: Opcode::Label,
            arg: Arg::None,
            address: self.address_count,
        });
    }

    fn push_instruction(&mut self, op: Opcode, arg: Arg, stack_arg: Option<i64>) {
        let (popped, pushed) = stack_effect(op, stack_arg);
        self.set_stacksize(self.current_stacksize - popped + pushed);

        let address = self.address_count;
        self.instructions.push(Instruction { op, arg, address });

        self.address_count += if op.has_arg() { 3 } else { 1 };
    }

    fn write_string(out: &mut Vec<u8>, entry: &StringRef) {
        let (is_ref, index, interned, text) = resolve(entry);
        if is_ref {
            out.push(marshal_tag::STRINGREF);
            out.extend_from_slice(&index.to_le_bytes());
        } else {
            out.push(if interned { marshal_tag::INTERNED } else { marshal_tag::STRING });
            out.extend_from_slice(&(text.len() as u32).to_le_bytes());
            out.extend_from_slice(text);
        }
    }

    fn name_string(name: &NameKey) -> StringRef {
        name.s
            .borrow()
            .clone()
            .expect("NameKey must be interned before serialization")
    }

    /// Serializes this function (and, recursively, every nested function
    /// stored as a `Const::Func`) as a marshal `CODE` object.
    pub fn serialize(&self, out: &mut Vec<u8>, filename: &str) {
        out.push(marshal_tag::CODE);
        out.extend_from_slice(&self.argcount.to_le_bytes());
        out.extend_from_slice(&((self.varnames.len() + self.cellvars.len()) as u32).to_le_bytes());
        out.extend_from_slice(&(self.max_stacksize as u32).to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());

        out.push(marshal_tag::STRING);
        out.extend_from_slice(&self.address_count.to_le_bytes());

        for inst in &self.instructions {
            if matches!(inst.op, Opcode::Label) {
                continue;
            }
            out.push(inst.op.code() as u8);
            if !inst.op.has_arg() {
                continue;
            }

            let arg = match &inst.arg {
                Arg::Jump(label) if inst.op.is_jabs() => label.address(),
                Arg::Jump(label) if inst.op.is_jrel() => {
                    label.address() - inst.address - 3
                }
                Arg::Imm(v) => *v as u32,
                _ => unreachable!("jump/imm mismatch for {:?}", inst.op),
            };
            out.extend_from_slice(&(arg as u16).to_le_bytes());
        }

        out.push(marshal_tag::TUPLE);
        out.extend_from_slice(&(self.consts.len() as u32).to_le_bytes());
        for const_ in &self.consts {
            match const_ {
                Const::Func(asm) => asm.serialize(out, filename),
                Const::Str(s) => Self::write_string(out, s),
                Const::Nil => out.push(marshal_tag::NONE),
                Const::Bool(true) => out.push(marshal_tag::TRUE),
                Const::Bool(false) => out.push(marshal_tag::FALSE),
                Const::Int(v) => {
                    if *v >= i32::MIN as i64 && *v <= i32::MAX as i64 {
                        out.push(marshal_tag::INT);
                        out.extend_from_slice(&(*v as i32).to_le_bytes());
                    } else {
                        out.push(marshal_tag::INT64);
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                }
                Const::Float(v) => {
                    out.push(marshal_tag::BINARY_FLOAT);
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }

        macro_rules! write_name_tuple {
            ($names:expr) => {
                out.push(marshal_tag::TUPLE);
                out.extend_from_slice(&($names.len() as u32).to_le_bytes());
                for name in $names {
                    Self::write_string(out, &Self::name_string(name));
                }
            };
        }
        write_name_tuple!(&self.names);

        macro_rules! write_symbol_tuple {
            ($symbols:expr) => {
                out.push(marshal_tag::TUPLE);
                out.extend_from_slice(&($symbols.len() as u32).to_le_bytes());
                for symbol in $symbols {
                    let s = symbol
                        .interned()
                        .expect("symbol must be interned before serialization");
                    Self::write_string(out, &s);
                }
            };
        }
        write_symbol_tuple!(&self.varnames);
        write_symbol_tuple!(&self.freevars);
        write_symbol_tuple!(&self.cellvars);

        out.push(marshal_tag::STRING);
        out.extend_from_slice(&(filename.len() as u32).to_le_bytes());
        out.extend_from_slice(filename.as_bytes());

        Self::write_string(out, &Self::name_string(&self.name));

        let (first_lineno, lnotab) = assemble_lnotab(&self.lnotab);
        out.extend_from_slice(&first_lineno.to_le_bytes());

        out.push(marshal_tag::STRING);
        out.extend_from_slice(&(lnotab.len() as u32).to_le_bytes());
        out.extend_from_slice(&lnotab);
    }
}

/// Packs `(address, lineno)` breakpoints into the byte-pair `lnotab`
/// encoding, splitting any delta too large for a single byte into
/// `0xff 0x00` (address) / `0x00 0xff` (line) stride pairs — ported 1:1
/// from `assemble_lnotab` in `orz/asm.py`.
fn assemble_lnotab(lnotab: &[(u32, u32)]) -> (u32, Vec<u8>) {
    assert!(!lnotab.is_empty());
    assert_eq!(lnotab[0].0, 0);

    let first_lineno = lnotab[0].1;
    let mut result = Vec::new();

    for pair in lnotab.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let mut offset = b.0 - a.0;
        let mut lineno = b.1 as i64 - a.1 as i64;

        for _ in 0..(offset / 255) {
            result.extend_from_slice(&[0xff, 0x00]);
        }
        offset %= 255;

        if lineno < 255 {
            result.push(offset as u8);
            result.push(lineno as u8);
            continue;
        }

        result.push(offset as u8);
        result.push(255);
        lineno -= 255;

        for _ in 0..(lineno / 255) {
            result.extend_from_slice(&[0x00, 0xff]);
        }
        lineno %= 255;

        result.push(0);
        result.push(lineno as u8);
    }

    (first_lineno, result)
}

#[allow(dead_code)]
fn assert_have_argument(op: Opcode) {
    if op.has_arg() {
        assert!(op.code() >= HAVE_ARGUMENT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::stringtable::StringTable;
    use std::cell::RefCell as StdRefCell;

    fn name(n: &str) -> NameKey {
        NameKey { name: n.to_string(), s: StdRefCell::new(None) }
    }

    #[test]
    fn stacksize_tracks_peak_not_current() {
        let mut asm = Assembly::new(name("f"), vec![], vec![], vec![], vec![], 0, true);
        asm.load_const(Const::Int(1));
        asm.load_const(Const::Int(2));
        asm.emit(Opcode::BinaryAdd);
        asm.emit(Opcode::ReturnValue);
        assert_eq!(asm.max_stacksize, 2);
        assert_eq!(asm.stacksize(), 0);
    }

    #[test]
    fn jump_forward_patches_relative_address() {
        let mut asm = Assembly::new(name("f"), vec![], vec![], vec![], vec![], 0, true);
        let label = asm.get_label();
        asm.emit_jump(Opcode::JumpForward, label.clone());
        asm.place_label(&label);
        asm.emit(Opcode::ReturnValue);

        let mut table = StringTable::new();
        let sref = table.add(b"f", true);
        table.close();
        *asm.name.s.borrow_mut() = Some(sref);

        let mut out = Vec::new();
        asm.serialize(&mut out, "<test>");
        assert!(!out.is_empty());
    }

    #[test]
    fn lnotab_splits_large_offsets() {
        let (first, bytes) = assemble_lnotab(&[(0, 1), (600, 2)]);
        assert_eq!(first, 1);
        assert_eq!(&bytes[..2], &[0xff, 0x00]);
        assert_eq!(&bytes[2..4], &[0xff, 0x00]);
        assert_eq!(&bytes[4..6], &[90, 1]);
    }
}
