//! Top-level pipeline entry point and the `--dump` disassembler's reader,
//! ported from `orz/asm.py`'s `Type` tag layout and the `dis`-style listing
//! `bytecode_dump.rs` produces for the register VM. `compile` just wires the
//! existing passes together and asks the resulting `Assembly` to serialize
//! itself; `disassemble` walks that same byte layout back in reverse.

use std::io::Write;

use crate::bytecode::assembly::Assembly;
use crate::bytecode::opcode::{marshal_tag, Opcode};
use crate::codegen;
use crate::error::{CompileError, Result};
use crate::label;
use crate::lexer;
use crate::parser;
use crate::scope;

/// Runs the full lexer -> parser -> scope -> label -> codegen pipeline and
/// serializes the resulting module `Assembly` into the marshal-derived
/// code-object bytes the host VM loads.
pub fn compile(source: &str, filename: &str) -> Result<Vec<u8>> {
    let tokens = lexer::tokenize(source, filename)?;
    let file = parser::parse(&tokens, filename, source)?;
    scope::resolve(&file, filename, source)?;
    label::resolve(&file, filename, source)?;
    let (asm, _table) = codegen::compile_file(&file, filename)?;

    let mut out = Vec::new();
    asm.serialize(&mut out, filename);
    Ok(out)
}

/// Same pipeline as `compile`, but hands the serialized bytes straight to
/// `writer` instead of returning a `Vec<u8>` the caller has to write out
/// itself — the CLI driver's `-o <path>` case.
pub fn compile_to_writer(source: &str, filename: &str, writer: &mut impl Write) -> Result<()> {
    let bytes = compile(source, filename)?;
    writer
        .write_all(&bytes)
        .map_err(|e| CompileError::internal(format!("failed writing compiled output: {e}")))
}

/// A cursor over the marshal byte stream. `compile`'s output is always
/// well-formed, so a short or mistagged read is an internal error rather
/// than something worth a `Result` here; `disassemble` is a debugging tool,
/// not part of the compile pipeline proper.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let b = self.bytes[self.pos];
        self.pos += 1;
        b
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn i32(&mut self) -> i32 {
        self.u32() as i32
    }

    fn i64(&mut self) -> i64 {
        let v = i64::from_le_bytes(self.bytes[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn f64(&mut self) -> f64 {
        let v = f64::from_le_bytes(self.bytes[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn bytes(&mut self, n: usize) -> &'a [u8] {
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        s
    }

    /// Reads a length-prefixed `STRING` value (no type tag: `filename`,
    /// `lnotab` and the bytecode string itself are all written this way).
    fn raw_string(&mut self) -> String {
        assert_eq!(self.u8(), marshal_tag::STRING, "expected untagged STRING");
        let len = self.u32() as usize;
        String::from_utf8_lossy(self.bytes(len)).into_owned()
    }

    /// Reads a `STRING`/`INTERNED`/`STRINGREF` value, interning new text
    /// into `pool` in the same order `StringTable::close` assigned
    /// canonical indices, so a later `STRINGREF` resolves against it.
    fn interned_string(&mut self, pool: &mut Vec<String>) -> String {
        match self.u8() {
            marshal_tag::STRINGREF => {
                let idx = self.u32() as usize;
                pool[idx].clone()
            }
            marshal_tag::INTERNED => {
                let len = self.u32() as usize;
                let s = String::from_utf8_lossy(self.bytes(len)).into_owned();
                pool.push(s.clone());
                s
            }
            marshal_tag::STRING => {
                let len = self.u32() as usize;
                String::from_utf8_lossy(self.bytes(len)).into_owned()
            }
            tag => panic!("unexpected string tag {tag:#04x}"),
        }
    }

    fn tuple_len(&mut self) -> u32 {
        assert_eq!(self.u8(), marshal_tag::TUPLE, "expected TUPLE");
        self.u32()
    }
}

/// A constant pool entry as read back from the byte stream.
enum DumpConst {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Code(CodeObject),
}

/// A fully decoded code object: everything `Assembly::serialize` wrote for
/// one function, plus its decoded instruction stream.
struct CodeObject {
    argcount: u32,
    nlocals: u32,
    stacksize: u32,
    flags: u32,
    instructions: Vec<(usize, Opcode, Option<u16>)>,
    consts: Vec<DumpConst>,
    names: Vec<String>,
    varnames: Vec<String>,
    freevars: Vec<String>,
    cellvars: Vec<String>,
    filename: String,
    name: String,
    firstlineno: u32,
    lnotab: Vec<u8>,
}

fn read_code_object(r: &mut Reader, pool: &mut Vec<String>) -> CodeObject {
    assert_eq!(r.u8(), marshal_tag::CODE, "expected CODE object");

    let argcount = r.u32();
    let nlocals = r.u32();
    let stacksize = r.u32();
    let flags = r.u32();

    assert_eq!(r.u8(), marshal_tag::STRING, "expected untagged STRING for code");
    let code_len = r.u32() as usize;
    let code = r.bytes(code_len);

    let mut instructions = Vec::new();
    let mut pc = 0usize;
    while pc < code.len() {
        let op_byte = code[pc];
        let Some(op) = Opcode::from_code(op_byte) else {
            panic!("unknown opcode byte {op_byte} at offset {pc}");
        };
        if op.has_arg() {
            let arg = u16::from_le_bytes([code[pc + 1], code[pc + 2]]);
            instructions.push((pc, op, Some(arg)));
            pc += 3;
        } else {
            instructions.push((pc, op, None));
            pc += 1;
        }
    }

    let const_count = r.tuple_len();
    let mut consts = Vec::with_capacity(const_count as usize);
    for _ in 0..const_count {
        consts.push(read_const(r, pool));
    }

    let names = read_string_tuple(r, pool);
    let varnames = read_string_tuple(r, pool);
    let freevars = read_string_tuple(r, pool);
    let cellvars = read_string_tuple(r, pool);

    let filename = r.raw_string();
    let name = r.interned_string(pool);
    let firstlineno = r.u32();

    assert_eq!(r.u8(), marshal_tag::STRING, "expected untagged STRING for lnotab");
    let lnotab_len = r.u32() as usize;
    let lnotab = r.bytes(lnotab_len).to_vec();

    CodeObject {
        argcount,
        nlocals,
        stacksize,
        flags,
        instructions,
        consts,
        names,
        varnames,
        freevars,
        cellvars,
        filename,
        name,
        firstlineno,
        lnotab,
    }
}

fn read_const(r: &mut Reader, pool: &mut Vec<String>) -> DumpConst {
    // Consts are peeked rather than consumed by a shared dispatch because
    // `CODE` and string tags need different payload readers; this mirrors
    // `Assembly::serialize`'s own per-variant `match` exactly.
    match r.bytes[r.pos] {
        marshal_tag::CODE => DumpConst::Code(read_code_object(r, pool)),
        marshal_tag::STRING | marshal_tag::INTERNED | marshal_tag::STRINGREF => {
            DumpConst::Str(r.interned_string(pool))
        }
        marshal_tag::NONE => {
            r.u8();
            DumpConst::Nil
        }
        marshal_tag::TRUE => {
            r.u8();
            DumpConst::Bool(true)
        }
        marshal_tag::FALSE => {
            r.u8();
            DumpConst::Bool(false)
        }
        marshal_tag::INT => {
            r.u8();
            DumpConst::Int(r.i32() as i64)
        }
        marshal_tag::INT64 => {
            r.u8();
            DumpConst::Int(r.i64())
        }
        marshal_tag::BINARY_FLOAT => {
            r.u8();
            DumpConst::Float(r.f64())
        }
        tag => panic!("unexpected const tag {tag:#04x}"),
    }
}

fn read_string_tuple(r: &mut Reader, pool: &mut Vec<String>) -> Vec<String> {
    let len = r.tuple_len();
    (0..len).map(|_| r.interned_string(pool)).collect()
}

fn format_const(c: &DumpConst) -> String {
    match c {
        DumpConst::Nil => "nil".to_string(),
        DumpConst::Bool(b) => b.to_string(),
        DumpConst::Int(v) => {
            let mut buf = itoa::Buffer::new();
            buf.format(*v).to_string()
        }
        DumpConst::Float(v) => v.to_string(),
        DumpConst::Str(s) => format!("{s:?}"),
        DumpConst::Code(code) => format!("<code {}>", code.name),
    }
}

/// Renders a decoded `CodeObject` (and, recursively, every nested function
/// in its constant pool) the way `bytecode_dump.rs` lists a chunk: a header
/// line, one `pc\t[line]\tMNEMONIC\targ` row per instruction, and a trailing
/// constants listing.
fn dump_code(code: &CodeObject, out: &mut String) {
    out.push_str(&format!(
        "\n{} ({} instructions) in {}\n",
        code.name,
        code.instructions.len(),
        code.filename,
    ));
    out.push_str(&format!(
        "{} params, {} locals, {} freevar{}, {} cellvar{}, {} stacksize, {} const{}, flags={:#06x}\n",
        code.argcount,
        code.nlocals,
        code.freevars.len(),
        if code.freevars.len() != 1 { "s" } else { "" },
        code.cellvars.len(),
        if code.cellvars.len() != 1 { "s" } else { "" },
        code.stacksize,
        code.consts.len(),
        if code.consts.len() != 1 { "s" } else { "" },
        code.flags,
    ));

    let lines = expand_lnotab(code.firstlineno, &code.lnotab);

    for (pc, op, arg) in &code.instructions {
        let line = lines.iter().rev().find(|(addr, _)| *addr <= *pc).map_or(code.firstlineno, |(_, l)| *l);

        let detail = match arg {
            Some(a) => format!("{:<22}{}", op.mnemonic(), a),
            None => op.mnemonic().to_string(),
        };
        let comment = match (op, arg) {
            (Opcode::LoadConst, Some(idx)) => code
                .consts
                .get(*idx as usize)
                .map(|c| format!("  ; {}", format_const(c)))
                .unwrap_or_default(),
            (Opcode::LoadName | Opcode::LoadGlobal | Opcode::LoadAttr | Opcode::StoreName
            | Opcode::StoreGlobal | Opcode::StoreAttr | Opcode::DeleteName, Some(idx)) => code
                .names
                .get(*idx as usize)
                .map(|n| format!("  ; {n}"))
                .unwrap_or_default(),
            (Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast, Some(idx)) => code
                .varnames
                .get(*idx as usize)
                .map(|n| format!("  ; {n}"))
                .unwrap_or_default(),
            _ => String::new(),
        };

        out.push_str(&format!("\t{}\t[{}]\t{}{}\n", pc, line, detail, comment));
    }

    if !code.consts.is_empty() {
        out.push_str(&format!("constants ({}) for {}:\n", code.consts.len(), code.name));
        for (idx, c) in code.consts.iter().enumerate() {
            out.push_str(&format!("\t{}\t{}\n", idx, format_const(c)));
        }
    }

    for c in &code.consts {
        if let DumpConst::Code(nested) = c {
            dump_code(nested, out);
        }
    }
}

/// Expands the `(addr_delta, line_delta)` byte-pair `lnotab` into absolute
/// `(address, line)` breakpoints, undoing `assemble_lnotab`'s 255-stride
/// splitting.
fn expand_lnotab(firstlineno: u32, lnotab: &[u8]) -> Vec<(usize, u32)> {
    let mut result = vec![(0usize, firstlineno)];
    let (mut addr, mut line) = (0i64, firstlineno as i64);

    for pair in lnotab.chunks(2) {
        if pair.len() < 2 {
            break;
        }
        addr += pair[0] as i64;
        line += pair[1] as i64;
        if pair[0] != 0 || pair[1] != 0 {
            result.push((addr as usize, line as u32));
        }
    }

    result
}

/// Decodes `bytes` (as produced by `compile`) into a human-readable
/// instruction listing, in the style of the host VM's own bytecode dump
/// tool.
pub fn disassemble(bytes: &[u8]) -> String {
    let mut pool = Vec::new();
    let mut reader = Reader::new(bytes);
    let code = read_code_object(&mut reader, &mut pool);

    let mut out = String::new();
    dump_code(&code, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_disassembles_a_return_statement() {
        let bytes = compile("return 1 + 2", "<test>").expect("compile should succeed");
        assert_eq!(bytes[0], marshal_tag::CODE);

        let dump = disassemble(&bytes);
        assert!(dump.contains("<module>"));
        assert!(dump.contains("RETURN_VALUE"));
    }

    #[test]
    fn roundtrips_a_closure_with_an_upvalue() {
        let source = "local function counter() local n = 0 return function() n = n + 1 return n end end";
        let bytes = compile(source, "<test>").expect("compile should succeed");
        let dump = disassemble(&bytes);
        assert!(dump.contains("MAKE_CLOSURE"));
        assert!(dump.contains("LOAD_DEREF") || dump.contains("STORE_DEREF"));
    }

    #[test]
    fn goto_into_local_scope_is_rejected() {
        let source = "do goto skip local x = 1 ::skip:: end";
        assert!(compile(source, "<test>").is_err());
    }
}
