// Structural invariants over the compiler's intermediate data, as opposed
// to end-to-end program behavior (see test_end_to_end.rs).
use crate::bytecode::stringtable::{resolve, StringTable};
use crate::codegen;
use crate::label;
use crate::lexer;
use crate::parser;
use crate::scope;

fn compile_to_assembly(source: &str) -> crate::bytecode::assembly::Assembly {
    let tokens = lexer::tokenize(source, "<test>").expect("lex");
    let file = parser::parse(&tokens, "<test>", source).expect("parse");
    scope::resolve(&file, "<test>", source).expect("scope");
    label::resolve(&file, "<test>", source).expect("label");
    let (asm, _table) = codegen::compile_file(&file, "<test>").expect("codegen");
    asm
}

#[test]
fn repeated_insert_promotes_original_to_interned_and_adds_a_backreference() {
    let mut table = StringTable::new();
    let a = table.add(b"x", false);
    let b = table.add(b"x", true);
    table.close();

    let (a_is_ref, a_idx, a_interned, a_text) = resolve(&a);
    let (b_is_ref, b_idx, _, b_text) = resolve(&b);

    assert!(!a_is_ref);
    assert!(a_interned);
    assert_eq!(a_text, b"x");

    assert!(b_is_ref);
    assert_eq!(b_idx, a_idx);
    assert_eq!(b_text, b"x");
}

#[test]
fn a_captured_local_is_a_cellvar_not_a_varname() {
    let source = r#"
        local captured = 1
        local plain = 2
        local function inner()
            return captured
        end
        return plain, inner
    "#;
    let asm = compile_to_assembly(source);

    assert!(asm.cellvars.iter().any(|s| s.name() == "captured"));
    assert!(!asm.varnames.iter().any(|s| s.name() == "captured"));

    assert!(asm.varnames.iter().any(|s| s.name() == "plain"));
    assert!(asm.varnames.iter().any(|s| s.name() == "inner"));
}

#[test]
fn varnames_and_cellvars_never_share_a_symbol() {
    let source = r#"
        local a, b, c = 1, 2, 3
        local function f() return a end
        local function g() return b end
        return c, f, g
    "#;
    let asm = compile_to_assembly(source);

    for cellvar in &asm.cellvars {
        assert!(
            !asm.varnames.iter().any(|v| v.name() == cellvar.name()),
            "{} assigned to both varnames and cellvars",
            cellvar.name()
        );
    }
}

#[test]
fn disassembly_line_numbers_are_non_decreasing() {
    let source = "local a = 1\nlocal b = 2\nlocal c = 3\nreturn a + b + c\n";
    let bytes = crate::compile(source, "<test>").expect("should compile");
    let dump = crate::disassemble(&bytes);

    let mut last = 0u32;
    for line in dump.lines() {
        let Some(rest) = line.strip_prefix('\t') else { continue };
        let Some(start) = rest.find('[') else { continue };
        let Some(end) = rest.find(']') else { continue };
        let Ok(n) = rest[start + 1..end].parse::<u32>() else { continue };
        assert!(n >= last, "line numbers should be non-decreasing, got {n} after {last}");
        last = n;
    }
    assert!(last >= 4);
}
