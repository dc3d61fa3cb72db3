// End-to-end compile()/disassemble() scenarios over small Lua programs.
use crate::*;

#[test]
fn returns_a_constant_arithmetic_expression() {
    let bytes = compile("return 1 + 2", "<test>").expect("should compile");
    let dump = disassemble(&bytes);
    assert!(dump.contains("BINARY_ADD"));
    assert!(dump.contains("RETURN_VALUE"));
}

#[test]
fn indexes_a_table_constructor() {
    let bytes = compile("local t = {10, 20, 30} return t[2]", "<test>").expect("should compile");
    let dump = disassemble(&bytes);
    assert!(dump.contains("BUILD_MAP") || dump.contains("STORE_MAP"));
    assert!(dump.contains("BINARY_SUBSCR"));
}

#[test]
fn closure_captures_an_upvalue_as_a_counter() {
    let source = r#"
        local function make_counter()
            local n = 0
            return function()
                n = n + 1
                return n
            end
        end
        return make_counter()
    "#;
    let bytes = compile(source, "<test>").expect("should compile");
    let dump = disassemble(&bytes);
    assert!(dump.contains("MAKE_CLOSURE"));
    assert!(dump.contains("LOAD_CLOSURE"));
    assert!(dump.contains("LOAD_DEREF"));
    assert!(dump.contains("STORE_DEREF"));
}

#[test]
fn multi_assignment_swaps_two_locals() {
    let bytes = compile("local a, b = 1, 2 a, b = b, a return a, b", "<test>")
        .expect("should compile");
    let dump = disassemble(&bytes);
    assert!(dump.contains("STORE_FAST"));
    assert!(dump.contains("LOAD_FAST"));
}

#[test]
fn numeric_for_loop_squares_a_range() {
    let source = r#"
        local squares = {}
        for i = 1, 10 do
            squares[i] = i * i
        end
        return squares
    "#;
    let bytes = compile(source, "<test>").expect("should compile");
    let dump = disassemble(&bytes);
    assert!(dump.contains("FOR_ITER") || dump.contains("GET_ITER"));
    assert!(dump.contains("BINARY_MULTIPLY"));
}

#[test]
fn goto_into_scope_of_later_local_is_a_compile_error() {
    let source = "do goto skip local x = 1 ::skip:: end";
    let err = compile(source, "<test>").unwrap_err();
    assert!(matches!(err, CompileError::Label { .. }));
}

#[test]
fn compiling_twice_is_deterministic() {
    let source = "local t = {} for i = 1, 5 do t[i] = i end return t";
    let a = compile(source, "<test>").expect("should compile");
    let b = compile(source, "<test>").expect("should compile");
    assert_eq!(a, b);
}
