//! Stack-VM opcode set, ported 1:1 from `orz/asm.py`'s `Type`/`Flag`/`Opcode`
//! classes. The numeric values are load-bearing: they must match the host
//! VM's CPython-2.7-derived dispatch table for the marshalled bytecode this
//! crate emits to execute there.

/// Marshal type tags (single ASCII byte per CPython's `marshal` format).
pub mod marshal_tag {
    pub const NULL: u8 = b'0';
    pub const NONE: u8 = b'N';
    pub const FALSE: u8 = b'F';
    pub const TRUE: u8 = b'T';
    pub const INT: u8 = b'i';
    pub const INT64: u8 = b'I';
    pub const BINARY_FLOAT: u8 = b'g';
    pub const STRING: u8 = b's';
    pub const INTERNED: u8 = b't';
    pub const STRINGREF: u8 = b'R';
    pub const TUPLE: u8 = b'(';
    pub const CODE: u8 = b'c';
}

/// Code-object flag bits.
pub mod flag {
    pub const OPTIMIZED: u32 = 0x0001;
    pub const NEWLOCALS: u32 = 0x0002;
    pub const VARARGS: u32 = 0x0004;
    pub const NESTED: u32 = 0x0010;
    pub const NOFREE: u32 = 0x0040;
}

pub const HAVE_ARGUMENT: u16 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,
    RotFour = 5,
    Nop = 9,
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryDivide = 21,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    Slice0 = 30,
    Slice1 = 31,
    Slice2 = 32,
    Slice3 = 33,
    StoreSlice0 = 40,
    StoreSlice1 = 41,
    StoreSlice2 = 42,
    StoreSlice3 = 43,
    StoreMap = 54,
    StoreSubscr = 60,
    GetIter = 68,
    BreakLoop = 80,
    LoadLocals = 82,
    ReturnValue = 83,
    PopBlock = 87,
    EndFinally = 88,
    StoreName = 90,
    DeleteName = 91,
    UnpackSequence = 92,
    ForIter = 93,
    StoreAttr = 95,
    StoreGlobal = 97,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    BuildMap = 105,
    LoadAttr = 106,
    CompareOp = 107,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    SetupLoop = 120,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    RaiseVarargs = 130,
    CallFunction = 131,
    MakeFunction = 132,
    BuildSlice = 133,
    MakeClosure = 134,
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    CallFunctionVar = 140,
    CallFunctionKw = 141,
    CallFunctionVarKw = 142,

    /// Pseudo-instruction: a jump target. Never serialized; resolved to a
    /// concrete address when the function it's in is serialized.
    Label = 0xffff,
}

impl Opcode {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Reverse lookup from a serialized opcode byte, for disassembly.
    pub fn from_code(code: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match code {
            1 => PopTop,
            2 => RotTwo,
            3 => RotThree,
            4 => DupTop,
            5 => RotFour,
            9 => Nop,
            10 => UnaryPositive,
            11 => UnaryNegative,
            12 => UnaryNot,
            15 => UnaryInvert,
            19 => BinaryPower,
            20 => BinaryMultiply,
            21 => BinaryDivide,
            22 => BinaryModulo,
            23 => BinaryAdd,
            24 => BinarySubtract,
            25 => BinarySubscr,
            26 => BinaryFloorDivide,
            27 => BinaryTrueDivide,
            30 => Slice0,
            31 => Slice1,
            32 => Slice2,
            33 => Slice3,
            40 => StoreSlice0,
            41 => StoreSlice1,
            42 => StoreSlice2,
            43 => StoreSlice3,
            54 => StoreMap,
            60 => StoreSubscr,
            68 => GetIter,
            80 => BreakLoop,
            82 => LoadLocals,
            83 => ReturnValue,
            87 => PopBlock,
            88 => EndFinally,
            90 => StoreName,
            91 => DeleteName,
            92 => UnpackSequence,
            93 => ForIter,
            95 => StoreAttr,
            97 => StoreGlobal,
            100 => LoadConst,
            101 => LoadName,
            102 => BuildTuple,
            103 => BuildList,
            105 => BuildMap,
            106 => LoadAttr,
            107 => CompareOp,
            110 => JumpForward,
            111 => JumpIfFalseOrPop,
            112 => JumpIfTrueOrPop,
            113 => JumpAbsolute,
            114 => PopJumpIfFalse,
            115 => PopJumpIfTrue,
            116 => LoadGlobal,
            120 => SetupLoop,
            124 => LoadFast,
            125 => StoreFast,
            126 => DeleteFast,
            130 => RaiseVarargs,
            131 => CallFunction,
            132 => MakeFunction,
            133 => BuildSlice,
            134 => MakeClosure,
            135 => LoadClosure,
            136 => LoadDeref,
            137 => StoreDeref,
            140 => CallFunctionVar,
            141 => CallFunctionKw,
            142 => CallFunctionVarKw,
            _ => return None,
        })
    }

    /// The mnemonic used in `disassemble`'s output, matching the
    /// `dis`-module-style names a CPython 2.7 bytecode dump uses.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            PopTop => "POP_TOP",
            RotTwo => "ROT_TWO",
            RotThree => "ROT_THREE",
            DupTop => "DUP_TOP",
            RotFour => "ROT_FOUR",
            Nop => "NOP",
            UnaryPositive => "UNARY_POSITIVE",
            UnaryNegative => "UNARY_NEGATIVE",
            UnaryNot => "UNARY_NOT",
            UnaryInvert => "UNARY_INVERT",
            BinaryPower => "BINARY_POWER",
            BinaryMultiply => "BINARY_MULTIPLY",
            BinaryDivide => "BINARY_DIVIDE",
            BinaryModulo => "BINARY_MODULO",
            BinaryAdd => "BINARY_ADD",
            BinarySubtract => "BINARY_SUBTRACT",
            BinarySubscr => "BINARY_SUBSCR",
            BinaryFloorDivide => "BINARY_FLOOR_DIVIDE",
            BinaryTrueDivide => "BINARY_TRUE_DIVIDE",
            Slice0 => "SLICE+0",
            Slice1 => "SLICE+1",
            Slice2 => "SLICE+2",
            Slice3 => "SLICE+3",
            StoreSlice0 => "STORE_SLICE+0",
            StoreSlice1 => "STORE_SLICE+1",
            StoreSlice2 => "STORE_SLICE+2",
            StoreSlice3 => "STORE_SLICE+3",
            StoreMap => "STORE_MAP",
            StoreSubscr => "STORE_SUBSCR",
            GetIter => "GET_ITER",
            BreakLoop => "BREAK_LOOP",
            LoadLocals => "LOAD_LOCALS",
            ReturnValue => "RETURN_VALUE",
            PopBlock => "POP_BLOCK",
            EndFinally => "END_FINALLY",
            StoreName => "STORE_NAME",
            DeleteName => "DELETE_NAME",
            UnpackSequence => "UNPACK_SEQUENCE",
            ForIter => "FOR_ITER",
            StoreAttr => "STORE_ATTR",
            StoreGlobal => "STORE_GLOBAL",
            LoadConst => "LOAD_CONST",
            LoadName => "LOAD_NAME",
            BuildTuple => "BUILD_TUPLE",
            BuildList => "BUILD_LIST",
            BuildMap => "BUILD_MAP",
            LoadAttr => "LOAD_ATTR",
            CompareOp => "COMPARE_OP",
            JumpForward => "JUMP_FORWARD",
            JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            JumpAbsolute => "JUMP_ABSOLUTE",
            PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            LoadGlobal => "LOAD_GLOBAL",
            SetupLoop => "SETUP_LOOP",
            LoadFast => "LOAD_FAST",
            StoreFast => "STORE_FAST",
            DeleteFast => "DELETE_FAST",
            RaiseVarargs => "RAISE_VARARGS",
            CallFunction => "CALL_FUNCTION",
            MakeFunction => "MAKE_FUNCTION",
            BuildSlice => "BUILD_SLICE",
            MakeClosure => "MAKE_CLOSURE",
            LoadClosure => "LOAD_CLOSURE",
            LoadDeref => "LOAD_DEREF",
            StoreDeref => "STORE_DEREF",
            CallFunctionVar => "CALL_FUNCTION_VAR",
            CallFunctionKw => "CALL_FUNCTION_KW",
            CallFunctionVarKw => "CALL_FUNCTION_VAR_KW",
            Label => "LABEL",
        }
    }

    pub fn has_arg(self) -> bool {
        self.code() >= HAVE_ARGUMENT
    }

    pub fn is_jrel(self) -> bool {
        matches!(self, Opcode::ForIter | Opcode::JumpForward | Opcode::SetupLoop)
    }

    pub fn is_jabs(self) -> bool {
        matches!(
            self,
            Opcode::JumpAbsolute
                | Opcode::JumpIfTrueOrPop
                | Opcode::JumpIfFalseOrPop
                | Opcode::PopJumpIfTrue
                | Opcode::PopJumpIfFalse
        )
    }
}

/// Stack effect of an opcode given its argument, as `(popped, pushed)`.
/// A handful of opcodes have variadic effects driven by the immediate
/// argument (`BuildTuple n` pops `n` and pushes 1, etc.) — ported from
/// `Opcode._stack_effect` in `orz/asm.py`.
pub fn stack_effect(op: Opcode, arg: Option<i64>) -> (i32, i32) {
    use Opcode::*;
    match op {
        Nop => (0, 0),
        PopTop => (1, 0),
        RotTwo => (2, 2),
        RotThree => (3, 3),
        RotFour => (4, 4),
        DupTop => (1, 2),
        UnpackSequence => (1, arg.unwrap_or(0) as i32),
        UnaryPositive | UnaryNegative | UnaryNot | UnaryInvert => (1, 1),
        GetIter => (1, 1),
        BinaryPower | BinaryMultiply | BinaryDivide | BinaryFloorDivide | BinaryTrueDivide
        | BinaryModulo | BinaryAdd | BinarySubtract | BinarySubscr | CompareOp => (2, 1),
        Slice0 => (1, 1),
        Slice1 => (2, 1),
        Slice2 => (2, 1),
        Slice3 => (3, 1),
        StoreSlice0 => (2, 0),
        StoreSlice1 => (3, 0),
        StoreSlice2 => (3, 0),
        StoreSlice3 => (4, 0),
        StoreSubscr => (3, 0),
        LoadLocals | LoadConst | LoadName | LoadGlobal | LoadFast | LoadDeref => (0, 1),
        LoadAttr => (1, 1),
        StoreName | StoreGlobal | StoreFast | StoreDeref => (1, 0),
        StoreAttr => (2, 0),
        DeleteName | DeleteFast => (0, 0),
        BuildTuple => (arg.unwrap_or(0) as i32, 1),
        BuildList => (arg.unwrap_or(0) as i32, 1),
        BuildMap => (0, 1),
        StoreMap => (3, 1),
        BuildSlice => (arg.unwrap_or(0) as i32, 1),
        LoadClosure => (0, 1),
        MakeClosure => (arg.unwrap_or(0) as i32 + 2, 1),
        MakeFunction => (arg.unwrap_or(0) as i32 + 1, 1),
        CallFunction => {
            let n = arg.unwrap_or(0);
            (((n & 0xff) + ((n >> 16) & 0xff) * 2 + 1) as i32, 1)
        }
        CallFunctionVar | CallFunctionKw => {
            let n = arg.unwrap_or(0);
            (((n & 0xff) + ((n >> 16) & 0xff) * 2 + 2) as i32, 1)
        }
        CallFunctionVarKw => {
            let n = arg.unwrap_or(0);
            (((n & 0xff) + ((n >> 16) & 0xff) * 2 + 3) as i32, 1)
        }
        JumpForward | PopJumpIfTrue | PopJumpIfFalse | JumpIfTrueOrPop | JumpIfFalseOrPop
        | JumpAbsolute => {
            // POP_JUMP_IF_* / JUMP_IF_*_OR_POP conditionally pop; see
            // individual callers below for the exact variants used.
            match op {
                PopJumpIfTrue | PopJumpIfFalse => (1, 0),
                JumpIfTrueOrPop | JumpIfFalseOrPop => (1, 0),
                _ => (0, 0),
            }
        }
        ReturnValue => (1, 0),
        ForIter => (1, 2),
        RaiseVarargs => (arg.unwrap_or(0) as i32, 0),
        EndFinally => (1, 0),
        BreakLoop | PopBlock | SetupLoop => (0, 0),
        Label => (0, 0),
    }
}
