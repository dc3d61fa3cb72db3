//! Stack-machine bytecode layer: opcodes, the per-function `Assembly`
//! builder/serializer, and string interning. Everything here is a direct
//! port of `orz/asm.py`; the codegen visitor is the only consumer.

pub mod assembly;
pub mod opcode;
pub mod stringtable;

pub use assembly::{Assembly, Const, Label};
pub use opcode::Opcode;
pub use stringtable::{StringRef, StringTable};
