pub mod code;
pub mod compare;
pub mod disasm;
pub mod error;
pub mod op;

pub use code::{ByteCode, CodeValue, Inst};
pub use compare::{
    CharClass, CharRange, CompareKind, CompareOp, GeneralCategory, Script, UnicodeProperty,
};
pub use error::CodeError;
pub use op::OpCode;
