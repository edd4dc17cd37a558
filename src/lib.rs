//! Cinder: a post-compilation bytecode optimizer for a backtracking
//! regular-expression virtual machine.
//!
//! The parser hands over a pattern's linear bytecode; this crate rewrites
//! it in place to cut instruction count and backtracking cost while
//! preserving exact match semantics. Every rewrite is either
//! behavior-preserving or declined when safety cannot be proven statically.
//!
//! - `bytecode` - the instruction set, the flat stream, decoding and
//!   disassembly
//! - `optimizer` - the pass pipeline plus the construction-time entry
//!   points (`append_alternation`, `append_character_class`)
//! - [`Pattern`] - a compiled pattern: bytecode, flags, and the
//!   optimization hints handed to the matching engine

pub mod bytecode;
pub mod optimizer;
mod pattern;

pub use bytecode::{
    ByteCode, CharClass, CharRange, CodeError, CodeValue, CompareKind, CompareOp, GeneralCategory,
    Inst, OpCode, Script, UnicodeProperty,
};
pub use optimizer::{
    Bailout, BasicBlock, OptimizeError, append_alternation, append_alternation_pair,
    append_character_class, run_optimization_passes, split_basic_blocks,
};
pub use pattern::{OptimizationData, Pattern, PatternFlags};
