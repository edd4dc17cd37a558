use tracing::debug;

use crate::bytecode::{ByteCode, CompareOp, OpCode};
use crate::optimizer::blocks::BasicBlock;
use crate::optimizer::error::OptimizeError;
use crate::pattern::Pattern;

/// If the entire pattern is a single basic block of literal-character
/// compares, collapse it to one exact-substring instruction and record the
/// literal for the matching engine. Returns `false` ("not applicable")
/// without touching the stream in every other case.
pub fn attempt_rewrite_as_substring_search(
    pattern: &mut Pattern,
    blocks: &[BasicBlock],
) -> Result<bool, OptimizeError> {
    if blocks.len() > 1 {
        return Ok(false);
    }

    if blocks.is_empty() {
        // Empty pattern: a zero-length literal match.
        pattern.optimization.pure_substring_search = Some(String::new());
        return Ok(true);
    }

    let code = &pattern.bytecode;
    let mut literal = String::new();

    let mut ip = 0;
    while ip < code.len() {
        let inst = code.inst_at(ip)?;
        if inst.opcode != OpCode::Compare {
            return Ok(false);
        }
        for op in inst.flat_compares()? {
            let CompareOp::Char(cp) = op else {
                return Ok(false);
            };
            if !pattern.flags.unicode && cp > 0xff {
                // Not representable as a byte-mode literal.
                return Ok(false);
            }
            let Some(c) = char::from_u32(cp) else {
                return Ok(false);
            };
            literal.push(c);
        }
        ip += inst.size();
    }

    debug!(literal = %literal, "pattern collapsed to substring search");

    let mut out = ByteCode::new();
    out.push_compare(&[CompareOp::String(literal.chars().map(|c| c as u32).collect())]);
    pattern.bytecode = out;
    pattern.optimization.pure_substring_search = Some(literal);
    Ok(true)
}
