pub mod alternation;
pub mod atomic;
pub mod blocks;
pub mod char_class;
pub mod dead_jumps;
pub mod error;
pub mod interpret;
pub mod substring;

pub use alternation::{append_alternation, append_alternation_pair};
pub use blocks::{BasicBlock, split_basic_blocks};
pub use char_class::append_character_class;
pub use error::OptimizeError;
pub use interpret::{Bailout, InterpretedCompares, has_overlap, interpret_compares};

use tracing::{debug, trace};

use crate::bytecode::{CharRange, OpCode};
use crate::pattern::Pattern;

/// Run the optimization pipeline over one pattern, in place.
///
/// Every pass either improves the stream or conservatively declines; the
/// accept/reject decision and capture results of the pattern are never
/// changed. Errors indicate a malformed stream, not an inapplicable
/// rewrite.
pub fn run_optimization_passes(pattern: &mut Pattern) -> Result<(), OptimizeError> {
    trace!(source = %pattern.source, "optimizing pattern");

    dead_jumps::remove_useless_jumps(&mut pattern.bytecode)?;

    let blocks = split_basic_blocks(&pattern.bytecode)?;
    if substring::attempt_rewrite_as_substring_search(pattern, &blocks)? {
        return Ok(());
    }

    // Rewrite fork loops as atomic groups, e.g. a*b -> (atomic a*)b.
    atomic::attempt_rewrite_loops_as_atomic_groups(&mut pattern.bytecode, &blocks)?;

    let blocks = split_basic_blocks(&pattern.bytecode)?;
    fill_optimization_data(pattern, &blocks)?;

    Ok(())
}

/// Pull cheap facts out of the first basic block for the matching engine:
/// the ranges a match could start with, or a start-of-input anchor.
fn fill_optimization_data(
    pattern: &mut Pattern,
    blocks: &[BasicBlock],
) -> Result<(), OptimizeError> {
    let Some(block) = blocks.first() else {
        return Ok(());
    };

    let code = &pattern.bytecode;
    let mut ip = block.start;
    while ip < block.end {
        let inst = code.inst_at(ip)?;
        match inst.opcode {
            OpCode::Compare => {
                let flat = inst.flat_compares()?;
                let Ok(compares) = interpret_compares(&flat) else {
                    // Too complex to summarize.
                    return Ok(());
                };

                if compares.has_any_unicode_property {
                    // Faster to just run the bytecode.
                    return Ok(());
                }
                if !compares.char_classes.is_empty()
                    || !compares.negated_char_classes.is_empty()
                    || !compares.negated_ranges.is_empty()
                {
                    return Ok(());
                }

                for (&from, &to) in &compares.ranges {
                    pattern
                        .optimization
                        .starting_ranges
                        .push(CharRange::new(from, to));
                }
                debug!(
                    ranges = pattern.optimization.starting_ranges.len(),
                    "extracted starting ranges"
                );
                return Ok(());
            }
            OpCode::CheckBegin => {
                pattern.optimization.only_start_of_line = true;
                return Ok(());
            }
            // These do not consume input; look through them.
            OpCode::Checkpoint
            | OpCode::Save
            | OpCode::ClearCapture
            | OpCode::SaveLeftCapture => {
                ip += inst.size();
                continue;
            }
            _ => return Ok(()),
        }
    }

    Ok(())
}
