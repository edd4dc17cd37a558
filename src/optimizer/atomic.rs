use tracing::{debug, trace};

use crate::bytecode::{ByteCode, CompareOp, Inst, OpCode};
use crate::optimizer::blocks::BasicBlock;
use crate::optimizer::error::OptimizeError;
use crate::optimizer::interpret::has_overlap;

// =============================================================================
// LOOP -> ATOMIC GROUP REWRITE
// =============================================================================
//
// Two source shapes are recognized. A self-loop:
//
//     bb0 | RE0
//         | ForkX bb0        =>   ForkReplaceX bb0
//     --------------------
//     bb1 | RE1
//
// and a headed loop:
//
//     bb0 | *
//         | ForkX bb2        =>   ForkReplaceX bb2
//     --------------------
//     bb1 | RE0
//         | Jump bb0
//     --------------------
//     bb2 | RE1
//
// Either patch is valid only when first(RE1) shares no character with
// end(RE0): once nothing after the loop can claim a character the loop
// consumed, discarding the backtrack state is unobservable. The patch is a
// one-tag edit, so no address ever moves.

/// Which loop shape a candidate was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopForm {
    /// A block forking straight back to its own start.
    SelfLoop,
    /// The same shape with nothing at all following the loop.
    SelfLoopEmptyFollow,
    /// A forking header block jumped back to by the loop body.
    HeadedLoop,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    forking_block: BasicBlock,
    form: LoopForm,
}

/// Verdict of the follow-set check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowSafety {
    /// The follow block starts with something provably disjoint.
    Safe,
    /// The follow block ends up consuming nothing at all.
    SafeEmptyFollow,
    Unsafe,
}

/// Rewrite the first eligible backtracking loop into its non-backtracking
/// form. Conservative: any shape or overlap doubt leaves the stream alone.
pub fn attempt_rewrite_loops_as_atomic_groups(
    code: &mut ByteCode,
    blocks: &[BasicBlock],
) -> Result<(), OptimizeError> {
    let mut candidates: Vec<Candidate> = Vec::new();

    for (i, &forking_block) in blocks.iter().enumerate() {
        let fork_fallback_block = blocks.get(i + 1).copied();

        // Is the tail instruction of this block a fork back to its own
        // start?
        if let Some(inst) = tail_inst(code, forking_block.end)? {
            if is_eligible_self_loop_jump(&inst, forking_block.start)? {
                let Some(follow) = fork_fallback_block else {
                    candidates.push(Candidate {
                        forking_block,
                        form: LoopForm::SelfLoop,
                    });
                    break;
                };

                let safety = follow_set_is_safe(code, forking_block, follow, blocks)?;
                if follow.is_empty() && safety != FollowSafety::Unsafe {
                    candidates.push(Candidate {
                        forking_block,
                        form: LoopForm::SelfLoop,
                    });
                    break;
                }
                match safety {
                    FollowSafety::Safe => {
                        candidates.push(Candidate {
                            forking_block,
                            form: LoopForm::SelfLoop,
                        });
                        break;
                    }
                    FollowSafety::SafeEmptyFollow => {
                        candidates.push(Candidate {
                            forking_block,
                            form: LoopForm::SelfLoopEmptyFollow,
                        });
                        break;
                    }
                    FollowSafety::Unsafe => {}
                }
            }
        }

        // Is the next block's tail an unconditional jump back to this
        // block, with this block forking forward past the loop?
        if let Some(loop_body) = fork_fallback_block {
            let Some(tail) = tail_inst(code, loop_body.end)? else {
                continue;
            };

            if is_eligible_loop_back_jump(&tail, forking_block.start)? {
                if forking_block_forks(code, forking_block.end)?
                    && headed_loop_follow_is_safe(code, loop_body, blocks.get(i + 2), blocks)?
                {
                    candidates.push(Candidate {
                        forking_block,
                        form: LoopForm::HeadedLoop,
                    });
                    break;
                }
            }

            // Degenerate shape: the body jumps back to the *fork
            // instruction itself, a self-loop posing as a headed loop.
            if is_eligible_loop_back_jump(&tail, forking_block.end)? {
                if forking_block_forks(code, forking_block.end)?
                    && headed_loop_follow_is_safe(code, loop_body, blocks.get(i + 2), blocks)?
                {
                    candidates.push(Candidate {
                        forking_block,
                        form: LoopForm::SelfLoop,
                    });
                    break;
                }
            }
        }
    }

    let Some(candidate) = candidates.first() else {
        trace!("no loop eligible for atomic rewrite");
        return Ok(());
    };
    debug!(
        start = candidate.forking_block.start,
        end = candidate.forking_block.end,
        form = ?candidate.form,
        "rewriting loop as atomic group"
    );

    patch_fork(code, candidate.forking_block.end)
}

/// Decode the tail control instruction sitting at a block's `end` address,
/// if the address is inside the stream.
fn tail_inst(code: &ByteCode, end: usize) -> Result<Option<Inst<'_>>, OptimizeError> {
    if end >= code.len() {
        return Ok(None);
    }
    Ok(Some(code.inst_at(end)?))
}

/// A fork (or fork-form JumpNonEmpty) whose target is `block_start`.
fn is_eligible_self_loop_jump(inst: &Inst<'_>, block_start: usize) -> Result<bool, OptimizeError> {
    match inst.opcode {
        OpCode::ForkJump | OpCode::ForkStay => {
            Ok(inst.ip as i64 + inst.size() as i64 + inst.jump_offset() == block_start as i64)
        }
        OpCode::JumpNonEmpty => {
            let form = inst.embedded_form()?;
            if form != OpCode::ForkJump && form != OpCode::ForkStay {
                return Ok(false);
            }
            Ok(inst.ip as i64 + inst.size() as i64 + inst.jump_offset() == block_start as i64)
        }
        _ => Ok(false),
    }
}

/// An unconditional jump (or jump-form JumpNonEmpty) whose target is
/// `block_start`.
fn is_eligible_loop_back_jump(inst: &Inst<'_>, block_start: usize) -> Result<bool, OptimizeError> {
    match inst.opcode {
        OpCode::Jump => {
            Ok(inst.ip as i64 + inst.size() as i64 + inst.jump_offset() == block_start as i64)
        }
        OpCode::JumpNonEmpty => {
            if inst.embedded_form()? != OpCode::Jump {
                return Ok(false);
            }
            Ok(inst.ip as i64 + inst.size() as i64 + inst.jump_offset() == block_start as i64)
        }
        _ => Ok(false),
    }
}

fn forking_block_forks(code: &ByteCode, end: usize) -> Result<bool, OptimizeError> {
    match tail_inst(code, end)? {
        Some(inst) => Ok(matches!(inst.opcode, OpCode::ForkJump | OpCode::ForkStay)),
        None => Ok(false),
    }
}

fn headed_loop_follow_is_safe(
    code: &ByteCode,
    loop_body: BasicBlock,
    follow: Option<&BasicBlock>,
    all_blocks: &[BasicBlock],
) -> Result<bool, OptimizeError> {
    match follow {
        None => Ok(true),
        Some(&follow) => {
            Ok(follow_set_is_safe(code, loop_body, follow, all_blocks)? != FollowSafety::Unsafe)
        }
    }
}

/// The precondition proper: collect what the repeated block can consume,
/// chase the follow block through unconditional jumps, and require its
/// first compare to be provably disjoint from every repeated compare.
fn follow_set_is_safe(
    code: &ByteCode,
    repeated_block: BasicBlock,
    following_block: BasicBlock,
    all_blocks: &[BasicBlock],
) -> Result<FollowSafety, OptimizeError> {
    let mut repeated_values: Vec<Vec<CompareOp>> = Vec::new();
    let mut repeated_block = repeated_block;
    let mut following_block = following_block;

    let mut has_seen_actionable_opcode = false;
    let mut ip = repeated_block.start;
    while ip < repeated_block.end {
        let inst = code.inst_at(ip)?;
        match inst.opcode {
            OpCode::Compare => {
                has_seen_actionable_opcode = true;
                let compares = inst.flat_compares()?;
                if repeated_values.is_empty()
                    && compares.iter().any(|op| matches!(op, CompareOp::AnyChar))
                {
                    return Ok(FollowSafety::Unsafe);
                }
                repeated_values.push(compares);
            }
            OpCode::CheckBegin | OpCode::CheckEnd => {
                has_seen_actionable_opcode = true;
                if repeated_values.is_empty() {
                    return Ok(FollowSafety::Safe);
                }
            }
            OpCode::CheckBoundary | OpCode::Restore | OpCode::GoBack => {
                return Ok(FollowSafety::Unsafe);
            }
            OpCode::ForkJump | OpCode::ForkReplaceJump | OpCode::JumpNonEmpty => {
                // Resolving the full follow set through a fork is possible
                // but pretending it goes nowhere is cheaper.
                if !has_seen_actionable_opcode {
                    return Ok(FollowSafety::Unsafe);
                }
            }
            OpCode::Jump => {
                // Unconditional: follow it.
                let target = inst.resolve_jump(code.len())?;
                let Some(&next) = all_blocks.iter().find(|block| block.start == target) else {
                    return Ok(FollowSafety::Unsafe);
                };
                repeated_block = next;
                ip = repeated_block.start;
                continue;
            }
            _ => {}
        }
        ip += inst.size();
    }
    trace!(
        count = repeated_values.len(),
        "collected repeated compare sets"
    );

    // An empty follow block is only safe to look through when it leads
    // somewhere harmless via unconditional jumps.
    let mut accept_empty_follow = false;
    while following_block.is_empty() && !accept_empty_follow {
        let Some(inst) = tail_inst(code, following_block.start)? else {
            break;
        };
        match inst.opcode {
            OpCode::Jump => {
                let target = inst.resolve_jump(code.len())?;
                if target < inst.ip {
                    trace!(target, "empty follow jumps backwards; declining");
                    return Ok(FollowSafety::Unsafe);
                }
                let Some(&next) = all_blocks.iter().find(|block| block.start == target) else {
                    return Ok(FollowSafety::Unsafe);
                };
                following_block = next;
            }
            OpCode::ForkJump | OpCode::ForkReplaceJump | OpCode::JumpNonEmpty => {
                return Ok(FollowSafety::Unsafe);
            }
            _ => {
                accept_empty_follow = true;
            }
        }
    }

    // Find the first compare in the follow block; it must be disjoint from
    // every repeated compare set.
    let mut following_block_has_at_least_one_compare = false;
    let mut final_instruction = following_block.start;
    let mut ip = following_block.start;
    while ip < following_block.end {
        final_instruction = ip;
        let inst = code.inst_at(ip)?;
        match inst.opcode {
            OpCode::Compare => {
                following_block_has_at_least_one_compare = true;
                let compares = inst.flat_compares()?;
                if compares.is_empty() {
                    // Nothing to test yet; keep walking.
                } else {
                    if compares.iter().any(|op| {
                        matches!(op, CompareOp::AnyChar | CompareOp::Reference(_))
                    }) {
                        return Ok(FollowSafety::Unsafe);
                    }
                    if repeated_values
                        .iter()
                        .any(|repeated| has_overlap(&compares, repeated))
                    {
                        return Ok(FollowSafety::Unsafe);
                    }
                    return Ok(FollowSafety::Safe);
                }
            }
            // Nothing can match past the anchors.
            OpCode::CheckBegin | OpCode::CheckEnd => return Ok(FollowSafety::Safe),
            OpCode::CheckBoundary => return Ok(FollowSafety::Unsafe),
            OpCode::ForkJump | OpCode::ForkReplaceJump | OpCode::JumpNonEmpty => {
                if !following_block_has_at_least_one_compare {
                    return Ok(FollowSafety::Unsafe);
                }
            }
            _ => {}
        }
        ip += inst.size();
    }

    // A follow block that falls through with no net compare cannot be
    // reasoned about.
    match tail_inst(code, final_instruction)? {
        Some(inst)
            if matches!(
                inst.opcode,
                OpCode::Jump | OpCode::JumpNonEmpty | OpCode::ForkJump | OpCode::ForkReplaceJump
            ) => {}
        _ => return Ok(FollowSafety::Unsafe),
    }

    if following_block_has_at_least_one_compare {
        Ok(FollowSafety::Safe)
    } else {
        Ok(FollowSafety::SafeEmptyFollow)
    }
}

/// Swap the fork at `fork_ip` for its non-backtracking variant. The edit
/// never changes instruction lengths, so no address remapping is needed.
fn patch_fork(code: &mut ByteCode, fork_ip: usize) -> Result<(), OptimizeError> {
    let inst = code.inst_at(fork_ip)?;
    match inst.opcode {
        OpCode::ForkJump | OpCode::ForkStay => {
            let replacement =
                inst.opcode
                    .atomic_variant()
                    .ok_or(OptimizeError::UnexpectedOperand {
                        reason: "candidate tail is not a fork",
                    })?;
            code.set_word(fork_ip, replacement.value());
            Ok(())
        }
        OpCode::JumpNonEmpty => {
            let form = inst.embedded_form()?;
            let replacement = form.atomic_variant().ok_or(OptimizeError::UnexpectedOperand {
                reason: "candidate JumpNonEmpty does not embed a fork",
            })?;
            code.set_word(fork_ip + 3, replacement.value());
            Ok(())
        }
        _ => Err(OptimizeError::UnexpectedOperand {
            reason: "candidate tail is not a fork",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CharRange;
    use crate::optimizer::blocks::split_basic_blocks;

    fn compare_char(code: &mut ByteCode, c: char) {
        code.push_compare(&[CompareOp::Char(c as u32)]);
    }

    /// `<loop-char>*<follow-char>` as a header-less self-loop.
    fn self_loop(loop_op: CompareOp, follow: Option<CompareOp>) -> ByteCode {
        let mut code = ByteCode::new();
        code.push_compare(&[loop_op]);
        let body = code.len();
        code.push_jump(OpCode::ForkStay, -(body as i64 + 2));
        if let Some(follow) = follow {
            code.push_compare(&[follow]);
        }
        code
    }

    fn rewrite(code: &mut ByteCode) {
        let blocks = split_basic_blocks(code).unwrap();
        attempt_rewrite_loops_as_atomic_groups(code, &blocks).unwrap();
    }

    #[test]
    fn test_disjoint_follow_converts_fork() {
        // a*b : nothing after the loop can claim an 'a'.
        let mut code = self_loop(
            CompareOp::Char('a' as u32),
            Some(CompareOp::Char('b' as u32)),
        );
        rewrite(&mut code);

        let fork = code.inst_at(5).unwrap();
        assert_eq!(fork.opcode, OpCode::ForkReplaceStay);
        assert_eq!(fork.resolve_jump(code.len()).unwrap(), 0);
    }

    #[test]
    fn test_overlapping_follow_declines() {
        // a*a : the follow set overlaps the loop set.
        let mut code = self_loop(
            CompareOp::Char('a' as u32),
            Some(CompareOp::Char('a' as u32)),
        );
        let before = code.clone();
        rewrite(&mut code);
        assert_eq!(code, before);
    }

    #[test]
    fn test_overlapping_range_follow_declines() {
        // [a-z]*m
        let mut code = self_loop(
            CompareOp::CharRange(CharRange::new('a' as u32, 'z' as u32)),
            Some(CompareOp::Char('m' as u32)),
        );
        let before = code.clone();
        rewrite(&mut code);
        assert_eq!(code, before);
    }

    #[test]
    fn test_missing_follow_block_converts() {
        // a* at the end of the pattern.
        let mut code = self_loop(CompareOp::Char('a' as u32), None);
        rewrite(&mut code);
        assert_eq!(code.inst_at(5).unwrap().opcode, OpCode::ForkReplaceStay);
    }

    #[test]
    fn test_any_char_loop_declines() {
        // .*b : the loop can consume anything.
        let mut code = self_loop(CompareOp::AnyChar, Some(CompareOp::Char('b' as u32)));
        let before = code.clone();
        rewrite(&mut code);
        assert_eq!(code, before);
    }

    #[test]
    fn test_headed_loop_converts_header_fork() {
        // bb0: ForkJump bb2 / bb1: Compare('a'), Jump bb0 / bb2: Compare('b')
        let mut code = ByteCode::new();
        code.push_jump(OpCode::ForkJump, 7);
        compare_char(&mut code, 'a');
        code.push_jump(OpCode::Jump, -9);
        compare_char(&mut code, 'b');

        rewrite(&mut code);

        assert_eq!(code.inst_at(0).unwrap().opcode, OpCode::ForkReplaceJump);
        // The loop body is untouched.
        assert_eq!(code.inst_at(7).unwrap().opcode, OpCode::Jump);
    }

    #[test]
    fn test_headed_loop_with_overlap_declines() {
        let mut code = ByteCode::new();
        code.push_jump(OpCode::ForkJump, 7);
        compare_char(&mut code, 'a');
        code.push_jump(OpCode::Jump, -9);
        compare_char(&mut code, 'a');

        let before = code.clone();
        rewrite(&mut code);
        assert_eq!(code, before);
    }

    #[test]
    fn test_jump_non_empty_form_is_patched_in_place() {
        // Compare('a') @0..5, JumpNonEmpty @5 embedding ForkStay, back to 0.
        let mut code = ByteCode::new();
        compare_char(&mut code, 'a');
        code.push(OpCode::JumpNonEmpty.value());
        code.push((-9i64) as u64);
        code.push(0); // checkpoint id
        code.push(OpCode::ForkStay.value());
        compare_char(&mut code, 'b');

        rewrite(&mut code);

        let jne = code.inst_at(5).unwrap();
        assert_eq!(jne.opcode, OpCode::JumpNonEmpty);
        assert_eq!(jne.embedded_form().unwrap(), OpCode::ForkReplaceStay);
        // Offset and checkpoint operands are untouched.
        assert_eq!(jne.jump_offset(), -9);
        assert_eq!(jne.checkpoint(), 0);
    }

    #[test]
    fn test_only_first_candidate_is_rewritten() {
        // a*x then c*y : only the first loop converts per run.
        let mut code = ByteCode::new();
        compare_char(&mut code, 'a');
        code.push_jump(OpCode::ForkStay, -7);
        compare_char(&mut code, 'x');
        compare_char(&mut code, 'c');
        code.push_jump(OpCode::ForkStay, -7);
        compare_char(&mut code, 'y');

        rewrite(&mut code);

        assert_eq!(code.inst_at(5).unwrap().opcode, OpCode::ForkReplaceStay);
        assert_eq!(code.inst_at(17).unwrap().opcode, OpCode::ForkStay);
    }

    #[test]
    fn test_anchor_follow_is_safe() {
        // a*$ : nothing can match past the anchor.
        let mut code = ByteCode::new();
        compare_char(&mut code, 'a');
        code.push_jump(OpCode::ForkStay, -7);
        code.push_inst(OpCode::CheckEnd, &[]);

        rewrite(&mut code);
        assert_eq!(code.inst_at(5).unwrap().opcode, OpCode::ForkReplaceStay);
    }
}
