use crate::bytecode::{ByteCode, OpCode};
use crate::optimizer::error::OptimizeError;

/// A half-open address range `[start, end)` with no jump source or target
/// strictly inside it. The block's tail control instruction sits *at*
/// `end`; a block with none falls through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicBlock {
    pub start: usize,
    pub end: usize,
    /// Why the boundary was drawn. Diagnostics only.
    pub comment: &'static str,
}

impl BasicBlock {
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split a stream into basic blocks: scan in address order and close a
/// block at every jump source; backward jumps into the open block split it
/// a second time at the target, isolating the loop body.
pub fn split_basic_blocks(code: &ByteCode) -> Result<Vec<BasicBlock>, OptimizeError> {
    let mut boundaries: Vec<BasicBlock> = Vec::new();
    let mut end_of_last_block = 0usize;

    let len = code.len();
    let mut ip = 0usize;
    while ip < len {
        let inst = code.inst_at(ip)?;

        match inst.opcode {
            OpCode::Jump
            | OpCode::JumpNonEmpty
            | OpCode::ForkJump
            | OpCode::ForkStay
            | OpCode::ForkReplaceJump
            | OpCode::ForkReplaceStay => {
                let target = inst.resolve_jump(len)?;
                if target >= ip {
                    boundaries.push(BasicBlock {
                        start: end_of_last_block,
                        end: ip,
                        comment: "jump ahead",
                    });
                    end_of_last_block = ip + inst.size();
                } else if target > end_of_last_block {
                    // Backward jump into the open block: split out the loop
                    // body.
                    boundaries.push(BasicBlock {
                        start: end_of_last_block,
                        end: target,
                        comment: "jump back head",
                    });
                    boundaries.push(BasicBlock {
                        start: target,
                        end: ip,
                        comment: "jump back body",
                    });
                    end_of_last_block = ip + inst.size();
                } else {
                    // Backward jump into an already-closed block.
                    boundaries.push(BasicBlock {
                        start: end_of_last_block,
                        end: ip,
                        comment: "jump",
                    });
                    end_of_last_block = ip + inst.size();
                }
            }
            OpCode::FailForks => {
                boundaries.push(BasicBlock {
                    start: end_of_last_block,
                    end: ip,
                    comment: "fail forks",
                });
                end_of_last_block = ip + inst.size();
            }
            OpCode::Repeat => {
                // Repeat always produces two blocks, the repeated body and
                // everything before it, because its offset is counted from
                // the instruction itself.
                let repeat_start = inst.resolve_repeat()?;
                if repeat_start > end_of_last_block {
                    boundaries.push(BasicBlock {
                        start: end_of_last_block,
                        end: repeat_start,
                        comment: "repeat head",
                    });
                }
                boundaries.push(BasicBlock {
                    start: repeat_start,
                    end: ip,
                    comment: "repeat body",
                });
                end_of_last_block = ip + inst.size();
            }
            _ => {}
        }

        ip += inst.size();
    }

    if end_of_last_block < len {
        boundaries.push(BasicBlock {
            start: end_of_last_block,
            end: len,
            comment: "end",
        });
    }

    boundaries.sort_by_key(|block| block.start);

    Ok(boundaries)
}
