use std::collections::HashMap;

use tracing::debug;

use crate::bytecode::{ByteCode, CodeValue, OpCode};
use crate::optimizer::error::OptimizeError;

/// Remove every zero-offset jump and fork (a jump to the instruction right
/// after itself, left behind by construction) and recompute every surviving
/// jump and repeat offset against the compacted addresses.
pub fn remove_useless_jumps(code: &mut ByteCode) -> Result<(), OptimizeError> {
    struct InstrInfo {
        old_ip: usize,
        size: usize,
        opcode: OpCode,
        is_useless: bool,
    }

    let mut infos = Vec::new();
    let mut ip = 0;
    while ip < code.len() {
        let inst = code.inst_at(ip)?;
        let is_useless = inst.opcode.is_jump_family() && inst.jump_offset() == 0;
        infos.push(InstrInfo {
            old_ip: ip,
            size: inst.size(),
            opcode: inst.opcode,
            is_useless,
        });
        ip += inst.size();
    }

    // Complete old-address -> new-address mapping, one-past-the-end
    // included, accumulated over retained sizes.
    let mut new_ip = HashMap::with_capacity(infos.len() + 1);
    let mut cur = 0usize;
    let mut skipped = 0usize;
    for info in &infos {
        new_ip.insert(info.old_ip, cur);
        if !info.is_useless {
            cur += info.size;
        } else {
            skipped += 1;
        }
    }
    new_ip.insert(code.len(), cur);

    if skipped == 0 {
        return Ok(());
    }
    debug!(
        removed = skipped,
        words_saved = code.len() - cur,
        "removing no-op jumps"
    );

    let mut out = ByteCode::new();
    for info in &infos {
        if info.is_useless {
            continue;
        }

        let src_new = *new_ip
            .get(&info.old_ip)
            .ok_or(OptimizeError::unmapped(info.old_ip, info.old_ip))?;
        let mut words = code.words()[info.old_ip..info.old_ip + info.size].to_vec();

        if info.opcode.is_jump_family() {
            let old_off = words[1] as i64;
            let target_old = info.old_ip as i64 + info.size as i64 + old_off;
            let target_new = lookup(&new_ip, info.old_ip, target_old)?;
            words[1] = (target_new as i64 - src_new as i64 - info.size as i64) as CodeValue;
        } else if info.opcode == OpCode::Repeat {
            let target_old = info.old_ip as i64 - words[1] as i64;
            let target_new = lookup(&new_ip, info.old_ip, target_old)?;
            words[1] = (src_new as i64 - target_new as i64) as CodeValue;
        }

        out.extend_words(&words);
    }

    *code = out;
    Ok(())
}

fn lookup(
    new_ip: &HashMap<usize, usize>,
    source: usize,
    target_old: i64,
) -> Result<usize, OptimizeError> {
    if target_old < 0 {
        return Err(OptimizeError::unmapped(source, 0));
    }
    new_ip
        .get(&(target_old as usize))
        .copied()
        .ok_or(OptimizeError::unmapped(source, target_old as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CompareOp;

    fn compare_char(code: &mut ByteCode, c: char) {
        code.push_compare(&[CompareOp::Char(c as u32)]);
    }

    #[test]
    fn test_zero_offset_jumps_are_removed() {
        let mut code = ByteCode::new();
        code.push_jump(OpCode::Jump, 0);
        compare_char(&mut code, 'a');
        code.push_jump(OpCode::ForkJump, 0);

        remove_useless_jumps(&mut code).unwrap();

        assert_eq!(code.len(), 5);
        let inst = code.inst_at(0).unwrap();
        assert_eq!(inst.opcode, OpCode::Compare);
    }

    #[test]
    fn test_only_real_instructions_survive() {
        // Zero-offset jumps interleaved with three real instructions.
        let mut code = ByteCode::new();
        code.push_jump(OpCode::Jump, 0);
        compare_char(&mut code, 'a');
        code.push_jump(OpCode::ForkStay, 0);
        compare_char(&mut code, 'b');
        code.push_jump(OpCode::Jump, 0);
        compare_char(&mut code, 'c');

        remove_useless_jumps(&mut code).unwrap();

        let starts = code.instruction_starts().unwrap();
        assert_eq!(starts.len(), 3);
        for &ip in &starts {
            assert_eq!(code.inst_at(ip).unwrap().opcode, OpCode::Compare);
        }
    }

    #[test]
    fn test_surviving_backward_offset_tracks_logical_target() {
        // Compare('a') @0, Jump(0) @5, ForkStay @7 targeting the compare.
        let mut code = ByteCode::new();
        compare_char(&mut code, 'a');
        code.push_jump(OpCode::Jump, 0);
        code.push_jump(OpCode::ForkStay, -9);
        code.inst_at(7).unwrap().resolve_jump(code.len()).unwrap();

        remove_useless_jumps(&mut code).unwrap();

        // Compare @0, ForkStay @5 -> must still target the compare.
        assert_eq!(code.len(), 7);
        let fork = code.inst_at(5).unwrap();
        assert_eq!(fork.opcode, OpCode::ForkStay);
        assert_eq!(fork.resolve_jump(code.len()).unwrap(), 0);
    }

    #[test]
    fn test_surviving_forward_offset_tracks_logical_target() {
        // ForkJump @0 over a dead jump to Compare('b').
        let mut code = ByteCode::new();
        code.push_jump(OpCode::ForkJump, 2);
        code.push_jump(OpCode::Jump, 0);
        compare_char(&mut code, 'b');
        assert_eq!(code.inst_at(0).unwrap().resolve_jump(code.len()).unwrap(), 4);

        remove_useless_jumps(&mut code).unwrap();

        let fork = code.inst_at(0).unwrap();
        assert_eq!(fork.resolve_jump(code.len()).unwrap(), 2);
        assert_eq!(code.inst_at(2).unwrap().opcode, OpCode::Compare);
    }

    #[test]
    fn test_repeat_backward_offset_is_recomputed() {
        // Compare('a') @0, Jump(0) @5, Repeat @7 with back-offset 7 -> 0.
        let mut code = ByteCode::new();
        compare_char(&mut code, 'a');
        code.push_jump(OpCode::Jump, 0);
        code.push(OpCode::Repeat.value());
        code.push(7);
        code.push(3);

        remove_useless_jumps(&mut code).unwrap();

        let repeat = code.inst_at(5).unwrap();
        assert_eq!(repeat.opcode, OpCode::Repeat);
        assert_eq!(repeat.resolve_repeat().unwrap(), 0);
        // The count operand is untouched.
        assert_eq!(repeat.words()[2], 3);
    }

    #[test]
    fn test_stream_without_dead_jumps_is_untouched() {
        let mut code = ByteCode::new();
        compare_char(&mut code, 'a');
        code.push_jump(OpCode::ForkStay, -7);
        let before = code.clone();

        remove_useless_jumps(&mut code).unwrap();
        assert_eq!(code, before);
    }

    #[test]
    fn test_idempotent() {
        let mut code = ByteCode::new();
        code.push_jump(OpCode::Jump, 0);
        compare_char(&mut code, 'a');
        code.push_jump(OpCode::ForkStay, -7);

        remove_useless_jumps(&mut code).unwrap();
        let once = code.clone();
        remove_useless_jumps(&mut code).unwrap();
        assert_eq!(code, once);
    }
}
