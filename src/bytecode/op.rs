use crate::bytecode::code::CodeValue;

// =============================================================================
// OPCODE - Instruction tags of the matcher VM
// =============================================================================

/// One instruction tag of the regex VM.
///
/// Jump-family offsets are signed and relative to the address immediately
/// after the instruction; `Repeat` instead carries an unsigned *backward*
/// distance measured from its own address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Match the current input character against a compare-operand list.
    /// `[op, argc, payload_len, payload...]`
    Compare,
    /// Unconditional relative jump. `[op, offset]`
    Jump,
    /// Jump only if input was consumed since the named checkpoint.
    /// `[op, offset, checkpoint, form]` - `form` holds the embedded
    /// jump-variant opcode word (`Jump` or one of the fork variants).
    JumpNonEmpty,
    /// Fork: take the jump now, keep the fall-through as a backtrack state.
    /// `[op, offset]`
    ForkJump,
    /// Fork: fall through now, keep the jump target as a backtrack state.
    /// `[op, offset]`
    ForkStay,
    /// Like `ForkJump`, but the losing continuation is discarded instead of
    /// kept for backtracking. `[op, offset]`
    ForkReplaceJump,
    /// Like `ForkStay`, but the losing continuation is discarded.
    /// `[op, offset]`
    ForkReplaceStay,
    /// Bounded repetition: jump `back_offset` words back from this
    /// instruction's own address, at most `count` times.
    /// `[op, back_offset, count]`
    Repeat,
    /// Record the current input position under an id. `[op, id]`
    Checkpoint,
    /// Snapshot the match state. `[op]`
    Save,
    /// Restore the last snapshot. `[op]`
    Restore,
    /// Move the input cursor back `count` characters. `[op, count]`
    GoBack,
    /// Assert start of input. `[op]`
    CheckBegin,
    /// Assert end of input. `[op]`
    CheckEnd,
    /// Assert a word/non-word boundary. `[op, kind]`
    CheckBoundary,
    /// Open a capture group. `[op, group]`
    SaveLeftCapture,
    /// Close a capture group. `[op, group]`
    SaveRightCapture,
    /// Reset a capture group. `[op, group]`
    ClearCapture,
    /// Kill all pending backtrack states. `[op]`
    FailForks,
}

impl OpCode {
    /// Decode an opcode from its stream word.
    pub fn from_value(value: CodeValue) -> Option<OpCode> {
        Some(match value {
            0 => OpCode::Compare,
            1 => OpCode::Jump,
            2 => OpCode::JumpNonEmpty,
            3 => OpCode::ForkJump,
            4 => OpCode::ForkStay,
            5 => OpCode::ForkReplaceJump,
            6 => OpCode::ForkReplaceStay,
            7 => OpCode::Repeat,
            8 => OpCode::Checkpoint,
            9 => OpCode::Save,
            10 => OpCode::Restore,
            11 => OpCode::GoBack,
            12 => OpCode::CheckBegin,
            13 => OpCode::CheckEnd,
            14 => OpCode::CheckBoundary,
            15 => OpCode::SaveLeftCapture,
            16 => OpCode::SaveRightCapture,
            17 => OpCode::ClearCapture,
            18 => OpCode::FailForks,
            _ => return None,
        })
    }

    /// The stream word this opcode encodes to.
    pub fn value(self) -> CodeValue {
        match self {
            OpCode::Compare => 0,
            OpCode::Jump => 1,
            OpCode::JumpNonEmpty => 2,
            OpCode::ForkJump => 3,
            OpCode::ForkStay => 4,
            OpCode::ForkReplaceJump => 5,
            OpCode::ForkReplaceStay => 6,
            OpCode::Repeat => 7,
            OpCode::Checkpoint => 8,
            OpCode::Save => 9,
            OpCode::Restore => 10,
            OpCode::GoBack => 11,
            OpCode::CheckBegin => 12,
            OpCode::CheckEnd => 13,
            OpCode::CheckBoundary => 14,
            OpCode::SaveLeftCapture => 15,
            OpCode::SaveRightCapture => 16,
            OpCode::ClearCapture => 17,
            OpCode::FailForks => 18,
        }
    }

    /// Instruction size in words, or `None` when the size depends on the
    /// payload (`Compare`).
    pub fn fixed_size(self) -> Option<usize> {
        Some(match self {
            OpCode::Compare => return None,
            OpCode::Jump
            | OpCode::ForkJump
            | OpCode::ForkStay
            | OpCode::ForkReplaceJump
            | OpCode::ForkReplaceStay
            | OpCode::Checkpoint
            | OpCode::GoBack
            | OpCode::CheckBoundary
            | OpCode::SaveLeftCapture
            | OpCode::SaveRightCapture
            | OpCode::ClearCapture => 2,
            OpCode::JumpNonEmpty => 4,
            OpCode::Repeat => 3,
            OpCode::Save
            | OpCode::Restore
            | OpCode::CheckBegin
            | OpCode::CheckEnd
            | OpCode::FailForks => 1,
        })
    }

    /// True for instructions whose `[1]` operand is a forward-convention
    /// signed jump offset. `Repeat` is excluded (backward convention).
    pub fn is_jump_family(self) -> bool {
        matches!(
            self,
            OpCode::Jump
                | OpCode::JumpNonEmpty
                | OpCode::ForkJump
                | OpCode::ForkStay
                | OpCode::ForkReplaceJump
                | OpCode::ForkReplaceStay
        )
    }

    /// The non-backtracking variant of a fork opcode, if there is one.
    ///
    /// This is the whole "make this loop atomic" transform: the offset and
    /// size are untouched, only the tag changes.
    pub fn atomic_variant(self) -> Option<OpCode> {
        match self {
            OpCode::ForkJump => Some(OpCode::ForkReplaceJump),
            OpCode::ForkStay => Some(OpCode::ForkReplaceStay),
            OpCode::Compare
            | OpCode::Jump
            | OpCode::JumpNonEmpty
            | OpCode::ForkReplaceJump
            | OpCode::ForkReplaceStay
            | OpCode::Repeat
            | OpCode::Checkpoint
            | OpCode::Save
            | OpCode::Restore
            | OpCode::GoBack
            | OpCode::CheckBegin
            | OpCode::CheckEnd
            | OpCode::CheckBoundary
            | OpCode::SaveLeftCapture
            | OpCode::SaveRightCapture
            | OpCode::ClearCapture
            | OpCode::FailForks => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Compare => "COMPARE",
            OpCode::Jump => "JUMP",
            OpCode::JumpNonEmpty => "JUMP_NONEMPTY",
            OpCode::ForkJump => "FORK_JUMP",
            OpCode::ForkStay => "FORK_STAY",
            OpCode::ForkReplaceJump => "FORK_REPLACE_JUMP",
            OpCode::ForkReplaceStay => "FORK_REPLACE_STAY",
            OpCode::Repeat => "REPEAT",
            OpCode::Checkpoint => "CHECKPOINT",
            OpCode::Save => "SAVE",
            OpCode::Restore => "RESTORE",
            OpCode::GoBack => "GO_BACK",
            OpCode::CheckBegin => "CHECK_BEGIN",
            OpCode::CheckEnd => "CHECK_END",
            OpCode::CheckBoundary => "CHECK_BOUNDARY",
            OpCode::SaveLeftCapture => "SAVE_LEFT_CAPTURE",
            OpCode::SaveRightCapture => "SAVE_RIGHT_CAPTURE",
            OpCode::ClearCapture => "CLEAR_CAPTURE",
            OpCode::FailForks => "FAIL_FORKS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_value_roundtrip() {
        for value in 0..=18u64 {
            let op = OpCode::from_value(value).expect("tag should decode");
            assert_eq!(op.value(), value);
        }
        assert_eq!(OpCode::from_value(19), None);
        assert_eq!(OpCode::from_value(u64::MAX), None);
    }

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(OpCode::Compare.fixed_size(), None);
        assert_eq!(OpCode::Jump.fixed_size(), Some(2));
        assert_eq!(OpCode::JumpNonEmpty.fixed_size(), Some(4));
        assert_eq!(OpCode::Repeat.fixed_size(), Some(3));
        assert_eq!(OpCode::Save.fixed_size(), Some(1));
    }

    #[test]
    fn test_atomic_variant_mapping() {
        assert_eq!(
            OpCode::ForkJump.atomic_variant(),
            Some(OpCode::ForkReplaceJump)
        );
        assert_eq!(
            OpCode::ForkStay.atomic_variant(),
            Some(OpCode::ForkReplaceStay)
        );
        assert_eq!(OpCode::Jump.atomic_variant(), None);
        assert_eq!(OpCode::ForkReplaceJump.atomic_variant(), None);
    }

    #[test]
    fn test_jump_family() {
        assert!(OpCode::Jump.is_jump_family());
        assert!(OpCode::JumpNonEmpty.is_jump_family());
        assert!(OpCode::ForkReplaceStay.is_jump_family());
        assert!(!OpCode::Repeat.is_jump_family());
        assert!(!OpCode::Compare.is_jump_family());
    }
}
