use crate::bytecode::code::CodeValue;

/// A malformed bytecode stream.
///
/// These are programmer errors: a well-formed stream produced by the
/// construction entry points never triggers them. Decoding fails loudly
/// instead of guessing at instruction boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeError {
    /// A word in opcode position did not decode to any instruction tag.
    UnknownOpcode { ip: usize, value: CodeValue },
    /// An instruction extends past the end of the stream.
    Truncated { ip: usize, needed: usize, len: usize },
    /// A compare payload word in kind position did not decode.
    UnknownCompareKind { ip: usize, value: CodeValue },
    /// A compare payload ended mid-operand or disagreed with its header.
    BadComparePayload { ip: usize, reason: &'static str },
    /// A jump or repeat offset resolved outside the stream.
    TargetOutOfRange { ip: usize, target: i64 },
}

impl CodeError {
    pub fn truncated(ip: usize, needed: usize, len: usize) -> Self {
        CodeError::Truncated { ip, needed, len }
    }

    pub fn bad_payload(ip: usize, reason: &'static str) -> Self {
        CodeError::BadComparePayload { ip, reason }
    }
}

impl std::fmt::Display for CodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeError::UnknownOpcode { ip, value } => {
                write!(f, "bytecode error: unknown opcode {} at {:04}", value, ip)
            }
            CodeError::Truncated { ip, needed, len } => {
                write!(
                    f,
                    "bytecode error: instruction at {:04} needs {} words, stream has {}",
                    ip, needed, len
                )
            }
            CodeError::UnknownCompareKind { ip, value } => {
                write!(
                    f,
                    "bytecode error: unknown compare kind {} in instruction at {:04}",
                    value, ip
                )
            }
            CodeError::BadComparePayload { ip, reason } => {
                write!(
                    f,
                    "bytecode error: bad compare payload at {:04}: {}",
                    ip, reason
                )
            }
            CodeError::TargetOutOfRange { ip, target } => {
                write!(
                    f,
                    "bytecode error: jump at {:04} resolves to {}, outside the stream",
                    ip, target
                )
            }
        }
    }
}

impl std::error::Error for CodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_address() {
        let err = CodeError::UnknownOpcode { ip: 7, value: 99 };
        let msg = err.to_string();
        assert!(msg.contains("0007"));
        assert!(msg.contains("99"));
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = CodeError::truncated(0, 4, 2);
        let _: &dyn std::error::Error = &err;
    }
}
