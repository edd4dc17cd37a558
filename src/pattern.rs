use serde::{Deserialize, Serialize};

use crate::bytecode::{ByteCode, CharRange};
use crate::optimizer::{self, OptimizeError};

/// Pattern-level flags that affect optimization decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternFlags {
    /// Unicode mode: literals are code points rather than bytes.
    pub unicode: bool,
}

/// Cheap facts the optimizer extracts for the matching engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationData {
    /// Ranges the first matched character must fall in, when known.
    pub starting_ranges: Vec<CharRange>,
    /// The pattern can only ever match at the start of input.
    pub only_start_of_line: bool,
    /// The whole pattern is an exact-substring search for this literal.
    pub pure_substring_search: Option<String>,
}

/// A compiled pattern: the bytecode stream the matching engine executes,
/// plus the metadata the optimizer works from.
///
/// The parser produces the initial stream; [`Pattern::optimize`] rewrites it
/// in place. The optimized stream is the pattern's permanent executable
/// form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub bytecode: ByteCode,
    pub flags: PatternFlags,
    /// Original pattern text, kept for diagnostics.
    pub source: String,
    pub optimization: OptimizationData,
}

impl Pattern {
    pub fn new(bytecode: ByteCode, flags: PatternFlags, source: impl Into<String>) -> Self {
        Pattern {
            bytecode,
            flags,
            source: source.into(),
            optimization: OptimizationData::default(),
        }
    }

    /// Run the full optimization pipeline over this pattern's bytecode.
    pub fn optimize(&mut self) -> Result<(), OptimizeError> {
        optimizer::run_optimization_passes(self)
    }

    /// Serialize the compiled pattern to its binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserialize a compiled pattern from its binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{CompareOp, OpCode};

    #[test]
    fn test_pattern_roundtrips_through_postcard() {
        let mut code = ByteCode::new();
        code.push_compare(&[CompareOp::Char('a' as u32)]);
        code.push_jump(OpCode::ForkStay, -7);

        let mut pattern = Pattern::new(code, PatternFlags { unicode: true }, "a*");
        pattern.optimization.only_start_of_line = true;

        let bytes = pattern.to_bytes().unwrap();
        let restored = Pattern::from_bytes(&bytes).unwrap();
        assert_eq!(restored, pattern);
    }

    #[test]
    fn test_optimize_is_reachable_from_pattern() {
        let mut code = ByteCode::new();
        code.push_compare(&[CompareOp::Char('a' as u32)]);

        let mut pattern = Pattern::new(code, PatternFlags::default(), "a");
        pattern.optimize().unwrap();
        assert_eq!(
            pattern.optimization.pure_substring_search.as_deref(),
            Some("a")
        );
    }
}
