use serde::{Deserialize, Serialize};

use crate::bytecode::code::CodeValue;
use crate::bytecode::error::CodeError;

// =============================================================================
// COMPARE OPERANDS - the payload language of a Compare instruction
// =============================================================================

/// Wire tag of one compare operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareKind {
    Inverse,
    TemporaryInverse,
    AnyChar,
    Char,
    CharClass,
    CharRange,
    String,
    Reference,
    Property,
    GeneralCategory,
    Script,
    ScriptExtension,
    LookupTable,
    And,
    Or,
    EndAndOr,
}

impl CompareKind {
    pub fn from_value(value: CodeValue) -> Option<CompareKind> {
        Some(match value {
            0 => CompareKind::Inverse,
            1 => CompareKind::TemporaryInverse,
            2 => CompareKind::AnyChar,
            3 => CompareKind::Char,
            4 => CompareKind::CharClass,
            5 => CompareKind::CharRange,
            6 => CompareKind::String,
            7 => CompareKind::Reference,
            8 => CompareKind::Property,
            9 => CompareKind::GeneralCategory,
            10 => CompareKind::Script,
            11 => CompareKind::ScriptExtension,
            12 => CompareKind::LookupTable,
            13 => CompareKind::And,
            14 => CompareKind::Or,
            15 => CompareKind::EndAndOr,
            _ => return None,
        })
    }

    pub fn value(self) -> CodeValue {
        match self {
            CompareKind::Inverse => 0,
            CompareKind::TemporaryInverse => 1,
            CompareKind::AnyChar => 2,
            CompareKind::Char => 3,
            CompareKind::CharClass => 4,
            CompareKind::CharRange => 5,
            CompareKind::String => 6,
            CompareKind::Reference => 7,
            CompareKind::Property => 8,
            CompareKind::GeneralCategory => 9,
            CompareKind::Script => 10,
            CompareKind::ScriptExtension => 11,
            CompareKind::LookupTable => 12,
            CompareKind::And => 13,
            CompareKind::Or => 14,
            CompareKind::EndAndOr => 15,
        }
    }
}

/// An inclusive code-point range, packed into one stream word as
/// `from << 32 | to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharRange {
    pub from: u32,
    pub to: u32,
}

impl CharRange {
    pub fn new(from: u32, to: u32) -> Self {
        CharRange { from, to }
    }

    pub fn pack(self) -> CodeValue {
        ((self.from as CodeValue) << 32) | self.to as CodeValue
    }

    pub fn unpack(word: CodeValue) -> Self {
        CharRange {
            from: (word >> 32) as u32,
            to: word as u32,
        }
    }

    pub fn contains(self, cp: u32) -> bool {
        self.from <= cp && cp <= self.to
    }
}

/// POSIX-style character class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharClass {
    Alnum,
    Alpha,
    Blank,
    Cntrl,
    Digit,
    Graph,
    Lower,
    Print,
    Punct,
    Space,
    Upper,
    Word,
    Xdigit,
}

impl CharClass {
    pub fn from_value(value: CodeValue) -> Option<CharClass> {
        Some(match value {
            0 => CharClass::Alnum,
            1 => CharClass::Alpha,
            2 => CharClass::Blank,
            3 => CharClass::Cntrl,
            4 => CharClass::Digit,
            5 => CharClass::Graph,
            6 => CharClass::Lower,
            7 => CharClass::Print,
            8 => CharClass::Punct,
            9 => CharClass::Space,
            10 => CharClass::Upper,
            11 => CharClass::Word,
            12 => CharClass::Xdigit,
            _ => return None,
        })
    }

    pub fn value(self) -> CodeValue {
        match self {
            CharClass::Alnum => 0,
            CharClass::Alpha => 1,
            CharClass::Blank => 2,
            CharClass::Cntrl => 3,
            CharClass::Digit => 4,
            CharClass::Graph => 5,
            CharClass::Lower => 6,
            CharClass::Print => 7,
            CharClass::Punct => 8,
            CharClass::Space => 9,
            CharClass::Upper => 10,
            CharClass::Word => 11,
            CharClass::Xdigit => 12,
        }
    }

    /// Membership test for a single code point. Used by the overlap oracle
    /// when it scans concrete ranges against a class.
    pub fn matches(self, cp: u32) -> bool {
        let Some(c) = char::from_u32(cp) else {
            return false;
        };
        match self {
            CharClass::Alnum => c.is_alphanumeric(),
            CharClass::Alpha => c.is_alphabetic(),
            CharClass::Blank => c == ' ' || c == '\t',
            CharClass::Cntrl => c.is_control(),
            CharClass::Digit => c.is_ascii_digit(),
            CharClass::Graph => !c.is_whitespace() && !c.is_control(),
            CharClass::Lower => c.is_lowercase(),
            CharClass::Print => !c.is_control(),
            CharClass::Punct => c.is_ascii_punctuation(),
            CharClass::Space => c.is_whitespace(),
            CharClass::Upper => c.is_uppercase(),
            CharClass::Word => c.is_alphanumeric() || c == '_',
            CharClass::Xdigit => c.is_ascii_hexdigit(),
        }
    }
}

// Unicode predicates are opaque to this crate: the parser's unicode layer
// assigns the ids, the matching engine evaluates them. The optimizer only
// ever compares ids for equality.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnicodeProperty(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeneralCategory(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Script(pub u32);

/// One decoded compare operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareOp {
    /// Toggle the persistent inversion flag.
    Inverse,
    /// Invert only the next real compare, then auto-reset.
    TemporaryInverse,
    AnyChar,
    Char(u32),
    CharClass(CharClass),
    CharRange(CharRange),
    String(Vec<u32>),
    Reference(u32),
    Property(UnicodeProperty),
    GeneralCategory(GeneralCategory),
    Script(Script),
    ScriptExtension(Script),
    LookupTable(Vec<CharRange>),
    And,
    Or,
    EndAndOr,
}

impl CompareOp {
    pub fn kind(&self) -> CompareKind {
        match self {
            CompareOp::Inverse => CompareKind::Inverse,
            CompareOp::TemporaryInverse => CompareKind::TemporaryInverse,
            CompareOp::AnyChar => CompareKind::AnyChar,
            CompareOp::Char(_) => CompareKind::Char,
            CompareOp::CharClass(_) => CompareKind::CharClass,
            CompareOp::CharRange(_) => CompareKind::CharRange,
            CompareOp::String(_) => CompareKind::String,
            CompareOp::Reference(_) => CompareKind::Reference,
            CompareOp::Property(_) => CompareKind::Property,
            CompareOp::GeneralCategory(_) => CompareKind::GeneralCategory,
            CompareOp::Script(_) => CompareKind::Script,
            CompareOp::ScriptExtension(_) => CompareKind::ScriptExtension,
            CompareOp::LookupTable(_) => CompareKind::LookupTable,
            CompareOp::And => CompareKind::And,
            CompareOp::Or => CompareKind::Or,
            CompareOp::EndAndOr => CompareKind::EndAndOr,
        }
    }
}

/// Append one operand's wire form to a payload buffer.
pub fn encode_compare_op(op: &CompareOp, payload: &mut Vec<CodeValue>) {
    payload.push(op.kind().value());
    match op {
        CompareOp::Inverse
        | CompareOp::TemporaryInverse
        | CompareOp::AnyChar
        | CompareOp::And
        | CompareOp::Or
        | CompareOp::EndAndOr => {}
        CompareOp::Char(cp) => payload.push(*cp as CodeValue),
        CompareOp::CharClass(class) => payload.push(class.value()),
        CompareOp::CharRange(range) => payload.push(range.pack()),
        CompareOp::String(cps) => {
            payload.push(cps.len() as CodeValue);
            payload.extend(cps.iter().map(|cp| *cp as CodeValue));
        }
        CompareOp::Reference(group) => payload.push(*group as CodeValue),
        CompareOp::Property(p) => payload.push(p.0 as CodeValue),
        CompareOp::GeneralCategory(gc) => payload.push(gc.0 as CodeValue),
        CompareOp::Script(s) => payload.push(s.0 as CodeValue),
        CompareOp::ScriptExtension(s) => payload.push(s.0 as CodeValue),
        CompareOp::LookupTable(ranges) => {
            payload.push(ranges.len() as CodeValue);
            payload.extend(ranges.iter().map(|r| r.pack()));
        }
    }
}

/// Decode a whole compare payload. `ip` is the owning instruction's address,
/// carried for error reporting only.
pub fn decode_compare_payload(
    ip: usize,
    payload: &[CodeValue],
) -> Result<Vec<CompareOp>, CodeError> {
    let mut ops = Vec::new();
    let mut pos = 0;

    let take = |pos: &mut usize, n: usize| -> Result<usize, CodeError> {
        let start = *pos;
        if start + n > payload.len() {
            return Err(CodeError::bad_payload(ip, "operand ends past payload"));
        }
        *pos += n;
        Ok(start)
    };

    while pos < payload.len() {
        let kind_word = payload[pos];
        pos += 1;
        let kind = CompareKind::from_value(kind_word)
            .ok_or(CodeError::UnknownCompareKind { ip, value: kind_word })?;

        let op = match kind {
            CompareKind::Inverse => CompareOp::Inverse,
            CompareKind::TemporaryInverse => CompareOp::TemporaryInverse,
            CompareKind::AnyChar => CompareOp::AnyChar,
            CompareKind::And => CompareOp::And,
            CompareKind::Or => CompareOp::Or,
            CompareKind::EndAndOr => CompareOp::EndAndOr,
            CompareKind::Char => {
                let at = take(&mut pos, 1)?;
                CompareOp::Char(payload[at] as u32)
            }
            CompareKind::CharClass => {
                let at = take(&mut pos, 1)?;
                let class = CharClass::from_value(payload[at])
                    .ok_or(CodeError::bad_payload(ip, "unknown character class"))?;
                CompareOp::CharClass(class)
            }
            CompareKind::CharRange => {
                let at = take(&mut pos, 1)?;
                CompareOp::CharRange(CharRange::unpack(payload[at]))
            }
            CompareKind::String => {
                let at = take(&mut pos, 1)?;
                let len = payload[at] as usize;
                let start = take(&mut pos, len)?;
                CompareOp::String(
                    payload[start..start + len]
                        .iter()
                        .map(|w| *w as u32)
                        .collect(),
                )
            }
            CompareKind::Reference => {
                let at = take(&mut pos, 1)?;
                CompareOp::Reference(payload[at] as u32)
            }
            CompareKind::Property => {
                let at = take(&mut pos, 1)?;
                CompareOp::Property(UnicodeProperty(payload[at] as u32))
            }
            CompareKind::GeneralCategory => {
                let at = take(&mut pos, 1)?;
                CompareOp::GeneralCategory(GeneralCategory(payload[at] as u32))
            }
            CompareKind::Script => {
                let at = take(&mut pos, 1)?;
                CompareOp::Script(Script(payload[at] as u32))
            }
            CompareKind::ScriptExtension => {
                let at = take(&mut pos, 1)?;
                CompareOp::ScriptExtension(Script(payload[at] as u32))
            }
            CompareKind::LookupTable => {
                let at = take(&mut pos, 1)?;
                let count = payload[at] as usize;
                let start = take(&mut pos, count)?;
                CompareOp::LookupTable(
                    payload[start..start + count]
                        .iter()
                        .map(|w| CharRange::unpack(*w))
                        .collect(),
                )
            }
        };
        ops.push(op);
    }

    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_range_packing() {
        let range = CharRange::new('a' as u32, 'z' as u32);
        let unpacked = CharRange::unpack(range.pack());
        assert_eq!(unpacked, range);
        assert!(unpacked.contains('m' as u32));
        assert!(!unpacked.contains('A' as u32));
    }

    #[test]
    fn test_payload_roundtrip() {
        let ops = vec![
            CompareOp::TemporaryInverse,
            CompareOp::Char('x' as u32),
            CompareOp::CharRange(CharRange::new(0x100, 0x1ff)),
            CompareOp::CharClass(CharClass::Digit),
            CompareOp::String(vec!['h' as u32, 'i' as u32]),
            CompareOp::LookupTable(vec![
                CharRange::new('a' as u32, 'f' as u32),
                CharRange::new('0' as u32, '9' as u32),
            ]),
            CompareOp::Property(UnicodeProperty(7)),
            CompareOp::EndAndOr,
        ];

        let mut payload = Vec::new();
        for op in &ops {
            encode_compare_op(op, &mut payload);
        }

        let decoded = decode_compare_payload(0, &payload).unwrap();
        assert_eq!(decoded, ops);
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        // String announcing 5 code points but carrying none.
        let payload = vec![CompareKind::String.value(), 5];
        let result = decode_compare_payload(3, &payload);
        assert!(matches!(
            result,
            Err(CodeError::BadComparePayload { ip: 3, .. })
        ));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let payload = vec![999];
        assert!(matches!(
            decode_compare_payload(0, &payload),
            Err(CodeError::UnknownCompareKind { value: 999, .. })
        ));
    }

    #[test]
    fn test_char_class_matches() {
        assert!(CharClass::Digit.matches('7' as u32));
        assert!(!CharClass::Digit.matches('x' as u32));
        assert!(CharClass::Word.matches('_' as u32));
        assert!(CharClass::Space.matches(' ' as u32));
        assert!(!CharClass::Upper.matches('a' as u32));
    }
}
