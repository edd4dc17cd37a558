use std::collections::{BTreeMap, HashSet};

use crate::bytecode::compare::{CharClass, CompareOp, GeneralCategory, Script, UnicodeProperty};

// =============================================================================
// COMPARE-SET INTERPRETATION - static classification of a compare list
// =============================================================================

/// Why a compare sequence could not be reduced to a flat set.
///
/// A bail-out is the expected outcome for complex inputs, not an error;
/// every caller treats it as "leave the bytecode alone".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bailout {
    /// A literal string; only its last character would matter and the
    /// sequence form does not expose it.
    ContainsString,
    /// A lookup table that was not expanded before interpretation.
    UnresolvedLookupTable,
    /// A back-reference; its matched set depends on runtime state.
    ContainsReference,
    /// A conjunctive group; these do not reduce to a flat union.
    ContainsAndGroup,
    /// A non-inverted AnyChar; the set would be "everything".
    MatchesEverything,
}

/// The classification of a flattened compare sequence into disjoint
/// containers. Ranges are kept merged so that containment is a single
/// ordered-map probe.
#[derive(Debug, Default, PartialEq)]
pub struct InterpretedCompares {
    pub ranges: BTreeMap<u32, u32>,
    pub negated_ranges: BTreeMap<u32, u32>,
    pub char_classes: HashSet<CharClass>,
    pub negated_char_classes: HashSet<CharClass>,

    pub has_any_unicode_property: bool,
    pub properties: HashSet<UnicodeProperty>,
    pub negated_properties: HashSet<UnicodeProperty>,
    pub general_categories: HashSet<GeneralCategory>,
    pub negated_general_categories: HashSet<GeneralCategory>,
    pub scripts: HashSet<Script>,
    pub negated_scripts: HashSet<Script>,
    pub script_extensions: HashSet<Script>,
    pub negated_script_extensions: HashSet<Script>,
}

/// Inversion bookkeeping shared by the interpreter and the overlap walk:
/// a persistent flag toggled by `Inverse`, and a one-shot flag set by
/// `TemporaryInverse` that expires after the next operand.
#[derive(Debug, Default)]
struct InversionState {
    inverse: bool,
    temporary: bool,
    reset_pending: bool,
}

impl InversionState {
    /// Called at the top of each operand. Expires a spent temporary flag.
    fn begin_op(&mut self) {
        if self.reset_pending {
            self.reset_pending = false;
            self.temporary = false;
        } else {
            self.reset_pending = true;
        }
    }

    fn current(&self) -> bool {
        self.temporary ^ self.inverse
    }

    fn flip_permanent(&mut self) {
        self.inverse = !self.inverse;
    }

    fn set_temporary(&mut self) {
        self.temporary = true;
        self.reset_pending = false;
    }
}

/// Insert `[from, to]` into a merged range set, absorbing every range it
/// overlaps or touches. Keeps the no-overlap invariant the containment
/// probes rely on.
fn insert_range(ranges: &mut BTreeMap<u32, u32>, from: u32, to: u32) {
    let mut from = from;
    let mut to = to;

    // Absorb a predecessor that reaches (or touches) `from`.
    if let Some((&pf, &pt)) = ranges.range(..=from).next_back() {
        if pt as u64 + 1 >= from as u64 {
            from = pf;
            to = to.max(pt);
            ranges.remove(&pf);
        }
    }

    // Absorb successors starting within (or touching) the new range.
    loop {
        let next = ranges
            .range(from..)
            .next()
            .map(|(&f, &t)| (f, t))
            .filter(|&(f, _)| f as u64 <= to as u64 + 1);
        match next {
            Some((f, t)) => {
                to = to.max(t);
                ranges.remove(&f);
            }
            None => break,
        }
    }

    ranges.insert(from, to);
}

/// Does the merged range set intersect `[from, to]`?
fn ranges_intersect(ranges: &BTreeMap<u32, u32>, from: u32, to: u32) -> bool {
    // Nearest range starting at or below `from` must reach it...
    if let Some((_, &pt)) = ranges.range(..=from).next_back() {
        if pt >= from {
            return true;
        }
    }
    // ...or some range starts inside [from, to].
    ranges.range(from..=to).next().is_some()
}

/// Replay the control-tag state machine over a flattened compare sequence
/// and classify every operand into the accepted or negated containers.
pub fn interpret_compares(ops: &[CompareOp]) -> Result<InterpretedCompares, Bailout> {
    let mut out = InterpretedCompares::default();
    let mut inversion = InversionState::default();

    for op in ops {
        inversion.begin_op();

        match op {
            CompareOp::Inverse => inversion.flip_permanent(),
            CompareOp::TemporaryInverse => inversion.set_temporary(),
            CompareOp::AnyChar => {
                if !inversion.current() {
                    return Err(Bailout::MatchesEverything);
                }
            }
            CompareOp::Char(cp) => {
                if !inversion.current() {
                    insert_range(&mut out.ranges, *cp, *cp);
                } else {
                    insert_range(&mut out.negated_ranges, *cp, *cp);
                }
            }
            CompareOp::CharRange(range) => {
                if !inversion.current() {
                    insert_range(&mut out.ranges, range.from, range.to);
                } else {
                    insert_range(&mut out.negated_ranges, range.from, range.to);
                }
            }
            CompareOp::CharClass(class) => {
                if !inversion.current() {
                    out.char_classes.insert(*class);
                } else {
                    out.negated_char_classes.insert(*class);
                }
            }
            CompareOp::String(_) => return Err(Bailout::ContainsString),
            CompareOp::LookupTable(_) => return Err(Bailout::UnresolvedLookupTable),
            CompareOp::Reference(_) => return Err(Bailout::ContainsReference),
            CompareOp::Property(p) => {
                out.has_any_unicode_property = true;
                if !inversion.current() {
                    out.properties.insert(*p);
                } else {
                    out.negated_properties.insert(*p);
                }
            }
            CompareOp::GeneralCategory(gc) => {
                out.has_any_unicode_property = true;
                if !inversion.current() {
                    out.general_categories.insert(*gc);
                } else {
                    out.negated_general_categories.insert(*gc);
                }
            }
            CompareOp::Script(s) => {
                out.has_any_unicode_property = true;
                if !inversion.current() {
                    out.scripts.insert(*s);
                } else {
                    out.negated_scripts.insert(*s);
                }
            }
            CompareOp::ScriptExtension(s) => {
                out.has_any_unicode_property = true;
                if !inversion.current() {
                    out.script_extensions.insert(*s);
                } else {
                    out.negated_script_extensions.insert(*s);
                }
            }
            // The default behaviour of a bracket expression; nothing to do
            // until conjunction is supported.
            CompareOp::Or | CompareOp::EndAndOr => {}
            CompareOp::And => return Err(Bailout::ContainsAndGroup),
        }
    }

    Ok(out)
}

// =============================================================================
// OVERLAP ORACLE
// =============================================================================

/// Could any input character matched by `rhs` also satisfy `lhs`'s matched
/// set? Answers without materializing characters; every "can't tell" path
/// answers `true` (overlaps), which callers treat as "rewrite is unsafe".
pub fn has_overlap(lhs: &[CompareOp], rhs: &[CompareOp]) -> bool {
    let compares = match interpret_compares(lhs) {
        Ok(compares) => compares,
        // Uninterpretable left side: fail safe.
        Err(_) => return true,
    };

    let range_contains = |from: u32, to: u32| -> bool {
        if compares.has_any_unicode_property {
            // Concrete ranges alongside predicates: answering precisely
            // would require per-code-point predicate truth. Assume overlap.
            return true;
        }
        ranges_intersect(&compares.ranges, from, to)
    };

    let char_class_contains = |class: CharClass| -> bool {
        if compares.char_classes.contains(&class) {
            return true;
        }
        if compares.negated_char_classes.contains(&class) {
            return false;
        }
        // Scan the concrete ranges point-by-point; only reachable when the
        // left side had no unicode predicates.
        for (&from, &to) in &compares.ranges {
            for cp in from..=to {
                if class.matches(cp) {
                    return true;
                }
            }
        }
        false
    };

    let lhs_has_concrete = !compares.ranges.is_empty()
        || !compares.negated_ranges.is_empty()
        || !compares.char_classes.is_empty()
        || !compares.negated_char_classes.is_empty();

    let mut inversion = InversionState::default();
    // Inside an OR group the verdict waits for the closing tag.
    let mut in_or = false;
    let mut matched_in_or = false;
    let mut inverse_matched_in_or = false;

    for op in rhs {
        inversion.begin_op();

        match op {
            CompareOp::Inverse => inversion.flip_permanent(),
            CompareOp::TemporaryInverse => inversion.set_temporary(),
            CompareOp::AnyChar => {
                if !in_or && !inversion.current() {
                    return true;
                }
                if in_or {
                    matched_in_or = true;
                    inverse_matched_in_or = false;
                }
            }
            CompareOp::Char(cp) => {
                let matched = range_contains(*cp, *cp);
                if !in_or && (inversion.current() ^ matched) {
                    return true;
                }
                if in_or {
                    matched_in_or |= matched;
                    inverse_matched_in_or |= !matched;
                }
            }
            CompareOp::CharRange(range) => {
                let matched = range_contains(range.from, range.to);
                if !in_or && (inversion.current() ^ matched) {
                    return true;
                }
                if in_or {
                    matched_in_or |= matched;
                    inverse_matched_in_or |= !matched;
                }
            }
            CompareOp::CharClass(class) => {
                let matched = char_class_contains(*class);
                if !in_or && (inversion.current() ^ matched) {
                    return true;
                }
                if in_or {
                    matched_in_or |= matched;
                    inverse_matched_in_or |= !matched;
                }
            }
            CompareOp::String(_) => return true,
            CompareOp::LookupTable(_) => return true,
            CompareOp::Reference(_) => return true,
            CompareOp::Property(p) => {
                if lhs_has_concrete {
                    return true;
                }
                if compares.has_any_unicode_property {
                    let contains = compares.properties.contains(p);
                    let inverse_contains = compares.negated_properties.contains(p);
                    if predicate_overlaps(
                        &mut matched_in_or,
                        &mut inverse_matched_in_or,
                        in_or,
                        inversion.current(),
                        contains,
                        inverse_contains,
                    ) {
                        return true;
                    }
                }
            }
            CompareOp::GeneralCategory(gc) => {
                if lhs_has_concrete {
                    return true;
                }
                if compares.has_any_unicode_property {
                    let contains = compares.general_categories.contains(gc);
                    let inverse_contains = compares.negated_general_categories.contains(gc);
                    if predicate_overlaps(
                        &mut matched_in_or,
                        &mut inverse_matched_in_or,
                        in_or,
                        inversion.current(),
                        contains,
                        inverse_contains,
                    ) {
                        return true;
                    }
                }
            }
            CompareOp::Script(s) => {
                if lhs_has_concrete {
                    return true;
                }
                if compares.has_any_unicode_property {
                    let contains = compares.scripts.contains(s);
                    let inverse_contains = compares.negated_scripts.contains(s);
                    if predicate_overlaps(
                        &mut matched_in_or,
                        &mut inverse_matched_in_or,
                        in_or,
                        inversion.current(),
                        contains,
                        inverse_contains,
                    ) {
                        return true;
                    }
                }
            }
            CompareOp::ScriptExtension(s) => {
                if lhs_has_concrete {
                    return true;
                }
                if compares.has_any_unicode_property {
                    let contains = compares.script_extensions.contains(s);
                    let inverse_contains = compares.negated_script_extensions.contains(s);
                    if predicate_overlaps(
                        &mut matched_in_or,
                        &mut inverse_matched_in_or,
                        in_or,
                        inversion.current(),
                        contains,
                        inverse_contains,
                    ) {
                        return true;
                    }
                }
            }
            CompareOp::Or => in_or = true,
            CompareOp::EndAndOr => {
                in_or = false;
                if inversion.current() {
                    if !inverse_matched_in_or {
                        return true;
                    }
                } else if matched_in_or {
                    return true;
                }
            }
            CompareOp::And => return true,
        }
    }

    // A dangling inversion flag would make the right side match everything.
    inversion.current()
}

/// Shared verdict logic for one predicate operand: an id in the accepted
/// set overlaps, an id in the negated set is provably excluded, an unknown
/// id conservatively overlaps (distinct predicates may share code points).
fn predicate_overlaps(
    matched_in_or: &mut bool,
    inverse_matched_in_or: &mut bool,
    in_or: bool,
    inversion: bool,
    contains: bool,
    inverse_contains: bool,
) -> bool {
    if !in_or && (inversion ^ contains) {
        return true;
    }
    if !in_or && !(inversion ^ inverse_contains) {
        return true;
    }
    if in_or {
        *matched_in_or |= contains;
        *inverse_matched_in_or |= inverse_contains;
    }
    false
}
