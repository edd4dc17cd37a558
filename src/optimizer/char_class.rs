use std::collections::BTreeMap;

use crate::bytecode::compare::{CharRange, CompareKind, CompareOp, encode_compare_op};
use crate::bytecode::{ByteCode, CodeValue, OpCode};
use crate::optimizer::error::OptimizeError;

// =============================================================================
// CHARACTER-CLASS COMPACTOR
// =============================================================================
//
// Accumulates a class's chars and ranges into two polarity tables (swapped
// by TemporaryInverse) and flushes each as a single LookupTable operand
// with overlapping and adjacent ranges merged. Elements that cannot live in
// a table are emitted verbatim, in their original relative order, with a
// flush in front so the disjunction's reading order is preserved.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertOutcome {
    Inserted,
    ReplaceWithAnyChar,
    TemporaryInversionNeeded,
    PermanentInversionNeeded,
    FlushOnInsertion,
    FinishFlushOnInsertion,
    CannotPlaceInTable,
}

fn insert_into_lookup_table(
    table: &mut BTreeMap<u32, u32>,
    op: &CompareOp,
) -> Result<InsertOutcome, OptimizeError> {
    Ok(match op {
        CompareOp::Inverse => InsertOutcome::PermanentInversionNeeded,
        CompareOp::TemporaryInverse => InsertOutcome::TemporaryInversionNeeded,
        CompareOp::AnyChar => InsertOutcome::ReplaceWithAnyChar,
        CompareOp::Char(cp) => {
            insert_max(table, *cp, *cp);
            InsertOutcome::Inserted
        }
        CompareOp::CharRange(range) => {
            insert_max(table, range.from, range.to);
            InsertOutcome::Inserted
        }
        CompareOp::And => InsertOutcome::FlushOnInsertion,
        CompareOp::EndAndOr => InsertOutcome::FinishFlushOnInsertion,
        CompareOp::CharClass(_)
        | CompareOp::Reference(_)
        | CompareOp::Property(_)
        | CompareOp::GeneralCategory(_)
        | CompareOp::Script(_)
        | CompareOp::ScriptExtension(_)
        | CompareOp::Or => InsertOutcome::CannotPlaceInTable,
        CompareOp::String(_) | CompareOp::LookupTable(_) => {
            return Err(OptimizeError::UnexpectedOperand {
                reason: "strings and lookup tables do not occur in a class under construction",
            });
        }
    })
}

/// Same-start ranges keep the wider end; distinct starts are left for the
/// flush-time sweep to merge.
fn insert_max(table: &mut BTreeMap<u32, u32>, from: u32, to: u32) {
    let end = table.entry(from).or_insert(to);
    if *end < to {
        *end = to;
    }
}

/// Emit one table as a `LookupTable` operand, merging ranges that overlap
/// or touch (`a.to + 1 >= b.from` after sorting).
fn flush_one_table(table: &mut BTreeMap<u32, u32>, payload: &mut Vec<CodeValue>, argc: &mut usize) {
    *argc += 1;
    payload.push(CompareKind::LookupTable.value());
    let count_index = payload.len();
    payload.push(0);

    let mut active: Option<CharRange> = None;
    let mut range_count = 0u64;
    for (&from, &to) in table.iter() {
        match active {
            None => active = Some(CharRange::new(from, to)),
            Some(current) => {
                if from as u64 <= current.to as u64 + 1 && to as u64 + 1 >= current.from as u64 {
                    active = Some(CharRange::new(
                        current.from.min(from),
                        current.to.max(to),
                    ));
                } else {
                    range_count += 1;
                    payload.push(current.pack());
                    active = Some(CharRange::new(from, to));
                }
            }
        }
    }
    if let Some(current) = active {
        range_count += 1;
        payload.push(current.pack());
    }
    payload[count_index] = range_count;
    table.clear();
}

fn flush_tables(
    table: &mut BTreeMap<u32, u32>,
    inverted_table: &mut BTreeMap<u32, u32>,
    payload: &mut Vec<CodeValue>,
    argc: &mut usize,
) {
    if !table.is_empty() {
        flush_one_table(table, payload, argc);
    }
    if !inverted_table.is_empty() {
        *argc += 1;
        payload.push(CompareKind::TemporaryInverse.value());
        flush_one_table(inverted_table, payload, argc);
    }
}

/// Append one `Compare` instruction holding a minimal encoding of a
/// character class's operand list.
pub fn append_character_class(
    target: &mut ByteCode,
    ops: Vec<CompareOp>,
) -> Result<(), OptimizeError> {
    // Nothing to compact.
    if ops.len() <= 1 {
        target.push_compare(&ops);
        return Ok(());
    }

    let mut payload: Vec<CodeValue> = Vec::new();
    let mut argc = 0usize;

    let mut table: BTreeMap<u32, u32> = BTreeMap::new();
    let mut inverted_table: BTreeMap<u32, u32> = BTreeMap::new();
    let mut inverted_active = false;
    let mut invert_for_next_iteration = false;
    let mut flush_on_every_insertion = false;

    for op in &ops {
        let should_invert_after_this_iteration = invert_for_next_iteration;
        invert_for_next_iteration = false;

        let current = if inverted_active {
            &mut inverted_table
        } else {
            &mut table
        };
        let outcome = insert_into_lookup_table(current, op)?;

        match outcome {
            InsertOutcome::Inserted => {
                if flush_on_every_insertion {
                    flush_tables(&mut table, &mut inverted_table, &mut payload, &mut argc);
                }
            }
            InsertOutcome::ReplaceWithAnyChar => {
                table.clear();
                inverted_table.clear();
                payload.push(CompareKind::AnyChar.value());
                argc += 1;
            }
            InsertOutcome::TemporaryInversionNeeded => {
                inverted_active = !inverted_active;
                invert_for_next_iteration = true;
            }
            InsertOutcome::PermanentInversionNeeded => {
                flush_tables(&mut table, &mut inverted_table, &mut payload, &mut argc);
                payload.push(CompareKind::Inverse.value());
                argc += 1;
            }
            InsertOutcome::FlushOnInsertion
            | InsertOutcome::FinishFlushOnInsertion
            | InsertOutcome::CannotPlaceInTable => {
                flush_tables(&mut table, &mut inverted_table, &mut payload, &mut argc);
                if outcome != InsertOutcome::CannotPlaceInTable {
                    flush_on_every_insertion = outcome == InsertOutcome::FlushOnInsertion;
                }
                if inverted_active {
                    payload.push(CompareKind::TemporaryInverse.value());
                    argc += 1;
                }
                encode_compare_op(op, &mut payload);
                argc += 1;
            }
        }

        if should_invert_after_this_iteration {
            inverted_active = !inverted_active;
        }
    }

    flush_tables(&mut table, &mut inverted_table, &mut payload, &mut argc);

    target.push(OpCode::Compare.value());
    target.push(argc as CodeValue);
    target.push(payload.len() as CodeValue);
    target.extend_words(&payload);
    Ok(())
}
