use std::collections::HashMap;

use tracing::{debug, trace};

use crate::bytecode::{ByteCode, CodeValue, OpCode};
use crate::optimizer::error::OptimizeError;

// =============================================================================
// ALTERNATION MERGER - trie-based common-subsequence elimination
// =============================================================================
//
// Alternatives are inserted instruction-by-instruction into a trie whose
// keys pair each instruction's words with the words of every jump known to
// branch into it. Keying on incoming edges keeps two byte-identical
// instructions reached differently (say, two loop bodies) from ever being
// merged, which would corrupt the jump structure.
//
// Layout is then chosen by cost: a naive fork chain, or a depth-first walk
// of the trie emitting each shared node once plus one dispatch fork per
// child:
//
//     node.insn
//     FORK_JUMP child1
//     FORK_JUMP child2
//     ...

#[derive(Debug, Default)]
struct TrieNode {
    /// The instruction's own words. Empty only at the root.
    insn: Vec<CodeValue>,
    /// Words of every jump instruction branching into this instruction;
    /// part of the key.
    edges: Vec<Vec<CodeValue>>,
    /// Every `(alternative index, original address)` that mapped here.
    sources: Vec<(usize, usize)>,
    children: Vec<usize>,
}

fn ensure_child(
    nodes: &mut Vec<TrieNode>,
    parent: usize,
    insn: Vec<CodeValue>,
    edges: Vec<Vec<CodeValue>>,
) -> usize {
    for &child in &nodes[parent].children {
        if nodes[child].insn == insn && nodes[child].edges == edges {
            return child;
        }
    }
    let index = nodes.len();
    nodes.push(TrieNode {
        insn,
        edges,
        sources: Vec::new(),
        children: Vec::new(),
    });
    nodes[parent].children.push(index);
    index
}

/// An offset operand waiting for its destination to be laid out.
#[derive(Debug)]
struct Patch {
    /// The destination, named as an original `(alternative, address)`.
    alternative: usize,
    ip: usize,
    /// Operand index in the output stream.
    at: usize,
    /// Words between the operand and the end of its instruction; the
    /// resolved offset is `destination - at - size`.
    size: usize,
    done: bool,
}

/// Append "try `alternatives[0]`, else `[1]`, ... else `[n-1]`" to
/// `target`, sharing instruction runs common to a suffix set of the
/// alternatives when that is cheaper than a plain fork chain.
///
/// Must be called while the fragments' jump addresses are still final only
/// relative to themselves, i.e. before they are stitched into a larger
/// stream.
pub fn append_alternation(
    target: &mut ByteCode,
    alternatives: Vec<ByteCode>,
) -> Result<(), OptimizeError> {
    if alternatives.is_empty() {
        return Ok(());
    }
    if alternatives.len() == 1 {
        target.extend_from(&alternatives[0]);
        return Ok(());
    }
    if alternatives.iter().all(|alt| alt.is_empty()) {
        return Ok(());
    }

    // At most one empty alternative is meaningful; drop the rest before
    // layout.
    let mut seen_empty = false;
    let mut alternatives: Vec<ByteCode> = alternatives
        .into_iter()
        .filter(|alt| {
            if alt.is_empty() {
                !std::mem::replace(&mut seen_empty, true)
            } else {
                true
            }
        })
        .collect();
    if alternatives.len() == 1 {
        target.extend_from(&alternatives[0]);
        return Ok(());
    }

    // Make the implicit fall-off-the-end jump explicit; the trie needs it
    // as a real node.
    for alternative in &mut alternatives {
        alternative.push_jump(OpCode::Jump, 0);
    }

    // Find incoming jump edges per alternative: they key the trie, and
    // they tell us which offsets to patch when nodes move.
    let mut incoming_edges: Vec<HashMap<usize, Vec<Vec<CodeValue>>>> = Vec::new();
    let mut has_any_backwards_jump = false;
    for alternative in &alternatives {
        let mut edges: HashMap<usize, Vec<Vec<CodeValue>>> = HashMap::new();
        let mut ip = 0;
        while ip < alternative.len() {
            let inst = alternative.inst_at(ip)?;
            if inst.opcode.is_jump_family() {
                let target_ip = inst.resolve_jump(alternative.len())?;
                edges.entry(target_ip).or_default().push(inst.words().to_vec());
                has_any_backwards_jump |= inst.jump_offset() < 0;
            } else if inst.opcode == OpCode::Repeat {
                let target_ip = inst.resolve_repeat()?;
                edges.entry(target_ip).or_default().push(inst.words().to_vec());
                has_any_backwards_jump = true;
            }
            ip += inst.size();
        }
        incoming_edges.push(edges);
    }

    // Insert every alternative into the trie.
    let mut trie: Vec<TrieNode> = vec![TrieNode::default()];
    let mut common_hits = 0usize;
    let mut total_nodes = 0usize;
    let mut total_bytecode_entries_in_tree = 0usize;
    for (i, alternative) in alternatives.iter().enumerate() {
        let mut active = 0usize;
        let mut ip = 0;
        while ip < alternative.len() {
            total_nodes += 1;
            let inst = alternative.inst_at(ip)?;
            let size = inst.size();
            let edge_key = incoming_edges[i].get(&ip).cloned().unwrap_or_default();
            active = ensure_child(&mut trie, active, inst.words().to_vec(), edge_key);
            if trie[active].sources.is_empty() {
                total_bytecode_entries_in_tree += size;
            } else {
                common_hits += 1;
            }
            trie[active].sources.push((i, ip));
            ip += size;
        }
    }

    // Worth a tree only if sharing beats the two extra dispatch words per
    // unique node.
    let tree_cost = (total_nodes - common_hits) * 2;
    let chain_cost = total_bytecode_entries_in_tree + alternatives.len() * 2;
    debug!(
        total_nodes,
        common_hits, tree_cost, chain_cost, "alternation layout costs"
    );

    if common_hits == 0 || tree_cost > chain_cost {
        layout_chain(target, &alternatives);
        Ok(())
    } else {
        layout_tree(
            target,
            &alternatives,
            &trie,
            has_any_backwards_jump,
        )
    }
}

/// Two-way convenience form used by the parser for `left|right`.
pub fn append_alternation_pair(
    target: &mut ByteCode,
    left: ByteCode,
    right: ByteCode,
) -> Result<(), OptimizeError> {
    append_alternation(target, vec![left, right])
}

/// Sequential layout: a fork per non-first alternative up front, then the
/// alternatives back-to-back (in reverse), each chased by a jump to the
/// common end.
fn layout_chain(target: &mut ByteCode, alternatives: &[ByteCode]) {
    trace!("laying out alternation as a fork chain");
    let n = alternatives.len();

    let patch_start = target.len();
    for _ in 1..n {
        target.push(OpCode::ForkJump.value());
        target.push(0); // patched below
    }

    let mut size_to_jump = 0usize;
    for i in (1..=n).rev() {
        let entry = &alternatives[i - 1];
        let is_first = i == 1;
        let instruction_size = entry.len() + if is_first { 0 } else { 2 };
        size_to_jump += instruction_size;

        if !is_first {
            target.set_word(
                patch_start + (i - 2) * 2 + 1,
                (size_to_jump + (n - i) * 2) as CodeValue,
            );
        }
    }

    for i in (1..=n).rev() {
        let chunk = &alternatives[i - 1];
        let has_previous = i > 1;
        size_to_jump -= chunk.len() + if has_previous { 2 } else { 0 };

        target.extend_from(chunk);
        target.push(OpCode::Jump.value());
        target.push(size_to_jump as CodeValue);
    }
}

/// Depth-first trie emission with deferred forward patches. Backward
/// references must already have been emitted (CSE never reorders one
/// alternative's instructions), so a missing mapping is fatal.
fn layout_tree(
    target: &mut ByteCode,
    alternatives: &[ByteCode],
    trie: &[TrieNode],
    has_any_backwards_jump: bool,
) -> Result<(), OptimizeError> {
    trace!("laying out alternation as a trie");

    let mut patches: Vec<Patch> = Vec::new();
    // Per alternative: original address -> emitted address. Only needed to
    // resolve backward jumps.
    let mut emitted_at: Vec<HashMap<usize, usize>> = vec![HashMap::new(); alternatives.len()];

    // Explicit worklist; alternation nesting can outgrow the call stack.
    let mut nodes_to_visit: Vec<usize> = vec![0];

    while let Some(node_index) = nodes_to_visit.pop() {
        let node = &trie[node_index];

        // Resolve every patch waiting on this node.
        for patch in patches.iter_mut() {
            if patch.done {
                continue;
            }
            let is_here = node
                .sources
                .iter()
                .any(|&(alt, ip)| alt == patch.alternative && ip == patch.ip);
            if is_here {
                let value = (target.len() - patch.at - patch.size) as CodeValue;
                if value == 0 && patch.size == 1 {
                    // A zero-offset fork still forks; a zero-offset jump is
                    // dead code the next pass removes.
                    target.set_word(patch.at - 1, OpCode::Jump.value());
                }
                target.set_word(patch.at, value);
                patch.done = true;
            }
        }

        if !node.insn.is_empty() {
            let new_ip = target.len();
            target.extend_words(&node.insn);

            if has_any_backwards_jump {
                for &(alt, old_ip) in &node.sources {
                    emitted_at[alt].insert(old_ip, new_ip);
                }
            }

            let inst = target.inst_at(new_ip)?;
            let size = inst.size();
            let jump_info = match inst.opcode {
                op if op.is_jump_family() => Some((inst.jump_offset(), false)),
                OpCode::Repeat => Some((
                    -(inst.repeat_offset() as i64) - size as i64,
                    true,
                )),
                _ => None,
            };

            if let Some((jump_offset, repeat_convention)) = jump_info {
                let only_one = node.sources.len() == 1;
                if !only_one {
                    // The shared copy falls through; a dispatch fork per
                    // source follows.
                    target.set_word(new_ip + 1, 0);
                }

                let mut patch_at = new_ip + 1;
                let mut patch_size = size - 1;
                let mut negate = repeat_convention;

                for &(alt, old_ip) in &node.sources {
                    if !only_one {
                        target.push(OpCode::ForkJump.value());
                        patch_at = target.len();
                        patch_size = 1;
                        negate = false;
                        target.push(0);
                    }

                    let intended = old_ip as i64 + jump_offset + size as i64;
                    if intended < 0 {
                        return Err(OptimizeError::unmapped(old_ip, 0));
                    }
                    let intended = intended as usize;

                    if jump_offset < 0 {
                        let destination = *emitted_at[alt]
                            .get(&intended)
                            .ok_or(OptimizeError::unmapped(old_ip, intended))?;
                        let mut value = destination as i64 - patch_at as i64 - patch_size as i64;
                        if negate {
                            value = -value - size as i64;
                        }
                        target.set_word(patch_at, value as CodeValue);
                    } else {
                        patches.push(Patch {
                            alternative: alt,
                            ip: intended,
                            at: patch_at,
                            size: patch_size,
                            done: false,
                        });
                    }
                }
            }
        }

        for &child in &trie[node_index].children {
            target.push(OpCode::ForkJump.value());
            if let Some(&(alt, ip)) = trie[child].sources.first() {
                patches.push(Patch {
                    alternative: alt,
                    ip,
                    at: target.len(),
                    size: 1,
                    done: false,
                });
            }
            target.push(0);
            nodes_to_visit.push(child);
        }
    }

    for patch in &patches {
        if patch.done {
            continue;
        }
        if patch.ip >= alternatives[patch.alternative].len() {
            // A jump to the end of its alternative; the combined end
            // stands in for it.
            let value = (target.len() - patch.at - patch.size) as CodeValue;
            target.set_word(patch.at, value);
        } else {
            return Err(OptimizeError::unresolved_patch(
                patch.alternative,
                patch.ip,
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CompareOp;

    fn literal(text: &str) -> ByteCode {
        let mut code = ByteCode::new();
        for c in text.chars() {
            code.push_compare(&[CompareOp::Char(c as u32)]);
        }
        code
    }

    /// Decoded single-char compares in the stream, in address order.
    fn compare_chars(code: &ByteCode) -> Vec<char> {
        let mut chars = Vec::new();
        let mut ip = 0;
        while ip < code.len() {
            let inst = code.inst_at(ip).unwrap();
            if inst.opcode == OpCode::Compare {
                for op in inst.flat_compares().unwrap() {
                    if let CompareOp::Char(cp) = op {
                        chars.push(char::from_u32(cp).unwrap());
                    }
                }
            }
            ip += inst.size();
        }
        chars
    }

    fn count_opcode(code: &ByteCode, opcode: OpCode) -> usize {
        let mut count = 0;
        let mut ip = 0;
        while ip < code.len() {
            let inst = code.inst_at(ip).unwrap();
            if inst.opcode == opcode {
                count += 1;
            }
            ip += inst.size();
        }
        count
    }

    #[test]
    fn test_no_alternatives_is_noop() {
        let mut target = ByteCode::new();
        append_alternation(&mut target, vec![]).unwrap();
        assert!(target.is_empty());
    }

    #[test]
    fn test_single_alternative_is_plain_extend() {
        let mut target = ByteCode::new();
        append_alternation(&mut target, vec![literal("ab")]).unwrap();
        assert_eq!(target, literal("ab"));
    }

    #[test]
    fn test_all_empty_is_noop() {
        let mut target = ByteCode::new();
        append_alternation(&mut target, vec![ByteCode::new(), ByteCode::new()]).unwrap();
        assert!(target.is_empty());
    }

    #[test]
    fn test_shared_prefix_is_emitted_once() {
        let mut target = ByteCode::new();
        append_alternation(&mut target, vec![literal("ab"), literal("ac")]).unwrap();

        target.validate().unwrap();

        let chars = compare_chars(&target);
        assert_eq!(chars.iter().filter(|&&c| c == 'a').count(), 1);
        assert!(chars.contains(&'b'));
        assert!(chars.contains(&'c'));
    }

    #[test]
    fn test_disjoint_alternatives_fall_back_to_chain() {
        let mut target = ByteCode::new();
        append_alternation(&mut target, vec![literal("ab"), literal("cd")]).unwrap();

        target.validate().unwrap();

        // Chain shape: one dispatch fork, both alternatives verbatim.
        assert_eq!(target.inst_at(0).unwrap().opcode, OpCode::ForkJump);
        assert_eq!(count_opcode(&target, OpCode::ForkJump), 1);
        assert_eq!(compare_chars(&target), vec!['c', 'd', 'a', 'b']);
    }

    #[test]
    fn test_chain_dispatch_fork_targets_first_alternative() {
        let mut target = ByteCode::new();
        append_alternation(&mut target, vec![literal("ab"), literal("cd")]).unwrap();

        // The dispatch fork jumps to the first alternative; the fall
        // through is the second.
        let fork = target.inst_at(0).unwrap();
        let fork_target = fork.resolve_jump(target.len()).unwrap();
        let at_target = target.inst_at(fork_target).unwrap();
        assert_eq!(at_target.opcode, OpCode::Compare);
        assert_eq!(
            at_target.flat_compares().unwrap(),
            vec![CompareOp::Char('a' as u32)]
        );
    }

    #[test]
    fn test_three_way_chain(){
        let mut target = ByteCode::new();
        append_alternation(
            &mut target,
            vec![literal("ab"), literal("cd"), literal("ef")],
        )
        .unwrap();

        target.validate().unwrap();
        assert_eq!(count_opcode(&target, OpCode::ForkJump), 2);
        for c in ['a', 'b', 'c', 'd', 'e', 'f'] {
            assert!(compare_chars(&target).contains(&c));
        }
    }

    #[test]
    fn test_empty_alternatives_are_deduplicated() {
        let mut merged_twice = ByteCode::new();
        append_alternation(
            &mut merged_twice,
            vec![literal("a"), ByteCode::new(), ByteCode::new()],
        )
        .unwrap();

        let mut merged_once = ByteCode::new();
        append_alternation(&mut merged_once, vec![literal("a"), ByteCode::new()]).unwrap();

        assert_eq!(merged_twice, merged_once);
    }

    #[test]
    fn test_identical_alternatives_share_fully() {
        let mut target = ByteCode::new();
        append_alternation(&mut target, vec![literal("ab"), literal("ab")]).unwrap();

        target.validate().unwrap();
        assert_eq!(compare_chars(&target), vec!['a', 'b']);
    }

    #[test]
    fn test_backward_jumps_survive_tree_layout() {
        // Each alternative is "a+b": Compare('a'), ForkStay back, Compare('b').
        let plus = |c: char, follow: char| {
            let mut code = ByteCode::new();
            code.push_compare(&[CompareOp::Char(c as u32)]);
            code.push_jump(OpCode::ForkStay, -7);
            code.push_compare(&[CompareOp::Char(follow as u32)]);
            code
        };

        let mut target = ByteCode::new();
        append_alternation(&mut target, vec![plus('a', 'b'), plus('a', 'b')]).unwrap();

        // Identical alternatives collapse to one body; the backward fork
        // must still land on an instruction start.
        target.validate().unwrap();
        assert_eq!(
            compare_chars(&target).iter().filter(|&&c| c == 'a').count(),
            1
        );
    }

    #[test]
    fn test_loop_bodies_with_different_incoming_edges_are_not_merged() {
        // "a+x" and "a?x": both start with Compare('a'), but in the first
        // it is a loop body (a backward fork targets it). The edge key must
        // keep the two 'a' compares apart.
        let mut looped = ByteCode::new();
        looped.push_compare(&[CompareOp::Char('a' as u32)]);
        looped.push_jump(OpCode::ForkStay, -7);
        looped.push_compare(&[CompareOp::Char('x' as u32)]);

        let mut optional = ByteCode::new();
        optional.push_compare(&[CompareOp::Char('a' as u32)]);
        optional.push_compare(&[CompareOp::Char('x' as u32)]);

        let mut target = ByteCode::new();
        append_alternation(&mut target, vec![looped, optional]).unwrap();

        target.validate().unwrap();
        // Not merged: the 'a' compare appears once per alternative.
        assert_eq!(
            compare_chars(&target).iter().filter(|&&c| c == 'a').count(),
            2
        );
    }

    #[test]
    fn test_pair_helper_matches_list_form() {
        let mut via_pair = ByteCode::new();
        append_alternation_pair(&mut via_pair, literal("ab"), literal("ac")).unwrap();

        let mut via_list = ByteCode::new();
        append_alternation(&mut via_list, vec![literal("ab"), literal("ac")]).unwrap();

        assert_eq!(via_pair, via_list);
    }
}
