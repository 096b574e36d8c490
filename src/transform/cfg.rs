//! Control-flow graph cleanup.
//!
//! Removes blocks unreachable from the entry, threads jumps through trivial
//! jump-only blocks, and merges single-predecessor blocks into their
//! predecessor. Phi nodes are kept consistent with the surviving predecessor
//! sets at every step.

use std::collections::{HashMap, HashSet};

use super::{substitute_values, Transform, TransformCategory};
use crate::ir::{Function, Instruction, Value};

#[derive(Default)]
pub struct CfgSimplify;

impl Transform for CfgSimplify {
    fn name(&self) -> &'static str {
        "cfg_simplify"
    }

    fn description(&self) -> &'static str {
        "Removes unreachable blocks, threads trivial jumps, merges straight-line blocks"
    }

    fn category(&self) -> TransformCategory {
        TransformCategory::ControlFlowOptimization
    }

    fn apply(&self, func: &mut Function) -> Result<bool, String> {
        if func.blocks.is_empty() {
            return Ok(false);
        }
        let mut changed = false;
        for _ in 0..16 {
            let round = remove_unreachable(func)
                | thread_jumps(func)
                | merge_straight_line(func);
            if !round {
                break;
            }
            changed = true;
        }
        Ok(changed)
    }
}

/// Drop blocks not reachable from the entry and prune phi inputs from
/// vanished or non-predecessor blocks.
pub(crate) fn remove_unreachable(func: &mut Function) -> bool {
    if func.blocks.is_empty() {
        return false;
    }
    let mut reachable: HashSet<String> = HashSet::new();
    let mut worklist = vec![func.blocks[0].label.clone()];
    while let Some(label) = worklist.pop() {
        if !reachable.insert(label.clone()) {
            continue;
        }
        if let Some(block) = func.get_block(&label) {
            for succ in block.successors() {
                worklist.push(succ.to_string());
            }
        }
    }

    let before = func.blocks.len();
    func.blocks.retain(|b| reachable.contains(&b.label));
    let removed = func.blocks.len() != before;

    prune_phis(func) | removed
}

/// Rewrite phi incoming lists to match the actual predecessor sets. Phis
/// reduced to one input are replaced by that value.
pub(crate) fn prune_phis(func: &mut Function) -> bool {
    let mut preds: HashMap<String, HashSet<String>> = HashMap::new();
    for block in &func.blocks {
        for succ in block.successors() {
            preds
                .entry(succ.to_string())
                .or_default()
                .insert(block.label.clone());
        }
    }

    let mut subst: HashMap<String, Value> = HashMap::new();
    let mut changed = false;
    for block in &mut func.blocks {
        let block_preds = preds.get(&block.label).cloned().unwrap_or_default();
        let mut keep = Vec::with_capacity(block.instructions.len());
        for mut instr in block.instructions.drain(..) {
            if let Instruction::Phi {
                result, incoming, ..
            } = &mut instr
            {
                let before = incoming.len();
                incoming.retain(|(_, label)| block_preds.contains(label));
                if incoming.len() != before {
                    changed = true;
                }
                if incoming.len() == 1 {
                    subst.insert(result.clone(), incoming[0].0.clone());
                    changed = true;
                    continue;
                }
            }
            keep.push(instr);
        }
        block.instructions = keep;
    }
    substitute_values(func, &subst);
    changed
}

/// Redirect edges that target a block containing only `jmp X` straight to
/// `X`. Skipped when the final target has phis, which would need new
/// incoming entries per rerouted edge.
fn thread_jumps(func: &mut Function) -> bool {
    let mut simple_jumps: HashMap<String, String> = HashMap::new();
    for block in &func.blocks {
        if block.instructions.len() == 1 {
            if let Instruction::Jmp { target_label } = &block.instructions[0] {
                if target_label != &block.label {
                    simple_jumps.insert(block.label.clone(), target_label.clone());
                }
            }
        }
    }
    if simple_jumps.is_empty() {
        return false;
    }

    fn resolve(map: &HashMap<String, String>, mut tgt: String) -> String {
        let mut seen = HashSet::new();
        while let Some(next) = map.get(&tgt) {
            if !seen.insert(tgt.clone()) {
                break;
            }
            tgt = next.clone();
        }
        tgt
    }

    let has_phis: HashSet<String> = func
        .blocks
        .iter()
        .filter(|b| {
            b.instructions
                .iter()
                .any(|i| matches!(i, Instruction::Phi { .. }))
        })
        .map(|b| b.label.clone())
        .collect();

    let mut changed = false;
    let entry = func.blocks[0].label.clone();
    for block in &mut func.blocks {
        if let Some(last) = block.instructions.last_mut() {
            let mut retarget = |label: &mut String| {
                if simple_jumps.contains_key(label) {
                    let resolved = resolve(&simple_jumps, label.clone());
                    if resolved != *label && !has_phis.contains(&resolved) && resolved != entry {
                        *label = resolved;
                        changed = true;
                    }
                }
            };
            match last {
                Instruction::Jmp { target_label } => retarget(target_label),
                Instruction::Br {
                    true_label,
                    false_label,
                    ..
                } => {
                    retarget(true_label);
                    retarget(false_label);
                }
                _ => {}
            }
        }
    }
    if changed {
        remove_unreachable(func);
    }
    changed
}

/// Merge `B` into `A` when `A` ends with `jmp B` and `B` has no other
/// predecessor. Successor phis referencing `B` are relabeled to `A`.
fn merge_straight_line(func: &mut Function) -> bool {
    let mut pred_count: HashMap<String, usize> = HashMap::new();
    for block in &func.blocks {
        for succ in block.successors() {
            *pred_count.entry(succ.to_string()).or_default() += 1;
        }
    }

    let entry = match func.blocks.first() {
        Some(b) => b.label.clone(),
        None => return false,
    };

    // Find one merge candidate per round.
    let mut merge: Option<(String, String)> = None;
    for block in &func.blocks {
        if let Some(Instruction::Jmp { target_label }) = block.instructions.last() {
            if target_label != &block.label
                && target_label != &entry
                && pred_count.get(target_label) == Some(&1)
            {
                merge = Some((block.label.clone(), target_label.clone()));
                break;
            }
        }
    }
    let (a_label, b_label) = match merge {
        Some(m) => m,
        None => return false,
    };

    let b_index = func.blocks.iter().position(|b| b.label == b_label).unwrap();
    let mut b_block = func.blocks.remove(b_index);

    // B's phis have exactly one predecessor (A); fold them to their value.
    let mut subst: HashMap<String, Value> = HashMap::new();
    b_block.instructions.retain(|instr| {
        if let Instruction::Phi {
            result, incoming, ..
        } = instr
        {
            if let Some((value, _)) = incoming.first() {
                subst.insert(result.clone(), value.clone());
            }
            false
        } else {
            true
        }
    });

    let b_hints = b_block.hints.clone();
    let a_block = func.get_block_mut(&a_label).unwrap();
    a_block.instructions.pop(); // drop the jmp
    a_block.instructions.append(&mut b_block.instructions);
    a_block.hints.extend(b_hints);

    // Successor phis that named B as a predecessor now come from A.
    for block in &mut func.blocks {
        for instr in &mut block.instructions {
            if let Instruction::Phi { incoming, .. } = instr {
                for (_, label) in incoming.iter_mut() {
                    if *label == b_label {
                        *label = a_label.clone();
                    }
                }
            }
        }
    }

    substitute_values(func, &subst);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn get(src: &str, name: &str) -> Function {
        parse_module(src).unwrap().get_function(name).unwrap().clone()
    }

    #[test]
    fn test_unreachable_block_removed() {
        let mut func = get(
            r#"
            fn @f() -> i32 {
              entry:
                ret.i32 1
              orphan:
                ret.i32 2
            }
        "#,
            "f",
        );
        assert!(CfgSimplify.apply(&mut func).unwrap());
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.blocks[0].label, "entry");
    }

    #[test]
    fn test_merge_straight_line() {
        let mut func = get(
            r#"
            fn @f(i32 %x) -> i32 {
              entry:
                %a = add.i32 %x, 1
                jmp next
              next:
                %b = add.i32 %a, 2
                ret.i32 %b
            }
        "#,
            "f",
        );
        assert!(CfgSimplify.apply(&mut func).unwrap());
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.blocks[0].instructions.len(), 3);
    }

    #[test]
    fn test_jump_threading() {
        let mut func = get(
            r#"
            fn @f(bool %c) -> i32 {
              entry:
                br %c, hop, out
              hop:
                jmp out
              out:
                ret.i32 0
            }
        "#,
            "f",
        );
        assert!(CfgSimplify.apply(&mut func).unwrap());
        // hop is bypassed and then unreachable.
        assert!(func.get_block("hop").is_none());
    }

    #[test]
    fn test_phi_pruned_after_branch_removal() {
        let mut func = get(
            r#"
            fn @f(i32 %x) -> i32 {
              entry:
                jmp join
              other:
                jmp join
              join:
                %v = phi.i32 [%x, entry], [0, other]
                ret.i32 %v
            }
        "#,
            "f",
        );
        assert!(CfgSimplify.apply(&mut func).unwrap());
        // `other` is unreachable; the phi folds to %x and blocks merge.
        assert_eq!(func.blocks.len(), 1);
        match func.blocks[0].instructions.last().unwrap() {
            Instruction::Ret { value, .. } => assert_eq!(value, &Some(Value::var("x"))),
            other => panic!("Expected ret, got {:?}", other),
        }
    }

    #[test]
    fn test_loop_not_destroyed() {
        let src = r#"
            fn @f(i32 %n) -> i32 {
              entry:
                jmp header
              header:
                %i = phi.i32 [0, entry], [%next, header]
                %next = add.i32 %i, 1
                %c = lt.i32 %next, %n
                br %c, header, exit
              exit:
                ret.i32 %next
            }
        "#;
        let mut func = get(src, "f");
        CfgSimplify.apply(&mut func).unwrap();
        // The self-loop must survive; only entry may merge away.
        assert!(func.get_block("header").is_some());
        let header = func.get_block("header").unwrap();
        assert!(header
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::Phi { .. })));
    }
}
