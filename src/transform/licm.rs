//! Loop-invariant code motion.
//!
//! Detects natural loops through back edges, then moves pure computations
//! whose operands are defined outside the loop into the loop's unique
//! outside predecessor. Loads stay put: a store inside the loop could alias
//! them.

use std::collections::HashSet;

use super::{Transform, TransformCategory};
use crate::ir::{Function, Instruction, Value};

#[derive(Default)]
pub struct LoopInvariantCodeMotion;

impl Transform for LoopInvariantCodeMotion {
    fn name(&self) -> &'static str {
        "loop_invariant_code_motion"
    }

    fn description(&self) -> &'static str {
        "Moves loop-invariant computations in front of the loop"
    }

    fn category(&self) -> TransformCategory {
        TransformCategory::LoopOptimization
    }

    fn apply(&self, func: &mut Function) -> Result<bool, String> {
        let mut changed = false;
        let loops = find_loops(func);

        for loop_info in loops.into_iter().take(10) {
            if loop_info.blocks.len() > 50 {
                continue;
            }
            let mut iterations = 0;
            while iterations < 5 {
                if !hoist_once(func, &loop_info)? {
                    break;
                }
                changed = true;
                iterations += 1;
            }
        }

        Ok(changed)
    }
}

#[derive(Debug)]
pub(crate) struct LoopInfo {
    pub header: String,
    pub latch: String,
    pub blocks: HashSet<String>,
}

/// Back edges by block layout order: an edge to an earlier block starts a
/// loop. The loop body is every block that reaches the latch without passing
/// the header.
pub(crate) fn find_loops(func: &Function) -> Vec<LoopInfo> {
    let position = |label: &str| func.blocks.iter().position(|b| b.label == label);
    let mut loops: Vec<LoopInfo> = Vec::new();

    for block in &func.blocks {
        for succ in block.successors() {
            let (from, to) = match (position(&block.label), position(succ)) {
                (Some(f), Some(t)) => (f, t),
                _ => continue,
            };
            if to <= from {
                if let Some(info) = natural_loop(func, succ, &block.label) {
                    loops.push(info);
                }
            }
        }
    }

    loops.sort_by(|a, b| a.header.cmp(&b.header));
    loops.dedup_by(|a, b| a.header == b.header);
    loops
}

fn natural_loop(func: &Function, header: &str, latch: &str) -> Option<LoopInfo> {
    let mut blocks: HashSet<String> = HashSet::new();
    blocks.insert(header.to_string());

    let mut worklist = vec![latch.to_string()];
    while let Some(label) = worklist.pop() {
        if !blocks.insert(label.clone()) {
            continue;
        }
        for block in &func.blocks {
            if block.successors().iter().any(|s| *s == label) {
                worklist.push(block.label.clone());
            }
        }
    }

    if blocks.len() > 50 {
        return None;
    }
    Some(LoopInfo {
        header: header.to_string(),
        latch: latch.to_string(),
        blocks,
    })
}

/// The loop's single predecessor outside its body, if there is exactly one.
pub(crate) fn outside_predecessor(func: &Function, loop_info: &LoopInfo) -> Option<String> {
    let mut preds: Vec<String> = Vec::new();
    for block in &func.blocks {
        if loop_info.blocks.contains(&block.label) {
            continue;
        }
        if block
            .successors()
            .iter()
            .any(|s| *s == loop_info.header.as_str())
        {
            preds.push(block.label.clone());
        }
    }
    if preds.len() == 1 {
        preds.pop()
    } else {
        None
    }
}

fn hoist_once(func: &mut Function, loop_info: &LoopInfo) -> Result<bool, String> {
    let pre_label = match outside_predecessor(func, loop_info) {
        Some(label) => label,
        None => return Ok(false),
    };

    let mut defined_in_loop: HashSet<String> = HashSet::new();
    for block in &func.blocks {
        if !loop_info.blocks.contains(&block.label) {
            continue;
        }
        for instr in &block.instructions {
            if let Some(name) = instr.result_name() {
                defined_in_loop.insert(name.to_string());
            }
        }
    }

    let is_invariant = |instr: &Instruction| -> bool {
        if instr.has_side_effects()
            || instr.is_terminator()
            || matches!(
                instr,
                Instruction::Phi { .. } | Instruction::Alloc { .. } | Instruction::Load { .. }
            )
        {
            return false;
        }
        let mut ok = true;
        instr.for_each_value(|v| {
            if let Value::Variable(name) = v {
                if defined_in_loop.contains(name) {
                    ok = false;
                }
            }
        });
        ok
    };

    // Collect at most one batch per call; callers loop until dry.
    let mut hoisted: Vec<Instruction> = Vec::new();
    for block in &mut func.blocks {
        if !loop_info.blocks.contains(&block.label) {
            continue;
        }
        let mut keep = Vec::with_capacity(block.instructions.len());
        for instr in block.instructions.drain(..) {
            if is_invariant(&instr) {
                hoisted.push(instr);
            } else {
                keep.push(instr);
            }
        }
        block.instructions = keep;
    }

    if hoisted.is_empty() {
        return Ok(false);
    }

    let pre = func
        .get_block_mut(&pre_label)
        .ok_or_else(|| format!("preheader block '{}' vanished", pre_label))?;
    let term_at = pre.instructions.len().saturating_sub(1);
    for (offset, instr) in hoisted.into_iter().enumerate() {
        pre.instructions.insert(term_at + offset, instr);
    }
    Ok(true)
}
