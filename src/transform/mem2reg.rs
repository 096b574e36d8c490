//! Stack slot promotion.
//!
//! Slots whose only uses are direct loads and stores cannot alias anything,
//! so stored values can be forwarded to later loads in the same block and
//! slots that are never read can be dropped entirely. Cross-block promotion
//! is left to the SSA construction in the JIT lowering, which turns the same
//! class of slots into registers.

use std::collections::{HashMap, HashSet};

use super::{substitute_values, Transform, TransformCategory};
use crate::ir::{Function, Instruction, Type, Value};

#[derive(Default)]
pub struct PromoteStackSlots;

impl Transform for PromoteStackSlots {
    fn name(&self) -> &'static str {
        "promote_stack_slots"
    }

    fn description(&self) -> &'static str {
        "Forwards stores to loads through non-escaping stack slots and drops dead slots"
    }

    fn category(&self) -> TransformCategory {
        TransformCategory::MemoryOptimization
    }

    fn apply(&self, func: &mut Function) -> Result<bool, String> {
        let promotable = promotable_slots(func);
        if promotable.is_empty() {
            return Ok(false);
        }

        let mut changed = false;
        let mut subst: HashMap<String, Value> = HashMap::new();

        // Store-to-load forwarding within each block.
        for block in &mut func.blocks {
            let mut last_store: HashMap<String, Value> = HashMap::new();
            let mut keep = Vec::with_capacity(block.instructions.len());
            for instr in block.instructions.drain(..) {
                match &instr {
                    Instruction::Store { ptr, value, .. } => {
                        if let Some(slot) = ptr.as_variable().filter(|s| promotable.contains(*s)) {
                            last_store.insert(slot.to_string(), value.clone());
                        }
                        keep.push(instr);
                    }
                    Instruction::Load { result, ptr, .. } => {
                        let forwarded = ptr
                            .as_variable()
                            .filter(|s| promotable.contains(*s))
                            .and_then(|s| last_store.get(s));
                        if let Some(value) = forwarded {
                            subst.insert(result.clone(), value.clone());
                            changed = true;
                            // Load dropped; uses take the stored value.
                        } else {
                            keep.push(instr);
                        }
                    }
                    _ => keep.push(instr),
                }
            }
            block.instructions = keep;
        }

        substitute_values(func, &subst);

        // Slots with no remaining loads are write-only; erase them with
        // their stores.
        let mut loaded: HashSet<String> = HashSet::new();
        for block in &func.blocks {
            for instr in &block.instructions {
                if let Instruction::Load { ptr, .. } = instr {
                    if let Some(slot) = ptr.as_variable() {
                        loaded.insert(slot.to_string());
                    }
                }
            }
        }
        for block in &mut func.blocks {
            let before = block.instructions.len();
            block.instructions.retain(|instr| match instr {
                Instruction::Alloc { result, .. } => {
                    !(promotable.contains(result) && !loaded.contains(result))
                }
                Instruction::Store { ptr, .. } => match ptr.as_variable() {
                    Some(slot) => !(promotable.contains(slot) && !loaded.contains(slot)),
                    None => true,
                },
                _ => true,
            });
            if block.instructions.len() != before {
                changed = true;
            }
        }

        Ok(changed)
    }
}

/// Slots of primitive type whose every use is a direct load or store address.
pub(crate) fn promotable_slots(func: &Function) -> HashSet<String> {
    let mut slots: HashSet<String> = HashSet::new();
    for block in &func.blocks {
        for instr in &block.instructions {
            if let Instruction::Alloc {
                result,
                allocated_ty: Type::Primitive(_),
            } = instr
            {
                slots.insert(result.clone());
            }
        }
    }
    if slots.is_empty() {
        return slots;
    }

    let mut escaped: HashSet<String> = HashSet::new();
    for block in &func.blocks {
        for instr in &block.instructions {
            match instr {
                // A direct load or store address is not an escape, but
                // storing the slot's address somewhere is.
                Instruction::Load { .. } => {}
                Instruction::Store { value, .. } => {
                    if let Some(name) = value.as_variable() {
                        escaped.insert(name.to_string());
                    }
                }
                other => {
                    other.for_each_value(|v| {
                        if let Some(name) = v.as_variable() {
                            escaped.insert(name.to_string());
                        }
                    });
                }
            }
        }
    }

    slots.retain(|s| !escaped.contains(s));
    slots
}
