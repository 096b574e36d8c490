//! Scalar replacement of aggregate stack slots.
//!
//! Struct-typed slots whose fields are only reached through constant-index
//! `getfield.ptr` and then loaded or stored directly are split into one
//! scalar slot per field. The scalar slots then qualify for promotion and
//! store-to-load forwarding.

use std::collections::{HashMap, HashSet};

use super::{Transform, TransformCategory};
use crate::ir::{Function, Instruction, PrimitiveType, Type, Value};

#[derive(Default)]
pub struct ScalarReplacement;

impl Transform for ScalarReplacement {
    fn name(&self) -> &'static str {
        "scalar_replacement"
    }

    fn description(&self) -> &'static str {
        "Splits struct stack slots into per-field scalar slots"
    }

    fn category(&self) -> TransformCategory {
        TransformCategory::MemoryOptimization
    }

    fn apply(&self, func: &mut Function) -> Result<bool, String> {
        let candidates = splittable_slots(func);
        if candidates.is_empty() {
            return Ok(false);
        }

        // getfield result -> scalar slot name it becomes
        let mut field_slot: HashMap<String, String> = HashMap::new();
        for block in &func.blocks {
            for instr in &block.instructions {
                if let Instruction::GetFieldPtr {
                    result,
                    struct_ptr: Value::Variable(base),
                    field_index,
                } = instr
                {
                    if candidates.contains_key(base) {
                        field_slot.insert(result.clone(), format!("{}_f{}", base, field_index));
                    }
                }
            }
        }

        for block in &mut func.blocks {
            let mut rewritten = Vec::with_capacity(block.instructions.len());
            for instr in block.instructions.drain(..) {
                match instr {
                    Instruction::Alloc {
                        ref result,
                        allocated_ty: Type::Struct(ref fields),
                    } if candidates.contains_key(result) => {
                        for (idx, field) in fields.iter().enumerate() {
                            rewritten.push(Instruction::Alloc {
                                result: format!("{}_f{}", result, idx),
                                allocated_ty: field.ty.clone(),
                            });
                        }
                    }
                    Instruction::GetFieldPtr { ref result, .. }
                        if field_slot.contains_key(result) =>
                    {
                        // Field addresses disappear; loads and stores go to
                        // the scalar slots directly.
                    }
                    mut other => {
                        other.for_each_value_mut(|v| {
                            if let Value::Variable(name) = v {
                                if let Some(slot) = field_slot.get(name) {
                                    *v = Value::var(slot.clone());
                                }
                            }
                        });
                        rewritten.push(other);
                    }
                }
            }
            block.instructions = rewritten;
        }

        Ok(true)
    }
}

/// Struct slots where every use is a constant-index getfield whose result is
/// only a direct load/store address, and every field is primitive.
fn splittable_slots(func: &Function) -> HashMap<String, usize> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    for block in &func.blocks {
        for instr in &block.instructions {
            if let Instruction::Alloc {
                result,
                allocated_ty: Type::Struct(fields),
            } = instr
            {
                let all_primitive = fields
                    .iter()
                    .all(|f| matches!(f.ty, Type::Primitive(p) if p != PrimitiveType::Ptr));
                if all_primitive {
                    slots.insert(result.clone(), fields.len());
                }
            }
        }
    }
    if slots.is_empty() {
        return slots;
    }

    let mut rejected: HashSet<String> = HashSet::new();
    let mut field_ptrs: HashMap<String, String> = HashMap::new();
    for block in &func.blocks {
        for instr in &block.instructions {
            match instr {
                Instruction::GetFieldPtr {
                    result,
                    struct_ptr: Value::Variable(base),
                    field_index,
                } => {
                    if let Some(count) = slots.get(base) {
                        if field_index >= count {
                            rejected.insert(base.clone());
                        } else {
                            field_ptrs.insert(result.clone(), base.clone());
                        }
                    }
                }
                other => {
                    // Any use besides a constant-index getfield keeps the
                    // slot whole.
                    other.for_each_value(|v| {
                        if let Some(name) = v.as_variable() {
                            if slots.contains_key(name) {
                                rejected.insert(name.to_string());
                            }
                        }
                    });
                }
            }
        }
    }

    // Field pointers must themselves only be load/store addresses.
    for block in &func.blocks {
        for instr in &block.instructions {
            match instr {
                Instruction::Load {
                    ptr: Value::Variable(_),
                    ..
                } => {}
                Instruction::Store {
                    ptr: Value::Variable(_),
                    value,
                    ..
                } => {
                    if let Some(name) = value.as_variable() {
                        if let Some(base) = field_ptrs.get(name) {
                            rejected.insert(base.clone());
                        }
                    }
                }
                Instruction::GetFieldPtr { .. } => {}
                other => {
                    other.for_each_value(|v| {
                        if let Some(name) = v.as_variable() {
                            if let Some(base) = field_ptrs.get(name) {
                                rejected.insert(base.clone());
                            }
                        }
                    });
                }
            }
        }
    }

    for name in rejected {
        slots.remove(&name);
    }
    slots
}
