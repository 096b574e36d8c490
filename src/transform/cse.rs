//! Local common-subexpression elimination.
//!
//! Within each block, pure instructions computing the same expression reuse
//! the first result. Commutative operators are canonicalized by operand text
//! so `a + b` and `b + a` hit the same entry. Loads are not candidates:
//! intervening stores would need memory dependence tracking.

use std::collections::HashMap;

use super::{substitute_values, Transform, TransformCategory};
use crate::ir::{BinaryOp, CmpOp, Function, Instruction, Value};

#[derive(Default)]
pub struct EarlyCse;

impl Transform for EarlyCse {
    fn name(&self) -> &'static str {
        "early_cse"
    }

    fn description(&self) -> &'static str {
        "Reuses results of repeated pure expressions within a block"
    }

    fn category(&self) -> TransformCategory {
        TransformCategory::CommonSubexpressionElimination
    }

    fn apply(&self, func: &mut Function) -> Result<bool, String> {
        let mut subst: HashMap<String, Value> = HashMap::new();
        let mut changed = false;

        for block in &mut func.blocks {
            let mut available: HashMap<String, String> = HashMap::new();
            let mut keep = Vec::with_capacity(block.instructions.len());
            for instr in block.instructions.drain(..) {
                match expression_key(&instr) {
                    Some(key) => {
                        if let Some(prev) = available.get(&key) {
                            let result = instr.result_name().unwrap().to_string();
                            subst.insert(result, Value::var(prev.clone()));
                            changed = true;
                        } else {
                            available
                                .insert(key, instr.result_name().unwrap().to_string());
                            keep.push(instr);
                        }
                    }
                    None => keep.push(instr),
                }
            }
            block.instructions = keep;
        }

        substitute_values(func, &subst);
        Ok(changed)
    }
}

fn is_commutative_binary(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
    )
}

fn is_commutative_cmp(op: CmpOp) -> bool {
    matches!(op, CmpOp::Eq | CmpOp::Ne)
}

/// A textual key identifying the computation, or None if the instruction is
/// not a CSE candidate.
fn expression_key(instr: &Instruction) -> Option<String> {
    match instr {
        Instruction::Binary {
            op, ty, lhs, rhs, ..
        } => {
            let (a, b) = canonical_pair(lhs, rhs, is_commutative_binary(*op));
            Some(format!("bin:{}.{}:{},{}", op, ty, a, b))
        }
        Instruction::Cmp {
            op, ty, lhs, rhs, ..
        } => {
            let (a, b) = canonical_pair(lhs, rhs, is_commutative_cmp(*op));
            Some(format!("cmp:{}.{}:{},{}", op, ty, a, b))
        }
        Instruction::ZeroExtend {
            source_type,
            target_type,
            value,
            ..
        } => Some(format!("zext:{}.{}:{}", source_type, target_type, value)),
        Instruction::GetFieldPtr {
            struct_ptr,
            field_index,
            ..
        } => Some(format!("gfp:{},{}", struct_ptr, field_index)),
        Instruction::GetElemPtr {
            array_ptr,
            index,
            element_type,
            ..
        } => Some(format!("gep:{},{},{}", array_ptr, index, element_type)),
        Instruction::PtrToInt {
            ptr_value,
            target_type,
            ..
        } => Some(format!("p2i:{},{}", ptr_value, target_type)),
        Instruction::IntToPtr {
            int_value,
            target_type,
            ..
        } => Some(format!("i2p:{},{}", int_value, target_type)),
        _ => None,
    }
}

fn canonical_pair(lhs: &Value, rhs: &Value, commutative: bool) -> (String, String) {
    let (a, b) = (lhs.to_string(), rhs.to_string());
    if commutative && b < a {
        (b, a)
    } else {
        (a, b)
    }
}
