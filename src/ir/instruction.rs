//! Instruction definitions for the recast IR.
//!
//! Instructions follow Single Static Assignment form: every `%name` is
//! defined exactly once per function, by a parameter or by the single
//! instruction naming it as its result. Blocks end with a terminator
//! (`br`, `jmp`, or `ret`).

use std::fmt;

use super::types::{PrimitiveType, Type, Value};

/// Binary arithmetic and bitwise operations.
///
/// Arithmetic operations are defined for integer and floating types; bitwise
/// and shift operations only for integer-like types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Comparison operations producing boolean results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A single instruction in a basic block.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // --- Arithmetic and logic ---
    Binary {
        op: BinaryOp,
        result: String,
        ty: PrimitiveType,
        lhs: Value,
        rhs: Value,
    },
    Cmp {
        op: CmpOp,
        result: String,
        ty: PrimitiveType,
        lhs: Value,
        rhs: Value,
    },
    ZeroExtend {
        result: String,
        source_type: PrimitiveType,
        target_type: PrimitiveType,
        value: Value,
    },
    // --- Control flow ---
    Br {
        condition: Value,
        true_label: String,
        false_label: String,
    },
    Jmp {
        target_label: String,
    },
    Ret {
        ty: Type,
        value: Option<Value>,
    },
    // --- Memory ---
    /// Named stack slot; the result is a pointer to the allocation.
    Alloc {
        result: String,
        allocated_ty: Type,
    },
    Load {
        result: String,
        ty: Type,
        ptr: Value,
    },
    Store {
        ty: Type,
        ptr: Value,
        value: Value,
    },
    GetFieldPtr {
        result: String,
        struct_ptr: Value,
        field_index: usize,
    },
    GetElemPtr {
        result: String,
        array_ptr: Value,
        index: Value,
        element_type: PrimitiveType,
    },
    PtrToInt {
        result: String,
        ptr_value: Value,
        target_type: PrimitiveType,
    },
    IntToPtr {
        result: String,
        int_value: Value,
        target_type: PrimitiveType,
    },
    // --- Calls ---
    Call {
        result: Option<String>,
        func_name: String,
        args: Vec<Value>,
    },
    // --- SSA ---
    Phi {
        result: String,
        ty: Type,
        /// Pairs of (value, predecessor label)
        incoming: Vec<(Value, String)>,
    },
}

impl Instruction {
    /// The SSA name this instruction defines, if any.
    pub fn result_name(&self) -> Option<&str> {
        match self {
            Instruction::Binary { result, .. }
            | Instruction::Cmp { result, .. }
            | Instruction::ZeroExtend { result, .. }
            | Instruction::Alloc { result, .. }
            | Instruction::Load { result, .. }
            | Instruction::GetFieldPtr { result, .. }
            | Instruction::GetElemPtr { result, .. }
            | Instruction::PtrToInt { result, .. }
            | Instruction::IntToPtr { result, .. }
            | Instruction::Phi { result, .. } => Some(result),
            Instruction::Call { result, .. } => result.as_deref(),
            Instruction::Br { .. }
            | Instruction::Jmp { .. }
            | Instruction::Ret { .. }
            | Instruction::Store { .. } => None,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Br { .. } | Instruction::Jmp { .. } | Instruction::Ret { .. }
        )
    }

    /// Whether removing this instruction can change observable behavior
    /// beyond its result value.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Instruction::Store { .. }
                | Instruction::Call { .. }
                | Instruction::Br { .. }
                | Instruction::Jmp { .. }
                | Instruction::Ret { .. }
        )
    }

    /// Visit every value operand.
    pub fn for_each_value<F: FnMut(&Value)>(&self, mut f: F) {
        match self {
            Instruction::Binary { lhs, rhs, .. } | Instruction::Cmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Instruction::ZeroExtend { value, .. } => f(value),
            Instruction::Br { condition, .. } => f(condition),
            Instruction::Jmp { .. } => {}
            Instruction::Ret { value, .. } => {
                if let Some(v) = value {
                    f(v);
                }
            }
            Instruction::Alloc { .. } => {}
            Instruction::Load { ptr, .. } => f(ptr),
            Instruction::Store { ptr, value, .. } => {
                f(ptr);
                f(value);
            }
            Instruction::GetFieldPtr { struct_ptr, .. } => f(struct_ptr),
            Instruction::GetElemPtr {
                array_ptr, index, ..
            } => {
                f(array_ptr);
                f(index);
            }
            Instruction::PtrToInt { ptr_value, .. } => f(ptr_value),
            Instruction::IntToPtr { int_value, .. } => f(int_value),
            Instruction::Call { args, .. } => {
                for a in args {
                    f(a);
                }
            }
            Instruction::Phi { incoming, .. } => {
                for (v, _) in incoming {
                    f(v);
                }
            }
        }
    }

    /// Visit every value operand mutably.
    pub fn for_each_value_mut<F: FnMut(&mut Value)>(&mut self, mut f: F) {
        match self {
            Instruction::Binary { lhs, rhs, .. } | Instruction::Cmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Instruction::ZeroExtend { value, .. } => f(value),
            Instruction::Br { condition, .. } => f(condition),
            Instruction::Jmp { .. } => {}
            Instruction::Ret { value, .. } => {
                if let Some(v) = value {
                    f(v);
                }
            }
            Instruction::Alloc { .. } => {}
            Instruction::Load { ptr, .. } => f(ptr),
            Instruction::Store { ptr, value, .. } => {
                f(ptr);
                f(value);
            }
            Instruction::GetFieldPtr { struct_ptr, .. } => f(struct_ptr),
            Instruction::GetElemPtr {
                array_ptr, index, ..
            } => {
                f(array_ptr);
                f(index);
            }
            Instruction::PtrToInt { ptr_value, .. } => f(ptr_value),
            Instruction::IntToPtr { int_value, .. } => f(int_value),
            Instruction::Call { args, .. } => {
                for a in args {
                    f(a);
                }
            }
            Instruction::Phi { incoming, .. } => {
                for (v, _) in incoming {
                    f(v);
                }
            }
        }
    }
}

// --- Display implementations ---

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                BinaryOp::Add => "add",
                BinaryOp::Sub => "sub",
                BinaryOp::Mul => "mul",
                BinaryOp::Div => "div",
                BinaryOp::Rem => "rem",
                BinaryOp::And => "and",
                BinaryOp::Or => "or",
                BinaryOp::Xor => "xor",
                BinaryOp::Shl => "shl",
                BinaryOp::Shr => "shr",
            }
        )
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                CmpOp::Eq => "eq",
                CmpOp::Ne => "ne",
                CmpOp::Gt => "gt",
                CmpOp::Ge => "ge",
                CmpOp::Lt => "lt",
                CmpOp::Le => "le",
            }
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Binary {
                op,
                result,
                ty,
                lhs,
                rhs,
            } => write!(f, "%{} = {}.{} {}, {}", result, op, ty, lhs, rhs),
            Instruction::Cmp {
                op,
                result,
                ty,
                lhs,
                rhs,
            } => write!(f, "%{} = {}.{} {}, {}", result, op, ty, lhs, rhs),
            Instruction::ZeroExtend {
                result,
                source_type,
                target_type,
                value,
            } => write!(
                f,
                "%{} = zext.{}.{} {}",
                result, source_type, target_type, value
            ),
            Instruction::Br {
                condition,
                true_label,
                false_label,
            } => write!(f, "br {}, {}, {}", condition, true_label, false_label),
            Instruction::Jmp { target_label } => write!(f, "jmp {}", target_label),
            Instruction::Ret { ty, value } => match value {
                Some(v) => write!(f, "ret.{} {}", ty, v),
                None => write!(f, "ret.void"),
            },
            Instruction::Alloc {
                result,
                allocated_ty,
            } => write!(f, "%{} = alloc.stack {}", result, allocated_ty),
            Instruction::Load { result, ty, ptr } => write!(f, "%{} = load.{} {}", result, ty, ptr),
            Instruction::Store { ty, ptr, value } => write!(f, "store.{} {}, {}", ty, ptr, value),
            Instruction::GetFieldPtr {
                result,
                struct_ptr,
                field_index,
            } => write!(
                f,
                "%{} = getfield.ptr {}, {}",
                result, struct_ptr, field_index
            ),
            Instruction::GetElemPtr {
                result,
                array_ptr,
                index,
                element_type,
            } => write!(
                f,
                "%{} = getelem.ptr {}, {}, {}",
                result, array_ptr, index, element_type
            ),
            Instruction::PtrToInt {
                result,
                ptr_value,
                target_type,
            } => write!(f, "%{} = ptrtoint {}, {}", result, ptr_value, target_type),
            Instruction::IntToPtr {
                result,
                int_value,
                target_type,
            } => write!(f, "%{} = inttoptr {}, {}", result, int_value, target_type),
            Instruction::Call {
                result,
                func_name,
                args,
            } => {
                if let Some(res) = result {
                    write!(f, "%{} = call @{}(", res, func_name)?;
                } else {
                    write!(f, "call @{}(", func_name)?;
                }
                for (i, arg) in args.iter().enumerate() {
                    write!(f, "{}", arg)?;
                    if i < args.len() - 1 {
                        write!(f, ", ")?;
                    }
                }
                write!(f, ")")
            }
            Instruction::Phi {
                result,
                ty,
                incoming,
            } => {
                write!(f, "%{} = phi.{} ", result, ty)?;
                for (i, (val, label)) in incoming.iter().enumerate() {
                    write!(f, "[{}, {}]", val, label)?;
                    if i < incoming.len() - 1 {
                        write!(f, ", ")?;
                    }
                }
                Ok(())
            }
        }
    }
}
