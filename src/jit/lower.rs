//! Lowering recast IR functions to Cranelift IR.
//!
//! Every SSA name maps to a Cranelift frontend `Variable`; the frontend's
//! SSA builder reconstructs phis from the definitions placed in predecessor
//! blocks. Stack slots whose only uses are direct loads and stores become
//! variables too (register promotion); all other slots get real stack
//! memory.

use std::collections::HashMap;

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::stackslot::{StackSlotData, StackSlotKind};
use cranelift_codegen::ir::{types, AbiParam, Block, InstBuilder, MemFlags, Signature};
use cranelift_codegen::isa::TargetIsa;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::JITModule;
use cranelift_module::{DataId, FuncId, Module as _};

use super::{JitError, JitResult};
use crate::ir::{
    self, BinaryOp, CmpOp, Function, Instruction, Literal, PrimitiveType, Type, Value,
};
use crate::transform::promotable_slots;

/// Build the Cranelift signature for an IR function signature.
pub fn ir_signature(sig: &ir::FunctionSignature, isa: &dyn TargetIsa) -> JitResult<Signature> {
    let mut out = Signature::new(isa.default_call_conv());
    for param in &sig.params {
        let prim = primitive_of(&param.ty).ok_or_else(|| {
            JitError::Unsupported(format!(
                "parameter '%{}' has non-primitive type {}",
                param.name, param.ty
            ))
        })?;
        out.params.push(AbiParam::new(clif_type(prim, isa)));
    }
    match &sig.return_type {
        Type::Void => {}
        ty => {
            let prim = primitive_of(ty).ok_or_else(|| {
                JitError::Unsupported(format!("non-primitive return type {}", ty))
            })?;
            out.returns.push(AbiParam::new(clif_type(prim, isa)));
        }
    }
    Ok(out)
}

fn primitive_of(ty: &Type) -> Option<PrimitiveType> {
    match ty {
        Type::Primitive(p) => Some(*p),
        _ => None,
    }
}

fn clif_type(prim: PrimitiveType, isa: &dyn TargetIsa) -> types::Type {
    match prim {
        PrimitiveType::I8 | PrimitiveType::U8 | PrimitiveType::Bool => types::I8,
        PrimitiveType::I16 | PrimitiveType::U16 => types::I16,
        PrimitiveType::I32 | PrimitiveType::U32 => types::I32,
        PrimitiveType::I64 | PrimitiveType::U64 => types::I64,
        PrimitiveType::F32 => types::F32,
        PrimitiveType::F64 => types::F64,
        PrimitiveType::Ptr => isa.pointer_type(),
    }
}

/// Translates one IR function body into a Cranelift function.
pub struct FunctionTranslator<'a> {
    func: &'a Function,
    snapshot: &'a ir::Module,
    func_ids: &'a HashMap<String, FuncId>,
    data_ids: &'a HashMap<String, DataId>,
    isa: &'a dyn TargetIsa,
}

impl<'a> FunctionTranslator<'a> {
    pub fn new(
        func: &'a Function,
        snapshot: &'a ir::Module,
        func_ids: &'a HashMap<String, FuncId>,
        data_ids: &'a HashMap<String, DataId>,
        isa: &'a dyn TargetIsa,
    ) -> Self {
        Self {
            func,
            snapshot,
            func_ids,
            data_ids,
            isa,
        }
    }

    pub fn translate(
        self,
        module: &mut JITModule,
        clif_func: &mut cranelift_codegen::ir::Function,
        builder_ctx: &mut FunctionBuilderContext,
    ) -> JitResult<()> {
        let mut builder = FunctionBuilder::new(clif_func, builder_ctx);
        let mut state = TranslationState::prepare(self.func, self.snapshot, self.isa, &mut builder)?;

        for (index, ir_block) in self.func.blocks.iter().enumerate() {
            let block = state.blocks[&ir_block.label];
            if index > 0 {
                builder.switch_to_block(block);
            }
            for instr in &ir_block.instructions {
                self.lower_instruction(&mut builder, &mut state, module, &ir_block.label, instr)?;
            }
        }

        builder.seal_all_blocks();
        builder.finalize();
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn lower_instruction(
        &self,
        builder: &mut FunctionBuilder,
        state: &mut TranslationState,
        module: &mut JITModule,
        current_label: &str,
        instr: &Instruction,
    ) -> JitResult<()> {
        match instr {
            Instruction::Binary {
                op,
                result,
                ty,
                lhs,
                rhs,
            } => {
                let a = self.eval(builder, state, module, lhs, Some(*ty))?;
                let b = self.eval(builder, state, module, rhs, Some(*ty))?;
                let value = self.lower_binary(builder, *op, *ty, a, b)?;
                state.define(builder, result, value);
            }
            Instruction::Cmp {
                op,
                result,
                ty,
                lhs,
                rhs,
            } => {
                let a = self.eval(builder, state, module, lhs, Some(*ty))?;
                let b = self.eval(builder, state, module, rhs, Some(*ty))?;
                let value = if ty.is_float() {
                    builder.ins().fcmp(float_cc(*op), a, b)
                } else {
                    builder.ins().icmp(int_cc(*op, ty.is_signed()), a, b)
                };
                state.define(builder, result, value);
            }
            Instruction::ZeroExtend {
                result,
                source_type,
                target_type,
                value,
            } => {
                if source_type.is_float() || target_type.is_float() {
                    return Err(JitError::Unsupported(
                        "zext between float types".to_string(),
                    ));
                }
                let v = self.eval(builder, state, module, value, Some(*source_type))?;
                let from = clif_type(*source_type, self.isa);
                let to = clif_type(*target_type, self.isa);
                let widened = if to.bits() > from.bits() {
                    builder.ins().uextend(to, v)
                } else if to.bits() < from.bits() {
                    builder.ins().ireduce(to, v)
                } else {
                    v
                };
                state.define(builder, result, widened);
            }
            Instruction::Br {
                condition,
                true_label,
                false_label,
            } => {
                // Read the condition before phi variables get redefined for
                // the successors.
                let cond =
                    self.eval(builder, state, module, condition, Some(PrimitiveType::Bool))?;
                let mut assignments =
                    self.phi_inputs(builder, state, module, current_label, true_label)?;
                if false_label != true_label {
                    assignments.extend(self.phi_inputs(
                        builder,
                        state,
                        module,
                        current_label,
                        false_label,
                    )?);
                }
                apply_phi_assignments(builder, assignments);
                let then_block = state.blocks[true_label];
                let else_block = state.blocks[false_label];
                builder.ins().brif(cond, then_block, &[], else_block, &[]);
            }
            Instruction::Jmp { target_label } => {
                let assignments =
                    self.phi_inputs(builder, state, module, current_label, target_label)?;
                apply_phi_assignments(builder, assignments);
                let block = state.blocks[target_label];
                builder.ins().jump(block, &[]);
            }
            Instruction::Ret { value, .. } => match value {
                Some(v) => {
                    let expected = primitive_of(&self.func.signature.return_type);
                    let rv = self.eval(builder, state, module, v, expected)?;
                    builder.ins().return_(&[rv]);
                }
                None => {
                    builder.ins().return_(&[]);
                }
            },
            Instruction::Alloc {
                result,
                allocated_ty,
            } => {
                if state.promoted.contains_key(result) {
                    // Promoted to a variable; zero-filled at entry.
                    return Ok(());
                }
                let size = size_of_type(allocated_ty, self.snapshot).ok_or_else(|| {
                    JitError::Unsupported(format!("alloc of unsized type {}", allocated_ty))
                })?;
                let slot = builder.create_sized_stack_slot(StackSlotData::new(
                    StackSlotKind::ExplicitSlot,
                    size.max(1) as u32,
                    3, // 8-byte alignment covers every primitive
                ));
                let addr = builder.ins().stack_addr(self.isa.pointer_type(), slot, 0);
                state.define(builder, result, addr);
            }
            Instruction::Load { result, ty, ptr } => {
                let prim = primitive_of(ty).ok_or_else(|| {
                    JitError::Unsupported(format!("load of non-primitive type {}", ty))
                })?;
                if let Some(slot) = ptr.as_variable().filter(|s| state.promoted.contains_key(*s))
                {
                    let var = state.vars[slot];
                    let value = builder.use_var(var);
                    state.define(builder, result, value);
                } else {
                    let addr = self.eval(builder, state, module, ptr, Some(PrimitiveType::Ptr))?;
                    let value =
                        builder
                            .ins()
                            .load(clif_type(prim, self.isa), MemFlags::new(), addr, 0);
                    state.define(builder, result, value);
                }
            }
            Instruction::Store { ty, ptr, value } => {
                let prim = primitive_of(ty).ok_or_else(|| {
                    JitError::Unsupported(format!("store of non-primitive type {}", ty))
                })?;
                let v = self.eval(builder, state, module, value, Some(prim))?;
                if let Some(slot) = ptr.as_variable().filter(|s| state.promoted.contains_key(*s))
                {
                    let var = state.vars[slot];
                    builder.def_var(var, v);
                } else {
                    let addr = self.eval(builder, state, module, ptr, Some(PrimitiveType::Ptr))?;
                    builder.ins().store(MemFlags::new(), v, addr, 0);
                }
            }
            Instruction::GetFieldPtr {
                result,
                struct_ptr,
                field_index,
            } => {
                let base_name = struct_ptr.as_variable().ok_or_else(|| {
                    JitError::Unsupported("getfield.ptr on a non-variable pointer".to_string())
                })?;
                let pointee = state.alloca_pointee.get(base_name).ok_or_else(|| {
                    JitError::Unsupported(
                        "getfield.ptr on a pointer that is not a local allocation".to_string(),
                    )
                })?;
                let offset = field_offset(pointee, *field_index, self.snapshot).ok_or_else(
                    || {
                        JitError::Unsupported(format!(
                            "field {} out of range for {}",
                            field_index, pointee
                        ))
                    },
                )?;
                let base =
                    self.eval(builder, state, module, struct_ptr, Some(PrimitiveType::Ptr))?;
                let value = builder.ins().iadd_imm(base, offset as i64);
                state.define(builder, result, value);
            }
            Instruction::GetElemPtr {
                result,
                array_ptr,
                index,
                element_type,
            } => {
                let base =
                    self.eval(builder, state, module, array_ptr, Some(PrimitiveType::Ptr))?;
                let ptr_ty = self.isa.pointer_type();
                let idx = match index {
                    Value::Constant(lit) => {
                        let raw = lit.as_i64().ok_or_else(|| {
                            JitError::Unsupported("non-integer element index".to_string())
                        })?;
                        builder.ins().iconst(ptr_ty, raw)
                    }
                    other => {
                        let prim = state.type_of_value(other).unwrap_or(PrimitiveType::I64);
                        let raw = self.eval(builder, state, module, other, Some(prim))?;
                        let from = clif_type(prim, self.isa);
                        if from.bits() < ptr_ty.bits() {
                            if prim.is_signed() {
                                builder.ins().sextend(ptr_ty, raw)
                            } else {
                                builder.ins().uextend(ptr_ty, raw)
                            }
                        } else {
                            raw
                        }
                    }
                };
                let scaled = builder.ins().imul_imm(idx, element_type.byte_size() as i64);
                let value = builder.ins().iadd(base, scaled);
                state.define(builder, result, value);
            }
            Instruction::PtrToInt {
                result,
                ptr_value,
                target_type,
            } => {
                let v = self.eval(builder, state, module, ptr_value, Some(PrimitiveType::Ptr))?;
                let to = clif_type(*target_type, self.isa);
                let ptr_ty = self.isa.pointer_type();
                let value = if to.bits() < ptr_ty.bits() {
                    builder.ins().ireduce(to, v)
                } else {
                    v
                };
                state.define(builder, result, value);
            }
            Instruction::IntToPtr {
                result, int_value, ..
            } => {
                let prim = state.type_of_value(int_value).unwrap_or(PrimitiveType::I64);
                let v = self.eval(builder, state, module, int_value, Some(prim))?;
                let ptr_ty = self.isa.pointer_type();
                let from = clif_type(prim, self.isa);
                let value = if from.bits() < ptr_ty.bits() {
                    builder.ins().uextend(ptr_ty, v)
                } else {
                    v
                };
                state.define(builder, result, value);
            }
            Instruction::Call {
                result,
                func_name,
                args,
            } => {
                let callee = self.snapshot.get_function(func_name).ok_or_else(|| {
                    JitError::SymbolNotFound(func_name.clone())
                })?;
                let func_id = *self.func_ids.get(func_name).ok_or_else(|| {
                    JitError::Internal(format!("'{}' was never declared", func_name))
                })?;
                let func_ref = module.declare_func_in_func(func_id, builder.func);

                let mut lowered_args = Vec::with_capacity(args.len());
                for (arg, param) in args.iter().zip(&callee.signature.params) {
                    let expected = primitive_of(&param.ty);
                    lowered_args.push(self.eval(builder, state, module, arg, expected)?);
                }
                let call = builder.ins().call(func_ref, &lowered_args);
                if let Some(result) = result {
                    let values = builder.inst_results(call);
                    let value = *values.first().ok_or_else(|| {
                        JitError::Internal(format!(
                            "call to '{}' expected a result, got none",
                            func_name
                        ))
                    })?;
                    state.define(builder, result, value);
                }
            }
            Instruction::Phi { .. } => {
                // Handled by definitions placed in the predecessors.
            }
        }
        Ok(())
    }

    /// The phi variable assignments for the edge from the current block to
    /// `target`. Evaluated eagerly and applied as a batch afterwards: phis
    /// are parallel copies, and one phi's input may be another phi.
    fn phi_inputs(
        &self,
        builder: &mut FunctionBuilder,
        state: &mut TranslationState,
        module: &mut JITModule,
        current_label: &str,
        target: &str,
    ) -> JitResult<Vec<(Variable, cranelift_codegen::ir::Value)>> {
        let target_block = self
            .func
            .get_block(target)
            .ok_or_else(|| JitError::Internal(format!("missing block '{}'", target)))?;
        let mut assignments: Vec<(Variable, cranelift_codegen::ir::Value)> = Vec::new();
        for instr in &target_block.instructions {
            if let Instruction::Phi {
                result,
                ty,
                incoming,
            } = instr
            {
                if let Some((value, _)) = incoming.iter().find(|(_, l)| l == current_label) {
                    let expected = primitive_of(ty);
                    let v = self.eval(builder, state, module, value, expected)?;
                    assignments.push((state.vars[result], v));
                }
            }
        }
        Ok(assignments)
    }

    fn eval(
        &self,
        builder: &mut FunctionBuilder,
        state: &TranslationState,
        module: &mut JITModule,
        value: &Value,
        expected: Option<PrimitiveType>,
    ) -> JitResult<cranelift_codegen::ir::Value> {
        match value {
            Value::Global(name) => {
                let data_id = *self.data_ids.get(name).ok_or_else(|| {
                    JitError::SymbolNotFound(format!("@{}", name))
                })?;
                let gv = module.declare_data_in_func(data_id, builder.func);
                Ok(builder.ins().global_value(self.isa.pointer_type(), gv))
            }
            other => self.eval_no_module(builder, state, other, expected),
        }
    }

    fn eval_no_module(
        &self,
        builder: &mut FunctionBuilder,
        state: &TranslationState,
        value: &Value,
        expected: Option<PrimitiveType>,
    ) -> JitResult<cranelift_codegen::ir::Value> {
        match value {
            Value::Variable(name) => {
                let var = state.vars.get(name).ok_or_else(|| {
                    JitError::Internal(format!("no variable for '%{}'", name))
                })?;
                Ok(builder.use_var(*var))
            }
            Value::Constant(lit) => {
                let prim = expected.unwrap_or_else(|| lit.primitive_type());
                match (prim, lit) {
                    (PrimitiveType::F32, Literal::F32(v)) => Ok(builder.ins().f32const(*v)),
                    (PrimitiveType::F64, Literal::F64(v)) => Ok(builder.ins().f64const(*v)),
                    (PrimitiveType::F32, other) => {
                        let raw = other.as_i64().ok_or_else(|| bad_literal(prim, other))?;
                        Ok(builder.ins().f32const(raw as f32))
                    }
                    (PrimitiveType::F64, other) => {
                        let raw = other.as_i64().ok_or_else(|| bad_literal(prim, other))?;
                        Ok(builder.ins().f64const(raw as f64))
                    }
                    (_, other) => {
                        let raw = other.as_i64().ok_or_else(|| bad_literal(prim, other))?;
                        let ty = clif_type(prim, self.isa);
                        // iconst immediates must be the sign-extended image
                        // of the narrow value.
                        let raw = match ty.bits() {
                            8 => (raw as i8) as i64,
                            16 => (raw as i16) as i64,
                            32 => (raw as i32) as i64,
                            _ => raw,
                        };
                        Ok(builder.ins().iconst(ty, raw))
                    }
                }
            }
            Value::Global(name) => Err(JitError::Internal(format!(
                "global '@{}' in a context without module access",
                name
            ))),
        }
    }

    fn lower_binary(
        &self,
        builder: &mut FunctionBuilder,
        op: BinaryOp,
        ty: PrimitiveType,
        a: cranelift_codegen::ir::Value,
        b: cranelift_codegen::ir::Value,
    ) -> JitResult<cranelift_codegen::ir::Value> {
        if ty.is_float() {
            return match op {
                BinaryOp::Add => Ok(builder.ins().fadd(a, b)),
                BinaryOp::Sub => Ok(builder.ins().fsub(a, b)),
                BinaryOp::Mul => Ok(builder.ins().fmul(a, b)),
                BinaryOp::Div => Ok(builder.ins().fdiv(a, b)),
                other => Err(JitError::Unsupported(format!(
                    "float operation '{}.{}'",
                    other, ty
                ))),
            };
        }
        Ok(match op {
            BinaryOp::Add => builder.ins().iadd(a, b),
            BinaryOp::Sub => builder.ins().isub(a, b),
            BinaryOp::Mul => builder.ins().imul(a, b),
            BinaryOp::Div => {
                if ty.is_signed() {
                    builder.ins().sdiv(a, b)
                } else {
                    builder.ins().udiv(a, b)
                }
            }
            BinaryOp::Rem => {
                if ty.is_signed() {
                    builder.ins().srem(a, b)
                } else {
                    builder.ins().urem(a, b)
                }
            }
            BinaryOp::And => builder.ins().band(a, b),
            BinaryOp::Or => builder.ins().bor(a, b),
            BinaryOp::Xor => builder.ins().bxor(a, b),
            BinaryOp::Shl => builder.ins().ishl(a, b),
            BinaryOp::Shr => {
                if ty.is_signed() {
                    builder.ins().sshr(a, b)
                } else {
                    builder.ins().ushr(a, b)
                }
            }
        })
    }
}

fn apply_phi_assignments(
    builder: &mut FunctionBuilder,
    assignments: Vec<(Variable, cranelift_codegen::ir::Value)>,
) {
    for (var, value) in assignments {
        builder.def_var(var, value);
    }
}

fn bad_literal(prim: PrimitiveType, lit: &Literal) -> JitError {
    JitError::Unsupported(format!("literal {} not representable as {}", lit, prim))
}

fn int_cc(op: CmpOp, signed: bool) -> IntCC {
    match (op, signed) {
        (CmpOp::Eq, _) => IntCC::Equal,
        (CmpOp::Ne, _) => IntCC::NotEqual,
        (CmpOp::Gt, true) => IntCC::SignedGreaterThan,
        (CmpOp::Ge, true) => IntCC::SignedGreaterThanOrEqual,
        (CmpOp::Lt, true) => IntCC::SignedLessThan,
        (CmpOp::Le, true) => IntCC::SignedLessThanOrEqual,
        (CmpOp::Gt, false) => IntCC::UnsignedGreaterThan,
        (CmpOp::Ge, false) => IntCC::UnsignedGreaterThanOrEqual,
        (CmpOp::Lt, false) => IntCC::UnsignedLessThan,
        (CmpOp::Le, false) => IntCC::UnsignedLessThanOrEqual,
    }
}

fn float_cc(op: CmpOp) -> FloatCC {
    match op {
        CmpOp::Eq => FloatCC::Equal,
        CmpOp::Ne => FloatCC::NotEqual,
        CmpOp::Gt => FloatCC::GreaterThan,
        CmpOp::Ge => FloatCC::GreaterThanOrEqual,
        CmpOp::Lt => FloatCC::LessThan,
        CmpOp::Le => FloatCC::LessThanOrEqual,
    }
}

/// Flat size in bytes with natural alignment.
pub(crate) fn size_of_type(ty: &Type, module: &ir::Module) -> Option<usize> {
    match module.resolve_type(ty) {
        Type::Primitive(p) => Some(p.byte_size() as usize),
        Type::Array { element_type, size } => {
            Some(size_of_type(element_type, module)? * (*size as usize))
        }
        Type::Struct(fields) => {
            let mut offset = 0usize;
            let mut max_align = 1usize;
            for field in fields {
                let align = align_of_type(&field.ty, module)?;
                max_align = max_align.max(align);
                offset = round_up(offset, align) + size_of_type(&field.ty, module)?;
            }
            Some(round_up(offset, max_align))
        }
        Type::Named(_) | Type::Void => None,
    }
}

fn align_of_type(ty: &Type, module: &ir::Module) -> Option<usize> {
    match module.resolve_type(ty) {
        Type::Primitive(p) => Some(p.byte_size() as usize),
        Type::Array { element_type, .. } => align_of_type(element_type, module),
        Type::Struct(fields) => {
            let mut max_align = 1usize;
            for field in fields {
                max_align = max_align.max(align_of_type(&field.ty, module)?);
            }
            Some(max_align)
        }
        Type::Named(_) | Type::Void => None,
    }
}

fn field_offset(ty: &Type, field_index: usize, module: &ir::Module) -> Option<usize> {
    let Type::Struct(fields) = module.resolve_type(ty) else {
        return None;
    };
    let mut offset = 0usize;
    for (idx, field) in fields.iter().enumerate() {
        let align = align_of_type(&field.ty, module)?;
        offset = round_up(offset, align);
        if idx == field_index {
            return Some(offset);
        }
        offset += size_of_type(&field.ty, module)?;
    }
    None
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// Per-function lowering state: blocks, variables, promoted slots, and the
/// pointee types of local allocations.
struct TranslationState {
    blocks: HashMap<String, Block>,
    vars: HashMap<String, Variable>,
    /// Promoted slot name -> element type
    promoted: HashMap<String, PrimitiveType>,
    /// Alloc result -> allocated type (for field offsets)
    alloca_pointee: HashMap<String, Type>,
    types: HashMap<String, PrimitiveType>,
}

impl TranslationState {
    fn prepare(
        func: &Function,
        snapshot: &ir::Module,
        isa: &dyn TargetIsa,
        builder: &mut FunctionBuilder,
    ) -> JitResult<Self> {
        // Promoted slots hold their element value instead of an address.
        let mut promoted: HashMap<String, PrimitiveType> = HashMap::new();
        let mut alloca_pointee: HashMap<String, Type> = HashMap::new();
        let promotable = promotable_slots(func);
        for block in &func.blocks {
            for instr in &block.instructions {
                if let Instruction::Alloc {
                    result,
                    allocated_ty,
                } = instr
                {
                    alloca_pointee.insert(result.clone(), allocated_ty.clone());
                    if promotable.contains(result) {
                        if let Type::Primitive(p) = allocated_ty {
                            promoted.insert(result.clone(), *p);
                        }
                    }
                }
            }
        }

        let types = infer_types(func, snapshot, &promoted)?;

        let mut vars: HashMap<String, Variable> = HashMap::new();
        let mut next_var = 0u32;
        for param in &func.signature.params {
            let prim = primitive_of(&param.ty).ok_or_else(|| {
                JitError::Unsupported(format!("non-primitive parameter type {}", param.ty))
            })?;
            let var = Variable::from_u32(next_var);
            next_var += 1;
            builder.declare_var(var, clif_type(prim, isa));
            vars.insert(param.name.clone(), var);
        }
        for (name, prim) in &types {
            if !vars.contains_key(name) {
                let var = Variable::from_u32(next_var);
                next_var += 1;
                builder.declare_var(var, clif_type(*prim, isa));
                vars.insert(name.clone(), var);
            }
        }

        // Blocks, entry first.
        let mut blocks: HashMap<String, Block> = HashMap::new();
        for ir_block in &func.blocks {
            blocks.insert(ir_block.label.clone(), builder.create_block());
        }
        let entry = blocks[&func.blocks[0].label];
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        let params: Vec<cranelift_codegen::ir::Value> = builder.block_params(entry).to_vec();
        for (param, value) in func.signature.params.iter().zip(params) {
            builder.def_var(vars[&param.name], value);
        }
        // Promoted slots read as zero until stored, matching a
        // zero-initialized stack page rather than trapping.
        for (name, prim) in &promoted {
            let zero = match prim {
                PrimitiveType::F32 => builder.ins().f32const(0.0f32),
                PrimitiveType::F64 => builder.ins().f64const(0.0f64),
                other => builder.ins().iconst(clif_type(*other, isa), 0),
            };
            builder.def_var(vars[name], zero);
        }

        Ok(Self {
            blocks,
            vars,
            promoted,
            alloca_pointee,
            types,
        })
    }

    fn define(
        &mut self,
        builder: &mut FunctionBuilder,
        name: &str,
        value: cranelift_codegen::ir::Value,
    ) {
        if let Some(var) = self.vars.get(name) {
            builder.def_var(*var, value);
        }
    }

    fn type_of_value(&self, value: &Value) -> Option<PrimitiveType> {
        match value {
            Value::Variable(name) => self.types.get(name).copied(),
            Value::Constant(lit) => Some(lit.primitive_type()),
            Value::Global(_) => Some(PrimitiveType::Ptr),
        }
    }
}

/// Primitive result type of every defined name.
fn infer_types(
    func: &Function,
    snapshot: &ir::Module,
    promoted: &HashMap<String, PrimitiveType>,
) -> JitResult<HashMap<String, PrimitiveType>> {
    let mut types: HashMap<String, PrimitiveType> = HashMap::new();
    for param in &func.signature.params {
        if let Type::Primitive(p) = &param.ty {
            types.insert(param.name.clone(), *p);
        }
    }
    for block in &func.blocks {
        for instr in &block.instructions {
            let entry = match instr {
                Instruction::Binary { result, ty, .. } => Some((result, *ty)),
                Instruction::Cmp { result, .. } => Some((result, PrimitiveType::Bool)),
                Instruction::ZeroExtend {
                    result,
                    target_type,
                    ..
                } => Some((result, *target_type)),
                Instruction::Alloc { result, .. } => match promoted.get(result) {
                    Some(p) => Some((result, *p)),
                    None => Some((result, PrimitiveType::Ptr)),
                },
                Instruction::Load { result, ty, .. } => {
                    let prim = primitive_of(ty).ok_or_else(|| {
                        JitError::Unsupported(format!("load of non-primitive type {}", ty))
                    })?;
                    Some((result, prim))
                }
                Instruction::GetFieldPtr { result, .. }
                | Instruction::GetElemPtr { result, .. }
                | Instruction::IntToPtr { result, .. } => Some((result, PrimitiveType::Ptr)),
                Instruction::PtrToInt {
                    result,
                    target_type,
                    ..
                } => Some((result, *target_type)),
                Instruction::Call {
                    result: Some(result),
                    func_name,
                    ..
                } => {
                    let callee = snapshot.get_function(func_name).ok_or_else(|| {
                        JitError::SymbolNotFound(func_name.clone())
                    })?;
                    match &callee.signature.return_type {
                        Type::Void => None,
                        ty => {
                            let prim = primitive_of(ty).ok_or_else(|| {
                                JitError::Unsupported(format!(
                                    "call result of non-primitive type {}",
                                    ty
                                ))
                            })?;
                            Some((result, prim))
                        }
                    }
                }
                Instruction::Phi { result, ty, .. } => {
                    let prim = primitive_of(ty).ok_or_else(|| {
                        JitError::Unsupported(format!("phi of non-primitive type {}", ty))
                    })?;
                    Some((result, prim))
                }
                _ => None,
            };
            if let Some((name, prim)) = entry {
                types.insert(name.clone(), prim);
            }
        }
    }
    Ok(types)
}
