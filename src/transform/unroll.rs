//! Full unrolling of small counted loops.
//!
//! Specialization turns trip counts into literals; this pass flattens the
//! resulting loops into straight-line code so folding and CSE can finish the
//! job. Only the canonical two-block shape is handled:
//!
//! ```text
//! header:  %i = phi.ty [init, pre], [%next, latch]   (+ other phis)
//!          %c = lt.ty %i, bound
//!          br %c, latch, exit
//! latch:   ...straight-line body...
//!          %next = add.ty %i, step
//!          jmp header
//! ```
//!
//! with literal `init`, `bound`, and positive literal `step`. Anything else
//! is left untouched. Headers hinted `!unroll.disable` or
//! `!unroll.runtime.disable` are skipped.

use std::collections::{HashMap, HashSet};

use super::licm::{find_loops, outside_predecessor, LoopInfo};
use super::{Transform, TransformCategory};
use crate::ir::{
    BinaryOp, CmpOp, Function, Instruction, Literal, LoopHint, PrimitiveType, Value,
};

const MAX_TRIP_COUNT: i128 = 64;
const MAX_UNROLLED_INSTRUCTIONS: i128 = 512;

#[derive(Default)]
pub struct LoopUnrolling;

impl Transform for LoopUnrolling {
    fn name(&self) -> &'static str {
        "loop_unrolling"
    }

    fn description(&self) -> &'static str {
        "Fully unrolls small counted loops with literal bounds"
    }

    fn category(&self) -> TransformCategory {
        TransformCategory::LoopOptimization
    }

    fn apply(&self, func: &mut Function) -> Result<bool, String> {
        let mut changed = false;
        // Re-discover loops after each rewrite; unrolling an inner loop can
        // expose the outer one.
        for _ in 0..4 {
            let loops = find_loops(func);
            let mut any = false;
            for loop_info in loops {
                if let Some(plan) = plan_unroll(func, &loop_info) {
                    execute_unroll(func, plan);
                    any = true;
                    break;
                }
            }
            if !any {
                break;
            }
            changed = true;
        }
        Ok(changed)
    }
}

struct UnrollPlan {
    header: String,
    latch: String,
    exit: String,
    trip_count: i128,
    iv_name: String,
    iv_ty: PrimitiveType,
    init: i128,
    step: i128,
    /// Other header phis: name -> (outside value, latch value)
    phis: Vec<(String, Value, Value)>,
    /// Names defined by latch instructions
    latch_defs: HashSet<String>,
}

fn plan_unroll(func: &Function, loop_info: &LoopInfo) -> Option<UnrollPlan> {
    if loop_info.blocks.len() != 2 || loop_info.header == loop_info.latch {
        return None;
    }
    let header = func.get_block(&loop_info.header)?;
    let latch = func.get_block(&loop_info.latch)?;

    if header
        .hints
        .iter()
        .any(|h| matches!(h, LoopHint::UnrollDisable | LoopHint::UnrollRuntimeDisable))
    {
        return None;
    }

    let pre = outside_predecessor(func, loop_info)?;

    // Header layout: phis, one cmp, one br.
    let n = header.instructions.len();
    if n < 2 {
        return None;
    }
    let (cmp_result, cmp_op, cmp_ty, cmp_lhs, bound) = match &header.instructions[n - 2] {
        Instruction::Cmp {
            op: op @ (CmpOp::Lt | CmpOp::Le),
            result,
            ty,
            lhs: Value::Variable(lhs),
            rhs: Value::Constant(rhs),
        } if ty.is_integer() => (result.clone(), *op, *ty, lhs.clone(), rhs.as_i64()?),
        _ => return None,
    };
    let exit_label = match &header.instructions[n - 1] {
        Instruction::Br {
            condition: Value::Variable(cond),
            true_label,
            false_label,
        } if *cond == cmp_result
            && *true_label == loop_info.latch
            && !loop_info.blocks.contains(false_label)
            && *false_label != pre =>
        {
            false_label.clone()
        }
        _ => return None,
    };

    // Latch: straight-line, ends jumping back to the header.
    match latch.instructions.last() {
        Some(Instruction::Jmp { target_label }) if *target_label == loop_info.header => {}
        _ => return None,
    }
    if latch.instructions[..latch.instructions.len() - 1]
        .iter()
        .any(|i| i.is_terminator() || matches!(i, Instruction::Phi { .. }))
    {
        return None;
    }

    // The header and latch must have no predecessors besides pre/header.
    for block in &func.blocks {
        for succ in block.successors() {
            if succ == loop_info.latch && block.label != loop_info.header {
                return None;
            }
            if succ == loop_info.header
                && block.label != pre
                && block.label != loop_info.latch
            {
                return None;
            }
        }
    }

    // Phis: two incoming each, from pre and latch.
    let mut iv: Option<(String, PrimitiveType, i128, Value)> = None;
    let mut phis: Vec<(String, Value, Value)> = Vec::new();
    for instr in &header.instructions[..n - 2] {
        let Instruction::Phi {
            result,
            ty,
            incoming,
        } = instr
        else {
            return None;
        };
        if incoming.len() != 2 {
            return None;
        }
        let from_pre = incoming.iter().find(|(_, l)| *l == pre)?;
        let from_latch = incoming.iter().find(|(_, l)| *l == loop_info.latch)?;

        if *result == cmp_lhs {
            let prim = match ty {
                crate::ir::Type::Primitive(p) if p.is_integer() => *p,
                _ => return None,
            };
            if prim != cmp_ty {
                return None;
            }
            let init = from_pre.0.as_literal()?.as_i64()? as i128;
            iv = Some((result.clone(), prim, init, from_latch.0.clone()));
        } else {
            phis.push((result.clone(), from_pre.0.clone(), from_latch.0.clone()));
        }
    }
    let (iv_name, iv_ty, init, iv_latch_value) = iv?;
    if init < 0 {
        return None;
    }

    // The induction step: %next = add.ty %i, step in the latch.
    let next_name = iv_latch_value.as_variable()?;
    let step = latch.instructions.iter().find_map(|instr| match instr {
        Instruction::Binary {
            op: BinaryOp::Add,
            result,
            ty,
            lhs: Value::Variable(lhs),
            rhs: Value::Constant(rhs),
        } if result == next_name && *lhs == iv_name && *ty == iv_ty => {
            rhs.as_i64().map(|s| s as i128)
        }
        _ => None,
    })?;
    if step <= 0 {
        return None;
    }

    let bound = bound as i128;
    let trip_count = match cmp_op {
        CmpOp::Lt => {
            if bound > init {
                (bound - init + step - 1) / step
            } else {
                0
            }
        }
        CmpOp::Le => {
            if bound >= init {
                (bound - init + step) / step
            } else {
                0
            }
        }
        _ => return None,
    };
    if trip_count > MAX_TRIP_COUNT
        || trip_count * (latch.instructions.len() as i128) > MAX_UNROLLED_INSTRUCTIONS
    {
        return None;
    }

    // Every name defined inside the loop that is used outside must be one we
    // can substitute with a final value: the IV or a header phi.
    let mut latch_defs: HashSet<String> = HashSet::new();
    for instr in &latch.instructions {
        if let Some(name) = instr.result_name() {
            latch_defs.insert(name.to_string());
        }
    }
    let mut cmp_uses = 0usize;
    let mut latch_value_escapes = false;
    for block in &func.blocks {
        let inside = loop_info.blocks.contains(&block.label);
        for instr in &block.instructions {
            instr.for_each_value(|v| {
                if let Some(name) = v.as_variable() {
                    if name == cmp_result {
                        cmp_uses += 1;
                    }
                    if !inside && latch_defs.contains(name) {
                        latch_value_escapes = true;
                    }
                }
            });
        }
    }
    if cmp_uses != 1 || latch_value_escapes {
        return None;
    }

    Some(UnrollPlan {
        header: loop_info.header.clone(),
        latch: loop_info.latch.clone(),
        exit: exit_label,
        trip_count,
        iv_name,
        iv_ty,
        init,
        step,
        phis,
        latch_defs,
    })
}

fn execute_unroll(func: &mut Function, plan: UnrollPlan) {
    let latch_index = func
        .blocks
        .iter()
        .position(|b| b.label == plan.latch)
        .expect("latch exists");
    let latch = func.blocks.remove(latch_index);
    let body = &latch.instructions[..latch.instructions.len() - 1];

    let iv_literal = |k: i128| -> Value {
        let raw = plan.init + k * plan.step;
        Value::Constant(Literal::from_i64(plan.iv_ty, raw as i64).expect("integer IV"))
    };

    // phi_values[p][k] = value of phi p during iteration k (and, at
    // k == trip_count, at loop exit).
    let mut phi_values: HashMap<String, Vec<Value>> = HashMap::new();
    for (name, from_pre, _) in &plan.phis {
        phi_values.insert(name.clone(), vec![from_pre.clone()]);
    }
    let resolve = |v: &Value, k: i128, phi_values: &HashMap<String, Vec<Value>>| -> Value {
        match v {
            Value::Variable(name) => {
                if *name == plan.iv_name {
                    iv_literal(k)
                } else if let Some(values) = phi_values.get(name) {
                    values[k as usize].clone()
                } else if plan.latch_defs.contains(name) {
                    Value::var(format!("{}_u{}", name, k))
                } else {
                    v.clone()
                }
            }
            _ => v.clone(),
        }
    };
    for k in 0..plan.trip_count {
        for (name, _, from_latch) in &plan.phis {
            let next = resolve(from_latch, k, &phi_values);
            phi_values.get_mut(name).expect("phi tracked").push(next);
        }
    }

    // Straight-line expansion in place of the header body.
    let mut unrolled: Vec<Instruction> = Vec::new();
    for k in 0..plan.trip_count {
        for instr in body {
            let mut cloned = instr.clone();
            if let Some(name) = cloned.result_name() {
                let renamed = format!("{}_u{}", name, k);
                rename_result(&mut cloned, renamed);
            }
            cloned.for_each_value_mut(|v| {
                *v = resolve(v, k, &phi_values);
            });
            unrolled.push(cloned);
        }
    }
    unrolled.push(Instruction::Jmp {
        target_label: plan.exit.clone(),
    });

    let header = func
        .get_block_mut(&plan.header)
        .expect("header exists");
    header.instructions = unrolled;
    header.hints.retain(|h| !matches!(h, LoopHint::UnrollCount(_)));

    // Values observed after the loop: the IV stopped at its final value,
    // other phis carry their last computed value. The cmp result is dead.
    let mut exit_subst: HashMap<String, Value> = HashMap::new();
    exit_subst.insert(plan.iv_name.clone(), iv_literal(plan.trip_count));
    for (name, _, _) in &plan.phis {
        exit_subst.insert(
            name.clone(),
            phi_values[name][plan.trip_count as usize].clone(),
        );
    }
    super::substitute_values(func, &exit_subst);

    // Exit phis that named the latch or header as predecessor: the edge into
    // the exit now comes from the header block only.
    for block in &mut func.blocks {
        for instr in &mut block.instructions {
            if let Instruction::Phi { incoming, .. } = instr {
                for (_, label) in incoming.iter_mut() {
                    if *label == plan.latch {
                        *label = plan.header.clone();
                    }
                }
            }
        }
    }
}

fn rename_result(instr: &mut Instruction, new_name: String) {
    match instr {
        Instruction::Binary { result, .. }
        | Instruction::Cmp { result, .. }
        | Instruction::ZeroExtend { result, .. }
        | Instruction::Alloc { result, .. }
        | Instruction::Load { result, .. }
        | Instruction::GetFieldPtr { result, .. }
        | Instruction::GetElemPtr { result, .. }
        | Instruction::PtrToInt { result, .. }
        | Instruction::IntToPtr { result, .. }
        | Instruction::Phi { result, .. } => *result = new_name,
        Instruction::Call { result, .. } => *result = Some(new_name),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn get(src: &str, name: &str) -> Function {
        parse_module(src).unwrap().get_function(name).unwrap().clone()
    }

    const SCALE_LOOP: &str = r#"
        fn @f(ptr %arr) -> void {
          entry:
            jmp header
          header:
            %i = phi.i32 [0, entry], [%next, body]
            %c = lt.i32 %i, 4
            br %c, body, exit
          body:
            %e = getelem.ptr %arr, %i, f32
            %v = load.f32 %e
            %v2 = mul.f32 %v, 2.0
            store.f32 %e, %v2
            %next = add.i32 %i, 1
            jmp header
          exit:
            ret.void
        }
    "#;

    #[test]
    fn test_full_unroll_of_counted_loop() {
        let mut func = get(SCALE_LOOP, "f");
        assert!(LoopUnrolling.apply(&mut func).unwrap());
        assert!(func.get_block("body").is_none());
        let header = func.get_block("header").unwrap();
        // 4 iterations x 5 body instructions + trailing jmp.
        assert_eq!(header.instructions.len(), 21);
        // No branches remain inside the unrolled block.
        assert!(header
            .instructions
            .iter()
            .all(|i| !matches!(i, Instruction::Br { .. } | Instruction::Phi { .. })));
        // First iteration indexes with the literal 0.
        match &header.instructions[0] {
            Instruction::GetElemPtr { index, .. } => {
                assert_eq!(index, &Value::Constant(Literal::I32(0)));
            }
            other => panic!("Expected getelem, got {:?}", other),
        }
    }

    #[test]
    fn test_unroll_disable_hint_respected() {
        let src = SCALE_LOOP.replace("header:", "header: !unroll.disable");
        let mut func = get(&src, "f");
        assert!(!LoopUnrolling.apply(&mut func).unwrap());
        assert!(func.get_block("body").is_some());
    }

    #[test]
    fn test_dynamic_bound_not_unrolled() {
        let src = SCALE_LOOP.replace("%c = lt.i32 %i, 4", "%c = lt.i32 %i, %n");
        let src = src.replace("fn @f(ptr %arr)", "fn @f(ptr %arr, i32 %n)");
        let mut func = get(&src, "f");
        assert!(!LoopUnrolling.apply(&mut func).unwrap());
    }

    #[test]
    fn test_zero_trip_loop_collapses() {
        let src = SCALE_LOOP.replace("%c = lt.i32 %i, 4", "%c = lt.i32 %i, 0");
        let mut func = get(&src, "f");
        assert!(LoopUnrolling.apply(&mut func).unwrap());
        let header = func.get_block("header").unwrap();
        assert_eq!(header.instructions.len(), 1);
        assert!(matches!(
            header.instructions[0],
            Instruction::Jmp { ref target_label } if target_label == "exit"
        ));
    }

    #[test]
    fn test_reduction_phi_final_value() {
        let mut func = get(
            r#"
            fn @f() -> i32 {
              entry:
                jmp header
              header:
                %i = phi.i32 [0, entry], [%next, body]
                %sum = phi.i32 [0, entry], [%sum2, body]
                %c = lt.i32 %i, 3
                br %c, body, exit
              body:
                %sum2 = add.i32 %sum, %i
                %next = add.i32 %i, 1
                jmp header
              exit:
                ret.i32 %sum
            }
        "#,
            "f",
        );
        assert!(LoopUnrolling.apply(&mut func).unwrap());
        // After folding, the function returns 0 + 0 + 1 + 2 = 3.
        crate::transform::ConstantFolding.apply(&mut func).unwrap();
        let exit = func.get_block("exit").unwrap();
        match exit.instructions.last().unwrap() {
            Instruction::Ret { value, .. } => {
                assert_eq!(value, &Some(Value::Constant(Literal::I32(3))));
            }
            other => panic!("Expected ret, got {:?}", other),
        }
    }

    #[test]
    fn test_trip_count_cap() {
        let src = SCALE_LOOP.replace("%c = lt.i32 %i, 4", "%c = lt.i32 %i, 100000");
        let mut func = get(&src, "f");
        assert!(!LoopUnrolling.apply(&mut func).unwrap());
    }
}
