//! Constant folding and algebraic simplification.
//!
//! Folds instructions whose operands are literals, applies identity rewrites
//! (`x + 0`, `x * 1`, shifts by zero), and collapses degenerate phis. Float
//! identities that are not exact under IEEE semantics run only on functions
//! annotated `@fast_math`.

use std::collections::{HashMap, HashSet};

use super::{substitute_values, Transform, TransformCategory};
use crate::ir::{
    BinaryOp, CmpOp, Function, FunctionAnnotation, Instruction, Literal, PrimitiveType, Value,
};

#[derive(Default)]
pub struct ConstantFolding;

impl Transform for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant_folding"
    }

    fn description(&self) -> &'static str {
        "Evaluates constant expressions and applies algebraic identities"
    }

    fn category(&self) -> TransformCategory {
        TransformCategory::ConstantFolding
    }

    fn apply(&self, func: &mut Function) -> Result<bool, String> {
        let fast_math = func.has_annotation(&FunctionAnnotation::FastMath);
        let mut changed = false;
        // Folding one instruction can make the next foldable; iterate with a
        // cap so a bug cannot spin forever.
        for _ in 0..8 {
            if !fold_round(func, fast_math) {
                break;
            }
            changed = true;
        }
        Ok(changed)
    }
}

fn fold_round(func: &mut Function, fast_math: bool) -> bool {
    let mut subst: HashMap<String, Value> = HashMap::new();
    let mut dead: HashSet<String> = HashSet::new();

    for block in &func.blocks {
        for instr in &block.instructions {
            match instr {
                Instruction::Binary {
                    op,
                    result,
                    ty,
                    lhs,
                    rhs,
                } => {
                    if let (Some(a), Some(b)) = (lhs.as_literal(), rhs.as_literal()) {
                        if let Some(folded) = fold_binary(*op, *ty, a, b) {
                            subst.insert(result.clone(), Value::Constant(folded));
                            dead.insert(result.clone());
                            continue;
                        }
                    }
                    if let Some(simplified) = simplify_identity(*op, *ty, lhs, rhs, fast_math) {
                        subst.insert(result.clone(), simplified);
                        dead.insert(result.clone());
                    }
                }
                Instruction::Cmp {
                    op,
                    result,
                    ty,
                    lhs,
                    rhs,
                } => {
                    if let (Some(a), Some(b)) = (lhs.as_literal(), rhs.as_literal()) {
                        if let Some(folded) = fold_cmp(*op, *ty, a, b) {
                            subst.insert(result.clone(), Value::Constant(Literal::Bool(folded)));
                            dead.insert(result.clone());
                        }
                    }
                }
                Instruction::ZeroExtend {
                    result,
                    source_type,
                    target_type,
                    value,
                } => {
                    if let Some(lit) = value.as_literal() {
                        if let Some(folded) = fold_zext(*source_type, *target_type, lit) {
                            subst.insert(result.clone(), Value::Constant(folded));
                            dead.insert(result.clone());
                        }
                    }
                }
                Instruction::Phi {
                    result, incoming, ..
                } => {
                    if incoming.len() == 1 {
                        subst.insert(result.clone(), incoming[0].0.clone());
                        dead.insert(result.clone());
                    } else if let Some(first) = incoming.first().and_then(|(v, _)| v.as_literal()) {
                        let all_same = incoming
                            .iter()
                            .all(|(v, _)| v.as_literal() == Some(first));
                        if all_same {
                            subst.insert(result.clone(), Value::Constant(*first));
                            dead.insert(result.clone());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    if subst.is_empty() {
        return false;
    }

    for block in &mut func.blocks {
        block
            .instructions
            .retain(|i| i.result_name().map_or(true, |r| !dead.contains(r)));
    }
    substitute_values(func, &subst);
    true
}

fn mask_for(ty: PrimitiveType) -> u64 {
    match ty.byte_size() {
        1 => 0xff,
        2 => 0xffff,
        4 => 0xffff_ffff,
        _ => u64::MAX,
    }
}

fn fold_binary(op: BinaryOp, ty: PrimitiveType, a: &Literal, b: &Literal) -> Option<Literal> {
    if ty.is_float() {
        return fold_float_binary(op, ty, a, b);
    }
    let (x, y) = (a.as_i64()?, b.as_i64()?);
    let bits = ty.byte_size() as u32 * 8;
    let result = match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::Div => {
            if y == 0 || (x == i64::MIN && y == -1) {
                return None;
            }
            if ty.is_signed() {
                x / y
            } else {
                let m = mask_for(ty);
                (((x as u64) & m) / ((y as u64) & m)) as i64
            }
        }
        BinaryOp::Rem => {
            if y == 0 || (x == i64::MIN && y == -1) {
                return None;
            }
            if ty.is_signed() {
                x % y
            } else {
                let m = mask_for(ty);
                (((x as u64) & m) % ((y as u64) & m)) as i64
            }
        }
        BinaryOp::And => x & y,
        BinaryOp::Or => x | y,
        BinaryOp::Xor => x ^ y,
        BinaryOp::Shl => x.wrapping_shl((y as u32) % bits),
        BinaryOp::Shr => {
            if ty.is_signed() {
                x.wrapping_shr((y as u32) % bits)
            } else {
                let m = mask_for(ty);
                (((x as u64) & m) >> ((y as u32) % bits)) as i64
            }
        }
    };
    Literal::from_i64(ty, result)
}

fn fold_float_binary(op: BinaryOp, ty: PrimitiveType, a: &Literal, b: &Literal) -> Option<Literal> {
    let (x, y) = match (a, b) {
        (Literal::F32(x), Literal::F32(y)) => (*x as f64, *y as f64),
        (Literal::F64(x), Literal::F64(y)) => (*x, *y),
        _ => return None,
    };
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        _ => return None,
    };
    Some(match ty {
        PrimitiveType::F32 => Literal::F32(result as f32),
        PrimitiveType::F64 => Literal::F64(result),
        _ => return None,
    })
}

/// Identity rewrites with one literal operand. Integer identities are always
/// exact; float ones can flip signed zeros or quiet NaNs, so they require
/// fast-math.
fn simplify_identity(
    op: BinaryOp,
    ty: PrimitiveType,
    lhs: &Value,
    rhs: &Value,
    fast_math: bool,
) -> Option<Value> {
    let rhs_int = rhs.as_literal().and_then(|l| l.as_i64());
    let lhs_int = lhs.as_literal().and_then(|l| l.as_i64());

    if ty.is_integer() || ty == PrimitiveType::Bool {
        match (op, lhs_int, rhs_int) {
            (BinaryOp::Add, Some(0), _) => return Some(rhs.clone()),
            (BinaryOp::Add, _, Some(0))
            | (BinaryOp::Sub, _, Some(0))
            | (BinaryOp::Shl, _, Some(0))
            | (BinaryOp::Shr, _, Some(0))
            | (BinaryOp::Or, _, Some(0))
            | (BinaryOp::Xor, _, Some(0))
            | (BinaryOp::Div, _, Some(1))
            | (BinaryOp::Mul, _, Some(1)) => return Some(lhs.clone()),
            (BinaryOp::Mul, Some(1), _) => return Some(rhs.clone()),
            (BinaryOp::Mul, _, Some(0)) | (BinaryOp::Mul, Some(0), _) | (BinaryOp::And, _, Some(0)) => {
                return Some(Value::Constant(Literal::from_i64(ty, 0)?));
            }
            _ => {}
        }
        return None;
    }

    if ty.is_float() && fast_math {
        let rhs_is = |v: f64| {
            matches!(rhs.as_literal(), Some(Literal::F32(x)) if *x as f64 == v)
                || matches!(rhs.as_literal(), Some(Literal::F64(x)) if *x == v)
        };
        match op {
            BinaryOp::Add | BinaryOp::Sub if rhs_is(0.0) => return Some(lhs.clone()),
            BinaryOp::Mul | BinaryOp::Div if rhs_is(1.0) => return Some(lhs.clone()),
            _ => {}
        }
    }
    None
}

fn fold_cmp(op: CmpOp, ty: PrimitiveType, a: &Literal, b: &Literal) -> Option<bool> {
    if ty.is_float() {
        let (x, y) = match (a, b) {
            (Literal::F32(x), Literal::F32(y)) => (*x as f64, *y as f64),
            (Literal::F64(x), Literal::F64(y)) => (*x, *y),
            _ => return None,
        };
        return Some(match op {
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
        });
    }
    let (x, y) = (a.as_i64()?, b.as_i64()?);
    if ty.is_signed() || ty == PrimitiveType::Bool {
        Some(match op {
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
        })
    } else {
        let m = mask_for(ty);
        let (x, y) = ((x as u64) & m, (y as u64) & m);
        Some(match op {
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
        })
    }
}

fn fold_zext(source: PrimitiveType, target: PrimitiveType, lit: &Literal) -> Option<Literal> {
    let v = lit.as_i64()?;
    let masked = (v as u64) & mask_for(source);
    Literal::from_i64(target, masked as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn get(src: &str, name: &str) -> Function {
        parse_module(src).unwrap().get_function(name).unwrap().clone()
    }

    #[test]
    fn test_fold_chain_to_ret_constant() {
        let mut func = get(
            r#"
            fn @f() -> i32 {
              entry:
                %a = add.i32 2, 3
                %b = mul.i32 %a, 4
                ret.i32 %b
            }
        "#,
            "f",
        );
        assert!(ConstantFolding.apply(&mut func).unwrap());
        assert_eq!(func.blocks[0].instructions.len(), 1);
        match &func.blocks[0].instructions[0] {
            Instruction::Ret { value, .. } => {
                assert_eq!(value, &Some(Value::Constant(Literal::I32(20))));
            }
            other => panic!("Expected ret, got {:?}", other),
        }
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let mut func = get(
            r#"
            fn @f() -> i32 {
              entry:
                %a = div.i32 100, 0
                ret.i32 %a
            }
        "#,
            "f",
        );
        assert!(!ConstantFolding.apply(&mut func).unwrap());
    }

    #[test]
    fn test_unsigned_division() {
        // -2 as u32 is 4294967294; half of that is 2147483647.
        let mut func = get(
            r#"
            fn @f() -> u32 {
              entry:
                %a = div.u32 -2, 2
                ret.u32 %a
            }
        "#,
            "f",
        );
        assert!(ConstantFolding.apply(&mut func).unwrap());
        match &func.blocks[0].instructions[0] {
            Instruction::Ret { value, .. } => {
                assert_eq!(value, &Some(Value::Constant(Literal::U32(2147483647))));
            }
            other => panic!("Expected ret, got {:?}", other),
        }
    }

    #[test]
    fn test_identity_add_zero() {
        let mut func = get(
            r#"
            fn @f(i32 %x) -> i32 {
              entry:
                %a = add.i32 %x, 0
                ret.i32 %a
            }
        "#,
            "f",
        );
        assert!(ConstantFolding.apply(&mut func).unwrap());
        match &func.blocks[0].instructions[0] {
            Instruction::Ret { value, .. } => {
                assert_eq!(value, &Some(Value::var("x")));
            }
            other => panic!("Expected ret, got {:?}", other),
        }
    }

    #[test]
    fn test_float_identity_requires_fast_math() {
        let src = r#"
            fn @f(f32 %x) -> f32 {
              entry:
                %a = add.f32 %x, 0.0
                ret.f32 %a
            }
        "#;
        let mut func = get(src, "f");
        assert!(!ConstantFolding.apply(&mut func).unwrap());

        let mut func = get(src, "f");
        func.annotations.push(FunctionAnnotation::FastMath);
        assert!(ConstantFolding.apply(&mut func).unwrap());
    }

    #[test]
    fn test_cmp_folds_unsigned() {
        let mut func = get(
            r#"
            fn @f() -> bool {
              entry:
                %c = gt.u8 200, 100
                ret.bool %c
            }
        "#,
            "f",
        );
        assert!(ConstantFolding.apply(&mut func).unwrap());
        match &func.blocks[0].instructions[0] {
            Instruction::Ret { value, .. } => {
                assert_eq!(value, &Some(Value::Constant(Literal::Bool(true))));
            }
            other => panic!("Expected ret, got {:?}", other),
        }
    }

    #[test]
    fn test_zext_folds_wraparound() {
        let mut func = get(
            r#"
            fn @f() -> i64 {
              entry:
                %w = zext.i8.i64 -1
                ret.i64 %w
            }
        "#,
            "f",
        );
        assert!(ConstantFolding.apply(&mut func).unwrap());
        match &func.blocks[0].instructions[0] {
            Instruction::Ret { value, .. } => {
                assert_eq!(value, &Some(Value::Constant(Literal::I64(255))));
            }
            other => panic!("Expected ret, got {:?}", other),
        }
    }
}
