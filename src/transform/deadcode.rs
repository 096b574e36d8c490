//! Dead code elimination.
//!
//! Removes pure instructions whose results are never used. SSA names are
//! function-scoped, so a use-count over the whole function is an exact
//! liveness test for straight values; memory and control instructions are
//! never removed.

use std::collections::HashSet;

use super::{Transform, TransformCategory};
use crate::ir::Function;

#[derive(Default)]
pub struct DeadCodeElimination;

impl Transform for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead_code_elimination"
    }

    fn description(&self) -> &'static str {
        "Removes pure instructions whose results are never used"
    }

    fn category(&self) -> TransformCategory {
        TransformCategory::DeadCodeElimination
    }

    fn apply(&self, func: &mut Function) -> Result<bool, String> {
        let mut changed = false;
        // Removing one dead instruction can kill the uses feeding it.
        loop {
            let mut used: HashSet<String> = HashSet::new();
            for block in &func.blocks {
                for instr in &block.instructions {
                    instr.for_each_value(|v| {
                        if let Some(name) = v.as_variable() {
                            used.insert(name.to_string());
                        }
                    });
                }
            }

            let mut removed = false;
            for block in &mut func.blocks {
                let before = block.instructions.len();
                block.instructions.retain(|instr| {
                    if instr.is_terminator() || instr.has_side_effects() {
                        return true;
                    }
                    match instr.result_name() {
                        Some(result) => used.contains(result),
                        None => true,
                    }
                });
                if block.instructions.len() != before {
                    removed = true;
                }
            }

            if !removed {
                break;
            }
            changed = true;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Instruction;
    use crate::parser::parse_module;

    fn get(src: &str, name: &str) -> Function {
        parse_module(src).unwrap().get_function(name).unwrap().clone()
    }

    #[test]
    fn test_dead_chain_removed() {
        let mut func = get(
            r#"
            fn @f(i32 %x) -> i32 {
              entry:
                %a = add.i32 %x, 1
                %b = mul.i32 %a, 2
                %live = add.i32 %x, 10
                ret.i32 %live
            }
        "#,
            "f",
        );
        assert!(DeadCodeElimination.apply(&mut func).unwrap());
        // %b dies first, then %a.
        assert_eq!(func.blocks[0].instructions.len(), 2);
    }

    #[test]
    fn test_store_kept() {
        let mut func = get(
            r#"
            fn @f(ptr %p) -> void {
              entry:
                store.i32 %p, 42
                ret.void
            }
        "#,
            "f",
        );
        assert!(!DeadCodeElimination.apply(&mut func).unwrap());
        assert!(matches!(
            func.blocks[0].instructions[0],
            Instruction::Store { .. }
        ));
    }

    #[test]
    fn test_call_kept_even_if_result_unused() {
        let mut func = get(
            r#"
            fn @helper() -> i32 {
              entry:
                ret.i32 1
            }

            fn @f() -> void {
              entry:
                %r = call @helper()
                ret.void
            }
        "#,
            "f",
        );
        assert!(!DeadCodeElimination.apply(&mut func).unwrap());
        assert_eq!(func.blocks[0].instructions.len(), 2);
    }

    #[test]
    fn test_nothing_dead() {
        let mut func = get(
            r#"
            fn @f(i32 %x) -> i32 {
              entry:
                %a = add.i32 %x, 1
                ret.i32 %a
            }
        "#,
            "f",
        );
        assert!(!DeadCodeElimination.apply(&mut func).unwrap());
    }
}
