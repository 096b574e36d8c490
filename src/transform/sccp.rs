//! Conditional constant propagation over the CFG.
//!
//! Branches whose condition folded to a literal become unconditional jumps;
//! the blocks that became unreachable are dropped and phis are pruned to the
//! surviving predecessors. Runs after specialization has injected constants,
//! so this is the pass that deletes the untaken arm of a bound boolean.

use super::cfg::remove_unreachable;
use super::{Transform, TransformCategory};
use crate::ir::{Function, Instruction, Literal, Value};

#[derive(Default)]
pub struct Sccp;

impl Transform for Sccp {
    fn name(&self) -> &'static str {
        "sccp"
    }

    fn description(&self) -> &'static str {
        "Folds constant branches and removes the code they unreached"
    }

    fn category(&self) -> TransformCategory {
        TransformCategory::ControlFlowOptimization
    }

    fn apply(&self, func: &mut Function) -> Result<bool, String> {
        let mut changed = false;
        for _ in 0..16 {
            let mut round = false;
            for block in &mut func.blocks {
                if let Some(last) = block.instructions.last_mut() {
                    if let Instruction::Br {
                        condition: Value::Constant(lit),
                        true_label,
                        false_label,
                    } = last
                    {
                        let taken = match lit {
                            Literal::Bool(b) => *b,
                            other => other.as_i64().map(|v| v != 0).unwrap_or(true),
                        };
                        let target = if taken {
                            true_label.clone()
                        } else {
                            false_label.clone()
                        };
                        *last = Instruction::Jmp {
                            target_label: target,
                        };
                        round = true;
                    }
                }
            }
            if round {
                remove_unreachable(func);
                changed = true;
            } else {
                break;
            }
        }
        Ok(changed)
    }
}
