//! IR transformation passes for specialization cleanup and optimization.
//!
//! Transforms operate on single functions and compose into pipelines. Each
//! transform implements the [`Transform`] trait; the engine runs the fixed
//! function pipeline from [`function_pipeline`] exactly once per function and
//! records completion in the function's `optimized` flag.

mod cfg;
mod constant_folding;
mod cse;
mod deadcode;
mod licm;
mod mem2reg;
pub mod sanity;
mod sccp;
mod sroa;
mod unroll;

pub use cfg::CfgSimplify;
pub use constant_folding::ConstantFolding;
pub use cse::EarlyCse;
pub use deadcode::DeadCodeElimination;
pub use licm::LoopInvariantCodeMotion;
pub use mem2reg::PromoteStackSlots;
pub use sccp::Sccp;
pub use sroa::ScalarReplacement;
pub use unroll::LoopUnrolling;

pub(crate) use mem2reg::promotable_slots;

use crate::ir::Function;

/// Trait for IR transformation passes.
pub trait Transform {
    /// Unique name for this transform
    fn name(&self) -> &'static str;

    /// Description of what this transform does
    fn description(&self) -> &'static str;

    /// Category of this transform
    fn category(&self) -> TransformCategory;

    /// Apply this transform to a function. Returns true if any changes were made.
    fn apply(&self, func: &mut Function) -> Result<bool, String>;
}

/// Categories of transformations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformCategory {
    DeadCodeElimination,
    ConstantFolding,
    ControlFlowOptimization,
    MemoryOptimization,
    LoopOptimization,
    CommonSubexpressionElimination,
}

/// Statistics about a pipeline run.
#[derive(Debug, Default)]
pub struct TransformStats {
    /// Number of transforms that were run
    pub transforms_run: usize,
    /// Number of transforms that made changes
    pub transforms_changed: usize,
}

/// A pipeline of transforms applied in order.
pub struct TransformPipeline {
    transforms: Vec<Box<dyn Transform>>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }

    pub fn add_transform<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn transform_names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Apply all transforms to a function, in order, single pass.
    pub fn apply_to_function(&self, func: &mut Function) -> Result<TransformStats, String> {
        const MAX_INSTRUCTIONS: usize = 100_000;
        if func.instruction_count() > MAX_INSTRUCTIONS {
            return Err(format!(
                "Function too large for transforms ({} instructions, max {})",
                func.instruction_count(),
                MAX_INSTRUCTIONS
            ));
        }

        let mut stats = TransformStats::default();
        for transform in &self.transforms {
            stats.transforms_run += 1;
            match transform.apply(func) {
                Ok(changed) => {
                    if changed {
                        stats.transforms_changed += 1;
                    }
                }
                Err(e) => {
                    return Err(format!("Transform '{}' failed: {}", transform.name(), e));
                }
            }
        }
        Ok(stats)
    }
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// The fixed per-function pipeline the engine runs on functions cleared for
/// optimization. Folding and CFG cleanup run a second time after unrolling so
/// the straightened iterations collapse.
pub fn function_pipeline() -> TransformPipeline {
    TransformPipeline::new()
        .add_transform(PromoteStackSlots)
        .add_transform(ConstantFolding)
        .add_transform(CfgSimplify)
        .add_transform(ScalarReplacement)
        .add_transform(EarlyCse)
        .add_transform(LoopInvariantCodeMotion)
        .add_transform(LoopUnrolling)
        .add_transform(Sccp)
        .add_transform(ConstantFolding)
        .add_transform(CfgSimplify)
        .add_transform(DeadCodeElimination)
}

/// Replace every use of mapped variables across the whole function,
/// resolving substitution chains. Shared by the folding-style passes.
pub(crate) fn substitute_values(
    func: &mut Function,
    subst: &std::collections::HashMap<String, crate::ir::Value>,
) -> bool {
    use crate::ir::Value;
    if subst.is_empty() {
        return false;
    }
    let resolve = |name: &str| -> Option<Value> {
        let mut current = subst.get(name)?.clone();
        let mut depth = 0;
        while let Value::Variable(next) = &current {
            match subst.get(next) {
                Some(v) if depth < 32 => {
                    current = v.clone();
                    depth += 1;
                }
                _ => break,
            }
        }
        Some(current)
    };

    let mut changed = false;
    for block in &mut func.blocks {
        for instr in &mut block.instructions {
            instr.for_each_value_mut(|v| {
                if let Value::Variable(name) = v {
                    if let Some(replacement) = resolve(name) {
                        *v = replacement;
                        changed = true;
                    }
                }
            });
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    #[test]
    fn test_pipeline_names() {
        let pipeline = function_pipeline();
        let names = pipeline.transform_names();
        assert_eq!(names.first(), Some(&"promote_stack_slots"));
        assert_eq!(names.last(), Some(&"dead_code_elimination"));
        assert_eq!(pipeline.len(), 11);
    }

    #[test]
    fn test_pipeline_on_trivial_function() {
        let module = parse_module(
            r#"
            fn @id(i32 %x) -> i32 {
              entry:
                ret.i32 %x
            }
        "#,
        )
        .unwrap();
        let mut func = module.get_function("id").unwrap().clone();
        let stats = function_pipeline().apply_to_function(&mut func).unwrap();
        assert_eq!(stats.transforms_run, 11);
    }

    #[test]
    fn test_pipeline_folds_specialized_branch() {
        // The shape left behind by binding a bool parameter: a branch on a
        // constant condition. The pipeline must fold it to a straight line.
        let module = parse_module(
            r#"
            fn @pick(i32 %x) -> i32 {
              entry:
                br true, yes, no
              yes:
                %a = add.i32 %x, 1
                ret.i32 %a
              no:
                %b = sub.i32 %x, 1
                ret.i32 %b
            }
        "#,
        )
        .unwrap();
        let mut func = module.get_function("pick").unwrap().clone();
        function_pipeline().apply_to_function(&mut func).unwrap();
        assert_eq!(func.blocks.len(), 1);
        assert!(func
            .blocks
            .iter()
            .all(|b| b.instructions.iter().all(|i| !matches!(
                i,
                crate::ir::Instruction::Br { .. }
            ))));
    }
}
