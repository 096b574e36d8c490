//! Function, basic block, annotation, and loop hint definitions.

use std::fmt;

use super::instruction::Instruction;
use super::types::Type;

/// Function annotations.
///
/// `NoOpt` is the do-not-optimize marker the loader installs on every defined
/// function; the specializer clears it on clones. Target attributes carry the
/// probed CPU, feature set, and vector width. `FastMath` permits
/// value-changing floating point rewrites and is only ever asserted on the
/// JIT snapshot, never on the engine-owned module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionAnnotation {
    Inline,
    Export,
    NoInline,
    Cold,
    NoOpt,
    OptSize,
    MinSize,
    FastMath,
    TargetCpu(String),
    TargetFeatures(String),
    VectorWidth(u32),
}

/// Per-block loop hints.
///
/// Hints attach to a loop's header block. The ahead-of-time producer emits
/// `UnrollDisable`/`UnrollRuntimeDisable` conservatively; the normalizer
/// strips exactly those two before optimization and preserves the rest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LoopHint {
    UnrollDisable,
    UnrollRuntimeDisable,
    UnrollCount(u32),
    VectorizeEnable,
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionParameter {
    pub name: String,
    pub ty: Type,
}

/// The signature of a function (parameters and return type).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    pub params: Vec<FunctionParameter>,
    pub return_type: Type,
}

/// A basic block within a function.
///
/// The last instruction must be a terminator (`br`, `jmp`, `ret`).
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub label: String,
    pub hints: Vec<LoopHint>,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        BasicBlock {
            label: label.into(),
            hints: Vec::new(),
            instructions: Vec::new(),
        }
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }

    /// Labels this block transfers control to.
    pub fn successors(&self) -> Vec<&str> {
        match self.instructions.last() {
            Some(Instruction::Jmp { target_label }) => vec![target_label.as_str()],
            Some(Instruction::Br {
                true_label,
                false_label,
                ..
            }) => vec![true_label.as_str(), false_label.as_str()],
            _ => vec![],
        }
    }
}

/// A function definition or declaration.
///
/// `name` is the stable mangled symbol used for module lookup and JIT keys.
/// A function with no blocks is a declaration: its body lives in an earlier
/// JIT materialization (or outside the module entirely) and the linker binds
/// references to it by symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub signature: FunctionSignature,
    pub annotations: Vec<FunctionAnnotation>,
    /// Blocks in layout order; the first block is the entry.
    pub blocks: Vec<BasicBlock>,
    /// Set once the per-function pipeline has run. Not part of the textual
    /// form; a reparsed module starts over.
    pub optimized: bool,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn has_annotation(&self, ann: &FunctionAnnotation) -> bool {
        self.annotations.contains(ann)
    }

    pub fn remove_annotation(&mut self, ann: &FunctionAnnotation) {
        self.annotations.retain(|a| a != ann);
    }

    pub fn get_block(&self, label: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn get_block_mut(&mut self, label: &str) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.label == label)
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    /// The demangled signature rendered from the IR, e.g. `square(i32)`.
    ///
    /// Used when the symbol does not demangle; mangled symbols take their
    /// demangled form from the symbol itself so that overloads keep distinct
    /// renderings even if their IR signatures were to drift.
    pub fn rendered_signature(&self) -> String {
        let params: Vec<String> = self
            .signature
            .params
            .iter()
            .map(|p| p.ty.to_string())
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

// --- Display implementations ---

impl fmt::Display for FunctionAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionAnnotation::Inline => write!(f, "@inline"),
            FunctionAnnotation::Export => write!(f, "@export"),
            FunctionAnnotation::NoInline => write!(f, "@noinline"),
            FunctionAnnotation::Cold => write!(f, "@cold"),
            FunctionAnnotation::NoOpt => write!(f, "@noopt"),
            FunctionAnnotation::OptSize => write!(f, "@optsize"),
            FunctionAnnotation::MinSize => write!(f, "@minsize"),
            FunctionAnnotation::FastMath => write!(f, "@fast_math"),
            FunctionAnnotation::TargetCpu(cpu) => write!(f, "@target_cpu({})", cpu),
            FunctionAnnotation::TargetFeatures(feats) => write!(f, "@target_features({})", feats),
            FunctionAnnotation::VectorWidth(bits) => write!(f, "@vector_width({})", bits),
        }
    }
}

impl fmt::Display for LoopHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopHint::UnrollDisable => write!(f, "!unroll.disable"),
            LoopHint::UnrollRuntimeDisable => write!(f, "!unroll.runtime.disable"),
            LoopHint::UnrollCount(n) => write!(f, "!unroll.count({})", n),
            LoopHint::VectorizeEnable => write!(f, "!vectorize.enable"),
        }
    }
}

impl fmt::Display for FunctionParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} %{}", self.ty, self.name)
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            write!(f, "{}", param)?;
            if i < self.params.len() - 1 {
                write!(f, ", ")?;
            }
        }
        write!(f, ") -> {}", self.return_type)
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.label)?;
        for hint in &self.hints {
            write!(f, " {}", hint)?;
        }
        writeln!(f)?;
        for instr in &self.instructions {
            writeln!(f, "  {}", instr)?;
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for annotation in &self.annotations {
            writeln!(f, "{}", annotation)?;
        }
        if self.is_declaration() {
            return writeln!(f, "decl @{}{}", self.name, self.signature);
        }
        writeln!(f, "fn @{}{} {{", self.name, self.signature)?;
        for block in &self.blocks {
            write!(f, "{}", block)?;
        }
        writeln!(f, "}}")
    }
}
