//! # Recast Intermediate Representation (IR)
//!
//! The textual SSA dialect the engine consumes and rewrites. A module holds
//! type declarations, global declarations, and functions; a function holds an
//! ordered list of basic blocks; each block ends with a terminator.
//!
//! The IR round-trips through its `Display` implementations: printing a
//! module and reparsing the text yields an equivalent module. The JIT
//! snapshot path relies on this.

pub mod function;
pub mod instruction;
pub mod module;
pub mod types;

pub use function::{
    BasicBlock, Function, FunctionAnnotation, FunctionParameter, FunctionSignature, LoopHint,
};
pub use instruction::{BinaryOp, CmpOp, Instruction};
pub use module::{GlobalDeclaration, Module, TypeDeclaration};
pub use types::{Literal, PrimitiveType, StructField, Type, Value};
