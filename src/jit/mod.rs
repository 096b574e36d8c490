//! JIT compilation of recast IR to native code.
//!
//! Built on Cranelift: one [`JitCompiler`] owns one `JITModule` for the life
//! of the engine. Each submission declares every symbol of the snapshot and
//! defines only the bodies that are not yet materialized, so later
//! submissions link against earlier code instead of re-emitting it.
//!
//! ```text
//! IR snapshot → FunctionTranslator → Cranelift IR → native code → address
//! ```

mod compiler;
mod lower;

pub use compiler::JitCompiler;

use thiserror::Error;

/// Errors that can occur during JIT compilation.
#[derive(Debug, Error)]
pub enum JitError {
    /// Cranelift reported a problem building or defining code
    #[error("Cranelift error: {0}")]
    Cranelift(String),

    /// The IR uses a construct the lowering does not cover
    #[error("Unsupported IR construct: {0}")]
    Unsupported(String),

    /// A symbol did not resolve after submission
    #[error("Symbol not found in JIT: {0}")]
    SymbolNotFound(String),

    /// The host has no usable native back-end
    #[error("Host machine is not supported: {0}")]
    HostUnsupported(String),

    /// Internal invariant violation
    #[error("Internal JIT error: {0}")]
    Internal(String),
}

/// Result type for JIT operations.
pub type JitResult<T> = Result<T, JitError>;
