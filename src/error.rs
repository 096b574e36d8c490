//! Error types for the recast engine.
//!
//! This module defines the error types used throughout the specialization
//! pipeline, from IR parsing through JIT materialization.

use crate::jit::JitError;
use std::error::Error;
use std::fmt;

/// Main error type for the recast engine.
///
/// Every failing operation reports one of these; the engine recovers locally
/// and stays usable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecastError {
    /// Errors encountered during IR parsing.
    ParsingError(String),
    /// No function matched a demangled-signature query.
    NotFound(String),
    /// A binding key matched neither a parameter nor a foldable stack slot.
    UnsupportedBinding(String),
    /// The module failed structural verification.
    VerifierError(String),
    /// Errors during JIT lowering, submission, or symbol lookup.
    JitError(String),
    /// I/O errors when reading IR files.
    IoError(String),
    /// Internal errors indicating bugs in the engine.
    InternalError(String),
}

impl fmt::Display for RecastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecastError::ParsingError(msg) => write!(f, "Parsing Error: {}", msg),
            RecastError::NotFound(msg) => write!(f, "Function not found: {}", msg),
            RecastError::UnsupportedBinding(msg) => write!(f, "Unsupported binding: {}", msg),
            RecastError::VerifierError(msg) => write!(f, "Verifier Error: {}", msg),
            RecastError::JitError(msg) => write!(f, "JIT Error: {}", msg),
            RecastError::IoError(msg) => write!(f, "IO Error: {}", msg),
            RecastError::InternalError(msg) => write!(f, "Internal Error: {}", msg),
        }
    }
}

impl Error for RecastError {}

impl From<std::io::Error> for RecastError {
    fn from(err: std::io::Error) -> Self {
        RecastError::IoError(err.to_string())
    }
}

impl From<JitError> for RecastError {
    fn from(err: JitError) -> Self {
        RecastError::JitError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecastError>;
