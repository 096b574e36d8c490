//! recast: runtime function specializer and JIT.
//!
//! Load a textual SSA IR module, bind named inputs of a function to integer
//! constants, and get back native code for the residual function:
//!
//! ```no_run
//! use recast::{Bindings, Engine};
//!
//! let mut engine = Engine::new();
//! let mut bindings = Bindings::new();
//! bindings.insert("N".to_string(), 64);
//!
//! let addr = engine
//!     .load_ir_file("kernels.rcir")
//!     .specialize_function("hot_loop(ptr, i32)", &bindings)
//!     .optimize()
//!     .compile_with("hot_loop(ptr, i32)", &bindings);
//!
//! let hot_loop: extern "C" fn(*mut f32) = unsafe { std::mem::transmute(addr) };
//! ```
//!
//! The pipeline: parse → resolve by demangled signature → inline callees →
//! clone with constants substituted → fold bound stack slots → normalize →
//! optimize → snapshot → JIT. See [`engine::Engine`] for the surface.

pub mod demangle;
pub mod engine;
pub mod error;
pub mod ir;
pub mod jit;
pub mod parser;
pub mod resolve;
pub mod specialize;
pub mod target;
pub mod transform;

pub use engine::{Engine, EngineConfig, VectorWidthPref};
pub use error::{RecastError, Result};
pub use ir::{Function, Module};
pub use parser::parse_module;
pub use specialize::Bindings;
pub use target::TargetProbe;
