//! The specialization engine.
//!
//! One `Engine` owns one IR module and one JIT session. The surface is a
//! fluent builder: loads, specializations, and optimization chain; `compile`
//! returns a raw address. Every failure is reported on standard error and
//! recovered: a failed call leaves the engine usable.
//!
//! Each compile snapshots the module through its textual form into a fresh
//! owned copy, demotes functions the JIT already holds to declarations, and
//! submits the rest. Materialized symbols keep their address for the life of
//! the engine.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::ir::{FunctionAnnotation, Module};
use crate::jit::JitCompiler;
use crate::parser::parse_module;
use crate::resolve;
use crate::specialize::{self, Bindings};
use crate::target::TargetProbe;
use crate::transform::{function_pipeline, sanity};

/// Vector width preference: follow the probe or force a width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorWidthPref {
    #[default]
    Auto,
    Bits(u32),
}

/// Engine configuration.
///
/// `fast_math` permits value-changing floating point rewrites on the JIT
/// snapshot; the engine-owned module is never touched by it. Defaults match
/// the historical behavior: fast-math on, probed vector width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub fast_math: bool,
    pub vector_width: VectorWidthPref,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fast_math: true,
            vector_width: VectorWidthPref::Auto,
        }
    }
}

/// Runtime function specializer and JIT.
pub struct Engine {
    target: TargetProbe,
    config: EngineConfig,
    module: Option<Module>,
    jit: Option<JitCompiler>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let mut target = TargetProbe::probe();
        if let VectorWidthPref::Bits(bits) = config.vector_width {
            target.max_vector_width = bits;
        }
        debug!(
            triple = %target.triple,
            width = target.max_vector_width,
            "engine constructed"
        );
        Self {
            target,
            config,
            module: None,
            jit: None,
        }
    }

    /// Replace the current module with IR parsed from a file.
    pub fn load_ir_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => self.install_source("load_ir_file", &text),
            Err(e) => {
                self.module = None;
                eprintln!("load_ir_file: failed to read '{}': {}", path.display(), e);
            }
        }
        self
    }

    /// Replace the current module with IR parsed from a string.
    pub fn load_ir_string(&mut self, text: &str) -> &mut Self {
        self.install_source("load_ir_string", text);
        self
    }

    fn install_source(&mut self, operation: &str, text: &str) {
        match parse_module(text) {
            Ok(mut module) => {
                // The input is an ahead-of-time build's output; hold every
                // function back from optimization until it is picked as a
                // specialization target.
                let width = self.target.max_vector_width;
                module.for_each_function_mut(|func| {
                    if func.is_declaration() {
                        return;
                    }
                    if !func.has_annotation(&FunctionAnnotation::NoOpt) {
                        func.annotations.push(FunctionAnnotation::NoOpt);
                    }
                    func.annotations
                        .retain(|a| !matches!(a, FunctionAnnotation::VectorWidth(_)));
                    func.annotations
                        .push(FunctionAnnotation::VectorWidth(width));
                });
                debug!(functions = module.function_count(), "module loaded");
                self.module = Some(module);
            }
            Err(e) => {
                self.module = None;
                eprintln!("{}: {}", operation, e);
            }
        }
    }

    /// Produce a specialized clone of `name` with `bindings` baked in.
    pub fn specialize_function(&mut self, name: &str, bindings: &Bindings) -> &mut Self {
        let Some(module) = self.module.as_mut() else {
            eprintln!("specialize_function: no module loaded");
            return self;
        };
        let Some(symbol) = resolve::find_function(module, name).map(|f| f.name.clone()) else {
            eprintln!("specialize_function: function not found: {}", name);
            return self;
        };
        match specialize::specialize_in_module(module, &symbol, bindings, &self.target) {
            Ok(outcome) => {
                if !outcome.already_present {
                    println!(
                        "Created: {} (params: {} -> {})",
                        outcome.name, outcome.original_params, outcome.residual_params
                    );
                }
            }
            Err(e) => eprintln!("specialize_function: {}", e),
        }
        self
    }

    /// Run the function pipeline over every function cleared for
    /// optimization that has not been optimized yet. Idempotent.
    pub fn optimize(&mut self) -> &mut Self {
        let Some(module) = self.module.as_mut() else {
            return self;
        };
        let pipeline = function_pipeline();
        for name in module.function_names() {
            let Some(func) = module.get_function_mut(&name) else {
                continue;
            };
            if func.is_declaration()
                || func.optimized
                || func.has_annotation(&FunctionAnnotation::NoOpt)
            {
                continue;
            }
            match pipeline.apply_to_function(func) {
                Ok(stats) => {
                    func.optimized = true;
                    debug!(
                        function = %name,
                        changed = stats.transforms_changed,
                        "optimized"
                    );
                }
                Err(e) => eprintln!("optimize: {}: {}", name, e),
            }
        }
        self
    }

    /// JIT the named function and return its address, or 0 on failure.
    pub fn compile(&mut self, name: &str) -> usize {
        let Some(module) = self.module.as_ref() else {
            eprintln!("compile: no module loaded");
            return 0;
        };
        let Some(symbol) = resolve::find_function(module, name).map(|f| f.name.clone()) else {
            eprintln!("compile: function not found: {}", name);
            return 0;
        };
        let snapshot_text = module.to_string();

        if self.jit.is_none() {
            match JitCompiler::new() {
                Ok(jit) => self.jit = Some(jit),
                Err(e) => {
                    eprintln!("compile: {}", e);
                    return 0;
                }
            }
        }
        let jit = self.jit.as_mut().expect("session initialized above");

        if let Some(addr) = jit.address_of(&symbol) {
            return addr;
        }

        // Isolate the JIT's copy from later module mutations.
        let mut snapshot = match parse_module(&snapshot_text) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                eprintln!("compile: snapshot reparse failed: {}", e);
                return 0;
            }
        };

        // Functions the session already holds become declarations so the
        // linker binds references to the resident code.
        for other in snapshot.function_names() {
            if other != symbol && jit.is_materialized(&other) {
                if let Some(func) = snapshot.get_function_mut(&other) {
                    func.blocks.clear();
                }
            }
        }

        if let Err(e) = sanity::verify_module(&snapshot) {
            eprintln!("compile: {}", e);
            return 0;
        }

        // Final codegen-scope pass over the isolated copy; fast-math is
        // asserted only here.
        let pipeline = function_pipeline();
        for other in snapshot.function_names() {
            let Some(func) = snapshot.get_function_mut(&other) else {
                continue;
            };
            if func.is_declaration() || func.has_annotation(&FunctionAnnotation::NoOpt) {
                continue;
            }
            if self.config.fast_math && !func.has_annotation(&FunctionAnnotation::FastMath) {
                func.annotations.push(FunctionAnnotation::FastMath);
            }
            if let Err(e) = pipeline.apply_to_function(func) {
                eprintln!("compile: {}: {}", other, e);
                return 0;
            }
            func.optimized = true;
        }

        match jit.add_module(&snapshot) {
            Ok(defined) => debug!(?defined, "snapshot submitted"),
            Err(e) => {
                eprintln!("compile: {}", e);
                return 0;
            }
        }

        match jit.address_of(&symbol) {
            Some(addr) => addr,
            None => {
                eprintln!("compile: symbol lookup failed: {}", symbol);
                0
            }
        }
    }

    /// Ensure the specialization exists, then JIT it. The returned address's
    /// signature is the residual parameter list in original order.
    pub fn compile_with(&mut self, name: &str, bindings: &Bindings) -> usize {
        let Some(module) = self.module.as_ref() else {
            eprintln!("compile: no module loaded");
            return 0;
        };
        let Some(source) = resolve::find_function(module, name) else {
            eprintln!("compile: function not found: {}", name);
            return 0;
        };
        let demangled = resolve::demangled_signature(source);
        let specialized = specialize::specialized_name(&demangled, bindings);

        if !module.contains_function(&specialized) {
            self.specialize_function(name, bindings);
            self.optimize();
        }
        self.compile(&specialized)
    }

    /// Typed variant of [`Self::compile`].
    ///
    /// # Safety
    /// `F` must be a function pointer type matching the compiled function's
    /// residual signature and calling convention.
    pub unsafe fn compile_as<F: Copy>(&mut self, name: &str) -> Option<F> {
        let addr = self.compile(name);
        if addr == 0 {
            return None;
        }
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        Some(unsafe { std::mem::transmute_copy::<usize, F>(&addr) })
    }

    /// Typed variant of [`Self::compile_with`].
    ///
    /// # Safety
    /// As [`Self::compile_as`].
    pub unsafe fn compile_with_as<F: Copy>(&mut self, name: &str, bindings: &Bindings) -> Option<F> {
        let addr = self.compile_with(name, bindings);
        if addr == 0 {
            return None;
        }
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        Some(unsafe { std::mem::transmute_copy::<usize, F>(&addr) })
    }

    /// Print the current module's textual IR to standard output.
    pub fn print_module_ir(&mut self) -> &mut Self {
        match &self.module {
            Some(module) => print!("{}", module),
            None => eprintln!("print_module_ir: no module loaded"),
        }
        self
    }

    /// Print demangled/mangled names and parameter names for every defined
    /// function.
    pub fn print_debug_info(&mut self) -> &mut Self {
        let Some(module) = self.module.as_ref() else {
            eprintln!("print_debug_info: no module loaded");
            return self;
        };
        for func in module.functions() {
            if func.is_declaration() {
                continue;
            }
            println!("\nFunction: {}", resolve::demangled_signature(func));
            println!("  Mangled: {}", func.name);
            let params: Vec<&str> = func
                .signature
                .params
                .iter()
                .map(|p| p.name.as_str())
                .collect();
            println!("  Params: {}", params.join(", "));
        }
        self
    }

    /// The probed target, as the engine sees it.
    pub fn target(&self) -> &TargetProbe {
        &self.target
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
