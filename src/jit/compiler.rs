//! The JIT session.
//!
//! Owns the Cranelift `JITModule` and the record of which symbols are
//! already resident. Symbols the snapshot re-declares resolve against the
//! earlier materialization; unresolved references fall back to the host
//! process through the JIT builder's default lookup, so calls into the C
//! runtime link without registration.

use std::collections::HashMap;
use std::sync::Arc;

use cranelift_codegen::ir::UserFuncName;
use cranelift_codegen::isa::TargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::FunctionBuilderContext;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module as _};
use tracing::debug;

use super::lower::{ir_signature, FunctionTranslator};
use super::{JitError, JitResult};
use crate::ir;

/// A live JIT session. Materialized symbols stay valid until the session is
/// dropped.
pub struct JitCompiler {
    module: JITModule,
    isa: Arc<dyn TargetIsa>,
    ctx: Context,
    builder_ctx: FunctionBuilderContext,
    /// Symbols with resident machine code, by IR symbol name.
    materialized: HashMap<String, FuncId>,
    /// Data objects already defined, by global name.
    defined_data: HashMap<String, DataId>,
}

impl JitCompiler {
    /// Create a session configured for the host, optimizing for speed.
    pub fn new() -> JitResult<Self> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| JitError::Cranelift(e.to_string()))?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| JitError::Cranelift(e.to_string()))?;

        let isa_builder =
            cranelift_native::builder().map_err(|msg| JitError::HostUnsupported(msg.to_string()))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| JitError::Cranelift(e.to_string()))?;

        let jit_builder =
            JITBuilder::with_isa(isa.clone(), cranelift_module::default_libcall_names());
        let module = JITModule::new(jit_builder);

        Ok(Self {
            module,
            isa,
            ctx: Context::new(),
            builder_ctx: FunctionBuilderContext::new(),
            materialized: HashMap::new(),
            defined_data: HashMap::new(),
        })
    }

    pub fn is_materialized(&self, name: &str) -> bool {
        self.materialized.contains_key(name)
    }

    /// Resident address of a materialized symbol.
    pub fn address_of(&self, name: &str) -> Option<usize> {
        self.materialized
            .get(name)
            .map(|id| self.module.get_finalized_function(*id) as usize)
    }

    /// Submit a snapshot module. Every symbol is declared; bodies are
    /// defined only for functions that are not yet resident. Returns the
    /// names that became resident in this submission.
    pub fn add_module(&mut self, snapshot: &ir::Module) -> JitResult<Vec<String>> {
        self.define_globals(snapshot)?;

        // Declare everything first so call sites can reference any symbol.
        let mut func_ids: HashMap<String, FuncId> = HashMap::new();
        let mut to_define: Vec<&ir::Function> = Vec::new();
        for func in snapshot.functions() {
            let sig = ir_signature(&func.signature, self.isa.as_ref())?;
            let resident = self.materialized.contains_key(&func.name);
            let linkage = if func.is_declaration() || resident {
                Linkage::Import
            } else {
                Linkage::Export
            };
            let id = self
                .module
                .declare_function(&func.name, linkage, &sig)
                .map_err(|e| JitError::Cranelift(e.to_string()))?;
            func_ids.insert(func.name.clone(), id);
            if !func.is_declaration() && !resident {
                to_define.push(func);
            }
        }

        let mut newly_defined: Vec<(String, FuncId)> = Vec::new();
        for func in to_define {
            let func_id = func_ids[&func.name];
            self.ctx.func.signature = ir_signature(&func.signature, self.isa.as_ref())?;
            self.ctx.func.name = UserFuncName::user(0, func_id.as_u32());

            {
                let translator = FunctionTranslator::new(
                    func,
                    snapshot,
                    &func_ids,
                    &self.defined_data,
                    self.isa.as_ref(),
                );
                translator.translate(
                    &mut self.module,
                    &mut self.ctx.func,
                    &mut self.builder_ctx,
                )?;
            }

            self.module
                .define_function(func_id, &mut self.ctx)
                .map_err(|e| JitError::Cranelift(format!("{}: {}", func.name, e)))?;
            self.module.clear_context(&mut self.ctx);
            debug!(symbol = %func.name, "defined in JIT");
            newly_defined.push((func.name.clone(), func_id));
        }

        self.module
            .finalize_definitions()
            .map_err(|e| JitError::Cranelift(e.to_string()))?;

        let mut names = Vec::new();
        for (name, id) in newly_defined {
            self.materialized.insert(name.clone(), id);
            names.push(name);
        }
        Ok(names)
    }

    /// Define data objects for initialized globals not yet resident.
    fn define_globals(&mut self, snapshot: &ir::Module) -> JitResult<()> {
        let mut names: Vec<&String> = snapshot.global_declarations.keys().collect();
        names.sort();
        let pending: Vec<&ir::GlobalDeclaration> = names
            .into_iter()
            .filter(|n| !self.defined_data.contains_key(*n))
            .filter_map(|n| snapshot.global_declarations.get(n))
            .collect();

        for global in pending {
            let bytes = match global_bytes(global) {
                Some(bytes) => bytes,
                None => {
                    return Err(JitError::Unsupported(format!(
                        "global '@{}' has an initializer the JIT cannot lay out",
                        global.name
                    )));
                }
            };
            let data_id = self
                .module
                .declare_data(&global.name, Linkage::Export, true, false)
                .map_err(|e| JitError::Cranelift(e.to_string()))?;
            let mut desc = DataDescription::new();
            desc.define(bytes.into_boxed_slice());
            self.module
                .define_data(data_id, &desc)
                .map_err(|e| JitError::Cranelift(e.to_string()))?;
            self.defined_data.insert(global.name.clone(), data_id);
        }
        Ok(())
    }
}

/// The byte image of a global: its literal initializer, or zeroes when
/// uninitialized. Only primitive and array-of-primitive globals are laid
/// out.
fn global_bytes(global: &ir::GlobalDeclaration) -> Option<Vec<u8>> {
    let size = flat_size(&global.ty)?;
    let mut bytes = vec![0u8; size];
    if let Some(init) = &global.initializer {
        let raw: u64 = match init {
            ir::Literal::F32(v) => v.to_bits() as u64,
            ir::Literal::F64(v) => v.to_bits(),
            other => other.as_i64()? as u64,
        };
        let n = match &global.ty {
            ir::Type::Primitive(p) => p.byte_size() as usize,
            _ => return None, // literal initializer for non-scalar global
        };
        bytes[..n].copy_from_slice(&raw.to_le_bytes()[..n]);
    }
    Some(bytes)
}

fn flat_size(ty: &ir::Type) -> Option<usize> {
    match ty {
        ir::Type::Primitive(p) => Some(p.byte_size() as usize),
        ir::Type::Array { element_type, size } => {
            Some(flat_size(element_type)? * (*size as usize))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    #[test]
    fn jit_compiler_creates() {
        let compiler = JitCompiler::new().expect("host supported");
        assert!(compiler.materialized.is_empty());
    }

    #[test]
    fn jit_compile_and_call_add() {
        let mut compiler = JitCompiler::new().unwrap();
        let module = parse_module(
            r#"
            fn @add2(i32 %a, i32 %b) -> i32 {
              entry:
                %s = add.i32 %a, %b
                ret.i32 %s
            }
        "#,
        )
        .unwrap();

        let defined = compiler.add_module(&module).unwrap();
        assert_eq!(defined, vec!["add2".to_string()]);

        let addr = compiler.address_of("add2").unwrap();
        assert_ne!(addr, 0);
        let f: extern "C" fn(i32, i32) -> i32 = unsafe { std::mem::transmute(addr) };
        assert_eq!(f(10, 32), 42);
    }

    #[test]
    fn jit_second_submission_links_not_redefines() {
        let mut compiler = JitCompiler::new().unwrap();
        let first = parse_module(
            r#"
            fn @base(i32 %x) -> i32 {
              entry:
                %r = add.i32 %x, 1
                ret.i32 %r
            }
        "#,
        )
        .unwrap();
        compiler.add_module(&first).unwrap();
        let base_addr = compiler.address_of("base").unwrap();

        // The second snapshot carries `base` demoted to a declaration.
        let second = parse_module(
            r#"
            decl @base(i32 %x) -> i32

            fn @twice(i32 %x) -> i32 {
              entry:
                %a = call @base(%x)
                %b = call @base(%a)
                ret.i32 %b
            }
        "#,
        )
        .unwrap();
        let defined = compiler.add_module(&second).unwrap();
        assert_eq!(defined, vec!["twice".to_string()]);
        // The first materialization is untouched.
        assert_eq!(compiler.address_of("base").unwrap(), base_addr);

        let f: extern "C" fn(i32) -> i32 = unsafe {
            std::mem::transmute(compiler.address_of("twice").unwrap())
        };
        assert_eq!(f(5), 7);
    }

    #[test]
    fn jit_control_flow_and_loop() {
        let mut compiler = JitCompiler::new().unwrap();
        let module = parse_module(
            r#"
            fn @sum_to(i32 %n) -> i32 {
              entry:
                jmp header
              header:
                %i = phi.i32 [0, entry], [%next, body]
                %acc = phi.i32 [0, entry], [%acc2, body]
                %c = lt.i32 %i, %n
                br %c, body, exit
              body:
                %acc2 = add.i32 %acc, %i
                %next = add.i32 %i, 1
                jmp header
              exit:
                ret.i32 %acc
            }
        "#,
        )
        .unwrap();
        compiler.add_module(&module).unwrap();
        let f: extern "C" fn(i32) -> i32 = unsafe {
            std::mem::transmute(compiler.address_of("sum_to").unwrap())
        };
        assert_eq!(f(10), 45);
        assert_eq!(f(0), 0);
    }

    #[test]
    fn jit_float_memory_traffic() {
        let mut compiler = JitCompiler::new().unwrap();
        let module = parse_module(
            r#"
            fn @scale(ptr %arr, i32 %n) -> void {
              entry:
                jmp header
              header:
                %i = phi.i32 [0, entry], [%next, body]
                %c = lt.i32 %i, %n
                br %c, body, exit
              body:
                %e = getelem.ptr %arr, %i, f32
                %v = load.f32 %e
                %v2 = mul.f32 %v, 2.0
                store.f32 %e, %v2
                %next = add.i32 %i, 1
                jmp header
              exit:
                ret.void
            }
        "#,
        )
        .unwrap();
        compiler.add_module(&module).unwrap();
        let f: extern "C" fn(*mut f32, i32) = unsafe {
            std::mem::transmute(compiler.address_of("scale").unwrap())
        };
        let mut data = vec![1.0f32; 8];
        f(data.as_mut_ptr(), 8);
        assert!(data.iter().all(|v| *v == 2.0));
    }

    #[test]
    fn jit_stack_slot_roundtrip() {
        let mut compiler = JitCompiler::new().unwrap();
        let module = parse_module(
            r#"
            fn @via_slot(i64 %x) -> i64 {
              entry:
                %slot = alloc.stack i64
                store.i64 %slot, %x
                %v = load.i64 %slot
                %r = add.i64 %v, 5
                ret.i64 %r
            }
        "#,
        )
        .unwrap();
        compiler.add_module(&module).unwrap();
        let f: extern "C" fn(i64) -> i64 = unsafe {
            std::mem::transmute(compiler.address_of("via_slot").unwrap())
        };
        assert_eq!(f(37), 42);
    }

    #[test]
    fn jit_global_data() {
        let mut compiler = JitCompiler::new().unwrap();
        let module = parse_module(
            r#"
            global @bias: i64 = 100

            fn @biased(i64 %x) -> i64 {
              entry:
                %b = load.i64 @bias
                %r = add.i64 %x, %b
                ret.i64 %r
            }
        "#,
        )
        .unwrap();
        compiler.add_module(&module).unwrap();
        let f: extern "C" fn(i64) -> i64 = unsafe {
            std::mem::transmute(compiler.address_of("biased").unwrap())
        };
        assert_eq!(f(1), 101);
    }
}
