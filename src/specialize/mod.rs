//! Function specialization: cloning with bindings baked in.
//!
//! A specialization request binds named inputs of a function to integer
//! constants. Parameters named in the request disappear from the clone's
//! signature and their uses become typed literals; named stack slots fold to
//! literals when every use is a direct load or store. The clone is then
//! cleared for optimization: the load-time `@noopt` marker goes away and the
//! probed target attributes go on.

pub mod inline;

use std::collections::BTreeMap;

use tracing::debug;

use crate::demangle::{basename, hash8};
use crate::error::{RecastError, Result};
use crate::ir::{
    Function, FunctionAnnotation, Instruction, Literal, LoopHint, Module, Type, Value,
};
use crate::resolve;
use crate::target::TargetProbe;

/// A binding map. `BTreeMap` keeps keys in canonical (sorted) order, which
/// the naming scheme depends on.
pub type Bindings = BTreeMap<String, i64>;

/// What a specialization produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecializeOutcome {
    /// Symbol name of the specialized clone
    pub name: String,
    /// Parameter count of the source function
    pub original_params: usize,
    /// Parameter count of the clone
    pub residual_params: usize,
    /// True when the clone already existed and nothing was rebuilt
    pub already_present: bool,
}

/// Deterministic name of a specialized clone:
/// `basename + ("_" + key + "_" + value)* + "_" + hash8(full signature)`.
///
/// The hash suffix keeps clones of distinct overloads apart even when base
/// name and bindings coincide.
pub fn specialized_name(demangled: &str, bindings: &Bindings) -> String {
    let mut name = String::from(basename(demangled));
    for (key, value) in bindings {
        name.push('_');
        name.push_str(key);
        name.push('_');
        name.push_str(&value.to_string());
    }
    name.push('_');
    name.push_str(&hash8(demangled));
    name
}

/// Run the full specialization pipeline for `symbol` inside `module`:
/// inline callees, clone with parameter bindings substituted, fold bound
/// stack slots, and normalize the clone for optimization.
///
/// Idempotent: if the specialized clone already exists, nothing changes.
pub fn specialize_in_module(
    module: &mut Module,
    symbol: &str,
    bindings: &Bindings,
    probe: &TargetProbe,
) -> Result<SpecializeOutcome> {
    let source = module
        .get_function(symbol)
        .ok_or_else(|| RecastError::NotFound(symbol.to_string()))?;
    let demangled = resolve::demangled_signature(source);
    let original_params = source.signature.params.len();
    let clone_name = specialized_name(&demangled, bindings);

    if let Some(existing) = module.get_function(&clone_name) {
        return Ok(SpecializeOutcome {
            name: clone_name,
            original_params,
            residual_params: existing.signature.params.len(),
            already_present: true,
        });
    }

    // Bindings are only visible where the named parameter or slot is; pull
    // every defined callee into the body first.
    inline::inline_all_calls(module, symbol).map_err(RecastError::InternalError)?;
    let source = module
        .get_function(symbol)
        .ok_or_else(|| RecastError::NotFound(symbol.to_string()))?;

    let (param_bindings, local_bindings) = partition_bindings(source, bindings);

    let mut clone = clone_with_bound_params(source, &param_bindings, &clone_name)?;
    bind_local_slots(&mut clone, &local_bindings);
    normalize_for_optimization(&mut clone, probe);

    let residual_params = clone.signature.params.len();
    debug!(
        source = symbol,
        clone = %clone_name,
        original_params,
        residual_params,
        "specialized function"
    );
    module.add_function(clone);

    Ok(SpecializeOutcome {
        name: clone_name,
        original_params,
        residual_params,
        already_present: false,
    })
}

/// Split binding keys into parameter bindings and local-slot bindings.
/// Parameter names win; keys matching neither are reported and dropped.
fn partition_bindings(func: &Function, bindings: &Bindings) -> (Bindings, Bindings) {
    let mut params = Bindings::new();
    let mut locals = Bindings::new();

    let slot_names: Vec<&str> = func
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .filter_map(|i| match i {
            Instruction::Alloc { result, .. } => Some(result.as_str()),
            _ => None,
        })
        .collect();

    for (key, value) in bindings {
        let param = func.signature.params.iter().find(|p| p.name == *key);
        match param {
            Some(p) => match &p.ty {
                Type::Primitive(prim) if Literal::from_i64(*prim, *value).is_some() => {
                    params.insert(key.clone(), *value);
                }
                other => {
                    eprintln!(
                        "specialize_function: parameter '{}' has non-integer type {}, binding ignored",
                        key, other
                    );
                }
            },
            None if slot_names.contains(&key.as_str()) => {
                locals.insert(key.clone(), *value);
            }
            None => {
                eprintln!(
                    "specialize_function: '{}' matches no parameter or stack slot of '{}', binding ignored",
                    key, func.name
                );
            }
        }
    }

    (params, locals)
}

/// Clone `source` under `clone_name` with the bound parameters removed from
/// the signature and replaced by typed literals at every use.
fn clone_with_bound_params(
    source: &Function,
    param_bindings: &Bindings,
    clone_name: &str,
) -> Result<Function> {
    let mut params = Vec::new();
    let mut substitution: std::collections::HashMap<String, Value> =
        std::collections::HashMap::new();

    for param in &source.signature.params {
        match param_bindings.get(&param.name) {
            Some(value) => {
                let prim = match &param.ty {
                    Type::Primitive(p) => *p,
                    other => {
                        return Err(RecastError::InternalError(format!(
                            "bound parameter '{}' has non-primitive type {}",
                            param.name, other
                        )));
                    }
                };
                let literal = Literal::from_i64(prim, *value).ok_or_else(|| {
                    RecastError::UnsupportedBinding(format!(
                        "parameter '{}' of type {} cannot hold {}",
                        param.name, prim, value
                    ))
                })?;
                substitution.insert(param.name.clone(), Value::Constant(literal));
            }
            None => params.push(param.clone()),
        }
    }

    let mut blocks = source.blocks.clone();
    for block in &mut blocks {
        for instr in &mut block.instructions {
            instr.for_each_value_mut(|v| {
                if let Value::Variable(name) = v {
                    if let Some(replacement) = substitution.get(name) {
                        *v = replacement.clone();
                    }
                }
            });
        }
    }

    Ok(Function {
        name: clone_name.to_string(),
        signature: crate::ir::FunctionSignature {
            params,
            return_type: source.signature.return_type.clone(),
        },
        annotations: source.annotations.clone(),
        blocks,
        optimized: false,
    })
}

/// Fold bound stack slots to literals. A slot folds only when its every use
/// is a direct load or store address; anything else (pointer arithmetic, an
/// escaping address) leaves the slot intact with a diagnostic.
fn bind_local_slots(func: &mut Function, local_bindings: &Bindings) {
    for (key, value) in local_bindings {
        let slot_ty = func.blocks.iter().flat_map(|b| &b.instructions).find_map(
            |i| match i {
                Instruction::Alloc {
                    result,
                    allocated_ty: Type::Primitive(p),
                } if result == key => Some(*p),
                _ => None,
            },
        );
        let Some(prim) = slot_ty else {
            eprintln!(
                "specialize_function: stack slot '{}' is not a primitive slot, binding ignored",
                key
            );
            continue;
        };
        let Some(literal) = Literal::from_i64(prim, *value) else {
            eprintln!(
                "specialize_function: stack slot '{}' of type {} cannot hold {}, binding ignored",
                key, prim, value
            );
            continue;
        };

        if slot_escapes(func, key) {
            eprintln!(
                "specialize_function: stack slot '{}' has uses other than direct loads and stores, binding ignored",
                key
            );
            continue;
        }

        // Loads become the literal, stores and the slot vanish.
        let mut load_results: Vec<String> = Vec::new();
        for block in &mut func.blocks {
            block.instructions.retain(|instr| match instr {
                Instruction::Alloc { result, .. } => result != key,
                Instruction::Store { ptr, .. } => ptr.as_variable() != Some(key.as_str()),
                Instruction::Load { result, ptr, .. } => {
                    if ptr.as_variable() == Some(key.as_str()) {
                        load_results.push(result.clone());
                        false
                    } else {
                        true
                    }
                }
                _ => true,
            });
        }
        for block in &mut func.blocks {
            for instr in &mut block.instructions {
                instr.for_each_value_mut(|v| {
                    if let Value::Variable(name) = v {
                        if load_results.iter().any(|r| r == name) {
                            *v = Value::Constant(literal);
                        }
                    }
                });
            }
        }
    }
}

/// True when the slot's address is used anywhere except as the direct
/// pointer of a load or store.
fn slot_escapes(func: &Function, slot: &str) -> bool {
    for block in &func.blocks {
        for instr in &block.instructions {
            match instr {
                Instruction::Alloc { .. } => {}
                // A direct load or store address is fine; the stored value
                // escaping is not.
                Instruction::Load { .. } => {}
                Instruction::Store { value, .. } => {
                    if value.as_variable() == Some(slot) {
                        return true;
                    }
                }
                other => {
                    let mut escapes = false;
                    other.for_each_value(|v| {
                        if v.as_variable() == Some(slot) {
                            escapes = true;
                        }
                    });
                    if escapes {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Clear the pessimizations the loader installed and put the probed target
/// attributes on. Unroll-disabling hints are stripped; other hints stay.
pub fn normalize_for_optimization(func: &mut Function, probe: &TargetProbe) {
    func.annotations.retain(|a| {
        !matches!(
            a,
            FunctionAnnotation::NoOpt
                | FunctionAnnotation::NoInline
                | FunctionAnnotation::MinSize
                | FunctionAnnotation::OptSize
                | FunctionAnnotation::TargetCpu(_)
                | FunctionAnnotation::TargetFeatures(_)
                | FunctionAnnotation::VectorWidth(_)
        )
    });
    func.annotations
        .push(FunctionAnnotation::TargetCpu(probe.cpu.clone()));
    func.annotations
        .push(FunctionAnnotation::TargetFeatures(probe.feature_string()));
    func.annotations
        .push(FunctionAnnotation::VectorWidth(probe.max_vector_width));

    for block in &mut func.blocks {
        block.hints.retain(|h| {
            !matches!(h, LoopHint::UnrollDisable | LoopHint::UnrollRuntimeDisable)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;
    use crate::transform::sanity::verify_module;

    fn test_probe() -> TargetProbe {
        TargetProbe {
            triple: "x86_64-unknown-linux-gnu".to_string(),
            cpu: "x86_64".to_string(),
            features: vec!["sse2".to_string()],
            max_vector_width: 128,
        }
    }

    fn bindings(pairs: &[(&str, i64)]) -> Bindings {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    const HOT_LOOP: &str = r#"
        @noopt
        fn @_R8hot_looppi(ptr %arr, i32 %N) -> void {
          entry:
            jmp header
          header: !unroll.disable
            %i = phi.i32 [0, entry], [%next, body]
            %c = lt.i32 %i, %N
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
    "#;

    #[test]
    fn test_specialized_name_format() {
        let name = specialized_name("hot_loop(ptr, i32)", &bindings(&[("N", 64)]));
        assert!(name.starts_with("hot_loop_N_64_"));
        assert_eq!(name.len(), "hot_loop_N_64_".len() + 8);
    }

    #[test]
    fn test_naming_negative_value() {
        let name = specialized_name("clamp(i32)", &bindings(&[("lo", -8)]));
        assert!(name.starts_with("clamp_lo_-8_"));
    }

    #[test]
    fn test_naming_canonical_order() {
        let a = specialized_name("f(i32, i32)", &bindings(&[("b", 2), ("a", 1)]));
        let b = specialized_name("f(i32, i32)", &bindings(&[("a", 1), ("b", 2)]));
        assert_eq!(a, b);
        assert!(a.contains("_a_1_b_2_"));
    }

    #[test]
    fn test_naming_distinguishes_overloads() {
        let b = bindings(&[("N", 64)]);
        let a = specialized_name("hot_loop(ptr, i32)", &b);
        let c = specialized_name("hot_loop(ptr, i64)", &b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_residual_signature() {
        let mut module = parse_module(HOT_LOOP).unwrap();
        let outcome = specialize_in_module(
            &mut module,
            "_R8hot_looppi",
            &bindings(&[("N", 64)]),
            &test_probe(),
        )
        .unwrap();

        assert_eq!(outcome.original_params, 2);
        assert_eq!(outcome.residual_params, 1);
        assert!(!outcome.already_present);

        let clone = module.get_function(&outcome.name).unwrap();
        assert_eq!(clone.signature.params.len(), 1);
        assert_eq!(clone.signature.params[0].name, "arr");
        verify_module(&module).unwrap();
    }

    #[test]
    fn test_constant_propagated_to_uses() {
        let mut module = parse_module(HOT_LOOP).unwrap();
        let outcome = specialize_in_module(
            &mut module,
            "_R8hot_looppi",
            &bindings(&[("N", 64)]),
            &test_probe(),
        )
        .unwrap();

        let clone = module.get_function(&outcome.name).unwrap();
        let mut uses_of_n = 0;
        for block in &clone.blocks {
            for instr in &block.instructions {
                instr.for_each_value(|v| {
                    if v.as_variable() == Some("N") {
                        uses_of_n += 1;
                    }
                });
            }
        }
        assert_eq!(uses_of_n, 0);

        let header = clone.get_block("header").unwrap();
        match &header.instructions[1] {
            Instruction::Cmp { rhs, .. } => {
                assert_eq!(rhs, &Value::Constant(Literal::I32(64)));
            }
            other => panic!("Expected cmp, got {:?}", other),
        }
    }

    #[test]
    fn test_normalizer_strips_pessimizations() {
        let mut module = parse_module(HOT_LOOP).unwrap();
        let outcome = specialize_in_module(
            &mut module,
            "_R8hot_looppi",
            &bindings(&[("N", 64)]),
            &test_probe(),
        )
        .unwrap();

        let clone = module.get_function(&outcome.name).unwrap();
        assert!(!clone.has_annotation(&FunctionAnnotation::NoOpt));
        assert!(clone.has_annotation(&FunctionAnnotation::VectorWidth(128)));
        let header = clone.get_block("header").unwrap();
        assert!(header.hints.is_empty());

        // The source is untouched.
        let source = module.get_function("_R8hot_looppi").unwrap();
        assert!(source.has_annotation(&FunctionAnnotation::NoOpt));
        assert_eq!(source.get_block("header").unwrap().hints.len(), 1);
    }

    #[test]
    fn test_idempotent_specialization() {
        let mut module = parse_module(HOT_LOOP).unwrap();
        let b = bindings(&[("N", 64)]);
        let first =
            specialize_in_module(&mut module, "_R8hot_looppi", &b, &test_probe()).unwrap();
        let count = module.function_count();
        let second =
            specialize_in_module(&mut module, "_R8hot_looppi", &b, &test_probe()).unwrap();

        assert_eq!(first.name, second.name);
        assert!(second.already_present);
        assert_eq!(module.function_count(), count);
    }

    #[test]
    fn test_local_slot_binding() {
        let src = r#"
            fn @_R14hot_loop_constp(ptr %arr) -> void {
              entry:
                %N = alloc.stack i32
                jmp header
              header:
                %i = phi.i32 [0, entry], [%next, body]
                %n = load.i32 %N
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
        "#;
        let mut module = parse_module(src).unwrap();
        let outcome = specialize_in_module(
            &mut module,
            "_R14hot_loop_constp",
            &bindings(&[("N", 64)]),
            &test_probe(),
        )
        .unwrap();

        // The binding was a local, not a parameter: signature unchanged.
        assert_eq!(outcome.residual_params, 1);

        let clone = module.get_function(&outcome.name).unwrap();
        assert!(clone.blocks.iter().all(|b| b
            .instructions
            .iter()
            .all(|i| !matches!(i, Instruction::Alloc { .. }))));
        let header = clone.get_block("header").unwrap();
        match &header.instructions[1] {
            Instruction::Cmp { rhs, .. } => {
                assert_eq!(rhs, &Value::Constant(Literal::I32(64)));
            }
            other => panic!("Expected cmp against literal, got {:?}", other),
        }
        verify_module(&module).unwrap();
    }

    #[test]
    fn test_escaping_slot_binding_ignored() {
        let src = r#"
            fn @f(ptr %out) -> void {
              entry:
                %N = alloc.stack i32
                store.ptr %out, %N
                ret.void
            }
        "#;
        let mut module = parse_module(src).unwrap();
        let outcome =
            specialize_in_module(&mut module, "f", &bindings(&[("N", 64)]), &test_probe())
                .unwrap();
        let clone = module.get_function(&outcome.name).unwrap();
        // Slot untouched.
        assert!(clone
            .blocks
            .iter()
            .any(|b| b.instructions.iter().any(|i| matches!(i, Instruction::Alloc { .. }))));
    }

    #[test]
    fn test_unknown_binding_key_ignored() {
        let mut module = parse_module(HOT_LOOP).unwrap();
        let outcome = specialize_in_module(
            &mut module,
            "_R8hot_looppi",
            &bindings(&[("N", 64), ("bogus", 1)]),
            &test_probe(),
        )
        .unwrap();
        // Residual signature shows only N was consumed.
        assert_eq!(outcome.residual_params, 1);
        verify_module(&module).unwrap();
    }

    #[test]
    fn test_binding_reaches_through_call() {
        let src = r#"
            fn @_R8hot_looppi(ptr %arr, i32 %N) -> void {
              entry:
                jmp header
              header:
                %i = phi.i32 [0, entry], [%next, body]
                %c = lt.i32 %i, %N
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

            fn @_R17hot_loop_inliningpi(ptr %arr, i32 %N) -> void {
              entry:
                call @_R8hot_looppi(%arr, %N)
                ret.void
            }
        "#;
        let mut module = parse_module(src).unwrap();
        let outcome = specialize_in_module(
            &mut module,
            "_R17hot_loop_inliningpi",
            &bindings(&[("N", 64)]),
            &test_probe(),
        )
        .unwrap();

        let clone = module.get_function(&outcome.name).unwrap();
        // No call remains and the bound count reached the inlined loop.
        assert!(clone.blocks.iter().all(|b| b
            .instructions
            .iter()
            .all(|i| !matches!(i, Instruction::Call { .. }))));
        let has_literal_bound = clone.blocks.iter().any(|b| {
            b.instructions.iter().any(|i| {
                matches!(i, Instruction::Cmp { rhs, .. } if rhs == &Value::Constant(Literal::I32(64)))
            })
        });
        assert!(has_literal_bound);
        verify_module(&module).unwrap();
    }
}
