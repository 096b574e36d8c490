//! Structural validation for IR modules.
//!
//! Catches transform and specialization bugs before they reach the JIT:
//! missing terminators, dangling branch targets, duplicate SSA definitions,
//! uses of undefined names, malformed phis, and call-site arity mismatches.

use std::collections::HashSet;

use crate::ir::{Function, Instruction, Module, Value};

/// Validate every defined function and its call sites against the module.
pub fn verify_module(module: &Module) -> Result<(), String> {
    for func in module.functions() {
        if func.is_declaration() {
            continue;
        }
        validate_function(func)?;
        validate_calls(func, module)?;
    }
    Ok(())
}

/// Validate one function body in isolation.
pub fn validate_function(func: &Function) -> Result<(), String> {
    if func.blocks.is_empty() {
        return Err(format!("Function '{}' has no blocks", func.name));
    }

    let labels: HashSet<&str> = func.blocks.iter().map(|b| b.label.as_str()).collect();
    if labels.len() != func.blocks.len() {
        return Err(format!("Function '{}' has duplicate block labels", func.name));
    }

    let mut defined: HashSet<String> = func
        .signature
        .params
        .iter()
        .map(|p| p.name.clone())
        .collect();

    for block in &func.blocks {
        match block.instructions.last() {
            Some(last) if last.is_terminator() => {}
            _ => {
                return Err(format!(
                    "Function '{}': block '{}' does not end with a terminator",
                    func.name, block.label
                ));
            }
        }
        for (idx, instr) in block.instructions.iter().enumerate() {
            if instr.is_terminator() && idx + 1 != block.instructions.len() {
                return Err(format!(
                    "Function '{}': block '{}' has a terminator before its end",
                    func.name, block.label
                ));
            }
            if let Some(result) = instr.result_name() {
                if !defined.insert(result.to_string()) {
                    return Err(format!(
                        "Function '{}': value '%{}' defined more than once",
                        func.name, result
                    ));
                }
            }
            for succ in successor_labels(instr) {
                if !labels.contains(succ) {
                    return Err(format!(
                        "Function '{}': block '{}' targets missing block '{}'",
                        func.name, block.label, succ
                    ));
                }
            }
            if let Instruction::Phi { incoming, .. } = instr {
                if incoming.is_empty() {
                    return Err(format!(
                        "Function '{}': phi in block '{}' has no incoming values",
                        func.name, block.label
                    ));
                }
                for (_, label) in incoming {
                    if !labels.contains(label.as_str()) {
                        return Err(format!(
                            "Function '{}': phi in block '{}' references missing block '{}'",
                            func.name, block.label, label
                        ));
                    }
                }
            }
        }
    }

    // Every use must have a definition somewhere in the function. Dominance
    // is not checked here; the JIT's SSA construction would reject genuinely
    // undominated uses.
    let mut undefined: Option<String> = None;
    for block in &func.blocks {
        for instr in &block.instructions {
            instr.for_each_value(|v| {
                if let Value::Variable(name) = v {
                    if !defined.contains(name) && undefined.is_none() {
                        undefined = Some(name.clone());
                    }
                }
            });
        }
    }
    if let Some(name) = undefined {
        return Err(format!(
            "Function '{}': use of undefined value '%{}'",
            func.name, name
        ));
    }

    Ok(())
}

fn validate_calls(func: &Function, module: &Module) -> Result<(), String> {
    for block in &func.blocks {
        for instr in &block.instructions {
            if let Instruction::Call {
                func_name, args, ..
            } = instr
            {
                let callee = module.get_function(func_name).ok_or_else(|| {
                    format!(
                        "Function '{}' calls unknown function '@{}'",
                        func.name, func_name
                    )
                })?;
                if callee.signature.params.len() != args.len() {
                    return Err(format!(
                        "Function '{}' calls '@{}' with {} arguments, expected {}",
                        func.name,
                        func_name,
                        args.len(),
                        callee.signature.params.len()
                    ));
                }
            }
        }
    }
    Ok(())
}

fn successor_labels(instr: &Instruction) -> Vec<&str> {
    match instr {
        Instruction::Jmp { target_label } => vec![target_label.as_str()],
        Instruction::Br {
            true_label,
            false_label,
            ..
        } => vec![true_label.as_str(), false_label.as_str()],
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    #[test]
    fn test_valid_module_passes() {
        let module = parse_module(
            r#"
            fn @callee(i32 %x) -> i32 {
              entry:
                ret.i32 %x
            }

            fn @caller() -> i32 {
              entry:
                %r = call @callee(1)
                ret.i32 %r
            }
        "#,
        )
        .unwrap();
        assert!(verify_module(&module).is_ok());
    }

    #[test]
    fn test_dangling_branch_target() {
        let module = parse_module(
            r#"
            fn @f(bool %c) -> void {
              entry:
                br %c, gone, here
              here:
                ret.void
            }
        "#,
        );
        // The parser accepts it; the verifier must not.
        let module = module.unwrap();
        let err = verify_module(&module).unwrap_err();
        assert!(err.contains("missing block 'gone'"));
    }

    #[test]
    fn test_undefined_use() {
        let module = parse_module(
            r#"
            fn @f() -> i32 {
              entry:
                ret.i32 %ghost
            }
        "#,
        )
        .unwrap();
        let err = verify_module(&module).unwrap_err();
        assert!(err.contains("undefined value '%ghost'"));
    }

    #[test]
    fn test_duplicate_definition() {
        let module = parse_module(
            r#"
            fn @f(i32 %x) -> i32 {
              entry:
                %a = add.i32 %x, 1
                %a = add.i32 %x, 2
                ret.i32 %a
            }
        "#,
        )
        .unwrap();
        let err = verify_module(&module).unwrap_err();
        assert!(err.contains("defined more than once"));
    }

    #[test]
    fn test_call_arity_mismatch() {
        let module = parse_module(
            r#"
            fn @callee(i32 %x, i32 %y) -> i32 {
              entry:
                ret.i32 %x
            }

            fn @caller() -> i32 {
              entry:
                %r = call @callee(1)
                ret.i32 %r
            }
        "#,
        )
        .unwrap();
        let err = verify_module(&module).unwrap_err();
        assert!(err.contains("expected 2"));
    }

    #[test]
    fn test_call_to_declaration_allowed() {
        let module = parse_module(
            r#"
            decl @ext(i64 %x) -> i64

            fn @caller(i64 %v) -> i64 {
              entry:
                %r = call @ext(%v)
                ret.i64 %r
            }
        "#,
        )
        .unwrap();
        assert!(verify_module(&module).is_ok());
    }
}
