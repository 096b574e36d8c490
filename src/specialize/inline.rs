//! Call inlining into a specialization target.
//!
//! Bindings only reach code where the bound name is visible, so every
//! defined callee is spliced into the target before cloning. The fixed-point
//! loop picks up calls exposed by earlier inlines; declarations and direct
//! recursion stay as calls.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::ir::{BasicBlock, Function, Instruction, Module, Type, Value};

const MAX_INLINE_SITES: usize = 100;

/// Inline every call to a defined function inside `target`, repeatedly,
/// until none remain. Returns the number of call sites inlined.
pub fn inline_all_calls(module: &mut Module, target: &str) -> Result<usize, String> {
    let mut inlined = 0usize;
    let mut next_id = 0usize;

    while inlined < MAX_INLINE_SITES {
        let site = match find_inlinable_site(module, target) {
            Some(site) => site,
            None => break,
        };
        let callee = module
            .get_function(&site.callee)
            .cloned()
            .ok_or_else(|| format!("callee '{}' vanished", site.callee))?;

        let caller = module
            .get_function_mut(target)
            .ok_or_else(|| format!("target '{}' vanished", target))?;
        next_id = fresh_inline_id(caller, next_id);
        inline_site(caller, &site, &callee, next_id)?;
        debug!(caller = target, callee = %site.callee, id = next_id, "inlined call");
        next_id += 1;
        inlined += 1;
    }

    if inlined >= MAX_INLINE_SITES {
        return Err(format!(
            "inlining into '{}' did not converge after {} sites",
            target, MAX_INLINE_SITES
        ));
    }
    Ok(inlined)
}

#[derive(Debug)]
struct CallSite {
    callee: String,
    block_label: String,
    instr_idx: usize,
}

fn find_inlinable_site(module: &Module, target: &str) -> Option<CallSite> {
    let caller = module.get_function(target)?;
    for block in &caller.blocks {
        for (instr_idx, instr) in block.instructions.iter().enumerate() {
            if let Instruction::Call { func_name, .. } = instr {
                if func_name == target {
                    continue; // direct recursion stays a call
                }
                match module.get_function(func_name) {
                    Some(callee) if !callee.is_declaration() => {
                        return Some(CallSite {
                            callee: func_name.clone(),
                            block_label: block.label.clone(),
                            instr_idx,
                        });
                    }
                    _ => {}
                }
            }
        }
    }
    None
}

/// Pick an inline id whose renamed labels and values cannot collide with
/// anything already in the caller.
fn fresh_inline_id(caller: &Function, start: usize) -> usize {
    let mut names: HashSet<String> = caller.blocks.iter().map(|b| b.label.clone()).collect();
    for block in &caller.blocks {
        for instr in &block.instructions {
            if let Some(r) = instr.result_name() {
                names.insert(r.to_string());
            }
        }
    }
    let mut id = start;
    loop {
        let marker = format!("_inl{}", id);
        if !names.iter().any(|n| n.ends_with(&marker)) {
            return id;
        }
        id += 1;
    }
}

fn inline_site(
    caller: &mut Function,
    site: &CallSite,
    callee: &Function,
    id: usize,
) -> Result<(), String> {
    let block_idx = caller
        .blocks
        .iter()
        .position(|b| b.label == site.block_label)
        .ok_or_else(|| format!("call block '{}' not found", site.block_label))?;

    let (call_result, call_args) = {
        let instr = caller.blocks[block_idx]
            .instructions
            .get(site.instr_idx)
            .ok_or("call instruction index out of bounds")?;
        match instr {
            Instruction::Call { result, args, .. } => (result.clone(), args.clone()),
            other => return Err(format!("expected call instruction, found {}", other)),
        }
    };

    if callee.signature.params.len() != call_args.len() {
        return Err(format!(
            "call to '{}' passes {} arguments, expected {}",
            callee.name,
            call_args.len(),
            callee.signature.params.len()
        ));
    }

    // Parameters map to the call arguments; everything the callee defines is
    // renamed to stay unique in the caller.
    let mut value_map: HashMap<String, Value> = HashMap::new();
    for (param, arg) in callee.signature.params.iter().zip(call_args.iter()) {
        value_map.insert(param.name.clone(), arg.clone());
    }
    for block in &callee.blocks {
        for instr in &block.instructions {
            if let Some(name) = instr.result_name() {
                value_map.insert(name.to_string(), Value::var(format!("{}_inl{}", name, id)));
            }
        }
    }
    let rename_label = |label: &str| format!("{}_inl{}", label, id);

    let split_label = format!("{}_split{}", site.block_label, id);

    // Clone the callee body, rewiring returns to the continuation block.
    let mut cloned_blocks: Vec<BasicBlock> = Vec::new();
    let mut returns: Vec<(String, Option<Value>)> = Vec::new();
    for block in &callee.blocks {
        let mut new_block = BasicBlock::new(rename_label(&block.label));
        new_block.hints = block.hints.clone();
        for instr in &block.instructions {
            let mut cloned = instr.clone();
            cloned.for_each_value_mut(|v| {
                if let Value::Variable(name) = v {
                    if let Some(mapped) = value_map.get(name) {
                        *v = mapped.clone();
                    }
                }
            });
            if let Some(name) = cloned.result_name().map(str::to_string) {
                if let Some(Value::Variable(renamed)) = value_map.get(&name) {
                    rename_result_name(&mut cloned, renamed.clone());
                }
            }
            match &mut cloned {
                Instruction::Ret { value, .. } => {
                    returns.push((new_block.label.clone(), value.clone()));
                    new_block.instructions.push(Instruction::Jmp {
                        target_label: split_label.clone(),
                    });
                    continue;
                }
                Instruction::Jmp { target_label } => {
                    *target_label = rename_label(target_label);
                }
                Instruction::Br {
                    true_label,
                    false_label,
                    ..
                } => {
                    *true_label = rename_label(true_label);
                    *false_label = rename_label(false_label);
                }
                Instruction::Phi { incoming, .. } => {
                    for (_, label) in incoming.iter_mut() {
                        *label = rename_label(label);
                    }
                }
                _ => {}
            }
            new_block.instructions.push(cloned);
        }
        cloned_blocks.push(new_block);
    }

    // Split the calling block: everything after the call moves to the
    // continuation, the call becomes a jump into the inlined entry.
    let call_block = &mut caller.blocks[block_idx];
    let tail: Vec<Instruction> = call_block.instructions.split_off(site.instr_idx + 1);
    call_block.instructions.pop(); // the call itself
    let entry_label = rename_label(&callee.blocks[0].label);
    call_block.instructions.push(Instruction::Jmp {
        target_label: entry_label,
    });

    let mut split_block = BasicBlock::new(split_label.clone());
    if let Some(result) = call_result {
        if callee.signature.return_type != Type::Void {
            let incoming: Vec<(Value, String)> = returns
                .iter()
                .filter_map(|(label, value)| value.clone().map(|v| (v, label.clone())))
                .collect();
            if incoming.is_empty() {
                return Err(format!(
                    "call to '{}' expects a result but the callee never returns one",
                    callee.name
                ));
            }
            split_block.instructions.push(Instruction::Phi {
                result,
                ty: callee.signature.return_type.clone(),
                incoming,
            });
        }
    }
    split_block.instructions.extend(tail);

    // Former successors of the calling block now hang off the continuation.
    let original_label = site.block_label.clone();
    for block in &mut caller.blocks {
        for instr in &mut block.instructions {
            if let Instruction::Phi { incoming, .. } = instr {
                for (_, label) in incoming.iter_mut() {
                    if *label == original_label {
                        *label = split_label.clone();
                    }
                }
            }
        }
    }

    // Layout: calling block, inlined body, continuation.
    let mut insert_at = block_idx + 1;
    for block in cloned_blocks {
        caller.blocks.insert(insert_at, block);
        insert_at += 1;
    }
    caller.blocks.insert(insert_at, split_block);

    Ok(())
}

fn rename_result_name(instr: &mut Instruction, new_name: String) {
    match instr {
        Instruction::Binary { result, .. }
        | Instruction::Cmp { result, .. }
        | Instruction::ZeroExtend { result, .. }
        | Instruction::Alloc { result, .. }
        | Instruction::Load { result, .. }
        | Instruction::GetFieldPtr { result, .. }
        | Instruction::GetElemPtr { result, .. }
        | Instruction::PtrToInt { result, .. }
        | Instruction::IntToPtr { result, .. }
        | Instruction::Phi { result, .. } => *result = new_name,
        Instruction::Call { result, .. } => *result = Some(new_name),
        _ => {}
    }
}
