pub mod parser;

// Re-export the main entry point from parser.rs
pub use parser::parse_module;

#[cfg(test)]
mod tests {
    use super::parse_module;
    use crate::ir::{
        BinaryOp, CmpOp, FunctionAnnotation, Instruction, Literal, LoopHint, PrimitiveType, Type,
        Value,
    };

    #[test]
    fn test_parse_simple_add_function() {
        let input = r#"
            fn @add(i32 %a, i32 %b) -> i32 {
              entry:
                %sum = add.i32 %a, %b
                ret.i32 %sum
            }
        "#;

        let module = parse_module(input).expect("Parsing failed");

        assert_eq!(module.function_count(), 1);
        let func = module.get_function("add").expect("Function @add not found");

        assert_eq!(func.name, "add");
        assert_eq!(func.signature.params.len(), 2);
        assert_eq!(func.signature.params[0].name, "a");
        assert_eq!(
            func.signature.params[0].ty,
            Type::Primitive(PrimitiveType::I32)
        );
        assert_eq!(func.signature.params[1].name, "b");
        assert_eq!(func.signature.return_type, Type::Primitive(PrimitiveType::I32));
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.blocks[0].label, "entry");

        let entry = &func.blocks[0];
        assert_eq!(entry.instructions.len(), 2);

        match &entry.instructions[0] {
            Instruction::Binary {
                op,
                result,
                ty,
                lhs,
                rhs,
            } => {
                assert_eq!(*op, BinaryOp::Add);
                assert_eq!(result, "sum");
                assert_eq!(*ty, PrimitiveType::I32);
                assert_eq!(*lhs, Value::var("a"));
                assert_eq!(*rhs, Value::var("b"));
            }
            other => panic!("Unexpected instruction: {:?}", other),
        }

        match &entry.instructions[1] {
            Instruction::Ret { ty, value } => {
                assert_eq!(*ty, Type::Primitive(PrimitiveType::I32));
                assert_eq!(value.as_ref(), Some(&Value::var("sum")));
            }
            other => panic!("Unexpected instruction: {:?}", other),
        }
    }

    #[test]
    fn test_parse_type_and_global_declarations() {
        let input = r#"
            type @Vec2 = struct { x: f32, y: f32 }
            type @Matrix = [4 x i32]
            global @count: i64 = 10
            global @uninit: ptr
        "#;
        let module = parse_module(input).expect("Parsing failed");

        assert_eq!(module.type_declarations.len(), 2);
        let vec2 = module.type_declarations.get("Vec2").unwrap();
        if let Type::Struct(fields) = &vec2.ty {
            assert_eq!(fields.len(), 2);
            assert_eq!(fields[0].name, "x");
            assert_eq!(fields[0].ty, Type::Primitive(PrimitiveType::F32));
        } else {
            panic!("Expected struct for Vec2");
        }

        let count = module.global_declarations.get("count").unwrap();
        assert_eq!(count.ty, Type::Primitive(PrimitiveType::I64));
        assert_eq!(count.initializer, Some(Literal::I64(10)));

        let uninit = module.global_declarations.get("uninit").unwrap();
        assert!(uninit.initializer.is_none());
    }

    #[test]
    fn test_parse_comments_and_whitespace() {
        let input = r#"
            # This is a comment
            fn @test() -> void { # Another comment
               entry: # Block label comment
                  # Instruction comment
                  ret.void # Trailing comment
            } # Final comment
        "#;
        let module = parse_module(input).expect("Parsing should succeed");
        assert_eq!(module.function_count(), 1);
        let func = module.get_function("test").unwrap();
        assert_eq!(func.blocks.len(), 1);
        assert!(matches!(
            func.blocks[0].instructions[0],
            Instruction::Ret {
                ty: Type::Void,
                value: None
            }
        ));
    }

    #[test]
    fn test_parse_block_missing_terminator() {
        let input = r#"
            fn @bad() -> i32 {
                entry:
                    %a = add.i32 1, 2
            }
        "#;
        let result = parse_module(input);
        assert!(result.is_err());
        if let Err(e) = result {
            assert!(e.to_string().contains("must end with a terminator instruction"));
        }
    }

    #[test]
    fn test_parse_function_with_multiple_blocks() {
        let input = r#"
            fn @conditional(i32 %x) -> i32 {
              entry:
                %is_pos = gt.i32 %x, 0
                br %is_pos, positive, negative

              positive:
                ret.i32 1

              negative:
                ret.i32 -1
            }
        "#;

        let module = parse_module(input).expect("Parsing failed");
        let func = module.get_function("conditional").expect("Function not found");

        assert_eq!(func.blocks.len(), 3);
        assert_eq!(func.blocks[0].label, "entry");
        assert_eq!(func.blocks[1].label, "positive");
        assert_eq!(func.blocks[2].label, "negative");

        match &func.blocks[2].instructions[0] {
            Instruction::Ret { value, .. } => {
                assert_eq!(value, &Some(Value::Constant(Literal::I32(-1))));
            }
            other => panic!("Expected ret, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_comparison_and_zext() {
        let input = r#"
            fn @test(i32 %a, i32 %b) -> i64 {
              entry:
                %c = le.i32 %a, %b
                %w = zext.bool.i64 %c
                ret.i64 %w
            }
        "#;
        let module = parse_module(input).expect("Parsing failed");
        let func = module.get_function("test").unwrap();
        match &func.blocks[0].instructions[0] {
            Instruction::Cmp { op, ty, .. } => {
                assert_eq!(*op, CmpOp::Le);
                assert_eq!(*ty, PrimitiveType::I32);
            }
            other => panic!("Expected cmp, got {:?}", other),
        }
        match &func.blocks[0].instructions[1] {
            Instruction::ZeroExtend {
                source_type,
                target_type,
                ..
            } => {
                assert_eq!(*source_type, PrimitiveType::Bool);
                assert_eq!(*target_type, PrimitiveType::I64);
            }
            other => panic!("Expected zext, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_memory_and_composite_operations() {
        let input = r#"
            fn @test_composite() -> ptr {
              entry:
                %arr_ptr = alloc.stack [4 x i32]
                %elem_ptr = getelem.ptr %arr_ptr, 2, i32
                %elem = load.i32 %elem_ptr
                %struct_ptr = alloc.stack struct { x: i32, y: i32 }
                %y_ptr = getfield.ptr %struct_ptr, 1
                store.i32 %y_ptr, %elem
                ret.ptr %struct_ptr
            }
        "#;

        let module = parse_module(input).expect("Parsing failed");
        let func = module.get_function("test_composite").unwrap();
        let entry = &func.blocks[0];
        assert_eq!(entry.instructions.len(), 7);

        match &entry.instructions[0] {
            Instruction::Alloc { result, allocated_ty } => {
                assert_eq!(result, "arr_ptr");
                assert!(matches!(allocated_ty, Type::Array { size: 4, .. }));
            }
            other => panic!("Expected alloc, got {:?}", other),
        }
        match &entry.instructions[1] {
            Instruction::GetElemPtr {
                index, element_type, ..
            } => {
                assert_eq!(*index, Value::Constant(Literal::I64(2)));
                assert_eq!(*element_type, PrimitiveType::I32);
            }
            other => panic!("Expected getelem, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_function_call() {
        let input = r#"
            fn @callee(i32 %x, i32 %y) -> i32 {
              entry:
                %sum = add.i32 %x, %y
                ret.i32 %sum
            }

            fn @caller() -> i32 {
              entry:
                %result = call @callee(5, 10)
                ret.i32 %result
            }
        "#;

        let module = parse_module(input).expect("Parsing failed");
        let caller = module.get_function("caller").expect("Caller not found");

        match &caller.blocks[0].instructions[0] {
            Instruction::Call {
                result,
                func_name,
                args,
            } => {
                assert_eq!(result.as_deref(), Some("result"));
                assert_eq!(func_name, "callee");
                assert_eq!(args.len(), 2);
                assert_eq!(args[0], Value::Constant(Literal::I32(5)));
            }
            other => panic!("Expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_phi_and_loop_hints() {
        let input = r#"
            fn @counted(i32 %n) -> i32 {
              entry:
                jmp header
              header: !unroll.disable !vectorize.enable
                %i = phi.i32 [0, entry], [%next, body]
                %c = lt.i32 %i, %n
                br %c, body, exit
              body:
                %next = add.i32 %i, 1
                jmp header
              exit:
                ret.i32 %i
            }
        "#;

        let module = parse_module(input).expect("Parsing failed");
        let func = module.get_function("counted").unwrap();
        let header = func.get_block("header").unwrap();
        assert_eq!(
            header.hints,
            vec![LoopHint::UnrollDisable, LoopHint::VectorizeEnable]
        );
        match &header.instructions[0] {
            Instruction::Phi { incoming, .. } => {
                assert_eq!(incoming.len(), 2);
                assert_eq!(incoming[0].0, Value::Constant(Literal::I32(0)));
                assert_eq!(incoming[0].1, "entry");
                assert_eq!(incoming[1].0, Value::var("next"));
                assert_eq!(incoming[1].1, "body");
            }
            other => panic!("Expected phi, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_annotations_and_declaration() {
        let input = r#"
            @noopt
            @vector_width(256)
            @target_cpu(x86_64)
            fn @hot(ptr %p) -> void {
              entry:
                ret.void
            }

            decl @external_helper(i64 %x) -> i64
        "#;

        let module = parse_module(input).expect("Parsing failed");
        let hot = module.get_function("hot").unwrap();
        assert!(hot.has_annotation(&FunctionAnnotation::NoOpt));
        assert!(hot.has_annotation(&FunctionAnnotation::VectorWidth(256)));
        assert!(hot.has_annotation(&FunctionAnnotation::TargetCpu("x86_64".to_string())));

        let ext = module.get_function("external_helper").unwrap();
        assert!(ext.is_declaration());
        assert_eq!(ext.signature.params.len(), 1);
    }

    #[test]
    fn test_module_roundtrip_through_display() {
        let input = r#"
            @noopt
            fn @scale(ptr %arr, i32 %n) -> void {
              entry:
                jmp header
              header: !unroll.disable
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
        "#;
        let module = parse_module(input).expect("first parse failed");
        let printed = format!("{}", module);
        let reparsed = parse_module(&printed).expect("reparse failed");
        assert_eq!(module, reparsed);
    }
}
