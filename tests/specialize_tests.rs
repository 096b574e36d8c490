//! IR-level properties of the specialization pipeline, exercised through the
//! public library surface without touching the JIT.

use recast::specialize::{specialize_in_module, specialized_name, Bindings};
use recast::transform::sanity::verify_module;
use recast::{parse_module, resolve, TargetProbe};

fn bindings(pairs: &[(&str, i64)]) -> Bindings {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

const OVERLOADS: &str = r#"
    fn @_R3addii(i32 %a, i32 %b) -> i32 {
      entry:
        %s = add.i32 %a, %b
        ret.i32 %s
    }

    fn @_R3addll(i64 %a, i64 %b) -> i64 {
      entry:
        %s = add.i64 %a, %b
        ret.i64 %s
    }
"#;

#[test]
fn residual_params_keep_original_order() {
    let src = r#"
        fn @_R3mixlib(i64 %p, i32 %q, bool %r) -> i64 {
          entry:
            %qw = zext.i32.i64 %q
            %rw = zext.bool.i64 %r
            %a = add.i64 %p, %qw
            %b = add.i64 %a, %rw
            ret.i64 %b
        }
    "#;
    let mut module = parse_module(src).unwrap();
    let probe = TargetProbe::probe();
    let outcome =
        specialize_in_module(&mut module, "_R3mixlib", &bindings(&[("q", 7)]), &probe).unwrap();

    assert_eq!(outcome.original_params, 3);
    assert_eq!(outcome.residual_params, 2);

    let clone = module.get_function(&outcome.name).unwrap();
    let names: Vec<&str> = clone
        .signature
        .params
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, vec!["p", "r"]);
    verify_module(&module).unwrap();
}

#[test]
fn overloads_produce_distinct_specialized_names() {
    let mut module = parse_module(OVERLOADS).unwrap();
    let probe = TargetProbe::probe();
    let b = bindings(&[("a", 1)]);

    let narrow = specialize_in_module(&mut module, "_R3addii", &b, &probe).unwrap();
    let wide = specialize_in_module(&mut module, "_R3addll", &b, &probe).unwrap();

    assert_ne!(narrow.name, wide.name);
    assert!(narrow.name.starts_with("add_a_1_"));
    assert!(wide.name.starts_with("add_a_1_"));
    assert_eq!(module.function_count(), 4);
}

#[test]
fn specialization_is_idempotent() {
    let mut module = parse_module(OVERLOADS).unwrap();
    let probe = TargetProbe::probe();
    let b = bindings(&[("a", 5), ("b", 6)]);

    let first = specialize_in_module(&mut module, "_R3addii", &b, &probe).unwrap();
    let second = specialize_in_module(&mut module, "_R3addii", &b, &probe).unwrap();

    assert_eq!(first.name, second.name);
    assert!(!first.already_present);
    assert!(second.already_present);
    assert_eq!(module.function_count(), 3);

    let clone = module.get_function(&first.name).unwrap();
    assert!(clone.signature.params.is_empty());
}

#[test]
fn specialized_name_is_deterministic() {
    let b = bindings(&[("N", 64)]);
    assert_eq!(
        specialized_name("hot_loop(ptr, i32)", &b),
        specialized_name("hot_loop(ptr, i32)", &b)
    );
    assert_ne!(
        specialized_name("hot_loop(ptr, i32)", &b),
        specialized_name("hot_loop(ptr, i64)", &b)
    );
}

#[test]
fn resolver_accepts_spelling_variants() {
    let module = parse_module(OVERLOADS).unwrap();

    let exact = resolve::find_function(&module, "add(i32, i32)").unwrap();
    assert_eq!(exact.name, "_R3addii");

    let squeezed = resolve::find_function(&module, "add(i64,i64)").unwrap();
    assert_eq!(squeezed.name, "_R3addll");

    // A bare prefix is ambiguous between the overloads; the resolver warns
    // and picks one rather than failing.
    let prefix = resolve::find_function(&module, "add(").unwrap();
    assert!(prefix.name.starts_with("_R3add"));

    assert!(resolve::find_function(&module, "multiply(").is_none());
}

#[test]
fn unmatched_binding_keys_are_dropped() {
    let mut module = parse_module(OVERLOADS).unwrap();
    let probe = TargetProbe::probe();

    let outcome = specialize_in_module(
        &mut module,
        "_R3addii",
        &bindings(&[("a", 1), ("nonexistent", 9)]),
        &probe,
    )
    .unwrap();

    // Only 'a' was consumed; the stray key shows up in the name but not in
    // the residual signature.
    assert_eq!(outcome.residual_params, 1);
    verify_module(&module).unwrap();
}
