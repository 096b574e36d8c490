use std::env;
use std::process::exit;

use recast::{Bindings, Engine};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: recast <input.rcir> [function] [name=value ...]");
        exit(1);
    }

    let input_path = &args[1];
    let mut engine = Engine::new();
    engine.load_ir_file(input_path);

    // With no function argument, just describe what the module contains.
    let Some(function) = args.get(2) else {
        engine.print_debug_info();
        return;
    };

    let mut bindings = Bindings::new();
    for pair in &args[3..] {
        match pair.split_once('=') {
            Some((key, value)) => match value.parse::<i64>() {
                Ok(v) => {
                    bindings.insert(key.to_string(), v);
                }
                Err(_) => {
                    eprintln!("Error: binding '{}' is not an integer.", pair);
                    exit(1);
                }
            },
            None => {
                eprintln!("Error: expected name=value, got '{}'.", pair);
                exit(1);
            }
        }
    }

    let address = if bindings.is_empty() {
        engine.compile(function)
    } else {
        engine.compile_with(function, &bindings)
    };

    if address == 0 {
        eprintln!("[ERROR] Compilation of '{}' failed.", function);
        exit(1);
    }
    println!("[INFO] '{}' compiled at {:#x}", function, address);
}
