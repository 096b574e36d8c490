//! Symbol resolution by demangled signature.
//!
//! Callers name functions the way a human reads them: `hot_loop(ptr, i32)`.
//! Matching is whitespace-insensitive and accepts a prefix of the candidate,
//! so `hot_loop(ptr` and `hot_loop(ptr,i32)` both resolve. Prefix tolerance
//! insulates callers from trailing qualifiers and type-spelling drift in the
//! producing toolchain.

use tracing::{debug, warn};

use crate::demangle;
use crate::ir::{Function, Module};

/// The demangled signature of a function: from its mangled symbol when it
/// demangles, otherwise rendered from the IR signature.
pub fn demangled_signature(func: &Function) -> String {
    demangle::demangle(&func.name).unwrap_or_else(|| func.rendered_signature())
}

fn normalize(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Find a defined function whose demangled signature equals or starts with
/// the query (whitespace removed from both sides).
///
/// Candidates are scanned in module insertion order. When several match, a
/// warning is emitted and the shortest demangled name wins, first one on
/// ties.
pub fn find_function<'m>(module: &'m Module, query: &str) -> Option<&'m Function> {
    let normalized_query = normalize(query);
    let mut matches: Vec<(&'m Function, String)> = Vec::new();

    for func in module.functions() {
        if func.is_declaration() {
            continue;
        }
        let demangled = demangled_signature(func);
        let normalized = normalize(&demangled);
        if normalized == normalized_query || normalized.starts_with(&normalized_query) {
            debug!(symbol = %func.name, %demangled, "resolver candidate");
            matches.push((func, demangled));
        }
    }

    if matches.len() > 1 {
        let names: Vec<&str> = matches.iter().map(|(_, d)| d.as_str()).collect();
        warn!(query, candidates = ?names, "ambiguous function query");
        eprintln!(
            "find_function: query '{}' matches {} candidates, picking shortest",
            query,
            matches.len()
        );
        matches.sort_by_key(|(_, d)| d.len());
    }

    matches.into_iter().next().map(|(f, _)| f)
}
