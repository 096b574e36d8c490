//! Symbol mangling for the recast IR.
//!
//! Producers emit functions under compact mangled symbols so that overloads
//! sharing a base name stay distinct at link level:
//!
//! ```text
//! _R<len><name><code>*
//! ```
//!
//! `len` is the decimal length of the base name and each `code` encodes one
//! parameter type: a=i8 s=i16 i=i32 l=i64 h=u8 t=u16 j=u32 m=u64 f=f32
//! d=f64 b=bool p=ptr. `_R8hot_looppi` demangles to `hot_loop(ptr, i32)`.
//!
//! Symbols that do not start with `_R` are plain names; their demangled
//! signature is rendered from the function's IR signature instead.

use crate::ir::PrimitiveType;

/// Mangle a base name and parameter type list into a symbol.
pub fn mangle(name: &str, params: &[PrimitiveType]) -> String {
    let mut out = format!("_R{}{}", name.len(), name);
    for p in params {
        out.push(type_code(*p));
    }
    out
}

/// Demangle a symbol into `name(ty, ty, ...)`. Returns `None` for symbols
/// not produced by [`mangle`].
pub fn demangle(symbol: &str) -> Option<String> {
    let rest = symbol.strip_prefix("_R")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let len: usize = digits.parse().ok()?;
    let rest = &rest[digits.len()..];
    if rest.len() < len {
        return None;
    }
    let name = &rest[..len];
    let codes = &rest[len..];

    let mut params = Vec::new();
    for c in codes.chars() {
        params.push(type_from_code(c)?.as_str());
    }
    Some(format!("{}({})", name, params.join(", ")))
}

/// The base name of a demangled signature: everything before the first `(`.
pub fn basename(demangled: &str) -> &str {
    match demangled.find('(') {
        Some(pos) => &demangled[..pos],
        None => demangled,
    }
}

/// FNV-1a hash of a string, used to disambiguate overloads in specialized
/// names. Stable across runs and platforms.
pub fn fnv1a(text: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// The low eight hexadecimal digits of the signature hash.
pub fn hash8(text: &str) -> String {
    format!("{:08x}", fnv1a(text) & 0xffff_ffff)
}

fn type_code(ty: PrimitiveType) -> char {
    match ty {
        PrimitiveType::I8 => 'a',
        PrimitiveType::I16 => 's',
        PrimitiveType::I32 => 'i',
        PrimitiveType::I64 => 'l',
        PrimitiveType::U8 => 'h',
        PrimitiveType::U16 => 't',
        PrimitiveType::U32 => 'j',
        PrimitiveType::U64 => 'm',
        PrimitiveType::F32 => 'f',
        PrimitiveType::F64 => 'd',
        PrimitiveType::Bool => 'b',
        PrimitiveType::Ptr => 'p',
    }
}

fn type_from_code(c: char) -> Option<PrimitiveType> {
    Some(match c {
        'a' => PrimitiveType::I8,
        's' => PrimitiveType::I16,
        'i' => PrimitiveType::I32,
        'l' => PrimitiveType::I64,
        'h' => PrimitiveType::U8,
        't' => PrimitiveType::U16,
        'j' => PrimitiveType::U32,
        'm' => PrimitiveType::U64,
        'f' => PrimitiveType::F32,
        'd' => PrimitiveType::F64,
        'b' => PrimitiveType::Bool,
        'p' => PrimitiveType::Ptr,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mangle_demangle_roundtrip() {
        let sym = mangle("hot_loop", &[PrimitiveType::Ptr, PrimitiveType::I32]);
        assert_eq!(sym, "_R8hot_looppi");
        assert_eq!(demangle(&sym), Some("hot_loop(ptr, i32)".to_string()));
    }

    #[test]
    fn test_demangle_no_params() {
        let sym = mangle("main", &[]);
        assert_eq!(demangle(&sym), Some("main()".to_string()));
    }

    #[test]
    fn test_demangle_rejects_plain_symbols() {
        assert_eq!(demangle("hot_loop"), None);
        assert_eq!(demangle("_Rxyz"), None);
        assert_eq!(demangle("_R99short"), None);
    }

    #[test]
    fn test_overloads_get_distinct_symbols() {
        let a = mangle("add", &[PrimitiveType::I32, PrimitiveType::I32]);
        let b = mangle("add", &[PrimitiveType::F32, PrimitiveType::F32]);
        assert_ne!(a, b);
        assert_eq!(basename(&demangle(&a).unwrap()), "add");
        assert_eq!(basename(&demangle(&b).unwrap()), "add");
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("hot_loop(ptr, i32)"), "hot_loop");
        assert_eq!(basename("plain_name"), "plain_name");
    }

    #[test]
    fn test_hash8_is_deterministic_and_distinguishes() {
        let a = hash8("add(i32, i32)");
        let b = hash8("add(f32, f32)");
        assert_eq!(a.len(), 8);
        assert_eq!(a, hash8("add(i32, i32)"));
        assert_ne!(a, b);
    }
}
