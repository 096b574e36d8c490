//! Type system for the recast IR.
//!
//! Primitive scalars, composite types, and the value forms instructions
//! operate on. Identifiers are owned strings: the engine creates new names at
//! runtime (specialized clones, inlined bodies) that outlive any source text.

use std::fmt;

/// Primitive types in the recast IR.
///
/// These are the scalar types the target can operate on directly. `Ptr` is an
/// untyped address the width of the target's pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Ptr,
}

impl PrimitiveType {
    /// Returns the string representation of this primitive type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PrimitiveType::I8 => "i8",
            PrimitiveType::I16 => "i16",
            PrimitiveType::I32 => "i32",
            PrimitiveType::I64 => "i64",
            PrimitiveType::U8 => "u8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
            PrimitiveType::Bool => "bool",
            PrimitiveType::Ptr => "ptr",
        }
    }

    /// Parse a primitive type name.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "i8" => PrimitiveType::I8,
            "i16" => PrimitiveType::I16,
            "i32" => PrimitiveType::I32,
            "i64" => PrimitiveType::I64,
            "u8" => PrimitiveType::U8,
            "u16" => PrimitiveType::U16,
            "u32" => PrimitiveType::U32,
            "u64" => PrimitiveType::U64,
            "f32" => PrimitiveType::F32,
            "f64" => PrimitiveType::F64,
            "bool" => PrimitiveType::Bool,
            "ptr" => PrimitiveType::Ptr,
            _ => return None,
        })
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            PrimitiveType::I8
                | PrimitiveType::I16
                | PrimitiveType::I32
                | PrimitiveType::I64
                | PrimitiveType::U8
                | PrimitiveType::U16
                | PrimitiveType::U32
                | PrimitiveType::U64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            PrimitiveType::I8 | PrimitiveType::I16 | PrimitiveType::I32 | PrimitiveType::I64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, PrimitiveType::F32 | PrimitiveType::F64)
    }

    /// Size in bytes, assuming a 64-bit target pointer.
    pub fn byte_size(&self) -> u32 {
        match self {
            PrimitiveType::I8 | PrimitiveType::U8 | PrimitiveType::Bool => 1,
            PrimitiveType::I16 | PrimitiveType::U16 => 2,
            PrimitiveType::I32 | PrimitiveType::U32 | PrimitiveType::F32 => 4,
            PrimitiveType::I64 | PrimitiveType::U64 | PrimitiveType::F64 | PrimitiveType::Ptr => 8,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Primitive(PrimitiveType),
    /// Reference to a declared type, like "@Vec2"
    Named(String),
    Array {
        element_type: Box<Type>,
        size: u64,
    },
    Struct(Vec<StructField>),
    /// For functions that don't return a value
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
}

impl Literal {
    /// Build a literal of the given primitive type from a signed integer.
    ///
    /// Returns `None` for float and pointer types: specialization bindings
    /// are integer-only.
    pub fn from_i64(ty: PrimitiveType, value: i64) -> Option<Literal> {
        Some(match ty {
            PrimitiveType::I8 => Literal::I8(value as i8),
            PrimitiveType::I16 => Literal::I16(value as i16),
            PrimitiveType::I32 => Literal::I32(value as i32),
            PrimitiveType::I64 => Literal::I64(value),
            PrimitiveType::U8 => Literal::U8(value as u8),
            PrimitiveType::U16 => Literal::U16(value as u16),
            PrimitiveType::U32 => Literal::U32(value as u32),
            PrimitiveType::U64 => Literal::U64(value as u64),
            PrimitiveType::Bool => Literal::Bool(value != 0),
            PrimitiveType::F32 | PrimitiveType::F64 | PrimitiveType::Ptr => return None,
        })
    }

    /// The integer value of this literal, if it has one.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match self {
            Literal::I8(v) => *v as i64,
            Literal::I16(v) => *v as i64,
            Literal::I32(v) => *v as i64,
            Literal::I64(v) => *v,
            Literal::U8(v) => *v as i64,
            Literal::U16(v) => *v as i64,
            Literal::U32(v) => *v as i64,
            Literal::U64(v) => *v as i64,
            Literal::Bool(v) => *v as i64,
            Literal::F32(_) | Literal::F64(_) => return None,
        })
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            Literal::I8(_) => PrimitiveType::I8,
            Literal::I16(_) => PrimitiveType::I16,
            Literal::I32(_) => PrimitiveType::I32,
            Literal::I64(_) => PrimitiveType::I64,
            Literal::U8(_) => PrimitiveType::U8,
            Literal::U16(_) => PrimitiveType::U16,
            Literal::U32(_) => PrimitiveType::U32,
            Literal::U64(_) => PrimitiveType::U64,
            Literal::F32(_) => PrimitiveType::F32,
            Literal::F64(_) => PrimitiveType::F64,
            Literal::Bool(_) => PrimitiveType::Bool,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SSA register/variable, like "%result"
    Variable(String),
    /// Literal values used directly in instructions
    Constant(Literal),
    /// Reference to a global variable, like "@message"
    Global(String),
}

impl Value {
    pub fn var(name: impl Into<String>) -> Value {
        Value::Variable(name.into())
    }

    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Value::Variable(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Value::Constant(lit) => Some(lit),
            _ => None,
        }
    }
}

// --- Display implementations ---

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(pt) => write!(f, "{}", pt),
            Type::Named(id) => write!(f, "@{}", id),
            Type::Array { element_type, size } => write!(f, "[{} x {}]", size, element_type),
            Type::Struct(fields) => {
                write!(f, "struct {{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    write!(f, "{}: {}", field.name, field.ty)?;
                    if i < fields.len() - 1 {
                        write!(f, ", ")?;
                    }
                }
                write!(f, " }}")
            }
            Type::Void => write!(f, "void"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::I8(v) => write!(f, "{}", v),
            Literal::I16(v) => write!(f, "{}", v),
            Literal::I32(v) => write!(f, "{}", v),
            Literal::I64(v) => write!(f, "{}", v),
            Literal::U8(v) => write!(f, "{}", v),
            Literal::U16(v) => write!(f, "{}", v),
            Literal::U32(v) => write!(f, "{}", v),
            Literal::U64(v) => write!(f, "{}", v),
            Literal::F32(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Literal::F64(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Literal::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Variable(id) => write!(f, "%{id}"),
            Value::Constant(lit) => write!(f, "{}", lit),
            Value::Global(id) => write!(f, "@{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_primitive_type() {
        assert_eq!(format!("{}", PrimitiveType::I32), "i32");
        assert_eq!(format!("{}", PrimitiveType::U64), "u64");
        assert_eq!(format!("{}", PrimitiveType::F32), "f32");
        assert_eq!(format!("{}", PrimitiveType::Bool), "bool");
        assert_eq!(format!("{}", PrimitiveType::Ptr), "ptr");
    }

    #[test]
    fn test_display_type() {
        assert_eq!(format!("{}", Type::Primitive(PrimitiveType::I64)), "i64");
        assert_eq!(format!("{}", Type::Named("MyStruct".to_string())), "@MyStruct");
        let arr_type = Type::Array {
            element_type: Box::new(Type::Primitive(PrimitiveType::I8)),
            size: 10,
        };
        assert_eq!(format!("{}", arr_type), "[10 x i8]");
        let struct_type = Type::Struct(vec![
            StructField {
                name: "x".to_string(),
                ty: Type::Primitive(PrimitiveType::F32),
            },
            StructField {
                name: "y".to_string(),
                ty: Type::Primitive(PrimitiveType::F32),
            },
        ]);
        assert_eq!(format!("{}", struct_type), "struct { x: f32, y: f32 }");
        assert_eq!(format!("{}", Type::Void), "void");
    }

    #[test]
    fn test_display_literal() {
        assert_eq!(format!("{}", Literal::I32(123)), "123");
        assert_eq!(format!("{}", Literal::I64(-456)), "-456");
        assert_eq!(format!("{}", Literal::F32(1.25)), "1.25");
        assert_eq!(format!("{}", Literal::F32(2.0)), "2.0");
        assert_eq!(format!("{}", Literal::Bool(true)), "true");
    }

    #[test]
    fn test_display_value() {
        assert_eq!(format!("{}", Value::var("tmp1")), "%tmp1");
        assert_eq!(format!("{}", Value::Constant(Literal::I32(42))), "42");
        assert_eq!(format!("{}", Value::Global("counter".to_string())), "@counter");
    }

    #[test]
    fn test_literal_from_i64_casts() {
        assert_eq!(Literal::from_i64(PrimitiveType::I32, 64), Some(Literal::I32(64)));
        assert_eq!(Literal::from_i64(PrimitiveType::Bool, 1), Some(Literal::Bool(true)));
        assert_eq!(Literal::from_i64(PrimitiveType::Bool, 0), Some(Literal::Bool(false)));
        assert_eq!(Literal::from_i64(PrimitiveType::U8, 300), Some(Literal::U8(44)));
        assert_eq!(Literal::from_i64(PrimitiveType::F32, 1), None);
        assert_eq!(Literal::from_i64(PrimitiveType::Ptr, 0), None);
    }

    #[test]
    fn test_primitive_byte_sizes() {
        assert_eq!(PrimitiveType::I8.byte_size(), 1);
        assert_eq!(PrimitiveType::F32.byte_size(), 4);
        assert_eq!(PrimitiveType::Ptr.byte_size(), 8);
    }
}
