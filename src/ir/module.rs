//! Module container for the recast IR.
//!
//! A module owns type declarations, global declarations, and functions.
//! Functions are addressable by mangled symbol name; insertion order is
//! preserved because symbol resolution tie-breaks on it and the printed form
//! should be stable across print/reparse round trips.

use std::collections::HashMap;
use std::fmt;

use super::function::Function;
use super::types::{Literal, Type};

/// A named type declaration, e.g. `type @Vec2 = struct { ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDeclaration {
    pub name: String,
    pub ty: Type,
}

/// A global variable declaration, e.g. `global @count: i64 = 10`.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDeclaration {
    pub name: String,
    pub ty: Type,
    /// Globals without an initializer are external.
    pub initializer: Option<Literal>,
}

/// A complete recast IR module.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub type_declarations: HashMap<String, TypeDeclaration>,
    pub global_declarations: HashMap<String, GlobalDeclaration>,
    functions: HashMap<String, Function>,
    /// Symbol names in insertion order.
    order: Vec<String>,
}

impl Module {
    pub fn new() -> Self {
        Module::default()
    }

    pub fn add_function(&mut self, func: Function) {
        if !self.functions.contains_key(&func.name) {
            self.order.push(func.name.clone());
        }
        self.functions.insert(func.name.clone(), func);
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn get_function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.get_mut(name)
    }

    pub fn contains_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Functions in insertion order.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.order.iter().filter_map(|name| self.functions.get(name))
    }

    /// Symbol names in insertion order.
    pub fn function_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Apply a mutation to every function.
    pub fn for_each_function_mut<F: FnMut(&mut Function)>(&mut self, mut f: F) {
        for name in &self.order {
            if let Some(func) = self.functions.get_mut(name) {
                f(func);
            }
        }
    }

    /// Resolve a named type to its declaration.
    pub fn resolve_type<'m>(&'m self, ty: &'m Type) -> &'m Type {
        if let Type::Named(name) = ty {
            if let Some(decl) = self.type_declarations.get(name) {
                return &decl.ty;
            }
        }
        ty
    }
}

// --- Display implementations ---

impl fmt::Display for TypeDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type @{} = {}", self.name, self.ty)
    }
}

impl fmt::Display for GlobalDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "global @{}: {}", self.name, self.ty)?;
        if let Some(init) = &self.initializer {
            write!(f, " = {}", init)?;
        }
        Ok(())
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut type_names: Vec<_> = self.type_declarations.keys().collect();
        type_names.sort();
        for name in &type_names {
            writeln!(f, "{}", self.type_declarations[*name])?;
        }
        if !type_names.is_empty() {
            writeln!(f)?;
        }

        let mut global_names: Vec<_> = self.global_declarations.keys().collect();
        global_names.sort();
        for name in &global_names {
            writeln!(f, "{}", self.global_declarations[*name])?;
        }
        if !global_names.is_empty() {
            writeln!(f)?;
        }

        let count = self.order.len();
        for (i, name) in self.order.iter().enumerate() {
            if let Some(func) = self.functions.get(name) {
                write!(f, "{}", func)?;
                if i < count - 1 {
                    writeln!(f)?;
                }
            }
        }

        Ok(())
    }
}
