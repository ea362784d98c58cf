//! Interned field and method names

use rustc_hash::FxHashMap;
use std::fmt;
use std::rc::Rc;

/// Interned name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// Index into the symbol table
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Structural method signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    /// Method name
    pub name: Symbol,
    /// Argument count
    pub arity: u16,
}

impl MethodKey {
    /// Create a key
    pub fn new(name: Symbol, arity: u16) -> Self {
        Self { name, arity }
    }
}

/// Name interner shared by the whole program
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    ids: FxHashMap<Rc<str>, Symbol>,
    names: Vec<Rc<str>>,
}

impl SymbolTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&symbol) = self.ids.get(name) {
            return symbol;
        }
        let symbol = Symbol(self.names.len() as u32);
        let name: Rc<str> = Rc::from(name);
        self.names.push(Rc::clone(&name));
        self.ids.insert(name, symbol);
        symbol
    }

    /// Look up a name without interning it
    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.ids.get(name).copied()
    }

    /// Name of a symbol
    pub fn name(&self, symbol: Symbol) -> &str {
        self.names.get(symbol.index()).map_or("?", |n| n)
    }

    /// Render a method key as `name/arity`
    pub fn signature(&self, key: MethodKey) -> String {
        format!("{}/{}", self.name(key.name), key.arity)
    }

    /// Number of interned names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if no name is interned
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
