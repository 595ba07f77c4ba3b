//! Interned symbol names and the function symbol table.
//!
//! Attributes refer to functions through [`Symbol`] handles, never through
//! arena ids: a function may be renamed or removed between verifications, so
//! lookups always go through a [`SymbolTable`] built from the current module.

use std::collections::HashMap;

use crate::ir::{FuncId, Module};

/// Interned name handle. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// String interner owned by a [`Module`].
#[derive(Debug, Default)]
pub struct Interner {
    names: Vec<String>,
    lookup: HashMap<String, Symbol>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(&sym) = self.lookup.get(name) {
            return sym;
        }
        let sym = Symbol(self.names.len() as u32);
        self.names.push(name.to_string());
        self.lookup.insert(name.to_string(), sym);
        sym
    }

    /// Look up an already-interned name.
    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.lookup.get(name).copied()
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.names[sym.index()]
    }
}

/// Name → function resolution for one module snapshot.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: HashMap<Symbol, FuncId>,
    duplicates: Vec<(Symbol, FuncId)>,
}

impl SymbolTable {
    /// Build the table from the module's current function list.
    ///
    /// Functions without a name are not entered. A second function with an
    /// already-used name is recorded as a duplicate and not entered.
    pub fn build(module: &Module) -> Self {
        let mut table = SymbolTable::default();
        for func in module.functions() {
            let Some(name) = module.function(func).name() else {
                continue;
            };
            if table.entries.contains_key(&name) {
                table.duplicates.push((name, func));
            } else {
                table.entries.insert(name, func);
            }
        }
        table
    }

    pub fn lookup(&self, sym: Symbol) -> Option<FuncId> {
        self.entries.get(&sym).copied()
    }

    /// Look up by string; `None` when the name was never interned or is absent.
    pub fn lookup_name(&self, module: &Module, name: &str) -> Option<FuncId> {
        module.interner().get(name).and_then(|sym| self.lookup(sym))
    }

    pub fn contains(&self, sym: Symbol) -> bool {
        self.entries.contains_key(&sym)
    }

    /// Functions whose name collided with an earlier one.
    pub fn duplicates(&self) -> &[(Symbol, FuncId)] {
        &self.duplicates
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
