//! Node and function attributes.

use std::collections::BTreeMap;

use crate::symbol::Symbol;
use crate::types::{ElementType, Shape, Type};

/// An attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    /// Presence-only flag.
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A bare dtype, e.g. `T = f32`.
    DType(ElementType),
    Type(Type),
    Shape(Shape),
    /// Reference to a function by name.
    Symbol(Symbol),
    Array(Vec<Attr>),
    Dict(AttrDict),
}

impl Attr {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attr::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attr::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attr::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Attr::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_dtype(&self) -> Option<ElementType> {
        match self {
            Attr::DType(e) => Some(*e),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Attr]> {
        match self {
            Attr::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&AttrDict> {
        match self {
            Attr::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// An array of dtypes (`Tin`, `Tout`, `T`).
    pub fn as_dtype_list(&self) -> Option<Vec<ElementType>> {
        self.as_array()?.iter().map(Attr::as_dtype).collect()
    }

    /// An array of symbols (`branches`).
    pub fn as_symbol_list(&self) -> Option<Vec<Symbol>> {
        self.as_array()?.iter().map(Attr::as_symbol).collect()
    }

    pub fn dtype_list(elements: impl IntoIterator<Item = ElementType>) -> Attr {
        Attr::Array(elements.into_iter().map(Attr::DType).collect())
    }

    /// Interpret a constant operand value as a branch predicate.
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            Attr::Bool(b) => Some(*b),
            Attr::Int(i) => Some(*i != 0),
            Attr::Float(f) => Some(*f != 0.0),
            _ => None,
        }
    }

    /// Every symbol referenced by this attribute, including nested ones.
    pub fn collect_symbols(&self, out: &mut Vec<Symbol>) {
        match self {
            Attr::Symbol(s) => out.push(*s),
            Attr::Array(items) => items.iter().for_each(|a| a.collect_symbols(out)),
            Attr::Dict(d) => d.values().for_each(|a| a.collect_symbols(out)),
            _ => {}
        }
    }
}

/// Attribute dictionary, ordered by key so printing is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrDict {
    entries: BTreeMap<String, Attr>,
}

impl AttrDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: Attr) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: Attr) -> Option<Attr> {
        self.entries.insert(key.to_string(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Attr> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Attr> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Attr)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &Attr> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Attr)> for AttrDict {
    fn from_iter<I: IntoIterator<Item = (String, Attr)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Interner;

    #[test]
    fn dict_is_key_ordered() {
        let dict = AttrDict::new()
            .with("zeta", Attr::Int(1))
            .with("alpha", Attr::Bool(true))
            .with("mid", Attr::Unit);
        let keys: Vec<&str> = dict.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn typed_lists() {
        let tout = Attr::dtype_list([ElementType::F32, ElementType::I32]);
        assert_eq!(
            tout.as_dtype_list(),
            Some(vec![ElementType::F32, ElementType::I32])
        );
        let mixed = Attr::Array(vec![Attr::DType(ElementType::F32), Attr::Int(3)]);
        assert_eq!(mixed.as_dtype_list(), None);
    }

    #[test]
    fn nested_symbols_are_collected() {
        let mut interner = Interner::new();
        let a = interner.intern("a");
        let b = interner.intern("b");
        let attr = Attr::Array(vec![
            Attr::Symbol(a),
            Attr::Dict(AttrDict::new().with("f", Attr::Symbol(b))),
        ]);
        let mut out = Vec::new();
        attr.collect_symbols(&mut out);
        assert_eq!(out, [a, b]);
    }

    #[test]
    fn truthiness_of_constants() {
        assert_eq!(Attr::Int(0).truthiness(), Some(false));
        assert_eq!(Attr::Int(-2).truthiness(), Some(true));
        assert_eq!(Attr::Bool(true).truthiness(), Some(true));
        assert_eq!(Attr::Str("x".into()).truthiness(), None);
    }
}
