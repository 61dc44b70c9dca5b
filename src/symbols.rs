//! Feature-name symbol table

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Append-only bijection between feature names and dense ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Symbols {
    ids: HashMap<String, u32>,
    names: Vec<String>,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `name`, allocating the next one if it is new.
    pub fn index(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.ids.insert(name.to_string(), id);
        self.names.push(name.to_string());
        id
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    pub fn symbol(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// `(name, id)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.names.iter().enumerate().map(|(i, s)| (s.as_str(), i as u32))
    }

    /// New table keeping only ids present in `old_to_new`, at their new ids.
    ///
    /// `old_to_new` must map onto a dense range starting at zero; ids without
    /// a name are given a synthetic one.
    pub fn remapped(&self, old_to_new: &BTreeMap<u32, u32>) -> Symbols {
        let mut by_new: BTreeMap<u32, String> = BTreeMap::new();
        for (&old, &new) in old_to_new {
            let name = match self.symbol(old) {
                Some(name) => name.to_string(),
                None => format!("__id_{}", old),
            };
            by_new.insert(new, name);
        }
        Symbols::from(by_new.into_values().collect::<Vec<_>>())
    }
}

impl From<Vec<String>> for Symbols {
    fn from(names: Vec<String>) -> Self {
        let ids = names
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as u32))
            .collect();
        Self { ids, names }
    }
}

impl From<Symbols> for Vec<String> {
    fn from(symbols: Symbols) -> Self {
        symbols.names
    }
}
