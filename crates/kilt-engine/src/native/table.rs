//! Table-driven native resolver

use rustc_hash::FxHashMap;

use super::{NativeAddress, NativeEntry, NativeResolver};

#[derive(Debug, Clone)]
struct TableEntry {
    arity: usize,
    address: NativeAddress,
    auto_setup_scope: bool,
}

/// Resolver backed by a static table of `(name, arity) -> address`
#[derive(Debug, Clone, Default)]
pub struct NativeTable {
    entries: FxHashMap<String, Vec<TableEntry>>,
    symbols: FxHashMap<NativeAddress, String>,
    bootstrap: bool,
}

impl NativeTable {
    /// Table for an embedder library
    pub fn new() -> Self {
        Self::default()
    }

    /// Table for a core library (entries are bootstrap natives)
    pub fn bootstrap() -> Self {
        NativeTable {
            bootstrap: true,
            ..Self::default()
        }
    }

    /// Add an entry
    pub fn add(&mut self, name: &str, arity: usize, address: NativeAddress, auto_setup_scope: bool) {
        self.entries.entry(name.to_string()).or_default().push(TableEntry {
            arity,
            address,
            auto_setup_scope,
        });
        self.symbols.insert(address, name.to_string());
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl NativeResolver for NativeTable {
    fn resolve(&self, name: &str, arity: usize) -> Option<NativeEntry> {
        self.entries
            .get(name)?
            .iter()
            .find(|e| e.arity == arity)
            .map(|e| NativeEntry {
                address: e.address,
                auto_setup_scope: e.auto_setup_scope,
                is_bootstrap: self.bootstrap,
            })
    }

    fn symbol(&self, address: NativeAddress) -> Option<String> {
        self.symbols.get(&address).cloned()
    }
}
