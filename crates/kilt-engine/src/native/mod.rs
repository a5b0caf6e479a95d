//! Native function resolution
//!
//! Each library may register a resolver mapping native symbol names to entry
//! points. Natives in libraries without a resolver cannot be linked.

pub mod table;

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::ResolveError;
use crate::object::{FunctionId, LibraryId, ObjectStore};

pub use table::NativeTable;

/// Address of a native entry point
pub type NativeAddress = usize;

/// How generated code enters a native function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallWrapper {
    /// Core library native, called directly with the VM's argument layout
    Bootstrap,
    /// Embedder native that gets an API scope set up around the call
    AutoScope,
    /// Embedder native that manages its own scope
    NoScope,
}

/// A resolved native function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeEntry {
    /// Entry point
    pub address: NativeAddress,
    /// Whether an API scope must be set up around the call
    pub auto_setup_scope: bool,
    /// Resolved by a core library resolver
    pub is_bootstrap: bool,
}

impl NativeEntry {
    /// Wrapper the call site is patched to use
    pub fn wrapper(&self) -> CallWrapper {
        if self.is_bootstrap {
            CallWrapper::Bootstrap
        } else if self.auto_setup_scope {
            CallWrapper::AutoScope
        } else {
            CallWrapper::NoScope
        }
    }
}

/// Resolver registered for one library
pub trait NativeResolver: Send + Sync {
    /// Entry point for `name` called with `arity` arguments
    fn resolve(&self, name: &str, arity: usize) -> Option<NativeEntry>;

    /// Reverse lookup of an entry point (diagnostics only)
    fn symbol(&self, _address: NativeAddress) -> Option<String> {
        None
    }
}

/// Resolvers of every library
#[derive(Default)]
pub struct NativeRegistry {
    resolvers: RwLock<FxHashMap<LibraryId, Arc<dyn NativeResolver>>>,
}

impl NativeRegistry {
    /// Registry with no resolvers
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the resolver of `library`, replacing any previous one
    pub fn register(&self, library: LibraryId, resolver: Arc<dyn NativeResolver>) {
        self.resolvers.write().insert(library, resolver);
    }

    /// Resolve `name` in `library`
    pub fn resolve_native(
        &self,
        store: &ObjectStore,
        library: LibraryId,
        name: &str,
        arity: usize,
    ) -> Result<NativeEntry, ResolveError> {
        if !store.library(library).has_native_resolver {
            return Err(ResolveError::NoResolver(library));
        }
        let resolver = self
            .resolvers
            .read()
            .get(&library)
            .cloned()
            .ok_or(ResolveError::NoResolver(library))?;
        let entry = resolver.resolve(name, arity).ok_or_else(|| ResolveError::NotFound {
            name: name.to_string(),
            arity,
        })?;
        trace!(target: "kilt::native", name, arity, address = entry.address, "resolved native");
        Ok(entry)
    }

    /// Resolve the native body of `function` in its owner's library
    pub fn resolve_function(&self, store: &ObjectStore, function: FunctionId) -> Result<NativeEntry, ResolveError> {
        let f = store.function(function);
        let name = f.native_name.clone().unwrap_or_else(|| f.name.clone());
        let library = store
            .class(f.owner)
            .library
            .unwrap_or(store.core().library);
        self.resolve_native(store, library, &name, parameter_count_for_resolution(store, function))
    }

    /// Symbol of a native entry point in any library
    pub fn resolve_symbol(&self, address: NativeAddress) -> Option<String> {
        self.resolvers
            .read()
            .values()
            .find_map(|r| r.symbol(address))
    }
}

/// Arguments a native body receives: every parameter plus the type-argument
/// vector of generic functions
pub fn parameter_count_for_resolution(store: &ObjectStore, function: FunctionId) -> usize {
    let f = store.function(function);
    f.num_parameters() + usize::from(f.is_generic())
}

/// Check the type-argument count passed to a generic native
pub fn check_type_argument_count(actual: usize, expected: usize) -> Result<(), ResolveError> {
    if actual == expected {
        Ok(())
    } else {
        Err(ResolveError::WrongTypeArgumentCount { actual, expected })
    }
}
