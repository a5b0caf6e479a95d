//! Kernel form: typed function bodies and their scope layouts

pub mod ast;
pub mod scope;

use rustc_hash::FxHashMap;

use crate::object::FunctionId;

pub use ast::{Arguments, Catch, Expression, Statement};
pub use scope::{
    CatchVariables, LocalScope, LocalVariable, ScopeId, ScopeProvider, ScopeTree,
    ScopeTreeBuilder, VariableId, VariableLocation,
};

/// Bodies and scope layouts of a whole program
#[derive(Debug, Clone, Default)]
pub struct KernelProgram {
    bodies: FxHashMap<FunctionId, Statement>,
    scopes: FxHashMap<FunctionId, ScopeTree>,
}

impl KernelProgram {
    /// Empty program
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the body of `function` with its scope layout
    pub fn add_body(&mut self, function: FunctionId, body: Statement, scopes: ScopeTree) {
        self.bodies.insert(function, body);
        self.scopes.insert(function, scopes);
    }

    /// Body of `function`
    pub fn body(&self, function: FunctionId) -> Option<&Statement> {
        self.bodies.get(&function)
    }

    /// Functions with a registered body
    pub fn functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.bodies.keys().copied()
    }
}

impl ScopeProvider for KernelProgram {
    fn scopes(&self, function: FunctionId) -> Option<&ScopeTree> {
        self.scopes.get(&function)
    }
}
