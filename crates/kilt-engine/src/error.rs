//! Error types
//!
//! Every error here is an internal compiler failure: malformed input or a
//! violated builder invariant. Failures of the compiled program (type errors,
//! null dereferences, bad argument shapes) are emitted as IL throw paths and
//! never show up as Rust errors.

use crate::il::BlockId;
use crate::kernel::{ScopeId, VariableId};
use crate::object::{ClassId, FunctionId, LibraryId, TypeId};

/// Error while building a flow graph
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    /// Popped more values than were pushed
    #[error("Value stack underflow in {function}")]
    StackUnderflow {
        /// Function being built
        function: FunctionId,
    },
    /// Asked for a context deeper than the current chain
    #[error("Context depth underflow: target {target}, current {current}")]
    ContextDepthUnderflow {
        /// Requested level
        target: usize,
        /// Depth of the live chain
        current: usize,
    },
    /// Scope exit left the context chain at the wrong depth
    #[error("Unbalanced scope {scope:?}: context depth {depth} at exit, expected {expected}")]
    UnbalancedScope {
        /// Scope being left
        scope: ScopeId,
        /// Actual context depth
        depth: usize,
        /// Depth the scope was entered at
        expected: usize,
    },
    /// A required library member is absent
    #[error("Missing target `{name}` for {function}")]
    MissingTarget {
        /// Function being built
        function: FunctionId,
        /// Name of the missing member
        name: String,
    },
    /// Variable id not in the function's scope layout
    #[error("Unknown variable {0:?}")]
    UnknownVariable(VariableId),
    /// Scope id not in the function's scope layout
    #[error("Unknown scope {0:?}")]
    UnknownScope(ScopeId),
    /// Function body without scope layout
    #[error("No scope information for {0}")]
    MissingScopes(FunctionId),
    /// Predecessors of a join disagree on stack depth
    #[error("Stack depth mismatch at join {block}: {expected} vs {actual}")]
    JoinStackMismatch {
        /// Join block
        block: BlockId,
        /// Depth recorded by the first predecessor
        expected: usize,
        /// Depth of the later predecessor
        actual: usize,
    },
    /// A call popped a value that was not pushed as an argument
    #[error("Expected PushArgument on the value stack in {function}")]
    MissingPushArgument {
        /// Function being built
        function: FunctionId,
    },
    /// Construct the builder does not handle
    #[error("Unsupported {what} in {function}")]
    Unsupported {
        /// Function being built
        function: FunctionId,
        /// Description of the construct
        what: String,
    },
    /// Native function could not be bound
    #[error("Native resolution failed: {0}")]
    Native(#[from] ResolveError),
}

/// Result alias used by every builder primitive
pub type BuildResult<T> = Result<T, BuildError>;

/// Error while generating or installing a type testing stub
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StubError {
    /// Generator has no hierarchy oracle
    #[error("No class hierarchy information for {0}")]
    NoHierarchy(ClassId),
    /// Type is not range-checkable
    #[error("Type {0} cannot use a specialised stub")]
    NotSpecializable(TypeId),
    /// Assembled routine larger than the configured limit
    #[error("Stub for {ty} exceeds {limit} bytes")]
    TooLarge {
        /// Type the stub tests
        ty: TypeId,
        /// Configured byte limit
        limit: usize,
    },
    /// Mutators did not stop for publication
    #[error("Install failed for {ty}: {reason}")]
    InstallFailed {
        /// Type the stub tests
        ty: TypeId,
        /// What went wrong
        reason: String,
    },
}

/// Error from the native function resolver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Library declares natives but cannot resolve them
    #[error("Library {0:?} has no native resolver")]
    NoResolver(LibraryId),
    /// Resolver does not know the symbol
    #[error("Native function `{name}` not found (arity {arity})")]
    NotFound {
        /// Native symbol
        name: String,
        /// Argument count of the declaration
        arity: usize,
    },
    /// Type argument count differs from the declaration
    #[error("Wrong number of type arguments ({actual}), expected {expected} type arguments")]
    WrongTypeArgumentCount {
        /// Type arguments supplied
        actual: usize,
        /// Type parameters declared
        expected: usize,
    },
}

/// Error while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Config file is not valid JSON for the expected shape
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
