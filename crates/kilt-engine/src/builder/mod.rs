//! Kernel to IL flow graph builder
//!
//! Translates one function at a time into a [`FlowGraph`]. The builder keeps
//! a [`ValueStack`] of pending definitions next to the [`Fragment`] being
//! extended, and a [`ContextChain`] mirroring the heap contexts live at the
//! current point of emission.
//!
//! The work is split the same way the IL is: primitives in `base`, scope and
//! context handling in `scopes`, statements and expressions in `stmt` and
//! `expr`, and one module per family of synthetic function graphs.

pub mod context;
pub mod fragment;
pub mod stack;

mod base;
mod calls;
mod checks;
mod dispatchers;
mod exceptions;
mod expr;
mod ffi;
mod function;
mod prologue;
mod recognized;
mod scopes;
mod stmt;
mod synthetic;
mod type_args;

use std::borrow::Cow;

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::BuilderConfig;
use crate::error::BuildResult;
use crate::hierarchy::HierarchyOracle;
use crate::il::{FlowGraph, InstrId, PrologueInfo};
use crate::kernel::{CatchVariables, KernelProgram, ScopeId, ScopeProvider, ScopeTree};
use crate::native::NativeRegistry;
use crate::object::{Function, FunctionId, FunctionKind, ObjectStore};

pub use checks::TypeChecksToBuild;
pub use context::{ContextChain, ContextCursor, ContextFrame};
pub use fragment::Fragment;
pub use function::EntryPointStyle;
pub use prologue::{EmptyPrologue, PrologueBuilder, PrologueResult};
pub use stack::ValueStack;

static DEFAULT_CONFIG: Lazy<BuilderConfig> = Lazy::new(BuilderConfig::default);
static EMPTY_PROLOGUE: EmptyPrologue = EmptyPrologue;

/// Everything a graph build reads but never modifies
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    /// Classes, functions, fields and types
    pub store: &'a ObjectStore,
    /// Function bodies and their scope layouts
    pub program: &'a KernelProgram,
    /// Class hierarchy queries (subtype proofs for `as`)
    pub hierarchy: Option<&'a dyn HierarchyOracle>,
    /// Native resolvers, consulted when natives are linked eagerly
    pub natives: Option<&'a NativeRegistry>,
    /// Builds the argument-copying prologue of each function
    pub prologue: &'a dyn PrologueBuilder,
    /// Builder switches
    pub config: &'a BuilderConfig,
    /// On-stack replacement entry being compiled, if any
    pub osr_id: Option<u32>,
}

impl<'a> BuildContext<'a> {
    /// Context with the default configuration and an empty prologue
    pub fn new(store: &'a ObjectStore, program: &'a KernelProgram) -> Self {
        BuildContext {
            store,
            program,
            hierarchy: None,
            natives: None,
            prologue: &EMPTY_PROLOGUE,
            config: &DEFAULT_CONFIG,
            osr_id: None,
        }
    }

    /// Use `config` instead of the defaults
    pub fn with_config(mut self, config: &'a BuilderConfig) -> Self {
        self.config = config;
        self
    }

    /// Answer subtype queries through `hierarchy`
    pub fn with_hierarchy(mut self, hierarchy: &'a dyn HierarchyOracle) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    /// Resolve natives through `natives`
    pub fn with_natives(mut self, natives: &'a NativeRegistry) -> Self {
        self.natives = Some(natives);
        self
    }

    /// Use `prologue` for argument copying
    pub fn with_prologue(mut self, prologue: &'a dyn PrologueBuilder) -> Self {
        self.prologue = prologue;
        self
    }

    /// Build for an on-stack replacement entry
    pub fn with_osr_id(mut self, osr_id: u32) -> Self {
        self.osr_id = Some(osr_id);
        self
    }
}

/// Handler currently being built, for `rethrow`
#[derive(Debug, Clone, Copy)]
struct ActiveCatch {
    try_index: u32,
    variables: CatchVariables,
}

/// Per-function graph builder
pub struct FlowGraphBuilder<'a> {
    /// Shared inputs
    ctx: BuildContext<'a>,
    /// Shortcut for `ctx.store`
    store: &'a ObjectStore,
    /// Function being built
    function: FunctionId,
    /// Variable and scope layout of the function
    scopes: Cow<'a, ScopeTree>,
    /// Graph under construction
    graph: FlowGraph,
    /// Pending definitions
    stack: ValueStack,
    /// Live contexts
    contexts: ContextChain,
    /// Stack depth on entry of every join reached so far
    join_depths: FxHashMap<InstrId, usize>,
    /// Try block enclosing the code being emitted
    current_try_index: Option<u32>,
    /// Next try index to hand out
    next_try_index: u32,
    /// Number of enclosing try blocks
    try_depth: usize,
    /// Number of enclosing catch handlers
    catch_depth: usize,
    /// Number of enclosing loops
    loop_depth: usize,
    /// Scopes entered and the context depth before each
    scope_depths: Vec<(ScopeId, usize)>,
    /// Enclosing handlers, innermost last
    catches: Vec<ActiveCatch>,
}

impl<'a> FlowGraphBuilder<'a> {
    /// Builder for `function`
    pub fn new(ctx: BuildContext<'a>, function: FunctionId) -> Self {
        let scopes = ctx.program.scopes_or_default(ctx.store, function);
        let contexts = ContextChain::with_base_level(scopes.base_context_level());
        FlowGraphBuilder {
            ctx,
            store: ctx.store,
            function,
            scopes,
            graph: FlowGraph::new(function, ctx.osr_id),
            stack: ValueStack::new(),
            contexts,
            join_depths: FxHashMap::default(),
            current_try_index: None,
            next_try_index: 0,
            try_depth: 0,
            catch_depth: 0,
            loop_depth: 0,
            scope_depths: Vec::new(),
            catches: Vec::new(),
        }
    }

    /// Build the graph, selecting the shape from the function kind
    pub fn build(mut self) -> BuildResult<FlowGraph> {
        let f = self.store.function(self.function);
        let info = self.build_graph_of(f)?;
        self.graph.set_prologue_info(info);
        debug!(
            target: "kilt::builder",
            function = %f.name,
            kind = ?f.kind,
            blocks = self.graph.blocks().len(),
            instructions = self.graph.len(),
            "built flow graph"
        );
        Ok(self.graph)
    }

    /// Graph built so far
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Number of pending definitions
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Current context depth
    pub fn context_depth(&self) -> usize {
        self.contexts.depth()
    }

    fn build_graph_of(&mut self, f: &'a Function) -> BuildResult<PrologueInfo> {
        match f.kind {
            FunctionKind::Regular
            | FunctionKind::Getter
            | FunctionKind::Setter
            | FunctionKind::Closure
            | FunctionKind::Constructor => {
                if f.is_no_such_method_forwarder {
                    self.build_no_such_method_forwarder(f, false, false)
                } else if let Some(kind) = f.recognized {
                    self.build_recognized(f, kind)
                } else {
                    self.build_function_graph(f)
                }
            }
            FunctionKind::ImplicitClosure => self.build_implicit_closure_function(f),
            FunctionKind::ImplicitGetter
            | FunctionKind::ImplicitSetter
            | FunctionKind::ImplicitStaticGetter => self.build_field_accessor(f),
            FunctionKind::FieldInitializer => self.build_field_initializer(f),
            FunctionKind::MethodExtractor => self.build_method_extractor(f),
            FunctionKind::NoSuchMethodDispatcher => self.build_no_such_method_dispatcher(f),
            FunctionKind::InvokeFieldDispatcher => self.build_invoke_field_dispatcher(f),
            FunctionKind::DynamicInvocationForwarder => self.build_dynamic_invocation_forwarder(f),
            FunctionKind::FfiTrampoline => {
                if f.ffi.as_ref().is_some_and(|sig| sig.is_callback) {
                    self.build_ffi_callback(f)
                } else {
                    self.build_ffi_native(f)
                }
            }
        }
    }
}

#[cfg(test)]
impl<'a> FlowGraphBuilder<'a> {
    /// Function entry installed as the normal entry, so emitted code is reachable
    pub(crate) fn entry_fragment(&mut self) -> Fragment {
        let entry = self.function_entry();
        self.graph.set_normal_entry(entry);
        Fragment::single(entry)
    }
}

/// Build the flow graph of `function`
pub fn build_flow_graph(ctx: BuildContext<'_>, function: FunctionId) -> BuildResult<FlowGraph> {
    FlowGraphBuilder::new(ctx, function).build()
}
