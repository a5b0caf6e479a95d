//! Local variables and lexical scopes
//!
//! A [`ScopeTree`] is computed for a function before its graph is built. It
//! fixes where every variable lives: in a frame slot, or in a slot of the
//! heap context allocated by the scope that declares it.

use std::borrow::Cow;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::object::{FunctionId, ObjectStore, TypeArgsId, TypeId};

/// Declaration-site identifier of a local variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub u32);

/// Identifier of a lexical scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

/// Where a variable's value is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableLocation {
    /// Slot in the function's own frame
    Frame(usize),
    /// Slot `index` of the context allocated at `level`
    Context {
        /// Context nesting level (1 is the outermost context)
        level: usize,
        /// Slot within the context
        index: usize,
    },
}

/// A local variable
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariable {
    /// Declaration-site id
    pub id: VariableId,
    /// Name (synthetic variables start with `:`)
    pub name: String,
    /// Declared type
    pub ty: TypeId,
    /// Storage location
    pub location: VariableLocation,
    /// Parameter whose value must be checked against `ty`
    pub needs_type_check: bool,
    /// Parameter declared `covariant`
    pub is_explicit_covariant: bool,
}

impl LocalVariable {
    /// Captured by a closure, so it lives in a context
    pub fn is_captured(&self) -> bool {
        matches!(self.location, VariableLocation::Context { .. })
    }
}

/// A lexical scope
#[derive(Debug, Clone, PartialEq)]
pub struct LocalScope {
    /// Scope id
    pub id: ScopeId,
    /// Enclosing scope
    pub parent: Option<ScopeId>,
    /// Variables declared here
    pub variables: Vec<VariableId>,
    /// Declared variables stored in this scope's context, in slot order
    pub context_variables: Vec<VariableId>,
    /// Context nesting level of code in this scope
    pub context_level: usize,
}

impl LocalScope {
    /// Number of slots in the context this scope allocates
    pub fn num_context_variables(&self) -> usize {
        self.context_variables.len()
    }
}

/// Exception variables of one catch depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchVariables {
    /// Exception as seen by the handler body
    pub exception: VariableId,
    /// Stack trace as seen by the handler body
    pub stack_trace: VariableId,
    /// Exception as delivered by the runtime (always in the frame)
    pub raw_exception: VariableId,
    /// Stack trace as delivered by the runtime (always in the frame)
    pub raw_stack_trace: VariableId,
}

/// Scope layout of one function
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeTree {
    function: FunctionId,
    scopes: Vec<LocalScope>,
    variables: Vec<LocalVariable>,
    root: ScopeId,
    base_context_level: usize,
    frame_size: usize,

    /// `:current_context_var`
    pub current_context: VariableId,
    /// `:expression_temp_var`, used by joins that produce a value
    pub expression_temp: VariableId,
    /// `:entry_points_temp_var`, records which entry point was taken
    pub entry_points_temp: VariableId,
    /// Function type arguments (generic functions and their closures)
    pub function_type_arguments: Option<VariableId>,
    /// Function type arguments as passed by the caller
    pub raw_type_arguments: Option<VariableId>,
    /// Arguments descriptor of the current invocation
    pub arg_desc: Option<VariableId>,
    /// `this`
    pub receiver: Option<VariableId>,
    /// Type arguments parameter of a factory
    pub type_arguments: Option<VariableId>,
    /// Parameters, implicit ones first
    pub parameters: Vec<VariableId>,
    /// Frame copies of the parameters (differ only for captured parameters)
    pub raw_parameters: Vec<VariableId>,
    /// Saved context variable of each try depth
    pub catch_contexts: Vec<VariableId>,
    /// Exception variables of each catch depth
    pub catch_variables: Vec<CatchVariables>,
    /// Instantiated defaults for the function's type parameters
    pub default_function_type_arguments: Option<TypeArgsId>,
}

impl ScopeTree {
    /// Layout for a function without a kernel body (forwarders, dispatchers,
    /// accessors): parameters only, nothing captured
    pub fn for_function(store: &ObjectStore, function: FunctionId) -> ScopeTree {
        ScopeTreeBuilder::new(store, function).finish()
    }

    /// Function this layout belongs to
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// Outermost scope
    pub fn root(&self) -> ScopeId {
        self.root
    }

    /// Scope by id
    pub fn scope(&self, id: ScopeId) -> Option<&LocalScope> {
        self.scopes.get(id.0 as usize)
    }

    /// Variable by declaration-site id
    pub fn variable(&self, id: VariableId) -> Option<&LocalVariable> {
        self.variables.get(id.0 as usize)
    }

    /// All variables
    pub fn variables(&self) -> &[LocalVariable] {
        &self.variables
    }

    /// Context level of the function's entry (the closure's captured context)
    pub fn base_context_level(&self) -> usize {
        self.base_context_level
    }

    /// Number of frame slots
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Parameter variable `i` (implicit parameters first)
    pub fn parameter(&self, i: usize) -> Option<VariableId> {
        self.parameters.get(i).copied()
    }

    /// Frame copy of parameter `i`
    pub fn raw_parameter(&self, i: usize) -> Option<VariableId> {
        self.raw_parameters.get(i).copied()
    }
}

/// Source of precomputed scope layouts
pub trait ScopeProvider {
    /// Layout for `function`, or `None` to use [`ScopeTree::for_function`]
    fn scopes(&self, function: FunctionId) -> Option<&ScopeTree>;

    /// Layout for `function`, falling back to the parameters-only layout
    fn scopes_or_default<'s>(&'s self, store: &ObjectStore, function: FunctionId) -> Cow<'s, ScopeTree> {
        match self.scopes(function) {
            Some(tree) => Cow::Borrowed(tree),
            None => Cow::Owned(ScopeTree::for_function(store, function)),
        }
    }
}

impl ScopeProvider for FxHashMap<FunctionId, ScopeTree> {
    fn scopes(&self, function: FunctionId) -> Option<&ScopeTree> {
        self.get(&function)
    }
}

struct PendingScope {
    parent: Option<ScopeId>,
    variables: Vec<VariableId>,
}

struct PendingVariable {
    name: String,
    ty: TypeId,
    needs_type_check: bool,
    is_explicit_covariant: bool,
    alias_of: Option<VariableLocation>,
}

/// Incremental construction of a [`ScopeTree`]
///
/// Variables are declared in the innermost open scope. Capture marks are
/// resolved by [`ScopeTreeBuilder::finish`], which assigns frame and context
/// slots.
pub struct ScopeTreeBuilder {
    function: FunctionId,
    scopes: Vec<PendingScope>,
    variables: Vec<PendingVariable>,
    open: Vec<ScopeId>,
    captured: FxHashSet<VariableId>,
    base_context_level: usize,
    parameters: Vec<VariableId>,
    specials: Specials,
    catch_contexts: Vec<VariableId>,
    catch_variables: Vec<CatchVariables>,
    default_function_type_arguments: Option<TypeArgsId>,
}

#[derive(Default)]
struct Specials {
    current_context: Option<VariableId>,
    expression_temp: Option<VariableId>,
    entry_points_temp: Option<VariableId>,
    function_type_arguments: Option<VariableId>,
    raw_type_arguments: Option<VariableId>,
    arg_desc: Option<VariableId>,
    receiver: Option<VariableId>,
    type_arguments: Option<VariableId>,
}

impl ScopeTreeBuilder {
    /// Start a layout for `function` with its parameters declared in the root scope
    pub fn new(store: &ObjectStore, function: FunctionId) -> Self {
        let mut builder = ScopeTreeBuilder {
            function,
            scopes: vec![PendingScope {
                parent: None,
                variables: Vec::new(),
            }],
            variables: Vec::new(),
            open: vec![ScopeId(0)],
            captured: FxHashSet::default(),
            base_context_level: 0,
            parameters: Vec::new(),
            specials: Specials::default(),
            catch_contexts: Vec::new(),
            catch_variables: Vec::new(),
            default_function_type_arguments: None,
        };

        let f = store.function(function);
        let dynamic = store.types().dynamic();
        builder.specials.current_context = Some(builder.declare(":current_context_var", dynamic));
        builder.specials.expression_temp = Some(builder.declare(":expression_temp_var", dynamic));
        builder.specials.entry_points_temp = Some(builder.declare(":entry_points_temp_var", dynamic));

        if f.has_implicit_parameter() {
            let implicit = if f.is_closure_function() {
                builder.declare(":closure", dynamic)
            } else if f.is_factory {
                let v = builder.declare(":type_arguments", dynamic);
                builder.specials.type_arguments = Some(v);
                v
            } else {
                let receiver_type = store.class(f.owner).declaration_type;
                let v = builder.declare("this", receiver_type);
                builder.specials.receiver = Some(v);
                v
            };
            builder.parameters.push(implicit);
        }
        for param in &f.parameters {
            let v = builder.declare(&param.name, param.ty);
            let pending = &mut builder.variables[v.0 as usize];
            pending.is_explicit_covariant = param.is_covariant;
            pending.needs_type_check = param.is_covariant
                || param.is_generic_covariant_impl
                || !store.is_top_type(param.ty);
            builder.parameters.push(v);
        }
        let dispatches_type_arguments = f
            .saved_args_desc
            .as_ref()
            .is_some_and(|desc| desc.type_args_len() > 0);
        if f.is_generic() || has_generic_parent(store, function) || dispatches_type_arguments {
            let v = builder.declare(":function_type_arguments_var", dynamic);
            builder.specials.function_type_arguments = Some(v);
            builder.specials.raw_type_arguments = Some(v);
        }
        if f.has_optional_parameters() || f.is_generic() {
            builder.specials.arg_desc = Some(builder.declare(":arg_desc", dynamic));
        }
        // Callbacks run their whole body inside a synthesized handler.
        if f.ffi.as_ref().is_some_and(|sig| sig.is_callback) {
            builder.add_try_depth(store);
            builder.add_catch_depth(store);
        }
        builder
    }

    /// Set the context level visible at function entry (closures)
    pub fn with_base_context_level(mut self, level: usize) -> Self {
        self.base_context_level = level;
        self
    }

    /// Set the defaults stored when a generic function is called without type arguments
    pub fn with_default_function_type_arguments(mut self, defaults: TypeArgsId) -> Self {
        self.default_function_type_arguments = Some(defaults);
        self
    }

    /// Open a nested scope
    pub fn enter_scope(&mut self) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(PendingScope {
            parent: self.open.last().copied(),
            variables: Vec::new(),
        });
        self.open.push(id);
        id
    }

    /// Close the innermost scope (the root stays open)
    pub fn exit_scope(&mut self) {
        if self.open.len() > 1 {
            self.open.pop();
        }
    }

    /// Declare a variable in the innermost open scope
    pub fn declare(&mut self, name: &str, ty: TypeId) -> VariableId {
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(PendingVariable {
            name: name.to_string(),
            ty,
            needs_type_check: false,
            is_explicit_covariant: false,
            alias_of: None,
        });
        let scope = self.open.last().copied().unwrap_or(ScopeId(0));
        self.scopes[scope.0 as usize].variables.push(id);
        id
    }

    /// Mark a variable as captured by an inner closure
    pub fn capture(&mut self, variable: VariableId) {
        self.captured.insert(variable);
    }

    /// Mark parameter `i` (implicit parameters first) as captured
    pub fn capture_parameter(&mut self, i: usize) {
        if let Some(&v) = self.parameters.get(i) {
            self.captured.insert(v);
        }
    }

    /// Make a captured variable of the enclosing function visible here
    pub fn alias(&mut self, outer: &ScopeTree, variable: VariableId) -> Option<VariableId> {
        let original = outer.variable(variable)?;
        if !original.is_captured() {
            return None;
        }
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(PendingVariable {
            name: original.name.clone(),
            ty: original.ty,
            needs_type_check: false,
            is_explicit_covariant: false,
            alias_of: Some(original.location),
        });
        Some(id)
    }

    /// Make the enclosing method's captured `this` the receiver of a closure
    pub fn alias_receiver(&mut self, outer: &ScopeTree) -> Option<VariableId> {
        let receiver = self.alias(outer, outer.receiver?)?;
        self.specials.receiver = Some(receiver);
        Some(receiver)
    }

    /// Reserve the saved-context variable for a new try depth
    pub fn add_try_depth(&mut self, store: &ObjectStore) -> VariableId {
        let name = format!(":saved_try_context_var{}", self.catch_contexts.len());
        let v = self.declare_in_root(&name, store.types().dynamic());
        self.catch_contexts.push(v);
        v
    }

    /// Reserve the exception variables for a new catch depth
    pub fn add_catch_depth(&mut self, store: &ObjectStore) -> CatchVariables {
        let depth = self.catch_variables.len();
        let dynamic = store.types().dynamic();
        let vars = CatchVariables {
            exception: self.declare_in_root(&format!(":exception{}", depth), dynamic),
            stack_trace: self.declare_in_root(&format!(":stack_trace{}", depth), dynamic),
            raw_exception: self.declare_in_root(&format!(":raw_exception{}", depth), dynamic),
            raw_stack_trace: self.declare_in_root(&format!(":raw_stack_trace{}", depth), dynamic),
        };
        self.catch_variables.push(vars);
        vars
    }

    fn declare_in_root(&mut self, name: &str, ty: TypeId) -> VariableId {
        let saved = std::mem::replace(&mut self.open, vec![ScopeId(0)]);
        let v = self.declare(name, ty);
        self.open = saved;
        v
    }

    /// Assign storage and produce the layout
    pub fn finish(self) -> ScopeTree {
        let mut levels = vec![0usize; self.scopes.len()];
        let mut context_variables: Vec<Vec<VariableId>> = vec![Vec::new(); self.scopes.len()];
        for (i, scope) in self.scopes.iter().enumerate() {
            let enclosing = match scope.parent {
                Some(p) => levels[p.0 as usize],
                None => self.base_context_level,
            };
            for &v in &scope.variables {
                if self.captured.contains(&v) && self.variables[v.0 as usize].alias_of.is_none() {
                    context_variables[i].push(v);
                }
            }
            levels[i] = if context_variables[i].is_empty() {
                enclosing
            } else {
                enclosing + 1
            };
        }

        let mut locations: FxHashMap<VariableId, VariableLocation> = FxHashMap::default();
        for (i, vars) in context_variables.iter().enumerate() {
            for (index, &v) in vars.iter().enumerate() {
                locations.insert(
                    v,
                    VariableLocation::Context {
                        level: levels[i],
                        index,
                    },
                );
            }
        }

        let mut frame_size = 0;
        let mut variables = Vec::with_capacity(self.variables.len());
        for (i, pending) in self.variables.into_iter().enumerate() {
            let id = VariableId(i as u32);
            let location = match (pending.alias_of, locations.get(&id)) {
                (Some(location), _) => location,
                (None, Some(&location)) => location,
                (None, None) => {
                    frame_size += 1;
                    VariableLocation::Frame(frame_size - 1)
                }
            };
            variables.push(LocalVariable {
                id,
                name: pending.name,
                ty: pending.ty,
                location,
                needs_type_check: pending.needs_type_check,
                is_explicit_covariant: pending.is_explicit_covariant,
            });
        }

        // Captured parameters keep a frame copy for the incoming value.
        let mut raw_parameters = Vec::with_capacity(self.parameters.len());
        for &p in &self.parameters {
            if variables[p.0 as usize].is_captured() {
                let id = VariableId(variables.len() as u32);
                let name = format!(":raw_{}", variables[p.0 as usize].name);
                let ty = variables[p.0 as usize].ty;
                variables.push(LocalVariable {
                    id,
                    name,
                    ty,
                    location: VariableLocation::Frame(frame_size),
                    needs_type_check: false,
                    is_explicit_covariant: false,
                });
                frame_size += 1;
                raw_parameters.push(id);
            } else {
                raw_parameters.push(p);
            }
        }

        let scopes = self
            .scopes
            .iter()
            .enumerate()
            .map(|(i, pending)| LocalScope {
                id: ScopeId(i as u32),
                parent: pending.parent,
                variables: pending.variables.clone(),
                context_variables: context_variables[i].clone(),
                context_level: levels[i],
            })
            .collect();

        let fallback = VariableId(0);
        ScopeTree {
            function: self.function,
            scopes,
            variables,
            root: ScopeId(0),
            base_context_level: self.base_context_level,
            frame_size,
            current_context: self.specials.current_context.unwrap_or(fallback),
            expression_temp: self.specials.expression_temp.unwrap_or(fallback),
            entry_points_temp: self.specials.entry_points_temp.unwrap_or(fallback),
            function_type_arguments: self.specials.function_type_arguments,
            raw_type_arguments: self.specials.raw_type_arguments,
            arg_desc: self.specials.arg_desc,
            receiver: self.specials.receiver,
            type_arguments: self.specials.type_arguments,
            parameters: self.parameters,
            raw_parameters,
            catch_contexts: self.catch_contexts,
            catch_variables: self.catch_variables,
            default_function_type_arguments: self.default_function_type_arguments,
        }
    }
}

fn has_generic_parent(store: &ObjectStore, function: FunctionId) -> bool {
    let mut parent = store.function(function).parent;
    while let Some(p) = parent {
        if store.function(p).is_generic() {
            return true;
        }
        parent = store.function(p).parent;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::FunctionKind;

    fn static_function(store: &mut ObjectStore) -> FunctionId {
        let object = store.core().object;
        let mut f = store.new_function("f", object, FunctionKind::Regular);
        f.is_static = true;
        store.add_function(f)
    }

    #[test]
    fn test_uncaptured_variables_live_in_frame() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store);
        let int = store.core().int_type;
        let mut b = ScopeTreeBuilder::new(&store, f);
        let x = b.declare("x", int);
        let tree = b.finish();
        assert!(!tree.variable(x).unwrap().is_captured());
        assert_eq!(tree.scope(tree.root()).unwrap().num_context_variables(), 0);
        assert_eq!(tree.scope(tree.root()).unwrap().context_level, 0);
    }

    #[test]
    fn test_captured_variables_get_context_slots() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store);
        let int = store.core().int_type;
        let mut b = ScopeTreeBuilder::new(&store, f);
        let x = b.declare("x", int);
        b.capture(x);
        let inner = b.enter_scope();
        let y = b.declare("y", int);
        let z = b.declare("z", int);
        b.capture(z);
        b.capture(y);
        b.exit_scope();
        let tree = b.finish();

        assert_eq!(
            tree.variable(x).unwrap().location,
            VariableLocation::Context { level: 1, index: 0 }
        );
        assert_eq!(
            tree.variable(y).unwrap().location,
            VariableLocation::Context { level: 2, index: 0 }
        );
        assert_eq!(tree.scope(inner).unwrap().context_level, 2);
        assert_eq!(tree.scope(inner).unwrap().num_context_variables(), 2);
    }

    #[test]
    fn test_alias_keeps_outer_location() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store);
        let int = store.core().int_type;
        let mut outer = ScopeTreeBuilder::new(&store, f);
        let x = outer.declare("x", int);
        outer.capture(x);
        let outer = outer.finish();

        let g = static_function(&mut store);
        let mut inner = ScopeTreeBuilder::new(&store, g).with_base_context_level(1);
        let alias = inner.alias(&outer, x).unwrap();
        let inner = inner.finish();
        assert_eq!(
            inner.variable(alias).unwrap().location,
            VariableLocation::Context { level: 1, index: 0 }
        );
        assert_eq!(inner.scope(inner.root()).unwrap().num_context_variables(), 0);
    }

    #[test]
    fn test_captured_parameter_has_raw_copy() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let int = store.core().int_type;
        let mut f = store.new_function("f", object, FunctionKind::Regular);
        f.is_static = true;
        f.parameters = vec![crate::object::Parameter::new("a", int)];
        f.num_fixed_parameters = 1;
        let f = store.add_function(f);
        let mut b = ScopeTreeBuilder::new(&store, f);
        b.capture_parameter(0);
        let tree = b.finish();
        let param = tree.parameter(0).unwrap();
        let raw = tree.raw_parameter(0).unwrap();
        assert_ne!(param, raw);
        assert!(tree.variable(param).unwrap().is_captured());
        assert!(!tree.variable(raw).unwrap().is_captured());
    }
}
