//! Type arguments
//!
//! Loading the instantiator and function type-argument vectors, translating
//! a vector that mentions type parameters, and the prologue tests that ask
//! whether the caller passed function type arguments.

use crate::error::{BuildError, BuildResult};
use crate::il::{InstrId, InstrKind, Slot};
use crate::kernel::VariableId;
use crate::object::{AbstractType, ClassId, ConstValue, Function, Genericity, TypeArgsId, TypeId, TypeParameterOwner};

use super::{FlowGraphBuilder, Fragment};

impl<'a> FlowGraphBuilder<'a> {
    /// Type-argument vector of the receiver (or the factory's type argument
    /// parameter), `null` when the enclosing class is not generic
    pub(super) fn load_instantiator_type_arguments(&mut self, code: &mut Fragment) -> BuildResult<()> {
        if let Some(type_arguments) = self.scopes.type_arguments {
            self.load_local(code, type_arguments)?;
            return Ok(());
        }
        let owner = self.store.function(self.function).owner;
        let class = self.store.class(owner);
        match (self.scopes.receiver, class.num_type_arguments > 0) {
            (Some(receiver), true) => {
                let slot = self.type_arguments_slot(owner)?;
                self.load_local(code, receiver)?;
                self.load_native_field(code, slot)?;
            }
            _ => {
                self.null_constant(code);
            }
        }
        Ok(())
    }

    /// Function type arguments, `null` outside generic functions and their closures
    pub(super) fn load_function_type_arguments(&mut self, code: &mut Fragment) -> BuildResult<()> {
        match self.scopes.function_type_arguments {
            Some(v) => {
                self.load_local(code, v)?;
            }
            None => {
                self.null_constant(code);
            }
        }
        Ok(())
    }

    /// Instantiator and function vectors for checking against `ty`; a side
    /// that `ty` does not depend on is `null`
    pub(super) fn load_type_arguments_for(&mut self, code: &mut Fragment, ty: TypeId) -> BuildResult<()> {
        if self.store.types().is_instantiated(ty, Genericity::CurrentClass) {
            self.null_constant(code);
        } else {
            self.load_instantiator_type_arguments(code)?;
        }
        if self.store.types().is_instantiated(ty, Genericity::Functions) {
            self.null_constant(code);
        } else {
            self.load_function_type_arguments(code)?;
        }
        Ok(())
    }

    pub(super) fn type_arguments_slot(&self, class: ClassId) -> BuildResult<Slot> {
        let offset = self
            .store
            .class(class)
            .type_arguments_field_offset
            .ok_or_else(|| BuildError::Unsupported {
                function: self.function,
                what: format!("type arguments of non-generic class {}", class),
            })?;
        Ok(Slot::TypeArguments { class, offset })
    }

    /// Push the value of `vector` in the current instantiation context
    pub(super) fn translate_instantiated_type_arguments(
        &mut self,
        code: &mut Fragment,
        vector: Option<TypeArgsId>,
    ) -> BuildResult<()> {
        let types = self.store.types();
        let Some(v) = vector.filter(|_| !types.is_vector_instantiated(vector, Genericity::Any)) else {
            self.constant(code, ConstValue::type_arguments(vector));
            return Ok(());
        };
        let class_free = types.is_vector_instantiated(vector, Genericity::CurrentClass);
        let function_free = types.is_vector_instantiated(vector, Genericity::Functions);
        if function_free && self.can_share_instantiator_type_arguments(v) {
            return self.load_instantiator_type_arguments(code);
        }
        if class_free && self.can_share_function_type_arguments(v) {
            return self.load_function_type_arguments(code);
        }
        if class_free {
            self.null_constant(code);
        } else {
            self.load_instantiator_type_arguments(code)?;
        }
        if function_free {
            self.null_constant(code);
        } else {
            self.load_function_type_arguments(code)?;
        }
        self.define(code, InstrKind::InstantiateTypeArguments(v), 2)?;
        Ok(())
    }

    /// Push the value of the type `ty`
    pub(super) fn translate_type(&mut self, code: &mut Fragment, ty: TypeId) -> BuildResult<()> {
        if self.store.types().is_instantiated(ty, Genericity::Any) {
            self.constant(code, ConstValue::Type(ty));
            return Ok(());
        }
        self.load_type_arguments_for(code, ty)?;
        self.define(code, InstrKind::InstantiateType(ty), 2)?;
        Ok(())
    }

    /// `vector` is a prefix of the enclosing class's own declaration vector
    fn can_share_instantiator_type_arguments(&self, vector: TypeArgsId) -> bool {
        let owner = self.store.function(self.function).owner;
        let Some(declaration) = self.store.class(owner).declaration_type_arguments else {
            return false;
        };
        let types = self.store.types();
        let elements = types.vector(vector);
        let declared = types.vector(declaration);
        !elements.is_empty() && elements.len() <= declared.len() && declared.starts_with(elements)
    }

    /// `vector` lists the function's own type parameters in order
    fn can_share_function_type_arguments(&self, vector: TypeArgsId) -> bool {
        let f = self.store.function(self.function);
        if num_parent_type_parameters(self.store, f) > 0 {
            return false;
        }
        let elements = self.store.types().vector(vector);
        !elements.is_empty()
            && elements.len() <= f.type_parameters.len()
            && elements.iter().enumerate().all(|(i, &t)| {
                matches!(
                    self.store.types().get(t),
                    AbstractType::Parameter {
                        owner: TypeParameterOwner::Function(owner),
                        index,
                    } if *owner == f.id && *index as usize == i
                )
            })
    }

    // ===== Prologue tests =====

    /// Branch on the type-argument count in the arguments descriptor: `eq`
    /// runs when it is `n`, `neq` otherwise
    pub(super) fn test_type_args_len(&mut self, code: &mut Fragment, eq: Fragment, neq: Fragment, n: i64) -> BuildResult<()> {
        let join = self.join_entry();
        self.load_arg_descriptor(code)?;
        self.load_native_field(code, Slot::ArgumentsDescriptorTypeArgsLen)?;
        self.int_constant(code, n);
        let (eq_entry, neq_entry) = self.branch_if_equal(code, false)?;
        self.join_arm(eq_entry, eq, join)?;
        self.join_arm(neq_entry, neq, join)?;
        self.continue_if_reached(code, join);
        Ok(())
    }

    /// Branch on whether `closure` carries delayed type arguments
    pub(super) fn test_delayed_type_args(
        &mut self,
        code: &mut Fragment,
        closure: VariableId,
        present: Fragment,
        absent: Fragment,
    ) -> BuildResult<()> {
        let join = self.join_entry();
        self.load_local(code, closure)?;
        self.load_native_field(code, Slot::ClosureDelayedTypeArguments)?;
        let empty = self.store.core().empty_type_arguments;
        self.constant(code, ConstValue::TypeArguments(empty));
        let (absent_entry, present_entry) = self.branch_if_equal(code, false)?;
        self.join_arm(present_entry, present, join)?;
        self.join_arm(absent_entry, absent, join)?;
        self.continue_if_reached(code, join);
        Ok(())
    }

    /// Run `present` when function type arguments were supplied (passed by the
    /// caller or delayed in the closure), `absent` otherwise
    pub(super) fn test_any_type_args(&mut self, code: &mut Fragment, present: Fragment, absent: Fragment) -> BuildResult<()> {
        let f = self.store.function(self.function);
        if !f.is_closure_function() {
            return self.test_type_args_len(code, absent, present, 0);
        }
        let closure = self.parameter_variable(0)?;
        let complete = self.join_entry();
        let present_entry = self.join_entry();

        let mut to_present = Fragment::empty();
        self.goto(&mut to_present, present_entry)?;
        let mut delayed = Fragment::empty();
        self.test_delayed_type_args(&mut delayed, closure, to_present, absent)?;
        let mut to_present_again = Fragment::empty();
        self.goto(&mut to_present_again, present_entry)?;
        self.test_type_args_len(code, delayed, to_present_again, 0)?;
        self.goto(code, complete)?;

        self.join_arm(present_entry, present, complete)?;
        self.continue_if_reached(code, complete);
        Ok(())
    }

    /// `entry` followed by `body` and a jump to `join`
    pub(super) fn join_arm(&mut self, entry: InstrId, body: Fragment, join: InstrId) -> BuildResult<()> {
        let mut arm = Fragment::single(entry).append(body, &mut self.graph);
        self.goto(&mut arm, join)
    }

    /// Continue at `join` if some arm reached it; otherwise `code` stays closed
    pub(super) fn continue_if_reached(&mut self, code: &mut Fragment, join: InstrId) {
        if self.is_join_reached(join) {
            self.continue_at(code, join);
        }
    }

    // ===== Prologue pieces =====

    /// Store the default type arguments when a generic function is called
    /// without any
    pub(super) fn build_default_type_handling(&mut self, f: &Function) -> BuildResult<Fragment> {
        let mut code = Fragment::empty();
        if !f.is_generic() {
            return Ok(code);
        }
        let (Some(defaults), Some(fn_type_args)) = (
            self.scopes.default_function_type_arguments,
            self.scopes.function_type_arguments,
        ) else {
            return Ok(code);
        };
        let mut otherwise = Fragment::empty();
        self.translate_instantiated_type_arguments(&mut otherwise, Some(defaults))?;
        self.store_local(&mut otherwise, fn_type_args)?;
        self.drop_value(&mut otherwise)?;
        self.test_any_type_args(&mut code, Fragment::empty(), otherwise)?;
        Ok(code)
    }

    /// Default handling plus, for closures of generic functions, the
    /// enclosing function's type arguments
    pub(super) fn build_type_arguments_handling(&mut self, f: &Function) -> BuildResult<Fragment> {
        let mut code = self.build_default_type_handling(f)?;
        let parents = num_parent_type_parameters(self.store, f);
        if !f.is_closure_function() || parents == 0 {
            return Ok(code);
        }
        let closure = self.parameter_variable(0)?;
        let fn_type_args = self
            .scopes
            .function_type_arguments
            .ok_or(BuildError::MissingScopes(self.function))?;
        if f.is_generic() {
            self.load_local(&mut code, fn_type_args)?;
            self.push_argument(&mut code)?;
            self.load_local(&mut code, closure)?;
            self.load_native_field(&mut code, Slot::ClosureFunctionTypeArguments)?;
            self.push_argument(&mut code)?;
            self.int_constant(&mut code, parents as i64);
            self.push_argument(&mut code)?;
            self.int_constant(&mut code, (parents + f.type_parameters.len()) as i64);
            self.push_argument(&mut code)?;
            let prepend = self.store.core().prepend_type_arguments;
            self.static_call_simple(&mut code, prepend, 4)?;
        } else {
            self.load_local(&mut code, closure)?;
            self.load_native_field(&mut code, Slot::ClosureFunctionTypeArguments)?;
        }
        self.store_local(&mut code, fn_type_args)?;
        self.drop_value(&mut code)?;
        Ok(code)
    }
}

/// Type parameters declared by the functions enclosing `f`
pub(super) fn num_parent_type_parameters(store: &crate::object::ObjectStore, f: &Function) -> usize {
    let mut count = 0;
    let mut parent = f.parent;
    while let Some(p) = parent {
        let pf = store.function(p);
        count += pf.type_parameters.len();
        parent = pf.parent;
    }
    count
}

#[cfg(test)]
mod tests {
    use crate::builder::{BuildContext, FlowGraphBuilder, Fragment};
    use crate::il::{InstrKind, Slot};
    use crate::kernel::KernelProgram;
    use crate::object::{ConstValue, FunctionKind, ObjectStore, TypeParameterDecl};

    #[test]
    fn test_instantiated_vector_is_constant() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let int_type = store.core().int_type;
        let mut f = store.new_function("f", object, FunctionKind::Regular);
        f.is_static = true;
        let f = store.add_function(f);
        let vector = store.types_mut().intern_vector(vec![int_type]);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = Fragment::empty();
        b.translate_instantiated_type_arguments(&mut code, Some(vector)).unwrap();
        let top = b.stack.top().unwrap();
        assert_eq!(b.graph().kind(top), &InstrKind::Constant(ConstValue::TypeArguments(vector)));
    }

    #[test]
    fn test_class_parameter_vector_shares_instantiator() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let class = store.declare_class("Box", None, Some(object), &["T"]);
        let t = store.type_parameter(class, 0);
        let method = store.new_function("get", class, FunctionKind::Regular);
        let method = store.add_function(method);
        let vector = store.types_mut().intern_vector(vec![t]);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), method);
        let mut code = b.entry_fragment();
        b.translate_instantiated_type_arguments(&mut code, Some(vector)).unwrap();
        let top = b.stack.top().unwrap();
        assert!(matches!(b.graph().kind(top), InstrKind::LoadNativeField(Slot::TypeArguments { .. })));
        assert_eq!(b.graph().count(|k| k.is_instantiation()), 0);
    }

    #[test]
    fn test_mixed_vector_instantiates() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let class = store.declare_class("Box", None, Some(object), &["T"]);
        let t = store.type_parameter(class, 0);
        let dynamic = store.types().dynamic();
        let mut method = store.new_function("map", class, FunctionKind::Regular);
        method.type_parameters = vec![TypeParameterDecl::new("R", dynamic)];
        let method = store.add_function(method);
        let r = store.function_type_parameter(method, 0);
        let vector = store.types_mut().intern_vector(vec![r, t]);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), method);
        let mut code = Fragment::empty();
        b.translate_instantiated_type_arguments(&mut code, Some(vector)).unwrap();
        let top = b.stack.top().unwrap();
        assert_eq!(b.graph().kind(top), &InstrKind::InstantiateTypeArguments(vector));
        assert_eq!(b.graph().instr(top).inputs.len(), 2);
    }

    #[test]
    fn test_type_args_len_joins_both_arms() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let dynamic = store.types().dynamic();
        let mut f = store.new_function("g", object, FunctionKind::Regular);
        f.is_static = true;
        f.type_parameters = vec![TypeParameterDecl::new("T", dynamic)];
        let f = store.add_function(f);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = b.entry_fragment();
        b.test_type_args_len(&mut code, Fragment::empty(), Fragment::empty(), 0).unwrap();
        assert!(code.is_open());
        assert!(matches!(b.graph().kind(code.current.unwrap()), InstrKind::JoinEntry { .. }));
        assert_eq!(b.stack_depth(), 0);
    }
}
