//! Expressions
//!
//! Every expression pushes exactly one value. Calls push their arguments
//! with `PushArgument` in call order: the type-argument vector when there is
//! one, the receiver, positional then named arguments.

use crate::error::BuildResult;
use crate::il::{AssertKind, ComparisonKind, EntryKind, InvocationKind, RebindRule, Slot, StoreBarrier, StoreKind};
use crate::kernel::{Arguments, Expression};
use crate::object::{ClassId, ConstValue, FieldId, FunctionId, TypeArgsId, TypeId};

use super::calls::CallShape;
use super::{FlowGraphBuilder, Fragment};

impl<'a> FlowGraphBuilder<'a> {
    pub(super) fn build_expression(&mut self, code: &mut Fragment, expression: &Expression) -> BuildResult<()> {
        match expression {
            Expression::Null => {
                self.null_constant(code);
            }
            Expression::Bool(b) => {
                self.bool_constant(code, *b);
            }
            Expression::Int(i) => {
                self.int_constant(code, *i);
            }
            Expression::Double(d) => {
                self.constant(code, ConstValue::Double(*d));
            }
            Expression::String(s) => {
                self.constant(code, ConstValue::string(s));
            }
            Expression::This => {
                let receiver = self.receiver_variable()?;
                self.load_local(code, receiver)?;
            }
            Expression::VariableGet(v) => {
                self.load_local(code, *v)?;
            }
            Expression::VariableSet(v, value) => {
                self.build_expression(code, value)?;
                self.store_local(code, *v)?;
            }
            Expression::StaticGet(field) => self.build_static_get(code, *field),
            Expression::StaticInvocation { target, arguments } => self.build_static_invocation(code, *target, arguments)?,
            Expression::MethodInvocation {
                receiver,
                name,
                interface_target,
                arguments,
            } => self.build_method_invocation(code, receiver, name, *interface_target, arguments)?,
            Expression::PropertyGet {
                receiver,
                name,
                interface_target,
            } => {
                self.build_expression(code, receiver)?;
                self.push_argument(code)?;
                self.instance_call(
                    code,
                    name,
                    InvocationKind::Getter,
                    &CallShape::positional(1),
                    *interface_target,
                    EntryKind::Normal,
                )?;
            }
            Expression::FunctionInvocation { callee, arguments } => self.build_function_invocation(code, callee, arguments)?,
            Expression::ConstructorInvocation {
                class,
                target,
                arguments,
            } => self.build_constructor_invocation(code, *class, *target, arguments)?,
            Expression::FunctionExpression(function) => self.build_closure_creation(code, *function)?,
            Expression::Not(operand) => {
                let negate = self.build_condition(code, operand)?;
                if !negate {
                    self.boolean_negate(code)?;
                }
            }
            Expression::TypeLiteral(ty) => self.translate_type(code, *ty)?,
            Expression::Is(operand, ty) => {
                self.build_expression(code, operand)?;
                if self.store.is_top_type(*ty) {
                    self.drop_value(code)?;
                    self.bool_constant(code, true);
                } else {
                    self.instance_of(code, *ty)?;
                }
            }
            Expression::As(operand, ty) => {
                self.build_expression(code, operand)?;
                if !self.is_proven_subtype(operand, *ty) {
                    self.check_assignable(code, *ty, "", AssertKind::FromSource)?;
                }
            }
            Expression::Throw(exception) => {
                self.build_expression(code, exception)?;
                self.push_argument(code)?;
                self.throw_exception(code)?;
            }
            Expression::Rethrow => self.build_rethrow(code)?,
        }
        Ok(())
    }

    fn build_static_get(&mut self, code: &mut Fragment, field: FieldId) {
        let f = self.store.field(field);
        if f.is_const {
            if let Some(value) = f.static_value.clone() {
                self.constant(code, value);
                return;
            }
        }
        if f.has_initializer && f.static_value.is_none() {
            self.init_static_field(code, field);
        }
        self.load_static_field(code, field);
    }

    /// Push `arguments` for a call: the type vector (when requested) then the
    /// values. Returns the call shape, `implicit` leading arguments included.
    fn push_call_arguments(
        &mut self,
        code: &mut Fragment,
        arguments: &Arguments,
        implicit: usize,
        push_types: bool,
    ) -> BuildResult<CallShape> {
        let mut type_args_len = 0;
        if push_types && arguments.types.is_some() {
            type_args_len = self.store.types().vector_len(arguments.types);
            self.translate_instantiated_type_arguments(code, arguments.types)?;
            self.push_argument(code)?;
        }
        Ok(CallShape {
            type_args_len,
            argument_count: implicit + arguments.count(),
            argument_names: arguments.names(),
        })
    }

    fn push_argument_values(&mut self, code: &mut Fragment, arguments: &Arguments) -> BuildResult<()> {
        for e in arguments.positional.iter().chain(arguments.named.iter().map(|(_, e)| e)) {
            self.build_expression(code, e)?;
            self.push_argument(code)?;
        }
        Ok(())
    }

    /// Evaluate and discard the arguments of a call that cannot succeed,
    /// then throw `NoSuchMethodError` for `target`
    fn build_invalid_call(&mut self, code: &mut Fragment, target: FunctionId, arguments: &Arguments) -> BuildResult<()> {
        for e in arguments.positional.iter().chain(arguments.named.iter().map(|(_, e)| e)) {
            self.build_expression(code, e)?;
            self.drop_value(code)?;
        }
        self.throw_no_such_method_error(code, target)
    }

    fn build_static_invocation(&mut self, code: &mut Fragment, target: FunctionId, arguments: &Arguments) -> BuildResult<()> {
        let t = self.store.function(target);
        let names = arguments.names();
        let type_args_len = if t.is_factory {
            0
        } else {
            self.store.types().vector_len(arguments.types)
        };
        let positional = t.num_implicit_parameters() + arguments.positional.len();
        if !t.are_valid_arguments(type_args_len, positional, &names) {
            return self.build_invalid_call(code, target, arguments);
        }

        let shape = if t.is_factory {
            // The allocated class's type arguments are the factory's first parameter.
            self.translate_instantiated_type_arguments(code, arguments.types)?;
            self.push_argument(code)?;
            self.push_call_arguments(code, arguments, 1, false)?
        } else {
            self.push_call_arguments(code, arguments, 0, true)?
        };
        self.push_argument_values(code, arguments)?;
        self.static_call(code, target, &shape, RebindRule::Static, None, EntryKind::Normal)?;
        Ok(())
    }

    fn build_method_invocation(
        &mut self,
        code: &mut Fragment,
        receiver: &Expression,
        name: &str,
        interface_target: Option<FunctionId>,
        arguments: &Arguments,
    ) -> BuildResult<()> {
        if name == "==" && arguments.positional.len() == 1 && arguments.named.is_empty() {
            let other = &arguments.positional[0];
            if matches!(receiver, Expression::Null) || matches!(other, Expression::Null) {
                self.build_expression(code, receiver)?;
                self.build_expression(code, other)?;
                self.strict_compare(code, ComparisonKind::StrictEqual, false)?;
                return Ok(());
            }
        }

        let shape = self.push_call_arguments(code, arguments, 1, true)?;
        self.build_expression(code, receiver)?;
        self.push_argument(code)?;
        self.push_argument_values(code, arguments)?;

        // Calls on `this` through a known target went through the static checks already.
        let entry_kind = if matches!(receiver, Expression::This)
            && interface_target.is_some()
            && self.ctx.config.use_unchecked_entry_points
        {
            EntryKind::Unchecked
        } else {
            EntryKind::Normal
        };
        self.instance_call(code, name, InvocationKind::Method, &shape, interface_target, entry_kind)?;
        Ok(())
    }

    fn build_function_invocation(&mut self, code: &mut Fragment, callee: &Expression, arguments: &Arguments) -> BuildResult<()> {
        self.build_expression(code, callee)?;
        let closure = self.make_temporary()?;
        let shape = self.push_call_arguments(code, arguments, 1, true)?;
        self.load_temp(code, closure)?;
        self.push_argument(code)?;
        self.push_argument_values(code, arguments)?;
        self.load_temp(code, closure)?;
        self.load_native_field(code, Slot::ClosureFunction)?;
        self.closure_call(code, &shape)?;
        self.drop_temps_preserve_top(code, 1)?;
        Ok(())
    }

    fn build_constructor_invocation(
        &mut self,
        code: &mut Fragment,
        class: ClassId,
        target: FunctionId,
        arguments: &Arguments,
    ) -> BuildResult<()> {
        let names = arguments.names();
        let t = self.store.function(target);
        if !t.are_valid_arguments(0, 1 + arguments.positional.len(), &names) {
            return self.build_invalid_call(code, target, arguments);
        }
        if self.store.class(class).num_type_arguments > 0 {
            self.translate_instantiated_type_arguments(code, arguments.types)?;
            self.push_argument(code)?;
            self.allocate_object(code, class, 1, None)?;
        } else {
            self.allocate_object(code, class, 0, None)?;
        }
        let instance = self.make_temporary()?;
        self.load_temp(code, instance)?;
        self.push_argument(code)?;
        self.push_argument_values(code, arguments)?;
        let shape = CallShape {
            type_args_len: 0,
            argument_count: 1 + arguments.count(),
            argument_names: names,
        };
        self.static_call(code, target, &shape, RebindRule::Static, None, EntryKind::Normal)?;
        self.drop_value(code)
    }

    /// Allocate a closure of `function` over the current context
    pub(super) fn build_closure_creation(&mut self, code: &mut Fragment, function: FunctionId) -> BuildResult<()> {
        let closure_class = self.store.core().closure;
        self.allocate_object(code, closure_class, 0, Some(function))?;
        let closure = self.make_temporary()?;

        if self.needs_instantiator_for_closures() {
            self.load_temp(code, closure)?;
            self.load_instantiator_type_arguments(code)?;
            self.store_closure_slot(code, Slot::ClosureInstantiatorTypeArguments)?;
        }
        if self.scopes.function_type_arguments.is_some() {
            self.load_temp(code, closure)?;
            self.load_function_type_arguments(code)?;
            self.store_closure_slot(code, Slot::ClosureFunctionTypeArguments)?;
        }
        if self.store.function(function).is_generic() {
            self.load_temp(code, closure)?;
            let empty: TypeArgsId = self.store.core().empty_type_arguments;
            self.constant(code, ConstValue::TypeArguments(empty));
            self.store_closure_slot(code, Slot::ClosureDelayedTypeArguments)?;
        }

        self.load_temp(code, closure)?;
        self.constant(code, ConstValue::Function(function));
        self.store_closure_slot(code, Slot::ClosureFunction)?;

        self.load_temp(code, closure)?;
        let current_context = self.scopes.current_context;
        self.load_frame_variable(code, current_context);
        self.store_closure_slot(code, Slot::ClosureContext)?;
        Ok(())
    }

    fn store_closure_slot(&mut self, code: &mut Fragment, slot: Slot) -> BuildResult<()> {
        self.store_instance_field(code, slot, StoreKind::Initializing, StoreBarrier::Emit)?;
        Ok(())
    }

    fn needs_instantiator_for_closures(&self) -> bool {
        if self.scopes.type_arguments.is_some() {
            return true;
        }
        let owner = self.store.function(self.function).owner;
        self.scopes.receiver.is_some() && self.store.class(owner).num_type_arguments > 0
    }

    /// Static type of `e` where it is evident without inference
    pub(super) fn static_type_of(&self, e: &Expression) -> Option<TypeId> {
        let core = self.store.core();
        match e {
            Expression::Null => Some(core.null_type),
            Expression::Bool(_) | Expression::Not(_) | Expression::Is(..) => Some(core.bool_type),
            Expression::Int(_) => Some(core.int_type),
            Expression::Double(_) => Some(core.double_type),
            Expression::String(_) => Some(core.string_type),
            Expression::This => {
                let owner = self.store.function(self.function).owner;
                Some(self.store.class(owner).declaration_type)
            }
            Expression::VariableGet(v) => self.scopes.variable(*v).map(|v| v.ty),
            Expression::VariableSet(_, value) => self.static_type_of(value),
            Expression::StaticGet(field) => Some(self.store.field(*field).ty),
            Expression::As(_, ty) => Some(*ty),
            Expression::StaticInvocation { target, .. } => Some(self.store.function(*target).result_type),
            Expression::MethodInvocation {
                name,
                interface_target,
                arguments,
                ..
            } => {
                if name == "==" && arguments.positional.len() == 1 {
                    return Some(core.bool_type);
                }
                interface_target.map(|t| self.store.function(t).result_type)
            }
            _ => None,
        }
    }

    /// `operand as ty` needs no check when the hierarchy shows the static
    /// type of the operand is already a subtype of `ty`
    fn is_proven_subtype(&self, operand: &Expression, ty: TypeId) -> bool {
        if self.store.is_top_type(ty) {
            return true;
        }
        let Some(hierarchy) = self.ctx.hierarchy else {
            return false;
        };
        match self.static_type_of(operand) {
            Some(static_type) if !self.store.is_top_type(static_type) => hierarchy.is_subtype(static_type, ty),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::{BuildContext, FlowGraphBuilder, Fragment};
    use crate::hierarchy::HierarchyInfo;
    use crate::il::{EntryKind, InstrKind, Slot};
    use crate::kernel::{Arguments, Expression, KernelProgram, ScopeTreeBuilder, Statement};
    use crate::object::{FunctionId, FunctionKind, ObjectStore, Parameter};

    fn static_function(store: &mut ObjectStore, name: &str, params: usize) -> FunctionId {
        let object = store.core().object;
        let dynamic = store.types().dynamic();
        let mut f = store.new_function(name, object, FunctionKind::Regular);
        f.is_static = true;
        f.parameters = (0..params).map(|i| Parameter::new(&format!("p{}", i), dynamic)).collect();
        f.num_fixed_parameters = params;
        store.add_function(f)
    }

    #[test]
    fn test_static_call_pushes_arguments() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store, "f", 0);
        let g = static_function(&mut store, "g", 2);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = b.entry_fragment();
        let call = Expression::StaticInvocation {
            target: g,
            arguments: Arguments::positional(vec![Expression::Int(1), Expression::Int(2)]),
        };
        b.build_expression(&mut code, &call).unwrap();
        assert_eq!(b.stack_depth(), 1);
        assert_eq!(b.graph().count(|k| matches!(k, InstrKind::PushArgument)), 2);
        let top = b.stack.top().unwrap();
        assert!(matches!(b.graph().kind(top), InstrKind::StaticCall { argument_count: 2, .. }));
    }

    #[test]
    fn test_arity_mismatch_throws_no_such_method() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store, "f", 0);
        let g = static_function(&mut store, "g", 2);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = b.entry_fragment();
        let call = Expression::StaticInvocation {
            target: g,
            arguments: Arguments::positional(vec![Expression::Int(1), Expression::Int(2), Expression::Int(3)]),
        };
        b.build_expression(&mut code, &call).unwrap();
        assert_eq!(b.stack_depth(), 1);
        assert_eq!(
            b.graph().count(|k| matches!(k, InstrKind::StaticCall { target, .. } if *target == g)),
            0
        );
        let throw_new = store.core().no_such_method_throw_new;
        assert_eq!(
            b.graph().count(|k| matches!(k, InstrKind::StaticCall { target, .. } if *target == throw_new)),
            1
        );
    }

    #[test]
    fn test_equality_with_null_is_strict_compare() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store, "f", 0);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = b.entry_fragment();
        let eq = Expression::MethodInvocation {
            receiver: Box::new(Expression::Int(1)),
            name: "==".into(),
            interface_target: None,
            arguments: Arguments::positional(vec![Expression::Null]),
        };
        b.build_expression(&mut code, &eq).unwrap();
        assert_eq!(b.graph().count(|k| matches!(k, InstrKind::StrictCompare { .. })), 1);
        assert_eq!(b.graph().count(|k| matches!(k, InstrKind::InstanceCall { .. })), 0);
    }

    #[test]
    fn test_call_on_this_uses_unchecked_entry() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let m = store.new_function("m", object, FunctionKind::Regular);
        let m = store.add_function(m);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), m);
        let mut code = b.entry_fragment();
        let call = Expression::MethodInvocation {
            receiver: Box::new(Expression::This),
            name: "m".into(),
            interface_target: Some(m),
            arguments: Arguments::default(),
        };
        b.build_expression(&mut code, &call).unwrap();
        let top = b.stack.top().unwrap();
        assert!(matches!(
            b.graph().kind(top),
            InstrKind::InstanceCall {
                entry_kind: EntryKind::Unchecked,
                ..
            }
        ));
    }

    #[test]
    fn test_closure_creation_stores_context() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store, "f", 0);
        let object = store.core().object;
        let mut c = store.new_function("<anonymous closure>", object, FunctionKind::Closure);
        c.parent = Some(f);
        let c = store.add_function(c);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = b.entry_fragment();
        b.build_expression(&mut code, &Expression::FunctionExpression(c)).unwrap();
        assert_eq!(b.stack_depth(), 1);
        assert!(matches!(
            b.graph().kind(b.stack.top().unwrap()),
            InstrKind::AllocateObject { closure_function: Some(id), .. } if *id == c
        ));
        assert_eq!(
            b.graph().count(|k| matches!(k, InstrKind::StoreInstanceField { slot: Slot::ClosureContext, .. })),
            1
        );
    }

    #[test]
    fn test_as_skips_check_for_proven_subtype() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store, "f", 0);
        let int = store.core().int_type;
        let string = store.core().string_type;
        let mut layout = ScopeTreeBuilder::new(&store, f);
        let x = layout.declare("x", int);
        let mut program = KernelProgram::new();
        program.add_body(f, Statement::Empty, layout.finish());
        let hierarchy = HierarchyInfo::new(&store);
        let ctx = BuildContext::new(&store, &program).with_hierarchy(&hierarchy);
        let mut b = FlowGraphBuilder::new(ctx, f);
        let mut code = b.entry_fragment();
        b.build_expression(&mut code, &Expression::As(Box::new(Expression::VariableGet(x)), int))
            .unwrap();
        assert_eq!(b.graph().count(|k| matches!(k, InstrKind::AssertAssignable { .. })), 0);
        b.build_expression(&mut code, &Expression::As(Box::new(Expression::VariableGet(x)), string))
            .unwrap();
        assert_eq!(b.graph().count(|k| matches!(k, InstrKind::AssertAssignable { .. })), 1);
        assert_eq!(b.stack_depth(), 2);
    }

    #[test]
    fn test_throw_closes_and_leaves_placeholder() {
        let mut store = ObjectStore::new();
        let f = static_function(&mut store, "f", 0);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = b.entry_fragment();
        b.build_expression(&mut code, &Expression::Throw(Box::new(Expression::String("x".into()))))
            .unwrap();
        assert!(code.is_closed());
        assert_eq!(b.stack_depth(), 1);
    }
}
