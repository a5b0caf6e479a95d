//! Graphs of functions without a kernel body of their own: field accessors,
//! static field initializers, method extractors, tear-off closures and
//! dynamic invocation forwarders.

use crate::error::{BuildError, BuildResult};
use crate::il::{AssertKind, EntryKind, PrologueInfo, RebindRule, Slot, StoreBarrier, StoreKind};
use crate::object::{ConstValue, Function, FunctionId, FunctionKind, Genericity};

use super::calls::CallShape;
use super::checks::ArgumentChecks;
use super::function::Pieces;
use super::{FlowGraphBuilder, Fragment, TypeChecksToBuild};

/// Prefix of the selectors dynamic invocation forwarders are registered under
const DYNAMIC_PREFIX: &str = "dyn:";

/// Selector of a dynamic invocation forwarder without its prefix
pub(crate) fn demangle_dynamic_forwarder_name(name: &str) -> &str {
    name.strip_prefix(DYNAMIC_PREFIX).unwrap_or(name)
}

/// Names of the optional named parameters of `f`, in declaration order
fn optional_parameter_names(f: &Function) -> Vec<String> {
    if f.num_optional_named == 0 {
        return Vec::new();
    }
    let first_named = f.num_fixed_parameters + f.num_optional_positional;
    f.parameters[first_named..].iter().map(|p| p.name.clone()).collect()
}

impl<'a> FlowGraphBuilder<'a> {
    fn missing_accessor_field(&self, f: &Function) -> BuildError {
        BuildError::Unsupported {
            function: f.id,
            what: "accessor without a field".to_string(),
        }
    }

    /// Implicit getter or setter of `f.field`. A dynamic invocation
    /// forwarder of an implicit setter is built the same way, with the field
    /// of the forwarded setter.
    pub(super) fn build_field_accessor(&mut self, f: &'a Function) -> BuildResult<PrologueInfo> {
        let is_setter = matches!(
            f.kind,
            FunctionKind::ImplicitSetter | FunctionKind::DynamicInvocationForwarder
        );
        let is_method = !f.is_static;
        let field_id = if f.kind == FunctionKind::DynamicInvocationForwarder {
            f.target.and_then(|t| self.store.function(t).field)
        } else {
            f.field
        }
        .ok_or_else(|| self.missing_accessor_field(f))?;
        let field = self.store.field(field_id);

        let normal_entry = self.function_entry();
        self.graph.set_normal_entry(normal_entry);
        let mut body = Fragment::single(normal_entry);

        if is_setter {
            let value = self.parameter_variable(usize::from(is_method))?;
            if is_method {
                let receiver = self.parameter_variable(0)?;
                self.load_local(&mut body, receiver)?;
            }
            self.load_local(&mut body, value)?;
            let (ty, needs_check, name) = {
                let v = self.variable(value)?;
                (v.ty, v.needs_type_check, v.name.clone())
            };
            if needs_check {
                self.check_assignable(&mut body, ty, &name, AssertKind::ParameterCheck)?;
            }
            if is_method {
                self.store_instance_field_guarded(&mut body, field_id, StoreKind::Other)?;
            } else {
                self.store_static_field(&mut body, field_id)?;
            }
            self.null_constant(&mut body);
        } else if is_method {
            let receiver = self.parameter_variable(0)?;
            self.load_local(&mut body, receiver)?;
            self.load_field(&mut body, field_id)?;
        } else if field.is_const {
            // No InitStaticField: the initializer may be running.
            let value = field.static_value.clone().unwrap_or(ConstValue::Null);
            self.constant(&mut body, value);
        } else {
            if field.has_initializer {
                self.init_static_field(&mut body, field_id);
            }
            self.load_static_field(&mut body, field_id);
        }
        self.return_value(&mut body)?;
        Ok(PrologueInfo::empty())
    }

    /// Lazy initializer of a static field: evaluates and returns the
    /// initial value
    pub(super) fn build_field_initializer(&mut self, f: &'a Function) -> BuildResult<PrologueInfo> {
        let normal_entry = self.function_entry();
        self.graph.set_normal_entry(normal_entry);
        let mut body = Fragment::single(normal_entry);
        self.check_stack_overflow_in_prologue(&mut body);

        let program = self.ctx.program;
        if let Some(statement) = program.body(f.id) {
            self.build_statement(&mut body, statement)?;
        }
        if body.is_open() {
            let value = f
                .field
                .and_then(|field| self.store.field(field).static_value.clone())
                .unwrap_or(ConstValue::Null);
            self.constant(&mut body, value);
            self.return_value(&mut body)?;
        }
        Ok(PrologueInfo::empty())
    }

    /// Getter of a method: returns a tear-off closure bound to the receiver
    pub(super) fn build_method_extractor(&mut self, f: &'a Function) -> BuildResult<PrologueInfo> {
        let closure_function = f.target.ok_or_else(|| BuildError::MissingTarget {
            function: f.id,
            name: f.name.clone(),
        })?;
        let normal_entry = self.function_entry();
        self.graph.set_normal_entry(normal_entry);
        let mut body = Fragment::single(normal_entry);
        self.check_stack_overflow_in_prologue(&mut body);
        self.build_implicit_closure_creation(&mut body, closure_function)?;
        self.return_value(&mut body)?;
        // No prologue code.
        Ok(PrologueInfo::empty())
    }

    /// Allocate a tear-off of `target` over a new one-slot context holding
    /// the receiver
    pub(super) fn build_implicit_closure_creation(&mut self, code: &mut Fragment, target: FunctionId) -> BuildResult<()> {
        let closure_class = self.store.core().closure;
        self.allocate_object(code, closure_class, 0, Some(target))?;
        let closure = self.make_temporary()?;

        let t = self.store.function(target);
        let types = self.store.types();
        let signature_instantiated = t
            .parameters
            .iter()
            .map(|p| p.ty)
            .chain(std::iter::once(t.result_type))
            .all(|ty| types.is_instantiated(ty, Genericity::CurrentClass));
        if !signature_instantiated {
            self.load_temp(code, closure)?;
            self.load_instantiator_type_arguments(code)?;
            self.store_instance_field(
                code,
                Slot::ClosureInstantiatorTypeArguments,
                StoreKind::Initializing,
                StoreBarrier::Emit,
            )?;
        }

        self.allocate_context(code, 1)?;
        let context = self.make_temporary()?;

        self.load_temp(code, closure)?;
        self.constant(code, ConstValue::Function(target));
        self.store_instance_field(code, Slot::ClosureFunction, StoreKind::Initializing, StoreBarrier::Emit)?;

        self.load_temp(code, closure)?;
        self.load_temp(code, context)?;
        self.store_instance_field(code, Slot::ClosureContext, StoreKind::Initializing, StoreBarrier::Emit)?;

        if t.is_generic() {
            self.load_temp(code, closure)?;
            let empty = self.store.core().empty_type_arguments;
            self.constant(code, ConstValue::TypeArguments(empty));
            self.store_instance_field(
                code,
                Slot::ClosureDelayedTypeArguments,
                StoreKind::Initializing,
                StoreBarrier::Emit,
            )?;
        }

        // The context is on top; it has no parent.
        let receiver = self.receiver_variable()?;
        self.load_local(code, receiver)?;
        self.store_instance_field(code, Slot::ContextVariable(0), StoreKind::Initializing, StoreBarrier::Emit)?;
        Ok(())
    }

    /// Tear-off of `f.parent`: forwards its arguments to the torn-off method
    pub(super) fn build_implicit_closure_function(&mut self, f: &'a Function) -> BuildResult<PrologueInfo> {
        let parent_id = f.parent.ok_or_else(|| BuildError::MissingTarget {
            function: f.id,
            name: f.name.clone(),
        })?;
        let parent = self.store.function(parent_id);
        let target = self
            .store
            .lookup_function(parent.owner, &parent.name)
            .map(|t| self.store.function(t))
            .filter(|t| t.id == parent_id || (t.is_static == parent.is_static && t.kind == parent.kind))
            .filter(|t| t.num_fixed_parameters == parent.num_fixed_parameters);
        let Some(target) = target else {
            return self.build_no_such_method_forwarder(f, true, parent.is_static);
        };

        let normal_entry = self.function_entry();
        self.graph.set_normal_entry(normal_entry);
        let prologue = self
            .ctx
            .prologue
            .build_prologue(&mut self.graph, f, normal_entry, self.ctx.osr_id);
        let prologue_start = self.graph.instr(normal_entry).next;

        let mut every_time = Fragment::empty();
        self.check_stack_overflow_in_prologue(&mut every_time);
        let type_args = self.build_default_type_handling(f)?;

        // The target checks explicit arguments itself.
        let mut checks = ArgumentChecks::default();
        if Self::needs_argument_type_checks(f) {
            let mode = if target.is_static {
                TypeChecksToBuild::All
            } else {
                TypeChecksToBuild::NonCovariantOnly
            };
            checks.implicit = self.build_argument_type_checks(f, mode)?.implicit;
        }

        let mut body = Fragment::empty();
        let mut shape = CallShape {
            type_args_len: 0,
            argument_count: f.parameters.len() + usize::from(!target.is_static),
            argument_names: optional_parameter_names(f),
        };
        if f.is_generic() {
            shape.type_args_len = f.type_parameters.len();
            self.load_function_type_arguments(&mut body)?;
            self.push_argument(&mut body)?;
        }
        if !target.is_static {
            self.load_captured_receiver(&mut body)?;
            self.push_argument(&mut body)?;
        }
        self.push_parameters(&mut body, f.num_implicit_parameters())?;
        self.static_call(&mut body, target.id, &shape, RebindRule::NoRebind, None, EntryKind::Normal)?;
        self.return_value(&mut body)?;

        let pieces = Pieces {
            every_time,
            first_time: Fragment::empty(),
            type_args,
            checks,
            body,
        };
        self.link_entry_points(f, normal_entry, prologue_start, prologue.cursor, pieces)?;
        Ok(prologue.info)
    }

    /// Entry for dynamically dispatched calls: runs the checks the target
    /// skips for statically typed callers, then calls the target
    pub(super) fn build_dynamic_invocation_forwarder(&mut self, f: &'a Function) -> BuildResult<PrologueInfo> {
        let name = demangle_dynamic_forwarder_name(&f.name);
        let target_id = f
            .target
            .or_else(|| self.store.resolve_dynamic_function(f.owner, name))
            .ok_or_else(|| BuildError::MissingTarget {
                function: f.id,
                name: name.to_string(),
            })?;
        let target = self.store.function(target_id);
        if target.kind == FunctionKind::ImplicitSetter {
            return self.build_field_accessor(f);
        }

        let normal_entry = self.function_entry();
        self.graph.set_normal_entry(normal_entry);
        let prologue = self
            .ctx
            .prologue
            .build_prologue(&mut self.graph, f, normal_entry, self.ctx.osr_id);

        let mut body = Fragment::empty();
        if f.native_name.is_none() {
            self.check_stack_overflow_in_prologue(&mut body);
        }
        // The target is called with the defaults even when the caller passed
        // no type arguments.
        let defaults = self.build_default_type_handling(f)?;
        body = body.append(defaults, &mut self.graph);
        let checks = self.build_argument_type_checks(f, TypeChecksToBuild::NonCovariantOnly)?;
        body = body
            .append(checks.explicit, &mut self.graph)
            .append(checks.implicit, &mut self.graph);

        let mut shape = CallShape {
            type_args_len: 0,
            argument_count: f.num_parameters(),
            argument_names: optional_parameter_names(f),
        };
        if f.is_generic() {
            shape.type_args_len = f.type_parameters.len();
            self.load_function_type_arguments(&mut body)?;
            self.push_argument(&mut body)?;
        }
        let receiver = self.receiver_variable()?;
        self.load_local(&mut body, receiver)?;
        self.push_argument(&mut body)?;
        self.push_parameters(&mut body, f.num_implicit_parameters())?;
        self.static_call(&mut body, target_id, &shape, RebindRule::NoRebind, None, EntryKind::Normal)?;

        // The result of `[]=` is never used.
        if name == "[]=" {
            self.drop_value(&mut body)?;
            self.null_constant(&mut body);
        }
        self.return_value(&mut body)?;

        Fragment::span(normal_entry, prologue.cursor).append(body, &mut self.graph);
        Ok(prologue.info)
    }
}

#[cfg(test)]
mod tests {
    use super::demangle_dynamic_forwarder_name;
    use crate::builder::{build_flow_graph, BuildContext};
    use crate::il::{InstrKind, Slot};
    use crate::kernel::KernelProgram;
    use crate::object::{ConstValue, FunctionKind, ObjectStore, Parameter};

    #[test]
    fn test_demangle_strips_prefix() {
        assert_eq!(demangle_dynamic_forwarder_name("dyn:add"), "add");
        assert_eq!(demangle_dynamic_forwarder_name("add"), "add");
    }

    #[test]
    fn test_instance_getter_loads_field() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let int_type = store.core().int_type;
        let class = store.declare_class("Box", None, Some(object), &[]);
        let field = store.add_field("value", class, int_type, false);
        let mut getter = store.new_function("value", class, FunctionKind::ImplicitGetter);
        getter.field = Some(field);
        let getter = store.add_function(getter);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), getter).unwrap();

        assert_eq!(graph.count(|k| matches!(k, InstrKind::LoadField(f) if *f == field)), 1);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Return)), 1);
    }

    #[test]
    fn test_const_static_getter_skips_initialization() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let int_type = store.core().int_type;
        let class = store.declare_class("Config", None, Some(object), &[]);
        let field = store.add_field("limit", class, int_type, true);
        store.field_mut(field).is_const = true;
        store.field_mut(field).static_value = Some(ConstValue::Int(10));
        let mut getter = store.new_function("limit", class, FunctionKind::ImplicitStaticGetter);
        getter.is_static = true;
        getter.field = Some(field);
        let getter = store.add_function(getter);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), getter).unwrap();

        assert_eq!(graph.count(|k| matches!(k, InstrKind::InitStaticField(_))), 0);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Constant(ConstValue::Int(10)))), 1);
    }

    #[test]
    fn test_setter_checks_covariant_value() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let int_type = store.core().int_type;
        let class = store.declare_class("Box", None, Some(object), &[]);
        let field = store.add_field("value", class, int_type, false);
        let mut setter = store.new_function("value=", class, FunctionKind::ImplicitSetter);
        setter.field = Some(field);
        setter.parameters = vec![Parameter::new("value", int_type)];
        setter.num_fixed_parameters = 1;
        let setter = store.add_function(setter);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), setter).unwrap();

        assert_eq!(graph.count(|k| matches!(k, InstrKind::AssertAssignable { .. })), 1);
        assert_eq!(
            graph.count(|k| matches!(k, InstrKind::StoreInstanceField { slot: Slot::Field(f), .. } if *f == field)),
            1
        );
    }

    #[test]
    fn test_method_extractor_captures_receiver() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let dynamic = store.types().dynamic();
        let class = store.declare_class("A", None, Some(object), &[]);
        let method = store.new_function("run", class, FunctionKind::Regular);
        let method = store.add_function(method);
        let mut tear_off = store.new_function("run", class, FunctionKind::ImplicitClosure);
        tear_off.parent = Some(method);
        let tear_off = store.add_function(tear_off);
        let mut extractor = store.new_function("get:run", class, FunctionKind::MethodExtractor);
        extractor.target = Some(tear_off);
        extractor.result_type = dynamic;
        let extractor = store.add_function(extractor);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), extractor).unwrap();

        assert_eq!(graph.count(|k| matches!(k, InstrKind::AllocateContext { num_variables: 1 })), 1);
        assert_eq!(
            graph.count(|k| matches!(k, InstrKind::StoreInstanceField { slot: Slot::ContextVariable(0), .. })),
            1
        );
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Constant(ConstValue::Function(f)) if *f == tear_off)), 1);
    }

    #[test]
    fn test_tear_off_calls_method_with_captured_receiver() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let dynamic = store.types().dynamic();
        let class = store.declare_class("A", None, Some(object), &[]);
        let mut method = store.new_function("add", class, FunctionKind::Regular);
        method.parameters = vec![Parameter::new("x", dynamic)];
        method.num_fixed_parameters = 1;
        let method = store.add_function(method);
        let mut tear_off = store.new_function("add", class, FunctionKind::ImplicitClosure);
        tear_off.parent = Some(method);
        tear_off.parameters = vec![Parameter::new("x", dynamic)];
        tear_off.num_fixed_parameters = 1;
        let tear_off = store.add_function(tear_off);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), tear_off).unwrap();

        let calls = graph.find_all(|k| matches!(k, InstrKind::StaticCall { .. }));
        assert_eq!(calls.len(), 1);
        match graph.kind(calls[0]) {
            InstrKind::StaticCall { target, argument_count, .. } => {
                assert_eq!(*target, method);
                assert_eq!(*argument_count, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(graph.count(|k| matches!(k, InstrKind::LoadNativeField(Slot::ContextVariable(0)))), 1);
    }

    #[test]
    fn test_tear_off_of_replaced_method_forwards_to_no_such_method() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let class = store.declare_class("A", None, Some(object), &[]);
        // A static member of the same name shadows the torn-off method.
        let mut replacement = store.new_function("gone", class, FunctionKind::Regular);
        replacement.is_static = true;
        store.add_function(replacement);
        let method = store.new_function("gone", class, FunctionKind::Regular);
        let method = store.add_function(method);
        let mut tear_off = store.new_function("gone", class, FunctionKind::ImplicitClosure);
        tear_off.parent = Some(method);
        let tear_off = store.add_function(tear_off);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), tear_off).unwrap();

        assert_eq!(
            graph.count(|k| matches!(k, InstrKind::InstanceCall { name, .. } if name == "noSuchMethod")),
            1
        );
        assert_eq!(graph.count(|k| matches!(k, InstrKind::StaticCall { target, .. } if *target == method)), 0);
    }

    #[test]
    fn test_dynamic_forwarder_of_index_set_returns_null() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let dynamic = store.types().dynamic();
        let int_type = store.core().int_type;
        let class = store.declare_class("Vec", None, Some(object), &[]);
        let mut target = store.new_function("[]=", class, FunctionKind::Regular);
        target.parameters = vec![Parameter::new("i", int_type), Parameter::new("v", dynamic)];
        target.num_fixed_parameters = 2;
        let target = store.add_function(target);
        let mut forwarder = store.new_function("dyn:[]=", class, FunctionKind::DynamicInvocationForwarder);
        forwarder.parameters = vec![Parameter::new("i", int_type), Parameter::new("v", dynamic)];
        forwarder.num_fixed_parameters = 2;
        let forwarder = store.add_function(forwarder);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), forwarder).unwrap();

        assert_eq!(graph.count(|k| matches!(k, InstrKind::StaticCall { target: t, .. } if *t == target)), 1);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::AssertAssignable { .. })), 1);
        let returns = graph.find_all(|k| matches!(k, InstrKind::Return));
        assert_eq!(returns.len(), 1);
        let value = graph.instr(returns[0]).inputs[0];
        assert_eq!(*graph.kind(value), InstrKind::Constant(ConstValue::Null));
    }
}
