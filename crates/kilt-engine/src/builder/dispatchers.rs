//! `noSuchMethod` dispatchers, invoke-field dispatchers and forwarders
//!
//! Dispatchers are specialized for a receiver class, a selector and the
//! arguments descriptor saved at the call site; their parameters mirror that
//! descriptor. Forwarders stand in for members whose body must route to
//! `noSuchMethod` (or throw) on every call.

use std::sync::Arc;

use crate::error::{BuildError, BuildResult};
use crate::il::{AssertKind, BinaryOp, ComparisonKind, EntryKind, InvocationKind, PrologueInfo, RebindRule, Slot};
use crate::kernel::VariableId;
use crate::object::{ArgumentsDescriptor, ConstValue, Function};

use super::calls::{invocation_type_of, CallShape};
use super::{FlowGraphBuilder, Fragment, TypeChecksToBuild};

/// Word size of the target in bytes
const WORD_SIZE: i64 = 8;
/// Frame slot index, relative to the frame pointer, just past the last parameter
const PARAM_END_FROM_FP: i64 = 1;

impl<'a> FlowGraphBuilder<'a> {
    /// Entry, prologue and stack check shared by dispatcher shapes
    fn begin_dispatcher(&mut self, f: &Function) -> (Fragment, PrologueInfo) {
        let normal_entry = self.function_entry();
        self.graph.set_normal_entry(normal_entry);
        let prologue = self
            .ctx
            .prologue
            .build_prologue(&mut self.graph, f, normal_entry, self.ctx.osr_id);
        let mut body = Fragment::span(normal_entry, prologue.cursor);
        self.check_stack_overflow_in_prologue(&mut body);
        (body, prologue.info)
    }

    fn saved_descriptor(&self, f: &Function) -> BuildResult<ArgumentsDescriptor> {
        f.saved_args_desc.clone().ok_or_else(|| BuildError::Unsupported {
            function: f.id,
            what: "dispatcher without a saved arguments descriptor".to_string(),
        })
    }

    fn function_type_arguments_variable(&self) -> BuildResult<VariableId> {
        self.scopes
            .function_type_arguments
            .ok_or(BuildError::MissingScopes(self.function))
    }

    /// Array of the arguments described by `descriptor`: the type-argument
    /// vector first when passed, then positional arguments, then named
    /// arguments at their call positions
    fn build_arguments_array(&mut self, code: &mut Fragment, descriptor: &ArgumentsDescriptor) -> BuildResult<()> {
        let array_class = self.store.core().array;
        let receiver_index = usize::from(descriptor.type_args_len() > 0);
        self.null_constant(code);
        self.int_constant(code, (receiver_index + descriptor.count()) as i64);
        self.create_array(code)?;
        let array = self.make_temporary()?;

        if receiver_index > 0 {
            let type_args = self.function_type_arguments_variable()?;
            self.load_temp(code, array)?;
            self.int_constant(code, 0);
            self.load_local(code, type_args)?;
            self.store_indexed(code, array_class)?;
        }
        for i in 0..descriptor.positional_count() {
            let parameter = self.parameter_variable(i)?;
            self.load_temp(code, array)?;
            self.int_constant(code, (receiver_index + i) as i64);
            self.load_local(code, parameter)?;
            self.store_indexed(code, array_class)?;
        }
        for i in 0..descriptor.named_count() {
            let parameter = self.parameter_variable(descriptor.positional_count() + i)?;
            self.load_temp(code, array)?;
            self.int_constant(code, (receiver_index + descriptor.position_at(i)) as i64);
            self.load_local(code, parameter)?;
            self.store_indexed(code, array_class)?;
        }
        Ok(())
    }

    /// `receiver.noSuchMethod(new Invocation(name, arguments))`
    pub(super) fn build_no_such_method_dispatcher(&mut self, f: &'a Function) -> BuildResult<PrologueInfo> {
        let descriptor = self.saved_descriptor(f)?;
        let (mut body, info) = self.begin_dispatcher(f);

        let receiver = self.parameter_variable(0)?;
        self.load_local(&mut body, receiver)?;
        self.push_argument(&mut body)?;

        self.constant(&mut body, ConstValue::string(&f.name));
        self.push_argument(&mut body)?;
        self.constant(&mut body, ConstValue::ArgumentsDescriptor(Arc::new(descriptor.clone())));
        self.push_argument(&mut body)?;
        self.build_arguments_array(&mut body, &descriptor)?;
        self.push_argument(&mut body)?;
        // Not a super invocation.
        self.bool_constant(&mut body, false);
        self.push_argument(&mut body)?;

        let core = self.store.core();
        let allocate_mirror = core.allocate_invocation_mirror;
        let no_such_method = self
            .store
            .resolve_dynamic_function(f.owner, "noSuchMethod")
            .unwrap_or(core.object_no_such_method);
        self.static_call_simple(&mut body, allocate_mirror, 4)?;
        self.push_argument(&mut body)?;
        self.static_call(
            &mut body,
            no_such_method,
            &CallShape::positional(2),
            RebindRule::NsmDispatch,
            None,
            EntryKind::Normal,
        )?;
        self.return_value(&mut body)?;
        Ok(info)
    }

    /// Call the value of the field `f.name` (or the closure itself for
    /// `_Closure.call`) with the dispatcher's arguments
    pub(super) fn build_invoke_field_dispatcher(&mut self, f: &'a Function) -> BuildResult<PrologueInfo> {
        let descriptor = self.saved_descriptor(f)?;
        let is_closure_call = f.owner == self.store.core().closure && f.name == "call";
        let (mut body, info) = self.begin_dispatcher(f);

        if descriptor.type_args_len() > 0 {
            let type_args = self.function_type_arguments_variable()?;
            self.load_local(&mut body, type_args)?;
            self.push_argument(&mut body)?;
        }

        let receiver = self.parameter_variable(0)?;
        if is_closure_call {
            self.load_local(&mut body, receiver)?;
        } else {
            self.load_local(&mut body, receiver)?;
            self.push_argument(&mut body)?;
            self.instance_call(
                &mut body,
                &f.name,
                InvocationKind::Getter,
                &CallShape::positional(1),
                None,
                EntryKind::Normal,
            )?;
        }
        self.push_argument(&mut body)?;

        for position in 1..descriptor.count() {
            let parameter = self.parameter_variable(position)?;
            self.load_local(&mut body, parameter)?;
            self.push_argument(&mut body)?;
        }

        let shape = CallShape {
            type_args_len: descriptor.type_args_len(),
            argument_count: descriptor.count(),
            argument_names: descriptor.names_in_call_order(),
        };
        if is_closure_call {
            self.load_local(&mut body, receiver)?;
            self.load_native_field(&mut body, Slot::ClosureFunction)?;
            self.closure_call(&mut body, &shape)?;
        } else {
            self.instance_call(&mut body, "call", InvocationKind::Method, &shape, None, EntryKind::Normal)?;
        }
        self.return_value(&mut body)?;
        Ok(info)
    }

    /// Body of a member that forwards every call to `noSuchMethod`, or
    /// throws a `NoSuchMethodError` when `throw_no_such_method_error` is set.
    ///
    /// Inside a tear-off (`is_implicit_closure`) the receiver lives in the
    /// closure's context and is written back into its frame slot first.
    pub(super) fn build_no_such_method_forwarder(
        &mut self,
        f: &'a Function,
        is_implicit_closure: bool,
        throw_no_such_method_error: bool,
    ) -> BuildResult<PrologueInfo> {
        let (mut body, info) = self.begin_dispatcher(f);

        if is_implicit_closure && !f.is_static {
            if self.scopes.arg_desc.is_some() {
                self.load_arg_descriptor(&mut body)?;
                self.load_native_field(&mut body, Slot::ArgumentsDescriptorCount)?;
            } else {
                self.int_constant(&mut body, f.num_parameters() as i64);
            }
            self.load_captured_receiver(&mut body)?;
            self.store_fp_relative_slot(&mut body, WORD_SIZE * PARAM_END_FROM_FP)?;
        }

        if Self::needs_argument_type_checks(f) {
            let checks = self.build_argument_type_checks(f, TypeChecksToBuild::All)?;
            body = body
                .append(checks.explicit, &mut self.graph)
                .append(checks.implicit, &mut self.graph);
        }

        self.make_temp(&mut body)?;
        let result = self.make_temporary()?;

        // One extra slot when type arguments were passed.
        let counter = self.scopes.expression_temp;
        self.store_int(&mut body, counter, 0)?;
        if f.is_generic() {
            let mut present = Fragment::empty();
            self.store_int(&mut present, counter, 1)?;
            self.test_any_type_args(&mut body, present, Fragment::empty())?;
        }
        if f.has_optional_parameters() {
            self.load_arg_descriptor(&mut body)?;
            self.load_native_field(&mut body, Slot::ArgumentsDescriptorCount)?;
        } else {
            self.int_constant(&mut body, f.num_parameters() as i64);
        }
        self.load_local(&mut body, counter)?;
        self.smi_binary_op(&mut body, BinaryOp::Add, true)?;
        let argument_count = self.make_temporary()?;

        self.null_constant(&mut body);
        self.load_temp(&mut body, argument_count)?;
        self.create_array(&mut body)?;
        let arguments = self.make_temporary()?;
        self.copy_frame_arguments(&mut body, f, counter, argument_count, arguments)?;

        if is_implicit_closure {
            if throw_no_such_method_error {
                let parent_owner = f.parent.map(|p| self.store.function(p).owner).unwrap_or(f.owner);
                let ty = self.store.class(parent_owner).declaration_type;
                self.constant(&mut body, ConstValue::Type(ty));
            } else {
                self.load_captured_receiver(&mut body)?;
            }
        } else {
            let receiver = self.parameter_variable(0)?;
            self.load_local(&mut body, receiver)?;
        }
        self.push_argument(&mut body)?;

        self.constant(&mut body, ConstValue::string(&f.name));
        self.push_argument(&mut body)?;
        if self.scopes.arg_desc.is_some() {
            self.load_arg_descriptor(&mut body)?;
        } else {
            let descriptor = ArgumentsDescriptor::positional(0, f.num_parameters());
            self.constant(&mut body, ConstValue::ArgumentsDescriptor(Arc::new(descriptor)));
        }
        self.push_argument(&mut body)?;
        self.load_temp(&mut body, arguments)?;
        self.push_argument(&mut body)?;
        if throw_no_such_method_error {
            let parent_owner = f.parent.map(|p| self.store.function(p).owner).unwrap_or(f.owner);
            self.int_constant(&mut body, invocation_type_of(f, self.store.class(parent_owner)));
        } else {
            self.null_constant(&mut body);
        }
        self.push_argument(&mut body)?;

        // Number of delayed type arguments.
        if f.is_closure_function() {
            let closure = self.parameter_variable(0)?;
            let mut present = Fragment::empty();
            self.store_int(&mut present, counter, f.type_parameters.len() as i64)?;
            let mut absent = Fragment::empty();
            self.store_int(&mut absent, counter, 0)?;
            self.test_delayed_type_args(&mut body, closure, present, absent)?;
            self.load_local(&mut body, counter)?;
        } else {
            self.int_constant(&mut body, 0);
        }
        self.push_argument(&mut body)?;

        let core = self.store.core();
        let (allocate_mirror, throw_new_invocation) =
            (core.allocate_invocation_mirror_for_closure, core.throw_new_invocation);
        self.static_call_simple(&mut body, allocate_mirror, 5)?;
        self.push_argument(&mut body)?;
        if throw_no_such_method_error {
            self.static_call(
                &mut body,
                throw_new_invocation,
                &CallShape::positional(2),
                RebindRule::Static,
                None,
                EntryKind::Normal,
            )?;
        } else {
            self.instance_call(
                &mut body,
                "noSuchMethod",
                InvocationKind::Method,
                &CallShape::positional(2),
                None,
                EntryKind::Normal,
            )?;
        }
        self.store_temp(&mut body, result)?;
        self.drop_value(&mut body)?;
        // arguments, argument count
        self.drop_value(&mut body)?;
        self.drop_value(&mut body)?;

        self.check_assignable(&mut body, f.result_type, "", AssertKind::InsertedByFrontend)?;
        self.return_value(&mut body)?;
        Ok(info)
    }

    /// Receiver captured by a tear-off: slot 0 of the closure's context
    pub(super) fn load_captured_receiver(&mut self, code: &mut Fragment) -> BuildResult<()> {
        let closure = self.parameter_variable(0)?;
        self.load_local(code, closure)?;
        self.load_native_field(code, Slot::ClosureContext)?;
        self.load_native_field(code, Slot::ContextVariable(0))?;
        Ok(())
    }

    fn store_int(&mut self, code: &mut Fragment, variable: VariableId, value: i64) -> BuildResult<()> {
        self.int_constant(code, value);
        self.store_local(code, variable)?;
        self.drop_value(code)
    }

    /// `arguments[i] = frame[argument_count - i]` for every passed argument,
    /// starting with the type-argument vector when one was passed
    fn copy_frame_arguments(
        &mut self,
        code: &mut Fragment,
        f: &Function,
        index: VariableId,
        argument_count: usize,
        arguments: usize,
    ) -> BuildResult<()> {
        let array_class = self.store.core().array;
        self.store_int(code, index, 0)?;
        if f.is_generic() {
            let mut store = Fragment::empty();
            self.load_temp(&mut store, arguments)?;
            self.int_constant(&mut store, 0);
            self.load_function_type_arguments(&mut store)?;
            self.store_indexed(&mut store, array_class)?;
            self.store_int(&mut store, index, 1)?;
            self.test_any_type_args(code, store, Fragment::empty())?;
        }

        let header = self.join_entry();
        self.goto(code, header)?;
        self.continue_at(code, header);
        self.load_local(code, index)?;
        self.load_temp(code, argument_count)?;
        self.smi_relational_op(code, ComparisonKind::Less)?;
        let (body_entry, loop_exit) = self.branch_if_true(code, false)?;

        let mut body = Fragment::single(body_entry);
        self.load_temp(&mut body, arguments)?;
        self.load_local(&mut body, index)?;
        self.load_temp(&mut body, argument_count)?;
        self.load_local(&mut body, index)?;
        self.smi_binary_op(&mut body, BinaryOp::Sub, true)?;
        self.load_fp_relative_slot(&mut body, WORD_SIZE * PARAM_END_FROM_FP)?;
        self.store_indexed(&mut body, array_class)?;
        self.load_local(&mut body, index)?;
        self.int_constant(&mut body, 1);
        self.smi_binary_op(&mut body, BinaryOp::Add, true)?;
        self.store_local(&mut body, index)?;
        self.drop_value(&mut body)?;
        self.goto(&mut body, header)?;

        self.continue_at(code, loop_exit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::{build_flow_graph, BuildContext};
    use crate::il::{InstrKind, RebindRule};
    use crate::kernel::KernelProgram;
    use crate::object::{ArgumentsDescriptor, FunctionKind, ObjectStore, Parameter};

    #[test]
    fn test_no_such_method_dispatcher_fills_arguments_array() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let dynamic = store.types().dynamic();
        let class = store.declare_class("A", None, Some(object), &[]);
        let mut d = store.new_function("foo", class, FunctionKind::NoSuchMethodDispatcher);
        d.parameters = vec![Parameter::new("a", dynamic), Parameter::new("b", dynamic)];
        d.num_fixed_parameters = 2;
        d.saved_args_desc = Some(ArgumentsDescriptor::positional(0, 3));
        let d = store.add_function(d);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), d).unwrap();

        assert_eq!(graph.count(|k| matches!(k, InstrKind::CreateArray)), 1);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::StoreIndexed { .. })), 3);
        let object_nsm = store.core().object_no_such_method;
        let dispatch = graph.find_all(|k| {
            matches!(
                k,
                InstrKind::StaticCall {
                    rebind: RebindRule::NsmDispatch,
                    ..
                }
            )
        });
        assert_eq!(dispatch.len(), 1);
        match graph.kind(dispatch[0]) {
            InstrKind::StaticCall { target, .. } => assert_eq!(*target, object_nsm),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invoke_field_dispatcher_calls_getter_result() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let dynamic = store.types().dynamic();
        let class = store.declare_class("A", None, Some(object), &[]);
        let mut d = store.new_function("callback", class, FunctionKind::InvokeFieldDispatcher);
        d.parameters = vec![Parameter::new("x", dynamic)];
        d.num_fixed_parameters = 1;
        d.saved_args_desc = Some(ArgumentsDescriptor::positional(0, 2));
        let d = store.add_function(d);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), d).unwrap();

        let names: Vec<String> = graph
            .find_all(|k| matches!(k, InstrKind::InstanceCall { .. }))
            .into_iter()
            .filter_map(|i| match graph.kind(i) {
                InstrKind::InstanceCall { name, argument_count, .. } => Some(format!("{}/{}", name, argument_count)),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["callback/1".to_string(), "call/2".to_string()]);
    }

    #[test]
    fn test_forwarder_copies_arguments_in_a_loop() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let dynamic = store.types().dynamic();
        let class = store.declare_class("A", None, Some(object), &[]);
        let mut m = store.new_function("m", class, FunctionKind::Regular);
        m.parameters = vec![Parameter::new("x", dynamic)];
        m.num_fixed_parameters = 1;
        m.is_no_such_method_forwarder = true;
        let m = store.add_function(m);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), m).unwrap();

        assert_eq!(graph.count(|k| matches!(k, InstrKind::LoadFpRelativeSlot { .. })), 1);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Goto { .. })), 2);
        assert!(graph.count(|k| matches!(k, InstrKind::InstanceCall { name, .. } if name == "noSuchMethod")) == 1);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Return)), 1);
    }
}
