//! FFI trampolines and callbacks
//!
//! A trampoline is called from managed code: it unboxes each argument into
//! the representation the foreign calling convention expects, calls the
//! address captured by the trampoline's closure and boxes the result. A
//! callback is the reverse: native code enters it through a native entry with
//! unboxed parameters.
//!
//! The callback body runs inside a synthesized catch-all handler. An
//! exception must never unwind into foreign frames; the handler returns the
//! callback's exceptional-return value instead.

use tracing::trace;

use crate::error::{BuildError, BuildResult};
use crate::il::repr::{native_representation, small_representation};
use crate::il::{EntryKind, InstrKind, PrologueInfo, RebindRule, Representation, Slot, StoreBarrier, StoreKind};
use crate::object::{ConstValue, FfiSignature, Function, NativeType, TypeArgsId};

use super::calls::CallShape;
use super::{FlowGraphBuilder, Fragment};

/// Representation a value of `ty` is passed in under the calling convention.
/// With a soft-float ABI floating point values travel in integer registers.
pub(crate) fn calling_convention_representation(ty: NativeType, soft_float: bool) -> Representation {
    match ty {
        NativeType::Float if soft_float => Representation::UnboxedInt32,
        NativeType::Double if soft_float => Representation::UnboxedInt64,
        _ => native_representation(ty),
    }
}

impl<'a> FlowGraphBuilder<'a> {
    fn signature_of(&self, f: &'a Function) -> BuildResult<&'a FfiSignature> {
        f.ffi.as_ref().ok_or_else(|| BuildError::Unsupported {
            function: f.id,
            what: "trampoline without a foreign signature".to_string(),
        })
    }

    fn argument_representations(&self, signature: &FfiSignature) -> Vec<Representation> {
        let soft_float = self.ctx.config.soft_float_abi;
        signature
            .arguments
            .iter()
            .map(|&ty| calling_convention_representation(ty, soft_float))
            .collect()
    }

    fn result_representation(&self, signature: &FfiSignature) -> Representation {
        calling_convention_representation(signature.result, self.ctx.config.soft_float_abi)
    }

    /// Managed value on top of the stack to its native form in `native_rep`
    fn ffi_convert_to_native(
        &mut self,
        code: &mut Fragment,
        f: &Function,
        ty: NativeType,
        native_rep: Representation,
    ) -> BuildResult<()> {
        self.check_null(code, &f.name, true)?;
        if ty == NativeType::Pointer {
            self.load_native_field(code, Slot::PointerAddress)?;
            self.unbox_truncate(code, Representation::UnboxedIntPtr)?;
            return Ok(());
        }
        let from = native_representation(ty);
        self.unbox_truncate(code, from)?;
        if from != native_rep {
            self.bit_cast(code, from, native_rep)?;
        } else if let Some(small) = small_representation(ty) {
            self.width_extend(code, from, small)?;
        }
        Ok(())
    }

    /// Native value in `native_rep` on top of the stack to a managed value
    fn ffi_convert_to_managed(
        &mut self,
        code: &mut Fragment,
        pointer_type_arguments: Option<TypeArgsId>,
        ty: NativeType,
        native_rep: Representation,
    ) -> BuildResult<()> {
        match ty {
            NativeType::Pointer => {
                self.box_value(code, Representation::UnboxedIntPtr)?;
                self.ffi_pointer_from_address(code, pointer_type_arguments)
            }
            NativeType::Void => {
                self.drop_value(code)?;
                self.null_constant(code);
                Ok(())
            }
            _ => {
                let to = native_representation(ty);
                if native_rep != to {
                    self.bit_cast(code, native_rep, to)?;
                } else if let Some(small) = small_representation(ty) {
                    self.width_extend(code, native_rep, small)?;
                }
                self.box_value(code, to)?;
                Ok(())
            }
        }
    }

    /// Wrap the boxed address on top of the stack in a new `Pointer` carrying
    /// `type_arguments`
    fn ffi_pointer_from_address(&mut self, code: &mut Fragment, type_arguments: Option<TypeArgsId>) -> BuildResult<()> {
        let pointer_class = self.store.core().pointer;
        let address = self.make_temporary()?;
        let result = self.scopes.expression_temp;

        self.constant(code, type_arguments.map_or(ConstValue::Null, ConstValue::TypeArguments));
        self.push_argument(code)?;
        self.allocate_object(code, pointer_class, 1, None)?;
        let pointer = self.make_temporary()?;
        self.load_temp(code, pointer)?;
        self.load_temp(code, address)?;
        self.store_instance_field(code, Slot::PointerAddress, StoreKind::Initializing, StoreBarrier::Emit)?;
        self.store_local(code, result)?;
        self.drop_value(code)?;
        // address
        self.drop_value(code)?;
        self.load_local(code, result)?;
        Ok(())
    }

    /// Managed-to-native trampoline
    pub(super) fn build_ffi_native(&mut self, f: &'a Function) -> BuildResult<PrologueInfo> {
        let signature = self.signature_of(f)?;
        let argument_reps = self.argument_representations(signature);

        let normal_entry = self.function_entry();
        self.graph.set_normal_entry(normal_entry);
        let prologue = self
            .ctx
            .prologue
            .build_prologue(&mut self.graph, f, normal_entry, self.ctx.osr_id);
        let mut body = Fragment::span(normal_entry, prologue.cursor);
        self.check_stack_overflow_in_prologue(&mut body);

        let checks = self.build_argument_type_checks(f, super::TypeChecksToBuild::All)?;
        body = body
            .append(checks.explicit, &mut self.graph)
            .append(checks.implicit, &mut self.graph);

        let implicit = f.num_implicit_parameters();
        for (i, (&ty, &rep)) in signature.arguments.iter().zip(&argument_reps).enumerate() {
            let parameter = self.parameter_variable(implicit + i)?;
            self.load_local(&mut body, parameter)?;
            self.ffi_convert_to_native(&mut body, f, ty, rep)?;
        }

        // The target address is boxed in the first slot of the closure's context.
        self.load_captured_receiver(&mut body)?;
        self.unbox_truncate(&mut body, Representation::UnboxedIntPtr)?;
        self.ffi_call(&mut body, signature, argument_reps)?;

        let result_rep = self.result_representation(signature);
        self.ffi_convert_to_managed(&mut body, signature.pointer_result_type_arguments, signature.result, result_rep)?;
        self.return_value(&mut body)?;
        Ok(prologue.info)
    }

    /// Native-to-managed callback of `f.target`
    pub(super) fn build_ffi_callback(&mut self, f: &'a Function) -> BuildResult<PrologueInfo> {
        let signature = self.signature_of(f)?;
        let target = f.target.ok_or_else(|| BuildError::MissingTarget {
            function: f.id,
            name: f.name.clone(),
        })?;
        let argument_reps = self.argument_representations(signature);
        let result_rep = self.result_representation(signature);

        let block = self.graph.alloc_block_id();
        let native_entry = self.graph.push(
            InstrKind::NativeEntry {
                block,
                callback_id: f.id.0,
            },
            Vec::new(),
        );
        self.graph.set_normal_entry(native_entry);
        let mut code = Fragment::single(native_entry);
        self.check_stack_overflow_in_prologue(&mut code);

        let try_index = self.allocate_try_index();
        let at_try = self.contexts.save();
        let depth = self.stack.len();
        trace!(target: "kilt::builder", function = %f.name, try_index, "callback handler");

        self.try_catch(&mut code, try_index)?;
        self.try_depth += 1;
        let outer_try_index = self.current_try_index;
        self.current_try_index = Some(try_index);
        let built = self.build_callback_body(&mut code, f, signature, target, &argument_reps, result_rep);
        self.current_try_index = outer_try_index;
        self.try_depth -= 1;
        built?;
        self.stack.truncate(depth);

        self.catch_depth += 1;
        let built = self.build_callback_handler(f, signature, try_index, result_rep, at_try);
        self.catch_depth -= 1;
        built?;
        Ok(PrologueInfo::empty())
    }

    fn build_callback_body(
        &mut self,
        code: &mut Fragment,
        f: &Function,
        signature: &FfiSignature,
        target: crate::object::FunctionId,
        argument_reps: &[Representation],
        result_rep: Representation,
    ) -> BuildResult<()> {
        for (index, (&ty, &repr)) in signature.arguments.iter().zip(argument_reps).enumerate() {
            let parameter = self.emit(code, InstrKind::NativeParameter { index, repr }, Vec::new());
            self.stack.push(parameter);
            let type_arguments = signature.pointer_argument_type_arguments_at(index);
            self.ffi_convert_to_managed(code, type_arguments, ty, repr)?;
            self.push_argument(code)?;
        }
        self.static_call(
            code,
            target,
            &CallShape::positional(signature.arguments.len()),
            RebindRule::NoRebind,
            None,
            EntryKind::Normal,
        )?;
        if signature.result == NativeType::Void {
            self.drop_value(code)?;
            self.int_constant(code, 0);
            self.unbox_truncate(code, Representation::UnboxedIntPtr)?;
        } else {
            self.ffi_convert_to_native(code, f, signature.result, result_rep)?;
        }
        self.native_return(code, result_rep)
    }

    /// Catch-all handler returning the exceptional-return value; zero for
    /// pointer and void results
    fn build_callback_handler(
        &mut self,
        f: &Function,
        signature: &FfiSignature,
        try_index: u32,
        result_rep: Representation,
        at_try: super::ContextCursor,
    ) -> BuildResult<()> {
        let mut handler = self.catch_block_entry(Vec::new(), try_index, false, true, at_try)?;
        if matches!(signature.result, NativeType::Pointer | NativeType::Void) {
            self.int_constant(&mut handler, 0);
            self.unbox_truncate(&mut handler, Representation::UnboxedIntPtr)?;
        } else {
            let value = f.ffi_exceptional_return.clone().unwrap_or(ConstValue::Null);
            self.constant(&mut handler, value);
            self.ffi_convert_to_native(&mut handler, f, signature.result, result_rep)?;
        }
        self.native_return(&mut handler, result_rep)
    }
}

#[cfg(test)]
mod tests {
    use super::calling_convention_representation;
    use crate::builder::{build_flow_graph, BuildContext};
    use crate::config::BuilderConfig;
    use crate::il::{InstrKind, Representation, SmallRepresentation};
    use crate::kernel::KernelProgram;
    use crate::object::{ConstValue, FfiSignature, FunctionId, FunctionKind, NativeType, ObjectStore, Parameter};

    fn trampoline(store: &mut ObjectStore, arguments: Vec<NativeType>, result: NativeType) -> FunctionId {
        let object = store.core().object;
        let dynamic = store.types().dynamic();
        let mut f = store.new_function("_ffiTrampoline", object, FunctionKind::FfiTrampoline);
        f.parameters = (0..arguments.len())
            .map(|i| Parameter::new(&format!("a{}", i), dynamic))
            .collect();
        f.num_fixed_parameters = arguments.len();
        f.ffi = Some(FfiSignature {
            arguments,
            result,
            pointer_result_type_arguments: None,
            pointer_argument_type_arguments: Vec::new(),
            is_callback: false,
        });
        store.add_function(f)
    }

    fn callback(store: &mut ObjectStore, arguments: Vec<NativeType>, result: NativeType) -> FunctionId {
        let object = store.core().object;
        let dynamic = store.types().dynamic();
        let mut target = store.new_function("onEvent", object, FunctionKind::Regular);
        target.is_static = true;
        target.parameters = (0..arguments.len())
            .map(|i| Parameter::new(&format!("a{}", i), dynamic))
            .collect();
        target.num_fixed_parameters = arguments.len();
        let target = store.add_function(target);
        let mut f = store.new_function("_ffiCallback", object, FunctionKind::FfiTrampoline);
        f.is_static = true;
        f.target = Some(target);
        f.ffi_exceptional_return = Some(ConstValue::Int(-1));
        f.ffi = Some(FfiSignature {
            arguments,
            result,
            pointer_result_type_arguments: None,
            pointer_argument_type_arguments: Vec::new(),
            is_callback: true,
        });
        store.add_function(f)
    }

    #[test]
    fn test_soft_float_passes_doubles_as_integers() {
        assert_eq!(
            calling_convention_representation(NativeType::Double, true),
            Representation::UnboxedInt64
        );
        assert_eq!(
            calling_convention_representation(NativeType::Double, false),
            Representation::UnboxedDouble
        );
        assert_eq!(
            calling_convention_representation(NativeType::Int8, true),
            Representation::UnboxedInt32
        );
    }

    #[test]
    fn test_trampoline_extends_small_arguments() {
        let mut store = ObjectStore::new();
        let f = trampoline(&mut store, vec![NativeType::Int8, NativeType::Double], NativeType::Int32);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), f).unwrap();

        assert_eq!(graph.count(|k| matches!(k, InstrKind::FfiCall { .. })), 1);
        assert_eq!(
            graph.count(|k| matches!(
                k,
                InstrKind::UnboxedWidthExtender {
                    from: SmallRepresentation::Int8,
                    ..
                }
            )),
            1
        );
        assert_eq!(graph.count(|k| matches!(k, InstrKind::BitCast { .. })), 0);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::CheckNull { .. })), 2);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Box(Representation::UnboxedInt32))), 1);
    }

    #[test]
    fn test_trampoline_bit_casts_under_soft_float() {
        let mut store = ObjectStore::new();
        let f = trampoline(&mut store, vec![NativeType::Double], NativeType::Float);
        let program = KernelProgram::new();
        let config = BuilderConfig {
            soft_float_abi: true,
            ..BuilderConfig::default()
        };
        let graph = build_flow_graph(BuildContext::new(&store, &program).with_config(&config), f).unwrap();

        // One cast for the argument, one for the result.
        assert_eq!(graph.count(|k| matches!(k, InstrKind::BitCast { .. })), 2);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Box(Representation::UnboxedFloat))), 1);
    }

    #[test]
    fn test_trampoline_wraps_pointer_result() {
        let mut store = ObjectStore::new();
        let f = trampoline(&mut store, vec![], NativeType::Pointer);
        let pointer = store.core().pointer;
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), f).unwrap();

        assert_eq!(
            graph.count(|k| matches!(k, InstrKind::AllocateObject { class, .. } if *class == pointer)),
            1
        );
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Return)), 1);
    }

    #[test]
    fn test_callback_returns_exceptional_value_from_handler() {
        let mut store = ObjectStore::new();
        let f = callback(&mut store, vec![NativeType::Int32, NativeType::Int64], NativeType::Int32);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), f).unwrap();

        let entry = graph.normal_entry().unwrap();
        assert!(matches!(graph.kind(entry), InstrKind::NativeEntry { .. }));
        assert_eq!(graph.count(|k| matches!(k, InstrKind::NativeParameter { .. })), 2);
        assert_eq!(
            graph.count(|k| matches!(k, InstrKind::CatchEntry { is_synthesized: true, .. })),
            1
        );
        assert_eq!(graph.count(|k| matches!(k, InstrKind::NativeReturn(Representation::UnboxedInt32))), 2);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Constant(ConstValue::Int(-1)))), 1);
    }

    #[test]
    fn test_callback_pointer_argument_carries_its_own_type_arguments() {
        let mut store = ObjectStore::new();
        let int = store.core().int_type;
        let string = store.core().string_type;
        let argument_vector = store.types_mut().intern_vector(vec![int]);
        let result_vector = store.types_mut().intern_vector(vec![string]);
        let f = callback(&mut store, vec![NativeType::Pointer], NativeType::Int32);
        let signature = store.function_mut(f).ffi.as_mut().unwrap();
        signature.pointer_argument_type_arguments = vec![Some(argument_vector)];
        signature.pointer_result_type_arguments = Some(result_vector);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), f).unwrap();

        assert_eq!(
            graph.count(|k| matches!(k, InstrKind::Constant(ConstValue::TypeArguments(t)) if *t == argument_vector)),
            1
        );
        assert_eq!(
            graph.count(|k| matches!(k, InstrKind::Constant(ConstValue::TypeArguments(t)) if *t == result_vector)),
            0
        );
    }

    #[test]
    fn test_void_callback_returns_zero() {
        let mut store = ObjectStore::new();
        let f = callback(&mut store, vec![], NativeType::Void);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), f).unwrap();

        assert_eq!(graph.count(|k| matches!(k, InstrKind::NativeReturn(Representation::UnboxedIntPtr))), 2);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Constant(ConstValue::Int(-1)))), 0);
    }
}
