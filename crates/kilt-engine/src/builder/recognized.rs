//! Recognized-method intrinsics
//!
//! Each recognized library method maps to one [`IntrinsicShape`]; the shape
//! decides the fixed instruction sequence emitted in place of the method's
//! body. The mapping is an exhaustive match, so a new [`RecognizedMethod`]
//! does not compile until it is given a shape.

use tracing::trace;

use crate::error::BuildResult;
use crate::il::repr::native_representation;
use crate::il::{
    AssertKind, BinaryOp, ComparisonKind, InstrKind, PrologueInfo, Representation, Slot, StoreBarrier, StoreKind,
};
use crate::object::{AbstractType, Function, NativeType, RecognizedMethod, TypeParameterOwner};

use super::{FlowGraphBuilder, Fragment};

/// Byte offset of the inner data pointer of typed data objects
const TYPED_DATA_DATA_OFFSET: u32 = 8;

/// Instruction sequence emitted for a recognized method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum IntrinsicShape {
    /// Identity comparison of the receiver and the argument
    StrictEquals,
    /// Load the chain of native fields starting from parameter 0
    FieldChain(&'static [Slot]),
    /// `String.length == 0`
    StringIsEmpty,
    /// Class id of parameter 0
    ClassId,
    /// Fixed or growable list, depending on the positional argument count
    ListFactory,
    /// `_List` allocation from the type arguments and length
    ArrayAllocate,
    /// Store parameter 1 into a native field of parameter 0, returning null
    FieldSetter(Slot, StoreBarrier),
    /// Target calling convention
    FfiAbi,
    /// Typed-data view over a buffer
    TypedDataViewFactory,
    /// Foreign memory read of one element
    MemoryLoad(NativeType),
    /// Foreign memory write of one element
    MemoryStore(NativeType),
    /// `Pointer<T>` wrapping an integer address
    PointerFromAddress,
    /// Integer address of a pointer
    PointerGetAddress,
}

/// Shape emitted for `kind`
pub(super) fn intrinsic_shape(kind: RecognizedMethod) -> IntrinsicShape {
    use IntrinsicShape as S;
    use RecognizedMethod as R;
    match kind {
        R::ObjectEquals => S::StrictEquals,
        R::StringBaseLength => S::FieldChain(&[Slot::StringLength]),
        R::StringBaseIsEmpty => S::StringIsEmpty,
        R::GrowableArrayLength => S::FieldChain(&[Slot::GrowableArrayLength]),
        R::ObjectArrayLength | R::ImmutableArrayLength => S::FieldChain(&[Slot::ArrayLength]),
        R::TypedListLength | R::TypedListViewLength => S::FieldChain(&[Slot::TypedDataLength]),
        R::TypedDataViewOffsetInBytes => S::FieldChain(&[Slot::TypedDataViewOffsetInBytes]),
        R::TypedDataViewTypedData => S::FieldChain(&[Slot::TypedDataViewData]),
        R::ClassIdGetId => S::ClassId,
        R::GrowableArrayCapacity => S::FieldChain(&[Slot::GrowableArrayData, Slot::ArrayLength]),
        R::ListFactory => S::ListFactory,
        R::ObjectArrayAllocate => S::ArrayAllocate,
        R::LinkedHashMapGetIndex => S::FieldChain(&[Slot::LinkedHashMapIndex]),
        R::LinkedHashMapSetIndex => S::FieldSetter(Slot::LinkedHashMapIndex, StoreBarrier::Emit),
        R::LinkedHashMapGetData => S::FieldChain(&[Slot::LinkedHashMapData]),
        R::LinkedHashMapSetData => S::FieldSetter(Slot::LinkedHashMapData, StoreBarrier::Emit),
        R::LinkedHashMapGetHashMask => S::FieldChain(&[Slot::LinkedHashMapHashMask]),
        R::LinkedHashMapSetHashMask => S::FieldSetter(Slot::LinkedHashMapHashMask, StoreBarrier::NoBarrier),
        R::LinkedHashMapGetUsedData => S::FieldChain(&[Slot::LinkedHashMapUsedData]),
        R::LinkedHashMapSetUsedData => S::FieldSetter(Slot::LinkedHashMapUsedData, StoreBarrier::NoBarrier),
        R::LinkedHashMapGetDeletedKeys => S::FieldChain(&[Slot::LinkedHashMapDeletedKeys]),
        R::LinkedHashMapSetDeletedKeys => {
            S::FieldSetter(Slot::LinkedHashMapDeletedKeys, StoreBarrier::NoBarrier)
        }
        R::FfiAbi => S::FfiAbi,
        R::TypedDataViewFactory => S::TypedDataViewFactory,
        R::FfiLoad(ty) => S::MemoryLoad(ty),
        R::FfiStore(ty) => S::MemoryStore(ty),
        R::FfiFromAddress => S::PointerFromAddress,
        R::FfiGetAddress => S::PointerGetAddress,
    }
}

impl<'a> FlowGraphBuilder<'a> {
    pub(super) fn build_recognized(&mut self, f: &'a Function, kind: RecognizedMethod) -> BuildResult<PrologueInfo> {
        let normal_entry = self.function_entry();
        self.graph.set_normal_entry(normal_entry);
        let prologue = self
            .ctx
            .prologue
            .build_prologue(&mut self.graph, f, normal_entry, self.ctx.osr_id);
        let mut body = Fragment::span(normal_entry, prologue.cursor);
        self.check_stack_overflow_in_prologue(&mut body);

        let shape = intrinsic_shape(kind);
        trace!(target: "kilt::builder", function = %f.name, shape = ?shape, "intrinsic");
        self.build_intrinsic(&mut body, f, shape)?;
        // The sequence produces a value of the declared type.
        self.return_value(&mut body)?;
        Ok(prologue.info)
    }

    fn load_raw_parameter(&mut self, code: &mut Fragment, index: usize) -> BuildResult<()> {
        let v = self.raw_parameter_variable(index)?;
        self.load_local(code, v)?;
        Ok(())
    }

    fn build_intrinsic(&mut self, code: &mut Fragment, f: &Function, shape: IntrinsicShape) -> BuildResult<()> {
        match shape {
            IntrinsicShape::StrictEquals => {
                self.load_raw_parameter(code, 0)?;
                self.load_raw_parameter(code, 1)?;
                self.strict_compare(code, ComparisonKind::StrictEqual, false)?;
            }
            IntrinsicShape::FieldChain(slots) => {
                self.load_raw_parameter(code, 0)?;
                for &slot in slots {
                    self.load_native_field(code, slot)?;
                }
            }
            IntrinsicShape::StringIsEmpty => {
                self.load_raw_parameter(code, 0)?;
                self.load_native_field(code, Slot::StringLength)?;
                self.int_constant(code, 0);
                self.strict_compare(code, ComparisonKind::StrictEqual, false)?;
            }
            IntrinsicShape::ClassId => {
                self.load_raw_parameter(code, 0)?;
                self.load_class_id(code)?;
            }
            IntrinsicShape::ListFactory => self.build_list_factory(code)?,
            IntrinsicShape::ArrayAllocate => {
                self.load_raw_parameter(code, 0)?;
                self.load_raw_parameter(code, 1)?;
                self.create_array(code)?;
            }
            IntrinsicShape::FieldSetter(slot, barrier) => {
                self.load_raw_parameter(code, 0)?;
                self.load_raw_parameter(code, 1)?;
                self.store_instance_field(code, slot, StoreKind::Other, barrier)?;
                self.null_constant(code);
            }
            IntrinsicShape::FfiAbi => {
                self.int_constant(code, self.ctx.config.ffi_abi);
            }
            IntrinsicShape::TypedDataViewFactory => self.build_typed_data_view_factory(code, f)?,
            IntrinsicShape::MemoryLoad(ty) => self.build_memory_load(code, f, ty)?,
            IntrinsicShape::MemoryStore(ty) => self.build_memory_store(code, f, ty)?,
            IntrinsicShape::PointerFromAddress => {
                let pointer_class = self.store.core().pointer;
                self.load_function_type_arguments(code)?;
                self.push_argument(code)?;
                self.allocate_object(code, pointer_class, 1, None)?;
                let pointer = self.make_temporary()?;
                self.load_temp(code, pointer)?;
                self.load_raw_parameter(code, 0)?;
                self.check_null(code, &f.name, true)?;
                self.store_instance_field(code, Slot::PointerAddress, StoreKind::Initializing, StoreBarrier::Emit)?;
            }
            IntrinsicShape::PointerGetAddress => {
                self.load_raw_parameter(code, 0)?;
                self.check_null(code, &f.name, true)?;
                self.load_native_field(code, Slot::PointerAddress)?;
            }
        }
        Ok(())
    }

    /// `List([length])`: `_List(length)` when the length was passed,
    /// otherwise `_GrowableList(0)`
    fn build_list_factory(&mut self, code: &mut Fragment) -> BuildResult<()> {
        let core = self.store.core();
        let (fixed, growable) = (core.array_factory, core.growable_list_factory);
        let temp = self.scopes.expression_temp;

        self.load_arg_descriptor(code)?;
        self.load_native_field(code, Slot::ArgumentsDescriptorPositionalCount)?;
        self.int_constant(code, 2);
        let (allocate_fixed, allocate_growable) = self.branch_if_equal(code, false)?;
        let join = self.join_entry();

        let mut arm = Fragment::single(allocate_fixed);
        self.load_raw_parameter(&mut arm, 0)?;
        self.push_argument(&mut arm)?;
        self.load_raw_parameter(&mut arm, 1)?;
        self.push_argument(&mut arm)?;
        self.static_call_simple(&mut arm, fixed, 2)?;
        self.store_frame_variable(&mut arm, temp)?;
        self.drop_value(&mut arm)?;
        self.goto(&mut arm, join)?;

        let mut arm = Fragment::single(allocate_growable);
        self.load_raw_parameter(&mut arm, 0)?;
        self.push_argument(&mut arm)?;
        self.int_constant(&mut arm, 0);
        self.push_argument(&mut arm)?;
        self.static_call_simple(&mut arm, growable, 2)?;
        self.store_frame_variable(&mut arm, temp)?;
        self.drop_value(&mut arm)?;
        self.goto(&mut arm, join)?;

        self.continue_at(code, join);
        self.load_frame_variable(code, temp);
        Ok(())
    }

    /// Allocate the view class of `f` and point it into the buffer.
    ///
    /// The inner data pointer is computed from untagged values, so no
    /// allocation may happen between its load and its store.
    fn build_typed_data_view_factory(&mut self, code: &mut Fragment, f: &Function) -> BuildResult<()> {
        let (buffer, offset_in_bytes, length) = (1, 2, 3);
        self.allocate_object(code, f.owner, 0, None)?;
        let view = self.make_temporary()?;

        self.load_temp(code, view)?;
        self.load_raw_parameter(code, buffer)?;
        self.store_instance_field(code, Slot::TypedDataViewData, StoreKind::Initializing, StoreBarrier::Emit)?;

        self.load_temp(code, view)?;
        self.load_raw_parameter(code, offset_in_bytes)?;
        self.store_instance_field(
            code,
            Slot::TypedDataViewOffsetInBytes,
            StoreKind::Initializing,
            StoreBarrier::NoBarrier,
        )?;

        self.load_temp(code, view)?;
        self.load_raw_parameter(code, length)?;
        self.store_instance_field(code, Slot::TypedDataLength, StoreKind::Initializing, StoreBarrier::NoBarrier)?;

        self.load_temp(code, view)?;
        self.load_raw_parameter(code, buffer)?;
        self.load_untagged(code, TYPED_DATA_DATA_OFFSET)?;
        self.convert_untagged_to_intptr(code)?;
        self.load_raw_parameter(code, offset_in_bytes)?;
        self.unbox(code, Representation::UnboxedIntPtr, false)?;
        self.binary_integer_op(code, BinaryOp::Add, Representation::UnboxedIntPtr, false)?;
        self.convert_intptr_to_untagged(code)?;
        self.store_untagged(code, TYPED_DATA_DATA_OFFSET)?;
        Ok(())
    }

    /// Untagged address of element `index` of `pointer`:
    /// `pointer.address + index * size_of(ty)` followed by index 0
    fn build_element_address(&mut self, code: &mut Fragment, f: &Function, ty: NativeType) -> BuildResult<()> {
        let (pointer, index) = (0, 1);
        self.load_raw_parameter(code, pointer)?;
        self.check_null(code, &f.name, true)?;
        self.load_native_field(code, Slot::PointerAddress)?;
        self.unbox_truncate(code, Representation::UnboxedIntPtr)?;
        self.load_raw_parameter(code, index)?;
        self.check_null(code, &f.name, true)?;
        self.unbox_truncate(code, Representation::UnboxedIntPtr)?;
        self.int_constant(code, ty.size_in_bytes());
        self.unbox_truncate(code, Representation::UnboxedIntPtr)?;
        self.binary_integer_op(code, BinaryOp::Mul, Representation::UnboxedIntPtr, true)?;
        self.binary_integer_op(code, BinaryOp::Add, Representation::UnboxedIntPtr, true)?;
        self.convert_intptr_to_untagged(code)?;
        self.int_constant(code, 0);
        Ok(())
    }

    fn build_memory_load(&mut self, code: &mut Fragment, f: &Function, ty: NativeType) -> BuildResult<()> {
        self.build_element_address(code, f, ty)?;
        self.load_indexed_typed_data(code, ty)?;
        match ty {
            NativeType::Float => {
                self.float_to_double(code)?;
                self.box_value(code, Representation::UnboxedDouble)?;
            }
            NativeType::Double => {
                self.box_value(code, Representation::UnboxedDouble)?;
            }
            _ => {
                self.box_value(code, native_representation(ty))?;
            }
        }
        if ty == NativeType::Pointer {
            self.wrap_loaded_address(code)?;
        }
        Ok(())
    }

    /// Replace the address on top of the stack with a `Pointer<X>` whose type
    /// argument comes from the `Pointer<Pointer<X>>` parameter
    fn wrap_loaded_address(&mut self, code: &mut Fragment) -> BuildResult<()> {
        let pointer_class = self.store.core().pointer;
        let type_arguments = self.type_arguments_slot(pointer_class)?;
        let address = self.make_temporary()?;
        self.load_raw_parameter(code, 0)?;
        self.load_native_field(code, type_arguments)?;
        self.load_native_field(code, Slot::TypeArgumentsIndex(0))?;
        self.load_native_field(code, Slot::TypeArgumentsOfType)?;
        self.push_argument(code)?;
        self.allocate_object(code, pointer_class, 1, None)?;
        let pointer = self.make_temporary()?;
        self.load_temp(code, pointer)?;
        self.load_temp(code, address)?;
        self.store_instance_field(code, Slot::PointerAddress, StoreKind::Other, StoreBarrier::Emit)?;
        self.drop_temps_preserve_top(code, 1)?;
        Ok(())
    }

    fn build_memory_store(&mut self, code: &mut Fragment, f: &Function, ty: NativeType) -> BuildResult<()> {
        let value = 2;
        if ty == NativeType::Pointer {
            // Checked while nothing untagged is live.
            self.check_stored_pointer_type(code, f)?;
        }
        self.build_element_address(code, f, ty)?;
        self.load_raw_parameter(code, value)?;
        self.check_null(code, &f.name, true)?;
        match ty {
            NativeType::Pointer => {
                self.load_native_field(code, Slot::PointerAddress)?;
            }
            NativeType::Float | NativeType::Double => {
                self.unbox_truncate(code, Representation::UnboxedDouble)?;
                if ty == NativeType::Float {
                    self.double_to_float(code)?;
                }
            }
            _ => {
                self.unbox_truncate(code, native_representation(ty))?;
            }
        }
        self.store_indexed_typed_data(code, ty)?;
        self.null_constant(code);
        Ok(())
    }

    /// Assert the stored value is a `Pointer<X>` for the `X` reified on the
    /// target `Pointer<Pointer<X>>`
    fn check_stored_pointer_type(&mut self, code: &mut Fragment, f: &Function) -> BuildResult<()> {
        let pointer_class = self.store.core().pointer;
        let dst_type = self.store.types().find(&AbstractType::Parameter {
            owner: TypeParameterOwner::Class(pointer_class),
            index: 0,
        });
        let Some(dst_type) = dst_type else {
            return Ok(());
        };
        let type_arguments = self.type_arguments_slot(pointer_class)?;
        self.load_raw_parameter(code, 2)?;
        self.load_raw_parameter(code, 0)?;
        self.check_null(code, &f.name, true)?;
        self.load_native_field(code, type_arguments)?;
        self.null_constant(code);
        self.define(
            code,
            InstrKind::AssertAssignable {
                dst_type,
                dst_name: String::new(),
                kind: AssertKind::InsertedByFrontend,
            },
            3,
        )?;
        self.drop_value(code)
    }
}

#[cfg(test)]
mod tests {
    use super::{intrinsic_shape, IntrinsicShape};
    use crate::builder::{build_flow_graph, BuildContext};
    use crate::il::{BinaryOp, InstrKind, Representation, Slot, StoreBarrier};
    use crate::kernel::KernelProgram;
    use crate::object::{ConstValue, NativeType, ObjectStore, RecognizedMethod};

    #[test]
    fn test_hash_map_scalar_setters_skip_barrier() {
        assert_eq!(
            intrinsic_shape(RecognizedMethod::LinkedHashMapSetHashMask),
            IntrinsicShape::FieldSetter(Slot::LinkedHashMapHashMask, StoreBarrier::NoBarrier)
        );
        assert_eq!(
            intrinsic_shape(RecognizedMethod::LinkedHashMapSetUsedData),
            IntrinsicShape::FieldSetter(Slot::LinkedHashMapUsedData, StoreBarrier::NoBarrier)
        );
        assert_eq!(
            intrinsic_shape(RecognizedMethod::LinkedHashMapSetData),
            IntrinsicShape::FieldSetter(Slot::LinkedHashMapData, StoreBarrier::Emit)
        );
    }

    #[test]
    fn test_capacity_reads_backing_array_length() {
        assert_eq!(
            intrinsic_shape(RecognizedMethod::GrowableArrayCapacity),
            IntrinsicShape::FieldChain(&[Slot::GrowableArrayData, Slot::ArrayLength])
        );
    }

    #[test]
    fn test_uint8_load_scales_index_by_one() {
        let mut store = ObjectStore::new();
        let core = store.core().clone();
        let load = core.add_ffi_load(&mut store, NativeType::Uint8);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), load).unwrap();

        let mul = graph.find_all(|k| {
            matches!(
                k,
                InstrKind::BinaryIntegerOp {
                    op: BinaryOp::Mul,
                    ..
                }
            )
        });
        assert_eq!(mul.len(), 1);
        // Scale operand: the unboxed element size.
        let scale = graph.instr(mul[0]).inputs[1];
        let size = graph.instr(scale).inputs[0];
        assert_eq!(graph.kind(size), &InstrKind::Constant(ConstValue::Int(1)));
        assert_eq!(graph.count(|k| matches!(k, InstrKind::LoadIndexedTypedData(NativeType::Uint8))), 1);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Box(Representation::UnboxedUint32))), 1);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::FloatToDouble)), 0);
    }

    #[test]
    fn test_float_load_widens_before_boxing() {
        let mut store = ObjectStore::new();
        let core = store.core().clone();
        let load = core.add_ffi_load(&mut store, NativeType::Float);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), load).unwrap();
        let boxes = graph.find_all(|k| matches!(k, InstrKind::Box(_)));
        assert_eq!(boxes.len(), 1);
        assert_eq!(graph.kind(boxes[0]), &InstrKind::Box(Representation::UnboxedDouble));
        let widened = graph.instr(boxes[0]).inputs[0];
        assert_eq!(graph.kind(widened), &InstrKind::FloatToDouble);
    }

    #[test]
    fn test_pointer_store_checks_type_before_untagging() {
        let mut store = ObjectStore::new();
        let core = store.core().clone();
        let store_fn = core.add_ffi_store(&mut store, NativeType::Pointer);
        let program = KernelProgram::new();
        let graph = build_flow_graph(BuildContext::new(&store, &program), store_fn).unwrap();
        let order = graph.block_instructions(graph.normal_entry().unwrap());
        let assert_at = order
            .iter()
            .position(|&i| matches!(graph.kind(i), InstrKind::AssertAssignable { .. }))
            .expect("type check");
        let untag_at = order
            .iter()
            .position(|&i| {
                matches!(
                    graph.kind(i),
                    InstrKind::IntConverter {
                        to: Representation::Untagged,
                        ..
                    }
                )
            })
            .expect("address conversion");
        assert!(assert_at < untag_at);
        assert_eq!(graph.count(|k| matches!(k, InstrKind::StoreIndexedTypedData(NativeType::Pointer))), 1);
    }

    #[test]
    fn test_list_factory_selects_by_positional_count() {
        let store = ObjectStore::new();
        let program = KernelProgram::new();
        let factory = store.core().list_factory;
        let graph = build_flow_graph(BuildContext::new(&store, &program), factory).unwrap();
        let calls: Vec<_> = graph
            .find_all(|k| matches!(k, InstrKind::StaticCall { .. }))
            .into_iter()
            .filter_map(|i| match graph.kind(i) {
                InstrKind::StaticCall { target, .. } => Some(*target),
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 2);
        assert!(calls.contains(&store.core().array_factory));
        assert!(calls.contains(&store.core().growable_list_factory));
        assert_eq!(graph.count(|k| matches!(k, InstrKind::Return)), 1);
    }
}
