//! Builder Primitives
//!
//! Single-instruction helpers. Each pops its operands from the value stack,
//! appends the instruction to `code` and pushes the result when the
//! instruction defines a value. Appending to a closed fragment leaves the
//! graph untouched but still applies the stack effect, so dead code keeps
//! the stack balanced.

use std::collections::hash_map::Entry;

use crate::error::{BuildError, BuildResult};
use crate::il::{
    BinaryOp, BlockId, ComparisonKind, InstrId, InstrKind, LocalRef, Representation, SmallRepresentation,
    Slot, StoreBarrier, StoreKind,
};
use crate::kernel::VariableId;
use crate::object::{ClassId, ConstValue, FieldId, FunctionId, NativeType, TypeId};

use super::{FlowGraphBuilder, Fragment};

impl<'a> FlowGraphBuilder<'a> {
    // ===== Value stack =====

    pub(super) fn pop(&mut self) -> BuildResult<InstrId> {
        self.stack.pop().ok_or(BuildError::StackUnderflow {
            function: self.function,
        })
    }

    pub(super) fn pop_n(&mut self, n: usize) -> BuildResult<Vec<InstrId>> {
        self.stack.pop_n(n).ok_or(BuildError::StackUnderflow {
            function: self.function,
        })
    }

    /// Turn the top of the stack into a temporary; returns its slot
    pub(super) fn make_temporary(&self) -> BuildResult<usize> {
        self.stack.len().checked_sub(1).ok_or(BuildError::StackUnderflow {
            function: self.function,
        })
    }

    // ===== Emission =====

    /// Append an instruction without touching the stack
    pub(super) fn emit(&mut self, code: &mut Fragment, kind: InstrKind, inputs: Vec<InstrId>) -> InstrId {
        let id = self.graph.push(kind, inputs);
        *code = code.append(Fragment::single(id), &mut self.graph);
        id
    }

    /// Append a control transfer and close `code`
    pub(super) fn emit_closing(&mut self, code: &mut Fragment, kind: InstrKind, inputs: Vec<InstrId>) -> InstrId {
        let id = self.graph.push(kind, inputs);
        *code = code.append(Fragment::single(id).closed(), &mut self.graph);
        id
    }

    /// Pop `arity` inputs, append, push the result
    pub(super) fn define(&mut self, code: &mut Fragment, kind: InstrKind, arity: usize) -> BuildResult<InstrId> {
        let inputs = self.pop_n(arity)?;
        let id = self.emit(code, kind, inputs);
        self.stack.push(id);
        Ok(id)
    }

    /// Pop `arity` inputs, append, push nothing
    pub(super) fn effect(&mut self, code: &mut Fragment, kind: InstrKind, arity: usize) -> BuildResult<InstrId> {
        let inputs = self.pop_n(arity)?;
        Ok(self.emit(code, kind, inputs))
    }

    // ===== Constants =====

    pub(super) fn constant(&mut self, code: &mut Fragment, value: ConstValue) -> InstrId {
        let id = self.emit(code, InstrKind::Constant(value), Vec::new());
        self.stack.push(id);
        id
    }

    pub(super) fn null_constant(&mut self, code: &mut Fragment) -> InstrId {
        self.constant(code, ConstValue::Null)
    }

    pub(super) fn int_constant(&mut self, code: &mut Fragment, value: i64) -> InstrId {
        self.constant(code, ConstValue::Int(value))
    }

    pub(super) fn bool_constant(&mut self, code: &mut Fragment, value: bool) -> InstrId {
        self.constant(code, ConstValue::Bool(value))
    }

    // ===== Locals and temporaries =====

    /// Read a frame variable
    pub(super) fn load_frame_variable(&mut self, code: &mut Fragment, variable: VariableId) -> InstrId {
        let id = self.emit(code, InstrKind::LoadLocal(LocalRef::Variable(variable)), Vec::new());
        self.stack.push(id);
        id
    }

    /// Write the top of the stack to a frame variable; the value stays
    pub(super) fn store_frame_variable(&mut self, code: &mut Fragment, variable: VariableId) -> BuildResult<InstrId> {
        self.define(code, InstrKind::StoreLocal(LocalRef::Variable(variable)), 1)
    }

    /// Duplicate the temporary in stack slot `index`
    pub(super) fn load_temp(&mut self, code: &mut Fragment, index: usize) -> BuildResult<InstrId> {
        let value = self.stack.at(index).ok_or(BuildError::StackUnderflow {
            function: self.function,
        })?;
        let id = self.emit(code, InstrKind::LoadLocal(LocalRef::Temp(index)), vec![value]);
        self.stack.push(id);
        Ok(id)
    }

    /// Overwrite the temporary in stack slot `index` with the top of the stack
    pub(super) fn store_temp(&mut self, code: &mut Fragment, index: usize) -> BuildResult<InstrId> {
        self.define(code, InstrKind::StoreLocal(LocalRef::Temp(index)), 1)
    }

    /// Placeholder slot filled in later with `store_temp`
    pub(super) fn make_temp(&mut self, code: &mut Fragment) -> BuildResult<InstrId> {
        self.define(code, InstrKind::MakeTemp, 0)
    }

    pub(super) fn drop_value(&mut self, code: &mut Fragment) -> BuildResult<()> {
        self.effect(
            code,
            InstrKind::DropTemps {
                count: 1,
                preserve_top: false,
            },
            1,
        )?;
        Ok(())
    }

    /// Remove the `count` values below the top
    pub(super) fn drop_temps_preserve_top(&mut self, code: &mut Fragment, count: usize) -> BuildResult<InstrId> {
        self.define(
            code,
            InstrKind::DropTemps {
                count,
                preserve_top: true,
            },
            count + 1,
        )
    }

    pub(super) fn push_argument(&mut self, code: &mut Fragment) -> BuildResult<InstrId> {
        self.define(code, InstrKind::PushArgument, 1)
    }

    // ===== Fields =====

    pub(super) fn load_native_field(&mut self, code: &mut Fragment, slot: Slot) -> BuildResult<InstrId> {
        self.define(code, InstrKind::LoadNativeField(slot), 1)
    }

    pub(super) fn load_field(&mut self, code: &mut Fragment, field: FieldId) -> BuildResult<InstrId> {
        self.define(code, InstrKind::LoadField(field), 1)
    }

    /// Inputs `[instance, value]`
    pub(super) fn store_instance_field(
        &mut self,
        code: &mut Fragment,
        slot: Slot,
        kind: StoreKind,
        barrier: StoreBarrier,
    ) -> BuildResult<InstrId> {
        self.effect(code, InstrKind::StoreInstanceField { slot, kind, barrier }, 2)
    }

    /// Field store preceded by the class and length guards the field needs
    pub(super) fn store_instance_field_guarded(
        &mut self,
        code: &mut Fragment,
        field: FieldId,
        kind: StoreKind,
    ) -> BuildResult<InstrId> {
        let f = self.store.field(field);
        if f.needs_guard {
            let value = self.make_temporary()?;
            self.load_temp(code, value)?;
            self.effect(code, InstrKind::GuardFieldClass(field), 1)?;
            if self.needs_length_guard(f.ty) {
                self.load_temp(code, value)?;
                self.effect(code, InstrKind::GuardFieldLength(field), 1)?;
            }
        }
        self.store_instance_field(code, Slot::Field(field), kind, StoreBarrier::Emit)
    }

    fn needs_length_guard(&self, ty: TypeId) -> bool {
        let core = self.store.core();
        self.store
            .types()
            .type_class(ty)
            .is_some_and(|c| c == core.array || c == core.immutable_array || c == core.uint8_list)
    }

    pub(super) fn load_static_field(&mut self, code: &mut Fragment, field: FieldId) -> InstrId {
        let id = self.emit(code, InstrKind::LoadStaticField(field), Vec::new());
        self.stack.push(id);
        id
    }

    pub(super) fn store_static_field(&mut self, code: &mut Fragment, field: FieldId) -> BuildResult<InstrId> {
        self.effect(code, InstrKind::StoreStaticField(field), 1)
    }

    pub(super) fn init_static_field(&mut self, code: &mut Fragment, field: FieldId) -> InstrId {
        self.emit(code, InstrKind::InitStaticField(field), Vec::new())
    }

    // ===== Allocation =====

    pub(super) fn allocate_context(&mut self, code: &mut Fragment, num_variables: usize) -> BuildResult<InstrId> {
        self.define(code, InstrKind::AllocateContext { num_variables }, 0)
    }

    /// Pops `argument_count` pushed arguments (the type-argument vector when present)
    pub(super) fn allocate_object(
        &mut self,
        code: &mut Fragment,
        class: ClassId,
        argument_count: usize,
        closure_function: Option<FunctionId>,
    ) -> BuildResult<InstrId> {
        let inputs = self.get_arguments(argument_count)?;
        let id = self.emit(
            code,
            InstrKind::AllocateObject {
                class,
                argument_count,
                closure_function,
            },
            inputs,
        );
        self.stack.push(id);
        Ok(id)
    }

    /// Inputs `[element type arguments, length]`
    pub(super) fn create_array(&mut self, code: &mut Fragment) -> BuildResult<InstrId> {
        self.define(code, InstrKind::CreateArray, 2)
    }

    /// Inputs `[array, index, value]`
    pub(super) fn store_indexed(&mut self, code: &mut Fragment, class: ClassId) -> BuildResult<InstrId> {
        self.effect(code, InstrKind::StoreIndexed { class }, 3)
    }

    // ===== Frame =====

    pub(super) fn load_class_id(&mut self, code: &mut Fragment) -> BuildResult<InstrId> {
        self.define(code, InstrKind::LoadClassId, 1)
    }

    pub(super) fn load_arg_descriptor(&mut self, code: &mut Fragment) -> BuildResult<InstrId> {
        self.define(code, InstrKind::LoadArgDescriptor, 0)
    }

    /// Input `[index]`
    pub(super) fn load_fp_relative_slot(&mut self, code: &mut Fragment, offset: i64) -> BuildResult<InstrId> {
        self.define(code, InstrKind::LoadFpRelativeSlot { offset }, 1)
    }

    /// Inputs `[index, value]`
    pub(super) fn store_fp_relative_slot(&mut self, code: &mut Fragment, offset: i64) -> BuildResult<InstrId> {
        self.effect(code, InstrKind::StoreFpRelativeSlot { offset }, 2)
    }

    // ===== Checks =====

    pub(super) fn check_null(&mut self, code: &mut Fragment, function_name: &str, optimized: bool) -> BuildResult<InstrId> {
        self.define(
            code,
            InstrKind::CheckNull {
                function_name: function_name.to_string(),
                optimized,
            },
            1,
        )
    }

    pub(super) fn check_stack_overflow(&mut self, code: &mut Fragment) {
        if self.ctx.config.stack_overflow_checks {
            let loop_depth = self.loop_depth;
            self.emit(
                code,
                InstrKind::CheckStackOverflow {
                    loop_depth,
                    in_prologue: false,
                },
                Vec::new(),
            );
        }
    }

    pub(super) fn check_stack_overflow_in_prologue(&mut self, code: &mut Fragment) {
        if self.ctx.config.stack_overflow_checks {
            self.emit(
                code,
                InstrKind::CheckStackOverflow {
                    loop_depth: 0,
                    in_prologue: true,
                },
                Vec::new(),
            );
        }
    }

    pub(super) fn redefinition(&mut self, code: &mut Fragment, ty: TypeId) -> BuildResult<InstrId> {
        self.define(code, InstrKind::Redefinition(ty), 1)
    }

    // ===== Arithmetic =====

    pub(super) fn strict_compare(&mut self, code: &mut Fragment, kind: ComparisonKind, needs_number_check: bool) -> BuildResult<InstrId> {
        self.define(
            code,
            InstrKind::StrictCompare {
                kind,
                needs_number_check,
            },
            2,
        )
    }

    pub(super) fn smi_relational_op(&mut self, code: &mut Fragment, kind: ComparisonKind) -> BuildResult<InstrId> {
        self.define(code, InstrKind::RelationalOp(kind), 2)
    }

    pub(super) fn smi_binary_op(&mut self, code: &mut Fragment, op: BinaryOp, truncating: bool) -> BuildResult<InstrId> {
        self.binary_integer_op(code, op, Representation::Tagged, truncating)
    }

    pub(super) fn binary_integer_op(
        &mut self,
        code: &mut Fragment,
        op: BinaryOp,
        repr: Representation,
        truncating: bool,
    ) -> BuildResult<InstrId> {
        self.define(code, InstrKind::BinaryIntegerOp { op, repr, truncating }, 2)
    }

    pub(super) fn boolean_negate(&mut self, code: &mut Fragment) -> BuildResult<InstrId> {
        self.define(code, InstrKind::BooleanNegate, 1)
    }

    // ===== Representations =====

    pub(super) fn box_value(&mut self, code: &mut Fragment, from: Representation) -> BuildResult<InstrId> {
        self.define(code, InstrKind::Box(from), 1)
    }

    pub(super) fn unbox(&mut self, code: &mut Fragment, to: Representation, truncating: bool) -> BuildResult<InstrId> {
        self.define(code, InstrKind::Unbox { to, truncating }, 1)
    }

    pub(super) fn unbox_truncate(&mut self, code: &mut Fragment, to: Representation) -> BuildResult<InstrId> {
        self.unbox(code, to, true)
    }

    pub(super) fn int_converter(&mut self, code: &mut Fragment, from: Representation, to: Representation) -> BuildResult<InstrId> {
        self.define(code, InstrKind::IntConverter { from, to }, 1)
    }

    pub(super) fn convert_intptr_to_untagged(&mut self, code: &mut Fragment) -> BuildResult<InstrId> {
        self.int_converter(code, Representation::UnboxedIntPtr, Representation::Untagged)
    }

    pub(super) fn convert_untagged_to_intptr(&mut self, code: &mut Fragment) -> BuildResult<InstrId> {
        self.int_converter(code, Representation::Untagged, Representation::UnboxedIntPtr)
    }

    pub(super) fn bit_cast(&mut self, code: &mut Fragment, from: Representation, to: Representation) -> BuildResult<InstrId> {
        self.define(code, InstrKind::BitCast { from, to }, 1)
    }

    pub(super) fn width_extend(
        &mut self,
        code: &mut Fragment,
        repr: Representation,
        from: SmallRepresentation,
    ) -> BuildResult<InstrId> {
        self.define(code, InstrKind::UnboxedWidthExtender { repr, from }, 1)
    }

    pub(super) fn float_to_double(&mut self, code: &mut Fragment) -> BuildResult<InstrId> {
        self.define(code, InstrKind::FloatToDouble, 1)
    }

    pub(super) fn double_to_float(&mut self, code: &mut Fragment) -> BuildResult<InstrId> {
        self.define(code, InstrKind::DoubleToFloat, 1)
    }

    pub(super) fn load_untagged(&mut self, code: &mut Fragment, offset: u32) -> BuildResult<InstrId> {
        self.define(code, InstrKind::LoadUntagged { offset }, 1)
    }

    /// Inputs `[object, value]`
    pub(super) fn store_untagged(&mut self, code: &mut Fragment, offset: u32) -> BuildResult<InstrId> {
        self.effect(code, InstrKind::StoreUntagged { offset }, 2)
    }

    /// Inputs `[address, index]`
    pub(super) fn load_indexed_typed_data(&mut self, code: &mut Fragment, ty: NativeType) -> BuildResult<InstrId> {
        self.define(code, InstrKind::LoadIndexedTypedData(ty), 2)
    }

    /// Inputs `[address, index, value]`
    pub(super) fn store_indexed_typed_data(&mut self, code: &mut Fragment, ty: NativeType) -> BuildResult<InstrId> {
        self.effect(code, InstrKind::StoreIndexedTypedData(ty), 3)
    }

    // ===== Control flow =====

    pub(super) fn target_entry(&mut self) -> InstrId {
        let block = self.graph.alloc_block_id();
        self.graph.push(
            InstrKind::TargetEntry {
                block,
                try_index: self.current_try_index,
            },
            Vec::new(),
        )
    }

    pub(super) fn join_entry(&mut self) -> InstrId {
        let try_index = self.current_try_index;
        self.join_entry_in(try_index)
    }

    pub(super) fn join_entry_in(&mut self, try_index: Option<u32>) -> InstrId {
        let block = self.graph.alloc_block_id();
        self.graph.push(InstrKind::JoinEntry { block, try_index }, Vec::new())
    }

    pub(super) fn function_entry(&mut self) -> InstrId {
        let block = self.graph.alloc_block_id();
        self.graph.push(InstrKind::FunctionEntry { block }, Vec::new())
    }

    /// Jump to `join`. The first edge into a join fixes its stack depth;
    /// later edges must agree.
    pub(super) fn goto(&mut self, code: &mut Fragment, join: InstrId) -> BuildResult<()> {
        if code.is_closed() {
            return Ok(());
        }
        let depth = self.stack.len();
        match self.join_depths.entry(join) {
            Entry::Occupied(e) if *e.get() != depth => {
                let block = self.graph.kind(join).block_id().unwrap_or(BlockId(0));
                return Err(BuildError::JoinStackMismatch {
                    block,
                    expected: *e.get(),
                    actual: depth,
                });
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(e) => {
                e.insert(depth);
            }
        }
        self.emit_closing(code, InstrKind::Goto { target: join }, Vec::new());
        Ok(())
    }

    /// Continue emitting at `block`, restoring the stack depth recorded for a join
    pub(super) fn continue_at(&mut self, code: &mut Fragment, block: InstrId) {
        *code = code.continue_at(block);
        if let Some(&depth) = self.join_depths.get(&block) {
            self.stack.truncate(depth);
        }
    }

    /// Whether any edge reached `join`
    pub(super) fn is_join_reached(&self, join: InstrId) -> bool {
        self.join_depths.contains_key(&join)
    }

    /// Compare the two top values and branch. Returns `(equal, not_equal)`
    /// entries, swapped when `negate` is set.
    pub(super) fn branch_if_equal(&mut self, code: &mut Fragment, negate: bool) -> BuildResult<(InstrId, InstrId)> {
        let inputs = self.pop_n(2)?;
        let true_target = self.target_entry();
        let false_target = self.target_entry();
        let kind = if negate {
            ComparisonKind::StrictNotEqual
        } else {
            ComparisonKind::StrictEqual
        };
        self.emit_closing(
            code,
            InstrKind::Branch {
                kind,
                true_target,
                false_target,
            },
            inputs,
        );
        Ok((true_target, false_target))
    }

    pub(super) fn branch_if_true(&mut self, code: &mut Fragment, negate: bool) -> BuildResult<(InstrId, InstrId)> {
        self.bool_constant(code, true);
        self.branch_if_equal(code, negate)
    }

    pub(super) fn branch_if_null(&mut self, code: &mut Fragment, negate: bool) -> BuildResult<(InstrId, InstrId)> {
        self.null_constant(code);
        self.branch_if_equal(code, negate)
    }

    pub(super) fn return_value(&mut self, code: &mut Fragment) -> BuildResult<()> {
        let value = self.pop()?;
        self.emit_closing(code, InstrKind::Return, vec![value]);
        Ok(())
    }

    pub(super) fn native_return(&mut self, code: &mut Fragment, repr: Representation) -> BuildResult<()> {
        let value = self.pop()?;
        self.emit_closing(code, InstrKind::NativeReturn(repr), vec![value]);
        Ok(())
    }

    /// Throw the pushed argument on top of the stack. A placeholder stands in
    /// for the value of the throw expression.
    pub(super) fn throw_exception(&mut self, code: &mut Fragment) -> BuildResult<()> {
        let exception = self.get_arguments(1)?;
        self.emit_closing(code, InstrKind::Throw, exception);
        self.push_dead_value();
        Ok(())
    }

    /// Rethrow the pushed exception and stack trace
    pub(super) fn rethrow_exception(&mut self, code: &mut Fragment, catch_try_index: u32) -> BuildResult<()> {
        let inputs = self.get_arguments(2)?;
        self.emit_closing(code, InstrKind::ReThrow { catch_try_index }, inputs);
        self.push_dead_value();
        Ok(())
    }

    fn push_dead_value(&mut self) {
        let dead = self.graph.push(InstrKind::Constant(ConstValue::Null), Vec::new());
        self.stack.push(dead);
    }

    /// Pop `n` values that must all be pushed arguments
    pub(super) fn get_arguments(&mut self, n: usize) -> BuildResult<Vec<InstrId>> {
        let arguments = self.pop_n(n)?;
        let all_pushed = arguments
            .iter()
            .all(|&a| matches!(self.graph.kind(a), InstrKind::PushArgument));
        if !all_pushed {
            return Err(BuildError::MissingPushArgument {
                function: self.function,
            });
        }
        Ok(arguments)
    }
}
