//! Pretty-printing for flow graphs
//!
//! Provides a stable textual dump: one section per reachable block in
//! depth-first order, definitions named `vN`.

use std::fmt::{self, Write};

use super::graph::FlowGraph;
use super::instr::{InstrId, InstrKind, LocalRef};

/// Trait for pretty-printing IL constructs
pub trait PrettyPrint {
    /// Render as text
    fn pretty_print(&self) -> String;
}

impl PrettyPrint for FlowGraph {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "graph {} {{", self.function());
        for block in self.blocks() {
            for id in self.block_instructions(block) {
                let instr = self.instr(id);
                let line = format_instr(self, id);
                if instr.kind.is_block_entry() {
                    let _ = writeln!(output, "  {}", line);
                } else {
                    let _ = writeln!(output, "    {}", line);
                }
            }
        }
        let _ = writeln!(output, "}}");
        output
    }
}

impl fmt::Display for FlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty_print())
    }
}

fn block_name(graph: &FlowGraph, entry: InstrId) -> String {
    match graph.kind(entry).block_id() {
        Some(b) => b.to_string(),
        None => entry.to_string(),
    }
}

fn inputs(graph: &FlowGraph, id: InstrId) -> String {
    graph
        .instr(id)
        .inputs
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn local(r: &LocalRef) -> String {
    match r {
        LocalRef::Variable(v) => format!("var{}", v.0),
        LocalRef::Temp(i) => format!("t{}", i),
    }
}

fn format_instr(graph: &FlowGraph, id: InstrId) -> String {
    let args = inputs(graph, id);
    let body = match graph.kind(id) {
        InstrKind::GraphEntry {
            normal_entry,
            unchecked_entry,
            catch_entries,
        } => {
            let mut s = String::from("B0: graph_entry");
            if let Some(e) = normal_entry {
                let _ = write!(s, " normal={}", block_name(graph, *e));
            }
            if let Some(e) = unchecked_entry {
                let _ = write!(s, " unchecked={}", block_name(graph, *e));
            }
            for e in catch_entries {
                let _ = write!(s, " catch={}", block_name(graph, *e));
            }
            return s;
        }
        InstrKind::FunctionEntry { block } => return format!("{}: function_entry", block),
        InstrKind::NativeEntry { block, callback_id } => {
            return format!("{}: native_entry callback={}", block, callback_id)
        }
        InstrKind::TargetEntry { block, try_index } => {
            return format!("{}: target{}", block, try_suffix(*try_index))
        }
        InstrKind::JoinEntry { block, try_index } => {
            return format!("{}: join{}", block, try_suffix(*try_index))
        }
        InstrKind::CatchEntry {
            block,
            catch_try_index,
            handler_types,
            is_synthesized,
            ..
        } => {
            return format!(
                "{}: catch try={} types={}{}",
                block,
                catch_try_index,
                handler_types.len(),
                if *is_synthesized { " synthesized" } else { "" }
            )
        }
        InstrKind::Constant(c) => format!("constant {}", c),
        InstrKind::NativeParameter { index, repr } => format!("native_parameter {} : {}", index, repr),
        InstrKind::LoadLocal(r) => format!("load_local {}", local(r)),
        InstrKind::StoreLocal(r) => format!("store_local {} = {}", local(r), args),
        InstrKind::DropTemps { count, preserve_top } => {
            format!("drop_temps {}{} ({})", count, if *preserve_top { " keep_top" } else { "" }, args)
        }
        InstrKind::MakeTemp => "make_temp".to_string(),
        InstrKind::PushArgument => format!("push_argument {}", args),
        InstrKind::LoadNativeField(slot) => format!("load_field {}.{}", args, slot),
        InstrKind::LoadField(field) => format!("load_field {}.{}", args, field),
        InstrKind::StoreInstanceField { slot, kind, barrier } => {
            format!("store_field {} ({}) {:?} {:?}", slot, args, kind, barrier)
        }
        InstrKind::LoadStaticField(f) => format!("load_static {}", f),
        InstrKind::StoreStaticField(f) => format!("store_static {} = {}", f, args),
        InstrKind::InitStaticField(f) => format!("init_static {}", f),
        InstrKind::GuardFieldClass(f) => format!("guard_field_class {} ({})", f, args),
        InstrKind::GuardFieldLength(f) => format!("guard_field_length {} ({})", f, args),
        InstrKind::AllocateContext { num_variables } => format!("allocate_context {}", num_variables),
        InstrKind::CloneContext { num_variables } => format!("clone_context {} ({})", num_variables, args),
        InstrKind::AllocateObject {
            class,
            closure_function,
            ..
        } => match closure_function {
            Some(f) => format!("allocate_closure {} {} ({})", class, f, args),
            None => format!("allocate_object {} ({})", class, args),
        },
        InstrKind::CreateArray => format!("create_array ({})", args),
        InstrKind::StoreIndexed { class } => format!("store_indexed {} ({})", class, args),
        InstrKind::LoadClassId => format!("load_cid {}", args),
        InstrKind::LoadArgDescriptor => "load_arg_descriptor".to_string(),
        InstrKind::LoadFpRelativeSlot { offset } => format!("load_fp_slot {} ({})", offset, args),
        InstrKind::StoreFpRelativeSlot { offset } => format!("store_fp_slot {} ({})", offset, args),
        InstrKind::InstanceCall {
            name,
            argument_count,
            type_args_len,
            ..
        } => format!("instance_call {}<{}>/{} ({})", name, type_args_len, argument_count, args),
        InstrKind::StaticCall {
            target,
            argument_count,
            type_args_len,
            entry_kind,
            ..
        } => format!(
            "static_call {}<{}>/{} {:?} ({})",
            target, type_args_len, argument_count, entry_kind, args
        ),
        InstrKind::ClosureCall { argument_count, .. } => {
            format!("closure_call /{} ({})", argument_count, args)
        }
        InstrKind::NativeCall { name, argument_count, .. } => {
            format!("native_call {}/{} ({})", name, argument_count, args)
        }
        InstrKind::FfiCall { signature, .. } => {
            format!("ffi_call {:?} -> {:?} ({})", signature.arguments, signature.result, args)
        }
        InstrKind::InstantiateType(t) => format!("instantiate_type {} ({})", t, args),
        InstrKind::InstantiateTypeArguments(t) => format!("instantiate_type_args {} ({})", t, args),
        InstrKind::AssertAssignable { dst_type, dst_name, .. } => {
            format!("assert_assignable {} '{}' ({})", dst_type, dst_name, args)
        }
        InstrKind::AssertSubtype {
            sub_type,
            super_type,
            dst_name,
        } => format!("assert_subtype {} <: {} '{}' ({})", sub_type, super_type, dst_name, args),
        InstrKind::AssertBool => format!("assert_bool {}", args),
        InstrKind::InstanceOf(t) => format!("instance_of {} ({})", t, args),
        InstrKind::CheckNull { function_name, .. } => format!("check_null '{}' {}", function_name, args),
        InstrKind::CheckStackOverflow { loop_depth, in_prologue } => format!(
            "check_stack_overflow depth={}{}",
            loop_depth,
            if *in_prologue { " prologue" } else { "" }
        ),
        InstrKind::Redefinition(t) => format!("redefinition {} : {}", args, t),
        InstrKind::StrictCompare { kind, .. } => format!("strict_compare {:?} ({})", kind, args),
        InstrKind::RelationalOp(kind) => format!("relational_op {:?} ({})", kind, args),
        InstrKind::BinaryIntegerOp { op, repr, truncating } => format!(
            "binary_op {:?}:{}{} ({})",
            op,
            repr,
            if *truncating { " truncating" } else { "" },
            args
        ),
        InstrKind::BooleanNegate => format!("not {}", args),
        InstrKind::Box(repr) => format!("box {} : {}", args, repr),
        InstrKind::Unbox { to, truncating } => format!(
            "unbox {} : {}{}",
            args,
            to,
            if *truncating { " truncating" } else { "" }
        ),
        InstrKind::IntConverter { from, to } => format!("int_convert {} {} -> {}", args, from, to),
        InstrKind::UnboxedWidthExtender { repr, from } => {
            format!("extend {} {} -> {}", args, from, repr)
        }
        InstrKind::BitCast { from, to } => format!("bit_cast {} {} -> {}", args, from, to),
        InstrKind::FloatToDouble => format!("float_to_double {}", args),
        InstrKind::DoubleToFloat => format!("double_to_float {}", args),
        InstrKind::LoadIndexedTypedData(ty) => format!("load_indexed {:?} ({})", ty, args),
        InstrKind::StoreIndexedTypedData(ty) => format!("store_indexed {:?} ({})", ty, args),
        InstrKind::LoadUntagged { offset } => format!("load_untagged +{} ({})", offset, args),
        InstrKind::StoreUntagged { offset } => format!("store_untagged +{} ({})", offset, args),
        InstrKind::Goto { target } => return format!("goto {}", block_name(graph, *target)),
        InstrKind::Branch {
            kind,
            true_target,
            false_target,
        } => {
            return format!(
                "branch {:?} ({}) ? {} : {}",
                kind,
                args,
                block_name(graph, *true_target),
                block_name(graph, *false_target)
            )
        }
        InstrKind::Return => return format!("return {}", args),
        InstrKind::NativeReturn(repr) => return format!("native_return {} : {}", args, repr),
        InstrKind::Throw => return format!("throw {}", args),
        InstrKind::ReThrow { catch_try_index } => {
            return format!("rethrow try={} ({})", catch_try_index, args)
        }
    };
    format!("{} <- {}", id, body)
}

fn try_suffix(try_index: Option<u32>) -> String {
    match try_index {
        Some(t) => format!(" try={}", t),
        None => String::new(),
    }
}
