//! Call emission
//!
//! Every call pops its pushed arguments (type-argument vector first, then the
//! receiver, positional and named arguments in call order) and pushes its
//! result.

use crate::error::BuildResult;
use crate::il::{EntryKind, InstrId, InstrKind, InvocationKind, RebindRule, Representation};
use crate::object::{Class, ConstValue, FfiSignature, Function, FunctionId, FunctionKind, TypeId};

use super::{FlowGraphBuilder, Fragment};

/// Argument shape of a call site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct CallShape {
    /// Type arguments passed (0 when none)
    pub type_args_len: usize,
    /// Value arguments, implicit receiver or closure included
    pub argument_count: usize,
    /// Names of the trailing named arguments
    pub argument_names: Vec<String>,
}

impl CallShape {
    pub(super) fn positional(argument_count: usize) -> Self {
        CallShape {
            type_args_len: 0,
            argument_count,
            argument_names: Vec::new(),
        }
    }

    /// Pushed arguments, the type-argument vector included
    pub(super) fn total(&self) -> usize {
        self.argument_count + usize::from(self.type_args_len > 0)
    }
}

/// Level encoded into a `NoSuchMethodError` invocation type
#[derive(Debug, Clone, Copy)]
enum MirrorLevel {
    Static = 2,
    Constructor = 3,
    TopLevel = 4,
}

/// Member kind encoded into a `NoSuchMethodError` invocation type
#[derive(Debug, Clone, Copy)]
enum MirrorKind {
    Method = 0,
    Getter = 1,
    Setter = 2,
}

fn encode_invocation_type(level: MirrorLevel, kind: MirrorKind) -> i64 {
    ((level as i64) << 2) | kind as i64
}

/// Invocation type recorded when a call of `target`, declared in `owner`, fails
pub(super) fn invocation_type_of(target: &Function, owner: &Class) -> i64 {
    let kind = match target.kind {
        FunctionKind::Getter | FunctionKind::ImplicitGetter | FunctionKind::ImplicitStaticGetter => MirrorKind::Getter,
        FunctionKind::Setter | FunctionKind::ImplicitSetter => MirrorKind::Setter,
        _ => MirrorKind::Method,
    };
    let level = if owner.is_top_level {
        MirrorLevel::TopLevel
    } else if target.kind == FunctionKind::Constructor {
        MirrorLevel::Constructor
    } else {
        MirrorLevel::Static
    };
    encode_invocation_type(level, kind)
}

/// Operators whose inline cache records both operand classes
fn is_binary_operator(name: &str) -> bool {
    matches!(
        name,
        "+" | "-" | "*" | "/" | "~/" | "%" | "<" | ">" | "<=" | ">=" | "==" | "&" | "|" | "^" | "<<" | ">>"
    )
}

impl<'a> FlowGraphBuilder<'a> {
    /// Dynamically dispatched call of `name`
    #[allow(clippy::too_many_arguments)]
    pub(super) fn instance_call(
        &mut self,
        code: &mut Fragment,
        name: &str,
        kind: InvocationKind,
        shape: &CallShape,
        interface_target: Option<FunctionId>,
        entry_kind: EntryKind,
    ) -> BuildResult<InstrId> {
        let inputs = self.get_arguments(shape.total())?;
        let checked_argument_count = if is_binary_operator(name) && shape.argument_count == 2 {
            2
        } else {
            1
        };
        let (result_type, receivers_static_type) = match interface_target {
            Some(target) => {
                let t = self.store.function(target);
                let result = Some(t.result_type).filter(|&ty| !self.store.is_top_type(ty));
                (result, Some(self.store.class(t.owner).declaration_type))
            }
            None => (None, None),
        };
        let id = self.emit(
            code,
            InstrKind::InstanceCall {
                name: name.to_string(),
                kind,
                type_args_len: shape.type_args_len,
                argument_count: shape.total(),
                argument_names: shape.argument_names.clone(),
                checked_argument_count,
                interface_target,
                result_type,
                entry_kind,
                receivers_static_type,
            },
            inputs,
        );
        self.stack.push(id);
        Ok(id)
    }

    /// Statically bound call. The result type comes from the target unless
    /// it is a top type, then from `inferred`.
    pub(super) fn static_call(
        &mut self,
        code: &mut Fragment,
        target: FunctionId,
        shape: &CallShape,
        rebind: RebindRule,
        inferred: Option<TypeId>,
        entry_kind: EntryKind,
    ) -> BuildResult<InstrId> {
        let inputs = self.get_arguments(shape.total())?;
        let declared = self.store.function(target).result_type;
        let result_type = if self.store.is_top_type(declared) {
            inferred
        } else {
            Some(declared)
        };
        let id = self.emit(
            code,
            InstrKind::StaticCall {
                target,
                type_args_len: shape.type_args_len,
                argument_count: shape.total(),
                argument_names: shape.argument_names.clone(),
                rebind,
                result_type,
                entry_kind,
            },
            inputs,
        );
        self.stack.push(id);
        Ok(id)
    }

    /// Positional static call with no rebinding
    pub(super) fn static_call_simple(&mut self, code: &mut Fragment, target: FunctionId, argument_count: usize) -> BuildResult<InstrId> {
        self.static_call(
            code,
            target,
            &CallShape::positional(argument_count),
            RebindRule::NoRebind,
            None,
            EntryKind::Normal,
        )
    }

    /// Call through the function on top of the stack; the pushed arguments
    /// (closure first) sit below it
    pub(super) fn closure_call(&mut self, code: &mut Fragment, shape: &CallShape) -> BuildResult<InstrId> {
        let function = self.pop()?;
        let mut inputs = self.get_arguments(shape.total())?;
        inputs.push(function);
        let id = self.emit(
            code,
            InstrKind::ClosureCall {
                type_args_len: shape.type_args_len,
                argument_count: shape.total(),
                argument_names: shape.argument_names.clone(),
            },
            inputs,
        );
        self.stack.push(id);
        Ok(id)
    }

    /// Call the native implementation of `f` with its pushed parameters
    pub(super) fn native_call(&mut self, code: &mut Fragment, f: &Function) -> BuildResult<InstrId> {
        let argument_count = crate::native::parameter_count_for_resolution(self.store, f.id);
        let link_lazily = self.ctx.config.link_natives_lazily;
        if !link_lazily {
            if let Some(natives) = self.ctx.natives {
                natives.resolve_function(self.store, f.id)?;
            }
        }
        let inputs = self.get_arguments(argument_count)?;
        let id = self.emit(
            code,
            InstrKind::NativeCall {
                name: f.native_name.clone().unwrap_or_else(|| f.name.clone()),
                function: f.id,
                argument_count,
                link_lazily,
            },
            inputs,
        );
        self.stack.push(id);
        Ok(id)
    }

    /// Foreign call: the unboxed arguments then the target address are on the stack
    pub(super) fn ffi_call(
        &mut self,
        code: &mut Fragment,
        signature: &FfiSignature,
        argument_reps: Vec<Representation>,
    ) -> BuildResult<InstrId> {
        let inputs = self.pop_n(signature.arguments.len() + 1)?;
        let id = self.emit(
            code,
            InstrKind::FfiCall {
                signature: signature.clone(),
                argument_reps,
            },
            inputs,
        );
        self.stack.push(id);
        Ok(id)
    }

    /// Push parameters `from..` of the current function as arguments
    pub(super) fn push_parameters(&mut self, code: &mut Fragment, from: usize) -> BuildResult<()> {
        let count = self.store.function(self.function).num_parameters();
        for i in from..count {
            let v = self.parameter_variable(i)?;
            self.load_local(code, v)?;
            self.push_argument(code)?;
        }
        Ok(())
    }

    /// Call `NoSuchMethodError._throwNew` for a call of `target` whose
    /// arguments do not match. The call's "result" stays on the stack.
    pub(super) fn throw_no_such_method_error(&mut self, code: &mut Fragment, target: FunctionId) -> BuildResult<()> {
        let t = self.store.function(target);
        let owner = self.store.class(t.owner);
        // Top-level members have no class to report.
        if owner.is_top_level {
            self.null_constant(code);
        } else {
            self.constant(code, ConstValue::Type(owner.declaration_type));
        }
        self.push_argument(code)?;
        self.constant(code, ConstValue::string(&t.name));
        self.push_argument(code)?;
        self.int_constant(code, invocation_type_of(t, owner));
        self.push_argument(code)?;
        // Type-argument count, argument values and argument names.
        self.int_constant(code, 0);
        self.push_argument(code)?;
        self.null_constant(code);
        self.push_argument(code)?;
        self.null_constant(code);
        self.push_argument(code)?;
        let throw_new = self.store.core().no_such_method_throw_new;
        self.static_call_simple(code, throw_new, 6)?;
        Ok(())
    }

    /// Throw a `_TypeError` for a type the program cannot express
    pub(super) fn throw_type_error(&mut self, code: &mut Fragment) -> BuildResult<()> {
        let core = self.store.core();
        let (type_error, create) = (core.type_error, core.type_error_create);
        self.allocate_object(code, type_error, 0, None)?;
        let instance = self.make_temporary()?;
        self.load_temp(code, instance)?;
        self.push_argument(code)?;
        self.constant(code, ConstValue::string(""));
        self.push_argument(code)?;
        self.int_constant(code, 0);
        self.push_argument(code)?;
        self.int_constant(code, 0);
        self.push_argument(code)?;
        self.constant(code, ConstValue::string("Malformed type."));
        self.push_argument(code)?;
        self.static_call(
            code,
            create,
            &CallShape::positional(5),
            RebindRule::Static,
            None,
            EntryKind::Normal,
        )?;
        self.drop_value(code)?;
        self.push_argument(code)?;
        self.throw_exception(code)
    }
}
