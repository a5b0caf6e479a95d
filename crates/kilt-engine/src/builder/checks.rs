//! Type checks
//!
//! Assignability, subtype and boolean checks, and the per-parameter checks a
//! function runs on entry.

use crate::error::BuildResult;
use crate::il::{AssertKind, InstrKind};
use crate::object::{AbstractType, Function, Genericity, TypeId, TypeParameterOwner};

use super::{FlowGraphBuilder, Fragment};

/// Which argument checks a prologue piece contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeChecksToBuild {
    /// Every parameter and type parameter bound
    All,
    /// Only checks callers cannot prove (covariant parameters and bounds)
    CovariantOnly,
    /// Only checks a statically typed caller has already proved
    NonCovariantOnly,
}

impl TypeChecksToBuild {
    fn includes(self, covariant: bool) -> bool {
        match self {
            TypeChecksToBuild::All => true,
            TypeChecksToBuild::CovariantOnly => covariant,
            TypeChecksToBuild::NonCovariantOnly => !covariant,
        }
    }
}

/// Argument checks of one function, split by where the prologue runs them
#[derive(Debug, Default)]
pub(super) struct ArgumentChecks {
    /// Run on every entry (explicitly covariant parameters)
    pub explicit: Fragment,
    /// Skipped by the unchecked entry
    pub implicit: Fragment,
    /// Replaces `implicit` on the unchecked entry: narrows parameter types
    pub redefinitions: Fragment,
}

impl<'a> FlowGraphBuilder<'a> {
    /// Throw unless the top of the stack is a bool; the value stays
    pub(super) fn check_boolean(&mut self, code: &mut Fragment) -> BuildResult<()> {
        let temp = self.make_temporary()?;
        self.load_temp(code, temp)?;
        self.define(code, InstrKind::AssertBool, 1)?;
        self.drop_value(code)
    }

    /// Throw unless the top of the stack is assignable to `ty`; the value
    /// stays. Top types need no check.
    pub(super) fn check_assignable(&mut self, code: &mut Fragment, ty: TypeId, name: &str, kind: AssertKind) -> BuildResult<()> {
        if self.store.is_top_type(ty) {
            return Ok(());
        }
        let temp = self.make_temporary()?;
        self.load_temp(code, temp)?;
        self.assert_assignable(code, ty, name, kind)?;
        self.drop_value(code)
    }

    /// Replace the top of the stack with the checked value
    pub(super) fn assert_assignable(&mut self, code: &mut Fragment, ty: TypeId, name: &str, kind: AssertKind) -> BuildResult<()> {
        self.load_type_arguments_for(code, ty)?;
        self.define(
            code,
            InstrKind::AssertAssignable {
                dst_type: ty,
                dst_name: name.to_string(),
                kind,
            },
            3,
        )?;
        Ok(())
    }

    pub(super) fn assert_subtype(&mut self, code: &mut Fragment, sub: TypeId, sup: TypeId, name: &str) -> BuildResult<()> {
        let types = self.store.types();
        let class_free = types.is_instantiated(sub, Genericity::CurrentClass)
            && types.is_instantiated(sup, Genericity::CurrentClass);
        let function_free = types.is_instantiated(sub, Genericity::Functions)
            && types.is_instantiated(sup, Genericity::Functions);
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
        self.effect(
            code,
            InstrKind::AssertSubtype {
                sub_type: sub,
                super_type: sup,
                dst_name: name.to_string(),
            },
            2,
        )?;
        Ok(())
    }

    /// Call `_AssertionError._evaluateAssertion` on the top of the stack
    pub(super) fn evaluate_assertion(&mut self, code: &mut Fragment) -> BuildResult<()> {
        self.push_argument(code)?;
        let target = self.store.core().evaluate_assertion;
        self.static_call_simple(code, target, 1)?;
        Ok(())
    }

    /// `value is ty` for the top of the stack, replacing it with the result
    pub(super) fn instance_of(&mut self, code: &mut Fragment, ty: TypeId) -> BuildResult<()> {
        self.load_type_arguments_for(code, ty)?;
        self.define(code, InstrKind::InstanceOf(ty), 3)?;
        Ok(())
    }

    /// Whether `f` checks its arguments at all
    pub(super) fn needs_argument_type_checks(f: &Function) -> bool {
        use crate::object::FunctionKind;
        f.kind == FunctionKind::Closure || !(f.is_static || f.kind == FunctionKind::Constructor)
    }

    /// Checks a function of this shape runs when called through its
    /// checked entry
    pub(super) fn default_type_checks_mode(f: &Function) -> TypeChecksToBuild {
        use crate::object::FunctionKind;
        if f.is_static || f.is_factory || f.kind == FunctionKind::Closure || f.kind == FunctionKind::Constructor {
            TypeChecksToBuild::All
        } else {
            TypeChecksToBuild::CovariantOnly
        }
    }

    /// Parameter and bound checks of `f` selected by `mode`
    pub(super) fn build_argument_type_checks(&mut self, f: &Function, mode: TypeChecksToBuild) -> BuildResult<ArgumentChecks> {
        let mut checks = ArgumentChecks::default();

        let mut bounds = Fragment::empty();
        for (ty, bound, name, covariant) in self.type_parameter_bounds(f) {
            if self.store.is_top_type(bound) || !mode.includes(covariant) {
                continue;
            }
            self.assert_subtype(&mut bounds, ty, bound, &name)?;
        }
        if !bounds.is_empty() {
            if f.is_closure_function() && self.ctx.config.eliminate_type_checks {
                let closure = self.parameter_variable(0)?;
                let mut implicit = Fragment::empty();
                self.test_delayed_type_args(&mut implicit, closure, Fragment::empty(), bounds)?;
                checks.implicit = implicit;
            } else {
                checks.implicit = bounds;
            }
        }

        let implicit_count = f.num_implicit_parameters();
        for (i, param) in f.parameters.iter().enumerate() {
            let variable = self.parameter_variable(implicit_count + i)?;
            let (ty, needs_check, explicit_covariant) = {
                let v = self.variable(variable)?;
                (v.ty, v.needs_type_check, v.is_explicit_covariant)
            };
            if !needs_check || self.store.is_top_type(ty) {
                continue;
            }
            let covariant = explicit_covariant || param.is_generic_covariant_impl;
            if !mode.includes(covariant) {
                continue;
            }
            let target = if explicit_covariant {
                &mut checks.explicit
            } else {
                &mut checks.implicit
            };
            let mut piece = Fragment::empty();
            self.load_local(&mut piece, variable)?;
            self.check_assignable(&mut piece, ty, &param.name, AssertKind::ParameterCheck)?;
            self.drop_value(&mut piece)?;
            *target = target.append(piece, &mut self.graph);

            if !explicit_covariant {
                let mut narrow = Fragment::empty();
                self.load_local(&mut narrow, variable)?;
                self.redefinition(&mut narrow, ty)?;
                self.store_local(&mut narrow, variable)?;
                self.drop_value(&mut narrow)?;
                checks.redefinitions = checks.redefinitions.append(narrow, &mut self.graph);
            }
        }
        Ok(checks)
    }

    /// `(parameter type, bound, name, covariant)` of every type parameter
    /// whose bound `f` checks. Factories check the class's.
    fn type_parameter_bounds(&self, f: &Function) -> Vec<(TypeId, TypeId, String, bool)> {
        let types = self.store.types();
        if f.is_factory {
            let class = self.store.class(f.owner);
            let offset = class.own_type_arguments_offset();
            class
                .type_parameters
                .iter()
                .enumerate()
                .filter_map(|(i, p)| {
                    let ty = types.find(&AbstractType::Parameter {
                        owner: TypeParameterOwner::Class(class.id),
                        index: (offset + i) as u32,
                    })?;
                    Some((ty, p.bound, p.name.clone(), p.is_generic_covariant_impl))
                })
                .collect()
        } else {
            f.type_parameters
                .iter()
                .enumerate()
                .filter_map(|(i, p)| {
                    let ty = types.find(&AbstractType::Parameter {
                        owner: TypeParameterOwner::Function(f.id),
                        index: i as u32,
                    })?;
                    Some((ty, p.bound, p.name.clone(), p.is_generic_covariant_impl))
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TypeChecksToBuild;
    use crate::builder::{BuildContext, FlowGraphBuilder, Fragment};
    use crate::il::InstrKind;
    use crate::kernel::KernelProgram;
    use crate::object::{FunctionKind, ObjectStore, Parameter};

    fn method_with_params(store: &mut ObjectStore, covariant: bool) -> crate::object::FunctionId {
        let object = store.core().object;
        let int = store.core().int_type;
        let string = store.core().string_type;
        let mut f = store.new_function("m", object, FunctionKind::Regular);
        let mut a = Parameter::new("a", int);
        a.is_covariant = covariant;
        f.parameters = vec![a, Parameter::new("b", string)];
        f.num_fixed_parameters = 2;
        store.add_function(f)
    }

    #[test]
    fn test_covariant_parameter_is_explicit() {
        let mut store = ObjectStore::new();
        let m = method_with_params(&mut store, true);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), m);
        let f = store.function(m);
        let checks = b.build_argument_type_checks(f, TypeChecksToBuild::All).unwrap();
        let count = |frag: Fragment, b: &FlowGraphBuilder<'_>| {
            frag.instructions(b.graph())
                .iter()
                .filter(|&&i| matches!(b.graph().kind(i), InstrKind::AssertAssignable { .. }))
                .count()
        };
        assert_eq!(count(checks.explicit, &b), 1);
        assert_eq!(count(checks.implicit, &b), 1);
        assert!(!checks.redefinitions.is_empty());
        assert_eq!(b.stack_depth(), 0);
    }

    #[test]
    fn test_covariant_only_mode_skips_plain_parameters() {
        let mut store = ObjectStore::new();
        let m = method_with_params(&mut store, false);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), m);
        let f = store.function(m);
        let checks = b.build_argument_type_checks(f, TypeChecksToBuild::CovariantOnly).unwrap();
        assert!(checks.explicit.is_empty());
        assert!(checks.implicit.is_empty());
        assert!(checks.redefinitions.is_empty());
    }

    #[test]
    fn test_top_type_needs_no_assignable_check() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let dynamic = store.core().dynamic_type;
        let mut f = store.new_function("f", object, FunctionKind::Regular);
        f.is_static = true;
        let f = store.add_function(f);
        let program = KernelProgram::new();
        let mut b = FlowGraphBuilder::new(BuildContext::new(&store, &program), f);
        let mut code = Fragment::empty();
        b.null_constant(&mut code);
        b.check_assignable(&mut code, dynamic, "x", crate::il::AssertKind::FromSource).unwrap();
        assert_eq!(code.instructions(b.graph()).len(), 1);
        assert_eq!(b.stack_depth(), 1);
    }
}
