//! Executes stub routines against instance descriptions

use crate::hierarchy::{ranges_contain, HierarchyInfo, HierarchyOracle};
use crate::object::{AbstractType, ClassId, ObjectStore, TypeArgsId, TypeId};

use super::assembler::{Label, StubOp, StubRoutine, TypeArgumentsRegister};
use super::StubCode;

/// The value being tested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instance {
    /// `null`
    Null,
    /// Small integer
    Smi(i64),
    /// Heap object of `class`
    Object {
        /// Class of the object
        class: ClassId,
        /// Stored type-argument vector (`None` is the null vector)
        type_arguments: Option<TypeArgsId>,
    },
}

impl Instance {
    /// Instance whose runtime type is the interface type `ty`
    pub fn of_type(store: &ObjectStore, ty: TypeId) -> Option<Instance> {
        match store.types().get(ty) {
            AbstractType::Interface { class, arguments } => Some(Instance::Object {
                class: *class,
                type_arguments: *arguments,
            }),
            _ => None,
        }
    }
}

/// Caller vectors type parameters of the tested type are resolved in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeTestContext {
    /// Instantiator type arguments
    pub instantiator_type_arguments: Option<TypeArgsId>,
    /// Function type arguments
    pub function_type_arguments: Option<TypeArgsId>,
}

/// How a routine finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubOutcome {
    /// Returned: the instance passed
    Accepted,
    /// Reached the slow path
    SlowPath,
}

/// Stub interpreter with a slow path backed by the exact subtype query
pub struct StubSimulator<'a> {
    store: &'a mut ObjectStore,
}

impl<'a> StubSimulator<'a> {
    /// Simulator over `store`; the slow path interns runtime types
    pub fn new(store: &'a mut ObjectStore) -> Self {
        StubSimulator { store }
    }

    /// Run a routine's fast paths
    pub fn execute(store: &ObjectStore, routine: &StubRoutine, instance: &Instance, ctx: &TypeTestContext) -> StubOutcome {
        let types = store.types();
        let core = store.core();
        let ops = routine.ops();
        let is_smi = matches!(instance, Instance::Smi(_));
        let mut cid: Option<ClassId> = None;
        let mut equal = false;
        let mut type_arguments: Option<TypeArgsId> = None;
        let jump = |label: &Label| routine.label_position(*label);
        let caller_vector = |source: TypeArgumentsRegister| match source {
            TypeArgumentsRegister::Instantiator => ctx.instantiator_type_arguments,
            TypeArgumentsRegister::Function => ctx.function_type_arguments,
        };
        let class_of_argument = |vector: Option<TypeArgsId>, index: usize| {
            vector
                .and_then(|v| types.vector(v).get(index).copied())
                .and_then(|t| types.type_class(types.deref(t)))
        };

        let mut pc = 0;
        // Branches only go forward; the budget guards malformed routines.
        let mut budget = ops.len() + 1;
        while pc < ops.len() && budget > 0 {
            budget -= 1;
            let target = match &ops[pc] {
                StubOp::BranchIfSmi(l) if is_smi => Some(jump(l)),
                StubOp::BranchIfNotSmi(l) if !is_smi => Some(jump(l)),
                StubOp::BranchIfSmi(_) | StubOp::BranchIfNotSmi(_) => None,
                StubOp::LoadClassId | StubOp::LoadClassIdMayBeSmi => {
                    cid = Some(match instance {
                        Instance::Null => core.null,
                        Instance::Smi(_) => core.smi,
                        Instance::Object { class, .. } => *class,
                    });
                    None
                }
                StubOp::CompareClassId(expected) => {
                    equal = cid == Some(*expected);
                    None
                }
                StubOp::CompareNull => {
                    equal = matches!(instance, Instance::Null);
                    None
                }
                StubOp::LoadInstanceTypeArguments { .. } => {
                    type_arguments = match instance {
                        Instance::Object { type_arguments, .. } => *type_arguments,
                        _ => None,
                    };
                    None
                }
                StubOp::CompareInstanceTypeArgumentsNull => {
                    equal = type_arguments.is_none();
                    None
                }
                StubOp::LoadTypeArgumentClassId { index } => {
                    cid = class_of_argument(type_arguments, *index);
                    None
                }
                StubOp::CompareTypeArgumentsNull(source) => {
                    equal = caller_vector(*source).is_none();
                    None
                }
                StubOp::CompareTypeArgumentClassId { source, index } => {
                    let own = class_of_argument(caller_vector(*source), *index);
                    equal = cid.is_some() && cid == own;
                    None
                }
                StubOp::BranchIfEqual(l) if equal => Some(jump(l)),
                StubOp::BranchIfNotEqual(l) if !equal => Some(jump(l)),
                StubOp::BranchIfEqual(_) | StubOp::BranchIfNotEqual(_) => None,
                StubOp::CheckCidRanges {
                    ranges,
                    in_range,
                    out_of_range,
                } => {
                    let hit = cid.is_some_and(|c| ranges_contain(ranges, c.0));
                    Some(jump(if hit { in_range } else { out_of_range }))
                }
                StubOp::Bind(_) => None,
                StubOp::Return => return StubOutcome::Accepted,
                StubOp::JumpToSlowPath => return StubOutcome::SlowPath,
            };
            match target {
                Some(Some(position)) => pc = position,
                Some(None) => return StubOutcome::SlowPath,
                None => pc += 1,
            }
        }
        StubOutcome::SlowPath
    }

    /// Full type test of `instance` against `ty` through `code`
    pub fn is_instance_of(&mut self, code: &StubCode, ty: TypeId, instance: &Instance, ctx: &TypeTestContext) -> bool {
        match code {
            StubCode::TopTypeTypeTest => true,
            StubCode::TypeRefTypeTest => {
                let target = self.store.types().deref(ty);
                self.slow_path(target, instance, ctx)
            }
            StubCode::Specialized(routine) => match Self::execute(self.store, routine, instance, ctx) {
                StubOutcome::Accepted => true,
                StubOutcome::SlowPath => self.slow_path(ty, instance, ctx),
            },
            StubCode::LazySpecializeTypeTest | StubCode::DefaultTypeTest | StubCode::UnreachableTypeTest => {
                self.slow_path(ty, instance, ctx)
            }
        }
    }

    /// General subtype test
    pub fn slow_path(&mut self, ty: TypeId, instance: &Instance, ctx: &TypeTestContext) -> bool {
        let core = self.store.core().clone();
        let runtime_type = match instance {
            Instance::Null => core.null_type,
            Instance::Smi(_) => self.store.class(core.smi).declaration_type,
            Instance::Object { class, type_arguments } => self.store.types_mut().intern(AbstractType::Interface {
                class: *class,
                arguments: *type_arguments,
            }),
        };
        let target = self.store.types_mut().instantiate(
            ty,
            ctx.instantiator_type_arguments,
            ctx.function_type_arguments,
        );
        HierarchyInfo::new(self.store).is_subtype(runtime_type, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StubConfig;
    use crate::stubs::TypeTestingStubGenerator;
    use std::sync::Arc;

    fn routine_for(store: &ObjectStore, ty: TypeId) -> Arc<StubRoutine> {
        let hi = HierarchyInfo::new(store);
        TypeTestingStubGenerator::new(store, StubConfig::default())
            .with_hierarchy(&hi)
            .build_code_for_type(ty)
            .unwrap()
    }

    #[test]
    fn test_int_accepts_smi_and_mint() {
        let store = ObjectStore::new();
        let int = store.core().int_type;
        let routine = routine_for(&store, int);
        let ctx = TypeTestContext::default();
        let mint = Instance::Object {
            class: store.core().mint,
            type_arguments: None,
        };
        let double = Instance::Object {
            class: store.core().double,
            type_arguments: None,
        };
        assert_eq!(StubSimulator::execute(&store, &routine, &Instance::Smi(3), &ctx), StubOutcome::Accepted);
        assert_eq!(StubSimulator::execute(&store, &routine, &mint, &ctx), StubOutcome::Accepted);
        assert_eq!(StubSimulator::execute(&store, &routine, &Instance::Null, &ctx), StubOutcome::Accepted);
        assert_eq!(StubSimulator::execute(&store, &routine, &double, &ctx), StubOutcome::SlowPath);
    }

    #[test]
    fn test_function_type_accepts_closures() {
        let store = ObjectStore::new();
        let routine = routine_for(&store, store.core().function_type);
        let closure = Instance::Object {
            class: store.core().closure,
            type_arguments: None,
        };
        let ctx = TypeTestContext::default();
        assert_eq!(StubSimulator::execute(&store, &routine, &closure, &ctx), StubOutcome::Accepted);
        assert_eq!(StubSimulator::execute(&store, &routine, &Instance::Smi(1), &ctx), StubOutcome::SlowPath);
    }

    #[test]
    fn test_generic_stub_matches_arguments() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let boxed = store.declare_class("Box", None, Some(object), &["T"]);
        let sub = store.declare_class("SubBox", None, Some(boxed), &["U"]);
        let u = store.type_parameter(sub, 0);
        store.set_super_type_arguments(sub, &[u]);
        let int = store.core().int_type;
        let string = store.core().string_type;
        let box_int = store.interface_type(boxed, &[int]);
        let box_string = store.interface_type(boxed, &[string]);
        let sub_int = store.interface_type(sub, &[int]);
        let routine = routine_for(&store, box_int);
        let ctx = TypeTestContext::default();

        for ty in [box_int, sub_int] {
            let instance = Instance::of_type(&store, ty).unwrap();
            assert_eq!(StubSimulator::execute(&store, &routine, &instance, &ctx), StubOutcome::Accepted);
        }
        let mismatch = Instance::of_type(&store, box_string).unwrap();
        assert_eq!(StubSimulator::execute(&store, &routine, &mismatch, &ctx), StubOutcome::SlowPath);

        let mut simulator = StubSimulator::new(&mut store);
        let code = StubCode::Specialized(routine);
        assert!(!simulator.is_instance_of(&code, box_int, &mismatch, &ctx));
        let raw = Instance::Object {
            class: boxed,
            type_arguments: None,
        };
        assert!(simulator.is_instance_of(&code, box_int, &raw, &ctx));
    }

    #[test]
    fn test_slow_path_decides_when_stub_gives_up() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let boxed = store.declare_class("Box", None, Some(object), &["T"]);
        let int = store.core().int_type;
        let dynamic = store.core().dynamic_type;
        let box_int = store.interface_type(boxed, &[int]);
        let box_dynamic = store.interface_type(boxed, &[dynamic]);
        let routine = routine_for(&store, box_int);
        let instance = Instance::of_type(&store, box_dynamic).unwrap();
        let ctx = TypeTestContext::default();
        assert_eq!(StubSimulator::execute(&store, &routine, &instance, &ctx), StubOutcome::SlowPath);
        let mut simulator = StubSimulator::new(&mut store);
        assert!(!simulator.is_instance_of(&StubCode::Specialized(routine), box_int, &instance, &ctx));
        assert!(simulator.is_instance_of(&StubCode::DefaultTypeTest, box_dynamic, &instance, &ctx));
    }

    #[test]
    fn test_type_parameter_resolved_through_instantiator() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let boxed = store.declare_class("Box", None, Some(object), &["T"]);
        let holder = store.declare_class("Holder", None, Some(object), &["H"]);
        let h = store.type_parameter(holder, 0);
        let int = store.core().int_type;
        let string = store.core().string_type;
        let box_h = store.interface_type(boxed, &[h]);
        let box_int = store.interface_type(boxed, &[int]);
        let holder_int = store.types_mut().intern_vector(vec![int]);
        let holder_string = store.types_mut().intern_vector(vec![string]);
        let routine = routine_for(&store, box_h);
        let instance = Instance::of_type(&store, box_int).unwrap();

        let as_int = TypeTestContext {
            instantiator_type_arguments: Some(holder_int),
            function_type_arguments: None,
        };
        let as_string = TypeTestContext {
            instantiator_type_arguments: Some(holder_string),
            function_type_arguments: None,
        };
        assert_eq!(StubSimulator::execute(&store, &routine, &instance, &as_int), StubOutcome::Accepted);
        assert_eq!(StubSimulator::execute(&store, &routine, &instance, &as_string), StubOutcome::SlowPath);
        let mut simulator = StubSimulator::new(&mut store);
        assert!(!simulator.is_instance_of(&StubCode::Specialized(routine), box_h, &instance, &as_string));
    }

    #[test]
    fn test_null_instantiator_accepts_any_argument() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let boxed = store.declare_class("Box", None, Some(object), &["T"]);
        let holder = store.declare_class("Holder", None, Some(object), &["H"]);
        let h = store.type_parameter(holder, 0);
        let box_h = store.interface_type(boxed, &[h]);
        let string = store.core().string_type;
        let box_string = store.interface_type(boxed, &[string]);
        let routine = routine_for(&store, box_h);
        assert!(routine
            .ops()
            .contains(&StubOp::CompareTypeArgumentsNull(TypeArgumentsRegister::Instantiator)));

        let instance = Instance::of_type(&store, box_string).unwrap();
        let ctx = TypeTestContext::default();
        assert_eq!(StubSimulator::execute(&store, &routine, &instance, &ctx), StubOutcome::Accepted);
        let mut simulator = StubSimulator::new(&mut store);
        assert!(simulator.slow_path(box_h, &instance, &ctx));
    }

    #[test]
    fn test_top_type_accepts_everything() {
        let mut store = ObjectStore::new();
        let object = store.core().object_type;
        let mut simulator = StubSimulator::new(&mut store);
        let ctx = TypeTestContext::default();
        assert!(simulator.is_instance_of(&StubCode::TopTypeTypeTest, object, &Instance::Null, &ctx));
        assert!(simulator.is_instance_of(&StubCode::TopTypeTypeTest, object, &Instance::Smi(0), &ctx));
    }
}
