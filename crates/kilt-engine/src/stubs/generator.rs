//! Type testing stub generator

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::StubConfig;
use crate::error::StubError;
use crate::hierarchy::HierarchyOracle;
use crate::object::{AbstractType, ClassId, ObjectStore, TypeId, TypeParameterOwner};

use super::assembler::{Label, StubAssembler, StubOp, StubRoutine, TypeArgumentsRegister};
use super::namer::TypeTestingStubNamer;
use super::StubCode;

/// Builds the stub a type is tested with
pub struct TypeTestingStubGenerator<'a> {
    store: &'a ObjectStore,
    hierarchy: Option<&'a dyn HierarchyOracle>,
    config: StubConfig,
    namer: TypeTestingStubNamer,
}

impl<'a> TypeTestingStubGenerator<'a> {
    /// Generator without hierarchy information: it only hands out shared stubs
    pub fn new(store: &'a ObjectStore, config: StubConfig) -> Self {
        TypeTestingStubGenerator {
            store,
            hierarchy: None,
            config,
            namer: TypeTestingStubNamer::new(),
        }
    }

    /// Enable specialised stubs
    pub fn with_hierarchy(mut self, hierarchy: &'a dyn HierarchyOracle) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    /// Store the generator reads from
    pub fn store(&self) -> &'a ObjectStore {
        self.store
    }

    /// Settings
    pub fn config(&self) -> &StubConfig {
        &self.config
    }

    /// Stub a type starts out with
    pub fn default_code_for_type(&self, ty: TypeId, lazy_specialize: bool) -> StubCode {
        default_code_for_type(self.store, ty, &self.config, lazy_specialize)
    }

    /// Stub a type should use once it is exercised
    pub fn optimized_code_for_type(&self, ty: TypeId) -> StubCode {
        let types = self.store.types();
        if types.is_type_ref(ty) {
            return StubCode::TypeRefTypeTest;
        }
        if self.store.is_top_type(ty) {
            return StubCode::TopTypeTypeTest;
        }
        if matches!(types.get(ty), AbstractType::Interface { .. }) {
            return match self.build_code_for_type(ty) {
                Ok(routine) => StubCode::Specialized(routine),
                Err(err) => {
                    warn!(target: "kilt::stubs", ty = ty.0, %err, "falling back to the default type test");
                    StubCode::DefaultTypeTest
                }
            };
        }
        self.default_code_for_type(ty, false)
    }

    /// Assemble a dedicated routine for `ty`
    pub fn build_code_for_type(&self, ty: TypeId) -> Result<Arc<StubRoutine>, StubError> {
        let class = self
            .store
            .types()
            .type_class(ty)
            .ok_or(StubError::NotSpecializable(ty))?;
        let hierarchy = self.hierarchy.ok_or(StubError::NoHierarchy(class))?;
        if !hierarchy.can_use_subtype_range_check_for(ty) && !hierarchy.can_use_generic_subtype_range_check_for(ty) {
            return Err(StubError::NotSpecializable(ty));
        }

        let mut asm = StubAssembler::new();
        self.build_optimized_type_test_stub(&mut asm, hierarchy, ty, class)?;
        if asm.size() > self.config.max_stub_bytes {
            return Err(StubError::TooLarge {
                ty,
                limit: self.config.max_stub_bytes,
            });
        }

        let name = self.namer.stub_name_for_type(self.store, ty);
        let routine = asm.finalize(name, ty);
        debug!(target: "kilt::stubs", stub = routine.name(), bytes = routine.size(), "specialised type testing stub");
        if self.config.disassemble_stubs {
            debug!(target: "kilt::stubs", "{}", routine.disassemble());
        }
        Ok(Arc::new(routine))
    }

    fn build_optimized_type_test_stub(
        &self,
        asm: &mut StubAssembler,
        hierarchy: &dyn HierarchyOracle,
        ty: TypeId,
        class: ClassId,
    ) -> Result<(), StubError> {
        self.build_fast_cases(asm, hierarchy, ty, class)?;
        asm.emit(StubOp::JumpToSlowPath);
        Ok(())
    }

    fn build_fast_cases(
        &self,
        asm: &mut StubAssembler,
        hierarchy: &dyn HierarchyOracle,
        ty: TypeId,
        class: ClassId,
    ) -> Result<(), StubError> {
        let core = self.store.core();
        if ty == core.int_type {
            let non_smi = asm.new_label();
            asm.emit(StubOp::BranchIfNotSmi(non_smi));
            asm.emit(StubOp::Return);
            asm.bind(non_smi);
        } else if self.store.is_dart_function_type(ty) {
            let continue_checking = asm.new_label();
            asm.emit(StubOp::LoadClassIdMayBeSmi);
            asm.emit(StubOp::CompareClassId(core.closure));
            asm.emit(StubOp::BranchIfNotEqual(continue_checking));
            asm.emit(StubOp::Return);
            asm.bind(continue_checking);
        }

        if hierarchy.can_use_subtype_range_check_for(ty) {
            let ranges = hierarchy.subtype_ranges(class, false, false);
            let smi_is_ok = hierarchy.is_subtype(core.int_type, ty);
            build_subtype_range_check(asm, ranges, smi_is_ok);
        } else {
            self.build_subclass_range_check_with_type_arguments(asm, hierarchy, ty, class)?;
        }

        let non_null = asm.new_label();
        asm.emit(StubOp::CompareNull);
        asm.emit(StubOp::BranchIfNotEqual(non_null));
        asm.emit(StubOp::Return);
        asm.bind(non_null);
        Ok(())
    }

    fn build_subclass_range_check_with_type_arguments(
        &self,
        asm: &mut StubAssembler,
        hierarchy: &dyn HierarchyOracle,
        ty: TypeId,
        class: ClassId,
    ) -> Result<(), StubError> {
        let decl = self.store.class(class);
        let offset = decl
            .type_arguments_field_offset
            .ok_or(StubError::NotSpecializable(ty))?;
        let arguments = self
            .store
            .types()
            .type_arguments(ty)
            .ok_or(StubError::NotSpecializable(ty))?;

        let check_failed = asm.new_label();
        let is_subclass = asm.new_label();
        asm.emit(StubOp::LoadClassIdMayBeSmi);
        asm.emit(StubOp::CheckCidRanges {
            ranges: hierarchy.subclass_ranges(class),
            in_range: is_subclass,
            out_of_range: check_failed,
        });
        asm.bind(is_subclass);

        asm.emit(StubOp::LoadInstanceTypeArguments { offset });
        // A null vector means all-dynamic.
        let process_done = asm.new_label();
        asm.emit(StubOp::CompareInstanceTypeArgumentsNull);
        asm.emit(StubOp::BranchIfNotEqual(process_done));
        asm.emit(StubOp::Return);
        asm.bind(process_done);

        let elements = self.store.types().vector(arguments);
        let first_own = decl.own_type_arguments_offset();
        for index in first_own..decl.num_type_arguments {
            let arg = elements.get(index).copied().ok_or(StubError::NotSpecializable(ty))?;
            self.build_type_argument_value_check(asm, hierarchy, ty, arg, index, check_failed)?;
        }
        asm.emit(StubOp::Return);
        asm.bind(check_failed);
        Ok(())
    }

    fn build_type_argument_value_check(
        &self,
        asm: &mut StubAssembler,
        hierarchy: &dyn HierarchyOracle,
        ty: TypeId,
        arg: TypeId,
        index: usize,
        check_failed: Label,
    ) -> Result<(), StubError> {
        if self.store.is_object_or_dynamic(arg) {
            return Ok(());
        }
        match self.store.types().get(arg) {
            AbstractType::Parameter { owner, index: param_index } => {
                let source = match owner {
                    TypeParameterOwner::Class(_) => TypeArgumentsRegister::Instantiator,
                    TypeParameterOwner::Function(_) => TypeArgumentsRegister::Function,
                };
                // A null caller vector instantiates the parameter to dynamic.
                let matched = asm.new_label();
                asm.emit(StubOp::CompareTypeArgumentsNull(source));
                asm.emit(StubOp::BranchIfEqual(matched));
                asm.emit(StubOp::LoadTypeArgumentClassId { index });
                asm.emit(StubOp::CompareTypeArgumentClassId {
                    source,
                    index: *param_index as usize,
                });
                asm.emit(StubOp::BranchIfNotEqual(check_failed));
                asm.bind(matched);
            }
            _ => {
                asm.emit(StubOp::LoadTypeArgumentClassId { index });
                let arg_class = self
                    .store
                    .types()
                    .type_class(arg)
                    .ok_or(StubError::NotSpecializable(ty))?;
                let is_subtype = asm.new_label();
                asm.emit(StubOp::CheckCidRanges {
                    ranges: hierarchy.subtype_ranges(arg_class, true, false),
                    in_range: is_subtype,
                    out_of_range: check_failed,
                });
                asm.bind(is_subtype);
            }
        }
        Ok(())
    }
}

/// Stub a type starts out with, before it has been exercised
pub fn default_code_for_type(store: &ObjectStore, ty: TypeId, config: &StubConfig, lazy_specialize: bool) -> StubCode {
    let core = store.core();
    if ty == core.object_type || ty == core.dynamic_type || ty == core.void_type {
        return StubCode::TopTypeTypeTest;
    }
    match store.types().get(ty) {
        AbstractType::Ref(_) => StubCode::TypeRefTypeTest,
        AbstractType::Interface { .. } | AbstractType::Parameter { .. } => {
            if !config.precompiled_mode && lazy_specialize {
                StubCode::LazySpecializeTypeTest
            } else {
                StubCode::DefaultTypeTest
            }
        }
        _ => StubCode::UnreachableTypeTest,
    }
}

fn build_subtype_range_check(asm: &mut StubAssembler, ranges: Arc<[crate::hierarchy::CidRange]>, smi_is_ok: bool) {
    let cid_range_failed = asm.new_label();
    let is_subtype = asm.new_label();
    if smi_is_ok {
        asm.emit(StubOp::LoadClassIdMayBeSmi);
    } else {
        asm.emit(StubOp::BranchIfSmi(cid_range_failed));
        asm.emit(StubOp::LoadClassId);
    }
    asm.emit(StubOp::CheckCidRanges {
        ranges,
        in_range: is_subtype,
        out_of_range: cid_range_failed,
    });
    asm.bind(is_subtype);
    asm.emit(StubOp::Return);
    asm.bind(cid_range_failed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::HierarchyInfo;

    #[test]
    fn test_default_code() {
        let mut store = ObjectStore::new();
        let core = store.core().clone();
        let t = store.type_parameter(core.list, 0);
        let r = store.types_mut().intern(AbstractType::Ref(core.int_type));
        let fn_type = store.types_mut().intern(AbstractType::Function {
            parameters: vec![],
            result: core.int_type,
        });
        let config = StubConfig::default();
        let code = |ty, lazy| default_code_for_type(&store, ty, &config, lazy);
        assert_eq!(code(core.object_type, true), StubCode::TopTypeTypeTest);
        assert_eq!(code(core.void_type, true), StubCode::TopTypeTypeTest);
        assert_eq!(code(r, true), StubCode::TypeRefTypeTest);
        assert_eq!(code(core.int_type, true), StubCode::LazySpecializeTypeTest);
        assert_eq!(code(t, true), StubCode::LazySpecializeTypeTest);
        assert_eq!(code(core.int_type, false), StubCode::DefaultTypeTest);
        assert_eq!(code(fn_type, true), StubCode::UnreachableTypeTest);

        let precompiled = StubConfig {
            precompiled_mode: true,
            ..StubConfig::default()
        };
        assert_eq!(
            default_code_for_type(&store, core.int_type, &precompiled, true),
            StubCode::DefaultTypeTest
        );
    }

    #[test]
    fn test_int_stub_fast_cases() {
        let store = ObjectStore::new();
        let hi = HierarchyInfo::new(&store);
        let generator = TypeTestingStubGenerator::new(&store, StubConfig::default()).with_hierarchy(&hi);
        let routine = generator.build_code_for_type(store.core().int_type).unwrap();
        let ops = routine.ops();
        assert!(matches!(ops[0], StubOp::BranchIfNotSmi(_)));
        assert_eq!(ops[1], StubOp::Return);
        assert!(ops.contains(&StubOp::LoadClassIdMayBeSmi));
        assert_eq!(ops.last(), Some(&StubOp::JumpToSlowPath));
        assert!(routine.name().starts_with("TypeTestingStub_dart_core_int__"));
    }

    #[test]
    fn test_string_rejects_smi_first() {
        let store = ObjectStore::new();
        let hi = HierarchyInfo::new(&store);
        let generator = TypeTestingStubGenerator::new(&store, StubConfig::default()).with_hierarchy(&hi);
        let routine = generator.build_code_for_type(store.core().string_type).unwrap();
        assert!(matches!(routine.ops()[0], StubOp::BranchIfSmi(_)));
        assert_eq!(routine.ops()[1], StubOp::LoadClassId);
    }

    #[test]
    fn test_generic_stub_checks_each_argument() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let pair = store.declare_class("Pair", None, Some(object), &["A", "B"]);
        let int = store.core().int_type;
        let dynamic = store.core().dynamic_type;
        let pair_int_dynamic = store.interface_type(pair, &[int, dynamic]);
        let hi = HierarchyInfo::new(&store);
        let generator = TypeTestingStubGenerator::new(&store, StubConfig::default()).with_hierarchy(&hi);
        let routine = generator.build_code_for_type(pair_int_dynamic).unwrap();
        let loads: Vec<_> = routine
            .ops()
            .iter()
            .filter(|op| matches!(op, StubOp::LoadTypeArgumentClassId { .. }))
            .collect();
        // `dynamic` needs no check.
        assert_eq!(loads, vec![&StubOp::LoadTypeArgumentClassId { index: 0 }]);
        assert!(routine.ops().contains(&StubOp::CompareInstanceTypeArgumentsNull));
    }

    #[test]
    fn test_type_parameter_argument_compares_with_instantiator() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let boxed = store.declare_class("Box", None, Some(object), &["T"]);
        let holder = store.declare_class("Holder", None, Some(object), &["H"]);
        let h = store.type_parameter(holder, 0);
        let box_h = store.interface_type(boxed, &[h]);
        let hi = HierarchyInfo::new(&store);
        let generator = TypeTestingStubGenerator::new(&store, StubConfig::default()).with_hierarchy(&hi);
        let routine = generator.build_code_for_type(box_h).unwrap();
        assert!(routine.ops().contains(&StubOp::CompareTypeArgumentClassId {
            source: TypeArgumentsRegister::Instantiator,
            index: 0,
        }));
    }

    #[test]
    fn test_errors() {
        let mut store = ObjectStore::new();
        let core = store.core().clone();
        let t = store.type_parameter(core.list, 0);
        let no_hierarchy = TypeTestingStubGenerator::new(&store, StubConfig::default());
        assert_eq!(
            no_hierarchy.build_code_for_type(core.int_type).unwrap_err(),
            StubError::NoHierarchy(core.int)
        );
        let hi = HierarchyInfo::new(&store);
        let generator = TypeTestingStubGenerator::new(&store, StubConfig::default()).with_hierarchy(&hi);
        assert_eq!(generator.build_code_for_type(t).unwrap_err(), StubError::NotSpecializable(t));

        let tiny = StubConfig {
            max_stub_bytes: 8,
            ..StubConfig::default()
        };
        let generator = TypeTestingStubGenerator::new(&store, tiny).with_hierarchy(&hi);
        assert_eq!(
            generator.build_code_for_type(core.int_type).unwrap_err(),
            StubError::TooLarge {
                ty: core.int_type,
                limit: 8
            }
        );
    }

    #[test]
    fn test_optimized_code() {
        let mut store = ObjectStore::new();
        let core = store.core().clone();
        let r = store.types_mut().intern(AbstractType::Ref(core.int_type));
        let t = store.type_parameter(core.list, 0);
        let hi = HierarchyInfo::new(&store);
        let generator = TypeTestingStubGenerator::new(&store, StubConfig::default()).with_hierarchy(&hi);
        assert_eq!(generator.optimized_code_for_type(r), StubCode::TypeRefTypeTest);
        assert_eq!(generator.optimized_code_for_type(core.dynamic_type), StubCode::TopTypeTypeTest);
        assert!(matches!(generator.optimized_code_for_type(core.int_type), StubCode::Specialized(_)));
        assert_eq!(generator.optimized_code_for_type(t), StubCode::DefaultTypeTest);

        let no_hierarchy = TypeTestingStubGenerator::new(&store, StubConfig::default());
        assert_eq!(no_hierarchy.optimized_code_for_type(core.int_type), StubCode::DefaultTypeTest);
    }
}
