//! Type usage collector
//!
//! Whole-program analysis run after all flow graphs exist. It records which
//! type-argument vectors reach the allocation sites of every generic class,
//! propagates symbolic vectors through the vectors known for their enclosing
//! class, and finally decides which canonical types are ever the target of a
//! type test. Only those types get a specialised type testing stub.
//!
//! Unrecognized shapes are skipped: the result may miss types but never
//! claims a type is tested when no code tests it.

pub mod finder;
pub mod instantiator;
pub mod register;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::config::TypeUsageConfig;
use crate::il::FlowGraph;
use crate::object::{AbstractType, ClassId, Genericity, ObjectStore, TypeArgsId, TypeId, TypeParameterOwner};

pub use finder::TypeArgumentClassFinder;
pub use instantiator::TypeArgumentInstantiator;
pub use register::{classify, TypeArgumentsUse};

/// Insertion-ordered set of type-argument vectors (the null vector included)
#[derive(Debug, Clone, Default)]
pub struct TypeArgumentsSet {
    order: Vec<Option<TypeArgsId>>,
    seen: FxHashSet<Option<TypeArgsId>>,
}

impl TypeArgumentsSet {
    /// Add a vector; false when already present
    pub fn insert(&mut self, vector: Option<TypeArgsId>) -> bool {
        if !self.seen.insert(vector) {
            return false;
        }
        self.order.push(vector);
        true
    }

    /// Whether the vector was recorded
    pub fn contains(&self, vector: Option<TypeArgsId>) -> bool {
        self.seen.contains(&vector)
    }

    /// Vectors in recording order
    pub fn iter(&self) -> impl Iterator<Item = Option<TypeArgsId>> + '_ {
        self.order.iter().copied()
    }

    /// Number of vectors
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Result and working state of the collector
#[derive(Debug)]
pub struct TypeUsageInfo {
    config: TypeUsageConfig,
    assert_assignable_types: FxHashSet<TypeId>,
    instance_creation_arguments: Vec<TypeArgumentsSet>,
}

impl TypeUsageInfo {
    /// Empty collector sized for the classes of `store`
    pub fn new(store: &ObjectStore, config: TypeUsageConfig) -> Self {
        TypeUsageInfo {
            config,
            assert_assignable_types: FxHashSet::default(),
            instance_creation_arguments: vec![TypeArgumentsSet::default(); store.num_cids()],
        }
    }

    /// Collector over the graphs of a whole program
    pub fn collect<'g>(
        store: &mut ObjectStore,
        graphs: impl IntoIterator<Item = &'g FlowGraph>,
        config: TypeUsageConfig,
    ) -> Self {
        let mut info = TypeUsageInfo::new(store, config);
        for graph in graphs {
            info.record_graph(store, graph);
        }
        info.build_type_usage_information(store);
        info
    }

    /// `ty` is the destination of an assignability check or type test
    pub fn use_type_in_assert_assignable(&mut self, store: &ObjectStore, ty: TypeId) {
        self.assert_assignable_types.insert(store.types().deref(ty));
    }

    /// `class` is allocated with `vector`; the vector is also recorded for
    /// every generic superclass
    pub fn use_type_arguments_in_instance_creation(
        &mut self,
        store: &ObjectStore,
        class: ClassId,
        vector: Option<TypeArgsId>,
    ) {
        if let Some(v) = vector {
            // A vector may be longer than the class needs: callers reuse a
            // prefix of an enclosing vector.
            if store.types().vector(v).len() < store.class(class).num_type_arguments {
                return;
            }
            if !store.types().is_vector_instantiated(vector, Genericity::Any)
                && TypeArgumentClassFinder::new(store).find_class(v).is_none()
            {
                return;
            }
        }
        self.record_for_class_and_supers(store, class, &[vector]);
    }

    fn record_for_class_and_supers(&mut self, store: &ObjectStore, class: ClassId, vectors: &[Option<TypeArgsId>]) {
        let mut current = Some(class);
        while let Some(c) = current {
            let decl = store.class(c);
            if decl.num_type_arguments == 0 {
                break;
            }
            let Some(set) = self.instance_creation_arguments.get_mut(c.0 as usize) else {
                break;
            };
            for &v in vectors {
                set.insert(v);
            }
            current = decl.super_class;
        }
    }

    /// Vectors recorded for allocations of `class`
    pub fn instance_creation_arguments(&self, class: ClassId) -> Option<&TypeArgumentsSet> {
        self.instance_creation_arguments.get(class.0 as usize)
    }

    /// Run the propagation and correlation passes
    pub fn build_type_usage_information(&mut self, store: &mut ObjectStore) {
        self.propagate_type_arguments(store);
        let tested = self.collect_type_parameters_used_in_assert_assignable(store);
        self.update_assert_assignable_types(store, &tested);
        debug!(
            target: "kilt::type_usage",
            types = self.assert_assignable_types.len(),
            parameters = tested.len(),
            "type usage information built"
        );
    }

    fn propagate_type_arguments(&mut self, store: &mut ObjectStore) {
        let cid_count = self.instance_creation_arguments.len().min(store.num_cids());
        for round in 0..self.config.propagation_rounds {
            let mut added = 0usize;
            for cid in 0..cid_count {
                let class = ClassId(cid as u32);
                let recorded: Vec<_> = self.instance_creation_arguments[cid].iter().collect();
                let mut delayed: Vec<Option<TypeArgsId>> = Vec::new();
                for vector in recorded.into_iter().flatten() {
                    if store.types().is_vector_instantiated(Some(vector), Genericity::Any) {
                        continue;
                    }
                    let Some(enclosing) = TypeArgumentClassFinder::new(store).find_class(vector) else {
                        continue;
                    };
                    if enclosing == class {
                        continue;
                    }
                    let instantiators: Vec<_> = self.instance_creation_arguments[enclosing.0 as usize]
                        .iter()
                        .filter(|&i| store.types().is_vector_instantiated(i, Genericity::Any))
                        .collect();
                    for instantiator in instantiators {
                        let result = TypeArgumentInstantiator::instantiate(store, class, Some(vector), instantiator);
                        if !delayed.contains(&result) {
                            delayed.push(result);
                        }
                    }
                }
                if delayed.is_empty() {
                    continue;
                }
                let before = self.instance_creation_arguments[cid].len();
                self.record_for_class_and_supers(store, class, &delayed);
                added += self.instance_creation_arguments[cid].len() - before;
            }
            debug!(target: "kilt::type_usage", round, added, "propagated type arguments");
        }
    }

    fn collect_type_parameters_used_in_assert_assignable(&self, store: &ObjectStore) -> FxHashSet<TypeId> {
        self.assert_assignable_types
            .iter()
            .copied()
            .filter(|&t| store.types().is_type_parameter(t))
            .collect()
    }

    fn update_assert_assignable_types(&mut self, store: &ObjectStore, tested: &FxHashSet<TypeId>) {
        self.assert_assignable_types.insert(store.core().dynamic_type);
        self.assert_assignable_types.insert(store.core().object_type);

        let types = store.types();
        for class in store.classes() {
            if class.num_type_arguments == 0 {
                continue;
            }
            let offset = class.own_type_arguments_offset();
            for i in 0..class.num_type_parameters() {
                let index = offset + i;
                let parameter = types.find(&AbstractType::Parameter {
                    owner: TypeParameterOwner::Class(class.id),
                    index: index as u32,
                });
                if !parameter.is_some_and(|p| tested.contains(&p)) {
                    continue;
                }
                let Some(set) = self.instance_creation_arguments.get(class.id.0 as usize) else {
                    continue;
                };
                let found: Vec<TypeId> = set
                    .iter()
                    .flatten()
                    .filter_map(|v| types.vector(v).get(index).copied())
                    .filter(|&t| types.is_instantiated(t, Genericity::Any))
                    .collect();
                self.assert_assignable_types.extend(found);
            }
        }
    }

    /// Whether some code tests against `ty`
    pub fn is_used_in_type_test(&self, store: &ObjectStore, ty: TypeId) -> bool {
        self.assert_assignable_types.contains(&store.types().deref(ty))
    }

    /// Every type found to be tested against
    pub fn tested_types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.assert_assignable_types.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        store: ObjectStore,
        boxed: ClassId,
        t: TypeId,
    }

    fn fixture() -> Fixture {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let boxed = store.declare_class("Box", None, Some(object), &["T"]);
        let t = store.type_parameter(boxed, 0);
        Fixture { store, boxed, t }
    }

    fn vector(store: &mut ObjectStore, elements: &[TypeId]) -> TypeArgsId {
        store.types_mut().intern_vector(elements.to_vec())
    }

    #[test]
    fn test_instance_creation_recorded_for_supers() {
        let mut f = fixture();
        let sub = f.store.declare_class("SubBox", None, Some(f.boxed), &[]);
        let int = f.store.core().int_type;
        let v = vector(&mut f.store, &[int]);
        let mut info = TypeUsageInfo::new(&f.store, TypeUsageConfig::default());
        info.use_type_arguments_in_instance_creation(&f.store, sub, Some(v));
        assert!(info.instance_creation_arguments(sub).unwrap().contains(Some(v)));
        assert!(info.instance_creation_arguments(f.boxed).unwrap().contains(Some(v)));
        let object = f.store.core().object;
        assert!(info.instance_creation_arguments(object).unwrap().is_empty());
    }

    #[test]
    fn test_function_parameter_vectors_dropped() {
        let mut f = fixture();
        let object = f.store.core().object;
        let mut g = f.store.new_function("g", object, crate::object::FunctionKind::Regular);
        g.type_parameters.push(crate::object::TypeParameterDecl::new("X", f.store.core().dynamic_type));
        let gid = f.store.add_function(g);
        let x = f.store.function_type_parameter(gid, 0);
        let v = vector(&mut f.store, &[x]);
        let mut info = TypeUsageInfo::new(&f.store, TypeUsageConfig::default());
        info.use_type_arguments_in_instance_creation(&f.store, f.boxed, Some(v));
        assert!(info.instance_creation_arguments(f.boxed).unwrap().is_empty());
    }

    #[test]
    fn test_longer_vector_prefix_accepted() {
        let mut f = fixture();
        let int = f.store.core().int_type;
        let string = f.store.core().string_type;
        let v = vector(&mut f.store, &[int, string]);
        let mut info = TypeUsageInfo::new(&f.store, TypeUsageConfig::default());
        info.use_type_arguments_in_instance_creation(&f.store, f.boxed, Some(v));
        assert!(info.instance_creation_arguments(f.boxed).unwrap().contains(Some(v)));
    }

    #[test]
    fn test_box_scenario() {
        let mut f = fixture();
        let int = f.store.core().int_type;
        let string = f.store.core().string_type;
        let double = f.store.core().double_type;
        let box_int = f.store.interface_type(f.boxed, &[int]);
        let box_double = f.store.interface_type(f.boxed, &[double]);
        let v_int = vector(&mut f.store, &[int]);
        let v_string = vector(&mut f.store, &[string]);

        let mut info = TypeUsageInfo::new(&f.store, TypeUsageConfig::default());
        info.use_type_arguments_in_instance_creation(&f.store, f.boxed, Some(v_int));
        info.use_type_arguments_in_instance_creation(&f.store, f.boxed, Some(v_string));
        info.use_type_in_assert_assignable(&f.store, box_int);
        info.build_type_usage_information(&mut f.store);

        assert!(info.is_used_in_type_test(&f.store, box_int));
        assert!(!info.is_used_in_type_test(&f.store, box_double));
        assert!(info.is_used_in_type_test(&f.store, f.store.core().object_type));
        assert!(info.is_used_in_type_test(&f.store, f.store.core().dynamic_type));
        // T is never a check target, so its values are not recorded.
        assert!(!info.is_used_in_type_test(&f.store, int));
    }

    #[test]
    fn test_tested_parameter_adds_recorded_values() {
        let mut f = fixture();
        let int = f.store.core().int_type;
        let string = f.store.core().string_type;
        let v_int = vector(&mut f.store, &[int]);
        let v_string = vector(&mut f.store, &[string]);
        let mut info = TypeUsageInfo::new(&f.store, TypeUsageConfig::default());
        info.use_type_arguments_in_instance_creation(&f.store, f.boxed, Some(v_int));
        info.use_type_arguments_in_instance_creation(&f.store, f.boxed, Some(v_string));
        info.use_type_in_assert_assignable(&f.store, f.t);
        info.build_type_usage_information(&mut f.store);
        assert!(info.is_used_in_type_test(&f.store, int));
        assert!(info.is_used_in_type_test(&f.store, string));
        assert!(!info.is_used_in_type_test(&f.store, f.store.core().double_type));
    }

    #[test]
    fn test_propagation_through_enclosing_class() {
        // class Holder<H> { make() => Box<H>(); }  with Holder<String> allocated
        let mut f = fixture();
        let object = f.store.core().object;
        let holder = f.store.declare_class("Holder", None, Some(object), &["H"]);
        let h = f.store.type_parameter(holder, 0);
        let string = f.store.core().string_type;
        let symbolic = vector(&mut f.store, &[h]);
        let v_string = vector(&mut f.store, &[string]);

        let mut info = TypeUsageInfo::new(&f.store, TypeUsageConfig::default());
        info.use_type_arguments_in_instance_creation(&f.store, f.boxed, Some(symbolic));
        info.use_type_arguments_in_instance_creation(&f.store, holder, Some(v_string));
        info.use_type_in_assert_assignable(&f.store, f.t);
        info.build_type_usage_information(&mut f.store);

        assert!(info.instance_creation_arguments(f.boxed).unwrap().contains(Some(v_string)));
        assert!(info.is_used_in_type_test(&f.store, string));
    }

    #[test]
    fn test_zero_rounds_skip_propagation() {
        let mut f = fixture();
        let object = f.store.core().object;
        let holder = f.store.declare_class("Holder", None, Some(object), &["H"]);
        let h = f.store.type_parameter(holder, 0);
        let string = f.store.core().string_type;
        let symbolic = vector(&mut f.store, &[h]);
        let v_string = vector(&mut f.store, &[string]);

        let config = TypeUsageConfig { propagation_rounds: 0 };
        let mut info = TypeUsageInfo::new(&f.store, config);
        info.use_type_arguments_in_instance_creation(&f.store, f.boxed, Some(symbolic));
        info.use_type_arguments_in_instance_creation(&f.store, holder, Some(v_string));
        info.build_type_usage_information(&mut f.store);
        assert!(!info.instance_creation_arguments(f.boxed).unwrap().contains(Some(v_string)));
    }

    #[test]
    fn test_type_ref_is_dereferenced() {
        let mut f = fixture();
        let int = f.store.core().int_type;
        let box_int = f.store.interface_type(f.boxed, &[int]);
        let r = f.store.types_mut().intern(AbstractType::Ref(box_int));
        let mut info = TypeUsageInfo::new(&f.store, TypeUsageConfig::default());
        info.use_type_in_assert_assignable(&f.store, box_int);
        assert!(info.is_used_in_type_test(&f.store, r));
    }
}
