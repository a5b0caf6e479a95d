//! Class hierarchy oracle
//!
//! Answers, per class, which cid ranges hold its subclasses or subtypes and
//! whether a type can be tested with a range check at all. Range vectors are
//! computed on first request and cached.

use std::sync::Arc;

use dashmap::DashMap;

use crate::object::{AbstractType, ClassId, ObjectStore, TypeId};

use super::cid_range::{build_ranges, CidRange};

/// Range and subtype queries used by the builder and the stub generator
pub trait HierarchyOracle {
    /// `ty` is tested completely by a subtype cid range check (no type
    /// arguments need to be inspected)
    fn can_use_subtype_range_check_for(&self, ty: TypeId) -> bool;

    /// `ty` is tested by a subclass range check followed by a check of each
    /// own type argument
    fn can_use_generic_subtype_range_check_for(&self, ty: TypeId) -> bool;

    /// Sorted cid ranges of the classes that are subtypes of `class`
    fn subtype_ranges(&self, class: ClassId, include_abstract: bool, exclude_null: bool) -> Arc<[CidRange]>;

    /// Sorted cid ranges of the concrete subclasses of `class`
    fn subclass_ranges(&self, class: ClassId) -> Arc<[CidRange]>;

    /// Exact subtype query
    fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool;
}

/// [`HierarchyOracle`] computed from an [`ObjectStore`]
pub struct HierarchyInfo<'a> {
    store: &'a ObjectStore,
    subtype_cache: DashMap<(ClassId, bool, bool), Arc<[CidRange]>>,
    subclass_cache: DashMap<ClassId, Arc<[CidRange]>>,
}

impl<'a> HierarchyInfo<'a> {
    /// Oracle over the classes of `store`
    pub fn new(store: &'a ObjectStore) -> Self {
        HierarchyInfo {
            store,
            subtype_cache: DashMap::new(),
            subclass_cache: DashMap::new(),
        }
    }

    /// Store the oracle reads from
    pub fn store(&self) -> &'a ObjectStore {
        self.store
    }

    fn build(&self, class: ClassId, use_subtype_test: bool, include_abstract: bool, exclude_null: bool) -> Arc<[CidRange]> {
        let store = self.store;
        let null = store.core().null;
        let ranges = build_ranges(
            store.num_cids(),
            |cid| {
                let cid = ClassId(cid);
                if cid == null {
                    return true;
                }
                if use_subtype_test {
                    store.is_class_subtype_of(cid, class)
                } else {
                    store.is_subclass_of(cid, class)
                }
            },
            |cid| {
                let cid = ClassId(cid);
                (cid == null && exclude_null) || (!include_abstract && store.class(cid).is_abstract)
            },
        );
        Arc::from(ranges)
    }

    fn own_type_arguments(&self, ty: TypeId) -> Option<(ClassId, Vec<TypeId>)> {
        let types = self.store.types();
        let ty = types.deref(ty);
        let AbstractType::Interface { class, arguments } = types.get(ty) else {
            return None;
        };
        let decl = self.store.class(*class);
        let own = decl.num_type_parameters();
        let elements = match arguments {
            Some(v) => {
                let all = types.vector(*v);
                all[all.len().saturating_sub(own)..].to_vec()
            }
            None => Vec::new(),
        };
        Some((*class, elements))
    }
}

impl HierarchyOracle for HierarchyInfo<'_> {
    fn can_use_subtype_range_check_for(&self, ty: TypeId) -> bool {
        let types = self.store.types();
        if !types.is_instantiated(ty, crate::object::Genericity::Any) {
            return false;
        }
        let Some((class, own)) = self.own_type_arguments(ty) else {
            return false;
        };
        // Only raw generic types: type arguments would need a check.
        !self.store.class(class).is_generic() || own.iter().all(|&t| self.store.is_object_or_dynamic(t))
    }

    fn can_use_generic_subtype_range_check_for(&self, ty: TypeId) -> bool {
        let Some((class, own)) = self.own_type_arguments(ty) else {
            return false;
        };
        let decl = self.store.class(class);
        if !decl.is_generic() || decl.is_implemented {
            return false;
        }
        let types = self.store.types();
        own.iter()
            .all(|&t| {
                types.is_type_parameter(t)
                    || self.store.is_object_or_dynamic(t)
                    || self.can_use_subtype_range_check_for(t)
            })
    }

    fn subtype_ranges(&self, class: ClassId, include_abstract: bool, exclude_null: bool) -> Arc<[CidRange]> {
        let key = (class, include_abstract, exclude_null);
        if let Some(ranges) = self.subtype_cache.get(&key) {
            return ranges.value().clone();
        }
        let ranges = self.build(class, true, include_abstract, exclude_null);
        self.subtype_cache.insert(key, ranges.clone());
        ranges
    }

    fn subclass_ranges(&self, class: ClassId) -> Arc<[CidRange]> {
        if let Some(ranges) = self.subclass_cache.get(&class) {
            return ranges.value().clone();
        }
        let ranges = self.build(class, false, false, true);
        self.subclass_cache.insert(class, ranges.clone());
        ranges
    }

    fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        self.store.is_subtype(sub, sup)
    }
}
