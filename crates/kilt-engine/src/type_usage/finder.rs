//! Locating the class a symbolic type-argument vector is written in

use crate::object::{AbstractType, ClassId, Genericity, ObjectStore, TypeArgsId, TypeId, TypeParameterOwner};

/// Finds the class whose type parameters a non-instantiated vector refers to.
///
/// Vectors mentioning function type parameters, function types or type refs
/// have no such class and are dropped by the collector.
pub struct TypeArgumentClassFinder<'a> {
    store: &'a ObjectStore,
}

impl<'a> TypeArgumentClassFinder<'a> {
    /// Finder over `store`
    pub fn new(store: &'a ObjectStore) -> Self {
        TypeArgumentClassFinder { store }
    }

    /// Class parameterizing `vector`, `None` for instantiated vectors and for
    /// vectors that cannot be attributed to a single class
    pub fn find_class(&self, vector: TypeArgsId) -> Option<ClassId> {
        let types = self.store.types();
        if types.is_vector_instantiated(Some(vector), Genericity::Any) {
            return None;
        }
        let mut found = None;
        if self.visit_vector(vector, &mut found) {
            found
        } else {
            None
        }
    }

    fn visit_vector(&self, vector: TypeArgsId, found: &mut Option<ClassId>) -> bool {
        self.store
            .types()
            .vector(vector)
            .iter()
            .all(|&t| self.visit_type(t, found))
    }

    fn visit_type(&self, ty: TypeId, found: &mut Option<ClassId>) -> bool {
        match self.store.types().get(ty) {
            AbstractType::Parameter { owner: TypeParameterOwner::Class(class), .. } => match found {
                Some(existing) => existing == class,
                None => {
                    *found = Some(*class);
                    true
                }
            },
            AbstractType::Parameter { owner: TypeParameterOwner::Function(_), .. } => false,
            AbstractType::Function { .. } | AbstractType::Ref(_) => false,
            AbstractType::Interface { arguments, .. } => match arguments {
                Some(v) => self.visit_vector(*v, found),
                None => true,
            },
            AbstractType::Dynamic | AbstractType::Void => true,
        }
    }
}
