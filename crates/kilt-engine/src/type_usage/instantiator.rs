//! Instantiating recorded vectors with concrete instantiators

use crate::object::{ClassId, ObjectStore, TypeArgsId};

/// Instantiates the prefix of a symbolic vector a class actually uses
pub struct TypeArgumentInstantiator;

impl TypeArgumentInstantiator {
    /// Instantiate the first `num_type_arguments` entries of `vector` for
    /// `class`. A null instantiator turns every class type parameter into
    /// `dynamic`.
    pub fn instantiate(
        store: &mut ObjectStore,
        class: ClassId,
        vector: Option<TypeArgsId>,
        instantiator: Option<TypeArgsId>,
    ) -> Option<TypeArgsId> {
        let vector = vector?;
        let len = store.class(class).num_type_arguments;
        let elements: Vec<_> = store.types().vector(vector).iter().take(len).copied().collect();
        let types = store.types_mut();
        let instantiated = elements
            .into_iter()
            .map(|t| types.instantiate(t, instantiator, None))
            .collect();
        Some(types.intern_vector(instantiated))
    }
}
