//! Canonical types and type argument vectors
//!
//! Every type and every type-argument vector is interned exactly once, so
//! identity comparison of [`TypeId`] / [`TypeArgsId`] is canonical equality.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::{ClassId, FunctionId};

/// Canonical type handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Canonical type-argument vector handle. The null vector is `None` wherever
/// an `Option<TypeArgsId>` appears.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeArgsId(pub u32);

impl std::fmt::Display for TypeArgsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ta{}", self.0)
    }
}

/// Declaration that owns a type parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeParameterOwner {
    /// Class type parameter; the index points into the full class vector
    Class(ClassId),
    /// Function type parameter; the index points into the function vector
    Function(FunctionId),
}

/// Structural description of a type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbstractType {
    /// `dynamic`
    Dynamic,
    /// `void`
    Void,
    /// Interface type `C<...>` carrying the full (flattened) argument vector
    Interface {
        /// Type class
        class: ClassId,
        /// Full argument vector, `None` for non-generic classes
        arguments: Option<TypeArgsId>,
    },
    /// Reference to a class or function type parameter
    Parameter {
        /// Declaring class or function
        owner: TypeParameterOwner,
        /// Index into the owner's type-argument vector
        index: u32,
    },
    /// Function type
    Function {
        /// Positional parameter types
        parameters: Vec<TypeId>,
        /// Result type
        result: TypeId,
    },
    /// Indirection to another type (used to close recursive types)
    Ref(TypeId),
}

/// Which kind of type parameters a query is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Genericity {
    /// Class and function type parameters
    Any,
    /// Class type parameters only
    CurrentClass,
    /// Function type parameters only
    Functions,
}

/// Interning table for types and type-argument vectors
#[derive(Debug, Default)]
pub struct TypeStore {
    types: Vec<AbstractType>,
    type_ids: FxHashMap<AbstractType, TypeId>,
    vectors: Vec<Vec<TypeId>>,
    vector_ids: FxHashMap<Vec<TypeId>, TypeArgsId>,
}

impl TypeStore {
    /// Create a store with `dynamic` and `void` pre-interned
    pub fn new() -> Self {
        let mut store = TypeStore::default();
        store.intern(AbstractType::Dynamic);
        store.intern(AbstractType::Void);
        store
    }

    /// `dynamic`
    pub fn dynamic(&self) -> TypeId {
        TypeId(0)
    }

    /// `void`
    pub fn void(&self) -> TypeId {
        TypeId(1)
    }

    /// Intern a type, returning its canonical handle
    pub fn intern(&mut self, ty: AbstractType) -> TypeId {
        if let Some(&id) = self.type_ids.get(&ty) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty.clone());
        self.type_ids.insert(ty, id);
        id
    }

    /// Intern a type-argument vector
    pub fn intern_vector(&mut self, types: Vec<TypeId>) -> TypeArgsId {
        if let Some(&id) = self.vector_ids.get(&types) {
            return id;
        }
        let id = TypeArgsId(self.vectors.len() as u32);
        self.vectors.push(types.clone());
        self.vector_ids.insert(types, id);
        id
    }

    /// Look up an already interned type without creating it
    pub fn find(&self, ty: &AbstractType) -> Option<TypeId> {
        self.type_ids.get(ty).copied()
    }

    /// Structural description of a type
    pub fn get(&self, id: TypeId) -> &AbstractType {
        &self.types[id.0 as usize]
    }

    /// Elements of a type-argument vector
    pub fn vector(&self, id: TypeArgsId) -> &[TypeId] {
        &self.vectors[id.0 as usize]
    }

    /// Length of a possibly-null vector
    pub fn vector_len(&self, id: Option<TypeArgsId>) -> usize {
        id.map_or(0, |v| self.vector(v).len())
    }

    /// Number of interned types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All interned types in creation order
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &AbstractType)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, ty)| (TypeId(i as u32), ty))
    }

    /// Follow `Ref` indirections
    pub fn deref(&self, mut id: TypeId) -> TypeId {
        while let AbstractType::Ref(target) = self.get(id) {
            id = *target;
        }
        id
    }

    /// Whether the type is a `Ref`
    pub fn is_type_ref(&self, id: TypeId) -> bool {
        matches!(self.get(id), AbstractType::Ref(_))
    }

    /// Whether the type is a type parameter
    pub fn is_type_parameter(&self, id: TypeId) -> bool {
        matches!(self.get(id), AbstractType::Parameter { .. })
    }

    /// Class of an interface type
    pub fn type_class(&self, id: TypeId) -> Option<ClassId> {
        match self.get(id) {
            AbstractType::Interface { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Argument vector of an interface type
    pub fn type_arguments(&self, id: TypeId) -> Option<TypeArgsId> {
        match self.get(id) {
            AbstractType::Interface { arguments, .. } => *arguments,
            _ => None,
        }
    }

    /// Whether the type contains no free type parameters of the given kind
    pub fn is_instantiated(&self, id: TypeId, genericity: Genericity) -> bool {
        match self.get(id) {
            AbstractType::Dynamic | AbstractType::Void => true,
            AbstractType::Interface { arguments, .. } => {
                self.is_vector_instantiated(*arguments, genericity)
            }
            AbstractType::Parameter { owner, .. } => match (owner, genericity) {
                (TypeParameterOwner::Class(_), Genericity::Functions) => true,
                (TypeParameterOwner::Function(_), Genericity::CurrentClass) => true,
                _ => false,
            },
            AbstractType::Function { parameters, result } => {
                parameters
                    .iter()
                    .all(|&p| self.is_instantiated(p, genericity))
                    && self.is_instantiated(*result, genericity)
            }
            AbstractType::Ref(target) => self.is_instantiated(*target, genericity),
        }
    }

    /// Vector variant of [`TypeStore::is_instantiated`]; the null vector is
    /// instantiated
    pub fn is_vector_instantiated(&self, id: Option<TypeArgsId>, genericity: Genericity) -> bool {
        match id {
            None => true,
            Some(v) => self
                .vector(v)
                .iter()
                .all(|&t| self.is_instantiated(t, genericity)),
        }
    }

    /// Whether every element is `dynamic` (the vector carries no information)
    pub fn is_raw_vector(&self, id: Option<TypeArgsId>) -> bool {
        match id {
            None => true,
            Some(v) => self
                .vector(v)
                .iter()
                .all(|&t| matches!(self.get(t), AbstractType::Dynamic)),
        }
    }

    /// Substitute type parameters. A null instantiator maps the parameters it
    /// owns to `dynamic`.
    pub fn instantiate(
        &mut self,
        id: TypeId,
        instantiator: Option<TypeArgsId>,
        function_args: Option<TypeArgsId>,
    ) -> TypeId {
        match self.get(id).clone() {
            AbstractType::Dynamic | AbstractType::Void => id,
            AbstractType::Parameter { owner, index } => {
                let vector = match owner {
                    TypeParameterOwner::Class(_) => instantiator,
                    TypeParameterOwner::Function(_) => function_args,
                };
                match vector {
                    None => self.dynamic(),
                    Some(v) => self
                        .vector(v)
                        .get(index as usize)
                        .copied()
                        .unwrap_or_else(|| self.dynamic()),
                }
            }
            AbstractType::Interface { class, arguments } => {
                if self.is_vector_instantiated(arguments, Genericity::Any) {
                    return id;
                }
                let arguments =
                    arguments.map(|v| self.instantiate_vector(v, instantiator, function_args));
                self.intern(AbstractType::Interface { class, arguments })
            }
            AbstractType::Function { parameters, result } => {
                let parameters = parameters
                    .into_iter()
                    .map(|p| self.instantiate(p, instantiator, function_args))
                    .collect();
                let result = self.instantiate(result, instantiator, function_args);
                self.intern(AbstractType::Function { parameters, result })
            }
            AbstractType::Ref(target) => self.instantiate(target, instantiator, function_args),
        }
    }

    /// Substitute type parameters in every element of a vector
    pub fn instantiate_vector(
        &mut self,
        id: TypeArgsId,
        instantiator: Option<TypeArgsId>,
        function_args: Option<TypeArgsId>,
    ) -> TypeArgsId {
        let elements = self.vector(id).to_vec();
        let instantiated = elements
            .into_iter()
            .map(|t| self.instantiate(t, instantiator, function_args))
            .collect();
        self.intern_vector(instantiated)
    }
}
