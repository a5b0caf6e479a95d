//! Classes, libraries and fields

use super::{ClassId, ConstValue, FieldId, FunctionId, LibraryId, TypeArgsId, TypeId};

/// A library (unit of native resolution and stub naming)
#[derive(Debug, Clone)]
pub struct Library {
    /// Handle
    pub id: LibraryId,
    /// Import URL
    pub url: String,
    /// Whether natives in this library can be resolved
    pub has_native_resolver: bool,
}

/// Declared type parameter
#[derive(Debug, Clone, PartialEq)]
pub struct TypeParameterDecl {
    /// Name
    pub name: String,
    /// Upper bound
    pub bound: TypeId,
    /// Bound mentions a class type parameter, so callers cannot prove it
    pub is_generic_covariant_impl: bool,
}

impl TypeParameterDecl {
    /// Parameter `name` bounded by `bound`
    pub fn new(name: &str, bound: TypeId) -> Self {
        TypeParameterDecl {
            name: name.to_string(),
            bound,
            is_generic_covariant_impl: false,
        }
    }
}

/// A class in the class table
#[derive(Debug, Clone)]
pub struct Class {
    /// Class id
    pub id: ClassId,
    /// Name
    pub name: String,
    /// Declaring library
    pub library: Option<LibraryId>,
    /// Superclass
    pub super_class: Option<ClassId>,
    /// Implemented interfaces
    pub interfaces: Vec<ClassId>,
    /// Own type parameters
    pub type_parameters: Vec<TypeParameterDecl>,
    /// Length of the flattened type-argument vector (super arguments included)
    pub num_type_arguments: usize,
    /// Byte offset of the type-argument field in instances
    pub type_arguments_field_offset: Option<u32>,
    /// Declaration vector: super arguments followed by own parameters
    pub declaration_type_arguments: Option<TypeArgsId>,
    /// `C<T0, ..., Tn>` over the class's own parameters
    pub declaration_type: TypeId,
    /// Abstract (no direct instances)
    pub is_abstract: bool,
    /// Some other class implements this one
    pub is_implemented: bool,
    /// Holds a library's top-level functions and fields
    pub is_top_level: bool,
    /// Instance and static fields
    pub fields: Vec<FieldId>,
    /// Methods, accessors and constructors
    pub functions: Vec<FunctionId>,
    pub(crate) next_field_offset: u32,
}

impl Class {
    /// Number of own type parameters
    pub fn num_type_parameters(&self) -> usize {
        self.type_parameters.len()
    }

    /// Whether the class has own type parameters
    pub fn is_generic(&self) -> bool {
        !self.type_parameters.is_empty()
    }

    /// Offset of the first own type parameter in the flattened vector
    pub fn own_type_arguments_offset(&self) -> usize {
        self.num_type_arguments - self.type_parameters.len()
    }
}

/// A field
#[derive(Debug, Clone)]
pub struct Field {
    /// Handle
    pub id: FieldId,
    /// Name
    pub name: String,
    /// Owning class
    pub owner: ClassId,
    /// Declared type
    pub ty: TypeId,
    /// Static field
    pub is_static: bool,
    /// Final field
    pub is_final: bool,
    /// Const field (value known at compile time)
    pub is_const: bool,
    /// Static initial value, if already evaluated
    pub static_value: Option<ConstValue>,
    /// Has a lazy initializer function
    pub has_initializer: bool,
    /// Stores must update the field guard
    pub needs_guard: bool,
    /// Setter must check the assigned value
    pub is_covariant: bool,
    /// Setter must check the assigned value against a class type parameter
    pub is_generic_covariant_impl: bool,
    /// Byte offset in instances
    pub offset: u32,
}
