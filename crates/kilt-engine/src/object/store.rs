//! Object store: class table, functions, fields and canonical types

use rustc_hash::FxHashSet;

use super::class::{Class, Field, Library, TypeParameterDecl};
use super::core::CoreLibrary;
use super::function::{Function, FunctionKind};
use super::types::{AbstractType, TypeArgsId, TypeId, TypeParameterOwner, TypeStore};
use super::{ClassId, FieldId, FunctionId, LibraryId};

/// Offset of the header word every instance starts with
const FIRST_FIELD_OFFSET: u32 = 8;
/// Size of one field slot
const WORD_SIZE: u32 = 8;

/// Owner of every class, function, field and type of one program
#[derive(Debug)]
pub struct ObjectStore {
    libraries: Vec<Library>,
    classes: Vec<Class>,
    functions: Vec<Function>,
    fields: Vec<Field>,
    types: TypeStore,
    core: CoreLibrary,
}

impl ObjectStore {
    /// Create a store with the core library installed
    pub fn new() -> Self {
        let mut store = ObjectStore {
            libraries: Vec::new(),
            classes: Vec::new(),
            functions: Vec::new(),
            fields: Vec::new(),
            types: TypeStore::new(),
            core: CoreLibrary::default(),
        };
        store.core = CoreLibrary::install(&mut store);
        store
    }

    // ===== Accessors =====

    /// Well-known core classes, functions and types
    pub fn core(&self) -> &CoreLibrary {
        &self.core
    }

    /// Canonical types
    pub fn types(&self) -> &TypeStore {
        &self.types
    }

    /// Canonical types (interning)
    pub fn types_mut(&mut self) -> &mut TypeStore {
        &mut self.types
    }

    /// Class by id
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    /// Class by id (for fixtures and the loader)
    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }

    /// Whether `id` names a class in the table
    pub fn has_class(&self, id: ClassId) -> bool {
        (id.0 as usize) < self.classes.len()
    }

    /// Number of class ids in use
    pub fn num_cids(&self) -> usize {
        self.classes.len()
    }

    /// All classes in cid order
    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter()
    }

    /// Function by id
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0 as usize]
    }

    /// Function by id (for fixtures and the loader)
    pub fn function_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    /// Field by id
    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0 as usize]
    }

    /// Field by id (for fixtures and the loader)
    pub fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.fields[id.0 as usize]
    }

    /// Library by id
    pub fn library(&self, id: LibraryId) -> &Library {
        &self.libraries[id.0 as usize]
    }

    // ===== Definition =====

    /// Register a library
    pub fn add_library(&mut self, url: &str, has_native_resolver: bool) -> LibraryId {
        let id = LibraryId(self.libraries.len() as u32);
        self.libraries.push(Library {
            id,
            url: url.to_string(),
            has_native_resolver,
        });
        id
    }

    /// Declare a class. The superclass must already be declared; its
    /// arguments default to `dynamic` until [`ObjectStore::set_super_type_arguments`].
    pub fn declare_class(
        &mut self,
        name: &str,
        library: Option<LibraryId>,
        super_class: Option<ClassId>,
        type_parameters: &[&str],
    ) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        let (super_count, super_offset, next_field_offset) = match super_class {
            Some(s) => {
                let sup = self.class(s);
                (
                    sup.num_type_arguments,
                    sup.type_arguments_field_offset,
                    sup.next_field_offset,
                )
            }
            None => (0, None, FIRST_FIELD_OFFSET),
        };
        let num_type_arguments = super_count + type_parameters.len();
        let dynamic = self.types.dynamic();
        let (type_arguments_field_offset, next_field_offset) =
            match (num_type_arguments > 0, super_offset) {
                (true, None) => (Some(next_field_offset), next_field_offset + WORD_SIZE),
                (_, offset) => (offset, next_field_offset),
            };

        self.classes.push(Class {
            id,
            name: name.to_string(),
            library,
            super_class,
            interfaces: Vec::new(),
            type_parameters: type_parameters
                .iter()
                .map(|n| TypeParameterDecl::new(n, dynamic))
                .collect(),
            num_type_arguments,
            type_arguments_field_offset,
            declaration_type_arguments: None,
            declaration_type: dynamic,
            is_abstract: false,
            is_implemented: false,
            is_top_level: false,
            fields: Vec::new(),
            functions: Vec::new(),
            next_field_offset,
        });
        self.recompute_declaration(id, &[]);
        id
    }

    /// Declare the class owning `library`'s top-level members
    pub fn declare_top_level_class(&mut self, library: LibraryId) -> ClassId {
        let id = self.declare_class("::", Some(library), None, &[]);
        self.class_mut(id).is_top_level = true;
        id
    }

    /// Set the arguments passed to the superclass's own type parameters
    pub fn set_super_type_arguments(&mut self, id: ClassId, arguments: &[TypeId]) {
        self.recompute_declaration(id, arguments);
    }

    fn recompute_declaration(&mut self, id: ClassId, super_arguments: &[TypeId]) {
        let class = self.class(id).clone();
        let mut vector: Vec<TypeId> = Vec::with_capacity(class.num_type_arguments);
        if let Some(s) = class.super_class {
            let sup = self.class(s).clone();
            if let Some(super_decl) = sup.declaration_type_arguments {
                let offset = sup.own_type_arguments_offset();
                let mut instantiator = vec![self.types.dynamic(); offset];
                for i in 0..sup.num_type_parameters() {
                    instantiator.push(
                        super_arguments
                            .get(i)
                            .copied()
                            .unwrap_or_else(|| self.types.dynamic()),
                    );
                }
                let instantiator = self.types.intern_vector(instantiator);
                let prefix = self
                    .types
                    .instantiate_vector(super_decl, Some(instantiator), None);
                vector.extend_from_slice(self.types.vector(prefix));
            }
        }
        let offset = vector.len();
        for i in 0..class.num_type_parameters() {
            vector.push(self.types.intern(AbstractType::Parameter {
                owner: TypeParameterOwner::Class(id),
                index: (offset + i) as u32,
            }));
        }
        let declaration_type_arguments = if vector.is_empty() {
            None
        } else {
            Some(self.types.intern_vector(vector))
        };
        let declaration_type = self.types.intern(AbstractType::Interface {
            class: id,
            arguments: declaration_type_arguments,
        });
        let class = self.class_mut(id);
        class.declaration_type_arguments = declaration_type_arguments;
        class.declaration_type = declaration_type;
    }

    /// Record that `id` implements `interface`
    pub fn add_interface(&mut self, id: ClassId, interface: ClassId) {
        self.class_mut(id).interfaces.push(interface);
        self.class_mut(interface).is_implemented = true;
    }

    /// Mark a class abstract
    pub fn set_abstract(&mut self, id: ClassId) {
        self.class_mut(id).is_abstract = true;
    }

    /// Set the bound of a class type parameter
    pub fn set_type_parameter_bound(&mut self, id: ClassId, index: usize, bound: TypeId) {
        self.class_mut(id).type_parameters[index].bound = bound;
    }

    /// Type of the i-th own type parameter of a class
    pub fn type_parameter(&mut self, id: ClassId, index: usize) -> TypeId {
        let offset = self.class(id).own_type_arguments_offset();
        self.types.intern(AbstractType::Parameter {
            owner: TypeParameterOwner::Class(id),
            index: (offset + index) as u32,
        })
    }

    /// Type of the i-th type parameter of a function
    pub fn function_type_parameter(&mut self, id: FunctionId, index: usize) -> TypeId {
        self.types.intern(AbstractType::Parameter {
            owner: TypeParameterOwner::Function(id),
            index: index as u32,
        })
    }

    /// `C<own_arguments...>` with the flattened vector computed from the
    /// declaration. Missing arguments become `dynamic`.
    pub fn interface_type(&mut self, id: ClassId, own_arguments: &[TypeId]) -> TypeId {
        let class = self.class(id);
        let Some(decl) = class.declaration_type_arguments else {
            return self.types.intern(AbstractType::Interface {
                class: id,
                arguments: None,
            });
        };
        let offset = class.own_type_arguments_offset();
        let own = class.num_type_parameters();
        let mut instantiator = vec![self.types.dynamic(); offset];
        for i in 0..own {
            instantiator.push(
                own_arguments
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| self.types.dynamic()),
            );
        }
        let instantiator = self.types.intern_vector(instantiator);
        let arguments = self.types.instantiate_vector(decl, Some(instantiator), None);
        self.types.intern(AbstractType::Interface {
            class: id,
            arguments: Some(arguments),
        })
    }

    /// Template for a new function; finish it and pass it to [`ObjectStore::add_function`]
    pub fn new_function(&self, name: &str, owner: ClassId, kind: FunctionKind) -> Function {
        Function::new(
            FunctionId(self.functions.len() as u32),
            name,
            owner,
            kind,
            self.types.dynamic(),
        )
    }

    /// Register a function built from [`ObjectStore::new_function`]; its type
    /// parameter types are interned
    pub fn add_function(&mut self, mut function: Function) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        function.id = id;
        let owner = function.owner;
        for index in 0..function.type_parameters.len() {
            self.types.intern(AbstractType::Parameter {
                owner: TypeParameterOwner::Function(id),
                index: index as u32,
            });
        }
        self.functions.push(function);
        self.class_mut(owner).functions.push(id);
        id
    }

    /// Register a field; instance fields get the next free offset
    pub fn add_field(&mut self, name: &str, owner: ClassId, ty: TypeId, is_static: bool) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        let offset = if is_static {
            0
        } else {
            let class = self.class_mut(owner);
            let offset = class.next_field_offset;
            class.next_field_offset += WORD_SIZE;
            offset
        };
        self.fields.push(Field {
            id,
            name: name.to_string(),
            owner,
            ty,
            is_static,
            is_final: false,
            is_const: false,
            static_value: None,
            has_initializer: false,
            needs_guard: false,
            is_covariant: false,
            is_generic_covariant_impl: false,
            offset,
        });
        self.class_mut(owner).fields.push(id);
        id
    }

    // ===== Lookup =====

    /// Function declared directly in `class` with `name`
    pub fn lookup_function(&self, class: ClassId, name: &str) -> Option<FunctionId> {
        self.class(class)
            .functions
            .iter()
            .copied()
            .find(|&f| self.function(f).name == name)
    }

    /// Instance function visible on `class` with `name`, searching superclasses
    pub fn resolve_dynamic_function(&self, class: ClassId, name: &str) -> Option<FunctionId> {
        let mut current = Some(class);
        while let Some(c) = current {
            if let Some(f) = self.lookup_function(c, name) {
                if !self.function(f).is_static && !self.function(f).is_abstract {
                    return Some(f);
                }
            }
            current = self.class(c).super_class;
        }
        None
    }

    /// Superclass chain starting at `class` itself
    pub fn superclass_chain(&self, class: ClassId) -> Vec<ClassId> {
        let mut chain = Vec::new();
        let mut current = Some(class);
        while let Some(c) = current {
            chain.push(c);
            current = self.class(c).super_class;
        }
        chain
    }

    /// `sub` is `sup` or extends it transitively
    pub fn is_subclass_of(&self, sub: ClassId, sup: ClassId) -> bool {
        self.superclass_chain(sub).contains(&sup)
    }

    /// `sub` extends or implements `sup` transitively
    pub fn is_class_subtype_of(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut seen = FxHashSet::default();
        let mut worklist = vec![sub];
        while let Some(c) = worklist.pop() {
            if c == sup {
                return true;
            }
            if !seen.insert(c) {
                continue;
            }
            let class = self.class(c);
            worklist.extend(class.super_class);
            worklist.extend(class.interfaces.iter().copied());
        }
        false
    }

    // ===== Type queries =====

    /// `Object`, `dynamic` or `void`
    pub fn is_top_type(&self, ty: TypeId) -> bool {
        let ty = self.types.deref(ty);
        match self.types.get(ty) {
            AbstractType::Dynamic | AbstractType::Void => true,
            AbstractType::Interface { class, .. } => *class == self.core.object,
            _ => false,
        }
    }

    /// `Object` or `dynamic` (the values that never need a type-argument check)
    pub fn is_object_or_dynamic(&self, ty: TypeId) -> bool {
        let ty = self.types.deref(ty);
        ty == self.core.dynamic_type || ty == self.core.object_type
    }

    /// The `Function` interface type
    pub fn is_dart_function_type(&self, ty: TypeId) -> bool {
        self.types.type_class(ty) == Some(self.core.function)
    }

    /// Declared bound of a type parameter type
    pub fn type_parameter_bound(&self, ty: TypeId) -> Option<TypeId> {
        match self.types.get(ty) {
            AbstractType::Parameter {
                owner: TypeParameterOwner::Class(c),
                index,
            } => {
                let class = self.class(*c);
                let own = (*index as usize).checked_sub(class.own_type_arguments_offset())?;
                class.type_parameters.get(own).map(|p| p.bound)
            }
            AbstractType::Parameter {
                owner: TypeParameterOwner::Function(f),
                index,
            } => self
                .function(*f)
                .type_parameters
                .get(*index as usize)
                .map(|p| p.bound),
            _ => None,
        }
    }

    /// Exact subtype query between two canonical types
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        let sub = self.types.deref(sub);
        let sup = self.types.deref(sup);
        if sub == sup || self.is_top_type(sup) {
            return true;
        }
        match (self.types.get(sub).clone(), self.types.get(sup).clone()) {
            (AbstractType::Dynamic, _) | (AbstractType::Void, _) => false,
            (AbstractType::Interface { class, .. }, _) if class == self.core.null => true,
            (AbstractType::Parameter { .. }, _) => match self.type_parameter_bound(sub) {
                Some(bound) if bound != sub => self.is_subtype(bound, sup),
                _ => false,
            },
            (AbstractType::Function { .. }, AbstractType::Interface { class, .. }) => {
                class == self.core.function
            }
            (
                AbstractType::Function {
                    parameters: sub_params,
                    result: sub_result,
                },
                AbstractType::Function {
                    parameters: sup_params,
                    result: sup_result,
                },
            ) => {
                sub_params.len() == sup_params.len()
                    && sub_params
                        .iter()
                        .zip(sup_params.iter())
                        .all(|(&a, &b)| self.is_subtype(b, a))
                    && self.is_subtype(sub_result, sup_result)
            }
            (
                AbstractType::Interface {
                    class: sub_class,
                    arguments: sub_args,
                },
                AbstractType::Interface {
                    class: sup_class,
                    arguments: sup_args,
                },
            ) => {
                if !self.is_class_subtype_of(sub_class, sup_class) {
                    return false;
                }
                let Some(sup_args) = sup_args else {
                    return true;
                };
                let sup_elements = self.types.vector(sup_args);
                if !self.is_subclass_of(sub_class, sup_class) {
                    // Arguments flowing through `implements` are not tracked.
                    return sup_elements.iter().all(|&t| self.is_top_type(t));
                }
                match sub_args {
                    None => sup_elements.iter().all(|&t| self.is_top_type(t)),
                    Some(sub_args) => {
                        let sub_elements = self.types.vector(sub_args);
                        sup_elements.iter().enumerate().all(|(i, &s)| {
                            sub_elements
                                .get(i)
                                .map_or(self.is_top_type(s), |&t| self.is_subtype(t, s))
                        })
                    }
                }
            }
            _ => false,
        }
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flattened_vector_for_generic_subclass() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let base = store.declare_class("Base", None, Some(object), &["T"]);
        let sub = store.declare_class("Sub", None, Some(base), &["U"]);
        let u = store.type_parameter(sub, 0);
        store.set_super_type_arguments(sub, &[u]);

        assert_eq!(store.class(sub).num_type_arguments, 2);
        assert_eq!(store.class(sub).own_type_arguments_offset(), 1);
        assert_eq!(
            store.class(sub).type_arguments_field_offset,
            store.class(base).type_arguments_field_offset
        );

        let int = store.core().int_type;
        let sub_int = store.interface_type(sub, &[int]);
        let args = store.types().type_arguments(sub_int).unwrap();
        assert_eq!(store.types().vector(args), &[int, int]);
    }

    #[test]
    fn test_generic_subtyping_is_covariant() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let boxed = store.declare_class("Box", None, Some(object), &["T"]);
        let int = store.core().int_type;
        let string = store.core().string_type;
        let object_type = store.core().object_type;
        let box_int = store.interface_type(boxed, &[int]);
        let box_string = store.interface_type(boxed, &[string]);
        let box_object = store.interface_type(boxed, &[object_type]);

        assert!(store.is_subtype(box_int, box_object));
        assert!(!store.is_subtype(box_int, box_string));
        assert!(!store.is_subtype(box_object, box_int));
    }

    #[test]
    fn test_resolve_dynamic_function_walks_supers() {
        let store = ObjectStore::new();
        let core = store.core();
        let found = store.resolve_dynamic_function(core.smi, "noSuchMethod");
        assert_eq!(found, Some(core.object_no_such_method));
    }
}
