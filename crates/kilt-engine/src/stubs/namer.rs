//! Assembler-safe names for type testing stubs

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::object::{AbstractType, ObjectStore, TypeId, TypeParameterOwner};

/// Produces `TypeTestingStub_<library>_<class>[__<arg>...]__<address>`
#[derive(Debug, Default)]
pub struct TypeTestingStubNamer {
    nolib_counter: AtomicUsize,
}

impl TypeTestingStubNamer {
    /// New namer
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the stub testing `ty`
    pub fn stub_name_for_type(&self, store: &ObjectStore, ty: TypeId) -> String {
        let address = ty.0 & 0x7fff_ffff;
        format!("TypeTestingStub_{}__{}", self.stringify_type(store, ty), address)
    }

    /// Stringified type without the prefix and address
    pub fn stringify_type(&self, store: &ObjectStore, ty: TypeId) -> String {
        let types = store.types();
        match types.get(ty) {
            AbstractType::Interface { class, arguments } => {
                let decl = store.class(*class);
                let library = match decl.library {
                    Some(lib) => store.library(lib).url.clone(),
                    None => format!("nolib{}", self.nolib_counter.fetch_add(1, Ordering::Relaxed)),
                };
                let mut name = assembler_safe_name(&format!("{}_{}", library, decl.name));
                let own = decl.num_type_parameters();
                if let (Some(v), true) = (arguments, own > 0) {
                    let elements = types.vector(*v);
                    let start = elements.len().saturating_sub(own);
                    for &arg in &elements[start..] {
                        name.push_str("__");
                        name.push_str(&self.stringify_type(store, arg));
                    }
                }
                name
            }
            AbstractType::Parameter { .. } => assembler_safe_name(&parameter_name(store, ty)),
            AbstractType::Ref(target) => format!("TypeRef_{}", self.stringify_type(store, *target)),
            _ => assembler_safe_name(&type_to_string(store, ty)),
        }
    }
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`
pub fn assembler_safe_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn parameter_name(store: &ObjectStore, ty: TypeId) -> String {
    let AbstractType::Parameter { owner, index } = store.types().get(ty) else {
        return String::new();
    };
    let index = *index as usize;
    let declared = match owner {
        TypeParameterOwner::Class(c) => {
            let class = store.class(*c);
            index
                .checked_sub(class.own_type_arguments_offset())
                .and_then(|i| class.type_parameters.get(i))
        }
        TypeParameterOwner::Function(f) => store.function(*f).type_parameters.get(index),
    };
    declared.map_or_else(|| format!("T{}", index), |p| p.name.clone())
}

fn type_to_string(store: &ObjectStore, ty: TypeId) -> String {
    match store.types().get(ty) {
        AbstractType::Dynamic => "dynamic".to_string(),
        AbstractType::Void => "void".to_string(),
        AbstractType::Interface { class, .. } => store.class(*class).name.clone(),
        AbstractType::Parameter { .. } => parameter_name(store, ty),
        AbstractType::Function { parameters, result } => {
            let params: Vec<String> = parameters.iter().map(|&p| type_to_string(store, p)).collect();
            format!("({}) => {}", params.join(", "), type_to_string(store, *result))
        }
        AbstractType::Ref(target) => type_to_string(store, *target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_name() {
        assert_eq!(assembler_safe_name("dart:core_List<int>"), "dart_core_List_int_");
    }

    #[test]
    fn test_core_type_name() {
        let store = ObjectStore::new();
        let int = store.core().int_type;
        let name = TypeTestingStubNamer::new().stub_name_for_type(&store, int);
        assert_eq!(name, format!("TypeTestingStub_dart_core_int__{}", int.0));
    }

    #[test]
    fn test_generic_arguments_appended() {
        let mut store = ObjectStore::new();
        let lib = store.add_library("package:app/box.dart", false);
        let object = store.core().object;
        let boxed = store.declare_class("Box", Some(lib), Some(object), &["T"]);
        let string = store.core().string_type;
        let box_string = store.interface_type(boxed, &[string]);
        let t = store.type_parameter(boxed, 0);
        let box_t = store.interface_type(boxed, &[t]);
        let namer = TypeTestingStubNamer::new();
        assert_eq!(
            namer.stringify_type(&store, box_string),
            "package_app_box_dart_Box__dart_core_String"
        );
        assert_eq!(namer.stringify_type(&store, box_t), "package_app_box_dart_Box__T");
    }

    #[test]
    fn test_classes_without_library_are_numbered() {
        let mut store = ObjectStore::new();
        let object = store.core().object;
        let a = store.declare_class("A", None, Some(object), &[]);
        let a_type = store.class(a).declaration_type;
        let namer = TypeTestingStubNamer::new();
        assert_eq!(namer.stringify_type(&store, a_type), "nolib0_A");
        assert_eq!(namer.stringify_type(&store, a_type), "nolib1_A");
    }

    #[test]
    fn test_dynamic_and_refs() {
        let mut store = ObjectStore::new();
        let int = store.core().int_type;
        let r = store.types_mut().intern(AbstractType::Ref(int));
        let namer = TypeTestingStubNamer::new();
        assert_eq!(namer.stringify_type(&store, store.core().dynamic_type), "dynamic");
        assert_eq!(namer.stringify_type(&store, r), "TypeRef_dart_core_int");
    }
}
