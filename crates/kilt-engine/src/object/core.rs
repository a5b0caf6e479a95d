//! Core library bootstrap
//!
//! Installs the classes, functions and types every program relies on and
//! records their handles so the builder can refer to them directly.

use super::function::{FunctionKind, NativeType, Parameter};
use super::store::ObjectStore;
use super::types::{TypeArgsId, TypeId};
use super::{ClassId, FieldId, FunctionId, LibraryId, RecognizedMethod, TypeParameterDecl};

/// Handles of the well-known core entities
#[derive(Debug, Clone, Default)]
pub struct CoreLibrary {
    /// `dart:core`
    pub library: LibraryId,
    /// `dart:ffi`
    pub ffi_library: LibraryId,
    /// `dart:typed_data`
    pub typed_data_library: LibraryId,

    // ===== Classes =====
    /// `Object`
    pub object: ClassId,
    /// `Null`
    pub null: ClassId,
    /// `bool`
    pub bool_: ClassId,
    /// `int`
    pub int: ClassId,
    /// `_Smi` (small integers, untagged in the pointer)
    pub smi: ClassId,
    /// `_Mint`
    pub mint: ClassId,
    /// `double`
    pub double: ClassId,
    /// `String`
    pub string: ClassId,
    /// `_OneByteString`
    pub one_byte_string: ClassId,
    /// `Function`
    pub function: ClassId,
    /// `_Closure`
    pub closure: ClassId,
    /// `_Context`
    pub context: ClassId,
    /// `List`
    pub list: ClassId,
    /// `_List` (fixed length array)
    pub array: ClassId,
    /// `_ImmutableList`
    pub immutable_array: ClassId,
    /// `_GrowableList`
    pub growable_array: ClassId,
    /// `_TypedList`
    pub typed_list: ClassId,
    /// `_Uint8List`
    pub uint8_list: ClassId,
    /// `_TypedListView`
    pub typed_list_view: ClassId,
    /// `_Uint8ArrayView`
    pub uint8_array_view: ClassId,
    /// `_InternalLinkedHashMap`
    pub linked_hash_map: ClassId,
    /// `ClassID`
    pub class_id: ClassId,
    /// `Pointer`
    pub pointer: ClassId,
    /// `_InvocationMirror`
    pub invocation_mirror: ClassId,
    /// `NoSuchMethodError`
    pub no_such_method_error: ClassId,
    /// `_TypeError`
    pub type_error: ClassId,
    /// `_AssertionError`
    pub assertion_error: ClassId,

    // ===== Types =====
    /// `dynamic`
    pub dynamic_type: TypeId,
    /// `void`
    pub void_type: TypeId,
    /// `Object`
    pub object_type: TypeId,
    /// `Null`
    pub null_type: TypeId,
    /// `bool`
    pub bool_type: TypeId,
    /// `int`
    pub int_type: TypeId,
    /// `double`
    pub double_type: TypeId,
    /// `String`
    pub string_type: TypeId,
    /// `Function`
    pub function_type: TypeId,

    // ===== Functions =====
    /// `Object.noSuchMethod`
    pub object_no_such_method: FunctionId,
    /// `Object.==`
    pub object_equals: FunctionId,
    /// `_InvocationMirror._allocateInvocationMirror`
    pub allocate_invocation_mirror: FunctionId,
    /// `_InvocationMirror._allocateInvocationMirrorForClosure`
    pub allocate_invocation_mirror_for_closure: FunctionId,
    /// `NoSuchMethodError._throwNewInvocation`
    pub throw_new_invocation: FunctionId,
    /// `NoSuchMethodError._throwNew`
    pub no_such_method_throw_new: FunctionId,
    /// `List` factory
    pub list_factory: FunctionId,
    /// `_List` factory
    pub array_factory: FunctionId,
    /// `_GrowableList` factory
    pub growable_list_factory: FunctionId,
    /// `_TypeError._create`
    pub type_error_create: FunctionId,
    /// `_AssertionError._evaluateAssertion`
    pub evaluate_assertion: FunctionId,
    /// `_AssertionError._throwNew`
    pub assertion_throw_new: FunctionId,
    /// `_prependTypeArguments`
    pub prepend_type_arguments: FunctionId,
    /// `Pointer.fromAddress`
    pub pointer_from_address: FunctionId,
    /// `Pointer.address`
    pub pointer_get_address: FunctionId,

    // ===== Fields =====
    /// `Pointer._address`
    pub pointer_address: FieldId,

    /// The empty type-argument vector
    pub empty_type_arguments: TypeArgsId,
}

impl CoreLibrary {
    /// Populate `store` with the core library
    pub fn install(store: &mut ObjectStore) -> CoreLibrary {
        let mut core = CoreLibrary {
            library: store.add_library("dart:core", true),
            ffi_library: store.add_library("dart:ffi", true),
            typed_data_library: store.add_library("dart:typed_data", true),
            ..CoreLibrary::default()
        };
        let lib = Some(core.library);
        let ffi = Some(core.ffi_library);
        let typed = Some(core.typed_data_library);

        core.dynamic_type = store.types().dynamic();
        core.void_type = store.types().void();
        core.empty_type_arguments = store.types_mut().intern_vector(Vec::new());

        core.object = store.declare_class("Object", lib, None, &[]);
        core.object_type = store.interface_type(core.object, &[]);
        let object = Some(core.object);

        core.null = store.declare_class("Null", lib, object, &[]);
        core.bool_ = store.declare_class("bool", lib, object, &[]);
        core.int = store.declare_class("int", lib, object, &[]);
        store.set_abstract(core.int);
        core.smi = store.declare_class("_Smi", lib, Some(core.int), &[]);
        core.mint = store.declare_class("_Mint", lib, Some(core.int), &[]);
        core.double = store.declare_class("double", lib, object, &[]);
        core.string = store.declare_class("String", lib, object, &[]);
        store.set_abstract(core.string);
        core.one_byte_string = store.declare_class("_OneByteString", lib, Some(core.string), &[]);
        core.function = store.declare_class("Function", lib, object, &[]);
        store.set_abstract(core.function);
        core.closure = store.declare_class("_Closure", lib, Some(core.function), &[]);
        core.context = store.declare_class("_Context", lib, object, &[]);

        core.null_type = store.interface_type(core.null, &[]);
        core.bool_type = store.interface_type(core.bool_, &[]);
        core.int_type = store.interface_type(core.int, &[]);
        core.double_type = store.interface_type(core.double, &[]);
        core.string_type = store.interface_type(core.string, &[]);
        core.function_type = store.interface_type(core.function, &[]);

        core.list = store.declare_class("List", lib, object, &["E"]);
        store.set_abstract(core.list);
        core.array = store.declare_class("_List", lib, object, &["E"]);
        core.immutable_array = store.declare_class("_ImmutableList", lib, object, &["E"]);
        core.growable_array = store.declare_class("_GrowableList", lib, object, &["E"]);
        for array in [core.array, core.immutable_array, core.growable_array] {
            store.add_interface(array, core.list);
        }

        core.typed_list = store.declare_class("_TypedList", typed, object, &[]);
        store.set_abstract(core.typed_list);
        core.uint8_list = store.declare_class("_Uint8List", typed, Some(core.typed_list), &[]);
        core.typed_list_view = store.declare_class("_TypedListView", typed, object, &[]);
        store.set_abstract(core.typed_list_view);
        core.uint8_array_view =
            store.declare_class("_Uint8ArrayView", typed, Some(core.typed_list_view), &[]);

        core.linked_hash_map =
            store.declare_class("_InternalLinkedHashMap", lib, object, &["K", "V"]);
        core.class_id = store.declare_class("ClassID", lib, object, &[]);
        core.pointer = store.declare_class("Pointer", ffi, object, &["T"]);
        core.invocation_mirror = store.declare_class("_InvocationMirror", lib, object, &[]);
        core.no_such_method_error = store.declare_class("NoSuchMethodError", lib, object, &[]);
        core.type_error = store.declare_class("_TypeError", lib, object, &[]);
        core.assertion_error = store.declare_class("_AssertionError", lib, object, &[]);

        let int_type = core.int_type;
        let dynamic = core.dynamic_type;
        core.pointer_address = store.add_field("_address", core.pointer, int_type, false);

        core.object_no_such_method = method(
            store,
            core.object,
            "noSuchMethod",
            &[("invocation", dynamic)],
            dynamic,
            None,
        );
        core.object_equals = method(
            store,
            core.object,
            "==",
            &[("other", dynamic)],
            core.bool_type,
            Some(RecognizedMethod::ObjectEquals),
        );

        let string = core.string_type;
        let bool_type = core.bool_type;
        getter(store, core.string, "length", int_type, RecognizedMethod::StringBaseLength);
        getter(store, core.string, "isEmpty", bool_type, RecognizedMethod::StringBaseIsEmpty);
        getter(store, core.array, "length", int_type, RecognizedMethod::ObjectArrayLength);
        getter(store, core.immutable_array, "length", int_type, RecognizedMethod::ImmutableArrayLength);
        getter(store, core.growable_array, "length", int_type, RecognizedMethod::GrowableArrayLength);
        getter(store, core.growable_array, "_capacity", int_type, RecognizedMethod::GrowableArrayCapacity);
        getter(store, core.typed_list, "length", int_type, RecognizedMethod::TypedListLength);
        getter(store, core.typed_list_view, "length", int_type, RecognizedMethod::TypedListViewLength);
        getter(store, core.typed_list_view, "offsetInBytes", int_type, RecognizedMethod::TypedDataViewOffsetInBytes);
        getter(store, core.typed_list_view, "_typedData", dynamic, RecognizedMethod::TypedDataViewTypedData);
        for (name, get, set) in [
            ("_index", RecognizedMethod::LinkedHashMapGetIndex, RecognizedMethod::LinkedHashMapSetIndex),
            ("_data", RecognizedMethod::LinkedHashMapGetData, RecognizedMethod::LinkedHashMapSetData),
            ("_hashMask", RecognizedMethod::LinkedHashMapGetHashMask, RecognizedMethod::LinkedHashMapSetHashMask),
            ("_usedData", RecognizedMethod::LinkedHashMapGetUsedData, RecognizedMethod::LinkedHashMapSetUsedData),
            ("_deletedKeys", RecognizedMethod::LinkedHashMapGetDeletedKeys, RecognizedMethod::LinkedHashMapSetDeletedKeys),
        ] {
            getter(store, core.linked_hash_map, name, dynamic, get);
            let mut setter = store.new_function(&format!("{}=", name), core.linked_hash_map, FunctionKind::Setter);
            setter.parameters = vec![Parameter::new("value", dynamic)];
            setter.num_fixed_parameters = 1;
            setter.recognized = Some(set);
            store.add_function(setter);
        }

        let mut get_id = store.new_function("getID", core.class_id, FunctionKind::Regular);
        get_id.is_static = true;
        get_id.parameters = vec![Parameter::new("value", dynamic)];
        get_id.num_fixed_parameters = 1;
        get_id.result_type = int_type;
        get_id.recognized = Some(RecognizedMethod::ClassIdGetId);
        store.add_function(get_id);

        let mut list_factory = store.new_function("List", core.list, FunctionKind::Regular);
        list_factory.is_static = true;
        list_factory.is_factory = true;
        list_factory.parameters = vec![Parameter::new("length", int_type)];
        list_factory.num_optional_positional = 1;
        list_factory.recognized = Some(RecognizedMethod::ListFactory);
        core.list_factory = store.add_function(list_factory);

        core.array_factory = factory(store, core.array, "_List", RecognizedMethod::ObjectArrayAllocate, int_type);
        let mut growable = store.new_function("_GrowableList", core.growable_array, FunctionKind::Regular);
        growable.is_static = true;
        growable.is_factory = true;
        growable.parameters = vec![Parameter::new("length", int_type)];
        growable.num_fixed_parameters = 1;
        core.growable_list_factory = store.add_function(growable);

        let mut view = store.new_function("_Uint8ArrayView", core.uint8_array_view, FunctionKind::Regular);
        view.is_static = true;
        view.is_factory = true;
        view.parameters = vec![
            Parameter::new("buffer", dynamic),
            Parameter::new("offsetInBytes", int_type),
            Parameter::new("length", int_type),
        ];
        view.num_fixed_parameters = 3;
        view.recognized = Some(RecognizedMethod::TypedDataViewFactory);
        store.add_function(view);

        core.allocate_invocation_mirror = static_function(
            store,
            core.invocation_mirror,
            "_allocateInvocationMirror",
            &[
                ("memberName", string),
                ("argumentsDescriptor", dynamic),
                ("arguments", dynamic),
                ("isSuperInvocation", bool_type),
            ],
        );
        core.allocate_invocation_mirror_for_closure = static_function(
            store,
            core.invocation_mirror,
            "_allocateInvocationMirrorForClosure",
            &[
                ("memberName", string),
                ("argumentsDescriptor", dynamic),
                ("arguments", dynamic),
                ("isSuperInvocation", bool_type),
                ("type", int_type),
            ],
        );
        core.throw_new_invocation = static_function(
            store,
            core.no_such_method_error,
            "_throwNewInvocation",
            &[("receiver", dynamic), ("invocation", dynamic)],
        );
        core.no_such_method_throw_new = static_function(
            store,
            core.no_such_method_error,
            "_throwNew",
            &[
                ("receiver", dynamic),
                ("memberName", string),
                ("invocationType", int_type),
                ("typeArguments", dynamic),
                ("arguments", dynamic),
                ("argumentNames", dynamic),
            ],
        );
        let mut create = store.new_function("_TypeError._create", core.type_error, FunctionKind::Constructor);
        create.parameters = vec![
            Parameter::new("url", string),
            Parameter::new("line", int_type),
            Parameter::new("column", int_type),
            Parameter::new("message", string),
        ];
        create.num_fixed_parameters = 4;
        core.type_error_create = store.add_function(create);
        core.evaluate_assertion = static_function(
            store,
            core.assertion_error,
            "_evaluateAssertion",
            &[("condition", dynamic)],
        );
        core.assertion_throw_new = static_function(
            store,
            core.assertion_error,
            "_throwNew",
            &[("start", int_type), ("end", int_type), ("message", dynamic)],
        );
        core.prepend_type_arguments = static_function(
            store,
            core.object,
            "_prependTypeArguments",
            &[
                ("functionTypeArguments", dynamic),
                ("parentTypeArguments", dynamic),
                ("parentLength", int_type),
                ("totalLength", int_type),
            ],
        );

        let mut from_address = store.new_function("fromAddress", core.pointer, FunctionKind::Regular);
        from_address.is_static = true;
        from_address.type_parameters = vec![TypeParameterDecl::new("T", dynamic)];
        from_address.parameters = vec![Parameter::new("ptr", int_type)];
        from_address.num_fixed_parameters = 1;
        from_address.recognized = Some(RecognizedMethod::FfiFromAddress);
        core.pointer_from_address = store.add_function(from_address);
        core.pointer_get_address = getter(store, core.pointer, "address", int_type, RecognizedMethod::FfiGetAddress);

        let mut abi = store.new_function("_abi", core.pointer, FunctionKind::Regular);
        abi.is_static = true;
        abi.result_type = int_type;
        abi.recognized = Some(RecognizedMethod::FfiAbi);
        store.add_function(abi);

        core
    }

    /// Add the generic load function for one element type
    /// (`T _load<T>(Pointer<T> pointer, int index)`)
    pub fn add_ffi_load(&self, store: &mut ObjectStore, element: NativeType) -> FunctionId {
        let mut f = store.new_function(&format!("_load{:?}", element), self.pointer, FunctionKind::Regular);
        f.is_static = true;
        f.parameters = vec![
            Parameter::new("pointer", self.dynamic_type),
            Parameter::new("index", self.int_type),
        ];
        f.num_fixed_parameters = 2;
        f.type_parameters = ffi_type_parameters(self, element);
        f.recognized = Some(RecognizedMethod::FfiLoad(element));
        store.add_function(f)
    }

    /// Add the generic store function for one element type
    /// (`void _store<T>(Pointer<T> pointer, int index, T value)`)
    pub fn add_ffi_store(&self, store: &mut ObjectStore, element: NativeType) -> FunctionId {
        let mut f = store.new_function(&format!("_store{:?}", element), self.pointer, FunctionKind::Regular);
        f.is_static = true;
        f.parameters = vec![
            Parameter::new("pointer", self.dynamic_type),
            Parameter::new("index", self.int_type),
            Parameter::new("value", self.dynamic_type),
        ];
        f.num_fixed_parameters = 3;
        f.type_parameters = ffi_type_parameters(self, element);
        f.result_type = self.void_type;
        f.recognized = Some(RecognizedMethod::FfiStore(element));
        store.add_function(f)
    }
}

fn ffi_type_parameters(core: &CoreLibrary, element: NativeType) -> Vec<TypeParameterDecl> {
    if element == NativeType::Pointer {
        vec![TypeParameterDecl::new("T", core.dynamic_type)]
    } else {
        Vec::new()
    }
}

fn method(
    store: &mut ObjectStore,
    owner: ClassId,
    name: &str,
    params: &[(&str, TypeId)],
    result: TypeId,
    recognized: Option<RecognizedMethod>,
) -> FunctionId {
    let mut f = store.new_function(name, owner, FunctionKind::Regular);
    f.parameters = params.iter().map(|(n, t)| Parameter::new(n, *t)).collect();
    f.num_fixed_parameters = params.len();
    f.result_type = result;
    f.recognized = recognized;
    store.add_function(f)
}

fn static_function(
    store: &mut ObjectStore,
    owner: ClassId,
    name: &str,
    params: &[(&str, TypeId)],
) -> FunctionId {
    let mut f = store.new_function(name, owner, FunctionKind::Regular);
    f.is_static = true;
    f.parameters = params.iter().map(|(n, t)| Parameter::new(n, *t)).collect();
    f.num_fixed_parameters = params.len();
    store.add_function(f)
}

fn getter(
    store: &mut ObjectStore,
    owner: ClassId,
    name: &str,
    result: TypeId,
    recognized: RecognizedMethod,
) -> FunctionId {
    let mut f = store.new_function(name, owner, FunctionKind::Getter);
    f.result_type = result;
    f.recognized = Some(recognized);
    store.add_function(f)
}

fn factory(
    store: &mut ObjectStore,
    owner: ClassId,
    name: &str,
    recognized: RecognizedMethod,
    length_type: TypeId,
) -> FunctionId {
    let mut f = store.new_function(name, owner, FunctionKind::Regular);
    f.is_static = true;
    f.is_factory = true;
    f.parameters = vec![Parameter::new("length", length_type)];
    f.num_fixed_parameters = 1;
    f.recognized = Some(recognized);
    store.add_function(f)
}
