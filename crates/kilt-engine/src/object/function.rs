//! Functions, parameters and FFI signatures

use serde::{Deserialize, Serialize};

use super::class::TypeParameterDecl;
use super::{ArgumentsDescriptor, ClassId, ConstValue, FieldId, FunctionId, RecognizedMethod, TypeArgsId, TypeId};

/// What kind of body a function gets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Ordinary method or top-level function
    Regular,
    /// Closure from a function expression
    Closure,
    /// Tear-off closure of a method
    ImplicitClosure,
    /// Explicit getter
    Getter,
    /// Explicit setter
    Setter,
    /// Generative constructor
    Constructor,
    /// Implicit instance field getter
    ImplicitGetter,
    /// Implicit instance field setter
    ImplicitSetter,
    /// Implicit static field getter
    ImplicitStaticGetter,
    /// Static field initializer
    FieldInitializer,
    /// Getter returning a tear-off
    MethodExtractor,
    /// Dispatcher invoking `noSuchMethod`
    NoSuchMethodDispatcher,
    /// Dispatcher calling a field or getter value
    InvokeFieldDispatcher,
    /// Checked entry for dynamic calls
    DynamicInvocationForwarder,
    /// Managed-to-native trampoline or native-to-managed callback
    FfiTrampoline,
}

/// Foreign element/argument type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeType {
    /// i8
    Int8,
    /// i16
    Int16,
    /// i32
    Int32,
    /// i64
    Int64,
    /// u8
    Uint8,
    /// u16
    Uint16,
    /// u32
    Uint32,
    /// u64
    Uint64,
    /// Pointer-width signed integer
    IntPtr,
    /// f32
    Float,
    /// f64
    Double,
    /// `Pointer<T>`
    Pointer,
    /// void
    Void,
}

impl NativeType {
    /// Size of one element in bytes
    pub fn size_in_bytes(self) -> i64 {
        match self {
            NativeType::Int8 | NativeType::Uint8 => 1,
            NativeType::Int16 | NativeType::Uint16 => 2,
            NativeType::Int32 | NativeType::Uint32 | NativeType::Float => 4,
            NativeType::Int64
            | NativeType::Uint64
            | NativeType::IntPtr
            | NativeType::Double
            | NativeType::Pointer => 8,
            NativeType::Void => 0,
        }
    }

    /// Whether the type is a floating point type
    pub fn is_float(self) -> bool {
        matches!(self, NativeType::Float | NativeType::Double)
    }
}

/// Signature of a foreign function
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FfiSignature {
    /// Argument types
    pub arguments: Vec<NativeType>,
    /// Result type
    pub result: NativeType,
    /// Reified type arguments of the `Pointer` allocated for a pointer result
    pub pointer_result_type_arguments: Option<TypeArgsId>,
    /// Same for each pointer argument of a callback, indexed like `arguments`
    #[serde(default)]
    pub pointer_argument_type_arguments: Vec<Option<TypeArgsId>>,
    /// Whether this is a native-to-managed callback
    pub is_callback: bool,
}

impl FfiSignature {
    /// Type arguments of the `Pointer` wrapping argument `index` (null when absent)
    pub fn pointer_argument_type_arguments_at(&self, index: usize) -> Option<TypeArgsId> {
        self.pointer_argument_type_arguments.get(index).copied().flatten()
    }
}

/// Declared parameter (the implicit receiver/closure parameter is not listed)
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Name
    pub name: String,
    /// Declared type
    pub ty: TypeId,
    /// Explicitly `covariant`
    pub is_covariant: bool,
    /// Covariant because it mentions a class type parameter
    pub is_generic_covariant_impl: bool,
}

impl Parameter {
    /// Parameter with no covariance flags
    pub fn new(name: &str, ty: TypeId) -> Self {
        Parameter {
            name: name.to_string(),
            ty,
            is_covariant: false,
            is_generic_covariant_impl: false,
        }
    }
}

/// A function, method, accessor or synthetic body
#[derive(Debug, Clone)]
pub struct Function {
    /// Handle
    pub id: FunctionId,
    /// Name
    pub name: String,
    /// Owning class (top-level functions belong to the library class)
    pub owner: ClassId,
    /// Body kind
    pub kind: FunctionKind,
    /// Static (no receiver)
    pub is_static: bool,
    /// Abstract (no body)
    pub is_abstract: bool,
    /// Factory constructor
    pub is_factory: bool,
    /// External native body, with the native symbol name
    pub native_name: Option<String>,
    /// Synthesised forwarder to `noSuchMethod`
    pub is_no_such_method_forwarder: bool,
    /// Parameters (required positional, then optional positional or named)
    pub parameters: Vec<Parameter>,
    /// Required positional parameter count
    pub num_fixed_parameters: usize,
    /// Optional positional parameter count
    pub num_optional_positional: usize,
    /// Optional named parameter count
    pub num_optional_named: usize,
    /// Own type parameters
    pub type_parameters: Vec<TypeParameterDecl>,
    /// Declared result type
    pub result_type: TypeId,
    /// Recognized method kind
    pub recognized: Option<RecognizedMethod>,
    /// Enclosing function (closures)
    pub parent: Option<FunctionId>,
    /// Target of a tear-off, extractor, forwarder or callback
    pub target: Option<FunctionId>,
    /// Accessed field (accessors and initializers)
    pub field: Option<FieldId>,
    /// Foreign signature (FFI trampolines and callbacks)
    pub ffi: Option<FfiSignature>,
    /// Value returned to native code when a callback throws
    pub ffi_exceptional_return: Option<ConstValue>,
    /// Call shape a no-such-method dispatcher was created for
    pub saved_args_desc: Option<ArgumentsDescriptor>,
}

impl Function {
    /// New regular function with no parameters
    pub fn new(id: FunctionId, name: &str, owner: ClassId, kind: FunctionKind, result: TypeId) -> Self {
        Function {
            id,
            name: name.to_string(),
            owner,
            kind,
            is_static: false,
            is_abstract: false,
            is_factory: false,
            native_name: None,
            is_no_such_method_forwarder: false,
            parameters: Vec::new(),
            num_fixed_parameters: 0,
            num_optional_positional: 0,
            num_optional_named: 0,
            type_parameters: Vec::new(),
            result_type: result,
            recognized: None,
            parent: None,
            target: None,
            field: None,
            ffi: None,
            ffi_exceptional_return: None,
            saved_args_desc: None,
        }
    }

    /// Whether the body receives a receiver or closure as parameter 0
    pub fn has_implicit_parameter(&self) -> bool {
        !self.is_static
            || self.is_closure_function()
            || self.is_factory
    }

    /// Number of implicit leading parameters
    pub fn num_implicit_parameters(&self) -> usize {
        usize::from(self.has_implicit_parameter())
    }

    /// Total parameter count, implicit ones included
    pub fn num_parameters(&self) -> usize {
        self.num_implicit_parameters() + self.parameters.len()
    }

    /// Fixed parameter count, implicit ones included
    pub fn num_fixed_with_implicit(&self) -> usize {
        self.num_implicit_parameters() + self.num_fixed_parameters
    }

    /// Whether optional parameters are named
    pub fn has_optional_named_parameters(&self) -> bool {
        self.num_optional_named > 0
    }

    /// Whether there are optional parameters of any kind
    pub fn has_optional_parameters(&self) -> bool {
        self.num_optional_positional > 0 || self.num_optional_named > 0
    }

    /// Whether the function is a closure body
    pub fn is_closure_function(&self) -> bool {
        matches!(self.kind, FunctionKind::Closure | FunctionKind::ImplicitClosure)
    }

    /// Whether the function declares type parameters
    pub fn is_generic(&self) -> bool {
        !self.type_parameters.is_empty()
    }

    /// Name of the i-th declared (non implicit) parameter
    pub fn parameter_name(&self, index: usize) -> &str {
        &self.parameters[index].name
    }

    /// Whether a call with `type_args_len`, `positional` and `names` fits
    pub fn are_valid_arguments(&self, type_args_len: usize, positional: usize, names: &[String]) -> bool {
        if type_args_len > 0 && type_args_len != self.type_parameters.len() {
            return false;
        }
        let explicit_positional = positional.saturating_sub(self.num_implicit_parameters());
        if explicit_positional < self.num_fixed_parameters
            || explicit_positional > self.num_fixed_parameters + self.num_optional_positional
        {
            return false;
        }
        let named_start = self.num_fixed_parameters + self.num_optional_positional;
        names.iter().all(|name| {
            self.parameters[named_start..]
                .iter()
                .any(|p| &p.name == name)
        })
    }
}
