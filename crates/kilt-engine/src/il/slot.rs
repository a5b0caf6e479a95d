//! Memory slots read and written by field instructions

use std::fmt;

use crate::object::{ClassId, FieldId};

/// A field of a runtime object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// `Context.parent`
    ContextParent,
    /// Captured variable `i` of a context
    ContextVariable(usize),
    /// `Closure.context`
    ClosureContext,
    /// `Closure.function`
    ClosureFunction,
    /// `Closure.instantiator_type_arguments`
    ClosureInstantiatorTypeArguments,
    /// `Closure.function_type_arguments`
    ClosureFunctionTypeArguments,
    /// `Closure.delayed_type_arguments`
    ClosureDelayedTypeArguments,
    /// Type-argument vector field of instances of `class`
    TypeArguments {
        /// Class whose layout defines the offset
        class: ClassId,
        /// Byte offset of the field
        offset: u32,
    },
    /// Element `i` of a type-argument vector
    TypeArgumentsIndex(usize),
    /// `Type.arguments`
    TypeArgumentsOfType,
    /// `Array.length`
    ArrayLength,
    /// `GrowableObjectArray.length`
    GrowableArrayLength,
    /// `GrowableObjectArray.data`
    GrowableArrayData,
    /// `String.length`
    StringLength,
    /// `TypedDataBase.length`
    TypedDataLength,
    /// `TypedDataView.data`
    TypedDataViewData,
    /// `TypedDataView.offset_in_bytes`
    TypedDataViewOffsetInBytes,
    /// `Pointer.c_memory_address`
    PointerAddress,
    /// `ArgumentsDescriptor.count`
    ArgumentsDescriptorCount,
    /// `ArgumentsDescriptor.positional_count`
    ArgumentsDescriptorPositionalCount,
    /// `ArgumentsDescriptor.type_args_len`
    ArgumentsDescriptorTypeArgsLen,
    /// `LinkedHashMap.index`
    LinkedHashMapIndex,
    /// `LinkedHashMap.data`
    LinkedHashMapData,
    /// `LinkedHashMap.hash_mask`
    LinkedHashMapHashMask,
    /// `LinkedHashMap.used_data`
    LinkedHashMapUsedData,
    /// `LinkedHashMap.deleted_keys`
    LinkedHashMapDeletedKeys,
    /// Declared instance field
    Field(FieldId),
}

impl Slot {
    /// Whether the slot holds a small integer so stores never need a barrier
    pub fn holds_smi(self) -> bool {
        matches!(
            self,
            Slot::ArrayLength
                | Slot::GrowableArrayLength
                | Slot::StringLength
                | Slot::TypedDataLength
                | Slot::TypedDataViewOffsetInBytes
                | Slot::ArgumentsDescriptorCount
                | Slot::ArgumentsDescriptorPositionalCount
                | Slot::ArgumentsDescriptorTypeArgsLen
                | Slot::LinkedHashMapHashMask
                | Slot::LinkedHashMapUsedData
                | Slot::LinkedHashMapDeletedKeys
        )
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::ContextParent => write!(f, "Context.parent"),
            Slot::ContextVariable(i) => write!(f, "Context.var{}", i),
            Slot::ClosureContext => write!(f, "Closure.context"),
            Slot::ClosureFunction => write!(f, "Closure.function"),
            Slot::ClosureInstantiatorTypeArguments => {
                write!(f, "Closure.instantiator_type_arguments")
            }
            Slot::ClosureFunctionTypeArguments => write!(f, "Closure.function_type_arguments"),
            Slot::ClosureDelayedTypeArguments => write!(f, "Closure.delayed_type_arguments"),
            Slot::TypeArguments { class, offset } => {
                write!(f, "{}.type_arguments@{}", class, offset)
            }
            Slot::TypeArgumentsIndex(i) => write!(f, "TypeArguments[{}]", i),
            Slot::TypeArgumentsOfType => write!(f, "Type.arguments"),
            Slot::ArrayLength => write!(f, "Array.length"),
            Slot::GrowableArrayLength => write!(f, "GrowableObjectArray.length"),
            Slot::GrowableArrayData => write!(f, "GrowableObjectArray.data"),
            Slot::StringLength => write!(f, "String.length"),
            Slot::TypedDataLength => write!(f, "TypedDataBase.length"),
            Slot::TypedDataViewData => write!(f, "TypedDataView.data"),
            Slot::TypedDataViewOffsetInBytes => write!(f, "TypedDataView.offset_in_bytes"),
            Slot::PointerAddress => write!(f, "Pointer.c_memory_address"),
            Slot::ArgumentsDescriptorCount => write!(f, "ArgumentsDescriptor.count"),
            Slot::ArgumentsDescriptorPositionalCount => {
                write!(f, "ArgumentsDescriptor.positional_count")
            }
            Slot::ArgumentsDescriptorTypeArgsLen => write!(f, "ArgumentsDescriptor.type_args_len"),
            Slot::LinkedHashMapIndex => write!(f, "LinkedHashMap.index"),
            Slot::LinkedHashMapData => write!(f, "LinkedHashMap.data"),
            Slot::LinkedHashMapHashMask => write!(f, "LinkedHashMap.hash_mask"),
            Slot::LinkedHashMapUsedData => write!(f, "LinkedHashMap.used_data"),
            Slot::LinkedHashMapDeletedKeys => write!(f, "LinkedHashMap.deleted_keys"),
            Slot::Field(id) => write!(f, "{}", id),
        }
    }
}
