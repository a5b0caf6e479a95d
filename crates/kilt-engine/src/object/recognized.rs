//! Compiler-recognized library methods

use super::function::NativeType;

/// Library methods whose bodies the builder emits directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognizedMethod {
    /// `Object.==`
    ObjectEquals,
    /// `String.length`
    StringBaseLength,
    /// `String.isEmpty`
    StringBaseIsEmpty,
    /// `_GrowableList.length`
    GrowableArrayLength,
    /// `_List.length`
    ObjectArrayLength,
    /// `_ImmutableList.length`
    ImmutableArrayLength,
    /// `_TypedList.length`
    TypedListLength,
    /// `_TypedListView.length`
    TypedListViewLength,
    /// `_TypedListView.offsetInBytes`
    TypedDataViewOffsetInBytes,
    /// `_TypedListView._typedData`
    TypedDataViewTypedData,
    /// `ClassID.getID`
    ClassIdGetId,
    /// `_GrowableList._capacity`
    GrowableArrayCapacity,
    /// `List` factory (fixed or growable depending on arguments)
    ListFactory,
    /// `_List` allocation
    ObjectArrayAllocate,
    /// `_InternalLinkedHashMap._index`
    LinkedHashMapGetIndex,
    /// `_InternalLinkedHashMap._index=`
    LinkedHashMapSetIndex,
    /// `_InternalLinkedHashMap._data`
    LinkedHashMapGetData,
    /// `_InternalLinkedHashMap._data=`
    LinkedHashMapSetData,
    /// `_InternalLinkedHashMap._hashMask`
    LinkedHashMapGetHashMask,
    /// `_InternalLinkedHashMap._hashMask=`
    LinkedHashMapSetHashMask,
    /// `_InternalLinkedHashMap._usedData`
    LinkedHashMapGetUsedData,
    /// `_InternalLinkedHashMap._usedData=`
    LinkedHashMapSetUsedData,
    /// `_InternalLinkedHashMap._deletedKeys`
    LinkedHashMapGetDeletedKeys,
    /// `_InternalLinkedHashMap._deletedKeys=`
    LinkedHashMapSetDeletedKeys,
    /// `_abi()` of the FFI library
    FfiAbi,
    /// Typed-data view factory constructor (view class is the owner)
    TypedDataViewFactory,
    /// `Pointer<T>` element load
    FfiLoad(NativeType),
    /// `Pointer<T>` element store
    FfiStore(NativeType),
    /// `Pointer.fromAddress`
    FfiFromAddress,
    /// `Pointer.address`
    FfiGetAddress,
}
