//! Object model consumed by the builder
//!
//! Classes, functions, fields and canonical types are opaque entities with
//! known attributes. They are created once (by a loader or a test fixture)
//! and read-only afterwards; all queries take `&ObjectStore`.

pub mod args;
pub mod class;
pub mod constant;
pub mod core;
pub mod function;
pub mod recognized;
pub mod store;
pub mod types;

use serde::{Deserialize, Serialize};

pub use args::ArgumentsDescriptor;
pub use class::{Class, Field, Library, TypeParameterDecl};
pub use constant::ConstValue;
pub use core::CoreLibrary;
pub use function::{FfiSignature, Function, FunctionKind, NativeType, Parameter};
pub use recognized::RecognizedMethod;
pub use store::ObjectStore;
pub use types::{AbstractType, Genericity, TypeArgsId, TypeId, TypeParameterOwner, TypeStore};

/// Class id (cid): dense integer identifying a runtime class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(pub u32);

impl std::fmt::Display for ClassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cid{}", self.0)
    }
}

/// Function handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Field handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub u32);

impl std::fmt::Display for FieldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "field{}", self.0)
    }
}

/// Library handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LibraryId(pub u32);
