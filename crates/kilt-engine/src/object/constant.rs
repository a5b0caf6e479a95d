//! Compile-time constant values

use std::fmt;
use std::sync::Arc;

use super::{ArgumentsDescriptor, ClassId, FieldId, FunctionId, TypeArgsId, TypeId};

/// A value the builder can materialise with a `Constant` instruction
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    /// `null` (also the null type-argument vector)
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Double
    Double(f64),
    /// String
    String(Arc<str>),
    /// Canonical type
    Type(TypeId),
    /// Canonical type-argument vector
    TypeArguments(TypeArgsId),
    /// Function object
    Function(FunctionId),
    /// Field object
    Field(FieldId),
    /// Class object
    Class(ClassId),
    /// Immutable array
    Array(Arc<[ConstValue]>),
    /// Arguments descriptor
    ArgumentsDescriptor(Arc<ArgumentsDescriptor>),
}

impl ConstValue {
    /// String constant
    pub fn string(s: &str) -> Self {
        ConstValue::String(Arc::from(s))
    }

    /// Array of string constants
    pub fn string_array(items: &[String]) -> Self {
        ConstValue::Array(items.iter().map(|s| ConstValue::string(s)).collect())
    }

    /// Type-argument vector constant; the null vector becomes `Null`
    pub fn type_arguments(v: Option<TypeArgsId>) -> Self {
        v.map_or(ConstValue::Null, ConstValue::TypeArguments)
    }

    /// Whether the value is `null`
    pub fn is_null(&self) -> bool {
        matches!(self, ConstValue::Null)
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Null => write!(f, "null"),
            ConstValue::Bool(b) => write!(f, "{}", b),
            ConstValue::Int(i) => write!(f, "{}", i),
            ConstValue::Double(d) => write!(f, "{:?}", d),
            ConstValue::String(s) => write!(f, "\"{}\"", s),
            ConstValue::Type(t) => write!(f, "type {}", t),
            ConstValue::TypeArguments(t) => write!(f, "typeargs {}", t),
            ConstValue::Function(func) => write!(f, "function {}", func),
            ConstValue::Field(field) => write!(f, "{}", field),
            ConstValue::Class(c) => write!(f, "class {}", c),
            ConstValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            ConstValue::ArgumentsDescriptor(desc) => write!(
                f,
                "argdesc(targs={}, count={}, named={})",
                desc.type_args_len(),
                desc.count(),
                desc.named_count()
            ),
        }
    }
}
