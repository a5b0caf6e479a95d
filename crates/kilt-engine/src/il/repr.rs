//! Value representations
//!
//! Managed values are tagged (boxed) objects. Arithmetic on foreign memory
//! works on unboxed machine integers and floats; `Box`/`Unbox` convert
//! between the two. The functions here define the bit-level meaning of those
//! conversions.

use std::fmt;

use crate::object::NativeType;

/// How a value is held by an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    /// Managed object reference
    Tagged,
    /// Raw machine address that must not be seen by the garbage collector
    Untagged,
    /// 32-bit signed integer
    UnboxedInt32,
    /// 32-bit unsigned integer
    UnboxedUint32,
    /// 64-bit integer
    UnboxedInt64,
    /// Pointer-width integer used for foreign addresses
    UnboxedIntPtr,
    /// Single precision float
    UnboxedFloat,
    /// Double precision float
    UnboxedDouble,
}

impl Representation {
    /// Width of the unboxed value in bits (`None` for tagged values)
    pub fn bit_width(self) -> Option<u32> {
        match self {
            Representation::Tagged => None,
            Representation::UnboxedInt32
            | Representation::UnboxedUint32
            | Representation::UnboxedFloat => Some(32),
            Representation::Untagged
            | Representation::UnboxedInt64
            | Representation::UnboxedIntPtr
            | Representation::UnboxedDouble => Some(64),
        }
    }

    /// Whether the representation holds a floating point value
    pub fn is_float(self) -> bool {
        matches!(self, Representation::UnboxedFloat | Representation::UnboxedDouble)
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Representation::Tagged => "tagged",
            Representation::Untagged => "untagged",
            Representation::UnboxedInt32 => "int32",
            Representation::UnboxedUint32 => "uint32",
            Representation::UnboxedInt64 => "int64",
            Representation::UnboxedIntPtr => "intptr",
            Representation::UnboxedFloat => "float",
            Representation::UnboxedDouble => "double",
        };
        f.write_str(name)
    }
}

/// Sub-word integer widths that are widened inside a 32-bit register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmallRepresentation {
    /// i8
    Int8,
    /// i16
    Int16,
    /// u8
    Uint8,
    /// u16
    Uint16,
}

impl fmt::Display for SmallRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SmallRepresentation::Int8 => "int8",
            SmallRepresentation::Int16 => "int16",
            SmallRepresentation::Uint8 => "uint8",
            SmallRepresentation::Uint16 => "uint16",
        };
        f.write_str(name)
    }
}

/// Representation a foreign value of `ty` is held in
pub fn native_representation(ty: NativeType) -> Representation {
    match ty {
        NativeType::Int8 | NativeType::Int16 | NativeType::Int32 => Representation::UnboxedInt32,
        NativeType::Uint8 | NativeType::Uint16 | NativeType::Uint32 => {
            Representation::UnboxedUint32
        }
        NativeType::Int64 | NativeType::Uint64 => Representation::UnboxedInt64,
        NativeType::IntPtr | NativeType::Pointer | NativeType::Void => {
            Representation::UnboxedIntPtr
        }
        NativeType::Float => Representation::UnboxedFloat,
        NativeType::Double => Representation::UnboxedDouble,
    }
}

/// Sub-word width of `ty`, if it needs widening
pub fn small_representation(ty: NativeType) -> Option<SmallRepresentation> {
    match ty {
        NativeType::Int8 => Some(SmallRepresentation::Int8),
        NativeType::Int16 => Some(SmallRepresentation::Int16),
        NativeType::Uint8 => Some(SmallRepresentation::Uint8),
        NativeType::Uint16 => Some(SmallRepresentation::Uint16),
        _ => None,
    }
}

/// A boxed managed number
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoxedValue {
    /// Integer object
    Int(i64),
    /// Double object
    Double(f64),
}

/// Box the unboxed bit pattern `bits` held in `repr`
pub fn box_bits(repr: Representation, bits: u64) -> BoxedValue {
    match repr {
        Representation::UnboxedInt32 => BoxedValue::Int(bits as u32 as i32 as i64),
        Representation::UnboxedUint32 => BoxedValue::Int(bits as u32 as i64),
        Representation::UnboxedInt64
        | Representation::UnboxedIntPtr
        | Representation::Untagged
        | Representation::Tagged => BoxedValue::Int(bits as i64),
        Representation::UnboxedFloat => BoxedValue::Double(f32::from_bits(bits as u32) as f64),
        Representation::UnboxedDouble => BoxedValue::Double(f64::from_bits(bits)),
    }
}

/// Unbox `value` into `repr`, truncating integers to the representation's width
pub fn unbox_bits(repr: Representation, value: BoxedValue) -> u64 {
    let integer = |v: BoxedValue| match v {
        BoxedValue::Int(i) => i as u64,
        BoxedValue::Double(d) => d as i64 as u64,
    };
    let double = |v: BoxedValue| match v {
        BoxedValue::Int(i) => i as f64,
        BoxedValue::Double(d) => d,
    };
    match repr {
        Representation::UnboxedInt32 | Representation::UnboxedUint32 => {
            integer(value) & 0xffff_ffff
        }
        Representation::UnboxedInt64
        | Representation::UnboxedIntPtr
        | Representation::Untagged
        | Representation::Tagged => integer(value),
        Representation::UnboxedFloat => (double(value) as f32).to_bits() as u64,
        Representation::UnboxedDouble => double(value).to_bits(),
    }
}

/// Sign or zero extend the low bits of a sub-word value to the full width of `repr`
pub fn extend_bits(repr: Representation, from: SmallRepresentation, bits: u64) -> u64 {
    let widened = match from {
        SmallRepresentation::Int8 => bits as u8 as i8 as i64 as u64,
        SmallRepresentation::Int16 => bits as u16 as i16 as i64 as u64,
        SmallRepresentation::Uint8 => bits as u8 as u64,
        SmallRepresentation::Uint16 => bits as u16 as u64,
    };
    match repr.bit_width() {
        Some(32) => widened & 0xffff_ffff,
        _ => widened,
    }
}

/// Reinterpret the bits of a value between two representations of equal width
pub fn bit_cast(from: Representation, to: Representation, bits: u64) -> u64 {
    match (from.bit_width(), to.bit_width()) {
        (Some(32), _) | (_, Some(32)) => bits & 0xffff_ffff,
        _ => bits,
    }
}

/// Mask selecting the bits a foreign value of `ty` occupies
pub fn native_mask(ty: NativeType) -> u64 {
    match ty.size_in_bytes() {
        1 => 0xff,
        2 => 0xffff,
        4 => 0xffff_ffff,
        _ => u64::MAX,
    }
}
