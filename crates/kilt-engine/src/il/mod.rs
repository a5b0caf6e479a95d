//! Intermediate language
//!
//! Typed instructions in basic blocks, produced by the builder and consumed by
//! a code-generation backend.

pub mod display;
pub mod graph;
pub mod instr;
pub mod repr;
pub mod slot;

pub use display::PrettyPrint;
pub use graph::{FlowGraph, PrologueInfo};
pub use instr::{
    AssertKind, BinaryOp, BlockId, ComparisonKind, EntryKind, Instr, InstrId, InstrKind,
    InvocationKind, LocalRef, RebindRule, StoreBarrier, StoreKind,
};
pub use repr::{BoxedValue, Representation, SmallRepresentation};
pub use slot::Slot;
