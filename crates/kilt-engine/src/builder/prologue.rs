//! Prologue builder seam
//!
//! The prologue copies incoming arguments into their frame variables and
//! fills in defaults for optional parameters. It is supplied by the caller of
//! the builder; the builder only needs to know where user code attaches.

use crate::il::{FlowGraph, InstrId, PrologueInfo};
use crate::object::Function;

/// Where code continues after the prologue, and the blocks it spans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrologueResult {
    /// Instruction user code is appended after
    pub cursor: InstrId,
    /// Block range of the prologue
    pub info: PrologueInfo,
}

/// Builds the argument-copying prologue of a function
pub trait PrologueBuilder: Sync {
    /// Emit the prologue after `entry`
    fn build_prologue(
        &self,
        graph: &mut FlowGraph,
        function: &Function,
        entry: InstrId,
        osr_id: Option<u32>,
    ) -> PrologueResult;

    /// Whether [`PrologueBuilder::build_prologue`] emits nothing for `function`
    fn has_empty_prologue(&self, function: &Function) -> bool {
        !function.has_optional_parameters() && !function.is_generic()
    }
}

/// Prologue for functions whose arguments arrive in their variables
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyPrologue;

impl PrologueBuilder for EmptyPrologue {
    fn build_prologue(&self, _graph: &mut FlowGraph, _function: &Function, entry: InstrId, _osr_id: Option<u32>) -> PrologueResult {
        PrologueResult {
            cursor: entry,
            info: PrologueInfo::empty(),
        }
    }

    fn has_empty_prologue(&self, _function: &Function) -> bool {
        true
    }
}
