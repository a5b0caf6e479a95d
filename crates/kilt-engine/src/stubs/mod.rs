//! Type testing stubs
//!
//! Every canonical type carries the routine used to test instances against
//! it. Types start with a shared stub ([`StubCode::LazySpecializeTypeTest`]
//! for class types and type parameters); the first test through that stub
//! builds a dedicated routine, which is then published once and reused for
//! the life of the type. Types the hierarchy cannot range-check stay on
//! [`StubCode::DefaultTypeTest`].

pub mod assembler;
pub mod generator;
pub mod installer;
pub mod namer;
pub mod simulator;

use std::fmt;
use std::sync::Arc;

pub use assembler::{Label, StubAssembler, StubOp, StubRoutine, TypeArgumentsRegister};
pub use generator::{default_code_for_type, TypeTestingStubGenerator};
pub use installer::{ChannelObserver, CodeObserver, MutatorScope, StopTheWorld, TypeTestingStubs};
pub use namer::{assembler_safe_name, TypeTestingStubNamer};
pub use simulator::{Instance, StubOutcome, StubSimulator, TypeTestContext};

/// Code attached to a type for type tests
#[derive(Debug, Clone, PartialEq)]
pub enum StubCode {
    /// `Object`, `dynamic`, `void`: every value passes
    TopTypeTypeTest,
    /// Dereference the type ref, then test against its target
    TypeRefTypeTest,
    /// Build a specialised stub on first use
    LazySpecializeTypeTest,
    /// General subtype test, no specialisation
    DefaultTypeTest,
    /// Types that are never test targets
    UnreachableTypeTest,
    /// Dedicated routine for one canonical type
    Specialized(Arc<StubRoutine>),
}

impl StubCode {
    /// Whether this is a dedicated routine
    pub fn is_specialized(&self) -> bool {
        matches!(self, StubCode::Specialized(_))
    }

    /// Name of the stub as seen by code observers
    pub fn name(&self) -> &str {
        match self {
            StubCode::TopTypeTypeTest => "TopTypeTypeTest",
            StubCode::TypeRefTypeTest => "TypeRefTypeTest",
            StubCode::LazySpecializeTypeTest => "LazySpecializeTypeTest",
            StubCode::DefaultTypeTest => "DefaultTypeTest",
            StubCode::UnreachableTypeTest => "UnreachableTypeTest",
            StubCode::Specialized(routine) => routine.name(),
        }
    }
}

impl fmt::Display for StubCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
